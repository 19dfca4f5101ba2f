use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use tracing::{debug, error};

use crate::config::UpstreamConfig;
use crate::upstream::{SourceError, UpstreamDelegation, UpstreamSource};

const DELEGATIONS_RESOURCE: &str = "operations/delegations";
const SELECTED_FIELDS: &str = "timestamp,amount,sender,block";
const BODY_PREVIEW_CHARS: usize = 180;

/// TzKT indexer client for delegation operations.
#[derive(Debug, Clone)]
pub struct TzktClient {
    client: Client,
    base_url: String,
    page_limit: u32,
}

impl TzktClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(concat!("tezos-delegation/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_limit: config.page_limit,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/{DELEGATIONS_RESOURCE}", self.base_url)
    }

    // The indexer cannot sort by timestamp while filtering on it, so both
    // modes sort on the operation id instead.
    fn query_params(&self, after: Option<DateTime<Utc>>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("select", SELECTED_FIELDS.to_string()),
            ("limit", self.page_limit.to_string()),
        ];
        match after {
            Some(cursor) => {
                params.push((
                    "timestamp.gt",
                    cursor.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                ));
                params.push(("sort.asc", "id".to_string()));
            }
            None => params.push(("sort.desc", "id".to_string())),
        }
        params
    }
}

#[async_trait]
impl UpstreamSource for TzktClient {
    async fn list(
        &self,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<UpstreamDelegation>, SourceError> {
        let url = self.endpoint();
        let params = self.query_params(after);
        debug!(%url, ?params, "listing delegations");

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|err| {
                error!(%url, error = %err, "delegation request failed");
                SourceError::Transport(err)
            })?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
            error!(%url, %status, body = %preview, "delegation request rejected");
            return Err(SourceError::Status {
                status,
                body: preview,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}
