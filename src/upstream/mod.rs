pub mod tzkt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::types::DelegationRecord;

pub use tzkt::TzktClient;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Sender {
    pub address: String,
}

/// A delegation operation as returned by the indexer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UpstreamDelegation {
    pub timestamp: DateTime<Utc>,
    pub amount: u64,
    pub sender: Sender,
    pub block: String,
}

impl From<UpstreamDelegation> for DelegationRecord {
    fn from(value: UpstreamDelegation) -> Self {
        Self {
            timestamp: value.timestamp,
            amount: value.amount,
            delegator: value.sender.address,
            block: value.block,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("delegation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("delegation request returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid delegation payload: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Without `after`: the most recent batch, newest first. With `after`:
    /// events strictly newer than it, in the order the indexer returned them.
    async fn list(
        &self,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<UpstreamDelegation>, SourceError>;
}
