use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, Instrument};

use crate::store::{RecordStore, StoreError};
use crate::types::DelegationRecord;
use crate::upstream::{SourceError, UpstreamSource};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("delegation store: {0}")]
    Store(#[from] StoreError),
    #[error("delegation source: {0}")]
    Source(#[from] SourceError),
    #[error("ingestion run exceeded {0:?}")]
    TimedOut(Duration),
}

/// Outcome of one successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub cursor: Option<DateTime<Utc>>,
    pub written: usize,
}

/// One pass of "read cursor, fetch newer, upsert". Holds no state between
/// runs; the newest stored timestamp is the cursor.
#[derive(Clone)]
pub struct IngestionCycle {
    source: Arc<dyn UpstreamSource>,
    store: Arc<dyn RecordStore>,
}

impl IngestionCycle {
    pub fn new(source: Arc<dyn UpstreamSource>, store: Arc<dyn RecordStore>) -> Self {
        Self { source, store }
    }

    pub async fn run(&self) -> Result<IngestReport, IngestError> {
        let cursor = self.store.latest().await?.map(|latest| latest.timestamp);
        info!(cursor = ?cursor, "listing delegations");

        let delegations = self.source.list(cursor).await?;
        if delegations.is_empty() {
            info!("no new delegations");
            return Ok(IngestReport { cursor, written: 0 });
        }

        let records = delegations
            .into_iter()
            .map(DelegationRecord::from)
            .collect::<Vec<_>>();
        info!(count = records.len(), "storing delegations");
        self.store.upsert(&records).await?;

        Ok(IngestReport {
            cursor,
            written: records.len(),
        })
    }

    pub async fn run_with_timeout(&self, limit: Duration) -> Result<IngestReport, IngestError> {
        tokio::time::timeout(limit, self.run().instrument(info_span!("ingest")))
            .await
            .map_err(|_| IngestError::TimedOut(limit))?
    }

    /// Runs a cycle every `every` until `shutdown` resolves, including while a
    /// cycle is in flight. Ticks never overlap; a failed cycle waits for the
    /// next tick.
    pub async fn run_every<S>(&self, limit: Duration, every: Duration, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => break,
            }
            tokio::select! {
                outcome = self.run_with_timeout(limit) => match outcome {
                    Ok(report) => {
                        info!(cursor = ?report.cursor, written = report.written, "ingestion finished");
                    }
                    Err(err) => error!(error = %err, "ingestion failed"),
                },
                _ = &mut shutdown => break,
            }
        }
        info!("stopping ingestion loop");
    }
}
