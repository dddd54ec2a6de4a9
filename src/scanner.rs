//! Candidate item scan
//!
//! Two queries feed the evaluator: a range query over the typed expiry and a
//! newest-first window of legacy items that only carry an expiry string. The
//! legacy window is capped, so old legacy items that never get touched again
//! can fall outside it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;

use expiry_countdown_store::ItemRecord;

use crate::error::{Error, Result};
use crate::expiry::{start_of_day, ALERT_WINDOW_DAYS};

/// Read access to the inventory
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Items whose typed expiry lies in `[start, end]`
    async fn items_expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ItemRecord>>;

    /// The newest `limit` items without a typed expiry
    async fn recent_items(&self, limit: usize) -> Result<Vec<ItemRecord>>;
}

/// Deduplicated candidates of one scan
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub items: Vec<ItemRecord>,
    pub from_range: usize,
    pub from_fallback: usize,
}

pub struct CandidateScanner {
    source: Arc<dyn ItemSource>,
    offset: FixedOffset,
    fallback_limit: usize,
}

impl CandidateScanner {
    pub fn new(source: Arc<dyn ItemSource>, offset: FixedOffset, fallback_limit: usize) -> Self {
        Self {
            source,
            offset,
            fallback_limit,
        }
    }

    /// The typed-expiry window `[start of today, start of today + 3 days]`
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = start_of_day(now, &self.offset);
        (start, start + Duration::days(ALERT_WINDOW_DAYS))
    }

    /// Run both queries and merge their rows.
    ///
    /// One failing query is logged and the other source is still used. Only
    /// when both fail is the scan an error.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<ScanResult> {
        let (start, end) = self.window(now);
        let (ranged, recent) = tokio::join!(
            self.source.items_expiring_between(start, end),
            self.source.recent_items(self.fallback_limit)
        );

        let (ranged, recent) = match (ranged, recent) {
            (Err(range_err), Err(fallback_err)) => {
                return Err(Error::Scan(format!(
                    "range query: {}; fallback query: {}",
                    range_err, fallback_err
                )));
            }
            (ranged, recent) => (
                ranged.unwrap_or_else(|e| {
                    warn!("Expiry range query failed: {}", e);
                    Vec::new()
                }),
                recent.unwrap_or_else(|e| {
                    warn!("Legacy fallback query failed: {}", e);
                    Vec::new()
                }),
            ),
        };

        let mut seen = HashSet::new();
        let mut result = ScanResult::default();
        for item in ranged {
            if seen.insert(item.path.clone()) {
                result.from_range += 1;
                result.items.push(item);
            }
        }
        for item in recent {
            if item.expiry_ts.is_some() || item.expiry_date.is_none() {
                continue;
            }
            if seen.insert(item.path.clone()) {
                result.from_fallback += 1;
                result.items.push(item);
            }
        }

        debug!(
            "Scan found {} candidate(s): {} by range, {} by fallback",
            result.items.len(),
            result.from_range,
            result.from_fallback
        );
        Ok(result)
    }
}
