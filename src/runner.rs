//! One batch pass over the inventory
//!
//! Scan, evaluate, resolve members, then notify every member of every
//! eligible item. A failing item or member is counted and logged; it never
//! stops the rest of the run.

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

use crate::backend::Backend;
use crate::config::ServiceConfig;
use crate::dispatch::PushDispatcher;
use crate::error::Result;
use crate::expiry::{EligibleItem, ExpiryEvaluator, Verdict};
use crate::membership::{MemberDirectory, MembershipCache};
use crate::notifications::{ExpiryNotice, NotificationStore, PushStatus, UpsertOutcome};
use crate::scanner::CandidateScanner;
use crate::tokens::TokenRegistry;

/// Aggregated outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Distinct items returned by the scan
    pub candidates: usize,
    pub from_range: usize,
    pub from_fallback: usize,
    pub eligible: usize,
    pub skipped: usize,
    /// Records written, new or refreshed
    pub notified: usize,
    pub created: usize,
    pub refreshed: usize,
    /// Member lookups and record writes that failed
    pub failed: usize,
    /// Written records whose push could not be sent
    pub push_failures: usize,
    /// Wall-clock completion time, independent of the `now` the run used
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    fn absorb(&mut self, outcome: &Result<UpsertOutcome>) {
        match outcome {
            Ok(outcome) => {
                self.notified += 1;
                if outcome.created {
                    self.created += 1;
                } else {
                    self.refreshed += 1;
                }
                if matches!(outcome.push, PushStatus::Failed(_)) {
                    self.push_failures += 1;
                }
            }
            Err(_) => self.failed += 1,
        }
    }
}

pub struct DailyRunner {
    scanner: CandidateScanner,
    evaluator: ExpiryEvaluator,
    directory: Arc<dyn MemberDirectory>,
    store: NotificationStore,
    max_concurrency: usize,
}

impl DailyRunner {
    pub fn new(backend: &Backend, config: &ServiceConfig) -> Self {
        let dispatcher = PushDispatcher::new(
            TokenRegistry::new(backend.tokens.clone()),
            backend.push.clone(),
            config.push_hints.clone(),
        );
        Self {
            scanner: CandidateScanner::new(
                backend.items.clone(),
                config.utc_offset,
                config.fallback_limit,
            ),
            evaluator: ExpiryEvaluator::new(config.utc_offset, &config.messages.default_item_name),
            directory: backend.members.clone(),
            store: NotificationStore::new(
                backend.records.clone(),
                dispatcher,
                config.messages.clone(),
                config.utc_offset,
            ),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Run the whole pass as of `now`.
    ///
    /// Fails only when the scan cannot read any candidates.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let scan = self.scanner.scan(now).await?;
        let mut summary = RunSummary {
            candidates: scan.items.len(),
            from_range: scan.from_range,
            from_fallback: scan.from_fallback,
            ..RunSummary::default()
        };

        let mut eligible = Vec::new();
        for item in &scan.items {
            match self.evaluator.evaluate(item, now) {
                Verdict::Eligible(item) => eligible.push(item),
                Verdict::Skip(reason) => {
                    debug!("Skipping {}: {:?}", item.path, reason);
                    summary.skipped += 1;
                }
            }
        }
        summary.eligible = eligible.len();

        // Lives for this run only
        let members = MembershipCache::new(self.directory.clone());
        let per_item: Vec<RunSummary> = stream::iter(eligible)
            .map(|item| self.notify_item(&members, item, now))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        for item in per_item {
            summary.notified += item.notified;
            summary.created += item.created;
            summary.refreshed += item.refreshed;
            summary.failed += item.failed;
            summary.push_failures += item.push_failures;
        }

        let finished_at = Utc::now();
        summary.finished_at = Some(finished_at);
        info!(
            "dailyExpiryCountdown processed={} at {}",
            summary.candidates,
            finished_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        debug!("Run summary: {:?}", summary);
        Ok(summary)
    }

    async fn notify_item(
        &self,
        members: &MembershipCache,
        item: EligibleItem,
        now: DateTime<Utc>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        let recipients = match members.resolve(&item.family_id).await {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!("Members of household {} unavailable for {}: {}", item.family_id, item.path, e);
                summary.failed += 1;
                return summary;
            }
        };

        let notices: Vec<ExpiryNotice> = recipients
            .iter()
            .map(|uid| ExpiryNotice {
                to_uid: uid.clone(),
                family_id: item.family_id.clone(),
                ref_path: item.path.clone(),
                item_name: item.name.clone(),
                days_left: item.days_left,
                expires_on: item.expiry,
            })
            .collect();
        let outcomes = join_all(notices.iter().map(|notice| self.store.upsert(notice, now))).await;

        for (notice, outcome) in notices.iter().zip(&outcomes) {
            if let Err(e) = outcome {
                warn!("Notifying {} about {} failed: {}", notice.to_uid, notice.ref_path, e);
            }
            summary.absorb(outcome);
        }
        summary
    }
}
