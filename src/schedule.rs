//! Daily trigger

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, SecondsFormat, Utc};
use log::{error, info};
use tokio::time::sleep;

use crate::expiry::{calendar_date, local_to_utc};
use crate::runner::DailyRunner;

/// First instant strictly after `now` whose local time at `offset` is `run_at`
pub fn next_run_after(now: DateTime<Utc>, run_at: NaiveTime, offset: &FixedOffset) -> DateTime<Utc> {
    let today = local_to_utc(calendar_date(now, offset).and_time(run_at), offset);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Run `runner` every day at `run_at`, forever.
///
/// A failed run is logged and the loop waits for the next day.
pub async fn run_daily(runner: &DailyRunner, run_at: NaiveTime, offset: FixedOffset) {
    loop {
        let now = Utc::now();
        let next = next_run_after(now, run_at, &offset);
        info!(
            "Next expiry countdown at {}",
            next.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        sleep((next - now).to_std().unwrap_or_default()).await;

        match runner.run_once(Utc::now()).await {
            Ok(summary) => info!(
                "Countdown run finished: {} eligible, {} notified, {} failed",
                summary.eligible, summary.notified, summary.failed
            ),
            Err(e) => error!("Countdown run aborted: {}", e),
        }
    }
}
