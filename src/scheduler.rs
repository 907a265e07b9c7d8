//! Daily report push at a fixed local time

use std::sync::Arc;

use chrono::{DateTime, Duration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;

use crate::clients::traits::ReportSink;
use crate::engine::StockEngine;

/// Next instant strictly after `now` whose local wall-clock time in `tz` is `at`.
/// A time skipped by a DST jump fires at the first valid minute after it.
pub fn next_fire_after(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let mut date = now.with_timezone(&tz).date_naive();
    loop {
        let mut naive = date.and_time(at);
        let mut local = tz.from_local_datetime(&naive);
        let mut guard = 0;
        while matches!(local, LocalResult::None) && guard < 180 {
            naive += Duration::minutes(1);
            local = tz.from_local_datetime(&naive);
            guard += 1;
        }
        if let Some(candidate) = local.earliest() {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > now {
                return candidate;
            }
        }
        date = date.succ_opt().unwrap_or(date + Duration::days(1));
    }
}

/// Push the closing report every day until cancelled
pub async fn run_daily_report(
    engine: StockEngine,
    sink: Arc<dyn ReportSink>,
    at: NaiveTime,
    tz: Tz,
    cancel: CancellationToken,
) {
    loop {
        let now = Utc::now();
        let next = next_fire_after(now, at, tz);
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::debug!("Next scheduled report at {}", next.with_timezone(&tz));

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Report scheduler stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let text = engine.render_closing_report(next).await;
        match sink.push_report(&text).await {
            Ok(()) => tracing::info!("Scheduled report delivered"),
            Err(e) => tracing::warn!("Scheduled report failed: {}", e),
        }
    }
}
