//! Daily automation schedule on Asia/Dhaka wall-clock time.

use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime};
use tokio::sync::watch;

use super::{Automation, TaskKind};
use crate::billing::dhaka_now;

/// Wall-clock run times, Asia/Dhaka.
pub const SCHEDULE: [(u32, u32, TaskKind); 2] = [
    (0, 30, TaskKind::GenerateInvoices),
    (9, 0, TaskKind::SendReminders),
];

/// Next scheduled job strictly after `now`, and when it is due.
pub fn next_run(now: NaiveDateTime) -> (NaiveDateTime, TaskKind) {
    let today = now.date();
    let mut candidates: Vec<(NaiveDateTime, TaskKind)> = Vec::with_capacity(SCHEDULE.len() * 2);
    for (hour, minute, kind) in SCHEDULE {
        let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
            continue;
        };
        let at = today.and_time(time);
        candidates.push((at, kind));
        candidates.push((at + chrono::Duration::days(1), kind));
    }
    candidates
        .into_iter()
        .filter(|(at, _)| *at > now)
        .min_by_key(|(at, _)| *at)
        .unwrap_or((now + chrono::Duration::days(1), TaskKind::GenerateInvoices))
}

/// Run scheduled jobs until `shutdown` flips to `true`.
pub async fn run(automation: Automation, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("Automation scheduler started");

    loop {
        let now = dhaka_now();
        let (at, kind) = next_run(now);
        let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!(task = kind.as_str(), due = %at, "Next scheduled task");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                match automation.run(kind, false).await {
                    Ok(result) => tracing::info!(task = kind.as_str(), %result, "Scheduled task finished"),
                    Err(e) => tracing::error!(task = kind.as_str(), error = %e, "Scheduled task failed"),
                }
                if kind == TaskKind::GenerateInvoices {
                    match automation.purge_cache().await {
                        Ok(removed) => tracing::debug!(removed, "Purged expired cache entries"),
                        Err(e) => tracing::warn!(error = %e, "Cache purge failed"),
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Automation scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_next_run_same_day() {
        assert_eq!(next_run(at(10, 0, 0)), (at(10, 0, 30), TaskKind::GenerateInvoices));
        assert_eq!(next_run(at(10, 0, 30)), (at(10, 9, 0), TaskKind::SendReminders));
    }

    #[test]
    fn test_next_run_rolls_over() {
        assert_eq!(next_run(at(10, 9, 0)), (at(11, 0, 30), TaskKind::GenerateInvoices));
        assert_eq!(next_run(at(31, 23, 59)).0, NaiveDate::from_ymd_opt(2025, 2, 1)
            .unwrap()
            .and_hms_opt(0, 30, 0)
            .unwrap());
    }
}
