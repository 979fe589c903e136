use crate::error::CliError;
use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};
use std::{future::Future, str::FromStr, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A local wall-clock time at which a transfer runs every day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl FromStr for DailySchedule {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| CliError::InvalidSchedule {
            value: s.to_string(),
            reason,
        };

        let (hour, minute) = s.trim().split_once(':').ok_or(invalid("expected HH:MM"))?;
        if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
            return Err(invalid("expected HH:MM"));
        }
        let hour: u32 = hour.parse().map_err(|_| invalid("hour is not a number"))?;
        let minute: u32 = minute.parse().map_err(|_| invalid("minute is not a number"))?;

        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(|at| DailySchedule { at })
            .ok_or(invalid("hour must be 0-23 and minute 0-59"))
    }
}

impl DailySchedule {
    /// First occurrence strictly after `now`.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(self.at);
        if today > now {
            today
        } else {
            today + TimeDelta::days(1)
        }
    }

    fn next_local(&self, now: DateTime<Local>) -> DateTime<Local> {
        let mut next = self.next_after(now.naive_local());
        // Skip wall-clock times that do not exist on a DST change.
        loop {
            if let Some(at) = Local.from_local_datetime(&next).earliest() {
                return at;
            }
            next += TimeDelta::days(1);
        }
    }

    /// Calls `run` at every occurrence until `cancel` fires.
    pub async fn run_daily<F, Fut>(&self, cancel: &CancellationToken, mut run: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            let now = Local::now();
            let next = self.next_local(now);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next_run = %next.format("%Y-%m-%d %H:%M"), "Waiting for the next scheduled transfer");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            run().await;
            if cancel.is_cancelled() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .unwrap()
    }

    #[test]
    fn parses_hours_and_minutes() {
        let schedule: DailySchedule = "02:30".parse().unwrap();
        assert_eq!(schedule.at, NaiveTime::from_hms_opt(2, 30, 0).unwrap());
        assert!("7:05".parse::<DailySchedule>().is_ok());
    }

    #[test]
    fn rejects_malformed_times() {
        for bad in ["", "2", "24:00", "12:60", "12:5", "ab:cd", "123:00", "12-30"] {
            assert!(bad.parse::<DailySchedule>().is_err(), "{bad}");
        }
    }

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        let schedule: DailySchedule = "02:30".parse().unwrap();

        assert_eq!(schedule.next_after(at(10, 1, 0)), at(10, 2, 30));
        assert_eq!(schedule.next_after(at(10, 2, 30)), at(11, 2, 30));
        assert_eq!(schedule.next_after(at(10, 23, 59)), at(11, 2, 30));
    }

    #[tokio::test]
    async fn cancelled_scheduler_never_runs() {
        let schedule: DailySchedule = "00:00".parse().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut runs = 0;
        schedule
            .run_daily(&cancel, || {
                runs += 1;
                async {}
            })
            .await;
        assert_eq!(runs, 0);
    }
}
