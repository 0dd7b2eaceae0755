//! Translation of crawl intervals and digest cadences into cron expressions.
//!
//! All expressions use the six-field form (`sec min hour dom month dow`)
//! understood by `tokio-cron-scheduler`.

use crate::error::{CrawlError, Result};
use crate::models::{NotifierConfig, NotifyPeriod};
use chrono::{NaiveTime, Timelike};
use std::fmt;

/// Smallest accepted crawl interval, in minutes.
pub const MIN_INTERVAL_MINUTES: u32 = 5;
/// Largest accepted crawl interval (one day), in minutes.
pub const MAX_INTERVAL_MINUTES: u32 = 1440;

/// A crawl cadence derived from an interval in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fire every `n` minutes.
    EveryMinutes(u32),
    /// Fire on the hour, every `n` hours.
    EveryHours(u32),
    /// Fire at `minute` past the hour, every `hours` hours.
    ///
    /// For 90 minutes this is `:30` of every hour, which fires every 60
    /// minutes rather than every 90.
    HourlyOffset { hours: u32, minute: u32 },
}

impl Schedule {
    pub fn cron_expression(&self) -> String {
        match *self {
            Schedule::EveryMinutes(n) => format!("0 */{n} * * * *"),
            Schedule::EveryHours(h) => format!("0 0 */{h} * * *"),
            Schedule::HourlyOffset { hours, minute } => format!("0 {minute} */{hours} * * *"),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cron_expression())
    }
}

/// Map a crawl interval to a [`Schedule`].
///
/// # Errors
///
/// [`CrawlError::InvalidInterval`] outside `[5, 1440]`.
///
/// # Examples
///
/// ```
/// use article_watch::schedule::{interval_to_schedule, Schedule};
///
/// assert_eq!(interval_to_schedule(45).unwrap(), Schedule::EveryMinutes(45));
/// assert_eq!(interval_to_schedule(120).unwrap(), Schedule::EveryHours(2));
/// assert_eq!(
///     interval_to_schedule(90).unwrap(),
///     Schedule::HourlyOffset { hours: 1, minute: 30 }
/// );
/// ```
pub fn interval_to_schedule(minutes: u32) -> Result<Schedule> {
    if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
        return Err(CrawlError::InvalidInterval(minutes));
    }
    let schedule = if minutes < 60 {
        Schedule::EveryMinutes(minutes)
    } else if minutes % 60 == 0 {
        Schedule::EveryHours(minutes / 60)
    } else {
        Schedule::HourlyOffset {
            hours: minutes / 60,
            minute: minutes % 60,
        }
    };
    Ok(schedule)
}

/// Cron expression for the digest notifier.
///
/// Hourly digests fire on the hour; daily ones at `notify_time` (`HH:MM`).
pub fn notify_schedule(config: &NotifierConfig) -> Result<String> {
    match config.period {
        NotifyPeriod::Hourly => Ok("0 0 * * * *".to_string()),
        NotifyPeriod::Daily => {
            let at = NaiveTime::parse_from_str(config.notify_time.trim(), "%H:%M").map_err(|e| {
                CrawlError::Config(format!("notify_time {:?}: {e}", config.notify_time))
            })?;
            Ok(format!("0 {} {} * * *", at.minute(), at.hour()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_hour_intervals() {
        for m in 5..60 {
            assert_eq!(interval_to_schedule(m).unwrap(), Schedule::EveryMinutes(m));
        }
        assert_eq!(interval_to_schedule(45).unwrap().to_string(), "0 */45 * * * *");
    }

    #[test]
    fn test_whole_hour_intervals() {
        for h in 1..=24 {
            assert_eq!(interval_to_schedule(h * 60).unwrap(), Schedule::EveryHours(h));
        }
        assert_eq!(interval_to_schedule(120).unwrap().cron_expression(), "0 0 */2 * * *");
    }

    #[test]
    fn test_offset_intervals() {
        for m in (61..1440).filter(|m| m % 60 != 0) {
            assert_eq!(
                interval_to_schedule(m).unwrap(),
                Schedule::HourlyOffset {
                    hours: m / 60,
                    minute: m % 60
                }
            );
        }
        assert_eq!(interval_to_schedule(90).unwrap().cron_expression(), "0 30 */1 * * *");
    }

    #[test]
    fn test_out_of_range_intervals() {
        for m in [0, 1, 4, 1441, 10_000] {
            assert!(matches!(
                interval_to_schedule(m),
                Err(CrawlError::InvalidInterval(v)) if v == m
            ));
        }
    }

    #[test]
    fn test_notify_schedule() {
        let mut config = NotifierConfig::default();
        assert_eq!(notify_schedule(&config).unwrap(), "0 0 9 * * *");

        config.notify_time = "18:45".to_string();
        assert_eq!(notify_schedule(&config).unwrap(), "0 45 18 * * *");

        config.period = NotifyPeriod::Hourly;
        assert_eq!(notify_schedule(&config).unwrap(), "0 0 * * * *");

        config.period = NotifyPeriod::Daily;
        config.notify_time = "25:00".to_string();
        assert!(matches!(notify_schedule(&config), Err(CrawlError::Config(_))));
    }
}
