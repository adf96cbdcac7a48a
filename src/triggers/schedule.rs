//! Cron schedule math and the clock schedules are computed against

use crate::triggers::types::TriggerError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

/// Source of "now" for schedule computations
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A validated cron expression bound to a timezone
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
    tz: Tz,
}

impl CronSchedule {
    /// Parse a cron expression in `timezone`
    ///
    /// Accepts standard 5-field expressions (minute resolution, day-of-week
    /// 0-7 with Sunday as 0 or 7) as well as 6/7-field expressions with a
    /// leading seconds field.
    pub fn parse(expr: &str, timezone: &str) -> Result<Self, TriggerError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| TriggerError::InvalidTimezone(timezone.to_string()))?;

        let fields: Vec<&str> = expr.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => {
                let dow = standard_day_of_week(fields[4]);
                format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], dow)
            }
            6 | 7 => fields.join(" "),
            n => {
                return Err(TriggerError::InvalidCron {
                    expr: expr.to_string(),
                    reason: format!("expected 5, 6 or 7 fields, got {}", n),
                })
            }
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| TriggerError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expr: expr.to_string(),
            schedule,
            tz,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First occurrence strictly after `after`, evaluated in the schedule's timezone
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.tz))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Translate a standard cron day-of-week field (Sunday = 0 or 7) into the
/// numbering of the `cron` crate (Sunday = 1 .. Saturday = 7)
///
/// Names (`MON-FRI`) and step values pass through untouched.
fn standard_day_of_week(field: &str) -> String {
    let shift = |n: u32| -> String { ((n % 7) + 1).to_string() };

    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let translated = match range.split_once('-') {
                Some((a, b)) => match (a.parse::<u32>(), b.parse::<u32>()) {
                    // Ranges ending on Sunday (7) keep their upper bound at
                    // Saturday and pick up Sunday separately.
                    (Ok(6), Ok(7)) if step.is_none() => "7,1".to_string(),
                    (Ok(a), Ok(7)) if step.is_none() && a > 0 => {
                        format!("{}-7,1", shift(a))
                    }
                    (Ok(a), Ok(b)) => format!("{}-{}", shift(a), if b == 7 { 7 } else { b + 1 }),
                    _ => range.to_string(),
                },
                None => match range.parse::<u32>() {
                    Ok(n) => shift(n),
                    Err(_) => range.to_string(),
                },
            };
            match step {
                Some(step) => format!("{}/{}", translated, step),
                None => translated,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
