//! Schedule parsing and tick calculation.
//!
//! Supports standard cron expressions, extended 6-field cron (with seconds),
//! shortcuts (`@daily`, `@hourly`, ...), and interval expressions (`@every 5m`).

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No more occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

#[derive(Debug, Clone)]
enum ScheduleKind {
    Cron(Box<CronSchedule>),
    Interval(chrono::Duration),
}

/// When a pipeline runs.
#[derive(Debug, Clone)]
pub struct Schedule {
    expression: String,
    timezone: Tz,
    kind: ScheduleKind,
}

impl Schedule {
    /// Parse a schedule evaluated in UTC.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
    /// - Intervals: `@every 5m`, `@every 1h30m`
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, "UTC")
    }

    /// Parse a schedule whose cron fields are evaluated in `timezone`.
    pub fn with_timezone(expression: impl Into<String>, timezone: &str) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))?;
        let kind = parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            kind,
        })
    }

    /// The expression as written.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Name of the timezone.
    pub fn timezone(&self) -> &str {
        self.timezone.name()
    }

    /// The first tick strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match &self.kind {
            ScheduleKind::Cron(schedule) => schedule
                .after(&after.with_timezone(&self.timezone))
                .next()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or(ScheduleError::NoMoreOccurrences),
            ScheduleKind::Interval(step) => after
                .checked_add_signed(*step)
                .ok_or(ScheduleError::NoMoreOccurrences),
        }
    }

    /// Ticks in `(after, until]`, oldest first, at most `limit` of them.
    pub fn ticks_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Vec<DateTime<Utc>> {
        let mut ticks = Vec::new();
        let mut cursor = after;
        while ticks.len() < limit {
            match self.next_after(cursor) {
                Ok(next) if next <= until => {
                    ticks.push(next);
                    cursor = next;
                }
                _ => break,
            }
        }
        ticks
    }

    /// The next `n` ticks after `after`.
    pub fn next_n_after(&self, after: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        let mut ticks = Vec::with_capacity(n);
        let mut cursor = after;
        for _ in 0..n {
            match self.next_after(cursor) {
                Ok(next) => {
                    ticks.push(next);
                    cursor = next;
                }
                Err(_) => break,
            }
        }
        ticks
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.expression, self.timezone.name())
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

fn parse_expression(expression: &str) -> Result<ScheduleKind, ScheduleError> {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        parse_shortcut(trimmed)
    } else {
        parse_cron(trimmed)
    }
}

fn parse_shortcut(expression: &str) -> Result<ScheduleKind, ScheduleError> {
    let lower = expression.to_lowercase();
    match lower.as_str() {
        "@yearly" | "@annually" => parse_cron("0 0 1 1 *"),
        "@monthly" => parse_cron("0 0 1 * *"),
        "@weekly" => parse_cron("0 0 * * SUN"),
        "@daily" | "@midnight" => parse_cron("0 0 * * *"),
        "@hourly" => parse_cron("0 * * * *"),
        s => match s.strip_prefix("@every ") {
            Some(interval) => {
                let step = parse_duration(interval.trim())?;
                chrono::Duration::from_std(step)
                    .map(ScheduleKind::Interval)
                    .map_err(|_| ScheduleError::InvalidInterval(interval.to_string()))
            }
            None => Err(ScheduleError::InvalidCron(format!(
                "unknown shortcut: {expression}"
            ))),
        },
    }
}

fn parse_cron(expression: &str) -> Result<ScheduleKind, ScheduleError> {
    let fields = expression.split_whitespace().count();
    let cron_expr = match fields {
        5 => format!("0 {expression}"),
        6 => expression.to_string(),
        n => {
            return Err(ScheduleError::InvalidCron(format!(
                "expected 5 or 6 fields, got {n}"
            )));
        }
    };

    CronSchedule::from_str(&cron_expr)
        .map(|s| ScheduleKind::Cron(Box::new(s)))
        .map_err(|e| ScheduleError::InvalidCron(e.to_string()))
}

/// Parse a compact duration such as `30s`, `5m`, `1h30m` or `1d`.
pub fn parse_duration(s: &str) -> Result<Duration, ScheduleError> {
    let invalid = || ScheduleError::InvalidInterval(s.to_string());
    let mut total: u64 = 0;
    let mut digits = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => return Err(invalid()),
        };
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
    }

    if !digits.is_empty() || total == 0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}
