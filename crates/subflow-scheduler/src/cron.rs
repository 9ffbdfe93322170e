//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Wildcards: *, */N, N, comma lists
//! DOW: 0-6 from Sunday (7 is also Sunday). DOM and MON: `*` only.
//! Example: "0 0 * * *" = nightly, "0 1 * * 1" = Mondays at 01:00

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// Horizon for the next-run search: a weekly schedule always fits.
const SEARCH_MINUTES: i64 = 8 * 24 * 60;

/// Parsed 5-field expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    weekdays: Vec<u32>,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Option<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            tracing::warn!(
                "Invalid cron expression: '{}' (need 5 fields: MIN HOUR DOM MON DOW)",
                expression
            );
            return None;
        }
        if parts[2] != "*" || parts[3] != "*" {
            tracing::warn!(
                "Unsupported cron expression: '{}' (day-of-month and month must be '*')",
                expression
            );
            return None;
        }

        let weekdays = parse_field(parts[4], 0, 7)?
            .into_iter()
            .map(|d| d % 7)
            .collect();
        Some(Self {
            expression: expression.to_string(),
            minutes: parse_field(parts[0], 0, 59)?,
            hours: parse_field(parts[1], 0, 23)?,
            weekdays,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes.contains(&at.minute())
            && self.hours.contains(&at.hour())
            && self.weekdays.contains(&at.weekday().num_days_from_sunday())
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = after + Duration::minutes(1);
        candidate = candidate.with_second(0).unwrap_or(candidate);
        candidate = candidate.with_nanosecond(0).unwrap_or(candidate);

        for _ in 0..SEARCH_MINUTES {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// Parse a cron expression and compute the next run time.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    CronSchedule::parse(expression)?.next_after(after)
}

/// Parse a cron field into a list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N: every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma-separated: "0,15,30,45"
    if field.contains(',') {
        // Any unparsable or out-of-range entry rejects the whole field.
        return field
            .split(',')
            .map(|s| s.trim().parse::<u32>().ok().filter(|x| (min..=max).contains(x)))
            .collect();
    }

    // Single number
    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max {
        Some(vec![n])
    } else {
        None
    }
}
