//! Advanced schedule matching.
//!
//! A schedule is a 5-or-6 field expression `min hour dom month dow [sec]`.
//! Each field is a comma-separated list of single values or ranges, either
//! with an optional `/step`; `*` covers the whole field, `L` matches the
//! field maximum (last day of month in the day-of-month position).
//! Day-of-week accepts 0-7 with 7 treated as Sunday.
//!
//! A second-less expression matches for its whole covering minute; the
//! caller deduplicates by (current minute != last-check minute) or
//! (now - last-check >= 60 s). When the seconds field is present, matching
//! is second-resolution and `*/n` steps are taken against the absolute Unix
//! timestamp so that items fire aligned across the fleet.
//!
//! An expression may instead be a script reference `%[name]`: the named
//! library script runs with `$node` and `$dci` bound and its string result
//! is matched as the real expression. Script failure, a missing `]` or an
//! empty result means the schedule does not match, and expansion is never
//! recursive: a result that is itself a `%[...]` reference is rejected.

use std::borrow::Cow;

use chrono::{Datelike, NaiveDateTime, TimeZone, Timelike};
use tracing::debug;

use crate::script::{ScriptBindings, ScriptEnv};

/// Outcome of matching one expression against one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleMatch {
    pub matched: bool,
    /// The expression carried a seconds field; the minute-dedup rule does
    /// not apply to it.
    pub with_seconds: bool,
}

impl ScheduleMatch {
    fn miss(with_seconds: bool) -> Self {
        Self {
            matched: false,
            with_seconds,
        }
    }
}

/// Convert a Unix timestamp to broken-down local civil time.
pub fn civil_time(ts: i64) -> Option<NaiveDateTime> {
    chrono::Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|t| t.naive_local())
}

fn last_day_of_month(t: &NaiveDateTime) -> u32 {
    let (year, month) = (t.year(), t.month());
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(31)
}

/// Match one field of an expression against a time component.
///
/// `seconds_ts` is set only for the seconds field; `*/step` then divides the
/// absolute timestamp instead of the component value.
fn match_element(pattern: &str, value: u32, max_value: u32, seconds_ts: Option<i64>) -> bool {
    if pattern.is_empty() {
        return false;
    }
    for part in pattern.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return false;
        }
        if part == "L" {
            if value == max_value {
                return true;
            }
            continue;
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => match step.trim().parse::<u32>() {
                Ok(step) if step > 0 => (range.trim(), step),
                _ => return false,
            },
            None => (part, 1),
        };

        let matched = if range == "*" {
            if step == 1 {
                true
            } else if let Some(ts) = seconds_ts {
                ts.rem_euclid(i64::from(step)) == 0
            } else {
                value % step == 0
            }
        } else if let Some((lo, hi)) = range.split_once('-') {
            match (lo.trim().parse::<u32>(), hi.trim().parse::<u32>()) {
                (Ok(lo), Ok(hi)) if lo <= hi => {
                    (lo..=hi).contains(&value) && (value - lo) % step == 0
                }
                _ => return false,
            }
        } else {
            match range.parse::<u32>() {
                Ok(v) => v == value,
                Err(_) => return false,
            }
        };

        if matched {
            return true;
        }
    }
    false
}

/// Match a concrete (already expanded) expression against an instant.
///
/// `ts` is the Unix timestamp corresponding to `local`.
pub fn match_schedule(expr: &str, local: &NaiveDateTime, ts: i64) -> ScheduleMatch {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() < 5 {
        return ScheduleMatch::miss(false);
    }
    let with_seconds = fields.len() >= 6;

    if !match_element(fields[0], local.minute(), 59, None)
        || !match_element(fields[1], local.hour(), 23, None)
        || !match_element(fields[2], local.day(), last_day_of_month(local), None)
        || !match_element(fields[3], local.month(), 12, None)
    {
        return ScheduleMatch::miss(with_seconds);
    }

    // 7 is an alias for Sunday.
    let dow = fields[4].replace('7', "0");
    if !match_element(&dow, local.weekday().num_days_from_sunday(), 6, None) {
        return ScheduleMatch::miss(with_seconds);
    }

    if with_seconds {
        return ScheduleMatch {
            matched: match_element(fields[5], local.second(), 59, Some(ts)),
            with_seconds: true,
        };
    }

    ScheduleMatch {
        matched: true,
        with_seconds: false,
    }
}

/// Resolve a `%[name]` script reference into a concrete expression.
///
/// Plain expressions pass through borrowed. Returns `None` when the
/// reference is malformed, the script fails, the result is empty, or the
/// result is itself a script reference.
pub fn expand_schedule_reference<'a>(
    expr: &'a str,
    env: &dyn ScriptEnv,
    bindings: &ScriptBindings,
    item_id: u32,
) -> Option<Cow<'a, str>> {
    if !expr.starts_with("%[") {
        return Some(Cow::Borrowed(expr));
    }

    let Some(end) = expr.find(']') else {
        debug!(item_id, expr, "invalid script schedule syntax");
        return None;
    };
    let name = &expr[2..end];

    match env.run_named(name, bindings) {
        Ok(value) => match value.as_string().filter(|s| !s.is_empty()) {
            Some(expanded) => {
                if expanded.starts_with("%[") {
                    debug!(item_id, script = name, "recursive schedule expansion rejected");
                    return None;
                }
                debug!(item_id, script = name, schedule = %expanded, "script schedule expanded");
                Some(Cow::Owned(expanded))
            }
            None => {
                debug!(item_id, script = name, "script schedule expanded to nothing");
                None
            }
        },
        Err(e) => {
            debug!(item_id, script = name, error = %e, "script schedule execution failed");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
