//! Recurrence descriptors and next-occurrence stepping.
//!
//! A recurring task carries a `{type, interval, endDate?}` descriptor. When
//! such a task is completed, the next occurrence inherits everything except
//! identity and lifecycle fields, and is due one interval after the current
//! due date on the local calendar.

use std::fmt;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::task::{Status, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurKind {
    fn unit_code(self) -> char {
        match self {
            RecurKind::Daily => 'd',
            RecurKind::Weekly => 'w',
            RecurKind::Monthly => 'm',
            RecurKind::Yearly => 'y',
        }
    }

    fn unit_name(self) -> &'static str {
        match self {
            RecurKind::Daily => "day",
            RecurKind::Weekly => "week",
            RecurKind::Monthly => "month",
            RecurKind::Yearly => "year",
        }
    }
}

fn default_interval() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    #[serde(rename = "type")]
    pub kind: RecurKind,

    #[serde(default = "default_interval")]
    pub interval: u32,

    /// Last local date an occurrence may fall on.
    #[serde(
        default,
        rename = "endDate",
        alias = "end_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date: Option<NaiveDate>,
}

impl Recurrence {
    pub fn new(kind: RecurKind, interval: u32) -> Self {
        Self {
            kind,
            interval,
            end_date: None,
        }
    }

    /// Parses `daily`, `weekly`, `biweekly`, `monthly`, `yearly` (and their
    /// aliases) or the compact `<n><unit>` form such as `3d` or `2w`.
    pub fn parse(expr: &str) -> anyhow::Result<Self> {
        let token = expr.trim().to_ascii_lowercase();
        let named = match token.as_str() {
            "daily" | "day" => Some((RecurKind::Daily, 1)),
            "weekly" | "week" => Some((RecurKind::Weekly, 1)),
            "biweekly" | "fortnightly" => Some((RecurKind::Weekly, 2)),
            "monthly" | "month" => Some((RecurKind::Monthly, 1)),
            "quarterly" => Some((RecurKind::Monthly, 3)),
            "yearly" | "year" | "annually" | "annual" => Some((RecurKind::Yearly, 1)),
            _ => None,
        };
        if let Some((kind, interval)) = named {
            return Ok(Self::new(kind, interval));
        }

        let split = token
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| anyhow!("recurrence needs a unit: {expr}"))?;
        let (count, unit) = token.split_at(split);
        let interval: u32 = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .with_context(|| format!("invalid recurrence interval: {expr}"))?
        };
        if interval == 0 {
            return Err(anyhow!("recurrence interval must be at least 1: {expr}"));
        }

        let kind = match unit {
            "d" | "day" | "days" => RecurKind::Daily,
            "w" | "wk" | "week" | "weeks" => RecurKind::Weekly,
            "m" | "mo" | "month" | "months" => RecurKind::Monthly,
            "y" | "yr" | "year" | "years" => RecurKind::Yearly,
            _ => return Err(anyhow!("unknown recurrence: {expr}")),
        };

        Ok(Self::new(kind, interval))
    }

    fn effective_interval(&self) -> u32 {
        if self.interval == 0 {
            warn!("recurrence interval 0 treated as 1");
            1
        } else {
            self.interval
        }
    }

    /// Advances `date` by `steps` intervals on the calendar.
    ///
    /// Month and year steps clamp the day to the length of the target month.
    pub fn step_date(&self, date: NaiveDate, steps: u32) -> Option<NaiveDate> {
        let intervals = self.effective_interval().checked_mul(steps)?;
        match self.kind {
            RecurKind::Daily => date.checked_add_days(Days::new(u64::from(intervals))),
            RecurKind::Weekly => {
                date.checked_add_days(Days::new(u64::from(intervals).checked_mul(7)?))
            }
            RecurKind::Monthly => date.checked_add_months(Months::new(intervals)),
            RecurKind::Yearly => date.checked_add_months(Months::new(intervals.checked_mul(12)?)),
        }
    }

    /// Due instant of the occurrence after `current_due`, keeping its local
    /// wall-clock time in `tz`. `None` once the series is past `end_date`.
    pub fn next_due(
        &self,
        current_due: DateTime<Utc>,
        tz: &Tz,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let local = current_due.with_timezone(tz).naive_local();
        let next_date = self
            .step_date(local.date(), 1)
            .ok_or_else(|| anyhow!("recurrence stepped past the supported calendar range"))?;

        if let Some(end) = self.end_date
            && next_date > end
        {
            debug!(%next_date, %end, "recurrence series finished");
            return Ok(None);
        }

        let next_local = next_date.and_time(local.time());
        Ok(Some(wall_clock_to_utc(tz, next_local)?))
    }

    pub fn short_code(&self) -> String {
        format!("{}{}", self.effective_interval(), self.kind.unit_code())
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let interval = self.effective_interval();
        if interval == 1 {
            match self.kind {
                RecurKind::Daily => f.write_str("daily")?,
                RecurKind::Weekly => f.write_str("weekly")?,
                RecurKind::Monthly => f.write_str("monthly")?,
                RecurKind::Yearly => f.write_str("yearly")?,
            }
        } else {
            write!(f, "every {interval} {}s", self.kind.unit_name())?;
        }
        if let Some(end) = self.end_date {
            write!(f, " until {}", end.format("%Y-%m-%d"))?;
        }
        Ok(())
    }
}

// Occurrences landing in a DST gap move forward by the size of the gap
// instead of failing the completion.
fn wall_clock_to_utc(tz: &Tz, local: NaiveDateTime) -> anyhow::Result<DateTime<Utc>> {
    if let Some(dt) = tz.from_local_datetime(&local).earliest() {
        return Ok(dt.with_timezone(&Utc));
    }
    let shifted = local + Duration::hours(1);
    warn!(%local, %shifted, "recurrence landed in a DST gap; shifting forward");
    tz.from_local_datetime(&shifted)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("no valid local time near {local} in {}", tz.name()))
}

/// Builds the next occurrence of a recurring `task` that is being completed.
///
/// The base is the task's due date, or `now` for undated tasks. Returns
/// `None` for non-recurring tasks and for finished series.
#[instrument(skip(task, now, tz), fields(uuid = %task.uuid))]
pub fn spawn_next(
    task: &Task,
    now: DateTime<Utc>,
    tz: &Tz,
    next_id: u64,
) -> anyhow::Result<Option<Task>> {
    let Some(recur) = task.recur.as_ref() else {
        return Ok(None);
    };

    let base = task.due.unwrap_or(now);
    let Some(next_due) = recur.next_due(base, tz)? else {
        return Ok(None);
    };

    let mut next = task.clone();
    next.uuid = Uuid::new_v4();
    next.id = Some(next_id);
    next.status = Status::Pending;
    next.entry = now;
    next.modified = now;
    next.end = None;
    next.due = Some(next_due);
    next.parent = Some(task.parent.unwrap_or(task.uuid));

    debug!(
        next_uuid = %next.uuid,
        next_due = %next_due,
        weekday = ?next_due.with_timezone(tz).weekday(),
        "spawned next occurrence"
    );
    Ok(Some(next))
}
