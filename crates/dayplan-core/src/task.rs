use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::iso_date_serde;
use crate::recur::Recurrence;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Completed,
    Deleted,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Completed => "completed",
            Status::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Priority::Low),
            "m" | "med" | "medium" => Ok(Priority::Medium),
            "h" | "high" => Ok(Priority::High),
            other => Err(anyhow!("unknown priority: {other}")),
        }
    }
}

impl TryFrom<String> for Priority {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Priority> for String {
    fn from(value: Priority) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub uuid: Uuid,

    #[serde(default)]
    pub id: Option<u64>,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: Status,

    #[serde(with = "iso_date_serde")]
    pub entry: DateTime<Utc>,

    #[serde(with = "iso_date_serde")]
    pub modified: DateTime<Utc>,

    #[serde(default, with = "iso_date_serde::option")]
    pub end: Option<DateTime<Utc>>,

    #[serde(default, with = "iso_date_serde::option")]
    pub due: Option<DateTime<Utc>>,

    #[serde(default)]
    pub priority: Option<Priority>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recur: Option<Recurrence>,

    /// First task of the recurring series this task belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,

    /// Name of the plan that created this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Task {
    pub fn new_pending(title: String, now: DateTime<Utc>, id: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            id: Some(id),
            title,
            description: None,
            status: Status::Pending,
            entry: now,
            modified: now,
            end: None,
            due: None,
            priority: None,
            category: None,
            recur: None,
            parent: None,
            plan: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == Status::Pending
    }

    pub fn is_recurring(&self) -> bool {
        self.recur.is_some()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.due.is_some_and(|due| due < now)
    }

    /// Short display form of the uuid, used where no working-set id exists.
    pub fn short_uuid(&self) -> String {
        self.uuid.simple().to_string()[..8].to_string()
    }
}
