//! Multi-day plans and their resolution into dated tasks.
//!
//! A plan is an ordered list of task stubs keyed by a relative day ("Day 1",
//! "Day 2", ...) and an optional clock time. Plans arrive either as JSON
//! (the shape an assistant emits) or as a small line-oriented text format
//! that is easy to edit by hand.
//!
//! Resolution anchors "Day 1" on a concrete local date. With
//! [`StartPolicy::Auto`], Day 1 is today unless its earliest timed item has
//! already passed on the local clock, in which case the whole plan starts
//! tomorrow. Every later day is offset from that anchor.

use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::datetime::{local_to_utc, parse_clock_time};
use crate::task::{Priority, Task};

/// Plans longer than a year are rejected.
pub const MAX_PLAN_DAY: u32 = 366;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanItem {
    pub day: u32,
    pub time: Option<NaiveTime>,
    pub title: String,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub description: Option<String>,
}

impl PlanItem {
    pub fn new(day: u32, title: impl Into<String>) -> Self {
        Self {
            day,
            time: None,
            title: title.into(),
            priority: None,
            category: None,
            description: None,
        }
    }

    pub fn at(mut self, time: NaiveTime) -> Self {
        self.time = Some(time);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub name: Option<String>,
    pub items: Vec<PlanItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPolicy {
    #[default]
    Auto,
    Today,
    Tomorrow,
}

impl FromStr for StartPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StartPolicy::Auto),
            "today" => Ok(StartPolicy::Today),
            "tomorrow" => Ok(StartPolicy::Tomorrow),
            other => Err(anyhow!(
                "invalid plan start '{other}' (expected auto, today or tomorrow)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedItem {
    pub item: PlanItem,
    pub date: NaiveDate,
    pub due: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlan {
    pub name: Option<String>,
    pub start: NaiveDate,
    pub starts_tomorrow: bool,
    pub items: Vec<ResolvedItem>,
}

impl Plan {
    /// Parses JSON when the input starts with `[` or `{`, text otherwise.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let raw = raw.trim_start_matches('\u{feff}');
        let trimmed = raw.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            Self::parse_json(trimmed)
        } else {
            Self::parse_text(raw)
        }
    }

    #[instrument(skip(raw))]
    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        let doc: Value = serde_json::from_str(raw).context("plan is not valid JSON")?;

        let mut plan = Plan::default();
        match doc {
            Value::Array(items) => {
                plan.items = parse_json_items(&items, None)?;
            }
            Value::Object(obj) => {
                plan.name = ["name", "title"]
                    .iter()
                    .find_map(|key| obj.get(*key).and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(ToString::to_string);

                if let Some(days) = obj.get("days").and_then(Value::as_array) {
                    for (group_idx, group) in days.iter().enumerate() {
                        let group: RawDayGroup = serde_json::from_value(group.clone())
                            .with_context(|| format!("plan day group {}", group_idx + 1))?;
                        let day = parse_day_label(&group.day)
                            .with_context(|| format!("plan day group {}", group_idx + 1))?;
                        plan.items.extend(parse_json_items(&group.tasks, Some(day))?);
                    }
                } else {
                    let items = ["items", "tasks", "plan"]
                        .iter()
                        .find_map(|key| obj.get(*key).and_then(Value::as_array))
                        .ok_or_else(|| {
                            anyhow!("plan object needs an 'items', 'tasks', 'plan' or 'days' array")
                        })?;
                    plan.items = parse_json_items(items, None)?;
                }
            }
            _ => return Err(anyhow!("plan JSON must be an array or an object")),
        }

        plan.validate()?;
        debug!(items = plan.items.len(), name = ?plan.name, "parsed JSON plan");
        Ok(plan)
    }

    #[instrument(skip(raw))]
    pub fn parse_text(raw: &str) -> anyhow::Result<Self> {
        let mut plan = Plan::default();
        let mut current_day: Option<u32> = None;

        for (idx, line) in raw.lines().enumerate() {
            let line_num = idx + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(comment) = trimmed.strip_prefix('#') {
                if plan.name.is_none() && plan.items.is_empty() && current_day.is_none() {
                    let name = comment.trim();
                    if !name.is_empty() {
                        plan.name = Some(name.to_string());
                    }
                }
                continue;
            }

            if let Some(day) = parse_day_header(trimmed) {
                let day = day.with_context(|| format!("plan line {line_num}"))?;
                current_day = Some(day);
                continue;
            }

            let Some(rest) = trimmed
                .strip_prefix('-')
                .or_else(|| trimmed.strip_prefix('*'))
            else {
                return Err(anyhow!(
                    "plan line {line_num}: expected a 'Day N' header or a '- item' line"
                ));
            };

            let day = current_day.ok_or_else(|| {
                anyhow!("plan line {line_num}: item appears before any 'Day N' header")
            })?;
            let item = parse_text_item(day, rest).with_context(|| format!("plan line {line_num}"))?;
            plan.items.push(item);
        }

        plan.validate()?;
        debug!(items = plan.items.len(), name = ?plan.name, "parsed text plan");
        Ok(plan)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.items.is_empty() {
            return Err(anyhow!("plan has no items"));
        }
        for (idx, item) in self.items.iter().enumerate() {
            if item.day == 0 || item.day > MAX_PLAN_DAY {
                return Err(anyhow!(
                    "plan item {}: day {} is outside 1..={MAX_PLAN_DAY}",
                    idx + 1,
                    item.day
                ));
            }
            if item.title.trim().is_empty() {
                return Err(anyhow!("plan item {}: title is empty", idx + 1));
            }
        }
        Ok(())
    }

    /// Earliest clock time among the Day 1 items, if any of them is timed.
    pub fn first_day_earliest_time(&self) -> Option<NaiveTime> {
        self.items
            .iter()
            .filter(|item| item.day == 1)
            .filter_map(|item| item.time)
            .min()
    }
}

/// Picks the local date that "Day 1" lands on.
///
/// Returns the date and whether it was pushed to tomorrow.
pub fn resolve_start_date(
    plan: &Plan,
    now: DateTime<Utc>,
    tz: &Tz,
    policy: StartPolicy,
) -> (NaiveDate, bool) {
    let local_now = now.with_timezone(tz);
    let today = local_now.date_naive();

    let starts_tomorrow = match policy {
        StartPolicy::Today => false,
        StartPolicy::Tomorrow => true,
        StartPolicy::Auto => plan
            .first_day_earliest_time()
            .is_some_and(|earliest| earliest <= local_now.time()),
    };

    if starts_tomorrow {
        (today.succ_opt().unwrap_or(today), true)
    } else {
        (today, false)
    }
}

#[instrument(skip(plan, now, tz), fields(items = plan.items.len()))]
pub fn resolve(
    plan: &Plan,
    now: DateTime<Utc>,
    tz: &Tz,
    policy: StartPolicy,
    default_time: Option<NaiveTime>,
) -> anyhow::Result<ResolvedPlan> {
    plan.validate()?;

    let (start, starts_tomorrow) = resolve_start_date(plan, now, tz, policy);
    debug!(%start, starts_tomorrow, ?policy, "resolved plan start");

    let mut ordered: Vec<&PlanItem> = plan.items.iter().collect();
    ordered.sort_by_key(|item| (item.day, item.time.is_none(), item.time));

    let mut items = Vec::with_capacity(ordered.len());
    for item in ordered {
        let date = start
            .checked_add_days(Days::new(u64::from(item.day - 1)))
            .ok_or_else(|| anyhow!("plan day {} is outside the calendar range", item.day))?;
        let time = item.time.or(default_time).unwrap_or(NaiveTime::MIN);
        let due = local_to_utc(tz, date.and_time(time), &item.title)
            .with_context(|| format!("cannot schedule '{}' on day {}", item.title, item.day))?;
        items.push(ResolvedItem {
            item: item.clone(),
            date,
            due,
        });
    }

    Ok(ResolvedPlan {
        name: plan.name.clone(),
        start,
        starts_tomorrow,
        items,
    })
}

impl ResolvedPlan {
    /// Pending tasks for every item, numbered from `first_id`.
    pub fn into_tasks(&self, now: DateTime<Utc>, first_id: u64) -> Vec<Task> {
        self.items
            .iter()
            .zip(first_id..)
            .map(|(resolved, id)| {
                let mut task = Task::new_pending(resolved.item.title.trim().to_string(), now, id);
                task.due = Some(resolved.due);
                task.priority = resolved.item.priority;
                task.category = resolved.item.category.clone();
                task.description = resolved.item.description.clone();
                task.plan = self.name.clone();
                task
            })
            .collect()
    }

    pub fn end(&self) -> NaiveDate {
        self.items
            .iter()
            .map(|item| item.date)
            .max()
            .unwrap_or(self.start)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DayLabel {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawPlanItem {
    #[serde(default)]
    day: Option<DayLabel>,
    #[serde(default)]
    time: Option<Value>,
    #[serde(default, alias = "task", alias = "name")]
    title: Option<String>,
    #[serde(default)]
    priority: Option<Value>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, alias = "notes")]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDayGroup {
    day: DayLabel,
    #[serde(default, alias = "items")]
    tasks: Vec<Value>,
}

fn parse_json_items(values: &[Value], group_day: Option<u32>) -> anyhow::Result<Vec<PlanItem>> {
    let mut out = Vec::with_capacity(values.len());
    for (idx, value) in values.iter().enumerate() {
        let raw: RawPlanItem = serde_json::from_value(value.clone())
            .with_context(|| format!("plan item {}", idx + 1))?;
        let item = normalize_raw_item(raw, group_day).with_context(|| format!("plan item {}", idx + 1))?;
        out.push(item);
    }
    Ok(out)
}

fn normalize_raw_item(raw: RawPlanItem, group_day: Option<u32>) -> anyhow::Result<PlanItem> {
    let day = match (raw.day.as_ref(), group_day) {
        (Some(label), _) => parse_day_label(label)?,
        (None, Some(day)) => day,
        (None, None) => return Err(anyhow!("day is required")),
    };

    let title = raw
        .title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .ok_or_else(|| anyhow!("title is required"))?;

    let time = match raw.time {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => parse_plan_time(&text)?,
        Some(Value::Number(num)) => {
            let hour = num
                .as_u64()
                .and_then(|hour| u32::try_from(hour).ok())
                .and_then(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
                .ok_or_else(|| anyhow!("time {num} is not an hour of the day"))?;
            Some(hour)
        }
        Some(other) => {
            return Err(anyhow!(
                "time must be a string like \"09:30\" or an hour number, got {other}"
            ));
        }
    };

    let priority = match raw.priority {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) if text.trim().is_empty() => None,
        Some(Value::String(text)) => match text.parse::<Priority>() {
            Ok(priority) => Some(priority),
            Err(err) => {
                warn!(title = %title, priority = %text, error = %err, "dropping unknown plan priority");
                None
            }
        },
        Some(other) => {
            warn!(title = %title, priority = %other, "dropping non-text plan priority");
            None
        }
    };

    Ok(PlanItem {
        day,
        time,
        title,
        priority,
        category: non_blank(raw.category),
        description: non_blank(raw.description),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn day_label_regex() -> Option<&'static Regex> {
    static DAY_RE: OnceLock<Option<Regex>> = OnceLock::new();
    DAY_RE
        .get_or_init(|| Regex::new(r"(?i)^\s*(?:day|d)?\s*(?P<num>\d+)\s*$").ok())
        .as_ref()
}

fn day_header_regex() -> Option<&'static Regex> {
    static HEADER_RE: OnceLock<Option<Regex>> = OnceLock::new();
    HEADER_RE
        .get_or_init(|| Regex::new(r"(?i)^day\s*(?P<num>\d+)\s*:?$").ok())
        .as_ref()
}

fn parse_day_label(label: &DayLabel) -> anyhow::Result<u32> {
    let day = match label {
        DayLabel::Number(num) => u32::try_from(*num).map_err(|_| anyhow!("invalid day: {num}"))?,
        DayLabel::Text(text) => {
            let caps = day_label_regex()
                .and_then(|re| re.captures(text))
                .ok_or_else(|| anyhow!("invalid day label: '{text}'"))?;
            caps["num"]
                .parse::<u32>()
                .with_context(|| format!("invalid day label: '{text}'"))?
        }
    };
    if day == 0 || day > MAX_PLAN_DAY {
        return Err(anyhow!("day {day} is outside 1..={MAX_PLAN_DAY}"));
    }
    Ok(day)
}

/// `Some(result)` when `line` is a `Day N` header.
fn parse_day_header(line: &str) -> Option<anyhow::Result<u32>> {
    let caps = day_header_regex()?.captures(line)?;
    Some(parse_day_label(&DayLabel::Text(caps["num"].to_string())))
}

/// Parses the `time` field of a plan item: a clock time, a period word,
/// or nothing.
pub fn parse_plan_time(raw: &str) -> anyhow::Result<Option<NaiveTime>> {
    let token = raw.trim().to_ascii_lowercase();
    if token.is_empty() || token == "anytime" || token == "any" {
        return Ok(None);
    }

    let named = match token.as_str() {
        "morning" => Some((9, 0)),
        "noon" | "midday" => Some((12, 0)),
        "afternoon" => Some((14, 0)),
        "evening" => Some((19, 0)),
        "night" => Some((21, 0)),
        _ => None,
    };
    if let Some((hour, minute)) = named.or_else(|| parse_clock_time(&token)) {
        return NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Some)
            .ok_or_else(|| anyhow!("invalid time: '{raw}'"));
    }

    NaiveTime::parse_from_str(&token, "%H:%M:%S")
        .map(Some)
        .map_err(|_| anyhow!("invalid time: '{raw}'"))
}

fn parse_text_item(day: u32, rest: &str) -> anyhow::Result<PlanItem> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let mut idx = 0;
    let mut time = None;

    if let Some(first) = tokens.first() {
        let joined = tokens
            .get(1)
            .filter(|next| next.eq_ignore_ascii_case("am") || next.eq_ignore_ascii_case("pm"))
            .map(|next| format!("{first}{next}"));
        if let Some(joined) = joined
            && let Some((hour, minute)) = parse_clock_time(&joined)
        {
            time = NaiveTime::from_hms_opt(hour, minute, 0);
            idx = 2;
        } else if let Some((hour, minute)) = parse_clock_time(first) {
            time = NaiveTime::from_hms_opt(hour, minute, 0);
            idx = 1;
        }
    }

    let mut item = PlanItem::new(day, String::new());
    item.time = time;
    let mut words = Vec::new();
    for token in &tokens[idx..] {
        if let Some(level) = token.strip_prefix('!')
            && !level.is_empty()
        {
            match level.parse::<Priority>() {
                Ok(priority) => {
                    item.priority = Some(priority);
                    continue;
                }
                Err(_) => {
                    warn!(token = %token, "unknown priority marker kept in title");
                }
            }
        }
        if let Some(category) = token.strip_prefix('@')
            && !category.is_empty()
        {
            item.category = Some(category.to_string());
            continue;
        }
        words.push(*token);
    }

    item.title = words.join(" ");
    if item.title.is_empty() {
        return Err(anyhow!("item has no title"));
    }
    Ok(item)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use chrono_tz::Europe::Berlin;

    use super::{Plan, PlanItem, StartPolicy, parse_plan_time, resolve, resolve_start_date};
    use crate::task::Priority;

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn workout_plan() -> Plan {
        Plan {
            name: Some("Workout week".to_string()),
            items: vec![
                PlanItem::new(1, "Run 5k").at(hm(7, 30)),
                PlanItem::new(1, "Stretch"),
                PlanItem::new(1, "Swim").at(hm(18, 0)),
                PlanItem::new(2, "Rest day"),
                PlanItem::new(3, "Intervals").at(hm(7, 0)),
            ],
        }
    }

    #[test]
    fn day_one_starts_today_before_its_earliest_time() {
        // 06:00 in Berlin.
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 4, 0, 0).unwrap();
        let resolved = resolve(&workout_plan(), now, &Berlin, StartPolicy::Auto, None).unwrap();

        assert_eq!(resolved.start, date(2026, 10, 14));
        assert!(!resolved.starts_tomorrow);
        assert_eq!(resolved.items[0].item.title, "Run 5k");
        assert_eq!(resolved.items[0].due, Utc.with_ymd_and_hms(2026, 10, 14, 5, 30, 0).unwrap());
        assert_eq!(resolved.items[4].date, date(2026, 10, 16));
        assert_eq!(resolved.end(), date(2026, 10, 16));
    }

    #[test]
    fn day_one_moves_to_tomorrow_once_earliest_time_elapsed() {
        // 07:30 in Berlin exactly: the first item is no longer reachable.
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 5, 30, 0).unwrap();
        let resolved = resolve(&workout_plan(), now, &Berlin, StartPolicy::Auto, None).unwrap();

        assert!(resolved.starts_tomorrow);
        assert_eq!(resolved.start, date(2026, 10, 15));
        let intervals = resolved
            .items
            .iter()
            .find(|r| r.item.title == "Intervals")
            .unwrap();
        assert_eq!(intervals.date, date(2026, 10, 17));
    }

    #[test]
    fn untimed_day_one_always_starts_today() {
        let plan = Plan {
            name: None,
            items: vec![PlanItem::new(1, "Inbox zero"), PlanItem::new(2, "Review").at(hm(6, 0))],
        };
        // 23:30 in Berlin.
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 21, 30, 0).unwrap();
        assert_eq!(
            resolve_start_date(&plan, now, &Berlin, StartPolicy::Auto),
            (date(2026, 10, 14), false)
        );
    }

    #[test]
    fn explicit_policies_override_the_clock() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 4, 0, 0).unwrap();
        let plan = workout_plan();
        assert_eq!(
            resolve_start_date(&plan, now, &Berlin, StartPolicy::Tomorrow),
            (date(2026, 10, 15), true)
        );
        let late = Utc.with_ymd_and_hms(2026, 10, 14, 20, 0, 0).unwrap();
        assert_eq!(
            resolve_start_date(&plan, late, &Berlin, StartPolicy::Today),
            (date(2026, 10, 14), false)
        );
        assert_eq!("Tomorrow".parse::<StartPolicy>().unwrap(), StartPolicy::Tomorrow);
        assert!("later".parse::<StartPolicy>().is_err());
    }

    #[test]
    fn untimed_items_use_default_time_and_sort_after_timed_ones() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 4, 0, 0).unwrap();
        let resolved =
            resolve(&workout_plan(), now, &Berlin, StartPolicy::Auto, Some(hm(12, 0))).unwrap();

        let day_one: Vec<&str> = resolved
            .items
            .iter()
            .filter(|r| r.item.day == 1)
            .map(|r| r.item.title.as_str())
            .collect();
        assert_eq!(day_one, vec!["Run 5k", "Swim", "Stretch"]);

        let stretch = &resolved.items[2];
        assert_eq!(stretch.due, Utc.with_ymd_and_hms(2026, 10, 14, 10, 0, 0).unwrap());

        let without_default = resolve(&workout_plan(), now, &Berlin, StartPolicy::Auto, None).unwrap();
        assert_eq!(
            without_default.items[2].due,
            Utc.with_ymd_and_hms(2026, 10, 13, 22, 0, 0).unwrap()
        );
    }

    #[test]
    fn parses_assistant_json_array() {
        let raw = r#"[
            {"day": "Day 1", "time": "9:30am", "title": "Call dentist", "priority": "High", "category": "health"},
            {"day": 2, "time": "evening", "task": "Meal prep", "priority": "urgent"},
            {"day": "D3", "time": "", "title": "  Read  ", "category": " "}
        ]"#;
        let plan = Plan::parse(raw).unwrap();
        assert_eq!(plan.items.len(), 3);
        assert_eq!(plan.items[0].day, 1);
        assert_eq!(plan.items[0].time, Some(hm(9, 30)));
        assert_eq!(plan.items[0].priority, Some(Priority::High));
        assert_eq!(plan.items[0].category.as_deref(), Some("health"));
        assert_eq!(plan.items[1].time, Some(hm(19, 0)));
        assert_eq!(plan.items[1].title, "Meal prep");
        assert_eq!(plan.items[1].priority, None);
        assert_eq!(plan.items[2].day, 3);
        assert_eq!(plan.items[2].time, None);
        assert_eq!(plan.items[2].title, "Read");
        assert_eq!(plan.items[2].category, None);
    }

    #[test]
    fn parses_wrapped_and_grouped_json() {
        let wrapped = r#"{"title": "Launch", "tasks": [{"day": 1, "title": "Ship"}]}"#;
        let plan = Plan::parse(wrapped).unwrap();
        assert_eq!(plan.name.as_deref(), Some("Launch"));
        assert_eq!(plan.items[0].title, "Ship");

        let grouped = r#"{"name": "Trip", "days": [
            {"day": "Day 1", "tasks": [{"time": "08:00", "title": "Pack"}]},
            {"day": 2, "items": [{"title": "Fly"}, {"day": 3, "title": "Hike"}]}
        ]}"#;
        let plan = Plan::parse(grouped).unwrap();
        let days: Vec<u32> = plan.items.iter().map(|item| item.day).collect();
        assert_eq!(days, vec![1, 2, 3]);
        assert_eq!(plan.items[0].time, Some(hm(8, 0)));
    }

    #[test]
    fn json_errors_name_the_item() {
        let missing_title = r#"[{"day": 1, "title": "ok"}, {"day": 2}]"#;
        let err = Plan::parse(missing_title).unwrap_err();
        assert!(format!("{err:#}").contains("plan item 2"));
        assert!(format!("{err:#}").contains("title is required"));

        let bad_day = r#"[{"day": "Someday", "title": "x"}]"#;
        assert!(format!("{:#}", Plan::parse(bad_day).unwrap_err()).contains("invalid day label"));

        let zero_day = r#"[{"day": 0, "title": "x"}]"#;
        assert!(Plan::parse(zero_day).is_err());

        assert!(Plan::parse("[]").unwrap_err().to_string().contains("no items"));
        assert!(Plan::parse(r#"{"foo": []}"#).is_err());
    }

    #[test]
    fn parses_text_plan() {
        let raw = "# Workout week\n\
                   Day 1\n\
                   - 07:30 Run 5k !high @fitness\n\
                   - Morning pages\n\
                   \n\
                   Day 2:\n\
                   * 6:15 pm Meal prep @home\n\
                   * Email Sam !soon\n";
        let plan = Plan::parse(raw).unwrap();
        assert_eq!(plan.name.as_deref(), Some("Workout week"));
        assert_eq!(plan.items.len(), 4);

        assert_eq!(plan.items[0].time, Some(hm(7, 30)));
        assert_eq!(plan.items[0].title, "Run 5k");
        assert_eq!(plan.items[0].priority, Some(Priority::High));
        assert_eq!(plan.items[0].category.as_deref(), Some("fitness"));

        assert_eq!(plan.items[1].time, None);
        assert_eq!(plan.items[1].title, "Morning pages");

        assert_eq!(plan.items[2].day, 2);
        assert_eq!(plan.items[2].time, Some(hm(18, 15)));
        assert_eq!(plan.items[2].title, "Meal prep");

        assert_eq!(plan.items[3].title, "Email Sam !soon");
    }

    #[test]
    fn text_errors_name_the_line() {
        let orphan = "- 09:00 Too early\nDay 1\n- ok\n";
        let err = Plan::parse(orphan).unwrap_err();
        assert!(err.to_string().contains("line 1"));

        let garbage = "Day 1\nwhatever\n";
        let err = Plan::parse(garbage).unwrap_err();
        assert!(err.to_string().contains("line 2"));

        let empty_item = "Day 1\n- @home\n";
        let err = Plan::parse(empty_item).unwrap_err();
        assert!(format!("{err:#}").contains("no title"));
    }

    #[test]
    fn plan_times() {
        assert_eq!(parse_plan_time("noon").unwrap(), Some(hm(12, 0)));
        assert_eq!(parse_plan_time("14:05:00").unwrap(), Some(hm(14, 5)));
        assert_eq!(parse_plan_time(" ").unwrap(), None);
        assert!(parse_plan_time("soonish").is_err());
    }

    #[test]
    fn dst_gap_item_is_rejected() {
        let plan = Plan {
            name: None,
            items: vec![PlanItem::new(2, "Night shift").at(hm(2, 30))],
        };
        // Day 1 is 2026-03-28, so day 2 is the spring-forward date.
        let now = Utc.with_ymd_and_hms(2026, 3, 28, 12, 0, 0).unwrap();
        let err = resolve(&plan, now, &Berlin, StartPolicy::Auto, None).unwrap_err();
        assert!(err.to_string().contains("Night shift"));
    }

    #[test]
    fn fall_back_item_takes_the_earlier_instant() {
        let plan = Plan {
            name: None,
            items: vec![PlanItem::new(1, "Pack"), PlanItem::new(2, "Early train").at(hm(2, 30))],
        };
        // Day 2 is 2026-10-25, when Berlin repeats 02:00-03:00.
        let now = Utc.with_ymd_and_hms(2026, 10, 24, 12, 0, 0).unwrap();
        let resolved = resolve(&plan, now, &Berlin, StartPolicy::Auto, None).unwrap();
        let train = resolved
            .items
            .iter()
            .find(|r| r.item.title == "Early train")
            .unwrap();
        assert_eq!(train.date, date(2026, 10, 25));
        assert_eq!(train.due, Utc.with_ymd_and_hms(2026, 10, 25, 0, 30, 0).unwrap());
    }

    #[test]
    fn json_priority_never_fails_the_import() {
        let raw = r#"[
            {"day": 1, "title": "Numbered", "priority": 1},
            {"day": 1, "title": "Flagged", "priority": true},
            {"day": 1, "title": "Nulled", "priority": null},
            {"day": 1, "title": "Worded", "priority": "High"}
        ]"#;
        let plan = Plan::parse(raw).unwrap();
        let priorities: Vec<Option<Priority>> = plan.items.iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![None, None, None, Some(Priority::High)]);
    }

    #[test]
    fn json_time_accepts_hour_numbers() {
        let plan = Plan::parse(r#"[{"day": 1, "title": "Standup", "time": 9}]"#).unwrap();
        assert_eq!(plan.items[0].time, Some(hm(9, 0)));

        let err = Plan::parse(r#"[{"day": 1, "title": "x", "time": 25}]"#).unwrap_err();
        assert!(format!("{err:#}").contains("not an hour of the day"));

        let err = Plan::parse(r#"[{"day": 1, "title": "x", "time": [9]}]"#).unwrap_err();
        assert!(format!("{err:#}").contains("time must be a string"));
    }

    #[test]
    fn byte_order_mark_is_ignored() {
        let json = "\u{feff}[{\"day\": 1, \"title\": \"Read\"}]";
        assert_eq!(Plan::parse(json).unwrap().items[0].title, "Read");

        let text = "\u{feff}Day 1\n- Read\n";
        assert_eq!(Plan::parse(text).unwrap().items[0].title, "Read");
    }

    #[test]
    fn into_tasks_numbers_consecutively_and_tags_plan() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 4, 0, 0).unwrap();
        let mut plan = workout_plan();
        plan.items[0].priority = Some(Priority::High);
        plan.items[0].category = Some("fitness".to_string());
        let resolved = resolve(&plan, now, &Berlin, StartPolicy::Auto, None).unwrap();
        let tasks = resolved.into_tasks(now, 7);

        let ids: Vec<Option<u64>> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![Some(7), Some(8), Some(9), Some(10), Some(11)]);
        assert!(tasks.iter().all(|t| t.plan.as_deref() == Some("Workout week")));
        assert_eq!(tasks[0].priority, Some(Priority::High));
        assert_eq!(tasks[0].category.as_deref(), Some("fitness"));
        assert_eq!(tasks[0].due, Some(resolved.items[0].due));
    }
}
