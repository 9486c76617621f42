use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  Months,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "dayplan-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "DAYPLAN_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "DAYPLAN_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str =
  "UTC";

pub const STORED_COMPACT_FORMAT: &str =
  "%Y%m%dT%H%M%SZ";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

pub fn project_timezone() -> &'static Tz {
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ
    .get_or_init(resolve_project_timezone)
}

#[must_use]
pub fn to_project_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(project_timezone())
    .date_naive()
}

#[must_use]
pub fn format_project_datetime(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(project_timezone())
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) = timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    "DEFAULT_PROJECT_TIMEZONE"
  )
  .unwrap_or(chrono_tz::UTC)
}

fn timezone_config_path() -> Option<PathBuf>
{
  if let Ok(raw) =
    std::env::var(TIMEZONE_CONFIG_ENV_VAR)
  {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(trimmed));
    }
  }

  std::env::current_dir()
    .ok()
    .map(|dir| dir.join(TIMEZONE_CONFIG_FILE))
}

fn load_timezone_from_file(
  path: &Path
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(path) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let timezone = match parse_timezone_config(
    &raw
  ) {
    | Ok(timezone) => timezone,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone_config(
  raw: &str
) -> anyhow::Result<Option<String>> {
  let parsed =
    toml::from_str::<TimezoneConfig>(raw)
      .context("invalid timezone toml")?;
  Ok(parsed.timezone.or_else(|| {
    parsed
      .time
      .and_then(|section| section.timezone)
  }))
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Maps a wall-clock time in `tz` to UTC.
///
/// Ambiguous times (DST fall-back) resolve to the earliest instant;
/// times inside a DST gap are rejected.
pub fn local_to_utc(
  tz: &Tz,
  local_naive: NaiveDateTime,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz.from_local_datetime(&local_naive) {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime {local_naive} does \
         not exist in timezone {}: {context}",
        tz.name()
      ))
    }
  }
}

fn local_midnight(
  tz: &Tz,
  date: NaiveDate,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  local_to_utc(
    tz,
    date.and_time(NaiveTime::MIN),
    context
  )
}

fn local_end_of_day(
  tz: &Tz,
  date: NaiveDate,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  let end = date
    .and_hms_opt(23, 59, 59)
    .ok_or_else(|| {
      anyhow!("failed to construct end of day")
    })?;
  local_to_utc(tz, end, context)
}

#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  parse_date_expr_in(
    input,
    now,
    project_timezone()
  )
}

pub fn parse_date_expr_in(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower = token.to_ascii_lowercase();
  let local_now = now.with_timezone(tz);
  let local_today = local_now.date_naive();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return local_midnight(
        tz,
        local_today,
        "today"
      );
    }
    | "tomorrow" => {
      return local_midnight(
        tz,
        local_today + Duration::days(1),
        "tomorrow"
      );
    }
    | "yesterday" => {
      return local_midnight(
        tz,
        local_today - Duration::days(1),
        "yesterday"
      );
    }
    | "eod" => {
      return local_end_of_day(
        tz,
        local_today,
        "eod"
      );
    }
    | "eow" => {
      let days_to_sunday = 6
        - i64::from(
          local_today
            .weekday()
            .num_days_from_monday()
        );
      return local_end_of_day(
        tz,
        local_today
          + Duration::days(days_to_sunday),
        "eow"
      );
    }
    | "eom" => {
      let first = local_today
        .with_day(1)
        .ok_or_else(|| {
          anyhow!("failed to find month start")
        })?;
      let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(|| {
          anyhow!("failed to find month end")
        })?;
      return local_end_of_day(tz, last, "eom");
    }
    | _ => {}
  }

  if token.len() == 4
    && token.chars().all(|c| c.is_ascii_digit())
  {
    let year: i32 = token
      .parse()
      .context("invalid 4-digit year")?;
    let date = NaiveDate::from_ymd_opt(year, 1, 1)
      .ok_or_else(|| {
        anyhow!("invalid year value: {year}")
      })?;
    return local_midnight(
      tz,
      date,
      "year-4digit"
    );
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    let target_date = next_weekday_date(
      local_today,
      target_weekday
    );
    return local_midnight(
      tz,
      target_date,
      "weekday-name"
    );
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let time =
      NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| {
          anyhow!("invalid clock time: {token}")
        })?;
    let mut day = local_today;
    if day.and_time(time)
      <= local_now.naive_local()
    {
      day = day
        .succ_opt()
        .ok_or_else(|| {
          anyhow!("failed to advance to next day")
        })?;
    }
    return local_to_utc(
      tz,
      day.and_time(time),
      "clock-time"
    );
  }

  if let Some(target_month) =
    parse_month_name(&lower)
  {
    let mut year = local_today.year();
    let this_year =
      NaiveDate::from_ymd_opt(year, target_month, 1)
        .ok_or_else(|| {
          anyhow!(
            "invalid month value: {target_month}"
          )
        })?;
    if this_year.and_time(NaiveTime::MIN)
      <= local_now.naive_local()
    {
      year = year.saturating_add(1);
    }
    let candidate =
      NaiveDate::from_ymd_opt(year, target_month, 1)
        .ok_or_else(|| {
          anyhow!("invalid month/year candidate")
        })?;
    return local_midnight(
      tz,
      candidate,
      "month-name"
    );
  }

  let rel_re = relative_regex().ok_or_else(|| {
    anyhow!("internal regex compile failure")
  })?;
  if let Some(caps) = rel_re.captures(token) {
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative amount")
      })?
      .parse()
      .context("invalid relative number")?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let duration = match unit {
      | "w" => Duration::weeks(num),
      | "d" => Duration::days(num),
      | "h" => Duration::hours(num),
      | "m" => Duration::minutes(num),
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: {unit}"
        ));
      }
    };

    let negative = caps
      .name("sign")
      .is_some_and(|m| m.as_str() == "-");
    return Ok(if negative {
      now - duration
    } else {
      now + duration
    });
  }

  if let Ok(stored) =
    parse_stored_timestamp(token)
  {
    return Ok(stored);
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(token, "%Y-%m-%d")
  {
    return local_midnight(tz, date, "date");
  }

  for fmt in ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(token, fmt)
    {
      return local_to_utc(tz, ndt, fmt);
    }
  }

  Err(anyhow!(
    "unrecognized date expression: {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     eod/eow/eom, 4-digit year, weekday \
     names (e.g. monday), month names \
     (e.g. march), clock times (e.g. \
     3:23pm or 15:23), +Nw/+Nd/+Nh/+Nm, \
     RFC3339, YYYY-MM-DD, \
     YYYY-MM-DDTHH:MM, YYYY-MM-DD HH:MM"
  })
}

/// Parses the two timestamp encodings found in task files.
pub fn parse_stored_timestamp(
  raw: &str
) -> anyhow::Result<DateTime<Utc>> {
  if let Ok(dt) =
    DateTime::parse_from_rfc3339(raw)
  {
    return Ok(dt.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(
    raw,
    STORED_COMPACT_FORMAT
  )
  .map(|ndt| {
    DateTime::<Utc>::from_naive_utc_and_offset(
      ndt, Utc
    )
  })
  .with_context(|| {
    format!("invalid timestamp: {raw}")
  })
}

fn relative_regex() -> Option<&'static Regex> {
  static RELATIVE_RE: OnceLock<Option<Regex>> =
    OnceLock::new();
  RELATIVE_RE
    .get_or_init(|| {
      Regex::new(
        r"^(?P<sign>[+-])?(?P<num>\d+)(?P<unit>[wdhm])$"
      )
      .ok()
    })
    .as_ref()
}

fn clock_regex() -> Option<&'static Regex> {
  static CLOCK_RE: OnceLock<Option<Regex>> =
    OnceLock::new();
  CLOCK_RE
    .get_or_init(|| {
      Regex::new(
        r"(?i)^(?P<hour>\d{1,2})(?::(?P<minute>\d{2}))?\s*(?P<ampm>[ap]m)?$"
      )
      .ok()
    })
    .as_ref()
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => Some(Weekday::Mon),
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => Some(Weekday::Fri),
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => Some(Weekday::Sun),
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx =
    i64::from(from.weekday().num_days_from_monday());
  let target_idx =
    i64::from(target.num_days_from_monday());
  let mut delta = (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(delta))
    .unwrap_or(from)
}

/// Parses `15:23`, `3:23pm`, `9am` into `(hour, minute)`.
///
/// A bare number without `am`/`pm` is not a clock time.
pub fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let captures =
    clock_regex()?.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = match captures.name("minute") {
    | Some(m) => m.as_str().parse::<u32>().ok()?,
    | None => {
      captures.name("ampm")?;
      0
    }
  };
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm_match
      .as_str()
      .to_ascii_lowercase()
      .as_str()
    {
      | "am" => {
        if raw_hour == 12 { 0 } else { raw_hour }
      }
      | "pm" => {
        if raw_hour == 12 {
          12
        } else {
          raw_hour + 12
        }
      }
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

fn parse_month_name(token: &str) -> Option<u32> {
  match token.trim() {
    | "january" | "jan" => Some(1),
    | "february" | "feb" => Some(2),
    | "march" | "mar" => Some(3),
    | "april" | "apr" => Some(4),
    | "may" => Some(5),
    | "june" | "jun" => Some(6),
    | "july" | "jul" => Some(7),
    | "august" | "aug" => Some(8),
    | "september" | "sep" | "sept" => Some(9),
    | "october" | "oct" => Some(10),
    | "november" | "nov" => Some(11),
    | "december" | "dec" => Some(12),
    | _ => None
  }
}


pub mod iso_date_serde {
  use chrono::{
    DateTime,
    SecondsFormat,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &dt.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(deserializer)?;
    super::parse_stored_timestamp(&raw)
      .map_err(serde::de::Error::custom)
  }

  pub mod option {
    use chrono::{
      DateTime,
      Utc
    };
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          super::serialize(value, serializer)
        }
        | None => serializer.serialize_none()
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<Option<DateTime<Utc>>, D::Error>
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(deserializer)?;
      match opt {
        | Some(raw) if raw.trim().is_empty() => {
          Ok(None)
        }
        | Some(raw) => {
          crate::datetime::parse_stored_timestamp(
            &raw
          )
          .map(Some)
          .map_err(serde::de::Error::custom)
        }
        | None => Ok(None)
      }
    }
  }
}
