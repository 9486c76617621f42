use std::collections::BTreeMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::NaiveTime;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::plan::StartPolicy;

const RC_ENV_VAR: &str = "DAYPLANRC";
const RC_FILE_NAME: &str = ".dayplanrc";
const DEFAULT_DATA_DIR: &str = ".dayplan";

#[derive(Debug, Clone)]
pub struct Config {
  map:              BTreeMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = BTreeMap::new();
    for (key, value) in [
      ("data.location", "~/.dayplan"),
      ("default.command", "list"),
      ("color", "on"),
      ("plan.start", "auto"),
      ("agenda.days", "7")
    ] {
      map.insert(key.to_string(), value.to_string());
    }
    Self { map, loaded_files: vec![] }
  }
}

impl Config {
  #[tracing::instrument(skip(rc_override))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    if let Some(path) =
      resolve_rc_path(rc_override)?
    {
      info!(rcfile = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      debug!("no rc file found; using defaults");
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(self, overrides))]
  pub fn apply_overrides<I>(&mut self, overrides: I)
  where
    I: IntoIterator<Item = (String, String)>
  {
    for (k, v) in overrides {
      let key =
        k.strip_prefix("rc.").unwrap_or(&k).to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn set(&mut self, key: &str, value: &str) {
    self
      .map
      .insert(key.to_string(), value.to_string());
  }

  pub fn get(&self, key: &str) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(&self, key: &str) -> Option<bool> {
    self.map.get(key).map(|v| parse_bool(v))
  }

  pub fn get_u32(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u32>> {
    self
      .map
      .get(key)
      .map(|v| {
        v.trim().parse::<u32>().with_context(|| {
          format!("{key} must be a whole number, got '{v}'")
        })
      })
      .transpose()
  }

  pub fn plan_start(
    &self
  ) -> anyhow::Result<StartPolicy> {
    match self.map.get("plan.start") {
      | Some(raw) => raw
        .parse()
        .with_context(|| "invalid plan.start setting"),
      | None => Ok(StartPolicy::Auto)
    }
  }

  pub fn plan_default_time(
    &self
  ) -> anyhow::Result<Option<NaiveTime>> {
    let Some(raw) = self.map.get("plan.default.time")
    else {
      return Ok(None);
    };
    if raw.trim().is_empty() {
      return Ok(None);
    }
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
      .map(Some)
      .with_context(|| {
        format!(
          "plan.default.time must be HH:MM, got '{raw}'"
        )
      })
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)> {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    if self.loaded_files.contains(&path) {
      return Err(anyhow!(
        "include cycle detected at {}",
        path.display()
      ));
    }

    let text =
      fs::read_to_string(&path).with_context(|| {
        format!("failed to read {}", path.display())
      })?;

    self.loaded_files.push(path.clone());

    let base_dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));

    for (line_num, raw_line) in text.lines().enumerate()
    {
      let line = match raw_line.split_once('#') {
        | Some((before, _)) => before.trim(),
        | None => raw_line.trim()
      };
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path = resolve_include_path(
          &base_dir,
          include_rest.trim()
        )?;
        debug!(
          file = %path.display(),
          include = %include_path.display(),
          line = line_num + 1,
          "processing include"
        );

        if include_path.exists() {
          self.load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) =
        line.split_once('=').ok_or_else(|| {
          anyhow!(
            "invalid config line {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) = override_dir {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir).with_context(|| {
      format!("failed to create {}", dir.display())
    })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(override_path))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) = std::env::var(RC_ENV_VAR) {
    if rc_env == "/dev/null" || rc_env.trim().is_empty()
    {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(rc_env)));
  }

  let Some(home) = dirs::home_dir() else {
    warn!("cannot determine home directory; skipping rc file");
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
  let home = dirs::home_dir().ok_or_else(|| {
    anyhow!("cannot determine home directory")
  })?;
  Ok(home.join(DEFAULT_DATA_DIR))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded = expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(path: &Path) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) = text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim().to_ascii_lowercase().as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use chrono::NaiveTime;
  use tempfile::tempdir;

  use super::Config;
  use crate::plan::StartPolicy;

  #[test]
  fn rc_file_with_include_and_comments() {
    let dir = tempdir().unwrap();
    let shared = dir.path().join("shared.rc");
    fs::write(
      &shared,
      "plan.default.time = 08:30\n"
    )
    .unwrap();
    let main = dir.path().join("main.rc");
    fs::write(
      &main,
      "# personal settings\n\
       color = off   # no ansi\n\
       include shared.rc\n\
       agenda.days=14\n"
    )
    .unwrap();

    let cfg = Config::load(Some(&main)).unwrap();
    assert_eq!(cfg.get_bool("color"), Some(false));
    assert_eq!(cfg.get_u32("agenda.days").unwrap(), Some(14));
    assert_eq!(
      cfg.plan_default_time().unwrap(),
      NaiveTime::from_hms_opt(8, 30, 0)
    );
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(cfg.get("default.command").as_deref(), Some("list"));
  }

  #[test]
  fn overrides_strip_rc_prefix() {
    let mut cfg = Config::default();
    cfg.apply_overrides([
      ("rc.plan.start".to_string(), "tomorrow".to_string()),
      ("agenda.days".to_string(), "soon".to_string())
    ]);
    assert_eq!(cfg.plan_start().unwrap(), StartPolicy::Tomorrow);
    assert!(cfg.get_u32("agenda.days").is_err());
  }

  #[test]
  fn rejects_lines_without_equals() {
    let dir = tempdir().unwrap();
    let rc = dir.path().join("bad.rc");
    fs::write(&rc, "color on\n").unwrap();
    let err = Config::load(Some(&rc)).unwrap_err();
    assert!(err.to_string().contains("bad.rc:1"));
  }

  #[test]
  fn include_cycles_are_errors() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.rc");
    let b = dir.path().join("b.rc");
    fs::write(&a, "include b.rc\n").unwrap();
    fs::write(&b, "include a.rc\n").unwrap();
    assert!(Config::load(Some(&a)).is_err());
  }
}
