use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{STORED_COMPACT_FORMAT, project_timezone};
use crate::plan::ResolvedPlan;
use crate::task::{Priority, Task};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

/// One heading of the agenda view and the tasks under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgendaGroup {
    Overdue,
    Day(NaiveDate),
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        let color = cfg.get_bool("color").unwrap_or(true) && io::stdout().is_terminal();
        Self {
            color,
            tz: *project_timezone(),
        }
    }

    pub fn plain(tz: Tz) -> Self {
        Self { color: false, tz }
    }

    #[tracing::instrument(skip(self, tasks, now), fields(count = tasks.len()))]
    pub fn print_task_table(&self, tasks: &[Task], now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_task_table(&mut out, tasks, now)
    }

    pub fn write_task_table<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No matching tasks.")?;
            return Ok(());
        }

        let headers = ["ID", "Due", "Pri", "Category", "Title", "Recur"];
        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(&display_id(task), "33"),
                    self.due_cell(task, now, "%Y-%m-%d %H:%M"),
                    self.priority_cell(task.priority),
                    task.category.clone().unwrap_or_default(),
                    task.title.clone(),
                    task.recur
                        .as_ref()
                        .map(|recur| recur.short_code())
                        .unwrap_or_default(),
                ]
            })
            .collect();

        write_table(out, &headers, rows)?;
        writeln!(out)?;
        writeln!(out, "{} task(s)", tasks.len())?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_task_info(&mut out, task)
    }

    pub fn write_task_info<W: Write>(&self, out: &mut W, task: &Task) -> anyhow::Result<()> {
        writeln!(out, "id          {}", display_id(task))?;
        writeln!(out, "uuid        {}", task.uuid)?;
        writeln!(out, "status      {}", task.status.as_str())?;
        writeln!(out, "title       {}", task.title)?;
        if let Some(description) = &task.description {
            writeln!(out, "description {description}")?;
        }
        if let Some(category) = &task.category {
            writeln!(out, "category    {category}")?;
        }
        if let Some(priority) = task.priority {
            writeln!(out, "priority    {priority}")?;
        }
        if let Some(due) = task.due {
            writeln!(
                out,
                "due         {}",
                due.with_timezone(&self.tz).format("%Y-%m-%d %H:%M %Z")
            )?;
        }
        if let Some(recur) = &task.recur {
            writeln!(out, "recur       {recur}")?;
        }
        if let Some(parent) = task.parent {
            writeln!(out, "parent      {parent}")?;
        }
        if let Some(plan) = &task.plan {
            writeln!(out, "plan        {plan}")?;
        }
        writeln!(out, "entry       {}", task.entry.format(STORED_COMPACT_FORMAT))?;
        writeln!(out, "modified    {}", task.modified.format(STORED_COMPACT_FORMAT))?;
        if let Some(end) = task.end {
            writeln!(out, "end         {}", end.format(STORED_COMPACT_FORMAT))?;
        }
        for (key, value) in &task.extra {
            writeln!(out, "{key:<11} {value}")?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, plan), fields(items = plan.items.len()))]
    pub fn print_plan_preview(&self, plan: &ResolvedPlan) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_plan_preview(&mut out, plan)
    }

    pub fn write_plan_preview<W: Write>(
        &self,
        out: &mut W,
        plan: &ResolvedPlan,
    ) -> anyhow::Result<()> {
        let name = plan.name.as_deref().unwrap_or("(unnamed plan)");
        let when = if plan.starts_tomorrow {
            "starts tomorrow"
        } else {
            "starts today"
        };
        writeln!(
            out,
            "{} {} {}, ends {}",
            self.paint(name, "1"),
            when,
            plan.start.format("%Y-%m-%d"),
            plan.end().format("%Y-%m-%d")
        )?;
        writeln!(out)?;

        let headers = ["Day", "Date", "Time", "Pri", "Category", "Title"];
        let rows = plan
            .items
            .iter()
            .map(|resolved| {
                let time = match resolved.item.time {
                    Some(_) => resolved
                        .due
                        .with_timezone(&self.tz)
                        .format("%H:%M")
                        .to_string(),
                    None => "-".to_string(),
                };
                vec![
                    resolved.item.day.to_string(),
                    resolved.date.format("%a %Y-%m-%d").to_string(),
                    time,
                    self.priority_cell(resolved.item.priority),
                    resolved.item.category.clone().unwrap_or_default(),
                    resolved.item.title.clone(),
                ]
            })
            .collect();

        write_table(out, &headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, tasks, now))]
    pub fn print_agenda(&self, tasks: &[Task], now: DateTime<Utc>, days: u32) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_agenda(&mut out, tasks, now, days)
    }

    pub fn write_agenda<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        now: DateTime<Utc>,
        days: u32,
    ) -> anyhow::Result<()> {
        let groups = build_agenda(tasks, now, &self.tz, days);
        if groups.is_empty() {
            writeln!(out, "Nothing scheduled for the next {days} day(s).")?;
            return Ok(());
        }

        let today = now.with_timezone(&self.tz).date_naive();
        for (idx, (group, rows)) in groups.iter().enumerate() {
            if idx > 0 {
                writeln!(out)?;
            }
            let heading = match group {
                AgendaGroup::Overdue => self.paint("Overdue", "31"),
                AgendaGroup::Day(date) if *date == today => {
                    self.paint(&format!("{} (today)", date.format("%a %Y-%m-%d")), "1")
                }
                AgendaGroup::Day(date) => date.format("%a %Y-%m-%d").to_string(),
            };
            writeln!(out, "{heading}")?;

            for task in rows {
                let when = match group {
                    AgendaGroup::Overdue => self.due_cell(task, now, "%m-%d %H:%M"),
                    AgendaGroup::Day(_) => self.due_cell(task, now, "%H:%M"),
                };
                let mut line = format!("  {when}  {}", task.title);
                if let Some(category) = &task.category {
                    line.push_str(&format!(" @{category}"));
                }
                if let Some(priority) = task.priority {
                    line.push_str(&format!(" !{priority}"));
                }
                writeln!(out, "{line}  [{}]", display_id(task))?;
            }
        }
        Ok(())
    }

    fn due_cell(&self, task: &Task, now: DateTime<Utc>, fmt: &str) -> String {
        let Some(due) = task.due else {
            return String::new();
        };
        let text = due.with_timezone(&self.tz).format(fmt).to_string();
        if task.is_overdue(now) {
            self.paint(&text, "31")
        } else {
            text
        }
    }

    fn priority_cell(&self, priority: Option<Priority>) -> String {
        match priority {
            Some(Priority::High) => self.paint("H", "31"),
            Some(Priority::Medium) => self.paint("M", "33"),
            Some(Priority::Low) => "L".to_string(),
            None => String::new(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Open dated tasks due before the end of the `days`-day window, grouped by
/// local due date. Tasks from earlier days come first under `Overdue`.
pub fn build_agenda<'a>(
    tasks: &'a [Task],
    now: DateTime<Utc>,
    tz: &Tz,
    days: u32,
) -> Vec<(AgendaGroup, Vec<&'a Task>)> {
    let today = now.with_timezone(tz).date_naive();
    let window_end = today
        .checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX);

    let mut dated: Vec<(NaiveDate, &Task)> = tasks
        .iter()
        .filter(|task| task.is_open())
        .filter_map(|task| {
            let due = task.due?;
            Some((due.with_timezone(tz).date_naive(), task))
        })
        .filter(|(date, _)| *date < window_end)
        .collect();
    dated.sort_by_key(|(_, task)| (task.due, task.id));

    let mut groups: Vec<(AgendaGroup, Vec<&Task>)> = Vec::new();
    for (date, task) in dated {
        let group = if date < today {
            AgendaGroup::Overdue
        } else {
            AgendaGroup::Day(date)
        };
        if let Some((last, rows)) = groups.last_mut()
            && *last == group
        {
            rows.push(task);
            continue;
        }
        groups.push((group, vec![task]));
    }
    groups
}

fn display_id(task: &Task) -> String {
    task.id
        .map(|value| value.to_string())
        .unwrap_or_else(|| task.short_uuid())
}

fn write_table<W: Write>(
    writer: &mut W,
    headers: &[&str],
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(*header))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(header, &width)| format!("{header:width$}"))
        .collect();
    writeln!(writer, "{}", header_line.join(" ").trim_end())?;

    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        let mut line = String::new();
        for (idx, (cell, width)) in row.iter().zip(&widths).enumerate() {
            if idx > 0 {
                line.push(' ');
            }
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            line.push_str(cell);
            line.push_str(&" ".repeat(width.saturating_sub(visible_width)));
        }
        writeln!(writer, "{}", line.trim_end())?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use chrono_tz::Europe::Berlin;

    use super::{AgendaGroup, Renderer, build_agenda, strip_ansi, write_table};
    use crate::config::Config;
    use crate::plan::{Plan, PlanItem, StartPolicy, resolve};
    use crate::task::{Priority, Status, Task};

    fn task_due(id: u64, title: &str, due: chrono::DateTime<Utc>) -> Task {
        let now = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let mut task = Task::new_pending(title.to_string(), now, id);
        task.due = Some(due);
        task
    }

    #[test]
    fn color_setting_uses_config_booleans() {
        let mut cfg = Config::default();
        for off in ["off", "no", "0", "false", "whatever"] {
            cfg.set("color", off);
            assert!(!Renderer::new(&cfg).color, "{off} should disable color");
        }
    }

    #[test]
    fn table_columns_align_on_display_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            &["ID", "Title"],
            vec![
                vec!["1".to_string(), "Café".to_string()],
                vec!["12".to_string(), "\x1b[31m日本\x1b[0m".to_string()],
            ],
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID Title");
        assert_eq!(lines[1], "-- -----");
        assert_eq!(lines[2], "1  Café");
        assert_eq!(strip_ansi(lines[3]), "12 日本");
    }

    #[test]
    fn agenda_groups_overdue_then_days_in_window() {
        // 2026-10-14 10:00 in Berlin.
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 8, 0, 0).unwrap();
        let tasks = vec![
            task_due(1, "Pay rent", Utc.with_ymd_and_hms(2026, 10, 10, 9, 0, 0).unwrap()),
            task_due(2, "Standup", Utc.with_ymd_and_hms(2026, 10, 14, 7, 0, 0).unwrap()),
            task_due(3, "Dentist", Utc.with_ymd_and_hms(2026, 10, 15, 13, 0, 0).unwrap()),
            task_due(4, "Far away", Utc.with_ymd_and_hms(2026, 10, 30, 9, 0, 0).unwrap()),
        ];
        let mut done = task_due(5, "Old", Utc.with_ymd_and_hms(2026, 10, 9, 9, 0, 0).unwrap());
        done.status = Status::Completed;
        let mut all = tasks;
        all.push(done);
        all.push(Task::new_pending("Someday".to_string(), now, 6));

        let groups = build_agenda(&all, now, &Berlin, 7);
        let shape: Vec<(AgendaGroup, Vec<u64>)> = groups
            .iter()
            .map(|(group, rows)| (group.clone(), rows.iter().filter_map(|t| t.id).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (AgendaGroup::Overdue, vec![1]),
                (AgendaGroup::Day(NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()), vec![2]),
                (AgendaGroup::Day(NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()), vec![3]),
            ]
        );
    }

    #[test]
    fn plan_preview_reports_tomorrow_start() {
        // 20:00 in Berlin, the 07:00 item has passed.
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 18, 0, 0).unwrap();
        let mut run = PlanItem::new(1, "Run").at(chrono::NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        run.priority = Some(Priority::High);
        let plan = Plan {
            name: Some("Reset week".to_string()),
            items: vec![run, PlanItem::new(2, "Rest")],
        };
        let resolved = resolve(&plan, now, &Berlin, StartPolicy::Auto, None).unwrap();

        let mut buf = Vec::new();
        Renderer::plain(Berlin).write_plan_preview(&mut buf, &resolved).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("Reset week starts tomorrow 2026-10-15, ends 2026-10-16"));
        assert!(text.contains("1   Thu 2026-10-15 07:00 H"));
        assert!(text.contains("2   Fri 2026-10-16 -"));
    }

    #[test]
    fn info_shows_recurrence_and_local_due() {
        let due = Utc.with_ymd_and_hms(2026, 10, 14, 7, 30, 0).unwrap();
        let mut task = task_due(4, "Water plants", due);
        task.recur = Some(crate::recur::Recurrence::new(crate::recur::RecurKind::Weekly, 2));

        let mut buf = Vec::new();
        Renderer::plain(Berlin).write_task_info(&mut buf, &task).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("due         2026-10-14 09:30 CEST"));
        assert!(text.contains("recur       every 2 weeks"));
    }
}
