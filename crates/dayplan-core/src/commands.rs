use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cli::Invocation;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::{format_project_datetime, parse_date_expr_in, project_timezone};
use crate::filter::Filter;
use crate::plan::{Plan, ResolvedPlan, StartPolicy, resolve};
use crate::recur::{Recurrence, spawn_next};
use crate::render::Renderer;
use crate::task::{Priority, Status, Task};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "list",
        "agenda",
        "info",
        "modify",
        "done",
        "delete",
        "undo",
        "export",
        "import",
        "plan",
        "categories",
        "purge",
        "_commands",
        "_show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }
    if token.is_empty() {
        return None;
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &mut DataStore,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let tz = project_timezone();
    let command = inv.command.as_str();

    debug!(
        command,
        filter = ?inv.filter_terms,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "add" => cmd_add(store, &inv.command_args, now, tz),
        "list" => cmd_list(store, renderer, &inv.filter_terms, now),
        "agenda" => cmd_agenda(store, cfg, renderer, &inv.filter_terms, &inv.command_args, now),
        "info" => cmd_info(store, renderer, &inv.filter_terms, now),
        "modify" => cmd_modify(store, &inv.filter_terms, &inv.command_args, now, tz),
        "done" => cmd_done(store, &inv.filter_terms, now, tz),
        "delete" => cmd_delete(store, &inv.filter_terms, now),
        "undo" => cmd_undo(store),
        "export" => cmd_export(store, &inv.filter_terms, now),
        "import" => cmd_import(store, now),
        "plan" => cmd_plan(store, cfg, renderer, &inv.command_args, now, tz),
        "categories" => cmd_categories(store),
        "purge" => cmd_purge(store),
        "_commands" => cmd_commands(),
        "_show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(store, args, now, tz))]
fn cmd_add(
    store: &mut DataStore,
    args: &[String],
    now: DateTime<Utc>,
    tz: &Tz,
) -> anyhow::Result<()> {
    info!("command add");

    let pending = store.load_pending()?;
    let completed = store.load_completed()?;
    let pending_before = pending.clone();

    let next_id = store.next_id(&pending);
    let (title, mods) = parse_title_and_mods(args, now, tz)?;
    let mut task = Task::new_pending(title, now, next_id);
    apply_mods(&mut task, &mods)?;

    store.push_undo_snapshot(&pending_before, &completed)?;
    let pending = store.add_task(pending, task.clone())?;

    debug!(pending_count = pending.len(), "task added");
    match (&task.recur, task.due) {
        (Some(recur), Some(due)) => println!(
            "Created task {next_id}, due {}, repeating {recur}.",
            format_project_datetime(due)
        ),
        (Some(recur), None) => println!("Created task {next_id}, repeating {recur}."),
        (None, Some(due)) => {
            println!("Created task {next_id}, due {}.", format_project_datetime(due))
        }
        (None, None) => println!("Created task {next_id}."),
    }
    Ok(())
}

#[instrument(skip(store, renderer, filter_terms, now))]
fn cmd_list(
    store: &mut DataStore,
    renderer: &Renderer,
    filter_terms: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command list");

    let filter = Filter::parse(filter_terms, now)?;
    let pending = store.load_pending()?;
    let completed = store.load_completed()?;

    let mut rows: Vec<Task> = pending
        .into_iter()
        .chain(completed)
        .filter(|task| filter.matches(task, now))
        .collect();

    sort_by_due(&mut rows);
    renderer.print_task_table(&rows, now)
}

/// Dated tasks first, earliest due first; undated tasks last.
fn sort_by_due(rows: &mut [Task]) {
    rows.sort_by_key(|task| (task.due.is_none(), task.due, task.id));
}

#[instrument(skip(store, cfg, renderer, filter_terms, args, now))]
fn cmd_agenda(
    store: &mut DataStore,
    cfg: &Config,
    renderer: &Renderer,
    filter_terms: &[String],
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command agenda");

    let days = match args {
        [] => cfg.get_u32("agenda.days")?.unwrap_or(7),
        [days] => days
            .parse::<u32>()
            .with_context(|| format!("agenda: expected a number of days, got '{days}'"))?,
        _ => return Err(anyhow!("agenda takes at most one argument (number of days)")),
    };
    if days == 0 {
        return Err(anyhow!("agenda: number of days must be at least 1"));
    }

    let filter = Filter::parse(filter_terms, now)?;
    let rows: Vec<Task> = store
        .load_pending()?
        .into_iter()
        .filter(|task| filter.matches(task, now))
        .collect();

    renderer.print_agenda(&rows, now, days)
}

#[instrument(skip(store, renderer, filter_terms, now))]
fn cmd_info(
    store: &mut DataStore,
    renderer: &Renderer,
    filter_terms: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command info");

    let pending = store.load_pending()?;
    let completed = store.load_completed()?;
    let filter = Filter::parse(filter_terms, now)?;

    let mut rows: Vec<Task> = pending
        .into_iter()
        .chain(completed)
        .filter(|task| filter.matches(task, now))
        .collect();

    rows.sort_by_key(|task| task.id.unwrap_or(u64::MAX));

    if rows.is_empty() {
        return Err(anyhow!("no matching tasks"));
    }

    for (idx, task) in rows.iter().enumerate() {
        if idx > 0 {
            println!();
        }
        renderer.print_task_info(task)?;
    }

    Ok(())
}

#[instrument(skip(store, filter_terms, args, now, tz))]
fn cmd_modify(
    store: &mut DataStore,
    filter_terms: &[String],
    args: &[String],
    now: DateTime<Utc>,
    tz: &Tz,
) -> anyhow::Result<()> {
    info!("command modify");

    let filter = require_filter("modify", filter_terms, now)?;
    let mods = parse_mods(args, now, tz)?;
    if mods.is_empty() {
        return Err(anyhow!("modify: nothing to change"));
    }

    let changed = modify_tasks(store, &filter, &mods, now)?;
    println!("Modified {changed} task(s).");
    Ok(())
}

/// Applies `mods` to every task matching `filter`. Saves and records one undo
/// step when anything matched.
#[instrument(skip(store, filter, mods, now))]
fn modify_tasks(store: &DataStore, filter: &Filter, mods: &[Mod], now: DateTime<Utc>) -> anyhow::Result<u64> {
    let mut pending = store.load_pending()?;
    let mut completed = store.load_completed()?;
    let pending_before = pending.clone();
    let completed_before = completed.clone();

    let mut changed = 0_u64;
    for task in pending.iter_mut().chain(completed.iter_mut()) {
        if filter.matches(task, now) {
            apply_mods(task, mods)
                .with_context(|| format!("cannot modify task '{}'", task.title))?;
            task.modified = now;
            changed += 1;
        }
    }

    if changed > 0 {
        store.push_undo_snapshot(&pending_before, &completed_before)?;
        store.save_pending(&pending)?;
        store.save_completed(&completed)?;
    }
    info!(changed, "modified tasks");
    Ok(changed)
}

/// Outcome of completing a set of tasks.
#[derive(Debug, Default)]
pub struct Completion {
    pub completed: Vec<Task>,
    /// Next occurrences inserted for recurring tasks.
    pub spawned: Vec<Task>,
    /// Recurring tasks whose series ended with this completion.
    pub finished: Vec<Task>,
}

/// Marks every open task matching `filter` as completed and inserts next
/// occurrences for recurring ones. Saves and records one undo step when
/// anything matched.
#[instrument(skip(store, filter, now, tz))]
pub fn complete_tasks(
    store: &DataStore,
    filter: &Filter,
    now: DateTime<Utc>,
    tz: &Tz,
) -> anyhow::Result<Completion> {
    let mut pending = store.load_pending()?;
    let mut completed = store.load_completed()?;
    let pending_before = pending.clone();
    let completed_before = completed.clone();

    let mut next_id = store.next_id(&pending);
    let mut outcome = Completion::default();
    let mut keep = Vec::with_capacity(pending.len());

    for mut task in pending.drain(..) {
        if !(task.is_open() && filter.matches(&task, now)) {
            keep.push(task);
            continue;
        }

        let next = spawn_next(&task, now, tz, next_id)
            .with_context(|| format!("cannot schedule the next '{}'", task.title))?;

        task.status = Status::Completed;
        task.end = Some(now);
        task.modified = now;
        task.id = None;

        match next {
            Some(next) => {
                next_id += 1;
                keep.push(next.clone());
                outcome.spawned.push(next);
            }
            None if task.is_recurring() => outcome.finished.push(task.clone()),
            None => {}
        }
        completed.push(task.clone());
        outcome.completed.push(task);
    }

    if !outcome.completed.is_empty() {
        keep.sort_by_key(|t| t.id.unwrap_or(u64::MAX));
        completed.sort_by_key(|t| t.end);
        store.push_undo_snapshot(&pending_before, &completed_before)?;
        store.save_pending(&keep)?;
        store.save_completed(&completed)?;
    }

    info!(
        completed = outcome.completed.len(),
        spawned = outcome.spawned.len(),
        finished = outcome.finished.len(),
        "completed tasks"
    );
    Ok(outcome)
}

#[instrument(skip(store, filter_terms, now, tz))]
fn cmd_done(
    store: &mut DataStore,
    filter_terms: &[String],
    now: DateTime<Utc>,
    tz: &Tz,
) -> anyhow::Result<()> {
    info!("command done");

    let filter = require_filter("done", filter_terms, now)?;
    let outcome = complete_tasks(store, &filter, now, tz)?;

    for task in &outcome.spawned {
        let id = task.id.map(|id| id.to_string()).unwrap_or_default();
        let due = task.due.map(format_project_datetime).unwrap_or_default();
        println!("Next '{}' is task {id}, due {due}.", task.title);
    }
    for task in &outcome.finished {
        println!("'{}' has reached the end of its series.", task.title);
    }
    println!("Completed {} task(s).", outcome.completed.len());
    Ok(())
}

#[instrument(skip(store, filter_terms, now))]
fn cmd_delete(
    store: &mut DataStore,
    filter_terms: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command delete");

    let filter = require_filter("delete", filter_terms, now)?;
    let deleted = delete_tasks(store, &filter, now)?;
    println!("Deleted {deleted} task(s).");
    Ok(())
}

/// Marks every open task matching `filter` as deleted, keeping it in the
/// pending file until purged. Records one undo step when anything matched.
#[instrument(skip(store, filter, now))]
pub fn delete_tasks(store: &DataStore, filter: &Filter, now: DateTime<Utc>) -> anyhow::Result<u64> {
    let mut pending = store.load_pending()?;
    let pending_before = pending.clone();

    let mut deleted = 0_u64;
    for task in &mut pending {
        if task.is_open() && filter.matches(task, now) {
            task.status = Status::Deleted;
            task.end = Some(now);
            task.modified = now;
            deleted += 1;
        }
    }

    if deleted > 0 {
        let completed = store.load_completed()?;
        store.push_undo_snapshot(&pending_before, &completed)?;
        store.save_pending(&pending)?;
    }
    info!(deleted, "deleted tasks");
    Ok(deleted)
}

#[instrument(skip(store))]
fn cmd_undo(store: &mut DataStore) -> anyhow::Result<()> {
    info!("command undo");

    let Some((pending, completed)) = store.pop_undo_snapshot()? else {
        println!("Nothing to undo.");
        return Ok(());
    };

    store.save_pending(&pending)?;
    store.save_completed(&completed)?;

    println!("Undo completed.");
    Ok(())
}

#[instrument(skip(store))]
fn cmd_purge(store: &mut DataStore) -> anyhow::Result<()> {
    info!("command purge");

    let purged = purge_deleted_tasks(store)?;
    println!("Purged {purged} deleted task(s).");
    Ok(())
}

/// Drops deleted tasks from the pending file. Records one undo step first
/// when there is anything to drop.
#[instrument(skip(store))]
pub fn purge_deleted_tasks(store: &DataStore) -> anyhow::Result<usize> {
    let pending = store.load_pending()?;
    if !pending.iter().any(|task| task.status == Status::Deleted) {
        return Ok(0);
    }

    let completed = store.load_completed()?;
    store.push_undo_snapshot(&pending, &completed)?;
    store.purge_deleted()
}

#[instrument(skip(store, filter_terms, now))]
fn cmd_export(
    store: &mut DataStore,
    filter_terms: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command export");

    let pending = store.load_pending()?;
    let completed = store.load_completed()?;
    let filter = Filter::parse(filter_terms, now)?;

    let rows: Vec<Task> = pending
        .into_iter()
        .chain(completed)
        .filter(|task| filter.matches_any_status(task, now))
        .collect();

    let out = serde_json::to_string_pretty(&rows)?;
    println!("{out}");
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
struct ImportTask {
    #[serde(default)]
    uuid: Option<Uuid>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<Status>,
    #[serde(default, with = "crate::datetime::iso_date_serde::option")]
    entry: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::datetime::iso_date_serde::option")]
    modified: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::datetime::iso_date_serde::option")]
    end: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::datetime::iso_date_serde::option")]
    due: Option<DateTime<Utc>>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    recur: Option<Recurrence>,
    #[serde(default)]
    parent: Option<Uuid>,
    #[serde(default)]
    plan: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: u64,
    pub updated: u64,
}

/// Upserts tasks from a JSON array, a single JSON object or JSON lines,
/// matching existing tasks by uuid.
#[instrument(skip(store, input, now))]
pub fn import_tasks(
    store: &DataStore,
    input: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<ImportSummary> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("import: empty input"));
    }

    let mut pending = store.load_pending()?;
    let mut completed = store.load_completed()?;
    let pending_before = pending.clone();
    let completed_before = completed.clone();

    let mut summary = ImportSummary::default();
    for (idx, row) in parse_import_items(trimmed)?.into_iter().enumerate() {
        let existing = row
            .uuid
            .and_then(|uuid| find_task_by_uuid(&pending, &completed, uuid));
        let mut task = normalize_import_item(row, now)
            .with_context(|| format!("import item {}", idx + 1))?;
        assign_import_id(&mut task, existing.as_ref(), store.next_id(&pending));

        if existing.is_some() {
            summary.updated += 1;
        } else {
            summary.added += 1;
        }
        upsert_imported_task(&mut pending, &mut completed, task);
    }

    if summary.added + summary.updated > 0 {
        store.push_undo_snapshot(&pending_before, &completed_before)?;
        store.save_pending(&pending)?;
        store.save_completed(&completed)?;
    }

    info!(added = summary.added, updated = summary.updated, "imported tasks");
    Ok(summary)
}

#[instrument(skip(store, now))]
fn cmd_import(store: &mut DataStore, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command import");

    let mut stdin = String::new();
    io::stdin()
        .read_to_string(&mut stdin)
        .context("failed reading stdin")?;

    let summary = import_tasks(store, &stdin, now)?;
    println!(
        "Imported {} task(s): {} added, {} updated.",
        summary.added + summary.updated,
        summary.added,
        summary.updated
    );
    Ok(())
}

fn parse_import_items(trimmed: &str) -> anyhow::Result<Vec<ImportTask>> {
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("failed parsing JSON array");
    }

    if trimmed.starts_with('{')
        && let Ok(item) = serde_json::from_str::<ImportTask>(trimmed)
    {
        return Ok(vec![item]);
    }

    let mut out = Vec::new();
    for (idx, line) in trimmed.lines().enumerate() {
        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        let item: ImportTask = serde_json::from_str(token)
            .with_context(|| format!("failed parsing import line {}", idx + 1))?;
        out.push(item);
    }

    if out.is_empty() {
        return Err(anyhow!("import: empty input"));
    }

    Ok(out)
}

fn normalize_import_item(item: ImportTask, now: DateTime<Utc>) -> anyhow::Result<Task> {
    let title = item
        .title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .ok_or_else(|| anyhow!("task has no title"))?;

    let priority = item.priority.and_then(|raw| match raw.parse::<Priority>() {
        Ok(priority) => Some(priority),
        Err(err) => {
            warn!(error = %err, "dropping unknown priority on import");
            None
        }
    });

    let status = item.status.unwrap_or(Status::Pending);
    let modified = item.modified.unwrap_or(now);
    let end = match status {
        Status::Pending => None,
        Status::Completed | Status::Deleted => item.end.or(Some(modified)),
    };

    // Working-set ids are reassigned on import.
    let mut extra = item.extra;
    extra.remove("id");

    Ok(Task {
        uuid: item.uuid.unwrap_or_else(Uuid::new_v4),
        id: None,
        title,
        description: item.description,
        status,
        entry: item.entry.unwrap_or(now),
        modified,
        end,
        due: item.due,
        priority,
        category: item.category,
        recur: item.recur,
        parent: item.parent,
        plan: item.plan,
        extra,
    })
}

fn assign_import_id(task: &mut Task, old: Option<&Task>, next_id: u64) {
    task.id = match task.status {
        Status::Completed => None,
        Status::Pending | Status::Deleted => old.and_then(|prev| prev.id).or(Some(next_id)),
    };
}

fn find_task_by_uuid(pending: &[Task], completed: &[Task], uuid: Uuid) -> Option<Task> {
    pending
        .iter()
        .chain(completed)
        .find(|task| task.uuid == uuid)
        .cloned()
}

fn upsert_imported_task(pending: &mut Vec<Task>, completed: &mut Vec<Task>, task: Task) {
    pending.retain(|row| row.uuid != task.uuid);
    completed.retain(|row| row.uuid != task.uuid);

    match task.status {
        Status::Completed => completed.push(task),
        Status::Pending | Status::Deleted => pending.push(task),
    }

    pending.sort_by_key(|row| row.id.unwrap_or(u64::MAX));
    completed.sort_by_key(|row| row.end);
}

/// Stores every item of a resolved plan as a pending task, numbered after
/// the current working set, in a single undo step.
#[instrument(skip(store, plan, now), fields(items = plan.items.len()))]
pub fn import_plan(
    store: &DataStore,
    plan: &ResolvedPlan,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<Task>> {
    let pending = store.load_pending()?;
    let completed = store.load_completed()?;
    let pending_before = pending.clone();

    let tasks = plan.into_tasks(now, store.next_id(&pending));
    if tasks.is_empty() {
        return Ok(tasks);
    }

    store.push_undo_snapshot(&pending_before, &completed)?;
    store.add_tasks(pending, tasks.clone())?;

    info!(
        count = tasks.len(),
        start = %plan.start,
        starts_tomorrow = plan.starts_tomorrow,
        "imported plan"
    );
    Ok(tasks)
}

#[instrument(skip(store, cfg, renderer, args, now, tz))]
fn cmd_plan(
    store: &mut DataStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
    now: DateTime<Utc>,
    tz: &Tz,
) -> anyhow::Result<()> {
    info!("command plan");

    let usage = "usage: plan show|import FILE|- [start:auto|today|tomorrow]";
    let [action, source, rest @ ..] = args else {
        return Err(anyhow!(usage));
    };

    let mut policy = cfg.plan_start()?;
    for arg in rest {
        match arg.split_once(':') {
            Some(("start", value)) => policy = value.parse::<StartPolicy>()?,
            _ => return Err(anyhow!("plan: unexpected argument '{arg}'; {usage}")),
        }
    }

    let raw = read_plan_source(source)?;
    let plan = Plan::parse(&raw).with_context(|| format!("failed to read plan from {source}"))?;
    let resolved = resolve(&plan, now, tz, policy, cfg.plan_default_time()?)?;

    match action.as_str() {
        "show" => renderer.print_plan_preview(&resolved),
        "import" => {
            renderer.print_plan_preview(&resolved)?;
            let tasks = import_plan(store, &resolved, now)?;
            let ids: Vec<u64> = tasks.iter().filter_map(|task| task.id).collect();
            println!();
            match (ids.first(), ids.last()) {
                (Some(first), Some(last)) if first != last => {
                    println!("Created tasks {first}-{last}.")
                }
                (Some(first), _) => println!("Created task {first}."),
                _ => println!("Created 0 tasks."),
            }
            if resolved.starts_tomorrow && policy == StartPolicy::Auto {
                println!("Day 1 has already started, so the plan begins tomorrow.");
            }
            Ok(())
        }
        other => Err(anyhow!("plan: unknown action '{other}'; {usage}")),
    }
}

fn read_plan_source(source: &str) -> anyhow::Result<String> {
    if source == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("failed reading plan from stdin")?;
        return Ok(raw);
    }
    fs::read_to_string(source).with_context(|| format!("failed to read {source}"))
}

#[instrument(skip(store))]
fn cmd_categories(store: &mut DataStore) -> anyhow::Result<()> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for task in store.load_pending()?.into_iter().filter(Task::is_open) {
        let name = task.category.unwrap_or_else(|| "(none)".to_string());
        *counts.entry(name).or_default() += 1;
    }

    for (category, count) in counts {
        println!("{category} {count}");
    }
    Ok(())
}

fn cmd_commands() -> anyhow::Result<()> {
    for command in known_command_names() {
        println!("{command}");
    }
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    for (k, v) in cfg.iter() {
        println!("{k}={v}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "usage: dayplan [options] [filter] <command> [args]

  add TITLE... [mods]        create a task
  list [filter]              open tasks by due date
  agenda [DAYS]              dated tasks for the coming days
  info FILTER                full task record
  modify FILTER mods         change matching tasks (field:none clears)
  done FILTER                complete tasks, scheduling the next recurrence
  delete FILTER              mark tasks deleted
  purge                      drop deleted tasks for good
  undo                       revert the last change
  export [filter]            JSON to stdout
  import                     JSON or JSON lines from stdin
  plan show|import FILE|-    preview or import a multi-day plan
  categories                 categories with open-task counts

mods: due:DATE pri:low|medium|high cat:NAME @NAME recur:weekly until:DATE desc:TEXT"
    );
    Ok(())
}

fn require_filter(command: &str, filter_terms: &[String], now: DateTime<Utc>) -> anyhow::Result<Filter> {
    let filter = Filter::parse(filter_terms, now)?;
    if filter.is_empty() {
        return Err(anyhow!("{command}: a filter is required, e.g. '3 {command}'"));
    }
    Ok(filter)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mod {
    Due(Option<DateTime<Utc>>),
    Priority(Option<Priority>),
    Category(Option<String>),
    Recur(Option<Recurrence>),
    Until(Option<NaiveDate>),
    Description(Option<String>),
}

#[instrument(skip(args, now, tz))]
fn parse_title_and_mods(
    args: &[String],
    now: DateTime<Utc>,
    tz: &Tz,
) -> anyhow::Result<(String, Vec<Mod>)> {
    let mut title_parts = Vec::new();
    let mut mods = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" && !literal {
            literal = true;
            continue;
        }

        if !literal && let Some(one_mod) = parse_one_mod(arg, now, tz)? {
            mods.push(one_mod);
            continue;
        }

        title_parts.push(arg.as_str());
    }

    let title = title_parts.join(" ").trim().to_string();
    if title.is_empty() {
        return Err(anyhow!("add: a title is required"));
    }

    Ok((title, mods))
}

#[instrument(skip(args, now, tz))]
fn parse_mods(args: &[String], now: DateTime<Utc>, tz: &Tz) -> anyhow::Result<Vec<Mod>> {
    let mut mods = Vec::new();
    for arg in args {
        if let Some(one_mod) = parse_one_mod(arg, now, tz)? {
            mods.push(one_mod);
        } else {
            warn!(arg = %arg, "unrecognized modifier token ignored");
        }
    }
    Ok(mods)
}

fn parse_one_mod(tok: &str, now: DateTime<Utc>, tz: &Tz) -> anyhow::Result<Option<Mod>> {
    if let Some(category) = tok.strip_prefix('@')
        && !category.is_empty()
    {
        return Ok(Some(Mod::Category(Some(category.to_string()))));
    }

    let Some((key, value)) = tok.split_once(':') else {
        return Ok(None);
    };
    let value = value.trim();
    let cleared = value.is_empty() || value.eq_ignore_ascii_case("none");

    let one_mod = match key.to_ascii_lowercase().as_str() {
        "due" if cleared => Mod::Due(None),
        "due" => Mod::Due(Some(
            parse_date_expr_in(value, now, tz).with_context(|| format!("invalid due: {value}"))?,
        )),
        "pri" | "priority" if cleared => Mod::Priority(None),
        "pri" | "priority" => Mod::Priority(Some(value.parse()?)),
        "cat" | "category" if cleared => Mod::Category(None),
        "cat" | "category" => Mod::Category(Some(value.to_string())),
        "recur" if cleared => Mod::Recur(None),
        "recur" => Mod::Recur(Some(Recurrence::parse(value)?)),
        "until" if cleared => Mod::Until(None),
        "until" => {
            let until = parse_date_expr_in(value, now, tz)
                .with_context(|| format!("invalid until: {value}"))?;
            Mod::Until(Some(until.with_timezone(tz).date_naive()))
        }
        "desc" | "description" if cleared => Mod::Description(None),
        "desc" | "description" => Mod::Description(Some(value.to_string())),
        _ => return Ok(None),
    };
    Ok(Some(one_mod))
}

fn apply_mods(task: &mut Task, mods: &[Mod]) -> anyhow::Result<()> {
    let mut until = None;
    for one_mod in mods {
        match one_mod {
            Mod::Due(due) => task.due = *due,
            Mod::Priority(priority) => task.priority = *priority,
            Mod::Category(category) => task.category = category.clone(),
            Mod::Recur(recur) => {
                let end_date = task.recur.as_ref().and_then(|old| old.end_date);
                task.recur = recur.clone().map(|mut recur| {
                    recur.end_date = end_date;
                    recur
                });
            }
            Mod::Until(date) => until = Some(*date),
            Mod::Description(description) => task.description = description.clone(),
        }
    }

    if let Some(end_date) = until {
        let recur = task
            .recur
            .as_mut()
            .ok_or_else(|| anyhow!("until: only applies to recurring tasks"))?;
        recur.end_date = end_date;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use chrono_tz::Europe::Berlin;

    use tempfile::tempdir;

    use super::{
        Mod, apply_mods, expand_command_abbrev, known_command_names, modify_tasks, parse_title_and_mods,
        sort_by_due,
    };
    use crate::datastore::DataStore;
    use crate::filter::Filter;
    use crate::recur::{RecurKind, Recurrence};
    use crate::task::{Priority, Status, Task};

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn abbreviations_must_be_unambiguous() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("ag", &known), Some("agenda"));
        assert_eq!(expand_command_abbrev("do", &known), Some("done"));
        assert_eq!(expand_command_abbrev("d", &known), None);
        assert_eq!(expand_command_abbrev("p", &known), None);
        assert_eq!(expand_command_abbrev("pl", &known), Some("plan"));
    }

    #[test]
    fn title_and_mods_are_separated() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 8, 0, 0).unwrap();
        let (title, mods) = parse_title_and_mods(
            &args(&[
                "Water",
                "plants",
                "@home",
                "pri:h",
                "recur:weekly",
                "until:2026-12-31",
                "--",
                "pri:later",
            ]),
            now,
            &Berlin,
        )
        .unwrap();
        assert_eq!(title, "Water plants pri:later");
        assert_eq!(
            mods,
            vec![
                Mod::Category(Some("home".to_string())),
                Mod::Priority(Some(Priority::High)),
                Mod::Recur(Some(Recurrence::new(RecurKind::Weekly, 1))),
                Mod::Until(NaiveDate::from_ymd_opt(2026, 12, 31)),
            ]
        );
    }

    #[test]
    fn due_is_read_in_the_given_zone() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 8, 0, 0).unwrap();
        let (_, mods) =
            parse_title_and_mods(&args(&["Call", "due:2026-10-20T09:00"]), now, &Berlin).unwrap();
        assert_eq!(
            mods,
            vec![Mod::Due(Some(Utc.with_ymd_and_hms(2026, 10, 20, 7, 0, 0).unwrap()))]
        );
    }

    #[test]
    fn none_clears_and_until_needs_recurrence() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 8, 0, 0).unwrap();
        let mut task = Task::new_pending("Stretch".to_string(), now, 1);
        task.due = Some(now);
        task.recur = Some(Recurrence::new(RecurKind::Daily, 1));

        apply_mods(&mut task, &[Mod::Due(None), Mod::Recur(None)]).unwrap();
        assert!(task.due.is_none());
        assert!(task.recur.is_none());

        let err = apply_mods(&mut task, &[Mod::Until(NaiveDate::from_ymd_opt(2026, 11, 1))]);
        assert!(err.is_err());
    }

    #[test]
    fn changing_recurrence_keeps_end_date() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 8, 0, 0).unwrap();
        let mut task = Task::new_pending("Review budget".to_string(), now, 1);
        let mut recur = Recurrence::new(RecurKind::Monthly, 1);
        recur.end_date = NaiveDate::from_ymd_opt(2027, 6, 30);
        task.recur = Some(recur);

        apply_mods(&mut task, &[Mod::Recur(Some(Recurrence::new(RecurKind::Weekly, 2)))]).unwrap();
        let recur = task.recur.unwrap();
        assert_eq!(recur.kind, RecurKind::Weekly);
        assert_eq!(recur.end_date, NaiveDate::from_ymd_opt(2027, 6, 30));
    }

    #[test]
    fn modify_records_one_undo_step_covering_both_files() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 8, 0, 0).unwrap();

        let open = Task::new_pending("Water plants".to_string(), now, 1);
        let mut done = Task::new_pending("Water plants".to_string(), now, 2);
        done.status = Status::Completed;
        done.id = None;
        store.save_pending(&[open]).unwrap();
        store.save_completed(&[done]).unwrap();

        let filter = Filter::parse(&args(&["1", "or", "status:completed"]), now).unwrap();
        let mods = [Mod::Category(Some("garden".to_string()))];
        let later = now + chrono::Duration::minutes(5);
        assert_eq!(modify_tasks(&store, &filter, &mods, later).unwrap(), 2);
        assert_eq!(store.load_pending().unwrap()[0].modified, later);
        assert_eq!(store.load_completed().unwrap()[0].category.as_deref(), Some("garden"));

        let (pending, completed) = store.pop_undo_snapshot().unwrap().unwrap();
        assert_eq!(pending[0].category, None);
        assert_eq!(completed[0].category, None);
        assert!(store.pop_undo_snapshot().unwrap().is_none());
    }

    #[test]
    fn modify_without_matches_saves_nothing() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 8, 0, 0).unwrap();
        store
            .save_pending(&[Task::new_pending("Water plants".to_string(), now, 1)])
            .unwrap();

        let filter = Filter::parse(&args(&["7"]), now).unwrap();
        let mods = [Mod::Priority(Some(Priority::High))];
        assert_eq!(modify_tasks(&store, &filter, &mods, now).unwrap(), 0);
        assert_eq!(store.load_pending().unwrap()[0].priority, None);
        assert!(store.pop_undo_snapshot().unwrap().is_none());
    }

    #[test]
    fn undated_tasks_list_after_dated_ones() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 8, 0, 0).unwrap();
        let undated = Task::new_pending("Someday".to_string(), now, 1);
        let mut later = Task::new_pending("Later".to_string(), now, 2);
        later.due = Some(now + chrono::Duration::days(2));
        let mut sooner = Task::new_pending("Sooner".to_string(), now, 3);
        sooner.due = Some(now + chrono::Duration::hours(1));

        let mut rows = vec![undated, later, sooner];
        sort_by_due(&mut rows);
        let titles: Vec<&str> = rows.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["Sooner", "Later", "Someday"]);
    }
}
