use chrono::{
  DateTime,
  Days,
  Utc
};
use tracing::trace;

use crate::datetime::{
  parse_date_expr,
  to_project_date
};
use crate::task::{
  Priority,
  Status,
  Task
};

#[derive(Debug, Clone)]
pub enum Pred {
  Id(u64),
  Uuid(uuid::Uuid),
  CategoryEq(String),
  PriorityEq(Priority),
  StatusEq(Status),
  PlanEq(String),
  VirtualTagInclude(VirtualTag),
  VirtualTagExclude(VirtualTag),
  DueBefore(DateTime<Utc>),
  DueAfter(DateTime<Utc>),
  TextContains(String)
}

#[derive(Debug, Clone, Copy)]
pub enum VirtualTag {
  Pending,
  Completed,
  Deleted,
  Due,
  Overdue,
  Today,
  Tomorrow,
  Week,
  Recurring,
  Planned
}

#[derive(Debug, Clone)]
enum Expr {
  True,
  Pred(Pred),
  And(Vec<Expr>),
  Or(Vec<Expr>)
}

#[derive(Debug, Clone)]
pub struct Filter {
  expr: Expr
}

impl Default for Filter {
  fn default() -> Self {
    Self { expr: Expr::True }
  }
}

impl Filter {
  #[tracing::instrument(skip(terms, now))]
  pub fn parse(
    terms: &[String],
    now: DateTime<Utc>
  ) -> anyhow::Result<Self> {
    if terms.is_empty() {
      return Ok(Self::default());
    }

    let tokens = lex_terms(terms);
    let mut parser = Parser::new(tokens, now);
    let expr = parser.parse_expr()?;
    parser.ensure_end()?;

    Ok(Self { expr })
  }

  /// Matches open tasks only, unless the expression names a status or
  /// a specific task.
  pub fn matches(
    &self,
    task: &Task,
    now: DateTime<Utc>
  ) -> bool {
    if !eval_expr(&self.expr, task, now) {
      return false;
    }

    task.is_open()
      || expr_has_explicit_status_filter(&self.expr)
      || expr_has_identity_selector(&self.expr)
  }

  pub fn matches_any_status(
    &self,
    task: &Task,
    now: DateTime<Utc>
  ) -> bool {
    eval_expr(&self.expr, task, now)
  }

  pub fn is_empty(&self) -> bool {
    matches!(self.expr, Expr::True)
  }
}

struct Parser {
  tokens: Vec<String>,
  pos:    usize,
  now:    DateTime<Utc>
}

impl Parser {
  fn new(
    tokens: Vec<String>,
    now: DateTime<Utc>
  ) -> Self {
    Self { tokens, pos: 0, now }
  }

  fn parse_expr(
    &mut self
  ) -> anyhow::Result<Expr> {
    self.parse_or()
  }

  fn parse_or(&mut self) -> anyhow::Result<Expr> {
    let mut nodes = vec![self.parse_and()?];

    while self.match_any(&["or", "||"]) {
      nodes.push(self.parse_and()?);
    }

    if nodes.len() == 1 {
      Ok(nodes.remove(0))
    } else {
      Ok(Expr::Or(nodes))
    }
  }

  fn parse_and(
    &mut self
  ) -> anyhow::Result<Expr> {
    let mut nodes = vec![self.parse_primary()?];

    loop {
      if self.match_any(&["and", "&&"]) {
        nodes.push(self.parse_primary()?);
        continue;
      }

      if self.peek_is_implicit_and_boundary() {
        nodes.push(self.parse_primary()?);
        continue;
      }

      break;
    }

    if nodes.len() == 1 {
      Ok(nodes.remove(0))
    } else {
      Ok(Expr::And(nodes))
    }
  }

  fn parse_primary(
    &mut self
  ) -> anyhow::Result<Expr> {
    if self.match_token("(") {
      let inner = self.parse_expr()?;
      self.expect_token(")")?;
      return Ok(inner);
    }

    let token =
      self.next_token().ok_or_else(|| {
        anyhow::anyhow!(
          "unexpected end of filter expression"
        )
      })?;

    if token == ")" {
      return Err(anyhow::anyhow!(
        "unexpected ')' in filter expression"
      ));
    }

    let pred = parse_atom(&token, self.now)?;
    Ok(Expr::Pred(pred))
  }

  fn ensure_end(&self) -> anyhow::Result<()> {
    if self.pos < self.tokens.len() {
      Err(anyhow::anyhow!(
        "unexpected token in filter expression: {}",
        self.tokens[self.pos]
      ))
    } else {
      Ok(())
    }
  }

  fn match_token(
    &mut self,
    expected: &str
  ) -> bool {
    let Some(tok) = self.tokens.get(self.pos)
    else {
      return false;
    };
    if tok.eq_ignore_ascii_case(expected) {
      self.pos += 1;
      true
    } else {
      false
    }
  }

  fn match_any(
    &mut self,
    options: &[&str]
  ) -> bool {
    options.iter().any(|opt| self.match_token(opt))
  }

  fn expect_token(
    &mut self,
    expected: &str
  ) -> anyhow::Result<()> {
    if self.match_token(expected) {
      Ok(())
    } else {
      Err(anyhow::anyhow!(
        "expected '{expected}' in filter expression"
      ))
    }
  }

  fn next_token(&mut self) -> Option<String> {
    let out = self.tokens.get(self.pos).cloned();
    if out.is_some() {
      self.pos += 1;
    }
    out
  }

  fn peek_is_implicit_and_boundary(
    &self
  ) -> bool {
    let Some(tok) = self.tokens.get(self.pos)
    else {
      return false;
    };

    !["and", "&&", "or", "||", ")"]
      .iter()
      .any(|kw| tok.eq_ignore_ascii_case(kw))
  }
}

fn lex_terms(terms: &[String]) -> Vec<String> {
  let mut out = Vec::new();

  for term in terms {
    let mut current = String::new();
    for ch in term.chars() {
      if ch == '(' || ch == ')' {
        if !current.is_empty() {
          out.push(std::mem::take(&mut current));
        }
        out.push(ch.to_string());
      } else {
        current.push(ch);
      }
    }

    if !current.is_empty() {
      out.push(current);
    }
  }

  out
}

fn parse_atom(
  term: &str,
  now: DateTime<Utc>
) -> anyhow::Result<Pred> {
  if let Some(tag) = term.strip_prefix('+') {
    return parse_virtual_tag(tag)
      .map(Pred::VirtualTagInclude)
      .ok_or_else(|| {
        anyhow::anyhow!("unknown virtual tag: +{tag}")
      });
  }
  if let Some(tag) = term.strip_prefix('-')
    && let Some(virtual_tag) =
      parse_virtual_tag(tag)
  {
    return Ok(Pred::VirtualTagExclude(
      virtual_tag
    ));
  }
  if let Ok(id) = term.parse::<u64>() {
    return Ok(Pred::Id(id));
  }
  if let Ok(uuid) = uuid::Uuid::parse_str(term) {
    return Ok(Pred::Uuid(uuid));
  }

  if let Some(category) = term
    .strip_prefix('@')
    .or_else(|| term.strip_prefix("category:"))
    .or_else(|| term.strip_prefix("cat:"))
  {
    return Ok(Pred::CategoryEq(
      category.to_string()
    ));
  }

  if let Some(level) = term
    .strip_prefix("priority:")
    .or_else(|| term.strip_prefix("pri:"))
  {
    return Ok(Pred::PriorityEq(level.parse()?));
  }

  if let Some(plan) = term.strip_prefix("plan:") {
    return Ok(Pred::PlanEq(plan.to_string()));
  }

  if let Some(status_text) =
    term.strip_prefix("status:")
  {
    return match status_text
      .to_ascii_lowercase()
      .as_str()
    {
      | "pending" => {
        Ok(Pred::StatusEq(Status::Pending))
      }
      | "completed" | "done" => {
        Ok(Pred::StatusEq(Status::Completed))
      }
      | "deleted" => {
        Ok(Pred::StatusEq(Status::Deleted))
      }
      | other => Err(anyhow::anyhow!(
        "unknown status in filter: {other}"
      ))
    };
  }

  if let Some(value) =
    term.strip_prefix("due.before:")
  {
    return Ok(Pred::DueBefore(parse_date_expr(
      value, now
    )?));
  }

  if let Some(value) =
    term.strip_prefix("due.after:")
  {
    return Ok(Pred::DueAfter(parse_date_expr(
      value, now
    )?));
  }

  Ok(Pred::TextContains(term.to_string()))
}

fn eval_expr(
  expr: &Expr,
  task: &Task,
  now: DateTime<Utc>
) -> bool {
  match expr {
    | Expr::True => true,
    | Expr::Pred(pred) => {
      eval_pred(pred, task, now)
    }
    | Expr::And(nodes) => {
      nodes
        .iter()
        .all(|node| eval_expr(node, task, now))
    }
    | Expr::Or(nodes) => {
      nodes
        .iter()
        .any(|node| eval_expr(node, task, now))
    }
  }
}

fn eval_pred(
  pred: &Pred,
  task: &Task,
  now: DateTime<Utc>
) -> bool {
  let ok = match pred {
    | Pred::Id(id) => task.id == Some(*id),
    | Pred::Uuid(uuid) => task.uuid == *uuid,
    | Pred::CategoryEq(category) => {
      task.category.as_deref().is_some_and(
        |value| value.eq_ignore_ascii_case(category)
      )
    }
    | Pred::PriorityEq(priority) => {
      task.priority == Some(*priority)
    }
    | Pred::StatusEq(status) => {
      task.status == *status
    }
    | Pred::PlanEq(plan) => {
      task.plan.as_deref().is_some_and(|value| {
        value.eq_ignore_ascii_case(plan)
      })
    }
    | Pred::VirtualTagInclude(virtual_tag) => {
      eval_virtual_tag(*virtual_tag, task, now)
    }
    | Pred::VirtualTagExclude(virtual_tag) => {
      !eval_virtual_tag(*virtual_tag, task, now)
    }
    | Pred::DueBefore(dt) => {
      task.due.is_some_and(|due| due < *dt)
    }
    | Pred::DueAfter(dt) => {
      task.due.is_some_and(|due| due > *dt)
    }
    | Pred::TextContains(text) => {
      let needle = text.to_lowercase();
      task.title.to_lowercase().contains(&needle)
        || task.description.as_deref().is_some_and(
          |desc| {
            desc.to_lowercase().contains(&needle)
          }
        )
    }
  };

  trace!(pred = ?pred, id = ?task.id, uuid = %task.uuid, ok, "filter predicate evaluation");
  ok
}

fn eval_virtual_tag(
  virtual_tag: VirtualTag,
  task: &Task,
  now: DateTime<Utc>
) -> bool {
  let today = to_project_date(now);
  let due_date = task.due.map(to_project_date);

  match virtual_tag {
    | VirtualTag::Pending => task.is_open(),
    | VirtualTag::Completed => {
      task.status == Status::Completed
    }
    | VirtualTag::Deleted => {
      task.status == Status::Deleted
    }
    | VirtualTag::Due => {
      task.is_open()
        && due_date.is_some_and(|due| due <= today)
    }
    | VirtualTag::Overdue => task.is_overdue(now),
    | VirtualTag::Today => {
      due_date == Some(today)
    }
    | VirtualTag::Tomorrow => {
      due_date.is_some()
        && due_date == today.checked_add_days(Days::new(1))
    }
    | VirtualTag::Week => {
      let horizon = today
        .checked_add_days(Days::new(7))
        .unwrap_or(today);
      due_date.is_some_and(|due| {
        due >= today && due < horizon
      })
    }
    | VirtualTag::Recurring => task.is_recurring(),
    | VirtualTag::Planned => task.plan.is_some()
  }
}

fn parse_virtual_tag(
  tag: &str
) -> Option<VirtualTag> {
  match tag {
    | "PENDING" => Some(VirtualTag::Pending),
    | "COMPLETED" => Some(VirtualTag::Completed),
    | "DELETED" => Some(VirtualTag::Deleted),
    | "DUE" => Some(VirtualTag::Due),
    | "OVERDUE" => Some(VirtualTag::Overdue),
    | "TODAY" => Some(VirtualTag::Today),
    | "TOMORROW" => Some(VirtualTag::Tomorrow),
    | "WEEK" => Some(VirtualTag::Week),
    | "RECURRING" => Some(VirtualTag::Recurring),
    | "PLANNED" => Some(VirtualTag::Planned),
    | _ => None
  }
}

fn expr_has_explicit_status_filter(
  expr: &Expr
) -> bool {
  match expr {
    | Expr::True => false,
    | Expr::Pred(pred) => {
      matches!(
        pred,
        Pred::StatusEq(_)
          | Pred::VirtualTagInclude(
            VirtualTag::Completed
              | VirtualTag::Deleted
          )
          | Pred::VirtualTagExclude(
            VirtualTag::Pending
          )
      )
    }
    | Expr::And(nodes) | Expr::Or(nodes) => {
      nodes
        .iter()
        .any(expr_has_explicit_status_filter)
    }
  }
}

fn expr_has_identity_selector(
  expr: &Expr
) -> bool {
  match expr {
    | Expr::True => false,
    | Expr::Pred(pred) => {
      matches!(pred, Pred::Id(_) | Pred::Uuid(_))
    }
    | Expr::And(nodes) | Expr::Or(nodes) => {
      nodes.iter().any(expr_has_identity_selector)
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    TimeZone,
    Utc
  };

  use super::Filter;
  use crate::recur::Recurrence;
  use crate::task::{
    Priority,
    Status,
    Task
  };

  fn terms(raw: &[&str]) -> Vec<String> {
    raw.iter().map(ToString::to_string).collect()
  }

  #[test]
  fn boolean_precedence_and_parentheses() {
    let now = Utc
      .with_ymd_and_hms(2026, 10, 14, 5, 0, 0)
      .unwrap();
    let mut home =
      Task::new_pending("laundry".to_string(), now, 1);
    home.category = Some("home".to_string());

    let mut work =
      Task::new_pending("report".to_string(), now, 2);
    work.category = Some("work".to_string());
    work.priority = Some(Priority::High);

    let mut work_low =
      Task::new_pending("expenses".to_string(), now, 3);
    work_low.category = Some("Work".to_string());
    work_low.priority = Some(Priority::Low);

    let filter = Filter::parse(
      &terms(&["(@home", "or", "@work)", "and", "pri:h"]),
      now
    )
    .unwrap();

    assert!(!filter.matches(&home, now));
    assert!(filter.matches(&work, now));
    assert!(!filter.matches(&work_low, now));
  }

  #[test]
  fn closed_tasks_need_explicit_status_or_identity() {
    let now = Utc
      .with_ymd_and_hms(2026, 10, 14, 5, 0, 0)
      .unwrap();
    let mut done =
      Task::new_pending("filed taxes".to_string(), now, 4);
    done.status = Status::Completed;

    assert!(!Filter::default().matches(&done, now));
    assert!(
      Filter::default().matches_any_status(&done, now)
    );

    let by_status =
      Filter::parse(&terms(&["status:completed"]), now)
        .unwrap();
    assert!(by_status.matches(&done, now));

    let by_id = Filter::parse(&terms(&["4"]), now).unwrap();
    assert!(by_id.matches(&done, now));
  }

  #[test]
  fn virtual_tags_for_dates_and_series() {
    let now = Utc
      .with_ymd_and_hms(2026, 10, 14, 12, 0, 0)
      .unwrap();
    let mut overdue =
      Task::new_pending("late".to_string(), now, 1);
    overdue.due = Some(now - Duration::hours(3));

    let mut next_week =
      Task::new_pending("later".to_string(), now, 2);
    next_week.due = Some(now + Duration::days(6));
    next_week.recur =
      Some(Recurrence::parse("weekly").unwrap());

    let parse = |raw: &str| {
      Filter::parse(&terms(&[raw]), now).unwrap()
    };

    assert!(parse("+OVERDUE").matches(&overdue, now));
    assert!(!parse("+OVERDUE").matches(&next_week, now));
    assert!(parse("+TODAY").matches(&overdue, now));
    assert!(parse("+WEEK").matches(&next_week, now));
    assert!(parse("+RECURRING").matches(&next_week, now));
    assert!(parse("-RECURRING").matches(&overdue, now));
    assert!(!parse("+PLANNED").matches(&overdue, now));
  }

  #[test]
  fn text_and_date_atoms() {
    let now = Utc
      .with_ymd_and_hms(2026, 10, 14, 12, 0, 0)
      .unwrap();
    let mut task = Task::new_pending(
      "Book flights".to_string(),
      now,
      1
    );
    task.description =
      Some("Lisbon in November".to_string());
    task.due = Some(now + Duration::days(2));

    let parse = |raw: &[&str]| {
      Filter::parse(&terms(raw), now).unwrap()
    };
    assert!(parse(&["flights"]).matches(&task, now));
    assert!(parse(&["lisbon"]).matches(&task, now));
    assert!(
      parse(&["due.before:2026-10-20"]).matches(&task, now)
    );
    assert!(
      !parse(&["due.after:2026-10-20"]).matches(&task, now)
    );
  }

  #[test]
  fn rejects_malformed_expressions() {
    let now = Utc
      .with_ymd_and_hms(2026, 10, 14, 12, 0, 0)
      .unwrap();
    assert!(Filter::parse(&terms(&["(@home"]), now).is_err());
    assert!(Filter::parse(&terms(&["+SOMEDAY"]), now).is_err());
    assert!(
      Filter::parse(&terms(&["status:maybe"]), now).is_err()
    );
    assert!(Filter::parse(&terms(&["pri:urgent"]), now).is_err());
  }
}
