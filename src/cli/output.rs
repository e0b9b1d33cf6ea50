use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::ids::ListId;
use crate::model::store::TaskStore;
use crate::model::task::{Priority, Task};
use crate::ops::check::{CheckError, CheckResult, CheckWarning};
use crate::ops::views::{ListCounts, TreeRow};

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct SectionJson<'a> {
    pub title: String,
    pub rows: Vec<TreeRow<'a>>,
}

#[derive(Serialize)]
pub struct ListJson<'a> {
    pub list: String,
    pub name: String,
    pub sections: Vec<SectionJson<'a>>,
}

#[derive(Serialize)]
pub struct ListCountsJson {
    pub list: String,
    pub name: String,
    #[serde(flatten)]
    pub counts: ListCounts,
}

/// Result of a write command
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteJson<'a> {
    pub intent: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<&'a Task>,
    pub persisted: bool,
}

// ---------------------------------------------------------------------------
// Text formatting
// ---------------------------------------------------------------------------

fn checkbox(row: &TreeRow) -> &'static str {
    if row.task.completed {
        "[x]"
    } else if row.effectively_complete {
        "[~]"
    } else {
        "[ ]"
    }
}

fn priority_marker(p: Priority) -> &'static str {
    match p {
        Priority::High => " !!!",
        Priority::Medium => " !!",
        Priority::Low => " !",
        Priority::None => "",
    }
}

/// One task line: indent, checkbox, title, then the decorations
pub fn format_task_line(task: &Task, depth: usize, marker: &str, folded: bool) -> String {
    let mut line = format!("{}{} {}", "  ".repeat(depth), marker, task.title);
    line.push_str(priority_marker(task.priority));
    if task.is_pinned {
        line.push_str(" (pinned)");
    }
    if let Some(deadline) = task.deadline {
        line.push_str(&format!(" due {}", deadline.format("%Y-%m-%d")));
    }
    for tag in &task.tags {
        line.push_str(&format!(" #{tag}"));
    }
    if folded {
        line.push_str(" [+]");
    }
    line.push_str(&format!("  ({})", task.id));
    line
}

pub fn format_row(row: &TreeRow) -> String {
    format_task_line(
        row.task,
        row.depth,
        checkbox(row),
        row.collapsed && row.has_children,
    )
}

pub fn format_rows(rows: &[TreeRow]) -> Vec<String> {
    rows.iter().map(format_row).collect()
}

pub fn format_bin(tasks: &[&Task]) -> Vec<String> {
    tasks
        .iter()
        .map(|t| {
            let mut line = format_task_line(t, t.depth as usize, "[-]", false);
            if let Some(at) = t.deleted_at {
                line.push_str(&format!(" deleted {}", at.format("%Y-%m-%d %H:%M")));
            }
            line
        })
        .collect()
}

pub fn format_counts(name: &str, counts: &ListCounts) -> String {
    format!(
        "{name}: {} open, {} done, {} overdue, {} in bin",
        counts.open, counts.completed, counts.overdue, counts.binned
    )
}

/// Heading for a list, falling back to its id when the name is unknown
pub fn list_heading(store: &TaskStore, list_id: &ListId) -> String {
    store
        .list(list_id)
        .map(|l| l.name.clone())
        .unwrap_or_else(|| list_id.to_string())
}

pub fn format_check(result: &CheckResult) -> Vec<String> {
    let mut lines = Vec::new();
    if !result.errors.is_empty() {
        lines.push("Errors:".to_string());
        for err in &result.errors {
            lines.push(format!("  {}", describe_error(err)));
        }
    }
    if !result.warnings.is_empty() {
        if !result.errors.is_empty() {
            lines.push(String::new());
        }
        lines.push("Warnings:".to_string());
        for warn in &result.warnings {
            lines.push(format!("  {}", describe_warning(warn)));
        }
    }
    if result.valid && result.warnings.is_empty() {
        lines.push("All checks passed.".to_string());
    }
    lines
}

fn describe_error(err: &CheckError) -> String {
    match err {
        CheckError::DepthMismatch {
            task_id,
            expected,
            actual,
        } => format!("{task_id} has depth {actual}, expected {expected}"),
        CheckError::MissingParent { task_id, parent_id } => {
            format!("{task_id} points at missing parent {parent_id}")
        }
        CheckError::CrossListParent { task_id, parent_id } => {
            format!("{task_id} and its parent {parent_id} are in different lists")
        }
        CheckError::BinnedParent { task_id, parent_id } => {
            format!("{task_id} is live under binned parent {parent_id}")
        }
        CheckError::Cycle { task_id } => format!("{task_id} is its own ancestor"),
        CheckError::GroupNotInList {
            task_id,
            group_id,
            list_id,
        } => format!("{task_id} is in group {group_id}, which is not part of list {list_id}"),
    }
}

fn describe_warning(warn: &CheckWarning) -> String {
    match warn {
        CheckWarning::CompletionDrift { task_id, derived } => {
            let state = if *derived { "done" } else { "open" };
            format!("{task_id} disagrees with its children, which say {state}")
        }
        CheckWarning::UnknownTag { task_id, tag_id } => {
            format!("{task_id} has unknown tag {tag_id}")
        }
    }
}

/// Parse `YYYY-MM-DD` (end of that day, UTC) or a full RFC 3339 timestamp.
pub fn parse_deadline(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid deadline '{s}' (expected YYYY-MM-DD or RFC 3339)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_task() -> Task {
        let mut t = Task::new("t1".into(), "Write report", "L1".into());
        t.priority = Priority::High;
        t.tags.insert("work".into());
        t.deadline = Some(Utc.with_ymd_and_hms(2025, 5, 3, 9, 0, 0).unwrap());
        t
    }

    #[test]
    fn task_line_decorations() {
        let line = format_task_line(&sample_task(), 1, "[ ]", true);
        assert_eq!(line, "  [ ] Write report !!! due 2025-05-03 #work [+]  (t1)");
    }

    #[test]
    fn rows_mark_derived_completion() {
        let task = sample_task();
        let row = TreeRow {
            task: &task,
            depth: 0,
            has_children: true,
            collapsed: false,
            effectively_complete: true,
        };
        assert!(format_row(&row).starts_with("[~] Write report"));
    }

    #[test]
    fn deadlines_parse() {
        assert_eq!(
            parse_deadline("2025-05-03").unwrap(),
            Utc.with_ymd_and_hms(2025, 5, 3, 23, 59, 59).unwrap()
        );
        assert_eq!(
            parse_deadline("2025-05-03T10:00:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2025, 5, 3, 8, 0, 0).unwrap()
        );
        assert!(parse_deadline("next week").is_err());
    }

    #[test]
    fn clean_check_output() {
        let result = CheckResult {
            valid: true,
            errors: vec![],
            warnings: vec![],
        };
        assert_eq!(format_check(&result), vec!["All checks passed."]);
    }
}
