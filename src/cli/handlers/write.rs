use indexmap::IndexSet;

use crate::cli::commands::*;
use crate::cli::output::{WriteJson, parse_deadline};
use crate::model::ids::{GroupId, ListId, TagId, TaskId};
use crate::model::task::{NewTask, Priority, TaskPatch};
use crate::ops::task_ops::InsertPosition;
use crate::sync::bus::{SessionEvent, Topic};
use crate::sync::intent::Intent;
use crate::sync::session::Session;

use super::{CmdResult, parse_filter};

fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::parse_priority(s)
        .ok_or_else(|| format!("unknown priority '{s}' (expected none, low, medium or high)"))
}

fn tag_set(tags: &[String]) -> IndexSet<TagId> {
    tags.iter().map(|t| TagId::from(t.as_str())).collect()
}

/// Translate a write command into the intent it stands for
pub(super) fn intent_for(command: Commands) -> Result<Intent, Box<dyn std::error::Error>> {
    let intent = match command {
        Commands::Add(args) => {
            let position = match (args.top, args.after) {
                (_, Some(after)) => InsertPosition::After(TaskId::from(after)),
                (true, None) => InsertPosition::Top,
                (false, None) => InsertPosition::Bottom,
            };
            let task = NewTask {
                title: args.title,
                list_id: ListId::from(args.list),
                group_id: args.group.map(GroupId::from),
                parent_id: args.parent.map(TaskId::from),
                description: args.description,
                priority: args.priority.as_deref().map(parse_priority).transpose()?.unwrap_or_default(),
                deadline: args.deadline.as_deref().map(parse_deadline).transpose()?,
                tags: args.tags.into_iter().map(TagId::from).collect(),
            };
            Intent::Add { task, position }
        }
        Commands::Done(args) => Intent::Toggle {
            id: args.id.into(),
            completed: true,
        },
        Commands::Undone(args) => Intent::Toggle {
            id: args.id.into(),
            completed: false,
        },
        Commands::Edit(args) => {
            let deadline = if args.clear_deadline {
                Some(None)
            } else {
                args.deadline.as_deref().map(parse_deadline).transpose()?.map(Some)
            };
            let is_pinned = match (args.pin, args.unpin) {
                (true, _) => Some(true),
                (false, true) => Some(false),
                (false, false) => None,
            };
            let patch = TaskPatch {
                title: args.title,
                description: args.description.map(Some),
                priority: args.priority.as_deref().map(parse_priority).transpose()?,
                deadline,
                tags: (!args.tags.is_empty()).then(|| tag_set(&args.tags)),
                is_pinned,
                ..Default::default()
            };
            if patch.is_empty() {
                return Err("nothing to change: pass at least one field".into());
            }
            Intent::Change {
                id: args.id.into(),
                patch,
            }
        }
        Commands::Rm(args) => Intent::Delete { id: args.id.into() },
        Commands::Restore(args) => Intent::Restore { id: args.id.into() },
        Commands::Purge(args) => match args.id {
            Some(id) if !args.all => Intent::HardDelete { id: id.into() },
            _ => Intent::EmptyBin,
        },
        Commands::Mv(args) => {
            let id = TaskId::from(args.id);
            if let Some(list) = args.to_list {
                Intent::MoveToList {
                    id,
                    list: list.into(),
                    group: args.group.map(GroupId::from),
                }
            } else if args.group.is_some() || args.ungroup {
                Intent::MoveToGroup {
                    id,
                    group: args.group.map(GroupId::from),
                }
            } else if let Some(target) = args.target {
                Intent::Reorder {
                    dragged: id,
                    target: target.into(),
                }
            } else {
                return Err("mv needs a target task, --group, --ungroup or --to-list".into());
            }
        }
        Commands::Parent(args) => Intent::SetParent {
            id: args.id.into(),
            parent: args.parent.map(TaskId::from),
        },
        Commands::CompleteAll(args) => Intent::CompleteAll {
            list: args.list.map(ListId::from),
            filter: parse_filter(&args.filter)?,
            completed: !args.undo,
        },
        Commands::ClearCompleted(args) => Intent::DeleteAllCompleted {
            list: args.list.map(ListId::from),
        },
        _ => return Err("not a write command".into()),
    };
    Ok(intent)
}

/// Dispatch `intent`, wait for the server, and report the outcome. A failed
/// persistence call is an error even though the local change was applied.
pub(super) async fn apply(session: &mut Session, intent: Intent, json: bool) -> CmdResult {
    let mut failures = session.subscribe(Topic::Persistence);
    let kind = intent.kind();
    let subject = match &intent {
        Intent::Change { id, .. }
        | Intent::Toggle { id, .. }
        | Intent::Delete { id }
        | Intent::Restore { id }
        | Intent::SetParent { id, .. }
        | Intent::MoveToGroup { id, .. }
        | Intent::MoveToList { id, .. } => Some(id.clone()),
        Intent::Reorder { dragged, .. } => Some(dragged.clone()),
        _ => None,
    };

    let dispatched = session.dispatch(intent)?;
    session.settle().await;
    if let Some(SessionEvent::PersistFailed { error, .. }) = failures.try_recv() {
        return Err(format!("{kind} applied locally but not saved: {error}").into());
    }

    let task_id = dispatched
        .task
        .map(|id| session.resolved_id(&id).cloned().unwrap_or(id))
        .or(subject);
    let task = task_id.as_ref().and_then(|id| session.store().task(id));
    if json {
        let out = WriteJson {
            intent: kind,
            task,
            persisted: dispatched.op.is_some(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if dispatched.op.is_none() {
        println!("nothing changed");
    } else {
        match task {
            Some(t) => println!("{kind}: {} ({})", t.title, t.id),
            None => println!("{kind}: done"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn intent(args: &[&str]) -> Result<Intent, Box<dyn std::error::Error>> {
        let cli = Cli::try_parse_from(args)?;
        intent_for(cli.command)
    }

    #[test]
    fn add_builds_new_task() {
        let Intent::Add { task, position } = intent(&[
            "tn", "add", "Buy milk", "--list", "L1", "--priority", "high", "--tag", "home", "--top",
        ])
        .unwrap() else {
            panic!("expected add");
        };
        assert_eq!(task.title, "Buy milk");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.tags, vec![TagId::from("home")]);
        assert_eq!(position, InsertPosition::Top);
    }

    #[test]
    fn edit_needs_a_field() {
        assert!(intent(&["tn", "edit", "t1"]).is_err());
        let Intent::Change { patch, .. } = intent(&["tn", "edit", "t1", "--pin", "--clear-deadline"]).unwrap()
        else {
            panic!("expected change");
        };
        assert_eq!(patch.is_pinned, Some(true));
        assert_eq!(patch.deadline, Some(None));
    }

    #[test]
    fn mv_variants() {
        assert_eq!(
            intent(&["tn", "mv", "a", "b"]).unwrap(),
            Intent::Reorder {
                dragged: "a".into(),
                target: "b".into()
            }
        );
        assert_eq!(
            intent(&["tn", "mv", "a", "--ungroup"]).unwrap(),
            Intent::MoveToGroup {
                id: "a".into(),
                group: None
            }
        );
        assert!(intent(&["tn", "mv", "a"]).is_err());
    }

    #[test]
    fn purge_all_empties_bin() {
        assert_eq!(intent(&["tn", "purge", "--all"]).unwrap(), Intent::EmptyBin);
        assert_eq!(
            intent(&["tn", "purge", "x"]).unwrap(),
            Intent::HardDelete { id: "x".into() }
        );
    }
}
