mod watch;
mod write;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;

use crate::cli::commands::*;
use crate::cli::output::*;
use crate::io::api::HttpTodoApi;
use crate::io::{config_io, token};
use crate::model::config::ClientConfig;
use crate::model::ids::{ListId, TagId, TaskId, UuidGenerator};
use crate::model::store::TaskStore;
use crate::model::task::Task;
use crate::ops::task_ops::CompletionFilter;
use crate::ops::views::{self, TaskQuery};
use crate::ops::{bin, check};
use crate::sync::clock::SystemClock;
use crate::sync::session::Session;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Everything a command needs besides its arguments
pub struct Context {
    pub config: ClientConfig,
    pub token: Option<String>,
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(cli: Cli) -> CmdResult {
    let config_path = config_io::config_path(cli.config.as_deref().map(Path::new));
    let token_path = token::token_path(&config_path);

    // token management works without a server
    match &cli.command {
        Commands::Login(args) => {
            token::save_token(&token_path, &args.token)?;
            println!("token saved to {}", token_path.display());
            return Ok(());
        }
        Commands::Logout => {
            if token::clear_token(&token_path)? {
                println!("token removed");
            } else {
                println!("no stored token");
            }
            return Ok(());
        }
        _ => {}
    }

    let ctx = Context {
        config: config_io::load_config(&config_path)?,
        token: token::load_token(&config_path)?,
        json: cli.json,
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(ctx, cli.command))
}

async fn run(ctx: Context, command: Commands) -> CmdResult {
    let mut session = open_session(&ctx).await?;
    let json = ctx.json;
    match command {
        // Read commands
        Commands::List(args) => cmd_list(&session, &args, json),
        Commands::Bin => cmd_bin(&session, json),
        Commands::Check => cmd_check(&session, json),
        Commands::Watch(args) => watch::cmd_watch(&ctx, session, args).await,

        // Write commands
        Commands::Login(_) | Commands::Logout => Ok(()),
        other => {
            let intent = write::intent_for(other)?;
            write::apply(&mut session, intent, json).await
        }
    }
}

async fn open_session(ctx: &Context) -> Result<Session, Box<dyn std::error::Error>> {
    let api = HttpTodoApi::new(ctx.config.server.clone(), ctx.token.clone())?;
    let mut session = Session::new(
        Arc::new(api),
        Arc::new(UuidGenerator),
        Arc::new(SystemClock),
        &ctx.config.sync,
    );
    session.load().await?;
    Ok(session)
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

/// The requested list, or every list known to the store or named by a task
fn target_lists(store: &TaskStore, list: Option<&str>) -> Vec<ListId> {
    if let Some(list) = list {
        return vec![ListId::from(list)];
    }
    let mut seen = HashSet::new();
    store
        .lists()
        .map(|l| l.id.clone())
        .chain(store.tasks().map(|t| t.list_id.clone()))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

fn parse_filter(s: &str) -> Result<CompletionFilter, String> {
    CompletionFilter::parse_filter(s)
        .ok_or_else(|| format!("unknown filter '{s}' (expected all, completed, uncompleted or overdue)"))
}

fn cmd_list(session: &Session, args: &ListArgs, json: bool) -> CmdResult {
    let store = session.store();
    let now = session.clock().now();
    let lists = target_lists(store, args.list.as_deref());

    if args.counts {
        let counts: Vec<ListCountsJson> = lists
            .iter()
            .map(|id| ListCountsJson {
                list: id.to_string(),
                name: list_heading(store, id),
                counts: views::list_counts(store, id, now),
            })
            .collect();
        if json {
            println!("{}", serde_json::to_string_pretty(&counts)?);
        } else {
            for c in &counts {
                println!("{}", format_counts(&c.name, &c.counts));
            }
        }
        return Ok(());
    }

    let rendered = render_lists(store, args, now)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        for line in list_lines(&rendered) {
            println!("{}", line);
        }
    }
    Ok(())
}

/// Filter, section and flatten every target list
fn render_lists<'a>(
    store: &'a TaskStore,
    args: &ListArgs,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<ListJson<'a>>, Box<dyn std::error::Error>> {
    let query = TaskQuery {
        completion: parse_filter(&args.filter)?,
        tags: args.tags.iter().map(|t| TagId::from(t.as_str())).collect(),
        search: args.search.as_deref().map(Regex::new).transpose()?,
        ..Default::default()
    };
    let collapsed: HashSet<TaskId> = args
        .collapsed
        .iter()
        .map(|id| TaskId::from(id.as_str()))
        .collect();

    let mut out = Vec::new();
    for list in target_lists(store, args.list.as_deref()) {
        let active = views::active_list_tasks(store, &list);
        let tasks = views::pinned_first(&views::filter_tasks(&active, &query, now));
        let sections: Vec<(String, Vec<&Task>)> = match args.group_by {
            None => vec![(String::new(), tasks)],
            Some(GroupBy::Group) => views::group_by_group(store, &tasks, &list)
                .into_iter()
                .map(|s| (s.title, s.tasks))
                .collect(),
            Some(GroupBy::Priority) => views::group_by_priority(&tasks)
                .into_iter()
                .map(|s| (s.title, s.tasks))
                .collect(),
            Some(GroupBy::Deadline) => views::group_by_deadline(&tasks, now)
                .into_iter()
                .map(|s| (s.title, s.tasks))
                .collect(),
            Some(GroupBy::Tag) => views::group_by_tag(store, &tasks)
                .into_iter()
                .map(|s| (s.title, s.tasks))
                .collect(),
        };
        out.push(ListJson {
            list: list.to_string(),
            name: list_heading(store, &list),
            sections: sections
                .into_iter()
                .map(|(title, tasks)| SectionJson {
                    title,
                    rows: views::flatten_hierarchy(store, &tasks, &collapsed),
                })
                .collect(),
        });
    }
    Ok(out)
}

fn list_lines(lists: &[ListJson]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, list) in lists.iter().enumerate() {
        if i > 0 {
            lines.push(String::new());
        }
        lines.push(format!("{} ({})", list.name, list.list));
        for section in &list.sections {
            if !section.title.is_empty() {
                lines.push(format!("-- {} --", section.title));
            }
            lines.extend(format_rows(&section.rows));
        }
    }
    lines
}

fn cmd_bin(session: &Session, json: bool) -> CmdResult {
    let binned: Vec<&Task> = bin::bin_tasks(session.store()).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&binned)?);
    } else if binned.is_empty() {
        println!("Bin is empty.");
    } else {
        for line in format_bin(&binned) {
            println!("{}", line);
        }
    }
    Ok(())
}

fn cmd_check(session: &Session, json: bool) -> CmdResult {
    let result = check::check_store(session.store());
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for line in format_check(&result) {
            println!("{}", line);
        }
    }
    if !result.valid {
        return Err(format!("{} invariant violation(s)", result.errors.len()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, list: &str) -> Task {
        Task::new(id.into(), id, list.into())
    }

    #[test]
    fn target_lists_cover_task_lists() {
        let store = TaskStore::from_tasks(vec![task("a", "L2"), task("b", "L1"), task("c", "L2")]);
        assert_eq!(
            target_lists(&store, None),
            vec![ListId::from("L2"), ListId::from("L1")]
        );
        assert_eq!(target_lists(&store, Some("L9")), vec![ListId::from("L9")]);
    }

    #[test]
    fn unknown_filter_is_rejected() {
        assert!(parse_filter("overdue").is_ok());
        assert!(parse_filter("someday").is_err());
    }
}
