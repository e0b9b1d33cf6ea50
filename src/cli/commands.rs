use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tn", about = concat!("tasknest v", env!("CARGO_PKG_VERSION"), " - nested tasks, synced live"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (default: $TASKNEST_CONFIG or ./tasknest.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List tasks of a list as a tree
    List(ListArgs),
    /// Show the Bin
    Bin,
    /// Add a task
    Add(AddArgs),
    /// Mark a task and its subtree done
    Done(IdArg),
    /// Mark a task and its subtree not done
    Undone(IdArg),
    /// Change task fields
    Edit(EditArgs),
    /// Move a task (and its subtree) to the Bin
    Rm(IdArg),
    /// Bring a task back from the Bin
    Restore(IdArg),
    /// Permanently delete binned tasks
    Purge(PurgeArgs),
    /// Drag a task onto another, or move it to a group or list
    Mv(MvArgs),
    /// Set or clear a task's parent
    Parent(ParentArgs),
    /// Set completion on every matching task
    CompleteAll(CompleteAllArgs),
    /// Move every completed task to the Bin
    ClearCompleted(ListScope),
    /// Validate hierarchy invariants
    Check,
    /// Stream live changes and reprint the tree
    Watch(WatchArgs),
    /// Store an auth token
    Login(LoginArgs),
    /// Forget the stored auth token
    Logout,
}

// ---------------------------------------------------------------------------
// Read command args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct ListArgs {
    /// List to show (default: every list)
    #[arg(long)]
    pub list: Option<String>,
    /// all, completed, uncompleted or overdue
    #[arg(long, default_value = "all")]
    pub filter: String,
    /// Only tasks carrying this tag (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// Only tasks whose title matches this regex
    #[arg(long)]
    pub search: Option<String>,
    /// Split the output into sections
    #[arg(long, value_enum)]
    pub group_by: Option<GroupBy>,
    /// Hide the children of this task (repeatable)
    #[arg(long = "collapse")]
    pub collapsed: Vec<String>,
    /// Show per-list counts instead of tasks
    #[arg(long)]
    pub counts: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum GroupBy {
    Group,
    Priority,
    Deadline,
    Tag,
}

#[derive(Args)]
pub struct WatchArgs {
    /// List to show (default: every list)
    #[arg(long)]
    pub list: Option<String>,
}

// ---------------------------------------------------------------------------
// Write command args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct IdArg {
    /// Task ID
    pub id: String,
}

#[derive(Args)]
pub struct AddArgs {
    /// Task title
    pub title: String,
    /// List to add to
    #[arg(long)]
    pub list: String,
    /// Parent task ID
    #[arg(long)]
    pub parent: Option<String>,
    /// Group ID
    #[arg(long)]
    pub group: Option<String>,
    /// none, low, medium or high
    #[arg(long)]
    pub priority: Option<String>,
    /// Deadline (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub deadline: Option<String>,
    /// Tag ID (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Insert at the top instead of the bottom
    #[arg(long, conflicts_with = "after")]
    pub top: bool,
    /// Insert after this task
    #[arg(long)]
    pub after: Option<String>,
}

#[derive(Args)]
pub struct EditArgs {
    /// Task ID
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// none, low, medium or high
    #[arg(long)]
    pub priority: Option<String>,
    /// Deadline (YYYY-MM-DD or RFC 3339)
    #[arg(long, conflicts_with = "clear_deadline")]
    pub deadline: Option<String>,
    #[arg(long)]
    pub clear_deadline: bool,
    /// Replace the tag set (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    #[arg(long, conflicts_with = "unpin")]
    pub pin: bool,
    #[arg(long)]
    pub unpin: bool,
}

#[derive(Args)]
pub struct PurgeArgs {
    /// Binned task ID
    #[arg(required_unless_present = "all")]
    pub id: Option<String>,
    /// Empty the whole Bin
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct MvArgs {
    /// Task ID
    pub id: String,
    /// Drop onto this task
    #[arg(conflicts_with_all = ["group", "ungroup", "to_list"])]
    pub target: Option<String>,
    /// Move into this group
    #[arg(long, conflicts_with = "ungroup")]
    pub group: Option<String>,
    /// Move out of its group
    #[arg(long)]
    pub ungroup: bool,
    /// Move to another list
    #[arg(long)]
    pub to_list: Option<String>,
}

#[derive(Args)]
pub struct ParentArgs {
    /// Task ID
    pub id: String,
    /// New parent (omit to make the task a root)
    pub parent: Option<String>,
}

#[derive(Args)]
pub struct ListScope {
    /// Only this list
    #[arg(long)]
    pub list: Option<String>,
}

#[derive(Args)]
pub struct CompleteAllArgs {
    /// Only this list
    #[arg(long)]
    pub list: Option<String>,
    /// all, completed, uncompleted or overdue
    #[arg(long, default_value = "uncompleted")]
    pub filter: String,
    /// Mark not done instead
    #[arg(long)]
    pub undo: bool,
}

#[derive(Args)]
pub struct LoginArgs {
    /// Bearer token issued by the server
    pub token: String,
}
