use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tn", about = concat!("tasknotes v", env!("CARGO_PKG_VERSION"), " - tasks and notes as plain files"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run against a different vault directory
    #[arg(short = 'C', long = "vault-dir", global = true)]
    pub vault_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new vault in the current directory
    Init(InitArgs),
    /// Create a task or note
    Add(AddArgs),
    /// Show a node with its derived values and dependencies
    Show(IdArg),
    /// Change fields of a node
    Edit(EditArgs),
    /// Delete a node and archive its file
    Rm(RmArgs),
    /// Move a node under a new parent, or to the top level
    Mv(MvArgs),
    /// List nodes
    Ls(LsArgs),
    /// Show the node hierarchy
    Tree(TreeArgs),
    /// Search titles, content and tags
    Search(SearchArgs),
    /// Show what a node waits on and what waits on it
    Deps(IdArg),
    /// Mark a node as blocked by another
    Link(LinkArgs),
    /// Remove a blocked-by link
    Unlink(LinkArgs),
    /// List nodes that link to a node with [[Title]]
    Backlinks(IdArg),
    /// Show a node's status changes, newest first
    Events(IdArg),
    /// Show or set the vault's offset from UTC
    Tz(TzArgs),
    /// Dump every node and edge
    Graph,
    /// Rescan the node directory
    Sync,
    /// Keep the index live and report file changes until interrupted
    Watch,
    /// View or manage the recovery log
    Recovery(RecoveryCmd),
}

// ---------------------------------------------------------------------------
// Shared args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct IdArg {
    /// Node id (a unique prefix is enough)
    pub id: String,
}

#[derive(Args)]
pub struct InitArgs {
    /// Vault name (default: inferred from directory name)
    #[arg(long)]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Write command args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct AddArgs {
    /// Title
    pub title: String,
    /// Create a note instead of a task
    #[arg(long)]
    pub note: bool,
    /// Priority from 1 (highest) to 5 (chore)
    #[arg(short, long, default_value_t = 3)]
    pub priority: u8,
    /// Due date: YYYY-MM-DD or YYYY-MM-DDTHH:MM[:SS]
    #[arg(long)]
    pub due: Option<String>,
    /// Parent node id
    #[arg(long)]
    pub parent: Option<String>,
    /// Tag (repeatable)
    #[arg(long = "tag", short = 't')]
    pub tags: Vec<String>,
    /// Body text
    #[arg(long)]
    pub content: Option<String>,
    /// Initial status (todo, in_progress, done, cancelled)
    #[arg(long)]
    pub status: Option<String>,
}

#[derive(Args)]
pub struct EditArgs {
    /// Node id
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    /// Replace the body text
    #[arg(long)]
    pub content: Option<String>,
    /// task or note
    #[arg(long)]
    pub mode: Option<String>,
    /// todo, in_progress, done or cancelled
    #[arg(long)]
    pub status: Option<String>,
    #[arg(short, long)]
    pub priority: Option<u8>,
    /// Due date: YYYY-MM-DD or YYYY-MM-DDTHH:MM[:SS]
    #[arg(long, conflicts_with = "clear_due")]
    pub due: Option<String>,
    /// Remove the due date
    #[arg(long)]
    pub clear_due: bool,
    /// Replace the tags (repeatable)
    #[arg(long = "tag", short = 't')]
    pub tags: Vec<String>,
    /// Remove all tags
    #[arg(long, conflicts_with = "tags")]
    pub clear_tags: bool,
}

#[derive(Args)]
pub struct RmArgs {
    /// Node id
    pub id: String,
    /// Keep the children, handing them to the deleted node's parent
    #[arg(long)]
    pub reparent: bool,
}

#[derive(Args)]
pub struct MvArgs {
    /// Node id
    pub id: String,
    /// New parent id (omit to make the node top-level)
    pub parent: Option<String>,
}

#[derive(Args)]
pub struct LinkArgs {
    /// The node that is blocked
    pub id: String,
    /// The node it waits on
    pub blocker: String,
}

#[derive(Args)]
pub struct TzArgs {
    /// Offset from UTC in minutes, e.g. -300 or 60
    #[arg(allow_hyphen_values = true)]
    pub minutes: Option<i32>,
}

// ---------------------------------------------------------------------------
// Read command args
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Default, ValueEnum)]
pub enum SortArg {
    Created,
    Title,
    Priority,
    Due,
    /// Computed priority, most pressing first
    #[default]
    Computed,
}

#[derive(Args)]
pub struct LsArgs {
    /// Filter by mode (task, note)
    #[arg(long)]
    pub mode: Option<String>,
    /// Filter by status (todo, in_progress, done, cancelled)
    #[arg(long)]
    pub status: Option<String>,
    /// Filter by raw priority
    #[arg(short, long)]
    pub priority: Option<u8>,
    /// Filter by tag (repeatable, matches any)
    #[arg(long = "tag", short = 't')]
    pub tags: Vec<String>,
    /// Only nodes with a due date
    #[arg(long, conflicts_with = "no_due")]
    pub due: bool,
    /// Only nodes without a due date
    #[arg(long)]
    pub no_due: bool,
    /// Only top-level nodes
    #[arg(long, conflicts_with = "parent")]
    pub roots: bool,
    /// Only direct children of this node
    #[arg(long)]
    pub parent: Option<String>,
    #[arg(long, value_enum, default_value_t)]
    pub sort: SortArg,
    /// Reverse the order
    #[arg(long, short)]
    pub reverse: bool,
    /// Hide done and cancelled tasks
    #[arg(long)]
    pub open: bool,
}

#[derive(Args)]
pub struct TreeArgs {
    /// Show only the subtree under this node
    pub id: Option<String>,
}

#[derive(Args)]
pub struct SearchArgs {
    /// Text to look for (literal, case-insensitive)
    pub query: String,
    /// Filter by mode (task, note)
    #[arg(long)]
    pub mode: Option<String>,
    /// Filter by status
    #[arg(long)]
    pub status: Option<String>,
    /// Maximum number of results
    #[arg(long)]
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Recovery log
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct RecoveryCmd {
    #[command(subcommand)]
    pub action: Option<RecoveryAction>,
    /// Maximum number of entries to show (default: 10)
    #[arg(long)]
    pub limit: Option<usize>,
    /// Show entries after this timestamp (ISO-8601)
    #[arg(long)]
    pub since: Option<String>,
}

#[derive(Subcommand)]
pub enum RecoveryAction {
    /// Remove old entries
    Prune(RecoveryPruneArgs),
    /// Print the absolute path to the recovery log
    Path,
}

#[derive(Args)]
pub struct RecoveryPruneArgs {
    /// Remove entries older than this timestamp (default: 30 days ago)
    #[arg(long)]
    pub before: Option<String>,
    /// Remove all entries
    #[arg(long)]
    pub all: bool,
}
