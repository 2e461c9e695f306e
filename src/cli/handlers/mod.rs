mod init;
pub use init::cmd_init;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Global override for the vault directory (set by -C flag)
static VAULT_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

use crate::cli::commands::*;
use crate::cli::output::*;
use crate::io::lock::VaultLock;
use crate::io::recovery::{self, RecoveryEntry};
use crate::io::vault_io::{self, VaultError};
use crate::model::node::{NewNode, NodePatch};
use crate::model::vault::Vault;
use crate::ops::{
    DeleteMode, ListQuery, NodeFilter, ParentScope, SearchQuery, SortKey, SyncEngine,
};
use crate::parse::parse_due;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let json = cli.json;

    // Store -C override for start_dir()
    if let Some(ref dir) = cli.vault_dir {
        let abs = std::fs::canonicalize(dir)
            .map_err(|e| format!("cannot resolve -C path '{}': {}", dir, e))?;
        VAULT_DIR_OVERRIDE
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(abs);
    }

    match cli.command {
        Commands::Init(args) => cmd_init(args, json),

        // Read commands
        Commands::Show(args) => cmd_show(args, json),
        Commands::Ls(args) => cmd_ls(args, json),
        Commands::Tree(args) => cmd_tree(args, json),
        Commands::Search(args) => cmd_search(args, json),
        Commands::Deps(args) => cmd_deps(args, json),
        Commands::Backlinks(args) => cmd_backlinks(args, json),
        Commands::Events(args) => cmd_events(args, json),
        Commands::Graph => cmd_graph(json),

        // Write commands
        Commands::Add(args) => cmd_add(args, json),
        Commands::Edit(args) => cmd_edit(args, json),
        Commands::Rm(args) => cmd_rm(args, json),
        Commands::Mv(args) => cmd_mv(args, json),
        Commands::Link(args) => cmd_link(args, json),
        Commands::Unlink(args) => cmd_unlink(args, json),
        Commands::Tz(args) => cmd_tz(args, json),

        // Maintenance
        Commands::Sync => cmd_sync(json),
        Commands::Watch => cmd_watch(),
        Commands::Recovery(args) => cmd_recovery(args, json),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn start_dir() -> Result<PathBuf, std::io::Error> {
    let over = VAULT_DIR_OVERRIDE.lock().unwrap_or_else(|e| e.into_inner());
    match over.as_ref() {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir(),
    }
}

fn load_vault_cwd() -> Result<Vault, VaultError> {
    let start = start_dir()?;
    let root = vault_io::discover_vault(&start)?;
    vault_io::load_vault(&root)
}

/// Index the vault while holding its write lock. Opening may itself write
/// (minted ids, chore rollover), so every command takes the lock.
fn open_engine() -> Result<(SyncEngine, VaultLock), Box<dyn std::error::Error>> {
    let vault = load_vault_cwd()?;
    let lock = VaultLock::acquire_default(&vault.root)?;
    let engine = SyncEngine::open(vault)?;
    Ok((engine, lock))
}

fn parse_due_arg(value: &str) -> Result<NaiveDateTime, String> {
    parse_due(value).map_err(|e| format!("invalid due date: {}", e))
}

/// RFC 3339, or a bare date meaning midnight UTC
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{}' (expected ISO-8601)", value))
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

fn cmd_show(args: IdArg, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let id = engine.resolve_id(&args.id)?;
    let view = engine.get_node(&id)?;
    let deps = engine.get_dependencies(&id)?;

    if json {
        print_json(&ShowJson {
            view: &view,
            dependencies: &deps,
        })?;
    } else {
        print_lines(&format_node_detail(&view, &deps));
    }
    Ok(())
}

fn cmd_ls(args: LsArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;

    let parent = if args.roots {
        ParentScope::Roots
    } else if let Some(ref parent) = args.parent {
        ParentScope::Children(engine.resolve_id(parent)?)
    } else {
        ParentScope::All
    };
    let has_due_date = match (args.due, args.no_due) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let filter = NodeFilter {
        mode: args.mode.as_deref().map(parse_mode).transpose()?,
        status: args.status.as_deref().map(parse_status).transpose()?,
        priority: args.priority,
        has_due_date,
        tags: args.tags,
        parent,
    };
    let sort = match args.sort {
        SortArg::Created => SortKey::Created,
        SortArg::Title => SortKey::Title,
        SortArg::Priority => SortKey::Priority,
        SortArg::Due => SortKey::DueDate,
        SortArg::Computed => SortKey::Computed,
    };

    let mut views = engine.list_nodes(&ListQuery {
        filter,
        sort,
        descending: args.reverse,
    })?;
    if args.open {
        views.retain(|v| !v.node.is_closed_task());
    }

    if json {
        print_json(&views)?;
    } else {
        for view in &views {
            println!("{}", format_node_line(view));
        }
    }
    Ok(())
}

fn cmd_tree(args: TreeArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let root = args.id.as_deref().map(|id| engine.resolve_id(id)).transpose()?;
    let tree = engine.get_tree(root.as_deref())?;

    if json {
        print_json(&tree)?;
    } else {
        print_lines(&format_tree(&tree));
    }
    Ok(())
}

fn cmd_search(args: SearchArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let query = SearchQuery {
        text: args.query,
        mode: args.mode.as_deref().map(parse_mode).transpose()?,
        status: args.status.as_deref().map(parse_status).transpose()?,
        limit: args.limit,
    };
    let hits = engine.search(&query)?;

    if json {
        print_json(&hits)?;
    } else if hits.is_empty() {
        println!("no matches");
    } else {
        for hit in &hits {
            println!("{}", format_search_hit(hit));
        }
    }
    Ok(())
}

fn cmd_deps(args: IdArg, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let id = engine.resolve_id(&args.id)?;
    let deps = engine.get_dependencies(&id)?;

    if json {
        print_json(&deps)?;
        return Ok(());
    }
    println!("blocked by:");
    if deps.blocked_by.is_empty() {
        println!("  (nothing)");
    }
    for view in &deps.blocked_by {
        println!("  {}", format_node_line(view));
    }
    println!("blocking:");
    if deps.blocking.is_empty() {
        println!("  (nothing)");
    }
    for view in &deps.blocking {
        println!("  {}", format_node_line(view));
    }
    Ok(())
}

fn cmd_backlinks(args: IdArg, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let id = engine.resolve_id(&args.id)?;
    let views = engine.get_backlinks(&id)?;

    if json {
        print_json(&views)?;
    } else {
        for view in &views {
            println!("{}", format_node_line(view));
        }
    }
    Ok(())
}

fn cmd_events(args: IdArg, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let id = engine.resolve_id(&args.id)?;
    let events = engine.get_events(&id)?;

    if json {
        print_json(&events)?;
    } else if events.is_empty() {
        println!("no status changes recorded");
    } else {
        let offset = engine.timezone_offset()?;
        for event in &events {
            println!("{}", format_status_event(event, offset));
        }
    }
    Ok(())
}

fn cmd_graph(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let graph = engine.get_graph()?;

    if json {
        print_json(&graph)?;
    } else {
        print_lines(&format_graph(&graph));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Write commands
// ---------------------------------------------------------------------------

fn cmd_add(args: AddArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;

    let mut fields = if args.note {
        NewNode::note(args.title)
    } else {
        NewNode::task(args.title)
    }
    .with_priority(args.priority);
    if let Some(ref due) = args.due {
        fields = fields.with_due(parse_due_arg(due)?);
    }
    if let Some(ref parent) = args.parent {
        fields = fields.with_parent(engine.resolve_id(parent)?);
    }
    if let Some(content) = args.content {
        fields = fields.with_content(content);
    }
    if let Some(ref status) = args.status {
        fields.status = parse_status(status)?;
    }
    fields.tags = args.tags;

    let view = engine.create_node(fields)?;
    if json {
        print_json(&view)?;
    } else {
        println!("{}", view.id());
    }
    Ok(())
}

fn cmd_edit(args: EditArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let id = engine.resolve_id(&args.id)?;

    let due_date = match (args.due.as_deref(), args.clear_due) {
        (Some(due), _) => Some(Some(parse_due_arg(due)?)),
        (None, true) => Some(None),
        (None, false) => None,
    };
    let tags = if args.clear_tags {
        Some(Vec::new())
    } else if !args.tags.is_empty() {
        Some(args.tags)
    } else {
        None
    };
    let patch = NodePatch {
        title: args.title,
        content: args.content,
        mode: args.mode.as_deref().map(parse_mode).transpose()?,
        status: args.status.as_deref().map(parse_status).transpose()?,
        priority: args.priority,
        due_date,
        tags,
        parent_id: None,
    };
    if patch.is_empty() {
        return Err("nothing to change (see `tn edit --help`)".into());
    }

    let view = engine.update_node(&id, &patch)?;
    if json {
        print_json(&view)?;
    } else {
        println!("{}", format_node_line(&view));
    }
    Ok(())
}

fn cmd_rm(args: RmArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let id = engine.resolve_id(&args.id)?;
    let mode = if args.reparent {
        DeleteMode::Reparent
    } else {
        DeleteMode::Recursive
    };
    let report = engine.delete_node(&id, mode)?;

    if json {
        print_json(&report)?;
    } else {
        print_lines(&format_delete_report(&report));
    }
    Ok(())
}

fn cmd_mv(args: MvArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let id = engine.resolve_id(&args.id)?;
    let parent = args
        .parent
        .as_deref()
        .map(|p| engine.resolve_id(p))
        .transpose()?;
    let view = engine.move_node(&id, parent.as_deref())?;

    if json {
        print_json(&view)?;
    } else {
        match parent {
            Some(p) => println!("{} moved under {}", short_id(&id), short_id(&p)),
            None => println!("{} is now top-level", short_id(&id)),
        }
    }
    Ok(())
}

fn cmd_link(args: LinkArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let source = engine.resolve_id(&args.id)?;
    let target = engine.resolve_id(&args.blocker)?;
    let added = engine.add_dependency(&source, &target)?;

    if json {
        print_json(&serde_json::json!({ "source_id": source, "target_id": target, "added": added }))?;
    } else if added {
        println!("{} is blocked by {}", short_id(&source), short_id(&target));
    } else {
        println!("{} was already blocked by {}", short_id(&source), short_id(&target));
    }
    Ok(())
}

fn cmd_unlink(args: LinkArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let source = engine.resolve_id(&args.id)?;
    let target = engine.resolve_id(&args.blocker)?;
    let removed = engine.remove_dependency(&source, &target)?;

    if json {
        print_json(&serde_json::json!({ "source_id": source, "target_id": target, "removed": removed }))?;
    } else if removed {
        println!("{} is no longer blocked by {}", short_id(&source), short_id(&target));
    } else {
        println!("{} was not blocked by {}", short_id(&source), short_id(&target));
    }
    Ok(())
}

fn cmd_tz(args: TzArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let minutes = match args.minutes {
        Some(minutes) => {
            let (engine, _lock) = open_engine()?;
            engine.set_timezone_offset(minutes)?;
            minutes
        }
        None => load_vault_cwd()?.offset().minutes(),
    };

    if json {
        print_json(&TzJson {
            offset_minutes: minutes,
        })?;
    } else {
        let sign = if minutes < 0 { '-' } else { '+' };
        println!(
            "UTC{}{:02}:{:02} ({} minutes)",
            sign,
            minutes.abs() / 60,
            minutes.abs() % 60,
            minutes
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

fn cmd_sync(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _lock) = open_engine()?;
    let stats = engine.initial_scan();

    if json {
        print_json(&stats)?;
    } else {
        println!("{}", format_sync_stats(&stats));
    }
    Ok(())
}

fn cmd_watch() -> Result<(), Box<dyn std::error::Error>> {
    let vault = load_vault_cwd()?;
    let engine = {
        // the lock covers the initial scan only; the watcher runs alongside
        // other tn invocations
        let _lock = VaultLock::acquire_default(&vault.root)?;
        Arc::new(SyncEngine::open(vault)?)
    };
    let _watch = engine.start_watching()?;
    eprintln!(
        "watching {} (Ctrl-C to stop)",
        engine.vault().nodes_dir().display()
    );
    loop {
        std::thread::park();
    }
}

fn cmd_recovery(args: RecoveryCmd, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let vault = load_vault_cwd()?;

    match args.action {
        Some(RecoveryAction::Path) => {
            println!("{}", recovery::recovery_log_path(&vault.root).display());
        }
        Some(RecoveryAction::Prune(prune)) => {
            let _lock = VaultLock::acquire_default(&vault.root)?;
            let before = prune.before.as_deref().map(parse_timestamp).transpose()?;
            let removed = recovery::prune_recovery(&vault.root, before, prune.all)?;
            if json {
                print_json(&serde_json::json!({ "removed": removed }))?;
            } else {
                println!(
                    "pruned {} entr{}",
                    removed,
                    if removed == 1 { "y" } else { "ies" }
                );
            }
        }
        None => {
            let since = args.since.as_deref().map(parse_timestamp).transpose()?;
            let mut entries = recovery::read_recovery_entries(&vault.root, None);
            if let Some(since) = since {
                entries.retain(|e| e.timestamp > since);
            }
            entries.truncate(args.limit.unwrap_or(10));

            if json {
                let items: Vec<serde_json::Value> = entries.iter().map(RecoveryEntry::to_json).collect();
                print_json(&items)?;
            } else if entries.is_empty() {
                println!("recovery log is empty");
            } else {
                for entry in &entries {
                    print!("{}", format_recovery_entry(entry));
                }
            }
        }
    }
    Ok(())
}
