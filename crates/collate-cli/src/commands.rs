use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use collate_args::ArgFile;
use collate_collective::LocalCollective;
use collate_results::{load_dataset, BadChild, ManagerConfig, ResultsManager};
use collate_store::ObjectReader;
use serde_json::json;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => ManagerConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ManagerConfig::default(),
    };
    let format = cli.format;
    match cli.command {
        Command::Init(args) => cmd_init(args, config, format),
        Command::Status(args) => cmd_status(args, config, format),
        Command::Merge(args) => cmd_merge(args, config, format).await,
        Command::Show(args) => cmd_show(args, format),
        Command::Inspect(args) => cmd_inspect(args, format),
        Command::Cleanup(args) => cmd_cleanup(args, config, format),
        Command::Args(args) => cmd_args(args, format),
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn print_json(value: serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_init(args: InitArgs, config: ManagerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let manager = ResultsManager::create_with(args.total_tasks, &args.dir, config)?;
    if format == OutputFormat::Json {
        return print_json(json!({
            "directory": display(manager.directory()),
            "total_tasks": manager.total_tasks(),
            "dataset": display(manager.dataset_path()),
        }));
    }
    println!(
        "{} Initialized run in {} ({} tasks)",
        "✓".green().bold(),
        manager.directory().display().to_string().bold(),
        manager.total_tasks()
    );
    println!("  Dataset: {}", manager.dataset_path().display().to_string().cyan());
    Ok(())
}

fn cmd_status(args: StatusArgs, config: ManagerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let manager = ResultsManager::restore_with(&args.dir, config)?;
    let missing = manager.missing_ids();
    let merged = manager.dataset_path().is_file();
    if format == OutputFormat::Json {
        return print_json(json!({
            "directory": display(manager.directory()),
            "total_tasks": manager.total_tasks(),
            "shards": manager.children().len(),
            "missing": missing,
            "merged": merged,
        }));
    }

    println!("Run {}", manager.directory().display().to_string().bold());
    println!(
        "  Shards: {}/{}",
        manager.children().len().to_string().bold(),
        manager.total_tasks()
    );
    if missing.is_empty() {
        println!("  Missing: {}", "none".green());
    } else {
        println!("  Missing: {} {}", missing.len().to_string().yellow(), format_ids(&missing).dimmed());
    }
    let dataset = if merged { "written".green() } else { "not written".yellow() };
    println!("  Dataset: {}", dataset);
    Ok(())
}

async fn cmd_merge(args: MergeArgs, config: ManagerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let workers = args.workers.unwrap_or(config.workers).max(1);
    let mut manager = ResultsManager::restore_with(&args.dir, config.clone())?;

    let bad = if workers == 1 {
        manager.concatenate()?
    } else {
        let members: Vec<Arc<LocalCollective>> = LocalCollective::group(workers, config.collective_config())?
            .into_iter()
            .map(Arc::new)
            .collect();
        let mut handles = Vec::with_capacity(workers - 1);
        for member in members.iter().skip(1).cloned() {
            let mut peer = ResultsManager::restore_with(&args.dir, config.clone())?;
            handles.push(tokio::spawn(async move {
                peer.parallel_concatenate(member.as_ref(), 0).await
            }));
        }
        let bad = manager.parallel_concatenate(members[0].as_ref(), 0).await?;
        for handle in handles {
            handle.await??;
        }
        bad
    };

    if args.cleanup {
        manager.cleanup()?;
    }

    if format == OutputFormat::Json {
        return print_json(json!({
            "dataset": display(manager.dataset_path()),
            "workers": workers,
            "bad_children": bad,
            "cleaned": args.cleanup,
        }));
    }
    println!(
        "{} Merged into {} ({} workers)",
        "✓".green().bold(),
        manager.dataset_path().display().to_string().bold(),
        workers
    );
    print_bad_children(&bad);
    if args.cleanup {
        println!("  Removed {}", manager.directory().display());
    }
    Ok(())
}

fn print_bad_children(bad: &[BadChild]) {
    if bad.is_empty() {
        return;
    }
    println!("  {} {} bad children:", "!".yellow().bold(), bad.len());
    for child in bad {
        println!("    {} {}: {}", child.id.to_string().yellow(), child.path.display(), child.reason.dimmed());
    }
}

fn cmd_show(args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    let tree = load_dataset(&args.dataset).with_context(|| format!("reading {}", args.dataset.display()))?;
    let shapes = tree.leaf_shapes();
    if format == OutputFormat::Json {
        let leaves: Vec<_> = shapes
            .iter()
            .map(|(path, shape)| json!({ "path": path, "shape": shape }))
            .collect();
        return print_json(json!({ "leaves": leaves }));
    }
    if shapes.is_empty() {
        println!("{} (empty dataset)", args.dataset.display());
        return Ok(());
    }
    for (path, shape) in shapes {
        println!("{}  {:?}", path.bold(), shape);
    }
    Ok(())
}

fn cmd_inspect(args: InspectArgs, format: OutputFormat) -> anyhow::Result<()> {
    let reader = ObjectReader::open(&args.store)?;
    if format == OutputFormat::Json {
        return print_json(json!({
            "path": display(reader.path()),
            "objects": reader.len(),
            "count_hint": reader.count_hint(),
            "index_offset": reader.index_offset(),
            "offsets": reader.offsets(),
        }));
    }
    println!("Store {}", reader.path().display().to_string().bold());
    println!("  Objects: {} (hint {})", reader.len().to_string().bold(), reader.count_hint());
    println!("  Index at: {}", reader.index_offset().to_string().cyan());
    for (i, offset) in reader.offsets().iter().enumerate() {
        println!("  {:>6}  {}", i, offset);
    }
    Ok(())
}

fn cmd_cleanup(args: CleanupArgs, config: ManagerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let mut manager = ResultsManager::restore_with(&args.dir, config)?;
    manager
        .adopt_existing_dataset()
        .context("refusing to remove a run that has not been merged")?;
    manager.cleanup()?;
    if format == OutputFormat::Json {
        return print_json(json!({ "removed": display(manager.directory()) }));
    }
    println!("{} Removed {}", "✓".green().bold(), manager.directory().display());
    Ok(())
}

fn cmd_args(args: ArgsArgs, format: OutputFormat) -> anyhow::Result<()> {
    match args.action {
        ArgsAction::Show { file, index: Some(index) } => {
            let set = ArgFile::get(&file, index)?;
            if format == OutputFormat::Json {
                return print_json(json!({ "index": index, "args": set }));
            }
            println!("{} [{}]", file.display().to_string().bold(), index);
            for (key, value) in &set {
                println!("  {} = {}", key.cyan(), value);
            }
            Ok(())
        }
        ArgsAction::Show { file, index: None } => {
            let arg_file = ArgFile::open_with_args(&file)?;
            if format == OutputFormat::Json {
                return print_json(json!({
                    "name": arg_file.name(),
                    "meta": arg_file.meta(),
                    "args": arg_file.args(),
                }));
            }
            println!("{} ({} sets)", arg_file.name().bold(), arg_file.len());
            for (key, value) in arg_file.meta() {
                println!("  {}: {}", key.dimmed(), value);
            }
            for (i, set) in arg_file.args().iter().enumerate() {
                let fields: Vec<String> = set.iter().map(|(k, v)| format!("{k}={v}")).collect();
                println!("  {:>4}  {}", i, fields.join(" "));
            }
            Ok(())
        }
        ArgsAction::Split { file, parts } => {
            let mut arg_file = ArgFile::open(&file)?;
            let pieces = arg_file.split(parts)?;
            if format == OutputFormat::Json {
                let written: Vec<_> = pieces
                    .iter()
                    .map(|p| json!({ "path": display(&p.path()), "sets": p.len() }))
                    .collect();
                return print_json(json!({ "parts": written }));
            }
            println!("{} Split {} into {} parts", "✓".green().bold(), arg_file.name().bold(), pieces.len());
            for piece in &pieces {
                println!("  {} ({} sets)", piece.path().display(), piece.len());
            }
            Ok(())
        }
    }
}

/// Compact id list: runs of consecutive ids print as `a-b`.
fn format_ids(ids: &[u64]) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut iter = ids.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        out.push(if start == end { start.to_string() } else { format!("{start}-{end}") });
    }
    out.join(",")
}
