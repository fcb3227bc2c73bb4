use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tiledoc_editor::{ChangeDocument, ContentRegistry, DocumentBehavior, TreeManager};
use tracing::info;

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Baseline document snapshot (JSON)
    pub document: PathBuf,

    /// History file to replay onto the baseline
    pub history: PathBuf,

    /// Config file (defaults to tiledoc.config.json in the current directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Tree id of the document (overrides config)
    #[arg(short, long)]
    pub tree: Option<String>,

    /// Stop after this many history entries
    #[arg(short, long)]
    pub index: Option<usize>,

    /// Write the resulting state here instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

pub fn replay(args: ReplayArgs, cwd: &str) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(cwd)?,
    };
    let baseline = read_json(&args.document)?;
    let history = ChangeDocument::load(&args.history)
        .with_context(|| format!("Failed to load history from {}", args.history.display()))?;
    let tree_id = args.tree.clone().unwrap_or(config.default_tree.clone());

    eprintln!(
        "{} {} entries onto tree {}",
        "🔁 Replaying".bright_blue().bold(),
        history.len(),
        tree_id.bright_white()
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let state = runtime.block_on(replay_state(config, &tree_id, baseline, history, args.index))?;

    let output = serde_json::to_string_pretty(&state)?;
    match &args.out {
        Some(path) => {
            fs::write(path, output)?;
            eprintln!("  {} Wrote {}", "✓".green(), path.display());
        }
        None => println!("{output}"),
    }

    Ok(())
}

async fn replay_state(
    config: Config,
    tree_id: &str,
    baseline: Value,
    history: ChangeDocument,
    index: Option<usize>,
) -> Result<Value> {
    let len = history.len();
    let manager = TreeManager::new(config.manager);
    let registry = ContentRegistry::builder().build();
    let tree = manager.attach_tree(tree_id, baseline, DocumentBehavior::new(registry));

    manager.set_change_document(history);
    manager.replay_history_to_trees().await?;

    if let Some(index) = index {
        if index > len {
            return Err(anyhow!("Index {} is past the end of history ({} entries)", index, len));
        }
        manager.go_to_history_entry(index).await?;
    }

    info!(
        tree_id,
        index = manager.current_history_index(),
        "Replay finished"
    );
    Ok(tree.snapshot())
}

fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}
