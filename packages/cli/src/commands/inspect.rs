use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use tiledoc_editor::{ChangeDocument, HistoryEntry};

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// History file to inspect
    pub history: PathBuf,

    /// Also list every patch
    #[arg(short, long)]
    pub patches: bool,
}

pub fn inspect(args: InspectArgs) -> Result<()> {
    let document = ChangeDocument::load(&args.history)
        .with_context(|| format!("Failed to load history from {}", args.history.display()))?;

    println!(
        "{} {} ({} entries)",
        "📜".bright_blue(),
        args.history.display(),
        document.len()
    );

    if document.is_empty() {
        println!("{}", "⚠️  History is empty".yellow());
        return Ok(());
    }

    for (index, entry) in document.history.iter().enumerate() {
        println!("{}", describe_entry(index, entry));

        for record in &entry.records {
            println!(
                "      {} {} ({} patches)",
                record.tree.cyan(),
                record.action,
                record.patches.len()
            );
            if args.patches {
                for patch in &record.patches {
                    println!("        {}", serde_json::to_string(patch)?.dimmed());
                }
            }
        }
    }

    Ok(())
}

fn describe_entry(index: usize, entry: &HistoryEntry) -> String {
    let undo_marker = if entry.undoable {
        "undoable".green()
    } else {
        "no-undo".yellow()
    };
    let state = if entry.is_complete() {
        "complete".normal()
    } else {
        "recording".red()
    };

    format!(
        "  {:>3} {} [{}] {} {} ({} records)",
        index,
        entry.action.bold(),
        entry.tree,
        undo_marker,
        state,
        entry.records.len()
    )
}
