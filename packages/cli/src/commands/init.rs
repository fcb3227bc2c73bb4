use crate::config::Config;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use tiledoc_editor::DEFAULT_CONFIG_NAME;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Tree id the baseline document is attached under
    #[arg(short, long, default_value = "document")]
    pub tree: String,

    /// Exchange timeout in milliseconds
    #[arg(long, default_value_t = 100)]
    pub timeout_ms: u64,

    /// Force overwrite existing config
    #[arg(short, long)]
    pub force: bool,
}

pub fn init(args: InitArgs, cwd: &str) -> Result<()> {
    let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists",
            "⚠️".yellow(),
            DEFAULT_CONFIG_NAME.bright_white()
        );
        println!("Use --force to overwrite");
        return Ok(());
    }

    let mut config = Config::default();
    config.default_tree = args.tree;
    config.manager.exchange_timeout_ms = args.timeout_ms;

    let config_json = serde_json::to_string_pretty(&config)?;
    fs::write(&config_path, config_json)?;

    println!("  {} Created {}", "✓".green(), DEFAULT_CONFIG_NAME);
    println!();
    println!("Next steps:");
    println!("  1. Export a baseline document and its history");
    println!("  2. Run: tiledoc replay document.json history.json");

    Ok(())
}
