//! Command-line front end for the discovery engine.
//!
//! Runs the engine and periodically prints the catalog, either as a plain
//! table or as JSON lines. Diagnostics go to stderr and the JSONL log file;
//! stdout carries only catalog output.

use std::time::Duration;

use clap::Parser;
use tracing::info;

use shortcut_scout::config::load_config;
use shortcut_scout::logging;
use shortcut_scout::menu_scanner::request_accessibility_permission;
use shortcut_scout::{Scope, ShortcutScout};

#[derive(Parser, Debug)]
#[command(name = "shortcut-scout", about = "Discover and catalog keyboard shortcuts")]
struct Cli {
    /// Print records as JSON lines instead of a table
    #[arg(long)]
    json: bool,

    /// Seconds between catalog snapshots (overrides the config file)
    #[arg(long)]
    interval: Option<u64>,

    /// Show the Accessibility permission prompt before starting
    #[arg(long)]
    request_permission: bool,

    /// Capture a single key press, print it, and exit
    #[arg(long)]
    try_shortcut: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init();

    let mut config = load_config();
    if let Some(interval) = cli.interval {
        config.refresh_secs = interval;
    }
    let refresh = Duration::from_secs(config.refresh_secs.max(1));

    if cli.request_permission && !request_accessibility_permission() {
        eprintln!("Accessibility permission not granted; menu scans will be empty.");
    }

    let scout = ShortcutScout::new(config);
    scout.start();
    // start() returns before the tap thread has reported in; give it a
    // moment so the log reflects the real permission state.
    let tap = scout.wait_for_tap(Duration::from_millis(500));
    info!(
        tap,
        accessibility = scout.accessibility_granted(),
        "Engine started"
    );

    if cli.try_shortcut {
        if !tap {
            anyhow::bail!(
                "global event tap unavailable; grant Input Monitoring permission and retry"
            );
        }
        eprintln!("Press a shortcut...");
        let combo = scout.capture_next().recv_blocking()?;
        println!("{}", combo);
        return Ok(());
    }

    loop {
        std::thread::sleep(refresh);
        print_snapshot(&scout, cli.json)?;
    }
}

fn print_snapshot(scout: &ShortcutScout, json: bool) -> anyhow::Result<()> {
    let rows = scout.rows();
    if json {
        for record in &rows {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    let frontmost = scout
        .frontmost_scope()
        .map(|s| s.title().to_string())
        .unwrap_or_else(|| "(none)".to_string());
    println!("-- {} shortcuts, frontmost: {} --", rows.len(), frontmost);
    for record in &rows {
        let scope = match &record.scope {
            Scope::System => record.scope.title().to_string(),
            Scope::Application { pid, name } => format!("{} ({})", name, pid),
        };
        println!("{:<12} {}", record.combo, scope);
    }
    Ok(())
}
