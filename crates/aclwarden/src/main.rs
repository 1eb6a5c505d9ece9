// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! aclwarden CLI
//!
//! Watch directory trees and normalize the permissions of new objects.
//!
//! # Usage
//!
//! ```bash
//! # Watch one tree with the default (subtractive) policy
//! aclwarden --root /srv/share
//!
//! # Preview decisions without changing anything
//! aclwarden --root /srv/share --mode rebuild --dry-run
//!
//! # Using a configuration file
//! aclwarden --config aclwarden.toml
//!
//! # Normalize an existing tree once
//! aclwarden --config aclwarden.toml apply /srv/share --subtree
//! ```

use aclwarden::{
    check_roots, native_store, AuditLog, Direction, DryRunStore, EventOutcome, NotifySource,
    PermissionStore, Pipeline, PolicyMode, StopHandle, WardenConfig, WatchLoop,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "aclwarden")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Filesystem permission normalizer - re-applies an access policy to new objects")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Watched root directory (can repeat, replaces the file's roots)
    #[arg(short, long = "root")]
    roots: Vec<PathBuf>,

    /// Watch only the roots themselves, not their subdirectories
    #[arg(long)]
    single_level: bool,

    /// Policy mode
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Which related directories to normalize
    #[arg(short, long, value_enum)]
    propagation: Option<DirectionArg>,

    /// Audit log path
    #[arg(long)]
    log: Option<PathBuf>,

    /// Audit log rotation size (e.g., 10M, 100K, 1G)
    #[arg(long)]
    rotate: Option<String>,

    /// Read real permissions but only report changes
    #[arg(long)]
    dry_run: bool,

    /// Verbose mode (debug logs)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "aclwarden.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Normalize one path now, without watching
    Apply {
        /// File or directory to normalize
        path: PathBuf,

        /// Normalize every directory below PATH as well
        #[arg(long)]
        subtree: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Additive,
    Subtractive,
    Rebuild,
}

impl From<ModeArg> for PolicyMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Additive => PolicyMode::Additive,
            ModeArg::Subtractive => PolicyMode::Subtractive,
            ModeArg::Rebuild => PolicyMode::Rebuild,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Ancestors,
    Descendants,
    Both,
    None,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Ancestors => Direction::Ancestors,
            DirectionArg::Descendants => Direction::Descendants,
            DirectionArg::Both => Direction::Both,
            DirectionArg::None => Direction::None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "aclwarden=debug"
    } else {
        "aclwarden=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt().with_env_filter(filter).with_target(false).init();

    match &cli.command {
        Some(Commands::GenConfig { output }) => cmd_gen_config(output),
        Some(Commands::Validate { config }) => {
            cmd_validate(config);
            Ok(())
        }
        Some(Commands::Apply { path, subtree }) => cmd_apply(&cli, path, *subtree),
        None => cmd_run(&cli),
    }
}

fn cmd_run(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;
    config.validate().context("Invalid configuration")?;
    check_roots(&config.watch).context("Cannot start monitoring")?;

    tracing::info!(
        roots = ?config.watch.roots,
        mode = %config.policy.mode,
        propagation = %config.propagation.direction,
        audit = %config.audit.path.display(),
        dry_run = cli.dry_run,
        "Starting aclwarden"
    );

    let store = open_store(&config, cli.dry_run)?;
    let audit = Arc::new(AuditLog::open(&config.audit));
    let watch_loop = WatchLoop::new(&config, store, audit);

    let stop_handle = watch_loop.stop_handle();
    ctrlc_handler(stop_handle.clone());
    stdin_quit_handler(stop_handle);

    let (tx, rx) = crossbeam::channel::unbounded();
    let source = NotifySource::start(&config.watch.roots, config.watch.recursive, tx)
        .context("Failed to register for notifications")?;

    let stats = watch_loop.run(rx).context("Watch loop error")?;
    drop(source);

    tracing::info!(
        received = stats.received,
        normalized = stats.normalized,
        partial = stats.partial,
        timed_out = stats.timed_out,
        failed = stats.failed,
        dropped = stats.dropped,
        "aclwarden shutdown complete"
    );
    Ok(())
}

fn cmd_apply(cli: &Cli, path: &Path, subtree: bool) -> Result<()> {
    let mut config = build_config(cli)?;
    if config.watch.roots.is_empty() {
        // Bound the ancestor walk to the target itself.
        let anchor = if path.is_dir() {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        config.watch.roots.push(anchor.to_path_buf());
    }
    config.validate().context("Invalid configuration")?;

    let store = open_store(&config, cli.dry_run)?;
    let audit = Arc::new(AuditLog::open(&config.audit));
    let pipeline = Pipeline::new(&config, store, audit);

    if subtree {
        let report = pipeline.normalize_subtree(path);
        println!(
            "{}: {} directories normalized, {} failed",
            path.display(),
            report.applied.len(),
            report.failed.len()
        );
        for (dir, e) in &report.failed {
            println!("  {}: {}", dir.display(), e);
        }
        if report.is_partial() || report.applied.is_empty() {
            bail!("{} was not fully normalized", path.display());
        }
        return Ok(());
    }

    let outcome = pipeline.normalize(path);
    println!("{}: {}", path.display(), outcome);
    match outcome {
        EventOutcome::Normalized { ref propagation, .. } if !propagation.is_partial() => Ok(()),
        _ => bail!("{} was not fully normalized", path.display()),
    }
}

fn cmd_gen_config(output: &Path) -> Result<()> {
    let toml_str = toml::to_string_pretty(&WardenConfig::example())?;

    let content = format!(
        r#"# aclwarden configuration
# Generated by aclwarden gen-config
#
# policy.mode: additive | subtractive | rebuild
# propagation.direction: ancestors | descendants | both | none

{}
"#,
        toml_str
    );

    std::fs::write(output, content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) {
    match WardenConfig::from_file(config_path) {
        Ok(config) => {
            if let Ok(store) = native_store(&config.policy.broad) {
                if let Err(e) = store.resolve_principal(&config.policy.privileged) {
                    eprintln!("Configuration error: policy.privileged: {}", e);
                    std::process::exit(1);
                }
            }
            println!("Configuration valid!");
            println!();
            println!("Roots:");
            for root in &config.watch.roots {
                let state = if root.is_dir() { "" } else { " (missing)" };
                println!("  - {}{}", root.display(), state);
            }
            println!("Recursive: {}", config.watch.recursive);
            println!("Workers: {}", config.watch.workers);
            println!("Policy: {}", config.policy.mode);
            println!("  privileged: {}", config.policy.privileged);
            println!("  broad: {}", config.policy.broad);
            let allow: Vec<String> = config
                .policy
                .allow_list
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("  allow-list: {}", allow.join(", "));
            println!("Propagation: {}", config.propagation.direction);
            println!(
                "Readiness: {} attempts every {:?}",
                config.readiness.max_attempts,
                config.readiness.interval()
            );
            println!(
                "Audit log: {} (rotate at {} bytes)",
                config.audit.path.display(),
                config.audit.max_bytes
            );
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

fn build_config(cli: &Cli) -> Result<WardenConfig> {
    let mut config = match &cli.config {
        Some(path) => WardenConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => WardenConfig::default(),
    };

    if !cli.roots.is_empty() {
        config.watch.roots = cli.roots.clone();
    }
    if cli.single_level {
        config.watch.recursive = false;
    }
    if let Some(mode) = cli.mode {
        config.policy.mode = mode.into();
    }
    if let Some(direction) = cli.propagation {
        config.propagation.direction = direction.into();
    }
    if let Some(ref log) = cli.log {
        config.audit.path = log.clone();
    }
    if let Some(ref size) = cli.rotate {
        config.audit.max_bytes =
            parse_size(size).with_context(|| format!("Invalid rotation size: {}", size))?;
    }
    Ok(config)
}

fn open_store(config: &WardenConfig, dry_run: bool) -> Result<Arc<dyn PermissionStore>> {
    let native =
        native_store(&config.policy.broad).context("No permission backend available")?;
    native
        .resolve_principal(&config.policy.privileged)
        .with_context(|| {
            format!(
                "policy.privileged '{}' cannot own files on this platform",
                config.policy.privileged
            )
        })?;
    if dry_run {
        Ok(Arc::new(DryRunStore::new(native)))
    } else {
        Ok(Arc::from(native))
    }
}

/// Parse size string like "10M", "100K", "1G".
fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();

    let (num, unit) = if let Some(num) = s.strip_suffix('K') {
        (num, 1024)
    } else if let Some(num) = s.strip_suffix('M') {
        (num, 1024 * 1024)
    } else if let Some(num) = s.strip_suffix('G') {
        (num, 1024 * 1024 * 1024)
    } else {
        (s.as_str(), 1)
    };
    num.parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(unit))
        .filter(|n| *n > 0)
}

/// Setup Ctrl+C / SIGTERM handler.
fn ctrlc_handler(stop_handle: StopHandle) {
    let _ = ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal, stopping...");
        stop_handle.stop();
    });
}

/// Stop on `q` or an empty line when attached to a terminal.
fn stdin_quit_handler(stop_handle: StopHandle) {
    if !std::io::stdin().is_terminal() {
        return;
    }
    println!("Press 'q' or Enter to stop.");

    let spawned = std::thread::Builder::new()
        .name("aclwarden-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let input = line.trim();
                        if input.is_empty() || input.eq_ignore_ascii_case("q") {
                            tracing::info!("Quit requested, stopping...");
                            stop_handle.stop();
                            break;
                        }
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "cannot read stdin, use Ctrl+C to stop");
    }
}
