//! smokepair - before/after smoke comparison
//!
//! ## Commands
//!
//! - `run`: compare the application before and after a dependency update or
//!   between two git refs
//! - `cleanup`: stop servers left behind by an interrupted run

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use smokepair_core::{
    cleanup_stale, init_tracing, server::STOP_GRACE, Overrides, ProbeSelection, RunConfig, RunError,
    Runner,
};

#[derive(Parser)]
#[command(name = "smokepair")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run the same smoke battery before and after a change and diff the results", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a before/after comparison configured by .smokepair.yml
    Run {
        /// Application root containing .smokepair.yml
        #[arg(long, default_value = ".")]
        project_root: PathBuf,

        /// Boot a live server per lane before running smoke tests
        #[arg(long, env = "SMOKEPAIR_SERVER")]
        server: bool,

        /// Do not create sandbox databases in server mode
        #[arg(long)]
        no_sandbox: bool,

        /// Port for the before server
        #[arg(long, env = "SMOKEPAIR_BEFORE_PORT")]
        before_port: Option<u16>,

        /// Port for the after server
        #[arg(long, env = "SMOKEPAIR_AFTER_PORT")]
        after_port: Option<u16>,

        /// Pin the dependency to this version before updating
        #[arg(long, env = "SMOKEPAIR_VERSION")]
        target_version: Option<String>,

        /// Shell command to run instead of the smoke scripts
        #[arg(long, env = "SMOKEPAIR_TEST_COMMAND")]
        test_command: Option<String>,

        /// Probes to run: "all", "none" or a comma-separated list
        #[arg(long, env = "SMOKEPAIR_PROBES")]
        probes: Option<String>,
    },

    /// Stop servers recorded by pid-files under tmp/smokepair
    Cleanup {
        /// Application root
        #[arg(long, default_value = ".")]
        project_root: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let code = match cli.command {
        Commands::Run {
            project_root,
            server,
            no_sandbox,
            before_port,
            after_port,
            target_version,
            test_command,
            probes,
        } => {
            let overrides = Overrides {
                server: server.then_some(true),
                sandbox: no_sandbox.then_some(false),
                before_port,
                after_port,
                version: target_version,
                test_command,
                probes: probes.as_deref().map(ProbeSelection::parse),
            };
            cmd_run(&project_root, &overrides).await
        }
        Commands::Cleanup { project_root } => match cmd_cleanup(&project_root).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {e:#}");
                2
            }
        },
    };

    std::process::exit(code);
}

/// Load the config, run the comparison and print the text report.
/// Returns the process exit code.
async fn cmd_run(project_root: &Path, overrides: &Overrides) -> i32 {
    match run_comparison(project_root, overrides).await {
        Ok(code) => code,
        Err(e) => {
            let code = e
                .downcast_ref::<RunError>()
                .map(RunError::exit_code)
                .unwrap_or(2);
            eprintln!("Error: {e:#}");
            code
        }
    }
}

async fn run_comparison(project_root: &Path, overrides: &Overrides) -> Result<i32> {
    let project_root = std::fs::canonicalize(project_root)
        .with_context(|| format!("project root {} does not exist", project_root.display()))?;
    let config = RunConfig::load(&project_root, overrides).map_err(RunError::from)?;

    let runner = Runner::new(Arc::new(config));
    let outcome = runner.run().await?;

    println!("{}", outcome.report.render_text());
    for (lane, probes) in &outcome.probes {
        if !probes.failed.is_empty() {
            info!(lane = %lane, failed = ?probes.failed, "probes failed");
        }
    }
    info!(
        result = outcome.report.classification.as_str(),
        output = %outcome.output_root.display(),
        "comparison complete"
    );
    Ok(outcome.exit_code())
}

async fn cmd_cleanup(project_root: &Path) -> Result<()> {
    let root = project_root.join("tmp").join("smokepair");
    if !root.is_dir() {
        println!("Nothing to clean up under {}", root.display());
        return Ok(());
    }

    let stopped = cleanup_stale(&root, STOP_GRACE).await;
    println!("Stopped {stopped} stale server(s) under {}", root.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "smokepair",
            "--json",
            "run",
            "--server",
            "--no-sandbox",
            "--before-port",
            "4000",
            "--target-version",
            "7.2.0",
            "--probes",
            "routes,ssl_certs",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run {
                server,
                no_sandbox,
                before_port,
                target_version,
                probes,
                ..
            } => {
                assert!(server);
                assert!(no_sandbox);
                assert_eq!(before_port, Some(4000));
                assert_eq!(target_version.as_deref(), Some("7.2.0"));
                assert_eq!(
                    probes.as_deref().map(ProbeSelection::parse),
                    Some(ProbeSelection::Named(vec![
                        "routes".to_string(),
                        "ssl_certs".to_string()
                    ]))
                );
            }
            Commands::Cleanup { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_cleanup_defaults_to_current_dir() {
        let cli = Cli::try_parse_from(["smokepair", "cleanup"]).unwrap();
        match cli.command {
            Commands::Cleanup { project_root } => assert_eq!(project_root, PathBuf::from(".")),
            Commands::Run { .. } => panic!("expected cleanup"),
        }
    }

    #[tokio::test]
    async fn test_run_without_config_exits_two() {
        let tmp = tempfile::tempdir().unwrap();
        let code = cmd_run(tmp.path(), &Overrides::default()).await;
        assert_eq!(code, 2);
    }
}
