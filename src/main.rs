//! FairFace Attribute Training CLI
//!
//! Entry point for training face attribute classifiers from YAML run
//! configurations, either as a single run or a hyperparameter study.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::info;

use fairface_train::backend::{backend_name, default_device, TrainingBackend};
use fairface_train::config::RunConfig;
use fairface_train::training::{run_single, run_study};
use fairface_train::utils::logging::{init_logging, LogConfig};

/// FairFace Multi-Task Face Attribute Classification
///
/// Trains a CNN with ethnicity and gender heads on the FairFace dataset
/// using the Burn framework.
#[derive(Parser, Debug)]
#[command(name = "fairface-train")]
#[command(version)]
#[command(about = "Multi-task face attribute training with Burn", long_about = None)]
struct Cli {
    /// Name of the run configuration (file stem of a YAML file in the
    /// configs directory). Defaults are used when omitted.
    config: Option<String>,

    /// Directory holding run configuration files
    #[arg(long, default_value = "configs")]
    configs_dir: String,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    print_banner();

    let config = match &cli.config {
        Some(name) => {
            let path = PathBuf::from(&cli.configs_dir).join(format!("{}.yaml", name));
            if !path.exists() {
                println!(
                    "{} configuration not found: {}",
                    "Error:".red(),
                    path.display()
                );
                anyhow::bail!("no such configuration '{}'", name);
            }
            RunConfig::load(&path)?
        }
        None => {
            println!("{}", "No configuration given, using defaults.".yellow());
            RunConfig::default()
        }
    };

    info!("run '{}' on {}", config.name, backend_name());
    println!("{}", "Run Configuration:".cyan().bold());
    println!("  name:     {}", config.name);
    println!("  target:   {}", config.output_category);
    println!("  data:     {}", config.data_path);
    println!("  backend:  {}", backend_name());
    println!("  tuning:   {}", config.do_tuning);

    let device = default_device();
    if config.do_tuning {
        run_study::<TrainingBackend>(&config, &device)?;
    } else {
        run_single::<TrainingBackend>(&config, &device)?;
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════╗
 ║   FairFace Attribute Training                    ║
 ║   Multi-task CNN with Burn + Rust                ║
 ╚══════════════════════════════════════════════════╝
  "#
        .green()
    );
}
