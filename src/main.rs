/*!
 * imsbind CLI - Command Line Interface
 */

use clap::{Parser, Subcommand};
use imsbind::{
    config::ImsBindConfig,
    error::{ImsBindError, Result, EXIT_SUCCESS},
    logging,
    report::{records_table, steps_table, summary_table},
    scenario::{JsonReport, Scenario},
};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "imsbind")]
#[command(version, about = "Bind an IMS service and keep its features reconciled", long_about = None)]
struct Cli {
    /// Enable verbose logging (overrides the configured level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scenario in a configuration file against the simulated service
    Run {
        /// Configuration file (TOML)
        config: PathBuf,

        /// Print the report as JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file without running it
    Check {
        /// Configuration file (TOML)
        config: PathBuf,
    },

    /// Print a sample configuration
    SampleConfig,
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, json } => handle_run(&config, json, cli.verbose),
        Commands::Check { config } => handle_check(&config),
        Commands::SampleConfig => {
            print!("{}", ImsBindConfig::sample().to_toml()?);
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<ImsBindConfig> {
    let config = ImsBindConfig::from_file(path)?;
    config.validate()?;
    Ok(config)
}

fn handle_check(path: &Path) -> Result<()> {
    let config = load(path)?;
    println!(
        "{}: ok ({} step(s), service {})",
        path.display(),
        config.steps.len(),
        config.service.component()
    );
    Ok(())
}

fn handle_run(path: &Path, json: bool, verbose: bool) -> Result<()> {
    let mut config = load(path)?;
    config.logging.verbose |= verbose;
    logging::init_logging(&config.logging)?;

    let runtime = tokio::runtime::Runtime::new()?;

    let report = runtime.block_on(async {
        let scenario = Scenario::new(&config);
        let report = scenario.run().await?;
        scenario.controller().unbind().await?;
        Ok::<_, ImsBindError>(report)
    })?;

    info!(
        steps = report.steps.len(),
        final_state = %report.final_state,
        records = report.records.len(),
        "Scenario finished"
    );

    if json {
        let text = serde_json::to_string_pretty(&JsonReport::from(&report)).map_err(std::io::Error::from)?;
        println!("{}", text);
    } else {
        println!("{}", steps_table(&report));
        println!();
        println!("{}", records_table(&report.records));
        println!();
        println!("{}", summary_table(&report));
    }

    Ok(())
}
