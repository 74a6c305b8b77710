//! Binary entry point for the `recreator` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use log::{LevelFilter, debug};
use thiserror::Error;

use recreator::{
    BatchReport, ConfigError, Ec2Backend, Ec2BackendError, RecreateError, RecreateOptions,
    RecreateOrchestrator, RecreateOutcome, RecreatorConfig,
};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Recreate(#[from] RecreateError<Ec2BackendError>),
    #[error("{failed} of {total} instances could not be recreated")]
    Incomplete { failed: usize, total: usize },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(io::stdout(), &err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format_timestamp(None);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = RecreatorConfig::load_without_cli_args()?;
    config.validate()?;
    debug!("loaded configuration: {config:?}");

    let backend = Ec2Backend::connect(&config).await;
    let options = RecreateOptions {
        dry_run: cli.dry_run,
        launch_only: cli.launch_only,
    };
    let orchestrator = RecreateOrchestrator::new(backend, options)
        .with_poll_policy(config.poll_policy())
        .with_image_naming(config.image_naming());

    let report = orchestrator
        .recreate_instances(&cli.source_instance_ids)
        .await?;
    let failed = write_report(io::stdout(), &report);
    if failed > 0 {
        return Err(CliError::Incomplete {
            failed,
            total: report.reports.len(),
        });
    }
    Ok(())
}

/// Writes one line per instance and returns the number of failures.
fn write_report(mut target: impl Write, report: &BatchReport<Ec2BackendError>) -> usize {
    let mut failed = 0_usize;
    for entry in &report.reports {
        let id = &entry.instance_id;
        match &entry.result {
            Ok(RecreateOutcome::DryRun { operation, .. }) => {
                writeln!(target, "{id}: dry run, {operation} would succeed").ok();
            }
            Ok(RecreateOutcome::Launched {
                image_id,
                new_instance_id,
                ..
            }) => {
                writeln!(
                    target,
                    "{id}: launched {new_instance_id} from {image_id}; source left running"
                )
                .ok();
            }
            Ok(RecreateOutcome::Migrated {
                image_id,
                new_instance_id,
                orphaned_volumes,
                ..
            }) => {
                writeln!(target, "{id}: recreated as {new_instance_id} from {image_id}").ok();
                for volume in orphaned_volumes {
                    writeln!(
                        target,
                        "{id}: left {} ({}) detached",
                        volume.volume_id, volume.device_name
                    )
                    .ok();
                }
            }
            Err(err) => {
                failed = failed.saturating_add(1);
                writeln!(target, "error: {id}: {err}").ok();
            }
        }
    }
    failed
}

fn report_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
}
