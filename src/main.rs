//! distfunc CLI entry point

use anyhow::{Context, Result};
use distfunc::config::cli::Cli;
use distfunc::config::toml::{merge_cli_with_config, parse_toml_file, RunConfigFile};
use distfunc::{sample, telemetry, EvaluationCoordinator, ThreadDispatcher};
use tracing::info;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    telemetry::init_tracing(cli.log_json, cli.log_level());
    cli.validate()?;

    let file = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => RunConfigFile::default(),
    };
    let config = merge_cli_with_config(&cli, file)?
        .build()
        .context("Configuration validation failed")?;

    // stdout may carry the output sample
    eprintln!("distfunc v{}", env!("CARGO_PKG_VERSION"));
    eprint!("{}", config);

    if cli.dry_run {
        eprintln!("Dry run: configuration is valid, nothing evaluated");
        return Ok(());
    }

    let input = cli.input.as_deref().context("--input is required")?;
    let points = sample::read_sample(input, config.n_input())?;
    info!(points = points.len(), input = %input.display(), "sample loaded");

    let dispatcher = ThreadDispatcher::command(config.wrapper());
    let coordinator = EvaluationCoordinator::new(config, dispatcher);
    let outputs = coordinator.evaluate(&points)?;

    sample::write_sample(cli.output.as_deref(), &outputs, cli.format)?;
    Ok(())
}
