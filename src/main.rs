mod app;

use anyhow::Result;
use clap::Parser;

use app::{Cli, Command, run_export, run_import, run_partitions, run_schema};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let start = std::time::Instant::now();
    let config = cli.config.as_deref();
    match &cli.command {
        Command::Export(args) => {
            let summary = run_export(args, config)?;
            println!(
                "Exported {} rows into {} part files",
                summary.rows,
                summary.parts.len()
            );
        }
        Command::Import(args) => {
            let summary = run_import(args, config)?;
            println!(
                "Imported {} rows into {} ({} failed)",
                summary.inserted, summary.container, summary.failed
            );
        }
        Command::Schema(args) => run_schema(args)?,
        Command::Partitions(args) => {
            for partition in run_partitions(args)? {
                println!("{partition}");
            }
        }
    }

    tracing::info!("Done in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
