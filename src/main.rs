//! featurebench - run one detector/descriptor/matcher combination over an
//! image sequence and append its averages to the summary file.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use featurebench::{Args, Config, Headless, Pipeline, SnapshotViewer, Visualizer};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // help and version output end the run like any other early exit
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::try_from(args).context("invalid configuration")?;
    println!("{}", config);

    if config.visualization_enabled() {
        let viewer = SnapshotViewer::new(&config.snapshot_dir, true);
        benchmark(config, viewer)
    } else {
        benchmark(config, Headless)
    }
}

fn benchmark<V: Visualizer>(config: Config, visualizer: V) -> Result<()> {
    let sequence = config.sequence.clone();
    let summary_path = config.summary_path.clone();
    let label = config.label();

    let mut pipeline = Pipeline::new(config, visualizer).context("invalid configuration")?;
    pipeline
        .run(&sequence)
        .with_context(|| format!("benchmark {} stopped", label))?;

    let Some(summary) = pipeline.telemetry().summary() else {
        log::warn!("no frames were processed, nothing appended to {}", summary_path.display());
        return Ok(());
    };

    println!(
        "Average detection time: {:.3} ms",
        summary.avg_detection_ms
    );
    println!(
        "Average description time: {:.3} ms",
        summary.avg_description_ms
    );
    match summary.avg_matches {
        Some(matches) => println!("Average matches: {:.2}", matches),
        None => println!("Average matches: n/a"),
    }

    summary
        .append_to(&summary_path, &label)
        .with_context(|| format!("could not record results of {}", label))?;
    log::info!("summary appended to {}", summary_path.display());
    Ok(())
}
