// SPDX-License-Identifier: MIT OR Apache-2.0
//! `OrdoPlay` flow graph runner
//!
//! Builds a scene and its flow graphs from a RON scenario file, replays the
//! scenario's notifications and reports what fired.
//!
//! ```text
//! ordoplay_flowgraph_runner <scenario.ron> [--config config.ron]
//! ```

mod scenario;

use ordoplay_flowgraph::{FlowGraphConfig, TracingSink};
use scenario::Scenario;
use std::path::PathBuf;
use std::rc::Rc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const USAGE: &str = "usage: ordoplay_flowgraph_runner <scenario.ron> [--config config.ron]";

struct Args {
    scenario: PathBuf,
    config: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut scenario = None;
    let mut config = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().ok_or("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ if scenario.is_none() => scenario = Some(PathBuf::from(arg)),
            _ => return Err(format!("unexpected argument '{arg}'")),
        }
    }

    Ok(Args {
        scenario: scenario.ok_or(USAGE)?,
        config,
    })
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => FlowGraphConfig::load(path)?,
        None => FlowGraphConfig::default(),
    };
    let scenario = Scenario::load(&args.scenario)?;

    let outcomes = scenario.run(config, Rc::new(TracingSink))?;
    let mut failures = 0;
    for outcome in &outcomes {
        let report = &outcome.report;
        tracing::info!(
            "{}: {} fired, {} failed, {} custom events delivered",
            outcome.label,
            report.fired_count(),
            report.errors.len(),
            report.custom_events_delivered
        );
        failures += report.errors.len();
    }

    if failures > 0 {
        tracing::warn!("{failures} branch(es) failed");
    }
    Ok(())
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("ordoplay_flowgraph_runner=info,ordoplay_flowgraph=info,flowgraph=info")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting OrdoPlay flow graph runner v{}", env!("CARGO_PKG_VERSION"));

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&args) {
        tracing::error!("Scenario failed: {e}");
        std::process::exit(1);
    }
}
