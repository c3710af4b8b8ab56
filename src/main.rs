use anyhow::{bail, Result};
use clap::Parser;
use std::path::Path;

use indicatif::ProgressStyle;
use tracing::{error, info, info_span, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vi_ekf_rust::config::*;
use vi_ekf_rust::dataset::*;
use vi_ekf_rust::math::quat_log;
use vi_ekf_rust::state::VehicleState;
use vi_ekf_rust::validation;
use vi_ekf_rust::vio::VIO;

#[derive(Parser)]
pub struct Args {
    /// Canonical measurement stream, one JSON record per line
    #[clap(short, default_value = "./data/stream.jsonl")]
    pub input_file: String,
    /// Check the analytic Jacobians against finite differences and exit
    #[clap(long)]
    pub validate: bool,
    #[clap(long, default_value = "20")]
    pub trials: usize,
    #[clap(long, default_value = "3")]
    pub validation_features: usize,
    #[clap(flatten)]
    pub config: Config,
}

fn main() -> Result<()> {
    // parse the config
    let args = Args::parse();

    // setup logging
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();

    if args.validate {
        return validate(&args);
    }
    replay(&args)
}

fn validate(args: &Args) -> Result<()> {
    let reports = validation::run(&args.config, args.trials, args.validation_features)?;
    let failed: Vec<_> = reports.iter().filter(|report| !report.passed()).collect();
    for report in failed.iter() {
        error!("{report}");
    }
    let worst = reports
        .iter()
        .map(|report| report.max_abs_error)
        .fold(0., f64::max);
    info!(
        "checked {} jacobians on {} random states, max error {worst:.2e}",
        reports.len(),
        args.trials
    );
    if !failed.is_empty() {
        bail!("{} jacobian checks failed", failed.len());
    }
    Ok(())
}

fn replay(args: &Args) -> Result<()> {
    // load dataset
    let mut dataset = Dataset::new(Path::new(&args.input_file))?;

    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    header_span.pb_set_length(dataset.length);
    let header_span_enter = header_span.enter();

    let mut vio = VIO::new(VehicleState::default(), args.config.clone())?;
    while let Some(data) = dataset.next()? {
        vio.process_data(&data)?;
        Span::current().pb_inc(1);
    }

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    let state = vio.filter().state();
    let vehicle = &state.vehicle;
    info!("{:?}", vio.stats());
    info!(
        position = ?vehicle.position.as_slice(),
        velocity = ?vehicle.velocity.as_slice(),
        attitude = ?quat_log(&vehicle.attitude).as_slice(),
        mu = vehicle.mu,
        features = state.len_features(),
        "final state"
    );
    let features = state.ids().into_iter().zip(state.depths()).zip(state.bearings());
    for ((id, depth), zeta) in features {
        info!(id, depth, zeta = ?zeta.as_slice(), "feature");
    }
    Ok(())
}
