// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{error, info};
use velodyne_thin::{Config, Pipeline, args::Args};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // stdout carries the records
    tracing_subscriber::fmt()
        .with_max_level(args.rust_log)
        .with_writer(std::io::stderr)
        .init();

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;

    if let Err(err) = run(args, shutdown) {
        error!("{}", err);
        return Err(err.into());
    }
    Ok(())
}

fn run(args: Args, shutdown: Arc<AtomicBool>) -> Result<(), velodyne_thin::Error> {
    let config = Config::try_from(args)?;
    let calibration = config.load_calibration()?;
    let strategy = config.build_strategy(&calibration)?;
    let source = config.open_source(shutdown.clone())?;
    let sink = config.open_sink()?;

    let mut pipeline = Pipeline::new(source, sink, calibration)
        .with_strategy(strategy)
        .with_scan_rate(config.scan_rate)
        .with_output(config.output)
        .with_angular_speed(config.angular_speed)
        .with_seed(config.seed)
        .with_verbose(config.verbose);

    let termination = pipeline.run(&shutdown)?;
    info!("{}", pipeline.stats());
    info!("{}; shutdown", termination);
    Ok(())
}
