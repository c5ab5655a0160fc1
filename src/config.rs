// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Validated run configuration.
//!
//! [`Args`] is checked once at startup and turned into a [`Config`]; every
//! misconfiguration is reported as [`Error::Config`] before any packet is
//! read. The config then opens the source and sink and builds the strategy.

use crate::{
    args::Args,
    background::{AgeBackground, FixedBackground, MaxRangeBackground, meters_to_range_units},
    calibration::Calibration,
    focus::{Focus, Sector},
    formats::OutputMode,
    lidar::Error,
    packet_source::{PacketSource, ProprietarySource, UdpSource},
    sink::{PublishAddress, Sink, StdoutSink, publisher},
    thin::{Strategy, UniformRate},
};
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{Arc, atomic::AtomicBool},
};
use tracing::info;

/// Default age in seconds before an unchanged cell becomes background
pub const DEFAULT_AGE: f64 = 10.0;

/// Default range change in meters that resets a cell's age
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Where packets come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Live datagrams on a UDP port
    Udp(u16),
    /// Capture replay, optionally filtered by port
    Pcap { path: PathBuf, port: Option<u16> },
    /// Proprietary log replay from a file, or stdin if `None`
    Proprietary(Option<PathBuf>),
}

/// Strategy selection with its parameters, before any state is allocated.
#[derive(Clone, Debug, PartialEq)]
pub enum StrategyConfig {
    None,
    Uniform {
        rate: f64,
    },
    Focus {
        rate: f64,
        ratio: f64,
        sector: Sector,
    },
    Age {
        age: f64,
        threshold: f64,
        foreground: f64,
        background: f64,
    },
    MaxRange {
        epsilon: f64,
        foreground: f64,
        background: f64,
    },
    Fixed {
        path: PathBuf,
        rate: f64,
        epsilon: f64,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub output: OutputMode,
    pub transport: Transport,
    pub publish: Option<PublishAddress>,
    pub calibration: Option<PathBuf>,
    pub strategy: StrategyConfig,
    pub scan_rate: Option<f64>,
    /// Angular speed override in degrees per microsecond
    pub angular_speed: Option<f64>,
    pub seed: Option<u64>,
    pub verbose: bool,
}

impl TryFrom<Args> for Config {
    type Error = Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let transport = transport(&args)?;
        let strategy = strategy(&args)?;

        if let Some(scan_rate) = args.scan_rate {
            if !(scan_rate > 0.0 && scan_rate <= 1.0) {
                return Err(Error::Config(format!(
                    "expected --scan-rate in (0, 1], got {}",
                    scan_rate
                )));
            }
        }

        let angular_speed = match args.angular_speed {
            Some(speed) if !speed.is_finite() || speed < 0.0 => {
                return Err(Error::Config(format!(
                    "expected a non-negative --angular-speed, got {}",
                    speed
                )));
            }
            Some(speed) => Some(speed / 1e6),
            None => None,
        };

        let publish = args.publish.as_deref().map(str::parse).transpose()?;

        Ok(Config {
            output: if args.output_raw {
                OutputMode::Raw
            } else {
                OutputMode::Compact
            },
            transport,
            publish,
            calibration: args.db,
            strategy,
            scan_rate: args.scan_rate,
            angular_speed,
            seed: args.seed,
            verbose: args.verbose,
        })
    }
}

fn transport(args: &Args) -> Result<Transport, Error> {
    let given = [
        args.udp_port.is_some(),
        args.pcap.is_some(),
        args.input.is_some(),
    ];
    if given.iter().filter(|&&g| g).count() > 1 {
        return Err(Error::Config(
            "--udp-port, --pcap and --input are mutually exclusive".to_owned(),
        ));
    }

    if let Some(port) = args.udp_port {
        return Ok(Transport::Udp(port));
    }
    if let Some(path) = &args.pcap {
        let port = (args.pcap_port != 0).then_some(args.pcap_port);
        return Ok(Transport::Pcap {
            path: path.clone(),
            port,
        });
    }
    Ok(Transport::Proprietary(args.input.clone()))
}

fn strategy(args: &Args) -> Result<StrategyConfig, Error> {
    let given = [
        args.focus.is_some(),
        args.subtract_by_age.is_some(),
        args.subtract_max_range.is_some(),
        args.subtract.is_some(),
    ];
    if given.iter().filter(|&&g| g).count() > 1 {
        return Err(Error::Config(
            "--focus, --subtract-by-age, --subtract-max-range and --subtract are mutually exclusive"
                .to_owned(),
        ));
    }

    if let Some(rate) = args.rate {
        check_unit("--rate", rate)?;
    }
    if args.subtract_epsilon.is_some() && args.subtract.is_none() {
        return Err(Error::Config(
            "--subtract-epsilon requires --subtract".to_owned(),
        ));
    }

    if let Some(options) = &args.focus {
        return focus(options, args.rate.unwrap_or(1.0));
    }
    if let Some(options) = &args.subtract_by_age {
        reject_rate(args, "--subtract-by-age")?;
        return age(options);
    }
    if let Some(options) = &args.subtract_max_range {
        reject_rate(args, "--subtract-max-range")?;
        return max_range(options);
    }
    if let Some(path) = &args.subtract {
        let epsilon = args.subtract_epsilon.unwrap_or(0.0);
        check_non_negative("--subtract-epsilon", epsilon)?;
        return Ok(StrategyConfig::Fixed {
            path: path.clone(),
            rate: args.rate.unwrap_or(1.0),
            epsilon,
        });
    }
    Ok(match args.rate {
        Some(rate) => StrategyConfig::Uniform { rate },
        None => StrategyConfig::None,
    })
}

fn reject_rate(args: &Args, option: &str) -> Result<(), Error> {
    match args.rate {
        Some(_) => Err(Error::Config(format!(
            "--rate has no effect with {}, use its foreground and background rates",
            option
        ))),
        None => Ok(()),
    }
}

fn focus(options: &str, rate: f64) -> Result<StrategyConfig, Error> {
    let parsed = NameValue::parse(options, &["type", "range", "bearing", "ken", "ratio"])?;
    match parsed.kind.as_deref().or(parsed.text("type")) {
        Some("sector") => {}
        Some(other) => {
            return Err(Error::Config(format!(
                "expected focus type sector, got {}",
                other
            )));
        }
        None => {
            return Err(Error::Config(format!(
                "expected focus type in '{}'",
                options
            )));
        }
    }

    let ratio = parsed.value("ratio", 1.0)?;
    check_unit("focus ratio", ratio)?;
    let range = parsed.value("range", f64::INFINITY)?;
    check_non_negative("focus range", range)?;
    let bearing = parsed.value("bearing", 0.0)?;
    if !bearing.is_finite() {
        return Err(Error::Config(format!("invalid focus bearing {}", bearing)));
    }
    let ken = parsed.required("ken")?;
    if !(ken > 0.0 && ken.is_finite()) {
        return Err(Error::Config(format!(
            "expected a positive focus ken, got {}",
            ken
        )));
    }

    Ok(StrategyConfig::Focus {
        rate,
        ratio,
        sector: Sector::new(bearing, ken, range),
    })
}

fn age(options: &str) -> Result<StrategyConfig, Error> {
    let parsed = NameValue::parse(options, &["foreground", "background", "age", "threshold"])?;
    let (foreground, background) = foreground_background(&parsed, options)?;
    let age = parsed.value("age", DEFAULT_AGE)?;
    check_non_negative("age", age)?;
    let threshold = parsed.value("threshold", DEFAULT_THRESHOLD)?;
    check_non_negative("threshold", threshold)?;
    Ok(StrategyConfig::Age {
        age,
        threshold,
        foreground,
        background,
    })
}

fn max_range(options: &str) -> Result<StrategyConfig, Error> {
    let parsed = NameValue::parse(options, &["foreground", "background", "epsilon"])?;
    let (foreground, background) = foreground_background(&parsed, options)?;
    let epsilon = parsed.value("epsilon", 0.0)?;
    check_non_negative("epsilon", epsilon)?;
    Ok(StrategyConfig::MaxRange {
        epsilon,
        foreground,
        background,
    })
}

fn foreground_background(parsed: &NameValue, options: &str) -> Result<(f64, f64), Error> {
    let foreground = parsed.value("foreground", 1.0)?;
    let background = parsed.value("background", 0.0)?;
    check_unit("foreground rate", foreground)?;
    check_unit("background rate", background)?;
    if foreground + background > 1.0 {
        return Err(Error::Config(format!(
            "expected foreground and background rates summing to at most 1, got {}",
            options
        )));
    }
    Ok((foreground, background))
}

fn check_unit(name: &str, value: f64) -> Result<(), Error> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "expected {} in [0, 1], got {}",
            name, value
        )))
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<(), Error> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "expected a non-negative {}, got {}",
            name, value
        )))
    }
}

/// `;`-separated `key=value` option string with an optional leading bare
/// token.
#[derive(Debug, Default)]
struct NameValue {
    kind: Option<String>,
    values: BTreeMap<String, String>,
}

impl NameValue {
    fn parse(options: &str, keys: &[&str]) -> Result<Self, Error> {
        let mut parsed = NameValue::default();
        for (i, item) in options.split(';').map(str::trim).enumerate() {
            if item.is_empty() {
                continue;
            }
            match item.split_once('=') {
                Some((key, value)) => {
                    let key = key.trim();
                    if !keys.contains(&key) {
                        return Err(Error::Config(format!(
                            "unknown option '{}' in '{}'",
                            key, options
                        )));
                    }
                    parsed.values.insert(key.to_owned(), value.trim().to_owned());
                }
                None if i == 0 => parsed.kind = Some(item.to_owned()),
                None => {
                    return Err(Error::Config(format!(
                        "expected key=value, got '{}' in '{}'",
                        item, options
                    )));
                }
            }
        }
        Ok(parsed)
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn value(&self, key: &str, default: f64) -> Result<f64, Error> {
        match self.text(key) {
            Some(text) => text.parse().map_err(|_| {
                Error::Config(format!("expected a number for {}, got '{}'", key, text))
            }),
            None => Ok(default),
        }
    }

    fn required(&self, key: &str) -> Result<f64, Error> {
        match self.text(key) {
            Some(_) => self.value(key, 0.0),
            None => Err(Error::Config(format!("missing option {}", key))),
        }
    }
}

impl Config {
    /// Load the calibration table, or the nominal one without `--db`.
    pub fn load_calibration(&self) -> Result<Calibration, Error> {
        match &self.calibration {
            Some(path) => {
                let calibration = Calibration::from_file(path)?;
                info!("loaded calibration {}", path.display());
                Ok(calibration)
            }
            None => {
                info!("no calibration given, using nominal laser table");
                Ok(Calibration::nominal())
            }
        }
    }

    /// Open the configured packet source.
    pub fn open_source(&self, shutdown: Arc<AtomicBool>) -> Result<Box<dyn PacketSource>, Error> {
        match &self.transport {
            Transport::Udp(port) => {
                info!("reading udp port {}", port);
                Ok(Box::new(UdpSource::bind(*port, shutdown)?))
            }
            #[cfg(feature = "pcap")]
            Transport::Pcap { path, port } => {
                info!("replaying pcap {}", path.display());
                Ok(Box::new(crate::pcap_source::PcapSource::from_file(
                    path, *port,
                )?))
            }
            #[cfg(not(feature = "pcap"))]
            Transport::Pcap { .. } => Err(Error::Config(
                "pcap replay requires the pcap feature".to_owned(),
            )),
            Transport::Proprietary(Some(path)) => {
                info!("replaying log {}", path.display());
                Ok(Box::new(ProprietarySource::open(path)?.with_shutdown(shutdown)))
            }
            Transport::Proprietary(None) => {
                info!("reading log records from stdin");
                Ok(Box::new(ProprietarySource::stdin(shutdown)?))
            }
        }
    }

    /// Open stdout or the network publisher.
    pub fn open_sink(&self) -> Result<Box<dyn Sink>, Error> {
        match &self.publish {
            Some(address) => publisher(address),
            None => Ok(Box::new(StdoutSink::stdout())),
        }
    }

    /// Build the configured strategy, learning the fixed background first
    /// if one is requested.
    pub fn build_strategy(&self, calibration: &Calibration) -> Result<Option<Strategy>, Error> {
        let strategy = match &self.strategy {
            StrategyConfig::None => None,
            StrategyConfig::Uniform { rate } => {
                Some(Strategy::UniformRate(UniformRate::new(*rate as f32)))
            }
            StrategyConfig::Focus {
                rate,
                ratio,
                sector,
            } => {
                let mut focus = Focus::new(*rate, *ratio);
                focus.insert(*sector);
                info!(
                    "rate in focus: {:.4}; rate out of focus: {:.4}; coverage: {:.4}",
                    focus.rate_in_focus(),
                    focus.rate_out_of_focus(),
                    focus.coverage()
                );
                Some(Strategy::SectorFocus(focus))
            }
            StrategyConfig::Age {
                age,
                threshold,
                foreground,
                background,
            } => Some(Strategy::AgeBackground(AgeBackground::new(
                *age,
                meters_to_range_units(*threshold),
                *foreground as f32,
                *background as f32,
            ))),
            StrategyConfig::MaxRange {
                epsilon,
                foreground,
                background,
            } => Some(Strategy::MaxRangeBackground(MaxRangeBackground::new(
                meters_to_range_units(*epsilon),
                *foreground as f32,
                *background as f32,
            ))),
            StrategyConfig::Fixed {
                path,
                rate,
                epsilon,
            } => {
                info!("learning background from {}", path.display());
                let mut source = ProprietarySource::open(path)?;
                let surface = FixedBackground::learn(&mut source, calibration, self.angular_speed)?;
                Some(Strategy::FixedBackground(FixedBackground::from_surface(
                    surface,
                    *rate as f32,
                    meters_to_range_units(*epsilon),
                )))
            }
        };

        if let Some(strategy) = &strategy {
            info!("thinning strategy {}", strategy.name());
        }
        Ok(strategy)
    }
}
