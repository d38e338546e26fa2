mod conditions;
mod data;
mod digitiser;
mod noise;
mod parameters;
mod processing;
mod pulse_template;
mod window;

use calo_digi_common::{
    Time, init_tracer,
    tracer::{TracerEngine, TracerOptions},
};
use clap::Parser;
use conditions::{
    Calibration, CalibrationTable, Conditions, CrystalGeometry, RecordedTiming,
    UniformCalibration,
};
use data::Event;
use digitiser::Digitiser;
use miette::IntoDiagnostic;
use noise::NoiseSeed;
use parameters::DigitiserParameters;
use processing::process_events;
use pulse_template::{PulseShape, PulseTemplate};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[clap(author, version = calo_digi_common::version!(), about)]
struct Cli {
    #[clap(flatten)]
    tracer_options: TracerOptions,

    #[clap(flatten)]
    digitiser: DigitiserParameters,

    /// Path to the json file containing the list of events to digitise
    #[clap(long)]
    events: PathBuf,

    /// Path to the json file containing per-channel calibrations.
    /// Channels absent from the file use `--adc-per-mev` and `--pe-per-mev`
    #[clap(long)]
    calibration: Option<PathBuf>,

    /// ADC counts per MeV of uncalibrated channels
    #[clap(long, default_value = "10")]
    adc_per_mev: f64,

    /// Photo-electrons per MeV of uncalibrated channels
    #[clap(long, default_value = "20")]
    pe_per_mev: f64,

    /// Number of crystals in the calorimeter
    #[clap(long, default_value = "674")]
    num_crystals: usize,

    /// Number of sensors reading out each crystal
    #[clap(long, default_value = "2")]
    sensors_per_crystal: usize,

    /// Timing offset, in ns, of events which do not record their own
    #[clap(long, default_value = "0")]
    timing_offset: Time,

    /// Seed of every random number stream of the job
    #[clap(long, default_value = "0")]
    seed: u64,

    /// Path to a json file describing the single-quantum response, overriding the `--pulse-*` options
    #[clap(long)]
    pulse_shape_file: Option<PathBuf>,

    /// Path to write the digis to, if not set they are written to stdout
    #[clap(long)]
    output: Option<PathBuf>,
}

fn main() -> miette::Result<()> {
    let args = Cli::parse();

    let tracer = init_tracer!(args.tracer_options.clone());
    info!("Starting {}", tracer.service_name());

    let shape = match &args.pulse_shape_file {
        Some(path) => serde_json::from_reader::<_, PulseShape>(open(path)?).into_diagnostic()?,
        None => args.digitiser.pulse.shape(),
    };
    let template = PulseTemplate::new(
        &shape,
        args.digitiser.digi_sampling,
        args.digitiser.pulse.pulse_phases,
    )
    .into_diagnostic()?;
    let digitiser =
        Digitiser::new(args.digitiser.clone(), template, NoiseSeed::new(args.seed))
            .into_diagnostic()?;
    info!(
        "Digitiser ready: max ADC {}, pedestal {}",
        digitiser.max_adc(),
        digitiser.pedestal()
    );

    let fallback =
        UniformCalibration::new(args.adc_per_mev, args.pe_per_mev).into_diagnostic()?;
    let calibration: Box<dyn Calibration> = match &args.calibration {
        Some(path) => Box::new(CalibrationTable::from_reader(open(path)?, fallback).into_diagnostic()?),
        None => Box::new(fallback),
    };
    let geometry = CrystalGeometry {
        num_crystals: args.num_crystals,
        sensors_per_crystal: args.sensors_per_crystal,
    };
    let timing = RecordedTiming {
        default_offset: args.timing_offset,
    };

    let events: Vec<Event> = serde_json::from_reader(open(&args.events)?).into_diagnostic()?;
    info!("Loaded {} events from {}", events.len(), args.events.display());

    let output = process_events(
        &digitiser,
        &events,
        Conditions {
            calibration: calibration.as_ref(),
            geometry: &geometry,
            timing: &timing,
        },
    )
    .into_diagnostic()?;

    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path).into_diagnostic()?)),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };
    serde_json::to_writer_pretty(&mut writer, &output).into_diagnostic()?;
    writer.flush().into_diagnostic()?;
    Ok(())
}

fn open(path: &Path) -> miette::Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path).into_diagnostic()?))
}
