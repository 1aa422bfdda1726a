extern crate hpwh;

use anyhow::anyhow;
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use hpwh::calibrator::CalibrationOptions;
use hpwh::output::{FileOutput, SinkOutput};
use hpwh::presets::Preset;
use hpwh::reporter::{Reporter, TracingReporter};
use hpwh::standard_test::first_hour_rating::Designation;
use hpwh::standard_test::{StandardTestOptions, TestConfiguration};
use hpwh::run::{read_schedule, RunOptions};
use hpwh::{load_model, make, measure, simulate, ModelSource};
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use strum::IntoEnumIterator;
use tracing::{debug, Level};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct HpwhArgs {
    #[command(subcommand)]
    command: Command,
    #[arg(long, global = true, default_value_t = Level::WARN, help = "Most verbose level of log messages to show")]
    log_level: Level,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the standard test on a model and print its summary
    Measure {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        test: TestArgs,
    },
    /// Calibrate a model to a target energy factor, then run the standard test on it
    Make {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long, help = "Energy factor the calibrated model should achieve in the test configuration, or its UEF when fitting E50 and E95 as well")]
        target_uef: f64,
        #[arg(long, requires = "target_e95", help = "E50 to fit together with the UEF and E95")]
        target_e50: Option<f64>,
        #[arg(long, requires = "target_e50", help = "E95 to fit together with the E50 and UEF")]
        target_e95: Option<f64>,
        #[command(flatten)]
        test: TestArgs,
    },
    /// Simulate a model through a schedule of per-step conditions
    Run {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long, help = "CSV file with draw_litres, inlet_temp and ambient_temp columns, and optionally minutes, external_temp and setpoint")]
        schedule: PathBuf,
        #[arg(long, help = "Setpoint at the start of the run (degC)")]
        setpoint: Option<f64>,
        #[arg(long, help = "Uniform tank temperature at the start of the run (degC)")]
        initial_temp: Option<f64>,
        #[arg(long, help = "Directory to write the per-step trace and run summary to")]
        output_dir: Option<PathBuf>,
    },
    /// List the preset models
    List,
}

#[derive(Args, Debug)]
struct ModelArgs {
    #[arg(help = "Preset name, or path to a device-description document")]
    model: String,
    #[arg(long, value_enum, default_value_t = ModelSource::Preset)]
    model_source: ModelSource,
}

#[derive(Args, Debug)]
struct TestArgs {
    #[arg(long, help = "Directory to write the 24-hour trace and summary to")]
    output_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false, help = "Keep the model's own setpoint")]
    no_change_setpoint: bool,
    #[arg(long, default_value_t = 6, help = "Number of simulated thermocouples")]
    thermocouples: usize,
    #[arg(long, default_value_t = TestConfiguration::Uef, help = "Ambient condition of the test: UEF, E50 or E95")]
    configuration: TestConfiguration,
    #[arg(long, help = "Use this draw pattern rather than the first-hour rating's")]
    designation: Option<Designation>,
}

impl TestArgs {
    fn options(&self) -> StandardTestOptions {
        StandardTestOptions {
            change_setpoint: !self.no_change_setpoint,
            thermocouple_count: self.thermocouples,
            save_output: self.output_dir.is_some(),
            configuration: self.configuration,
            designation: self.designation,
            ..Default::default()
        }
    }
}

fn main() -> ExitCode {
    let args = match HpwhArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let tracing_subscriber = tracing_subscriber::fmt::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(tracing_subscriber).is_err() {
        eprintln!("setting tracing subscriber failed");
    }

    let reporter = TracingReporter;
    match run(args.command, &reporter) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            reporter.error(&format!("{e:#}"));
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, reporter: &dyn Reporter) -> anyhow::Result<()> {
    match command {
        Command::List => {
            for preset in Preset::iter() {
                println!("{preset}");
            }
        }
        Command::Measure { model, test } => {
            let water_heater = load_model(&model.model, model.model_source)?;
            let options = test.options();
            let summary = match &test.output_dir {
                Some(directory) => measure(&water_heater, &options, &file_output(directory)?, reporter)?,
                None => measure(&water_heater, &options, &SinkOutput, reporter)?,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Make {
            model,
            target_uef,
            target_e50,
            target_e95,
            test,
        } => {
            let water_heater = load_model(&model.model, model.model_source)?;
            let targets = match (target_e50, target_e95) {
                (Some(e50), Some(e95)) => CalibrationOptions::energy_factors(e50, target_uef, e95),
                _ => CalibrationOptions::new(target_uef),
            };
            let options = CalibrationOptions {
                test_options: test.options(),
                ..targets
            };
            let (calibration, summary) = match &test.output_dir {
                Some(directory) => make(&water_heater, &options, &file_output(directory)?, reporter)?,
                None => make(&water_heater, &options, &SinkOutput, reporter)?,
            };
            debug!(
                "calibrated with {:?} after {} tests",
                calibration.fits, calibration.evaluations
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Run {
            model,
            schedule,
            setpoint,
            initial_temp,
            output_dir,
        } => {
            let water_heater = load_model(&model.model, model.model_source)?;
            let file = File::open(&schedule)
                .map_err(|e| anyhow!("could not open schedule '{}': {e}", schedule.display()))?;
            let schedule = read_schedule(BufReader::new(file))?;
            let options = RunOptions {
                setpoint,
                initial_temp,
            };
            let summary = match &output_dir {
                Some(directory) => simulate(&water_heater, &schedule, &options, &file_output(directory)?, reporter)?,
                None => simulate(&water_heater, &schedule, &options, &SinkOutput, reporter)?,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

fn file_output(directory: &Path) -> anyhow::Result<FileOutput> {
    fs::create_dir_all(directory)?;
    Ok(FileOutput::new(directory.to_path_buf(), "{}".to_string()))
}
