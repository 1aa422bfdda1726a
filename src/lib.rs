#![allow(clippy::too_many_arguments)]

pub mod calibrator;
pub mod core;
pub mod errors;
pub mod output;
pub mod presets;
pub mod reporter;
pub mod run;
pub mod simulation_time;
pub mod standard_test;

#[macro_use]
extern crate is_close;

use crate::calibrator::{calibrate, CalibrationOptions, CalibrationResult};
use crate::core::water_heater::{ModelSpec, WaterHeater};
use crate::errors::HpwhError;
use crate::output::{write_summary, write_trace, Output};
use crate::presets::Preset;
use crate::reporter::Reporter;
use crate::run::{run_schedule, RunOptions, RunSummary, ScheduleRow};
use crate::standard_test::{run_standard_test, StandardTestOptions, StandardTestSummary};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use strum_macros::{Display, EnumString};
use tracing::info;

/// Where a named model is looked up
#[derive(Clone, Copy, Debug, Default, Display, EnumString, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[strum(serialize_all = "lowercase")]
pub enum ModelSource {
    #[default]
    Preset,
    /// A device-description document, `<model>` being its path
    Json,
}

pub fn load_model(model: &str, source: ModelSource) -> Result<WaterHeater, HpwhError> {
    let spec = match source {
        ModelSource::Preset => model
            .parse::<Preset>()
            .map_err(|_| HpwhError::invalid_model(format!("no preset is named '{model}'")))?
            .spec()?,
        ModelSource::Json => {
            let file = File::open(Path::new(model)).map_err(|e| {
                HpwhError::invalid_model(format!("could not open '{model}': {e}"))
            })?;
            ModelSpec::from_reader(BufReader::new(file))?
        }
    };
    WaterHeater::from_spec(&spec)
}

/// Run the standard test on `water_heater`, writing the per-minute trace (when requested)
/// and the summary to `output` under keys derived from the model name.
pub fn measure(
    water_heater: &WaterHeater,
    options: &StandardTestOptions,
    output: &impl Output,
    reporter: &dyn Reporter,
) -> anyhow::Result<StandardTestSummary> {
    let result = run_standard_test(water_heater, options, reporter)?;
    let name = water_heater.name();

    if let Some(trace) = &result.trace {
        let source_names: Vec<&str> = water_heater
            .heat_sources()
            .iter()
            .map(|source| source.name.as_str())
            .collect();
        write_trace(output, &format!("{name}_test24hr.csv"), &source_names, trace)?;
    }
    write_summary(output, &format!("{name}_summary.json"), &result.summary)?;
    info!("{name}: UEF {:.4}", result.summary.uef);

    Ok(result.summary)
}

/// Calibrate `water_heater` to `options.target`, then measure the calibrated model in the
/// configuration of `options.test_options`. The calibrated description is written to
/// `output` alongside the test results.
pub fn make(
    water_heater: &WaterHeater,
    options: &CalibrationOptions,
    output: &impl Output,
    reporter: &dyn Reporter,
) -> anyhow::Result<(CalibrationResult, StandardTestSummary)> {
    let calibration = calibrate(water_heater, options, reporter)?;
    if !output.is_noop() {
        let location_key = format!("{}_calibrated.json", water_heater.name());
        let mut writer = output.writer_for_location_key(&location_key)?;
        serde_json::to_writer_pretty(&mut writer, &calibration.water_heater.spec())?;
        writer.flush()?;
    }
    let summary = measure(&calibration.water_heater, &options.test_options, output, reporter)?;
    Ok((calibration, summary))
}

/// Step `water_heater` through `schedule`, writing the per-step trace and the run totals to
/// `output` under keys derived from the model name.
pub fn simulate(
    water_heater: &WaterHeater,
    schedule: &[ScheduleRow],
    options: &RunOptions,
    output: &impl Output,
    reporter: &dyn Reporter,
) -> anyhow::Result<RunSummary> {
    let result = run_schedule(water_heater, schedule, options, reporter)?;
    let name = water_heater.name();

    let source_names: Vec<&str> = water_heater
        .heat_sources()
        .iter()
        .map(|source| source.name.as_str())
        .collect();
    write_trace(output, &format!("{name}_run.csv"), &source_names, &result.trace)?;
    write_summary(output, &format!("{name}_run_summary.json"), &result.summary)?;
    info!(
        "{name}: {:.3} kWh used over {} min",
        result.summary.energy_input_kwh, result.summary.minutes
    );

    Ok(result.summary)
}
