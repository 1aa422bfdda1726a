//! Simulation of a water heater through a schedule of per-step conditions

use crate::core::heat_sources::HeatOutcome;
use crate::core::step_engine::{StepConditions, StepEngine, StepOutputs};
use crate::core::water_heater::WaterHeater;
use crate::errors::HpwhError;
use crate::reporter::Reporter;
use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::debug;

/// Largest relative mismatch between the change in stored heat and the step's energy flows
const ENERGY_BALANCE_TOLERANCE: f64 = 1e-6;
const RUNTIME_TOLERANCE_MINUTES: f64 = 1e-9;

fn default_step_minutes() -> f64 {
    1.
}

/// Conditions of one step of a schedule, read from a CSV file with a heading row
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ScheduleRow {
    #[serde(default = "default_step_minutes")]
    pub minutes: f64,
    pub draw_litres: f64,
    pub inlet_temp: f64,
    pub ambient_temp: f64,
    /// Source-side temperature of heat pumps, the ambient temperature when absent
    #[serde(default)]
    pub external_temp: Option<f64>,
    /// Setpoint from this step on, when present
    #[serde(default)]
    pub setpoint: Option<f64>,
}

impl ScheduleRow {
    pub fn conditions(&self) -> StepConditions {
        StepConditions {
            minutes: self.minutes,
            ..StepConditions::new(
                self.draw_litres,
                self.inlet_temp,
                self.ambient_temp,
                self.external_temp.unwrap_or(self.ambient_temp),
            )
        }
    }
}

pub fn read_schedule(csv: impl Read) -> anyhow::Result<Vec<ScheduleRow>> {
    let rows: Vec<ScheduleRow> = csv::Reader::from_reader(csv)
        .deserialize::<ScheduleRow>()
        .collect::<Result<_, _>>()?;
    if rows.is_empty() {
        bail!("schedule has no steps");
    }
    Ok(rows)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunOptions {
    /// Setpoint at the start of the run; the model's own when absent
    pub setpoint: Option<f64>,
    /// Uniform tank temperature at the start of the run. When absent the tank starts at the
    /// setpoint if one is given, and as the model was built otherwise.
    pub initial_temp: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceTotals {
    pub name: String,
    #[serde(flatten)]
    pub totals: HeatOutcome,
    /// Heat output over energy input, for sources that ran
    pub cop: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub model: String,
    pub steps: usize,
    pub minutes: f64,
    pub removed_volume_litres: f64,
    pub delivered_energy_kwh: f64,
    pub standby_losses_kwh: f64,
    pub energy_input_kwh: f64,
    pub energy_output_kwh: f64,
    /// In priority order
    pub sources: Vec<SourceTotals>,
}

#[derive(Clone, Debug)]
pub struct RunResult {
    pub summary: RunSummary,
    pub trace: Vec<StepOutputs>,
    /// The model as left at the end of the run
    pub water_heater: WaterHeater,
}

/// Every step must account for the change in stored heat, and no source may run longer than
/// the step
fn check_step(outputs: &StepOutputs, heat_before_kj: f64, heat_after_kj: f64) -> Result<(), HpwhError> {
    let expected_kj = heat_before_kj
        + (outputs.energy_output_kwh() - outputs.standby_losses_kwh - outputs.delivered_energy_kwh)
            * 3600.;
    if !is_close!(heat_after_kj, expected_kj, rel_tol = ENERGY_BALANCE_TOLERANCE) {
        return Err(HpwhError::FailureInSimulation(anyhow!(
            "energy balance failed at step {}: tank holds {heat_after_kj:.4} kJ, expected {expected_kj:.4} kJ",
            outputs.index
        )));
    }
    if let Some((index, source)) = outputs
        .sources
        .iter()
        .enumerate()
        .find(|(_, source)| source.runtime_minutes > outputs.conditions.minutes + RUNTIME_TOLERANCE_MINUTES)
    {
        return Err(HpwhError::FailureInSimulation(anyhow!(
            "heat source {index} ran {:.4} min in a {} min step",
            source.runtime_minutes,
            outputs.conditions.minutes
        )));
    }
    Ok(())
}

/// Step a copy of `water_heater` through `schedule`, checking every step for energy balance.
///
/// A scheduled setpoint the model cannot reach is reported and the previous one kept.
pub fn run_schedule(
    water_heater: &WaterHeater,
    schedule: &[ScheduleRow],
    options: &RunOptions,
    reporter: &dyn Reporter,
) -> Result<RunResult, HpwhError> {
    let mut water_heater = water_heater.clone();
    if let Some(setpoint) = options.setpoint {
        water_heater.set_setpoint(setpoint)?;
    }
    match (options.initial_temp, options.setpoint) {
        (Some(temp), _) | (None, Some(temp)) => water_heater.reset(temp),
        (None, None) => {}
    }

    let mut engine = StepEngine::new(water_heater);
    for row in schedule {
        if let Some(setpoint) = row.setpoint {
            if let Err(e) = engine.water_heater_mut().set_setpoint(setpoint) {
                reporter.warning(&format!(
                    "keeping setpoint of {} degC at minute {}: {e}",
                    engine.water_heater().setpoint(),
                    engine.elapsed_minutes()
                ));
            }
        }
        let heat_before_kj = engine.water_heater().tank().heat_content_kj(0.);
        engine.advance(&row.conditions(), reporter)?;
        let heat_after_kj = engine.water_heater().tank().heat_content_kj(0.);
        if let Some(outputs) = engine.outputs().last() {
            check_step(outputs, heat_before_kj, heat_after_kj)?;
        }
    }

    let (water_heater, trace) = engine.into_parts();
    let summary = summarize(&water_heater, &trace);
    debug!(
        "{}: ran {} steps, used {:.3} kWh",
        summary.model, summary.steps, summary.energy_input_kwh
    );
    Ok(RunResult {
        summary,
        trace,
        water_heater,
    })
}

fn summarize(water_heater: &WaterHeater, trace: &[StepOutputs]) -> RunSummary {
    let mut totals = vec![HeatOutcome::default(); water_heater.heat_sources().len()];
    for step in trace {
        for (total, outcome) in totals.iter_mut().zip(&step.sources) {
            total.accumulate(outcome);
        }
    }
    let sources: Vec<SourceTotals> = water_heater
        .heat_sources()
        .iter()
        .zip(totals)
        .map(|(source, totals)| SourceTotals {
            name: source.name.clone(),
            cop: (totals.energy_input_kwh > 0.)
                .then(|| totals.energy_output_kwh / totals.energy_input_kwh),
            totals,
        })
        .collect();

    RunSummary {
        model: water_heater.name().to_string(),
        steps: trace.len(),
        minutes: trace.last().map_or(0., |step| step.elapsed_minutes),
        removed_volume_litres: trace
            .iter()
            .map(|step| step.conditions.draw_volume_litres)
            .sum(),
        delivered_energy_kwh: trace.iter().map(|step| step.delivered_energy_kwh).sum(),
        standby_losses_kwh: trace.iter().map(|step| step.standby_losses_kwh).sum(),
        energy_input_kwh: sources.iter().map(|source| source.totals.energy_input_kwh).sum(),
        energy_output_kwh: sources.iter().map(|source| source.totals.energy_output_kwh).sum(),
        sources,
    }
}
