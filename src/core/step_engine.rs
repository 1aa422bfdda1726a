use crate::core::heat_sources::HeatOutcome;
use crate::core::units::kilojoules_to_kwh;
use crate::core::water_heater::WaterHeater;
use crate::errors::HpwhError;
use crate::reporter::Reporter;
use serde::Serialize;
use tracing::trace;

/// Boundary conditions for one step
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct StepConditions {
    pub draw_volume_litres: f64,
    pub inlet_temp: f64,
    /// Temperature around the tank, to which it loses heat
    pub ambient_temp: f64,
    /// Source-side temperature seen by heat pumps
    pub external_temp: f64,
    pub minutes: f64,
}

impl StepConditions {
    pub fn new(draw_volume_litres: f64, inlet_temp: f64, ambient_temp: f64, external_temp: f64) -> Self {
        Self {
            draw_volume_litres,
            inlet_temp,
            ambient_temp,
            external_temp,
            minutes: 1.,
        }
    }

    pub fn with_draw(self, draw_volume_litres: f64) -> Self {
        Self {
            draw_volume_litres,
            ..self
        }
    }
}

/// Everything recorded about one step
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepOutputs {
    pub index: usize,
    /// Minutes since the start of the run at the end of the step
    pub elapsed_minutes: f64,
    pub setpoint: f64,
    pub conditions: StepConditions,
    /// Mean temperature of the water drawn, if any was
    pub outlet_temp: Option<f64>,
    pub standby_losses_kwh: f64,
    /// Energy carried out by the draw, relative to the inlet water
    pub delivered_energy_kwh: f64,
    /// One entry per heat source, in priority order
    pub sources: Vec<HeatOutcome>,
    pub node_temps: Vec<f64>,
}

impl StepOutputs {
    pub fn energy_input_kwh(&self) -> f64 {
        self.sources.iter().map(|source| source.energy_input_kwh).sum()
    }

    pub fn energy_output_kwh(&self) -> f64 {
        self.sources.iter().map(|source| source.energy_output_kwh).sum()
    }
}

impl WaterHeater {
    /// Advance the model by one step: draw, ambient losses, then heating.
    ///
    /// Heat sources run in priority order, each seeing the tank as left by the previous one.
    pub fn run_step(
        &mut self,
        index: usize,
        elapsed_minutes: f64,
        conditions: &StepConditions,
        reporter: &dyn Reporter,
    ) -> Result<StepOutputs, HpwhError> {
        let (tank, sources, controller, setpoint) = self.parts_mut();

        let draw = tank.apply_draw(
            conditions.draw_volume_litres,
            conditions.inlet_temp,
            conditions.minutes,
        )?;
        let losses_kj = tank.apply_ambient_losses(conditions.ambient_temp, conditions.minutes)?;
        let outcomes = controller.step(
            sources,
            tank,
            setpoint,
            conditions.external_temp,
            conditions.minutes,
            reporter,
        )?;
        trace!(
            "step {index}: drew {:.2} L, lost {losses_kj:.2} kJ, top at {:.2} degC",
            draw.volume_removed_litres,
            tank.top_temp()
        );

        Ok(StepOutputs {
            index,
            elapsed_minutes: elapsed_minutes + conditions.minutes,
            setpoint,
            conditions: *conditions,
            outlet_temp: (draw.volume_removed_litres > 0.).then_some(draw.outlet_temp),
            standby_losses_kwh: kilojoules_to_kwh(losses_kj),
            delivered_energy_kwh: kilojoules_to_kwh(draw.delivered_energy_kj),
            sources: outcomes,
            node_temps: tank.node_temps().to_vec(),
        })
    }
}

/// Drives a water heater step by step, keeping an append-only record of every step
#[derive(Clone, Debug)]
pub struct StepEngine {
    water_heater: WaterHeater,
    outputs: Vec<StepOutputs>,
    elapsed_minutes: f64,
}

impl StepEngine {
    pub fn new(water_heater: WaterHeater) -> Self {
        Self {
            water_heater,
            outputs: vec![],
            elapsed_minutes: 0.,
        }
    }

    pub fn water_heater(&self) -> &WaterHeater {
        &self.water_heater
    }

    /// For changes between steps, such as a new setpoint
    pub fn water_heater_mut(&mut self) -> &mut WaterHeater {
        &mut self.water_heater
    }

    pub fn outputs(&self) -> &[StepOutputs] {
        &self.outputs
    }

    pub fn elapsed_minutes(&self) -> f64 {
        self.elapsed_minutes
    }

    pub fn advance(
        &mut self,
        conditions: &StepConditions,
        reporter: &dyn Reporter,
    ) -> Result<&StepOutputs, HpwhError> {
        let outputs = self.water_heater.run_step(
            self.outputs.len(),
            self.elapsed_minutes,
            conditions,
            reporter,
        )?;
        self.elapsed_minutes = outputs.elapsed_minutes;
        self.outputs.push(outputs);
        Ok(&self.outputs[self.outputs.len() - 1])
    }

    pub fn into_parts(self) -> (WaterHeater, Vec<StepOutputs>) {
        (self.water_heater, self.outputs)
    }
}
