pub mod compressor;
pub mod resistance;

use crate::core::distribution::{thermal_distribution, Condensity};
use crate::core::heat_sources::compressor::{
    CapacityControl, Compressor, CondenserConfiguration, Performance,
};
use crate::core::heat_sources::resistance::ResistanceElement;
use crate::core::heating_logic::HeatingLogic;
use crate::core::solvers::brent_root;
use crate::core::tank::Tank;
use crate::core::units::{
    delta_fahrenheit_to_celsius, fahrenheit_to_celsius, kilojoules_to_kwh,
    kw_minutes_to_kilojoules, kw_minutes_to_kwh,
};
use crate::errors::HpwhError;
use crate::reporter::Reporter;
use serde::{Deserialize, Serialize};
use tracing::trace;

const RESISTANCE_MAX_SETPOINT: f64 = 100.;
const COMPRESSOR_MAX_SETPOINT: f64 = 60.;
const SHUT_OFF_TIME_TOLERANCE: f64 = 1e-9;
const SHUT_OFF_TIME_MAX_ITER: usize = 50;
const UNMET_HEAT_TOLERANCE_KJ: f64 = 1e-6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeatSourceKind {
    Resistance(ResistanceElement),
    Compressor(Compressor),
}

/// Band of source-side temperatures (deg C) outside which a source is locked out.
///
/// A running source is given `hysteresis` degrees of leeway either side of the band before
/// locking out, and must come back the same distance inside it before unlocking.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockoutBand {
    pub min_temp: f64,
    pub max_temp: f64,
    #[serde(default)]
    pub hysteresis: f64,
}

impl LockoutBand {
    pub fn from_fahrenheit(min_temp_f: f64, max_temp_f: f64, hysteresis_f: f64) -> Self {
        Self {
            min_temp: fahrenheit_to_celsius(min_temp_f),
            max_temp: fahrenheit_to_celsius(max_temp_f),
            hysteresis: delta_fahrenheit_to_celsius(hysteresis_f),
        }
    }

    pub fn should_lock_out(&self, temp: f64, running: bool) -> bool {
        let leeway = if running { self.hysteresis } else { 0. };
        temp < self.min_temp - leeway || temp > self.max_temp + leeway
    }

    pub fn should_unlock(&self, temp: f64, running: bool) -> bool {
        let margin = if running { self.hysteresis } else { 0. };
        temp > self.min_temp + margin && temp < self.max_temp - margin
    }
}

/// Result of running a heat source for part or all of a step
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct HeatOutcome {
    pub runtime_minutes: f64,
    pub energy_input_kwh: f64,
    pub energy_output_kwh: f64,
    /// Heat which could not be added without exceeding the source's maximum temperature
    pub unmet_kwh: f64,
}

impl HeatOutcome {
    pub fn accumulate(&mut self, other: &HeatOutcome) {
        self.runtime_minutes += other.runtime_minutes;
        self.energy_input_kwh += other.energy_input_kwh;
        self.energy_output_kwh += other.energy_output_kwh;
        self.unmet_kwh += other.unmet_kwh;
    }
}

/// One physical heat source and its control settings.
///
/// Immutable once the model is built, except that calibration rescales compressor
/// performance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeatSourceSpec {
    pub name: String,
    pub kind: HeatSourceKind,
    pub condensity: Condensity,
    #[serde(default)]
    pub turn_on_logic: Vec<HeatingLogic>,
    #[serde(default)]
    pub shut_off_logic: Vec<HeatingLogic>,
    #[serde(default)]
    pub is_vip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout: Option<LockoutBand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_setpoint_c: Option<f64>,
    #[serde(default)]
    pub min_runtime_min: f64,
    #[serde(default)]
    pub min_off_time_min: f64,
}

impl HeatSourceSpec {
    fn new(name: &str, kind: HeatSourceKind, condensity: Condensity) -> Self {
        Self {
            name: name.to_string(),
            kind,
            condensity,
            turn_on_logic: vec![],
            shut_off_logic: vec![],
            is_vip: false,
            backup: None,
            followed_by: None,
            lockout: None,
            max_setpoint_c: None,
            min_runtime_min: 0.,
            min_off_time_min: 0.,
        }
    }

    pub fn resistance(name: &str, power_kw: f64, condensity: Condensity) -> Result<Self, HpwhError> {
        Ok(Self::new(
            name,
            HeatSourceKind::Resistance(ResistanceElement::new(power_kw)?),
            condensity,
        ))
    }

    pub fn compressor(name: &str, compressor: Compressor, condensity: Condensity) -> Self {
        Self::new(name, HeatSourceKind::Compressor(compressor), condensity)
    }

    pub fn with_turn_on_logic(mut self, logic: HeatingLogic) -> Self {
        self.turn_on_logic.push(logic);
        self
    }

    pub fn with_shut_off_logic(mut self, logic: HeatingLogic) -> Self {
        self.shut_off_logic.push(logic);
        self
    }

    pub fn with_vip(mut self) -> Self {
        self.is_vip = true;
        self
    }

    pub fn with_backup(mut self, name: &str) -> Self {
        self.backup = Some(name.to_string());
        self
    }

    pub fn with_followed_by(mut self, name: &str) -> Self {
        self.followed_by = Some(name.to_string());
        self
    }

    pub fn with_lockout(mut self, band: LockoutBand) -> Self {
        self.lockout = Some(band);
        self
    }

    pub fn is_compressor(&self) -> bool {
        matches!(self.kind, HeatSourceKind::Compressor(_))
    }

    pub fn is_resistance(&self) -> bool {
        matches!(self.kind, HeatSourceKind::Resistance(_))
    }

    /// Highest temperature the source can heat water to
    pub fn max_setpoint(&self) -> f64 {
        self.max_setpoint_c.unwrap_or(match self.kind {
            HeatSourceKind::Resistance(_) => RESISTANCE_MAX_SETPOINT,
            HeatSourceKind::Compressor(_) => COMPRESSOR_MAX_SETPOINT,
        })
    }

    /// Temperature the source heats water up to: the setpoint, unless the source can't reach it
    pub fn heating_limit(&self, setpoint: f64) -> f64 {
        setpoint.min(self.max_setpoint())
    }

    pub fn validate(&self) -> Result<(), HpwhError> {
        match &self.kind {
            HeatSourceKind::Resistance(element) => element.validate()?,
            HeatSourceKind::Compressor(compressor) => compressor.validate()?,
        }
        for logic in self.turn_on_logic.iter().chain(self.shut_off_logic.iter()) {
            logic.validate()?;
        }
        if self.min_runtime_min < 0. || self.min_off_time_min < 0. {
            return Err(HpwhError::invalid_model(format!(
                "heat source '{}' has a negative minimum runtime or off time",
                self.name
            )));
        }
        if let Some(band) = &self.lockout {
            if band.min_temp > band.max_temp || band.hysteresis < 0. {
                return Err(HpwhError::invalid_model(format!(
                    "heat source '{}' has an invalid lockout band",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Multiply compressor efficiency by `factor` at unchanged capacity.
    /// Returns false for sources without a performance map.
    pub fn compressor_mut(&mut self) -> Option<&mut Compressor> {
        match &mut self.kind {
            HeatSourceKind::Compressor(compressor) => Some(compressor),
            HeatSourceKind::Resistance(_) => None,
        }
    }

    pub fn scale_performance(&mut self, factor: f64) -> bool {
        match &mut self.kind {
            HeatSourceKind::Compressor(compressor) => {
                compressor.scale_performance(factor);
                true
            }
            HeatSourceKind::Resistance(_) => false,
        }
    }

    pub fn performance(&self, tank: &Tank, external_temp: f64) -> Performance {
        match &self.kind {
            HeatSourceKind::Resistance(element) => element.performance(),
            HeatSourceKind::Compressor(compressor) => compressor.performance(
                external_temp,
                self.condensity.weighted_temperature(tank.node_temps()),
            ),
        }
    }

    /// Fraction of the heat going to each tank node
    pub fn heat_distribution(&self, tank: &Tank, setpoint: f64) -> Vec<f64> {
        let node_count = tank.node_count();
        match &self.kind {
            HeatSourceKind::Compressor(compressor)
                if compressor.configuration == CondenserConfiguration::Wrapped =>
            {
                thermal_distribution(
                    tank.node_temps(),
                    self.condensity.shrinkage_temperature(node_count),
                    self.condensity.lowest_node(node_count),
                    setpoint,
                )
            }
            _ => self.condensity.heat_distribution(node_count),
        }
    }

    pub fn shuts_off(&self, tank: &Tank, setpoint: f64) -> bool {
        tank.bottom_temp() >= setpoint
            || self
                .shut_off_logic
                .iter()
                .any(|logic| logic.is_satisfied(tank, setpoint))
    }

    pub fn should_heat(&self, tank: &Tank, setpoint: f64) -> bool {
        self.turn_on_logic
            .iter()
            .any(|logic| logic.is_satisfied(tank, setpoint))
            && !self.shuts_off(tank, setpoint)
    }

    /// Non-negative once the source would shut off
    fn shut_off_margin(&self, tank: &Tank, setpoint: f64) -> f64 {
        self.shut_off_logic
            .iter()
            .map(|logic| logic.margin(tank, setpoint))
            .fold(tank.bottom_temp() - setpoint, f64::max)
    }

    /// Minutes of heating at `heat_rate_kj_per_min` after which the source would shut off, or
    /// could add no more heat below its heating limit, if that happens within `minutes`
    fn shut_off_time(
        &self,
        tank: &Tank,
        distribution: &[f64],
        heat_rate_kj_per_min: f64,
        setpoint: f64,
        minutes: f64,
    ) -> Result<Option<f64>, HpwhError> {
        if self.shuts_off(tank, setpoint) {
            return Ok(Some(0.));
        }
        let max_temp = self.heating_limit(setpoint);
        let heated_tank = |elapsed_minutes: f64| -> Result<(Tank, f64), HpwhError> {
            let mut trial = tank.clone();
            let leftover_kj = trial.add_heat_at_nodes(
                distribution,
                heat_rate_kj_per_min * elapsed_minutes,
                max_temp,
            )?;
            Ok((trial, leftover_kj))
        };

        // once the heated nodes reach the limit every further kJ is left over, so the heat
        // taken up over the whole step is what it takes to saturate them
        let (heated, leftover_kj) = heated_tank(minutes)?;
        let saturation_minutes = if leftover_kj > 0. {
            (minutes - leftover_kj / heat_rate_kj_per_min).max(0.)
        } else {
            minutes
        };
        let margin_after = |elapsed_minutes: f64| -> Result<f64, HpwhError> {
            Ok(self.shut_off_margin(&heated_tank(elapsed_minutes)?.0, setpoint))
        };
        let margin_at_saturation = if leftover_kj > 0. {
            margin_after(saturation_minutes)?
        } else {
            self.shut_off_margin(&heated, setpoint)
        };
        if margin_at_saturation < 0. {
            return Ok((leftover_kj > 0.).then_some(saturation_minutes));
        }
        brent_root(
            margin_after,
            0.,
            saturation_minutes,
            SHUT_OFF_TIME_TOLERANCE,
            SHUT_OFF_TIME_MAX_ITER,
        )
        .map(Some)
    }

    /// Run the source for up to `minutes`, adding its heat to `tank`.
    ///
    /// Where `may_shut_off` is set, heating stops at the moment the shutoff condition would
    /// be met. Heat that would raise the water above the setpoint, or above the source's
    /// maximum temperature where that is lower, is not added: the runtime is shortened in
    /// proportion and the leftover returned as unmet. Only a shortfall against the source's
    /// own maximum is reported as a warning.
    pub fn add_heat(
        &self,
        tank: &mut Tank,
        external_temp: f64,
        setpoint: f64,
        minutes: f64,
        may_shut_off: bool,
        reporter: &dyn Reporter,
    ) -> Result<HeatOutcome, HpwhError> {
        if !(minutes > 0.) {
            return Err(HpwhError::invalid_timestep(
                minutes,
                "heating time must be positive",
            ));
        }

        let performance = self.performance(tank, external_temp);
        if self.is_compressor() && performance.cop < 1. {
            reporter.warning(&format!(
                "{}: COP of {:.3} at {external_temp:.2} degC is below 1",
                self.name, performance.cop
            ));
        }
        if !(performance.capacity_kw > 0.) {
            reporter.warning(&format!(
                "{}: no heating capacity at {external_temp:.2} degC",
                self.name
            ));
            return Ok(HeatOutcome::default());
        }

        let distribution = self.heat_distribution(tank, setpoint);
        let full_rate_kj_per_min = kw_minutes_to_kilojoules(performance.capacity_kw, 1.);

        let mut capacity_fraction = 1.;
        let mut heating_minutes = minutes;
        if may_shut_off {
            if let Some(crossing_minutes) =
                self.shut_off_time(tank, &distribution, full_rate_kj_per_min, setpoint, minutes)?
            {
                match self.capacity_control() {
                    CapacityControl::Modulating { min_fraction } => {
                        capacity_fraction = (crossing_minutes / minutes).max(min_fraction);
                        heating_minutes = crossing_minutes / capacity_fraction;
                    }
                    CapacityControl::SingleStage => heating_minutes = crossing_minutes,
                }
            }
        }

        let heat_kj = full_rate_kj_per_min * capacity_fraction * heating_minutes;
        if !(heat_kj > 0.) {
            return Ok(HeatOutcome::default());
        }
        let max_temp = self.heating_limit(setpoint);
        let leftover_kj = tank.add_heat_at_nodes(&distribution, heat_kj, max_temp)?;
        let runtime_minutes = heating_minutes * (1. - leftover_kj / heat_kj);
        if leftover_kj > UNMET_HEAT_TOLERANCE_KJ && self.max_setpoint() < setpoint {
            reporter.warning(&format!(
                "{}: {:.4} kWh could not be added without exceeding {max_temp:.1} degC; runtime clipped to {runtime_minutes:.3} min",
                self.name,
                kilojoules_to_kwh(leftover_kj),
            ));
        } else if leftover_kj > 0. {
            trace!(
                "{}: water reached {max_temp:.1} degC after {runtime_minutes:.3} min",
                self.name
            );
        }

        Ok(HeatOutcome {
            runtime_minutes,
            energy_input_kwh: kw_minutes_to_kwh(
                performance.input_power_kw * capacity_fraction,
                runtime_minutes,
            ),
            energy_output_kwh: kilojoules_to_kwh(heat_kj - leftover_kj),
            unmet_kwh: kilojoules_to_kwh(leftover_kj),
        })
    }

    fn capacity_control(&self) -> CapacityControl {
        match &self.kind {
            HeatSourceKind::Compressor(compressor) => compressor.capacity_control(),
            HeatSourceKind::Resistance(_) => CapacityControl::SingleStage,
        }
    }
}
