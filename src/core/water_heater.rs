use crate::core::controller::Controller;
use crate::core::heat_sources::HeatSourceSpec;
use crate::core::tank::{Tank, TankSpec};
use crate::errors::HpwhError;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Fully resolved description of a water heater, as built by a preset or read from a
/// device-description document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub tank: TankSpec,
    /// deg C
    pub setpoint: f64,
    /// Uniform starting temperature of the tank; the setpoint when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_temp: Option<f64>,
    /// In priority order, highest first
    pub heat_sources: Vec<HeatSourceSpec>,
    #[serde(default)]
    pub allow_simultaneous_compressors: bool,
}

impl ModelSpec {
    pub fn from_json(json: &str) -> Result<Self, HpwhError> {
        serde_json::from_str(json).map_err(|e| {
            HpwhError::invalid_model(format!("could not read device description: {e}"))
        })
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, HpwhError> {
        serde_json::from_reader(reader).map_err(|e| {
            HpwhError::invalid_model(format!("could not read device description: {e}"))
        })
    }
}

/// A tank with its heat sources and controller, ready to be stepped
#[derive(Clone, Debug)]
pub struct WaterHeater {
    name: String,
    tank_spec: TankSpec,
    tank: Tank,
    sources: Vec<HeatSourceSpec>,
    controller: Controller,
    setpoint: f64,
    allow_simultaneous_compressors: bool,
}

impl WaterHeater {
    /// Validate the topology of `spec` and build the model from it
    pub fn from_spec(spec: &ModelSpec) -> Result<Self, HpwhError> {
        if spec.heat_sources.is_empty() {
            return Err(HpwhError::invalid_model(format!(
                "model '{}' has no heat sources",
                spec.name
            )));
        }
        for source in &spec.heat_sources {
            source.validate()?;
        }
        let controller = Controller::new(&spec.heat_sources, spec.allow_simultaneous_compressors)?;
        let tank = Tank::new(&spec.tank, spec.initial_temp.unwrap_or(spec.setpoint))?;

        let mut water_heater = Self {
            name: spec.name.clone(),
            tank_spec: spec.tank.clone(),
            tank,
            sources: spec.heat_sources.clone(),
            controller,
            setpoint: spec.setpoint,
            allow_simultaneous_compressors: spec.allow_simultaneous_compressors,
        };
        water_heater.set_setpoint(spec.setpoint)?;
        Ok(water_heater)
    }

    /// The description this model can be rebuilt from, including any calibration applied
    pub fn spec(&self) -> ModelSpec {
        ModelSpec {
            name: self.name.clone(),
            tank: TankSpec {
                ua_kj_per_hour_k: self.tank.ua_kj_per_hour_k(),
                ..self.tank_spec.clone()
            },
            setpoint: self.setpoint,
            initial_temp: None,
            heat_sources: self.sources.clone(),
            allow_simultaneous_compressors: self.allow_simultaneous_compressors,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tank(&self) -> &Tank {
        &self.tank
    }

    pub fn tank_mut(&mut self) -> &mut Tank {
        &mut self.tank
    }

    pub fn heat_sources(&self) -> &[HeatSourceSpec] {
        &self.sources
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Tank, &[HeatSourceSpec], &mut Controller, f64) {
        (
            &mut self.tank,
            &self.sources,
            &mut self.controller,
            self.setpoint,
        )
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Highest setpoint any of the heat sources can reach
    pub fn max_setpoint(&self) -> f64 {
        self.sources
            .iter()
            .map(HeatSourceSpec::max_setpoint)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn set_setpoint(&mut self, setpoint: f64) -> Result<(), HpwhError> {
        if !setpoint.is_finite() || setpoint > self.max_setpoint() {
            return Err(HpwhError::invalid_model(format!(
                "setpoint of {setpoint} degC cannot be reached by model '{}' (maximum {} degC)",
                self.name,
                self.max_setpoint()
            )));
        }
        self.setpoint = setpoint;
        Ok(())
    }

    pub fn is_heating(&self) -> bool {
        self.controller.is_heating()
    }

    pub fn has_compressor(&self) -> bool {
        self.sources.iter().any(HeatSourceSpec::is_compressor)
    }

    /// Scale the efficiency of every compressor by `factor`; false if there are none
    pub fn scale_compressor_performance(&mut self, factor: f64) -> bool {
        self.sources
            .iter_mut()
            .map(|source| source.scale_performance(factor))
            .fold(false, |scaled, source_scaled| scaled || source_scaled)
    }

    /// Give every compressor a performance-map point at each of `ambient_temps_f`, leaving
    /// its performance unchanged
    pub fn add_compressor_map_points(&mut self, ambient_temps_f: &[f64]) {
        for compressor in self
            .sources
            .iter_mut()
            .filter_map(HeatSourceSpec::compressor_mut)
        {
            for ambient_temp_f in ambient_temps_f {
                compressor.insert_point(*ambient_temp_f);
            }
        }
    }

    /// Scale the efficiency of every compressor's map point at `ambient_temp_f`; false if no
    /// compressor has one there
    pub fn scale_compressor_point(&mut self, ambient_temp_f: f64, factor: f64) -> bool {
        self.sources
            .iter_mut()
            .filter_map(HeatSourceSpec::compressor_mut)
            .map(|compressor| compressor.scale_point_performance(ambient_temp_f, factor))
            .fold(false, |scaled, point_scaled| scaled || point_scaled)
    }

    /// Fill the tank at `temp` with every source off
    pub fn reset(&mut self, temp: f64) {
        self.tank.set_uniform_temp(temp);
        self.controller.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::distribution::Condensity;
    use crate::core::heating_logic::HeatingLogic;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    fn spec() -> ModelSpec {
        ModelSpec {
            name: "two elements".to_string(),
            tank: TankSpec {
                volume_litres: 150.,
                ua_kj_per_hour_k: 5.,
                node_count: 12,
                mixes_on_draw: true,
                conduction: false,
            },
            setpoint: 55.,
            initial_temp: Some(40.),
            heat_sources: vec![
                HeatSourceSpec::resistance("top", 4.5, Condensity::single_segment(8).unwrap())
                    .unwrap()
                    .with_turn_on_logic(HeatingLogic::top_third(20.))
                    .with_vip()
                    .with_followed_by("bottom"),
                HeatSourceSpec::resistance("bottom", 4.5, Condensity::single_segment(0).unwrap())
                    .unwrap()
                    .with_turn_on_logic(HeatingLogic::bottom_third(20.)),
            ],
            allow_simultaneous_compressors: false,
        }
    }

    #[rstest]
    fn should_build_from_spec(spec: ModelSpec) {
        let water_heater = WaterHeater::from_spec(&spec).unwrap();
        assert_eq!(water_heater.name(), "two elements");
        assert_eq!(water_heater.tank().average_temp(), 40.);
        assert_eq!(water_heater.setpoint(), 55.);
        assert_eq!(water_heater.max_setpoint(), 100.);
        assert!(!water_heater.has_compressor());
        assert!(!water_heater.is_heating());
    }

    #[rstest]
    fn should_round_trip_through_json(spec: ModelSpec) {
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(ModelSpec::from_json(&json).unwrap(), spec);
    }

    #[rstest]
    fn should_reject_unreachable_setpoint(spec: ModelSpec) {
        let mut water_heater = WaterHeater::from_spec(&spec).unwrap();
        assert!(matches!(
            water_heater.set_setpoint(101.),
            Err(HpwhError::InvalidModel(_))
        ));
        assert_eq!(water_heater.setpoint(), 55.);
    }

    #[rstest]
    fn should_reject_broken_topology(mut spec: ModelSpec) {
        spec.heat_sources[0].followed_by = Some("middle".to_string());
        assert!(matches!(
            WaterHeater::from_spec(&spec),
            Err(HpwhError::InvalidModel(_))
        ));
    }

    #[rstest]
    fn should_reject_logic_beyond_top_node(mut spec: ModelSpec) {
        spec.heat_sources[1].shut_off_logic.push(HeatingLogic::Temperature {
            description: "too high".to_string(),
            node_weights: vec![crate::core::heating_logic::NodeWeight::new(20)],
            decision_point: 60.,
            absolute: true,
            comparison: crate::core::heating_logic::Comparison::Greater,
        });
        assert!(matches!(
            WaterHeater::from_spec(&spec),
            Err(HpwhError::InvalidModel(_))
        ));
    }

    #[rstest]
    fn should_reject_malformed_json() {
        assert!(matches!(
            ModelSpec::from_json("{\"name\": \"incomplete\"}"),
            Err(HpwhError::InvalidModel(_))
        ));
    }
}
