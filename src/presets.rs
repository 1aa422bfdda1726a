//! Built-in water heater models

use crate::core::distribution::Condensity;
use crate::core::heat_sources::compressor::{
    CapacityControl, Compressor, CondenserConfiguration, DefrostMap, PerformancePoint,
};
use crate::core::heat_sources::{HeatSourceSpec, LockoutBand};
use crate::core::heating_logic::HeatingLogic;
use crate::core::tank::TankSpec;
use crate::core::units::{
    delta_fahrenheit_to_celsius, fahrenheit_to_celsius, gallons_to_litres, litres_to_gallons,
};
use crate::core::water_heater::ModelSpec;
use crate::errors::HpwhError;
use strum_macros::{Display, EnumIter, EnumString};

const NODE_COUNT: usize = 12;
/// Setpoint of the resistance tanks and the generic model, 127 F
const DEFAULT_SETPOINT_F: f64 = 127.;
/// Top element turn-on differential of the generic model
const GENERIC_TOP_ELEMENT_DELTA_F: f64 = 19.6605;
/// UEF the generic model's compressor curves are scaled for by default
const GENERIC_DEFAULT_UEF: f64 = 3.4;

#[derive(Clone, Copy, Debug, Display, EnumIter, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum Preset {
    /// Two-element resistance tank without standby losses
    #[strum(serialize = "restankNoUA")]
    RestankNoUa,
    #[strum(serialize = "restankRealistic")]
    RestankRealistic,
    /// Wrapped-condenser heat pump with two backup elements
    #[strum(serialize = "basicIntegrated")]
    BasicIntegrated,
    /// 50-gallon integrated heat pump, the starting point for calibration
    #[strum(serialize = "generic")]
    Generic,
    /// A. O. Smith Voltex 60-gallon integrated heat pump
    #[strum(serialize = "AOSmithPHPT60")]
    AoSmithPhpt60,
}

impl Preset {
    pub fn spec(&self) -> Result<ModelSpec, HpwhError> {
        match self {
            Preset::RestankNoUa => resistance_tank(
                self,
                0.,
                true,
                8,
                HeatingLogic::top_third(delta_fahrenheit_to_celsius(20.)),
                [
                    HeatingLogic::bottom_third(delta_fahrenheit_to_celsius(40.)),
                    HeatingLogic::standby(delta_fahrenheit_to_celsius(10.)),
                ],
            ),
            Preset::RestankRealistic => resistance_tank(
                self,
                10.,
                false,
                9,
                HeatingLogic::top_third(20.),
                [HeatingLogic::bottom_third(20.), HeatingLogic::standby(15.)],
            ),
            Preset::BasicIntegrated => basic_integrated(self),
            Preset::Generic => generic(
                gallons_to_litres(50.),
                GENERIC_DEFAULT_UEF,
                delta_fahrenheit_to_celsius(GENERIC_TOP_ELEMENT_DELTA_F),
            ),
            Preset::AoSmithPhpt60 => aosmith_phpt60(self),
        }
    }
}

/// 50-gallon tank with a VIP top element followed by a bottom element
fn resistance_tank(
    preset: &Preset,
    ua_kj_per_hour_k: f64,
    mixes_on_draw: bool,
    top_segment: usize,
    top_logic: HeatingLogic,
    bottom_logic: [HeatingLogic; 2],
) -> Result<ModelSpec, HpwhError> {
    let top = HeatSourceSpec::resistance("top element", 4.5, Condensity::single_segment(top_segment)?)?
        .with_turn_on_logic(top_logic)
        .with_vip()
        .with_followed_by("bottom element");
    let [bottom_third, standby] = bottom_logic;
    let bottom = HeatSourceSpec::resistance("bottom element", 4.5, Condensity::single_segment(0)?)?
        .with_turn_on_logic(bottom_third)
        .with_turn_on_logic(standby);

    Ok(ModelSpec {
        name: preset.to_string(),
        tank: TankSpec {
            volume_litres: gallons_to_litres(50.),
            ua_kj_per_hour_k,
            node_count: NODE_COUNT,
            mixes_on_draw,
            conduction: false,
        },
        setpoint: fahrenheit_to_celsius(DEFAULT_SETPOINT_F),
        initial_temp: None,
        heat_sources: vec![top, bottom],
        allow_simultaneous_compressors: false,
    })
}

fn basic_integrated(preset: &Preset) -> Result<ModelSpec, HpwhError> {
    let compressor = Compressor::new(
        CondenserConfiguration::Wrapped,
        vec![
            PerformancePoint {
                ambient_temp_f: 47.,
                input_power_coeffs_w: [290., 1.59, 0.00107],
                cop_coeffs: [4.49, -0.0187, -0.0000133],
            },
            PerformancePoint {
                ambient_temp_f: 67.,
                input_power_coeffs_w: [375., 1.21, 0.00216],
                cop_coeffs: [5.60, -0.0252, 0.00000254],
            },
        ],
        None,
        CapacityControl::SingleStage,
    )?;

    let top = HeatSourceSpec::resistance("top element", 4.5, Condensity::single_segment(9)?)?
        .with_turn_on_logic(HeatingLogic::top_third(20.))
        .with_vip()
        .with_followed_by("compressor");
    let compressor = HeatSourceSpec::compressor("compressor", compressor, Condensity::lowest_segments(6)?)
        .with_turn_on_logic(HeatingLogic::bottom_third(20.))
        .with_turn_on_logic(HeatingLogic::standby(15.))
        .with_lockout(LockoutBand {
            min_temp: 0.,
            max_temp: fahrenheit_to_celsius(120.),
            hysteresis: delta_fahrenheit_to_celsius(4.),
        })
        .with_backup("bottom element")
        .with_followed_by("bottom element");
    let bottom = HeatSourceSpec::resistance("bottom element", 4.5, Condensity::single_segment(0)?)?
        .with_turn_on_logic(HeatingLogic::bottom_third(20.))
        .with_turn_on_logic(HeatingLogic::standby(15.))
        .with_backup("compressor");

    Ok(ModelSpec {
        name: preset.to_string(),
        tank: TankSpec {
            volume_litres: 120.,
            ua_kj_per_hour_k: 10.,
            node_count: NODE_COUNT,
            mixes_on_draw: false,
            conduction: false,
        },
        setpoint: 50.,
        initial_temp: None,
        heat_sources: vec![top, compressor, bottom],
        allow_simultaneous_compressors: false,
    })
}

/// Wrapped-condenser heat pump with a VIP top element, fitted to lab measurements of the
/// Voltex PHPT-60
fn aosmith_phpt60(preset: &Preset) -> Result<ModelSpec, HpwhError> {
    let compressor = Compressor::new(
        CondenserConfiguration::Wrapped,
        vec![
            PerformancePoint {
                ambient_temp_f: 47.,
                input_power_coeffs_w: [467., 2.81, 0.0072],
                cop_coeffs: [4.86, -0.0222, -0.00001],
            },
            PerformancePoint {
                ambient_temp_f: 67.,
                input_power_coeffs_w: [541., 1.47, 0.0176],
                cop_coeffs: [6.58, -0.0392, 0.0000407],
            },
        ],
        None,
        CapacityControl::SingleStage,
    )?;
    let compressor_start = HeatingLogic::bottom_third(delta_fahrenheit_to_celsius(43.6));

    let top = HeatSourceSpec::resistance("top element", 4.25, Condensity::single_segment(8)?)?
        .with_turn_on_logic(HeatingLogic::top_third(delta_fahrenheit_to_celsius(25.)))
        .with_vip()
        .with_followed_by("compressor");
    let compressor = HeatSourceSpec::compressor("compressor", compressor, Condensity::lowest_segments(5)?)
        .with_turn_on_logic(compressor_start.clone())
        .with_turn_on_logic(HeatingLogic::standby(delta_fahrenheit_to_celsius(23.8)))
        .with_lockout(LockoutBand::from_fahrenheit(45., 120., 4.))
        .with_backup("bottom element")
        .with_followed_by("bottom element");
    let bottom = HeatSourceSpec::resistance("bottom element", 2., Condensity::single_segment(0)?)?
        .with_turn_on_logic(compressor_start)
        .with_backup("compressor");

    Ok(ModelSpec {
        name: preset.to_string(),
        tank: TankSpec {
            volume_litres: 215.8,
            ua_kj_per_hour_k: 7.31,
            node_count: NODE_COUNT,
            mixes_on_draw: true,
            conduction: false,
        },
        setpoint: fahrenheit_to_celsius(DEFAULT_SETPOINT_F),
        initial_temp: None,
        heat_sources: vec![top, compressor, bottom],
        allow_simultaneous_compressors: false,
    })
}

/// Conservative (high) standby UA, in kJ/(h.K), fitted to tank volume
pub fn generic_tank_ua(volume_litres: f64) -> f64 {
    let v1 = 7.5156316175 * litres_to_gallons(volume_litres).powf(0.33) + 5.9995357658;
    0.0076183819 * v1 * v1
}

/// Integrated heat pump sized to `volume_litres`, with compressor efficiency scaled by a
/// linear guess from `uef`. The top element turns on `top_element_delta` (deg C) below setpoint.
pub fn generic(
    volume_litres: f64,
    uef: f64,
    top_element_delta: f64,
) -> Result<ModelSpec, HpwhError> {
    if !(volume_litres > 0.) {
        return Err(HpwhError::invalid_model(format!(
            "tank volume must be positive, got {volume_litres} L"
        )));
    }
    if !(uef > 0.) {
        return Err(HpwhError::invalid_model(format!(
            "generic model needs a positive UEF, got {uef}"
        )));
    }
    let mut compressor = Compressor::new(
        CondenserConfiguration::Wrapped,
        vec![
            PerformancePoint {
                ambient_temp_f: 50.,
                input_power_coeffs_w: [187.064124, 1.939747, 0.],
                cop_coeffs: [5.4977772, -0.0243008, 0.],
            },
            PerformancePoint {
                ambient_temp_f: 70.,
                input_power_coeffs_w: [148.0418, 2.553291, 0.],
                cop_coeffs: [7.207307, -0.0335265, 0.],
            },
        ],
        Some(DefrostMap::default()),
        CapacityControl::SingleStage,
    )?;
    // 70% of the base curves at UEF 2, 95% at UEF 3.4
    let uef_fraction = (uef - 2.) / (3.4 - 2.);
    compressor.scale_performance((1. - uef_fraction) * 0.7 + uef_fraction * 0.95);

    let top = HeatSourceSpec::resistance("top element", 4.5, Condensity::single_segment(6)?)?
        .with_turn_on_logic(HeatingLogic::top_third(top_element_delta))
        .with_vip()
        .with_followed_by("bottom element");
    let bottom = HeatSourceSpec::resistance(
        "bottom element",
        4.,
        Condensity::new(&[0., 0.2, 0.8, 0., 0., 0., 0., 0., 0., 0., 0., 0.])?,
    )?
    .with_shut_off_logic(HeatingLogic::bottom_twelfth_max_temp(fahrenheit_to_celsius(86.1111)))
    .with_backup("compressor")
    .with_followed_by("compressor");
    let compressor = HeatSourceSpec::compressor("compressor", compressor, Condensity::lowest_segments(4)?)
        .with_turn_on_logic(HeatingLogic::bottom_third(delta_fahrenheit_to_celsius(33.6883)))
        .with_turn_on_logic(HeatingLogic::standby(delta_fahrenheit_to_celsius(12.392)))
        .with_lockout(LockoutBand::from_fahrenheit(45., 120., 2.))
        .with_backup("bottom element");

    Ok(ModelSpec {
        name: Preset::Generic.to_string(),
        tank: TankSpec {
            volume_litres,
            ua_kj_per_hour_k: generic_tank_ua(volume_litres),
            node_count: NODE_COUNT,
            mixes_on_draw: true,
            conduction: false,
        },
        setpoint: fahrenheit_to_celsius(DEFAULT_SETPOINT_F),
        initial_temp: None,
        heat_sources: vec![top, bottom, compressor],
        allow_simultaneous_compressors: false,
    })
}
