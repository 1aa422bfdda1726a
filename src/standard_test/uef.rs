use crate::core::material_properties::WATER;
use crate::core::step_engine::{StepConditions, StepEngine};
use crate::core::units::{kwh_to_kilojoules, HOURS_PER_DAY, MINUTES_PER_HOUR};
use crate::core::water_heater::WaterHeater;
use crate::errors::HpwhError;
use crate::reporter::Reporter;
use crate::simulation_time::SimulationTime;
use crate::standard_test::draw_patterns::{draw_pattern, minute_volumes};
use crate::standard_test::first_hour_rating::{Designation, FirstHourRating};
use crate::standard_test::{
    prepare_for_test, StandardTestOptions, StandardTestResult, StandardTestSummary,
    TestConditions, AMBIENT_TEMP, DELIVERY_TEMP, INLET_TEMP,
};
use tracing::debug;

/// Energy use and delivery from the start of the first draw until heating first stops after it
#[derive(Debug, Default)]
struct FirstRecovery {
    used_kj: f64,
    delivered_kj: f64,
    end_temp: Option<f64>,
}

/// The idle period from the end of the last recovery to the end of the test
#[derive(Debug)]
struct Standby {
    start_temp: f64,
    end_temp: f64,
    used_kj: f64,
    tank_temp_sum: f64,
    ambient_temp_sum: f64,
    minutes: usize,
}

/// Run the 24-hour simulated-use test with the draw pattern for `designation` and reduce
/// it to the energy factor.
pub(crate) fn run_24_hour_test(
    water_heater: &WaterHeater,
    designation: Designation,
    first_hour_rating: Option<FirstHourRating>,
    conditions: &TestConditions,
    options: &StandardTestOptions,
    reporter: &dyn Reporter,
) -> Result<StandardTestResult, HpwhError> {
    let mut water_heater = water_heater.clone();
    prepare_for_test(&mut water_heater, conditions, reporter)?;

    let thermocouples = options.thermocouple_count;
    let tank_heat_capacity = WATER.heat_capacity_kj_per_k(water_heater.tank().volume_litres());
    let initial_temp = water_heater.tank().thermocouple_average(thermocouples)?;

    let pattern = draw_pattern(designation);
    let volumes = minute_volumes(&pattern);
    let (first_draw_end, last_draw_end) = match (pattern.first(), pattern.last()) {
        (Some(first), Some(last)) => (first.end_minute(), last.end_minute()),
        _ => return Err(HpwhError::test_invalid("draw pattern is empty")),
    };

    let mut engine = StepEngine::new(water_heater);
    let mut used_kj = 0.;
    let mut delivered_kj = 0.;
    let mut removed_litres = 0.;
    let mut first_recovery = FirstRecovery::default();
    let mut standby: Option<Standby> = None;

    for step in SimulationTime::day().iter() {
        let step_conditions = StepConditions {
            minutes: step.timestep,
            ..conditions.idle().with_draw(volumes[step.index])
        };
        let outputs = engine.advance(&step_conditions, reporter)?;
        let step_used_kj = kwh_to_kilojoules(outputs.energy_input_kwh());
        let step_delivered_kj = kwh_to_kilojoules(outputs.delivered_energy_kwh);
        used_kj += step_used_kj;
        delivered_kj += step_delivered_kj;
        removed_litres += step_conditions.draw_volume_litres;

        let heating = engine.water_heater().is_heating();
        let tank_temp = engine.water_heater().tank().thermocouple_average(thermocouples)?;
        let minutes_done = (step.minute + step.timestep) as usize;

        if first_recovery.end_temp.is_none() {
            first_recovery.used_kj += step_used_kj;
            first_recovery.delivered_kj += step_delivered_kj;
            if minutes_done >= first_draw_end && first_recovery.used_kj > 0. && !heating {
                first_recovery.end_temp = Some(tank_temp);
            }
        }

        match standby.as_mut() {
            Some(standby) => {
                standby.used_kj += step_used_kj;
                standby.tank_temp_sum += tank_temp;
                standby.ambient_temp_sum += step_conditions.ambient_temp;
                standby.minutes += 1;
                standby.end_temp = tank_temp;
            }
            None if minutes_done >= last_draw_end && !heating => {
                standby = Some(Standby {
                    start_temp: tank_temp,
                    end_temp: tank_temp,
                    used_kj: 0.,
                    tank_temp_sum: 0.,
                    ambient_temp_sum: 0.,
                    minutes: 0,
                });
            }
            None => {}
        }
    }

    let final_temp = engine.water_heater().tank().thermocouple_average(thermocouples)?;

    let recovery_end_temp = first_recovery.end_temp.ok_or_else(|| {
        HpwhError::test_invalid("the first recovery did not complete within the test")
    })?;
    let recovery_efficiency = (first_recovery.delivered_kj
        + tank_heat_capacity * (recovery_end_temp - initial_temp))
        / first_recovery.used_kj;
    if !(recovery_efficiency > 0.) {
        return Err(HpwhError::test_invalid(format!(
            "recovery efficiency of {recovery_efficiency} is not positive"
        )));
    }

    let standby = standby
        .filter(|standby| standby.minutes > 0)
        .ok_or_else(|| HpwhError::test_invalid("no standby period remains after the last draw"))?;
    let standby_hours = standby.minutes as f64 / MINUTES_PER_HOUR as f64;
    let mean_standby_tank_temp = standby.tank_temp_sum / standby.minutes as f64;
    let mean_standby_ambient_temp = standby.ambient_temp_sum / standby.minutes as f64;
    let standby_temp_difference = mean_standby_tank_temp - mean_standby_ambient_temp;
    if !(standby_temp_difference > 0.) {
        return Err(HpwhError::test_invalid(
            "tank was not above ambient during standby",
        ));
    }
    let standby_ua_kj_per_hour_k = (standby.used_kj
        - tank_heat_capacity * (standby.end_temp - standby.start_temp) / recovery_efficiency)
        / (standby_hours * standby_temp_difference);

    let daily_energy_kj =
        used_kj - tank_heat_capacity * (final_temp - initial_temp) / recovery_efficiency;
    let adjusted_daily_energy_kj = daily_energy_kj
        - (AMBIENT_TEMP - conditions.ambient_temp)
            * standby_ua_kj_per_hour_k
            * HOURS_PER_DAY as f64;
    let nominal_delivered_kj = WATER.energy_content_kj(removed_litres, DELIVERY_TEMP, INLET_TEMP);
    let modified_daily_energy_kj =
        adjusted_daily_energy_kj + (nominal_delivered_kj - delivered_kj) / recovery_efficiency;
    let uef = nominal_delivered_kj / modified_daily_energy_kj;

    debug!("24-hour test with {designation} pattern: UEF {uef:.4}, recovery efficiency {recovery_efficiency:.4}");

    let (_, trace) = engine.into_parts();
    Ok(StandardTestResult {
        summary: StandardTestSummary {
            first_hour_rating,
            designation,
            configuration: options.configuration,
            recovery_efficiency,
            standby_ua_kj_per_hour_k,
            standby_hours,
            removed_volume_litres: removed_litres,
            delivered_energy_kj: delivered_kj,
            used_energy_kj: used_kj,
            daily_energy_kj,
            adjusted_daily_energy_kj,
            modified_daily_energy_kj,
            uef,
        },
        trace: options.save_output.then_some(trace),
    })
}
