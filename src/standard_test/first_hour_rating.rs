use crate::core::step_engine::{StepConditions, StepOutputs};
use crate::core::units::{gallons_to_litres, litres_to_gallons};
use crate::core::water_heater::WaterHeater;
use crate::errors::HpwhError;
use crate::reporter::Reporter;
use crate::standard_test::{prepare_for_test, TestConditions, TEST_FLOW_GPM};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use tracing::debug;

/// Length of the rating period
const RATING_MINUTES: usize = 60;
/// A single draw may not last longer than this
const MAX_DRAW_MINUTES: usize = 120;
/// A draw ends once the outlet temperature has fallen this far below its maximum during the draw
const OUTLET_TEMP_DROP: f64 = 8.3;

/// Usage bin of a water heater, which selects its simulated-use draw pattern
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, PartialEq, Eq, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum Designation {
    VerySmall,
    Low,
    Medium,
    High,
}

impl Designation {
    pub fn from_volume_litres(volume_litres: f64) -> Self {
        let gallons = litres_to_gallons(volume_litres);
        if gallons < 18. {
            Designation::VerySmall
        } else if gallons < 51. {
            Designation::Low
        } else if gallons < 75. {
            Designation::Medium
        } else {
            Designation::High
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FirstHourRating {
    pub designation: Designation,
    pub draw_volume_litres: f64,
    pub draw_count: usize,
}

#[derive(Clone, Copy, Debug)]
struct DrawRecord {
    volume_litres: f64,
    mean_outlet_temp: f64,
    min_outlet_temp: f64,
}

struct RatingClock<'a> {
    water_heater: &'a mut WaterHeater,
    reporter: &'a dyn Reporter,
    minute: usize,
}

impl RatingClock<'_> {
    fn step(&mut self, conditions: &StepConditions) -> Result<StepOutputs, HpwhError> {
        let outputs = self.water_heater.run_step(
            self.minute,
            self.minute as f64,
            conditions,
            self.reporter,
        )?;
        self.minute += 1;
        Ok(outputs)
    }

    /// Draw at the test flow rate until the outlet temperature falls `OUTLET_TEMP_DROP`
    /// below its maximum
    fn draw(&mut self, conditions: &TestConditions) -> Result<DrawRecord, HpwhError> {
        let draw_conditions = conditions.idle().with_draw(gallons_to_litres(TEST_FLOW_GPM));
        let mut volume_litres = 0.;
        let mut outlet_heat = 0.;
        let mut max_outlet_temp = f64::NEG_INFINITY;
        for _ in 0..MAX_DRAW_MINUTES {
            let outputs = self.step(&draw_conditions)?;
            let outlet_temp = outputs.outlet_temp.unwrap_or(conditions.inlet_temp);
            volume_litres += draw_conditions.draw_volume_litres;
            outlet_heat += draw_conditions.draw_volume_litres * outlet_temp;
            max_outlet_temp = max_outlet_temp.max(outlet_temp);
            if outlet_temp < max_outlet_temp - OUTLET_TEMP_DROP {
                return Ok(DrawRecord {
                    volume_litres,
                    mean_outlet_temp: outlet_heat / volume_litres,
                    min_outlet_temp: outlet_temp,
                });
            }
        }
        Err(HpwhError::test_invalid(format!(
            "first-hour rating draw did not end within {MAX_DRAW_MINUTES} minutes"
        )))
    }

    /// Idle until heating stops or the rating period ends; true if heating stopped
    fn recover(&mut self, conditions: &TestConditions) -> Result<bool, HpwhError> {
        let idle = conditions.idle();
        while self.water_heater.is_heating() {
            if self.minute >= RATING_MINUTES {
                return Ok(false);
            }
            self.step(&idle)?;
        }
        Ok(self.minute < RATING_MINUTES)
    }
}

/// Measure how much hot water the water heater can deliver in an hour, starting from a
/// recovered tank.
///
/// Draws are repeated, each followed by recovery, until the hour is up. A draw still in
/// progress at one hour is counted in full; if recovery is still under way at one hour a
/// final draw is made and credited in proportion to how its outlet temperature compares
/// with the previous draw's.
pub fn find_first_hour_rating(
    water_heater: &WaterHeater,
    conditions: &TestConditions,
    reporter: &dyn Reporter,
) -> Result<FirstHourRating, HpwhError> {
    let mut water_heater = water_heater.clone();
    prepare_for_test(&mut water_heater, conditions, reporter)?;

    let mut clock = RatingClock {
        water_heater: &mut water_heater,
        reporter,
        minute: 0,
    };
    let mut draw_volume_litres = 0.;
    let mut draw_count = 0;

    loop {
        let record = clock.draw(conditions)?;
        draw_count += 1;
        draw_volume_litres += record.volume_litres;
        if clock.minute >= RATING_MINUTES {
            break;
        }
        if clock.recover(conditions)? {
            continue;
        }

        // still recovering at one hour: one last draw, credited against the one before it
        let last = clock.draw(conditions)?;
        draw_count += 1;
        let denominator = record.mean_outlet_temp - record.min_outlet_temp;
        let fraction = if denominator > 0. {
            ((last.mean_outlet_temp - record.min_outlet_temp) / denominator).clamp(0., 1.)
        } else {
            0.
        };
        draw_volume_litres += fraction * last.volume_litres;
        break;
    }

    debug!(
        "first-hour rating of {:.1} L from {draw_count} draws",
        draw_volume_litres
    );
    Ok(FirstHourRating {
        designation: Designation::from_volume_litres(draw_volume_litres),
        draw_volume_litres,
        draw_count,
    })
}
