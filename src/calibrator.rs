use crate::core::solvers::brent_root;
use crate::core::units::celsius_to_fahrenheit;
use crate::core::water_heater::WaterHeater;
use crate::errors::HpwhError;
use crate::reporter::Reporter;
use crate::standard_test::first_hour_rating::{find_first_hour_rating, Designation};
use crate::standard_test::{run_standard_test, StandardTestOptions, TestConfiguration};
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use std::cell::Cell;
use tracing::{debug, info};

const DEFAULT_TOLERANCE: f64 = 0.001;
const DEFAULT_MAX_EVALUATIONS: usize = 50;
const GRID_MIN_FACTOR: f64 = 0.25;
const GRID_MAX_FACTOR: f64 = 4.;
const GRID_SIZE: usize = 9;

/// Energy factor(s) the calibrated model should achieve
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CalibrationTarget {
    /// One energy factor, measured at the test options' configuration and reached by
    /// scaling the whole compressor performance map
    Single(f64),
    /// E50, UEF and E95 together. Each is reached by scaling the map point at its test's
    /// ambient temperature, points being added there first where the map has none.
    EnergyFactors { e50: f64, uef: f64, e95: f64 },
}

impl CalibrationTarget {
    fn targets(&self, configuration: TestConfiguration) -> Vec<(TestConfiguration, f64)> {
        match *self {
            CalibrationTarget::Single(target) => vec![(configuration, target)],
            CalibrationTarget::EnergyFactors { e50, uef, e95 } => vec![
                (TestConfiguration::E50, e50),
                (TestConfiguration::Uef, uef),
                (TestConfiguration::E95, e95),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationOptions {
    pub target: CalibrationTarget,
    /// Largest accepted difference between an achieved and a target energy factor
    pub tolerance: f64,
    /// Cap on standard-test runs per target, including the initial grid
    pub max_evaluations: usize,
    /// Candidate efficiency scale factors, in ascending order
    pub grid: Vec<f64>,
    pub test_options: StandardTestOptions,
}

impl CalibrationOptions {
    pub fn new(target_uef: f64) -> Self {
        let ratio = (GRID_MAX_FACTOR / GRID_MIN_FACTOR).powf(1. / (GRID_SIZE - 1) as f64);
        Self {
            target: CalibrationTarget::Single(target_uef),
            tolerance: DEFAULT_TOLERANCE,
            max_evaluations: DEFAULT_MAX_EVALUATIONS,
            grid: (0..GRID_SIZE)
                .map(|i| GRID_MIN_FACTOR * ratio.powi(i as i32))
                .collect(),
            test_options: Default::default(),
        }
    }

    pub fn energy_factors(e50: f64, uef: f64, e95: f64) -> Self {
        Self {
            target: CalibrationTarget::EnergyFactors { e50, uef, e95 },
            ..Self::new(uef)
        }
    }

    fn validate(&self) -> Result<(), HpwhError> {
        if let Some((configuration, target)) = self
            .target
            .targets(self.test_options.configuration)
            .into_iter()
            .find(|(_, target)| !(*target > 0.))
        {
            return Err(HpwhError::invalid_model(format!(
                "target {configuration} must be positive, got {target}"
            )));
        }
        if self.grid.len() < 2
            || self.grid.iter().any(|factor| !(*factor > 0.))
            || self.grid.iter().tuple_windows().any(|(a, b)| a >= b)
        {
            return Err(HpwhError::invalid_model(
                "calibration grid needs at least two positive factors in ascending order",
            ));
        }
        if self.max_evaluations <= self.grid.len() {
            return Err(HpwhError::invalid_model(format!(
                "{} evaluations leave no room to refine a grid of {} factors",
                self.max_evaluations,
                self.grid.len()
            )));
        }
        Ok(())
    }
}

/// How one target was reached
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FactorFit {
    pub configuration: TestConfiguration,
    /// Factor applied to compressor COP (and inversely input power)
    pub factor: f64,
    pub energy_factor: f64,
}

#[derive(Clone, Debug)]
pub struct CalibrationResult {
    /// One entry per target
    pub fits: Vec<FactorFit>,
    pub designation: Designation,
    /// Number of standard tests run
    pub evaluations: usize,
    pub water_heater: WaterHeater,
}

impl CalibrationResult {
    /// Energy factor the calibrated model achieves in `configuration`, if it was a target
    pub fn energy_factor(&self, configuration: TestConfiguration) -> Option<f64> {
        self.fits
            .iter()
            .find(|fit| fit.configuration == configuration)
            .map(|fit| fit.energy_factor)
    }
}

fn scaled(water_heater: &WaterHeater, factor: f64) -> WaterHeater {
    let mut water_heater = water_heater.clone();
    water_heater.scale_compressor_performance(factor);
    water_heater
}

fn point_scaling(ambient_temp_f: f64) -> impl Fn(&WaterHeater, f64) -> WaterHeater + Sync {
    move |water_heater: &WaterHeater, factor: f64| {
        let mut water_heater = water_heater.clone();
        water_heater.scale_compressor_point(ambient_temp_f, factor);
        water_heater
    }
}

fn test_ambient_f(configuration: TestConfiguration) -> f64 {
    celsius_to_fahrenheit(configuration.ambient_temp())
}

/// Find the factor for which `scaling` gives `target` in the test `test_options` describe.
///
/// The grid of factors is tested in parallel, each on its own copy of the model. The first
/// adjacent pair of successful candidates that brackets the target is then refined with
/// Brent's method. Candidates whose test fails are reported and skipped. Returns the factor
/// and the number of tests run.
fn fit_factor(
    water_heater: &WaterHeater,
    scaling: &(dyn Fn(&WaterHeater, f64) -> WaterHeater + Sync),
    target: f64,
    options: &CalibrationOptions,
    test_options: &StandardTestOptions,
    reporter: &dyn Reporter,
) -> Result<(f64, usize), HpwhError> {
    let configuration = test_options.configuration;
    let residual = |factor: f64| -> Result<f64, HpwhError> {
        let summary =
            run_standard_test(&scaling(water_heater, factor), test_options, reporter)?.summary;
        Ok(summary.uef - target)
    };

    let candidates: Vec<(f64, f64)> = options
        .grid
        .par_iter()
        .map(|&factor| match residual(factor) {
            Ok(residual) => Some((factor, residual)),
            Err(e) => {
                reporter.warning(&format!(
                    "{configuration} calibration candidate with factor {factor:.4} failed and is skipped: {e}"
                ));
                None
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();
    let evaluations = options.grid.len();
    debug!("{configuration} calibration grid residuals: {candidates:?}");

    if let Some((factor, _)) = candidates
        .iter()
        .find(|(_, residual)| is_close!(*residual, 0., abs_tol = options.tolerance))
    {
        return Ok((*factor, evaluations));
    }

    let ((low, _), (high, _)) = candidates
        .iter()
        .tuple_windows()
        .find(|((_, a), (_, b))| a.signum() != b.signum())
        .ok_or_else(|| {
            HpwhError::Convergence(format!(
                "target {configuration} {target} is not reached by any factor in [{}, {}]",
                options.grid[0],
                options.grid[options.grid.len() - 1]
            ))
        })?;

    let refinements = Cell::new(0);
    // one evaluation is kept back to verify the result
    let max_iter = options.max_evaluations - evaluations - 1;
    let root = brent_root(
        |factor| {
            refinements.set(refinements.get() + 1);
            residual(factor)
        },
        *low,
        *high,
        options.tolerance / 10.,
        max_iter,
    )
    .map_err(|e| match e {
        HpwhError::FailureInSimulation(e) => HpwhError::Convergence(e.to_string()),
        e => e,
    })?;
    Ok((root, evaluations + refinements.get()))
}

/// Scale the compressor efficiency of `water_heater` until its simulated energy factors
/// match `options.target`.
///
/// Every target shares the draw pattern, which is fixed up front since scaling efficiency
/// leaves capacity unchanged. With several targets the map point of each test's ambient
/// temperature is the only one that test sees, so each factor is fitted on its own and the
/// combined model is verified against every target at the end.
pub fn calibrate(
    water_heater: &WaterHeater,
    options: &CalibrationOptions,
    reporter: &dyn Reporter,
) -> Result<CalibrationResult, HpwhError> {
    if !water_heater.has_compressor() {
        return Err(HpwhError::invalid_model(format!(
            "model '{}' has no compressor to calibrate",
            water_heater.name()
        )));
    }
    options.validate()?;

    let targets = options.target.targets(options.test_options.configuration);
    let mut test_options = options.test_options.clone();
    let designation = match test_options.designation {
        Some(designation) => designation,
        None => {
            let mut rated = water_heater.clone();
            if test_options.change_setpoint {
                rated.set_setpoint(test_options.setpoint)?;
            }
            let rating_configuration = match options.target {
                CalibrationTarget::Single(_) => test_options.configuration,
                CalibrationTarget::EnergyFactors { .. } => TestConfiguration::Uef,
            };
            find_first_hour_rating(&rated, &rating_configuration.conditions(), reporter)?
                .designation
        }
    };
    test_options.designation = Some(designation);
    let options_for = |configuration: TestConfiguration| StandardTestOptions {
        configuration,
        ..test_options.clone()
    };

    let mut evaluations = 0;
    let mut factors = Vec::with_capacity(targets.len());
    let water_heater = match options.target {
        CalibrationTarget::Single(target) => {
            let (factor, fit_evaluations) = fit_factor(
                water_heater,
                &scaled,
                target,
                options,
                &test_options,
                reporter,
            )?;
            evaluations += fit_evaluations;
            factors.push(factor);
            scaled(water_heater, factor)
        }
        CalibrationTarget::EnergyFactors { .. } => {
            let mut refined = water_heater.clone();
            let ambient_temps_f: Vec<f64> = targets
                .iter()
                .map(|(configuration, _)| test_ambient_f(*configuration))
                .collect();
            refined.add_compressor_map_points(&ambient_temps_f);

            let mut calibrated = refined.clone();
            for (configuration, target) in &targets {
                let ambient_temp_f = test_ambient_f(*configuration);
                let (factor, fit_evaluations) = fit_factor(
                    &refined,
                    &point_scaling(ambient_temp_f),
                    *target,
                    options,
                    &options_for(*configuration),
                    reporter,
                )?;
                evaluations += fit_evaluations;
                debug!("{configuration} fitted with factor {factor:.6} at {ambient_temp_f:.2} degF");
                factors.push(factor);
                calibrated.scale_compressor_point(ambient_temp_f, factor);
            }
            calibrated
        }
    };

    let mut fits = Vec::with_capacity(targets.len());
    for ((configuration, target), factor) in targets.iter().zip(factors) {
        let energy_factor = run_standard_test(&water_heater, &options_for(*configuration), reporter)?
            .summary
            .uef;
        evaluations += 1;
        if !is_close!(energy_factor, *target, abs_tol = options.tolerance) {
            return Err(HpwhError::Convergence(format!(
                "calibrated model gives {configuration} {energy_factor:.4}, not within {} of the target {target}",
                options.tolerance
            )));
        }
        fits.push(FactorFit {
            configuration: *configuration,
            factor,
            energy_factor,
        });
    }

    info!("calibrated to {fits:?} after {evaluations} tests");
    Ok(CalibrationResult {
        fits,
        designation,
        evaluations,
        water_heater,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::Preset;
    use crate::reporter::RecordingReporter;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn preset(preset: Preset) -> WaterHeater {
        WaterHeater::from_spec(&preset.spec().unwrap()).unwrap()
    }

    #[rstest]
    fn should_space_default_grid_geometrically() {
        let grid = CalibrationOptions::new(3.).grid;
        assert_eq!(grid.len(), 9);
        assert_abs_diff_eq!(grid[0], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(grid[4], 1., epsilon = 1e-12);
        assert_abs_diff_eq!(grid[8], 4., epsilon = 1e-12);
    }

    #[rstest]
    fn should_calibrate_generic_model_to_target() {
        let water_heater = preset(Preset::Generic);
        let options = CalibrationOptions {
            test_options: StandardTestOptions {
                designation: Some(Designation::Medium),
                ..Default::default()
            },
            ..CalibrationOptions::new(3.)
        };
        let reporter = RecordingReporter::default();
        let result = calibrate(&water_heater, &options, &reporter).unwrap();

        let uef = result.energy_factor(TestConfiguration::Uef).unwrap();
        assert_abs_diff_eq!(uef, 3., epsilon = 0.001);
        assert_eq!(result.fits.len(), 1);
        assert!(result.evaluations <= options.max_evaluations);
        assert_eq!(result.designation, Designation::Medium);

        // the calibrated model reproduces the UEF on its own
        let check = run_standard_test(&result.water_heater, &options.test_options, &reporter)
            .unwrap()
            .summary;
        assert_eq!(check.uef, uef);
    }

    #[rstest]
    fn should_calibrate_e50_uef_and_e95_together() {
        let water_heater = preset(Preset::Generic);
        let options = CalibrationOptions {
            test_options: StandardTestOptions {
                designation: Some(Designation::Medium),
                ..Default::default()
            },
            ..CalibrationOptions::energy_factors(3., 3.5, 4.)
        };
        let reporter = RecordingReporter::default();
        let result = calibrate(&water_heater, &options, &reporter).unwrap();

        let configurations: Vec<TestConfiguration> =
            result.fits.iter().map(|fit| fit.configuration).collect();
        assert_eq!(
            configurations,
            [TestConfiguration::E50, TestConfiguration::Uef, TestConfiguration::E95]
        );
        // each test is rerun on the combined model, whose map gained the test ambients
        for (configuration, target) in [
            (TestConfiguration::E50, 3.),
            (TestConfiguration::Uef, 3.5),
            (TestConfiguration::E95, 4.),
        ] {
            let test_options = StandardTestOptions {
                configuration,
                ..options.test_options.clone()
            };
            let measured = run_standard_test(&result.water_heater, &test_options, &reporter)
                .unwrap()
                .summary
                .uef;
            assert_abs_diff_eq!(measured, target, epsilon = 0.001);
            assert_eq!(result.energy_factor(configuration), Some(measured));
        }
        assert!(result.evaluations <= 3 * options.max_evaluations);
    }

    #[rstest]
    fn should_fit_each_energy_factor_with_its_own_map_point() {
        let mut water_heater = preset(Preset::Generic);
        let ambients: Vec<f64> = [TestConfiguration::E50, TestConfiguration::Uef, TestConfiguration::E95]
            .iter()
            .map(|configuration| test_ambient_f(*configuration))
            .collect();
        water_heater.add_compressor_map_points(&ambients);
        let options = StandardTestOptions {
            designation: Some(Designation::Medium),
            configuration: TestConfiguration::E50,
            ..Default::default()
        };
        let reporter = RecordingReporter::default();
        let e50 = |water_heater: &WaterHeater| {
            run_standard_test(water_heater, &options, &reporter)
                .unwrap()
                .summary
                .uef
        };
        let before = e50(&water_heater);

        // scaling the E95 point leaves the E50 test untouched
        assert!(water_heater.scale_compressor_point(ambients[2], 1.5));
        assert_abs_diff_eq!(e50(&water_heater), before, epsilon = 1e-9);
        assert!(water_heater.scale_compressor_point(ambients[0], 1.5));
        assert!(e50(&water_heater) > before);
    }

    #[rstest]
    fn should_reject_non_positive_energy_factor_target() {
        assert!(matches!(
            calibrate(
                &preset(Preset::Generic),
                &CalibrationOptions::energy_factors(3., 0., 4.),
                &RecordingReporter::default()
            ),
            Err(HpwhError::InvalidModel(_))
        ));
    }

    #[rstest]
    fn should_reject_model_without_compressor() {
        let result = calibrate(
            &preset(Preset::RestankRealistic),
            &CalibrationOptions::new(0.9),
            &RecordingReporter::default(),
        );
        assert!(matches!(result, Err(HpwhError::InvalidModel(_))));
    }

    #[rstest]
    fn should_fail_to_converge_on_unreachable_target() {
        let options = CalibrationOptions {
            test_options: StandardTestOptions {
                designation: Some(Designation::Medium),
                ..Default::default()
            },
            ..CalibrationOptions::new(100.)
        };
        let result = calibrate(&preset(Preset::Generic), &options, &RecordingReporter::default());
        assert!(matches!(result, Err(HpwhError::Convergence(_))));
    }

    #[rstest]
    #[case(vec![1.])]
    #[case(vec![2., 1.])]
    #[case(vec![0., 1.])]
    fn should_reject_bad_grid(#[case] grid: Vec<f64>) {
        let options = CalibrationOptions {
            grid,
            ..CalibrationOptions::new(3.)
        };
        assert!(matches!(
            calibrate(&preset(Preset::Generic), &options, &RecordingReporter::default()),
            Err(HpwhError::InvalidModel(_))
        ));
    }
}
