use crate::core::common::linear_interp;
use crate::core::units::{celsius_to_fahrenheit, WATTS_PER_KILOWATT};
use crate::errors::HpwhError;
use serde::{Deserialize, Serialize};

/// Operating point of a heat source at given ambient and condenser temperatures
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Performance {
    pub input_power_kw: f64,
    pub cop: f64,
    pub capacity_kw: f64,
}

/// Rated performance at one ambient temperature.
///
/// Input power (W) and COP are quadratics in the condenser temperature (deg F), with
/// coefficients ordered constant, linear, quadratic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformancePoint {
    pub ambient_temp_f: f64,
    pub input_power_coeffs_w: [f64; 3],
    pub cop_coeffs: [f64; 3],
}

impl PerformancePoint {
    fn evaluate(&self, condenser_temp_f: f64) -> (f64, f64) {
        let quadratic = |coeffs: &[f64; 3]| {
            coeffs[0] + coeffs[1] * condenser_temp_f + coeffs[2] * condenser_temp_f.powi(2)
        };
        (quadratic(&self.input_power_coeffs_w), quadratic(&self.cop_coeffs))
    }

    fn scale(&mut self, factor: f64) {
        self.cop_coeffs.iter_mut().for_each(|c| *c *= factor);
        self.input_power_coeffs_w
            .iter_mut()
            .for_each(|c| *c /= factor);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondenserConfiguration {
    /// Coil immersed in the water
    Submerged,
    /// Coil wrapped around the tank wall
    Wrapped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapacityControl {
    #[default]
    SingleStage,
    /// Capacity modulates down to `min_fraction` of full output so that the compressor can
    /// keep running where it would otherwise shut off partway through a step
    Modulating { min_fraction: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefrostPoint {
    pub ambient_temp_f: f64,
    pub derate: f64,
}

/// COP derating for frost build-up on the evaporator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefrostMap {
    points: Vec<DefrostPoint>,
}

impl Default for DefrostMap {
    fn default() -> Self {
        Self {
            points: vec![
                DefrostPoint {
                    ambient_temp_f: 17.,
                    derate: 1.,
                },
                DefrostPoint {
                    ambient_temp_f: 35.,
                    derate: 0.8865,
                },
                DefrostPoint {
                    ambient_temp_f: 47.,
                    derate: 1.,
                },
            ],
        }
    }
}

impl DefrostMap {
    /// Only applies strictly within the range of the map
    pub fn derate(&self, ambient_temp_f: f64) -> f64 {
        self.points
            .windows(2)
            .find(|pair| ambient_temp_f > pair[0].ambient_temp_f && ambient_temp_f < pair[1].ambient_temp_f)
            .map(|pair| {
                linear_interp(
                    ambient_temp_f,
                    pair[0].ambient_temp_f,
                    pair[1].ambient_temp_f,
                    pair[0].derate,
                    pair[1].derate,
                )
            })
            .unwrap_or(1.)
    }
}

/// Refrigerant-cycle heat source, characterised by a performance map over ambient temperature
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Compressor {
    pub configuration: CondenserConfiguration,
    performance_map: Vec<PerformancePoint>,
    #[serde(default)]
    defrost: Option<DefrostMap>,
    #[serde(default)]
    capacity_control: CapacityControl,
}

impl Compressor {
    pub fn new(
        configuration: CondenserConfiguration,
        mut performance_map: Vec<PerformancePoint>,
        defrost: Option<DefrostMap>,
        capacity_control: CapacityControl,
    ) -> Result<Self, HpwhError> {
        performance_map.sort_by(|a, b| a.ambient_temp_f.total_cmp(&b.ambient_temp_f));
        let compressor = Self {
            configuration,
            performance_map,
            defrost,
            capacity_control,
        };
        compressor.validate()?;
        Ok(compressor)
    }

    pub fn validate(&self) -> Result<(), HpwhError> {
        if self.performance_map.is_empty() {
            return Err(HpwhError::invalid_model(
                "compressor performance map has no points",
            ));
        }
        if self
            .performance_map
            .windows(2)
            .any(|pair| pair[0].ambient_temp_f >= pair[1].ambient_temp_f)
        {
            return Err(HpwhError::invalid_model(
                "compressor performance points must have distinct ambient temperatures in ascending order",
            ));
        }
        if let CapacityControl::Modulating { min_fraction } = self.capacity_control {
            if !(min_fraction > 0. && min_fraction <= 1.) {
                return Err(HpwhError::invalid_model(format!(
                    "minimum modulation fraction must be in (0, 1], got {min_fraction}"
                )));
            }
        }
        Ok(())
    }

    pub fn capacity_control(&self) -> CapacityControl {
        self.capacity_control
    }

    pub fn performance_map(&self) -> &[PerformancePoint] {
        &self.performance_map
    }

    /// Input power, COP and heating capacity at the given ambient and condenser
    /// temperatures (deg C).
    ///
    /// The quadratics of the two map points bracketing the ambient temperature are
    /// interpolated linearly, or extrapolated from the nearest two points outside the map.
    pub fn performance(&self, ambient_temp: f64, condenser_temp: f64) -> Performance {
        let ambient_temp_f = celsius_to_fahrenheit(ambient_temp);
        let condenser_temp_f = celsius_to_fahrenheit(condenser_temp);

        let (input_power_w, mut cop) = match self.performance_map.as_slice() {
            [] => (0., 0.),
            [only] => only.evaluate(condenser_temp_f),
            points => {
                let upper = points
                    .partition_point(|point| point.ambient_temp_f < ambient_temp_f)
                    .clamp(1, points.len() - 1);
                let (below, above) = (&points[upper - 1], &points[upper]);
                let (input_below, cop_below) = below.evaluate(condenser_temp_f);
                let (input_above, cop_above) = above.evaluate(condenser_temp_f);
                (
                    linear_interp(
                        ambient_temp_f,
                        below.ambient_temp_f,
                        above.ambient_temp_f,
                        input_below,
                        input_above,
                    ),
                    linear_interp(
                        ambient_temp_f,
                        below.ambient_temp_f,
                        above.ambient_temp_f,
                        cop_below,
                        cop_above,
                    ),
                )
            }
        };

        if let Some(defrost) = &self.defrost {
            cop *= defrost.derate(ambient_temp_f);
        }

        let input_power_kw = input_power_w / WATTS_PER_KILOWATT as f64;
        Performance {
            input_power_kw,
            cop,
            capacity_kw: cop * input_power_kw,
        }
    }

    /// Scale efficiency by `factor` at unchanged heating capacity
    pub fn scale_performance(&mut self, factor: f64) {
        for point in self.performance_map.iter_mut() {
            point.scale(factor);
        }
    }

    /// Scale the efficiency of the map point at exactly `ambient_temp_f`; false if there is none
    pub fn scale_point_performance(&mut self, ambient_temp_f: f64, factor: f64) -> bool {
        match self
            .performance_map
            .iter_mut()
            .find(|point| point.ambient_temp_f == ambient_temp_f)
        {
            Some(point) => {
                point.scale(factor);
                true
            }
            None => false,
        }
    }

    /// Add a map point at `ambient_temp_f` without changing the performance the map gives
    /// anywhere. Its coefficients follow the same straight line in ambient temperature that
    /// `performance` interpolates (or extrapolates) along.
    pub fn insert_point(&mut self, ambient_temp_f: f64) {
        let index = self
            .performance_map
            .partition_point(|point| point.ambient_temp_f < ambient_temp_f);
        if self
            .performance_map
            .get(index)
            .is_some_and(|point| point.ambient_temp_f == ambient_temp_f)
        {
            return;
        }

        let point = match self.performance_map.as_slice() {
            [] => return,
            [only] => PerformancePoint {
                ambient_temp_f,
                ..only.clone()
            },
            points => {
                let upper = index.clamp(1, points.len() - 1);
                let (below, above) = (&points[upper - 1], &points[upper]);
                let line = |low: &[f64; 3], high: &[f64; 3]| -> [f64; 3] {
                    std::array::from_fn(|i| {
                        linear_interp(
                            ambient_temp_f,
                            below.ambient_temp_f,
                            above.ambient_temp_f,
                            low[i],
                            high[i],
                        )
                    })
                };
                PerformancePoint {
                    ambient_temp_f,
                    input_power_coeffs_w: line(
                        &below.input_power_coeffs_w,
                        &above.input_power_coeffs_w,
                    ),
                    cop_coeffs: line(&below.cop_coeffs, &above.cop_coeffs),
                }
            }
        };
        self.performance_map.insert(index, point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::fahrenheit_to_celsius;
    use approx::assert_relative_eq;
    use rstest::*;

    #[fixture]
    fn compressor() -> Compressor {
        Compressor::new(
            CondenserConfiguration::Wrapped,
            vec![
                PerformancePoint {
                    ambient_temp_f: 67.,
                    input_power_coeffs_w: [375., 1.21, 0.00216],
                    cop_coeffs: [5.60, -0.0252, 0.00000254],
                },
                PerformancePoint {
                    ambient_temp_f: 47.,
                    input_power_coeffs_w: [290., 1.59, 0.00107],
                    cop_coeffs: [4.49, -0.0187, -0.0000133],
                },
            ],
            None,
            CapacityControl::SingleStage,
        )
        .unwrap()
    }

    fn expected_at_point(point: &PerformancePoint, condenser_f: f64) -> (f64, f64) {
        point.evaluate(condenser_f)
    }

    #[rstest]
    fn should_evaluate_map_point_exactly(compressor: Compressor) {
        let condenser_f = 100.;
        let (input_w, cop) = expected_at_point(&compressor.performance_map()[0], condenser_f);
        let performance =
            compressor.performance(fahrenheit_to_celsius(47.), fahrenheit_to_celsius(condenser_f));
        assert_relative_eq!(performance.input_power_kw, input_w / 1000., max_relative = 1e-9);
        assert_relative_eq!(performance.cop, cop, max_relative = 1e-9);
        assert_relative_eq!(
            performance.capacity_kw,
            performance.cop * performance.input_power_kw
        );
    }

    #[rstest]
    fn should_interpolate_between_ambient_points(compressor: Compressor) {
        let condenser_f = 100.;
        let (input_47, cop_47) = expected_at_point(&compressor.performance_map()[0], condenser_f);
        let (input_67, cop_67) = expected_at_point(&compressor.performance_map()[1], condenser_f);
        let performance =
            compressor.performance(fahrenheit_to_celsius(57.), fahrenheit_to_celsius(condenser_f));
        assert_relative_eq!(
            performance.input_power_kw,
            (input_47 + input_67) / 2000.,
            max_relative = 1e-9
        );
        assert_relative_eq!(performance.cop, (cop_47 + cop_67) / 2., max_relative = 1e-9);
    }

    #[rstest]
    fn should_extrapolate_beyond_map(compressor: Compressor) {
        let condenser_f = 100.;
        let (_, cop_47) = expected_at_point(&compressor.performance_map()[0], condenser_f);
        let (_, cop_67) = expected_at_point(&compressor.performance_map()[1], condenser_f);
        let performance =
            compressor.performance(fahrenheit_to_celsius(87.), fahrenheit_to_celsius(condenser_f));
        assert_relative_eq!(performance.cop, 2. * cop_67 - cop_47, max_relative = 1e-9);
    }

    #[rstest]
    fn should_derate_only_inside_defrost_range() {
        let defrost = DefrostMap::default();
        assert_eq!(defrost.derate(17.), 1.);
        assert_eq!(defrost.derate(47.), 1.);
        assert_eq!(defrost.derate(10.), 1.);
        assert_relative_eq!(defrost.derate(35.), 0.8865);
        assert_relative_eq!(defrost.derate(41.), (0.8865 + 1.) / 2., max_relative = 1e-12);
    }

    #[rstest]
    fn should_keep_capacity_when_scaling_performance(mut compressor: Compressor) {
        let ambient = 15.;
        let condenser = 40.;
        let before = compressor.performance(ambient, condenser);
        compressor.scale_performance(1.25);
        let after = compressor.performance(ambient, condenser);
        assert_relative_eq!(after.cop, before.cop * 1.25, max_relative = 1e-9);
        assert_relative_eq!(after.capacity_kw, before.capacity_kw, max_relative = 1e-9);
    }

    #[rstest]
    #[case(57.)]
    #[case(95.)]
    #[case(30.)]
    fn should_keep_performance_when_inserting_point(
        mut compressor: Compressor,
        #[case] ambient_f: f64,
    ) {
        let before: Vec<Performance> = [20., 47., 57., 67., 95., 110.]
            .iter()
            .map(|ambient| compressor.performance(fahrenheit_to_celsius(*ambient), 45.))
            .collect();
        compressor.insert_point(ambient_f);
        assert_eq!(compressor.performance_map().len(), 3);
        assert!(compressor
            .performance_map()
            .windows(2)
            .all(|pair| pair[0].ambient_temp_f < pair[1].ambient_temp_f));

        for (ambient, expected) in [20., 47., 57., 67., 95., 110.].iter().zip(before) {
            let after = compressor.performance(fahrenheit_to_celsius(*ambient), 45.);
            assert_relative_eq!(after.cop, expected.cop, max_relative = 1e-9);
            assert_relative_eq!(after.input_power_kw, expected.input_power_kw, max_relative = 1e-9);
        }
    }

    #[rstest]
    fn should_not_duplicate_existing_point(mut compressor: Compressor) {
        compressor.insert_point(47.);
        assert_eq!(compressor.performance_map().len(), 2);
    }

    #[rstest]
    fn should_scale_only_the_chosen_point(mut compressor: Compressor) {
        let at_47 = compressor.performance(fahrenheit_to_celsius(47.), 40.);
        let at_67 = compressor.performance(fahrenheit_to_celsius(67.), 40.);

        assert!(compressor.scale_point_performance(67., 1.2));
        assert!(!compressor.scale_point_performance(50., 1.2));

        let scaled_47 = compressor.performance(fahrenheit_to_celsius(47.), 40.);
        let scaled_67 = compressor.performance(fahrenheit_to_celsius(67.), 40.);
        assert_relative_eq!(scaled_47.cop, at_47.cop, max_relative = 1e-9);
        assert_relative_eq!(scaled_67.cop, at_67.cop * 1.2, max_relative = 1e-9);
        assert_relative_eq!(scaled_67.capacity_kw, at_67.capacity_kw, max_relative = 1e-9);
    }

    #[rstest]
    fn should_reject_invalid_maps() {
        assert!(matches!(
            Compressor::new(
                CondenserConfiguration::Submerged,
                vec![],
                None,
                CapacityControl::SingleStage
            ),
            Err(HpwhError::InvalidModel(_))
        ));
        let point = PerformancePoint {
            ambient_temp_f: 50.,
            input_power_coeffs_w: [200., 2., 0.],
            cop_coeffs: [5., -0.02, 0.],
        };
        assert!(Compressor::new(
            CondenserConfiguration::Submerged,
            vec![point.clone(), point],
            None,
            CapacityControl::SingleStage
        )
        .is_err());
        assert!(Compressor::new(
            CondenserConfiguration::Submerged,
            vec![PerformancePoint {
                ambient_temp_f: 50.,
                input_power_coeffs_w: [200., 2., 0.],
                cop_coeffs: [5., -0.02, 0.],
            }],
            None,
            CapacityControl::Modulating { min_fraction: 0. }
        )
        .is_err());
    }
}
