use crate::core::common::expit;
use crate::errors::HpwhError;
use serde::{Deserialize, Serialize};

/// Number of segments in the reference grid on which condensities are defined
pub const CONDENSITY_SIZE: usize = 12;

/// Volume-weighted mean of `samples` over the fractional height range [begin, end]
///
/// The samples are taken to be evenly spaced slabs covering the unit interval.
pub fn resampled_value(samples: &[f64], begin_fraction: f64, end_fraction: f64) -> f64 {
    let (begin_fraction, end_fraction) = if begin_fraction > end_fraction {
        (end_fraction.max(0.), begin_fraction.min(1.))
    } else {
        (begin_fraction.max(0.), end_fraction.min(1.))
    };
    if samples.is_empty() {
        return 0.;
    }

    let sample_count = samples.len() as f64;
    let mut index = ((begin_fraction * sample_count) as usize).min(samples.len() - 1);
    let mut previous_fraction = begin_fraction;
    let mut total_value_weight = 0.;
    let mut total_weight = 0.;
    while previous_fraction < end_fraction && index < samples.len() {
        let next_fraction = ((index + 1) as f64 / sample_count).min(end_fraction);
        let weight = next_fraction - previous_fraction;
        total_value_weight += weight * samples[index];
        total_weight += weight;
        previous_fraction = next_fraction;
        index += 1;
    }

    if total_weight > 0. {
        total_value_weight / total_weight
    } else {
        samples[index.min(samples.len() - 1)]
    }
}

/// Resample an intensive quantity (e.g. temperature) onto `size` evenly spaced slabs
pub fn resample(samples: &[f64], size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| resampled_value(samples, i as f64 / size as f64, (i + 1) as f64 / size as f64))
        .collect()
}

/// Resample an extensive quantity (e.g. a heat fraction) onto `size` slabs, conserving its sum
pub fn resample_extensive(samples: &[f64], size: usize) -> Vec<f64> {
    let scale = samples.len() as f64 / size as f64;
    resample(samples, size)
        .into_iter()
        .map(|value| value * scale)
        .collect()
}

/// Scale a non-negative distribution so that it sums to one.
/// An all-zero distribution is left as zeros.
pub fn normalize(distribution: &mut [f64]) {
    let total: f64 = distribution.iter().sum();
    if total > 0. {
        distribution.iter_mut().for_each(|value| *value /= total);
    } else {
        distribution.iter_mut().for_each(|value| *value = 0.);
    }
}

/// Where in the tank a heat source deposits its heat, as normalized weights over the
/// 12-segment reference grid (segment 0 at the bottom).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Condensity {
    weights: [f64; CONDENSITY_SIZE],
}

impl Condensity {
    pub fn new(weights: &[f64]) -> Result<Self, HpwhError> {
        if weights.len() != CONDENSITY_SIZE {
            return Err(HpwhError::invalid_model(format!(
                "condensity must have {CONDENSITY_SIZE} entries, got {}",
                weights.len()
            )));
        }
        if weights.iter().any(|weight| *weight < 0. || !weight.is_finite()) {
            return Err(HpwhError::invalid_model(
                "condensity weights must be finite and non-negative",
            ));
        }
        let mut normalized = [0.; CONDENSITY_SIZE];
        normalized.copy_from_slice(weights);
        normalize(&mut normalized);
        if normalized.iter().all(|weight| *weight == 0.) {
            return Err(HpwhError::invalid_model("condensity weights sum to zero"));
        }

        Ok(Self {
            weights: normalized,
        })
    }

    /// All heat deposited in one reference segment
    pub fn single_segment(segment: usize) -> Result<Self, HpwhError> {
        let mut weights = [0.; CONDENSITY_SIZE];
        *weights.get_mut(segment).ok_or_else(|| {
            HpwhError::invalid_model(format!("condensity segment {segment} is out of range"))
        })? = 1.;
        Self::new(&weights)
    }

    /// Heat spread evenly over the lowest `count` reference segments
    pub fn lowest_segments(count: usize) -> Result<Self, HpwhError> {
        let weights: Vec<f64> = (0..CONDENSITY_SIZE)
            .map(|segment| if segment < count { 1. } else { 0. })
            .collect();
        Self::new(&weights)
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Fraction of heat going to each of `node_count` tank nodes
    pub fn heat_distribution(&self, node_count: usize) -> Vec<f64> {
        resample_extensive(&self.weights, node_count)
    }

    /// Condensity-weighted mean of the tank node temperatures
    pub fn weighted_temperature(&self, node_temps: &[f64]) -> f64 {
        resample(node_temps, CONDENSITY_SIZE)
            .iter()
            .zip(self.weights.iter())
            .map(|(temp, weight)| temp * weight)
            .sum()
    }

    /// Index of the lowest tank node that receives any heat
    pub fn lowest_node(&self, node_count: usize) -> usize {
        self.heat_distribution(node_count)
            .iter()
            .position(|fraction| *fraction > 0.)
            .unwrap_or(0)
    }

    /// Temperature scale used to shrink the logistic profile of wrapped condensers,
    /// derived from the entropy of the distribution over the tank nodes
    pub fn shrinkage_temperature(&self, node_count: usize) -> f64 {
        let alpha = 1.;
        let beta = 2.;
        let entropy: f64 = self
            .heat_distribution(node_count)
            .iter()
            .filter(|fraction| **fraction > 0.)
            .map(|fraction| -fraction * fraction.ln())
            .sum();
        let size_factor = node_count as f64 / CONDENSITY_SIZE as f64;
        alpha + (entropy - size_factor.ln()) * beta
    }
}

impl TryFrom<Vec<f64>> for Condensity {
    type Error = HpwhError;

    fn try_from(weights: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(&weights)
    }
}

impl From<Condensity> for Vec<f64> {
    fn from(condensity: Condensity) -> Self {
        condensity.weights.to_vec()
    }
}

/// Heat distribution for a condenser wrapped around the tank wall.
///
/// Nodes at or above `lowest_node` receive heat according to a logistic profile in
/// temperature, weighted by how far each node is below the setpoint. If no node is
/// below the setpoint the heat is spread evenly.
pub fn thermal_distribution(
    node_temps: &[f64],
    shrinkage_temp: f64,
    lowest_node: usize,
    setpoint: f64,
) -> Vec<f64> {
    // 5 degF, dimensionless after division by the shrinkage temperature
    let offset = 5.0 / 1.8;
    let lowest_temp = node_temps.get(lowest_node).copied().unwrap_or_default();

    let mut distribution: Vec<f64> = node_temps
        .iter()
        .enumerate()
        .map(|(i, temp)| {
            if i < lowest_node {
                return 0.;
            }
            let weight =
                expit((temp - lowest_temp) / shrinkage_temp, offset) * (setpoint - temp);
            weight.max(0.)
        })
        .collect();

    if distribution.iter().sum::<f64>() > 0. {
        normalize(&mut distribution);
    } else {
        let even = 1. / node_temps.len() as f64;
        distribution.iter_mut().for_each(|value| *value = even);
    }
    distribution
}
