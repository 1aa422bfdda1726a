use crate::core::distribution::{resample, resampled_value};
use crate::core::material_properties::WATER;
use crate::core::units::{
    LITRES_PER_CUBIC_FOOT, LITRES_PER_CUBIC_METRE, METRES_PER_FOOT, MINUTES_PER_HOUR,
    SECONDS_PER_MINUTE,
};
use crate::errors::HpwhError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::RangeInclusive;

/// Ratio of tank height to tank radius
const ASPECT_RATIO: f64 = 4.75;
/// The bottom 1/N of the tank is stirred by incoming water on a draw
const MIX_BELOW_DIVISOR_ON_DRAW: usize = 3;
const MIX_FACTOR_ON_DRAW: f64 = 1. / 3.;

/// Description of a storage tank, as supplied by a model loader
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TankSpec {
    pub volume_litres: f64,
    /// Overall heat-loss coefficient, in kJ/(h.K)
    pub ua_kj_per_hour_k: f64,
    pub node_count: usize,
    #[serde(default)]
    pub mixes_on_draw: bool,
    #[serde(default)]
    pub conduction: bool,
}

/// Result of removing water from the top of the tank
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawOutcome {
    pub volume_removed_litres: f64,
    pub volume_injected_litres: f64,
    /// Mean temperature of the water leaving the tank
    pub outlet_temp: f64,
    /// Energy carried away by the draw relative to the inlet water, in kJ
    pub delivered_energy_kj: f64,
}

/// A vertically stratified tank of water, discretized into equal-volume nodes.
///
/// Node 0 is at the bottom of the tank and node N-1 at the top. Temperatures are in deg C.
#[derive(Clone, Debug)]
pub struct Tank {
    node_temps: Vec<f64>,
    volume_litres: f64,
    ua_kj_per_hour_k: f64,
    node_volume_litres: f64,
    node_heat_capacity: f64, // kJ/K
    height_m: f64,
    node_height_m: f64,
    frac_area_top: f64,  // each of top and bottom, as fraction of total surface area
    frac_area_side: f64, // as fraction of total surface area
    mixes_on_draw: bool,
    conduction: bool,
}

impl Tank {
    /// Arguments:
    /// * `spec` - volume, heat-loss coefficient and discretization of the tank
    /// * `initial_temp` - uniform starting temperature of the water, in deg C
    pub fn new(spec: &TankSpec, initial_temp: f64) -> Result<Self, HpwhError> {
        if !(spec.volume_litres > 0.) {
            return Err(HpwhError::invalid_model(format!(
                "tank volume must be positive, got {} L",
                spec.volume_litres
            )));
        }
        if spec.node_count == 0 {
            return Err(HpwhError::invalid_model("tank must have at least one node"));
        }
        if spec.ua_kj_per_hour_k < 0. {
            return Err(HpwhError::invalid_model(format!(
                "tank UA must not be negative, got {}",
                spec.ua_kj_per_hour_k
            )));
        }

        let radius_m = Self::radius_m(spec.volume_litres);
        let height_m = ASPECT_RATIO * radius_m;
        let node_volume_litres = spec.volume_litres / spec.node_count as f64;

        Ok(Self {
            node_temps: vec![initial_temp; spec.node_count],
            volume_litres: spec.volume_litres,
            ua_kj_per_hour_k: spec.ua_kj_per_hour_k,
            node_volume_litres,
            node_heat_capacity: WATER.heat_capacity_kj_per_k(node_volume_litres),
            height_m,
            node_height_m: height_m / spec.node_count as f64,
            frac_area_top: radius_m / (2. * (height_m + radius_m)),
            frac_area_side: height_m / (height_m + radius_m),
            mixes_on_draw: spec.mixes_on_draw,
            conduction: spec.conduction,
        })
    }

    /// Radius of a cylindrical tank of the given volume with the standard aspect ratio
    pub fn radius_m(volume_litres: f64) -> f64 {
        let volume_ft3 = volume_litres / LITRES_PER_CUBIC_FOOT;
        (volume_ft3 / PI / ASPECT_RATIO).cbrt() * METRES_PER_FOOT
    }

    pub fn node_count(&self) -> usize {
        self.node_temps.len()
    }

    pub fn node_temps(&self) -> &[f64] {
        &self.node_temps
    }

    pub fn bottom_temp(&self) -> f64 {
        self.node_temps[0]
    }

    pub fn top_temp(&self) -> f64 {
        self.node_temps[self.node_count() - 1]
    }

    /// Replace the node temperatures, resampling if the profile has a different resolution
    pub fn set_node_temps(&mut self, temps: &[f64]) -> Result<(), HpwhError> {
        if temps.is_empty() {
            return Err(HpwhError::invalid_model("temperature profile is empty"));
        }
        self.node_temps = if temps.len() == self.node_count() {
            temps.to_vec()
        } else {
            resample(temps, self.node_count())
        };
        Ok(())
    }

    pub fn set_uniform_temp(&mut self, temp: f64) {
        self.node_temps.iter_mut().for_each(|node_temp| *node_temp = temp);
    }

    pub fn volume_litres(&self) -> f64 {
        self.volume_litres
    }

    pub fn ua_kj_per_hour_k(&self) -> f64 {
        self.ua_kj_per_hour_k
    }

    pub fn set_ua_kj_per_hour_k(&mut self, ua: f64) {
        self.ua_kj_per_hour_k = ua;
    }

    pub fn height_m(&self) -> f64 {
        self.height_m
    }

    /// Heat capacity of a single node, in kJ/K
    pub fn node_heat_capacity(&self) -> f64 {
        self.node_heat_capacity
    }

    pub fn average_temp(&self) -> f64 {
        self.node_temps.iter().sum::<f64>() / self.node_count() as f64
    }

    /// Energy content of the water relative to `reference_temp`, in kJ
    pub fn heat_content_kj(&self, reference_temp: f64) -> f64 {
        self.node_temps
            .iter()
            .map(|temp| self.node_heat_capacity * (temp - reference_temp))
            .sum()
    }

    fn check_minutes(minutes: f64) -> Result<(), HpwhError> {
        if !(minutes > 0.) || !minutes.is_finite() {
            return Err(HpwhError::invalid_timestep(
                minutes,
                "timestep must be a positive number of minutes",
            ));
        }
        Ok(())
    }

    /// Remove `volume_litres` of water from the top of the tank and replace it with water at
    /// `inlet_temp` entering at the bottom.
    ///
    /// The draw is processed one node volume at a time so that a draw larger than one node
    /// still moves water through every node in between; a partial node is advected by its
    /// fraction. Inversions are mixed after every increment.
    pub fn apply_draw(
        &mut self,
        volume_litres: f64,
        inlet_temp: f64,
        minutes: f64,
    ) -> Result<DrawOutcome, HpwhError> {
        Self::check_minutes(minutes)?;
        if volume_litres < 0. || volume_litres > self.volume_litres || !volume_litres.is_finite()
        {
            return Err(HpwhError::Volume {
                requested_litres: volume_litres,
                capacity_litres: self.volume_litres,
            });
        }
        if volume_litres == 0. {
            return Ok(DrawOutcome {
                volume_removed_litres: 0.,
                volume_injected_litres: 0.,
                outlet_temp: self.top_temp(),
                delivered_energy_kj: 0.,
            });
        }

        let top = self.node_count() - 1;
        let draw_node_volumes = volume_litres / self.node_volume_litres;
        let mut remaining = draw_node_volumes;
        let mut expelled_heat_kj = 0.;
        let mut removed_nodes = 0.;
        let mut injected_nodes = 0.;

        while remaining > 0. {
            // no more than one node per increment
            let increment = remaining.min(1.);
            expelled_heat_kj += self.node_heat_capacity * increment * self.node_temps[top];
            removed_nodes += increment;

            for i in (1..=top).rev() {
                self.node_temps[i] += increment * (self.node_temps[i - 1] - self.node_temps[i]);
            }
            self.node_temps[0] += increment * (inlet_temp - self.node_temps[0]);
            injected_nodes += increment;

            remaining -= increment;
            self.mix_inversions();
        }

        if self.mixes_on_draw {
            let mixed_below = self.node_count() / MIX_BELOW_DIVISOR_ON_DRAW;
            if mixed_below > 0 {
                self.mix_nodes(0..=mixed_below - 1, MIX_FACTOR_ON_DRAW);
            }
        }

        let outlet_temp = expelled_heat_kj / (self.node_heat_capacity * draw_node_volumes);
        Ok(DrawOutcome {
            volume_removed_litres: removed_nodes * self.node_volume_litres,
            volume_injected_litres: injected_nodes * self.node_volume_litres,
            outlet_temp,
            delivered_energy_kj: WATER.energy_content_kj(volume_litres, outlet_temp, inlet_temp),
        })
    }

    /// Move the temperatures of the given nodes `factor` of the way towards their mean
    fn mix_nodes(&mut self, nodes: RangeInclusive<usize>, factor: f64) {
        if nodes.is_empty() || *nodes.end() >= self.node_count() {
            return;
        }
        let node_count = (nodes.end() - nodes.start() + 1) as f64;
        let mean = self.node_temps[nodes.clone()].iter().sum::<f64>() / node_count;
        for temp in &mut self.node_temps[nodes] {
            *temp += factor * (mean - *temp);
        }
    }

    /// Lose heat from every node to the surroundings at `ambient_temp` over `minutes`.
    ///
    /// The top and bottom nodes lose heat through the tank ends and every node through its
    /// share of the side wall. Each node decays exponentially towards ambient, so
    /// stratification is preserved. Returns the heat lost, in kJ.
    pub fn apply_ambient_losses(
        &mut self,
        ambient_temp: f64,
        minutes: f64,
    ) -> Result<f64, HpwhError> {
        Self::check_minutes(minutes)?;

        let hours = minutes / MINUTES_PER_HOUR as f64;
        let node_count = self.node_count();
        let top = node_count - 1;
        let side_rate = self.ua_kj_per_hour_k * self.frac_area_side / node_count as f64;
        let end_rate = self.ua_kj_per_hour_k * self.frac_area_top;

        let mut losses_kj = 0.;
        let mut next_temps = self.node_temps.clone();
        for (i, next_temp) in next_temps.iter_mut().enumerate() {
            let mut rate = side_rate;
            if i == 0 {
                rate += end_rate;
            }
            if i == top {
                rate += end_rate;
            }
            let fraction_lost = -(-rate * hours / self.node_heat_capacity).exp_m1();
            let drop = (*next_temp - ambient_temp) * fraction_lost;
            losses_kj += self.node_heat_capacity * drop;
            *next_temp -= drop;
        }

        if self.conduction && node_count > 1 {
            let tau = 2. * WATER.thermal_conductivity()
                / (WATER.specific_heat_capacity()
                    * WATER.density()
                    * LITRES_PER_CUBIC_METRE as f64
                    * self.node_height_m.powi(2))
                * minutes
                * SECONDS_PER_MINUTE as f64;
            if tau > 1. {
                return Err(HpwhError::invalid_timestep(
                    minutes,
                    "conduction between nodes is unstable for this timestep",
                ));
            }
            let temps = next_temps.clone();
            next_temps[0] += tau * (temps[1] - temps[0]);
            next_temps[top] += tau * (temps[top - 1] - temps[top]);
            for i in 1..top {
                next_temps[i] += tau * (temps[i + 1] - 2. * temps[i] + temps[i - 1]);
            }
        }

        self.node_temps = next_temps;
        self.mix_inversions();
        Ok(losses_kj)
    }

    /// Merge any inverted layers (warmer water below cooler water) into blocks of uniform,
    /// volume-weighted temperature.
    ///
    /// Blocks are built bottom up on a stack, merging downward until the block below is no
    /// warmer, so a single pass reaches the stable profile and enthalpy is conserved.
    pub fn mix_inversions(&mut self) {
        if self.node_temps.windows(2).all(|pair| pair[0] <= pair[1]) {
            return;
        }

        let mut stack: Vec<Block> = Vec::with_capacity(self.node_count());
        for (i, temp) in self.node_temps.iter().enumerate() {
            let mut block = Block {
                first: i,
                last: i,
                temp: *temp,
            };
            while let Some(below) = stack.last() {
                if below.temp <= block.temp {
                    break;
                }
                block = below.merge(&block);
                stack.pop();
            }
            stack.push(block);
        }

        for block in stack {
            self.node_temps[block.first..=block.last].fill(block.temp);
        }
    }

    /// Add `heat_kj` to node `node` and the equal-temperature nodes directly above it.
    ///
    /// The heated nodes are raised together to the temperature of the next warmer node above,
    /// which then joins the group, and so on up the tank. No node is raised above
    /// `max_temp`. Returns the heat that could not be added.
    pub fn add_heat_above_node(&mut self, heat_kj: f64, node: usize, max_temp: f64) -> f64 {
        let node_count = self.node_count();
        let mut remaining_kj = heat_kj;

        let mut heated_count = 1;
        for i in node..node_count - 1 {
            if self.node_temps[i] != self.node_temps[i + 1] {
                break;
            }
            heated_count += 1;
        }

        while remaining_kj > 0. && node + heated_count <= node_count {
            let target_node = node + heated_count;
            let target_temp = if target_node > node_count - 1 {
                max_temp
            } else {
                self.node_temps[target_node].min(max_temp)
            };

            let increment_kj = heated_count as f64
                * self.node_heat_capacity
                * (target_temp - self.node_temps[node]);

            if increment_kj > remaining_kj {
                let temp = self.node_temps[node]
                    + remaining_kj / self.node_heat_capacity / heated_count as f64;
                self.node_temps[node..node + heated_count].fill(temp);
                remaining_kj = 0.;
            } else if increment_kj > 0. {
                self.node_temps[node..node + heated_count].fill(target_temp);
                remaining_kj -= increment_kj;
            }
            heated_count += 1;
        }

        remaining_kj
    }

    /// Spread `energy_kj` over the nodes in proportion to `distribution`, working down from the
    /// top so that heat which cannot be added above a node is passed on to the next heated node.
    ///
    /// Returns the heat which could not be added without exceeding `max_temp`, in kJ.
    pub fn add_heat_at_nodes(
        &mut self,
        distribution: &[f64],
        energy_kj: f64,
        max_temp: f64,
    ) -> Result<f64, HpwhError> {
        if distribution.len() != self.node_count() {
            return Err(HpwhError::invalid_model(format!(
                "heat distribution has {} entries for a tank of {} nodes",
                distribution.len(),
                self.node_count()
            )));
        }

        let mut leftover_kj = 0.;
        for (node, fraction) in distribution.iter().enumerate().rev() {
            let node_heat_kj = energy_kj * fraction;
            if node_heat_kj != 0. {
                leftover_kj = self.add_heat_above_node(node_heat_kj + leftover_kj, node, max_temp);
            }
        }
        self.mix_inversions();

        Ok(leftover_kj)
    }

    /// Temperature of the water at `height_m` above the bottom of the tank
    pub fn temperature_at(&self, height_m: f64) -> Result<f64, HpwhError> {
        if !(0. ..=self.height_m).contains(&height_m) {
            return Err(HpwhError::OutOfBounds(format!(
                "height {height_m} m is not within the {:.3} m tank",
                self.height_m
            )));
        }
        let node = ((height_m / self.node_height_m) as usize).min(self.node_count() - 1);
        Ok(self.node_temps[node])
    }

    /// Reading of simulated thermocouple `index` (1-based, counted from the bottom) out of
    /// `count` evenly spaced thermocouples
    pub fn thermocouple_temp(&self, index: usize, count: usize) -> Result<f64, HpwhError> {
        if count < 1 || count > self.node_count() {
            return Err(HpwhError::test_invalid(format!(
                "{count} thermocouples cannot be placed in a tank of {} nodes",
                self.node_count()
            )));
        }
        if index < 1 || index > count {
            return Err(HpwhError::test_invalid(format!(
                "thermocouple {index} does not exist out of {count}"
            )));
        }
        Ok(resampled_value(
            &self.node_temps,
            (index - 1) as f64 / count as f64,
            index as f64 / count as f64,
        ))
    }

    /// Mean reading of `count` evenly spaced thermocouples
    pub fn thermocouple_average(&self, count: usize) -> Result<f64, HpwhError> {
        let total = (1..=count)
            .map(|index| self.thermocouple_temp(index, count))
            .sum::<Result<f64, HpwhError>>()?;
        Ok(total / count as f64)
    }

    /// Fraction of the maximum useful charge currently stored, where water is useful once it
    /// can be mixed with mains water to `min_useful_temp`
    pub fn soc_fraction(&self, mains_temp: f64, min_useful_temp: f64, max_temp: f64) -> f64 {
        let max_charge = self.node_count() as f64
            * charge_per_node(mains_temp, min_useful_temp, max_temp);
        if max_charge <= 0. {
            return 0.;
        }
        self.node_temps
            .iter()
            .map(|temp| charge_per_node(mains_temp, min_useful_temp, *temp))
            .sum::<f64>()
            / max_charge
    }
}

fn charge_per_node(cold_temp: f64, mix_temp: f64, hot_temp: f64) -> f64 {
    if hot_temp < mix_temp {
        return 0.;
    }
    (hot_temp - cold_temp) / (mix_temp - cold_temp)
}

/// Adjacent nodes sharing one temperature during inversion mixing
#[derive(Clone, Copy, Debug)]
struct Block {
    first: usize,
    last: usize,
    temp: f64,
}

impl Block {
    fn size(&self) -> f64 {
        (self.last - self.first + 1) as f64
    }

    /// Merge with the block directly above; nodes have equal volume so temperatures are
    /// weighted by node count
    fn merge(&self, above: &Block) -> Block {
        Block {
            first: self.first,
            last: above.last,
            temp: (self.temp * self.size() + above.temp * above.size())
                / (self.size() + above.size()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn round_by_precision(src: f64, precision: f64) -> f64 {
        (precision * src).round() / precision
    }

    fn tank_spec(volume_litres: f64, ua: f64, node_count: usize) -> TankSpec {
        TankSpec {
            volume_litres,
            ua_kj_per_hour_k: ua,
            node_count,
            mixes_on_draw: false,
            conduction: false,
        }
    }

    #[fixture]
    fn tank() -> Tank {
        Tank::new(&tank_spec(200., 10., 12), 51.7).unwrap()
    }

    #[fixture]
    fn stratified_tank() -> Tank {
        let mut tank = Tank::new(&tank_spec(120., 0., 6), 20.).unwrap();
        tank.set_node_temps(&[20., 25., 30., 40., 50., 55.]).unwrap();
        tank
    }

    #[rstest]
    fn should_reject_invalid_tank_specs() {
        assert!(matches!(
            Tank::new(&tank_spec(0., 10., 12), 50.),
            Err(HpwhError::InvalidModel(_))
        ));
        assert!(matches!(
            Tank::new(&tank_spec(100., 10., 0), 50.),
            Err(HpwhError::InvalidModel(_))
        ));
        assert!(matches!(
            Tank::new(&tank_spec(100., -1., 12), 50.),
            Err(HpwhError::InvalidModel(_))
        ));
    }

    #[rstest]
    fn should_calculate_geometry(tank: Tank) {
        assert_relative_eq!(tank.height_m(), ASPECT_RATIO * Tank::radius_m(200.));
        assert_eq!(round_by_precision(Tank::radius_m(200.), 1e4), 0.2375);
        assert_relative_eq!(
            2. * tank.frac_area_top + tank.frac_area_side,
            1.,
            max_relative = 1e-12
        );
    }

    #[rstest]
    fn should_leave_isolated_tank_unchanged_without_draws() {
        let mut tank = Tank::new(&tank_spec(200., 0., 50), 51.7).unwrap();
        for _ in 0..60 {
            let losses = tank.apply_ambient_losses(19.7, 1.).unwrap();
            assert_eq!(losses, 0.);
        }
        for temp in tank.node_temps() {
            assert_abs_diff_eq!(*temp, 51.7, epsilon = 1e-6);
        }
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn should_conserve_energy_under_ambient_losses(#[case] conduction: bool) {
        let mut spec = tank_spec(150., 12., 12);
        spec.conduction = conduction;
        let mut tank = Tank::new(&spec, 20.).unwrap();
        tank.set_node_temps(&(0..12).map(|i| 20. + 3. * i as f64).collect::<Vec<_>>())
            .unwrap();

        let initial_content = tank.heat_content_kj(0.);
        let mut total_losses = 0.;
        for _ in 0..240 {
            total_losses += tank.apply_ambient_losses(15., 1.).unwrap();
        }
        let change = tank.heat_content_kj(0.) - initial_content;

        assert!(total_losses > 0.);
        assert_abs_diff_eq!(change + total_losses, 0., epsilon = 1e-6);
    }

    #[rstest]
    fn should_keep_stratification_under_ambient_losses(mut stratified_tank: Tank) {
        stratified_tank.set_ua_kj_per_hour_k(20.);
        stratified_tank.apply_ambient_losses(10., 60.).unwrap();
        let temps = stratified_tank.node_temps();
        assert!(temps.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(temps[5] < 55.);
    }

    #[rstest]
    #[case(0.)]
    #[case(-1.)]
    #[case(f64::NAN)]
    fn should_reject_invalid_timesteps(mut tank: Tank, #[case] minutes: f64) {
        assert!(matches!(
            tank.apply_ambient_losses(20., minutes),
            Err(HpwhError::InvalidTimestep { .. })
        ));
        assert!(matches!(
            tank.apply_draw(10., 14.4, minutes),
            Err(HpwhError::InvalidTimestep { .. })
        ));
    }

    #[rstest]
    fn should_reject_draws_larger_than_tank(mut tank: Tank) {
        assert!(matches!(
            tank.apply_draw(200.1, 14.4, 1.),
            Err(HpwhError::Volume { .. })
        ));
        assert!(matches!(
            tank.apply_draw(-1., 14.4, 1.),
            Err(HpwhError::Volume { .. })
        ));
        assert!(tank.apply_draw(200., 14.4, 1.).is_ok());
    }

    #[rstest]
    #[case(5.)]
    #[case(16.6666)]
    #[case(45.)]
    #[case(200.)]
    fn should_conserve_volume_and_energy_on_draw(mut stratified_tank: Tank, #[case] volume: f64) {
        let volume = volume.min(stratified_tank.volume_litres());
        let initial_content = stratified_tank.heat_content_kj(14.4);

        let outcome = stratified_tank.apply_draw(volume, 14.4, 1.).unwrap();

        assert_relative_eq!(outcome.volume_removed_litres, volume, max_relative = 1e-12);
        assert_relative_eq!(
            outcome.volume_injected_litres,
            outcome.volume_removed_litres,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            stratified_tank.heat_content_kj(14.4) + outcome.delivered_energy_kj,
            initial_content,
            max_relative = 1e-9
        );
    }

    #[rstest]
    fn should_draw_hot_water_from_top(mut stratified_tank: Tank) {
        // exactly one node
        let outcome = stratified_tank.apply_draw(20., 10., 1.).unwrap();
        assert_relative_eq!(outcome.outlet_temp, 55., max_relative = 1e-12);
        assert_eq!(
            stratified_tank
                .node_temps()
                .iter()
                .map(|temp| round_by_precision(*temp, 1e6))
                .collect::<Vec<_>>(),
            vec![10., 20., 25., 30., 40., 50.]
        );
    }

    #[rstest]
    fn should_interpolate_partial_node_draws(mut stratified_tank: Tank) {
        let outcome = stratified_tank.apply_draw(10., 10., 1.).unwrap();
        assert_relative_eq!(outcome.outlet_temp, 55., max_relative = 1e-12);
        assert_relative_eq!(stratified_tank.node_temps()[0], 15., max_relative = 1e-12);
        assert_relative_eq!(stratified_tank.node_temps()[5], 52.5, max_relative = 1e-12);
    }

    #[rstest]
    fn should_stir_bottom_of_tank_when_mixing_on_draw() {
        let mut spec = tank_spec(120., 0., 6);
        spec.mixes_on_draw = true;
        let mut tank = Tank::new(&spec, 50.).unwrap();
        tank.apply_draw(20., 10., 1.).unwrap();
        // bottom two nodes (10 and 50) move a third of the way to their mean of 30
        assert_relative_eq!(tank.node_temps()[0], 10. + 20. / 3., max_relative = 1e-12);
        assert_relative_eq!(tank.node_temps()[1], 50. - 20. / 3., max_relative = 1e-12);
        assert_relative_eq!(tank.node_temps()[2], 50.);
    }

    #[rstest]
    fn should_mix_inverted_layers_conserving_energy() {
        let mut tank = Tank::new(&tank_spec(100., 0., 5), 20.).unwrap();
        tank.node_temps = vec![20., 30., 50., 40., 42.];
        let initial_content = tank.heat_content_kj(0.);

        tank.mix_inversions();

        assert_eq!(
            tank.node_temps()
                .iter()
                .map(|temp| round_by_precision(*temp, 1e9))
                .collect::<Vec<_>>(),
            vec![20., 30., 44., 44., 44.]
        );
        assert_relative_eq!(tank.heat_content_kj(0.), initial_content, max_relative = 1e-12);
    }

    #[rstest]
    fn should_propagate_mixing_down_the_tank() {
        let mut tank = Tank::new(&tank_spec(100., 0., 4), 20.).unwrap();
        tank.node_temps = vec![40., 30., 20., 10.];
        tank.mix_inversions();
        for temp in tank.node_temps() {
            assert_relative_eq!(*temp, 25.);
        }
    }

    #[rstest]
    fn should_be_idempotent_when_mixing_inversions() {
        let mut tank = Tank::new(&tank_spec(100., 0., 8), 20.).unwrap();
        tank.node_temps = vec![35., 21.3, 48.1, 22.7, 60.2, 59.9, 33.3, 70.];
        tank.mix_inversions();
        let once = tank.node_temps().to_vec();
        tank.mix_inversions();
        assert_eq!(tank.node_temps(), once.as_slice());
        assert!(once.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[rstest]
    fn should_raise_equal_temperature_nodes_together(mut stratified_tank: Tank) {
        let capacity = stratified_tank.node_heat_capacity();
        // enough to bring node 0 up to 25, then nodes 0-1 up to 27
        let leftover = stratified_tank.add_heat_above_node(capacity * 9., 0, 100.);
        assert_eq!(leftover, 0.);
        assert_relative_eq!(stratified_tank.node_temps()[0], 27., max_relative = 1e-12);
        assert_relative_eq!(stratified_tank.node_temps()[1], 27., max_relative = 1e-12);
        assert_relative_eq!(stratified_tank.node_temps()[2], 30.);
    }

    #[rstest]
    fn should_return_heat_that_would_exceed_max_temp(mut tank: Tank) {
        let capacity = tank.node_heat_capacity();
        let leftover = tank.add_heat_above_node(capacity * 12. * 10., 0, 55.);
        assert_relative_eq!(leftover, capacity * 12. * (10. - 3.3), max_relative = 1e-9);
        for temp in tank.node_temps() {
            assert_relative_eq!(*temp, 55., max_relative = 1e-12);
        }
    }

    #[rstest]
    fn should_add_heat_according_to_distribution(mut stratified_tank: Tank) {
        let capacity = stratified_tank.node_heat_capacity();
        let initial_content = stratified_tank.heat_content_kj(0.);
        let distribution = [0.5, 0.5, 0., 0., 0., 0.];

        let leftover = stratified_tank
            .add_heat_at_nodes(&distribution, capacity * 4., 100.)
            .unwrap();

        assert_eq!(leftover, 0.);
        assert_relative_eq!(
            stratified_tank.heat_content_kj(0.),
            initial_content + capacity * 4.,
            max_relative = 1e-12
        );
        assert!(stratified_tank.node_temps().windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[rstest]
    fn should_reject_mismatched_distribution(mut tank: Tank) {
        assert!(matches!(
            tank.add_heat_at_nodes(&[1.], 100., 100.),
            Err(HpwhError::InvalidModel(_))
        ));
    }

    #[rstest]
    fn should_report_temperature_at_height(stratified_tank: Tank) {
        let height = stratified_tank.height_m();
        assert_eq!(stratified_tank.temperature_at(0.).unwrap(), 20.);
        assert_eq!(stratified_tank.temperature_at(height * 0.55).unwrap(), 40.);
        assert_eq!(stratified_tank.temperature_at(height).unwrap(), 55.);
        assert!(matches!(
            stratified_tank.temperature_at(height * 1.01),
            Err(HpwhError::OutOfBounds(_))
        ));
        assert!(matches!(
            stratified_tank.temperature_at(-0.1),
            Err(HpwhError::OutOfBounds(_))
        ));
    }

    #[rstest]
    fn should_read_thermocouples(stratified_tank: Tank) {
        assert_relative_eq!(
            stratified_tank.thermocouple_temp(1, 3).unwrap(),
            22.5,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            stratified_tank.thermocouple_temp(3, 3).unwrap(),
            52.5,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            stratified_tank.thermocouple_average(6).unwrap(),
            stratified_tank.average_temp(),
            max_relative = 1e-12
        );
    }

    #[rstest]
    #[case(0, 6)]
    #[case(7, 6)]
    #[case(1, 0)]
    #[case(1, 7)]
    fn should_reject_thermocouples_outside_tank(
        stratified_tank: Tank,
        #[case] index: usize,
        #[case] count: usize,
    ) {
        assert!(matches!(
            stratified_tank.thermocouple_temp(index, count),
            Err(HpwhError::TestInvalid(_))
        ));
    }

    #[rstest]
    fn should_calculate_state_of_charge(stratified_tank: Tank) {
        // nodes at 40, 50 and 55 are useful above 38
        let expected = ((40. - 10.) + (50. - 10.) + (55. - 10.)) / (6. * (55. - 10.));
        assert_relative_eq!(
            stratified_tank.soc_fraction(10., 38., 55.),
            expected,
            max_relative = 1e-12
        );
    }

    #[rstest]
    fn should_resample_temperature_profile(mut tank: Tank) {
        tank.set_node_temps(&[20., 40.]).unwrap();
        for (i, temp) in tank.node_temps().iter().enumerate() {
            let expected = if i < 6 { 20. } else { 40. };
            assert_relative_eq!(*temp, expected, max_relative = 1e-12);
        }
    }
}
