use crate::core::distribution::resampled_value;
use crate::core::tank::Tank;
use crate::errors::HpwhError;
use serde::{Deserialize, Serialize};

/// Number of segments in the grid over which control logic node weights are defined.
/// Logic node 0 means the bottom tank node and `LOGIC_SIZE + 1` the top tank node; nodes
/// 1 to 12 are segments of the grid.
pub const LOGIC_SIZE: usize = 12;
const TOP_LOGIC_NODE: usize = LOGIC_SIZE + 1;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeWeight {
    pub node: usize,
    pub weight: f64,
}

impl NodeWeight {
    pub fn new(node: usize) -> Self {
        Self { node, weight: 1. }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Less,
    Greater,
}

impl Comparison {
    fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Less => value < threshold,
            Comparison::Greater => value > threshold,
        }
    }

    /// Positive when the comparison holds
    fn margin(&self, value: f64, threshold: f64) -> f64 {
        match self {
            Comparison::Less => threshold - value,
            Comparison::Greater => value - threshold,
        }
    }
}

/// A rule deciding whether a heat source should turn on (or shut off), evaluated against
/// the tank state at the start of each step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeatingLogic {
    /// Compares a weighted average of tank temperatures against a decision point, either an
    /// absolute temperature or a temperature difference below the setpoint
    Temperature {
        description: String,
        node_weights: Vec<NodeWeight>,
        decision_point: f64,
        absolute: bool,
        comparison: Comparison,
    },
    /// Compares the tank's state of charge against a target fraction
    StateOfCharge {
        description: String,
        decision_point: f64,
        hysteresis_fraction: f64,
        mains_temp: f64,
        min_useful_temp: f64,
        comparison: Comparison,
    },
}

impl HeatingLogic {
    fn temperature(
        description: &str,
        nodes: impl IntoIterator<Item = usize>,
        decision_point: f64,
        absolute: bool,
        comparison: Comparison,
    ) -> Self {
        HeatingLogic::Temperature {
            description: description.to_string(),
            node_weights: nodes.into_iter().map(NodeWeight::new).collect(),
            decision_point,
            absolute,
            comparison,
        }
    }

    /// Turn on when the top third of the tank is more than `delta` below the setpoint
    pub fn top_third(delta: f64) -> Self {
        Self::temperature("top third", 9..=12, delta, false, Comparison::Less)
    }

    pub fn top_third_absolute(temp: f64) -> Self {
        Self::temperature("top third absolute", 9..=12, temp, true, Comparison::Less)
    }

    pub fn bottom_third(delta: f64) -> Self {
        Self::temperature("bottom third", 1..=4, delta, false, Comparison::Less)
    }

    pub fn bottom_sixth(delta: f64) -> Self {
        Self::temperature("bottom sixth", 1..=2, delta, false, Comparison::Less)
    }

    pub fn second_sixth(delta: f64) -> Self {
        Self::temperature("second sixth", 3..=4, delta, false, Comparison::Less)
    }

    pub fn bottom_half(delta: f64) -> Self {
        Self::temperature("bottom half", 1..=6, delta, false, Comparison::Less)
    }

    pub fn bottom_twelfth(delta: f64) -> Self {
        Self::temperature("bottom twelfth", 1..=1, delta, false, Comparison::Less)
    }

    /// Turn on when the top node has cooled more than `delta` below the setpoint
    pub fn standby(delta: f64) -> Self {
        Self::temperature(
            "standby",
            [TOP_LOGIC_NODE],
            delta,
            false,
            Comparison::Less,
        )
    }

    /// Shut off once the top node exceeds `temp`
    pub fn top_node_max_temp(temp: f64) -> Self {
        Self::temperature(
            "top node max temp",
            [TOP_LOGIC_NODE],
            temp,
            true,
            Comparison::Greater,
        )
    }

    /// Shut off once the bottom twelfth exceeds `temp`
    pub fn bottom_twelfth_max_temp(temp: f64) -> Self {
        Self::temperature(
            "bottom twelfth max temp",
            1..=1,
            temp,
            true,
            Comparison::Greater,
        )
    }

    /// Turn on when the bottom third falls below the absolute temperature `temp`
    pub fn large_draw(temp: f64) -> Self {
        Self::temperature("large draw", 1..=4, temp, true, Comparison::Less)
    }

    /// Turn on when the state of charge falls below `decision_point + hysteresis_fraction`
    pub fn state_of_charge(
        decision_point: f64,
        hysteresis_fraction: f64,
        mains_temp: f64,
        min_useful_temp: f64,
    ) -> Self {
        HeatingLogic::StateOfCharge {
            description: "state of charge".to_string(),
            decision_point,
            hysteresis_fraction,
            mains_temp,
            min_useful_temp,
            comparison: Comparison::Less,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            HeatingLogic::Temperature { description, .. }
            | HeatingLogic::StateOfCharge { description, .. } => description,
        }
    }

    pub fn validate(&self) -> Result<(), HpwhError> {
        match self {
            HeatingLogic::Temperature {
                description,
                node_weights,
                ..
            } => {
                if node_weights.is_empty() {
                    return Err(HpwhError::invalid_model(format!(
                        "heating logic '{description}' has no node weights"
                    )));
                }
                if let Some(weight) = node_weights.iter().find(|w| w.node > TOP_LOGIC_NODE) {
                    return Err(HpwhError::invalid_model(format!(
                        "heating logic '{description}' refers to node {}, beyond the top node {TOP_LOGIC_NODE}",
                        weight.node
                    )));
                }
                if node_weights.iter().any(|w| w.weight < 0.)
                    || node_weights.iter().map(|w| w.weight).sum::<f64>() <= 0.
                {
                    return Err(HpwhError::invalid_model(format!(
                        "heating logic '{description}' must have non-negative weights with a positive sum"
                    )));
                }
            }
            HeatingLogic::StateOfCharge {
                description,
                decision_point,
                mains_temp,
                min_useful_temp,
                ..
            } => {
                if *decision_point < 0. {
                    return Err(HpwhError::invalid_model(format!(
                        "heating logic '{description}' has a negative decision point"
                    )));
                }
                if mains_temp >= min_useful_temp {
                    return Err(HpwhError::invalid_model(format!(
                        "heating logic '{description}' needs mains water colder than its minimum useful temperature"
                    )));
                }
            }
        }
        Ok(())
    }

    /// The tank quantity this logic watches
    pub fn tank_value(&self, tank: &Tank, setpoint: f64) -> f64 {
        match self {
            HeatingLogic::Temperature { node_weights, .. } => {
                let temps = tank.node_temps();
                let (weighted_sum, total_weight) =
                    node_weights
                        .iter()
                        .fold((0., 0.), |(sum, total), node_weight| {
                            let temp = match node_weight.node {
                                0 => tank.bottom_temp(),
                                TOP_LOGIC_NODE => tank.top_temp(),
                                node => resampled_value(
                                    temps,
                                    (node - 1) as f64 / LOGIC_SIZE as f64,
                                    node as f64 / LOGIC_SIZE as f64,
                                ),
                            };
                            (sum + node_weight.weight * temp, total + node_weight.weight)
                        });
                weighted_sum / total_weight
            }
            HeatingLogic::StateOfCharge {
                mains_temp,
                min_useful_temp,
                ..
            } => tank.soc_fraction(*mains_temp, *min_useful_temp, setpoint),
        }
    }

    /// The value the tank quantity is compared against
    pub fn comparison_value(&self, setpoint: f64) -> f64 {
        match self {
            HeatingLogic::Temperature {
                decision_point,
                absolute,
                ..
            } => {
                if *absolute {
                    *decision_point
                } else {
                    setpoint - decision_point
                }
            }
            HeatingLogic::StateOfCharge {
                decision_point,
                hysteresis_fraction,
                ..
            } => decision_point + hysteresis_fraction,
        }
    }

    fn comparison(&self) -> Comparison {
        match self {
            HeatingLogic::Temperature { comparison, .. }
            | HeatingLogic::StateOfCharge { comparison, .. } => *comparison,
        }
    }

    pub fn is_satisfied(&self, tank: &Tank, setpoint: f64) -> bool {
        self.comparison().compare(
            self.tank_value(tank, setpoint),
            self.comparison_value(setpoint),
        )
    }

    /// How far the logic is past its decision point; positive exactly when satisfied
    /// (up to the strictness of the comparison)
    pub fn margin(&self, tank: &Tank, setpoint: f64) -> f64 {
        self.comparison().margin(
            self.tank_value(tank, setpoint),
            self.comparison_value(setpoint),
        )
    }
}
