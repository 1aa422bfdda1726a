use crate::core::heat_sources::{HeatOutcome, HeatSourceSpec};
use crate::core::tank::Tank;
use crate::errors::HpwhError;
use crate::reporter::Reporter;
use indexmap::IndexMap;
use serde::Serialize;
use strum_macros::Display;
use tracing::{debug, trace};

#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Serialize)]
pub enum Phase {
    #[default]
    Off,
    /// Engaged, but locked out by the source-side temperature; heats through its backup if
    /// it has one
    PendingLockout,
    On,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ControlState {
    pub phase: Phase,
    pub locked_out: bool,
    /// Minutes since the source was last engaged, while it is engaged
    pub cycle_minutes: f64,
    /// Minutes since the source was last disengaged, while it is off
    pub minutes_since_shutoff: f64,
    pub runtime_this_step: f64,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            phase: Phase::Off,
            locked_out: false,
            cycle_minutes: 0.,
            minutes_since_shutoff: f64::INFINITY,
            runtime_this_step: 0.,
        }
    }
}

impl ControlState {
    pub fn is_engaged(&self) -> bool {
        self.phase != Phase::Off
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Wiring {
    backup: Option<usize>,
    followed_by: Option<usize>,
}

/// Decides each step which heat sources run, in priority order (index 0 first).
#[derive(Clone, Debug)]
pub struct Controller {
    states: Vec<ControlState>,
    wiring: Vec<Wiring>,
    vip: Option<usize>,
    allow_simultaneous_compressors: bool,
}

impl Controller {
    /// Resolves the named `backup` and `followed_by` links between `sources`
    pub fn new(
        sources: &[HeatSourceSpec],
        allow_simultaneous_compressors: bool,
    ) -> Result<Self, HpwhError> {
        let mut indices: IndexMap<&str, usize> = IndexMap::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            if indices.insert(source.name.as_str(), index).is_some() {
                return Err(HpwhError::invalid_model(format!(
                    "heat source name '{}' is used more than once",
                    source.name
                )));
            }
        }

        let resolve = |source: &HeatSourceSpec, link: &Option<String>| {
            link.as_deref()
                .map(|name| {
                    indices
                        .get(name)
                        .copied()
                        .filter(|linked| sources[*linked].name != source.name)
                        .ok_or_else(|| {
                            HpwhError::invalid_model(format!(
                                "heat source '{}' refers to unknown heat source '{name}'",
                                source.name
                            ))
                        })
                })
                .transpose()
        };
        let wiring = sources
            .iter()
            .map(|source| {
                Ok(Wiring {
                    backup: resolve(source, &source.backup)?,
                    followed_by: resolve(source, &source.followed_by)?,
                })
            })
            .collect::<Result<Vec<_>, HpwhError>>()?;

        let vips: Vec<usize> = sources
            .iter()
            .enumerate()
            .filter(|(_, source)| source.is_vip)
            .map(|(index, _)| index)
            .collect();
        if vips.len() > 1 {
            return Err(HpwhError::invalid_model(
                "only one heat source may take priority over the others",
            ));
        }

        Ok(Self {
            states: vec![ControlState::default(); sources.len()],
            wiring,
            vip: vips.first().copied(),
            allow_simultaneous_compressors,
        })
    }

    pub fn states(&self) -> &[ControlState] {
        &self.states
    }

    pub fn is_heating(&self) -> bool {
        self.states.iter().any(ControlState::is_engaged)
    }

    pub fn reset(&mut self) {
        self.states.fill(ControlState::default());
    }

    fn engage(&mut self, index: usize) {
        let state = &mut self.states[index];
        if !state.is_engaged() {
            state.phase = if state.locked_out {
                Phase::PendingLockout
            } else {
                Phase::On
            };
            state.cycle_minutes = 0.;
        }
    }

    fn disengage(&mut self, index: usize) {
        let state = &mut self.states[index];
        if state.is_engaged() {
            state.phase = Phase::Off;
            state.cycle_minutes = 0.;
            state.minutes_since_shutoff = 0.;
        }
    }

    fn may_engage(&self, index: usize, sources: &[HeatSourceSpec]) -> bool {
        self.states[index].minutes_since_shutoff >= sources[index].min_off_time_min
    }

    fn may_disengage(&self, index: usize, sources: &[HeatSourceSpec]) -> bool {
        self.states[index].cycle_minutes >= sources[index].min_runtime_min
    }

    /// Update the lockout flag from the source-side temperature and return it
    fn update_lockout(&mut self, index: usize, source: &HeatSourceSpec, external_temp: f64) -> bool {
        let state = &mut self.states[index];
        if let Some(band) = &source.lockout {
            let running = state.is_engaged();
            if !state.locked_out && band.should_lock_out(external_temp, running) {
                state.locked_out = true;
            } else if state.locked_out && band.should_unlock(external_temp, running) {
                state.locked_out = false;
            }
        }
        if state.is_engaged() {
            state.phase = if state.locked_out {
                Phase::PendingLockout
            } else {
                Phase::On
            };
        }
        state.locked_out
    }

    /// Choose which sources are engaged at the start of a step.
    ///
    /// While heating, engaged sources that have met their shutoff condition hand over to
    /// their backup, and the VIP source takes over from everything else when it needs to
    /// heat. Otherwise the highest-priority source that should heat is engaged.
    fn select_sources(&mut self, sources: &[HeatSourceSpec], tank: &Tank, setpoint: f64) {
        if self.is_heating() {
            for (index, source) in sources.iter().enumerate() {
                if self.states[index].is_engaged()
                    && self.may_disengage(index, sources)
                    && source.shuts_off(tank, setpoint)
                {
                    self.disengage(index);
                    if let Some(backup) = self.wiring[index].backup {
                        if !sources[backup].shuts_off(tank, setpoint)
                            && self.may_engage(backup, sources)
                        {
                            self.engage(backup);
                        }
                    }
                }

                if source.is_vip
                    && self.may_engage(index, sources)
                    && source.should_heat(tank, setpoint)
                {
                    for other in (0..sources.len()).filter(|other| *other != index) {
                        self.disengage(other);
                    }
                    self.engage(index);
                    break;
                }
            }
        } else if let Some(index) = (0..sources.len()).find(|index| {
            self.may_engage(*index, sources) && sources[*index].should_heat(tank, setpoint)
        }) {
            self.engage(index);
        }
    }

    /// Run one step of the control sequence, adding heat to `tank`.
    ///
    /// Returns the accumulated outcome for each source over the step.
    pub fn step(
        &mut self,
        sources: &[HeatSourceSpec],
        tank: &mut Tank,
        setpoint: f64,
        external_temp: f64,
        minutes: f64,
        reporter: &dyn Reporter,
    ) -> Result<Vec<HeatOutcome>, HpwhError> {
        if sources.len() != self.states.len() {
            return Err(HpwhError::invalid_model(format!(
                "controller was built for {} heat sources, given {}",
                self.states.len(),
                sources.len()
            )));
        }
        let mut outcomes = vec![HeatOutcome::default(); sources.len()];
        self.states
            .iter_mut()
            .for_each(|state| state.runtime_this_step = 0.);

        self.select_sources(sources, tank, setpoint);
        trace!(
            "engaged after selection: {:?}",
            self.states.iter().map(|s| s.phase).collect::<Vec<_>>()
        );

        let mut minutes_to_run = minutes;
        let mut compressor_has_run = false;
        for (index, source) in sources.iter().enumerate() {
            let locked_out = self.update_lockout(index, source, external_temp);
            let backup = self.wiring[index].backup;
            if locked_out && backup.is_none() && self.states[index].is_engaged() {
                debug!(
                    "{} is locked out at {external_temp:.2} degC with no backup",
                    source.name
                );
                self.disengage(index);
            }
            if !self.states[index].is_engaged() {
                continue;
            }

            let heater = match backup {
                Some(backup) if locked_out => {
                    let backup_locked_out =
                        self.update_lockout(backup, &sources[backup], external_temp);
                    if backup_locked_out || self.states[backup].is_engaged() {
                        continue;
                    }
                    let vip_is_on = self
                        .vip
                        .is_some_and(|vip| self.states[vip].is_engaged());
                    if vip_is_on && sources[backup].is_resistance() {
                        debug!(
                            "{} and its backup are held off while the VIP source runs",
                            source.name
                        );
                        continue;
                    }
                    backup
                }
                _ => index,
            };

            if sources[heater].is_compressor()
                && compressor_has_run
                && !self.allow_simultaneous_compressors
            {
                continue;
            }
            if !(minutes_to_run > 0.) {
                continue;
            }

            let outcome = sources[heater].add_heat(
                tank,
                external_temp,
                setpoint,
                minutes_to_run,
                self.may_disengage(index, sources),
                reporter,
            )?;
            outcomes[heater].accumulate(&outcome);
            self.states[heater].runtime_this_step += outcome.runtime_minutes;
            if sources[heater].is_compressor() && outcome.runtime_minutes > 0. {
                compressor_has_run = true;
            }

            // a source inside its minimum runtime stays engaged even once it has nothing to add
            if outcome.runtime_minutes < minutes_to_run && self.may_disengage(index, sources) {
                trace!(
                    "{} finished after {:.3} of {minutes_to_run:.3} min",
                    sources[heater].name,
                    outcome.runtime_minutes
                );
                minutes_to_run -= outcome.runtime_minutes;
                self.disengage(index);
                if let Some(next) = self.wiring[index].followed_by {
                    if !sources[next].shuts_off(tank, setpoint) && self.may_engage(next, sources) {
                        self.engage(next);
                    }
                }
            }
        }

        for state in self.states.iter_mut() {
            if state.is_engaged() {
                state.cycle_minutes += minutes;
            } else {
                state.minutes_since_shutoff += minutes;
            }
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::distribution::Condensity;
    use crate::core::heat_sources::compressor::{
        CapacityControl, Compressor, CondenserConfiguration, PerformancePoint,
    };
    use crate::core::heat_sources::LockoutBand;
    use crate::core::heating_logic::HeatingLogic;
    use crate::core::tank::TankSpec;
    use crate::reporter::RecordingReporter;
    use pretty_assertions::assert_eq;
    use rstest::*;

    const SETPOINT: f64 = 50.;

    fn tank(temp: f64) -> Tank {
        Tank::new(
            &TankSpec {
                volume_litres: 180.,
                ua_kj_per_hour_k: 0.,
                node_count: 12,
                mixes_on_draw: false,
                conduction: false,
            },
            temp,
        )
        .unwrap()
    }

    fn element(name: &str, segment: usize, logic: HeatingLogic) -> HeatSourceSpec {
        HeatSourceSpec::resistance(name, 4.5, Condensity::single_segment(segment).unwrap())
            .unwrap()
            .with_turn_on_logic(logic)
    }

    fn compressor(name: &str) -> HeatSourceSpec {
        HeatSourceSpec::compressor(
            name,
            Compressor::new(
                CondenserConfiguration::Submerged,
                vec![PerformancePoint {
                    ambient_temp_f: 50.,
                    input_power_coeffs_w: [500., 0., 0.],
                    cop_coeffs: [3., 0., 0.],
                }],
                None,
                CapacityControl::SingleStage,
            )
            .unwrap(),
            Condensity::lowest_segments(4).unwrap(),
        )
        .with_turn_on_logic(HeatingLogic::bottom_third(10.))
        .with_lockout(LockoutBand {
            min_temp: 5.,
            max_temp: 45.,
            hysteresis: 1.,
        })
    }

    fn phases(controller: &Controller) -> Vec<Phase> {
        controller.states().iter().map(|state| state.phase).collect()
    }

    #[rstest]
    fn should_engage_only_highest_priority_source_that_should_heat() {
        let sources = vec![
            element("upper", 9, HeatingLogic::bottom_third(10.)),
            element("lower", 0, HeatingLogic::bottom_third(10.)),
        ];
        let mut controller = Controller::new(&sources, false).unwrap();
        let mut tank = tank(20.);
        let outcomes = controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &RecordingReporter::default())
            .unwrap();

        assert_eq!(phases(&controller), vec![Phase::On, Phase::Off]);
        assert_eq!(outcomes[0].runtime_minutes, 1.);
        assert_eq!(outcomes[1], HeatOutcome::default());
    }

    #[rstest]
    #[case(&[20.; 12], vec![Phase::On, Phase::Off])]
    #[case(&[35.; 12], vec![Phase::Off, Phase::On])]
    #[case(
        &[20., 20., 20., 20., 20., 20., 20., 20., 20., 45., 45., 45.],
        vec![Phase::Off, Phase::On]
    )]
    #[case(&[SETPOINT; 12], vec![Phase::Off, Phase::Off])]
    fn should_stage_sources_by_tank_state(#[case] temps: &[f64], #[case] expected: Vec<Phase>) {
        let sources = vec![
            element("upper", 9, HeatingLogic::top_third(20.)),
            element("lower", 0, HeatingLogic::bottom_third(10.)),
        ];
        let mut controller = Controller::new(&sources, false).unwrap();
        let mut tank = tank(20.);
        tank.set_node_temps(temps).unwrap();
        controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &RecordingReporter::default())
            .unwrap();

        assert_eq!(phases(&controller), expected);
        assert!(tank.node_temps().iter().all(|t| *t <= SETPOINT));
    }

    #[rstest]
    fn should_hold_resistance_backup_off_while_vip_runs() {
        let sources = vec![
            element("upper", 9, HeatingLogic::top_third(20.)).with_vip(),
            compressor("compressor").with_backup("lower"),
            element("lower", 0, HeatingLogic::bottom_third(10.)),
        ];
        let mut controller = Controller::new(&sources, false).unwrap();
        let mut tank = tank(20.);
        // warm enough on top that the VIP element does not pre-empt the compressor again
        tank.set_node_temps(&[20., 20., 20., 20., 20., 20., 20., 20., 20., 45., 45., 45.])
            .unwrap();
        controller.engage(0);
        controller.engage(1);

        let outcomes = controller
            .step(&sources, &mut tank, SETPOINT, 0., 1., &RecordingReporter::default())
            .unwrap();

        assert_eq!(
            phases(&controller),
            vec![Phase::On, Phase::PendingLockout, Phase::Off]
        );
        assert_eq!(outcomes[0].runtime_minutes, 1.);
        assert_eq!(outcomes[1], HeatOutcome::default());
        assert_eq!(outcomes[2], HeatOutcome::default());
    }

    #[rstest]
    fn should_hold_compressor_on_for_minimum_runtime() {
        let mut source = compressor("compressor");
        source.min_runtime_min = 5.;
        let sources = vec![source];
        let mut controller = Controller::new(&sources, false).unwrap();
        let reporter = RecordingReporter::default();
        let mut tank = tank(20.);
        controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &reporter)
            .unwrap();
        assert!(controller.is_heating());

        tank.set_uniform_temp(SETPOINT);
        for _ in 0..4 {
            let outcomes = controller
                .step(&sources, &mut tank, SETPOINT, 20., 1., &reporter)
                .unwrap();
            assert_eq!(phases(&controller), vec![Phase::On]);
            assert_eq!(outcomes[0].runtime_minutes, 0.);
        }
        controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &reporter)
            .unwrap();
        assert!(!controller.is_heating());
        assert!(tank.node_temps().iter().all(|t| *t == SETPOINT));
    }

    #[rstest]
    fn should_stay_off_when_no_source_should_heat() {
        let sources = vec![element("lower", 0, HeatingLogic::bottom_third(10.))];
        let mut controller = Controller::new(&sources, false).unwrap();
        let mut tank = tank(45.);
        let outcomes = controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &RecordingReporter::default())
            .unwrap();
        assert!(!controller.is_heating());
        assert_eq!(outcomes[0], HeatOutcome::default());
        assert!(tank.node_temps().iter().all(|t| *t == 45.));
    }

    #[rstest]
    fn should_let_vip_preempt_running_source() {
        let sources = vec![
            element("upper", 9, HeatingLogic::top_third(20.)).with_vip(),
            element("lower", 0, HeatingLogic::bottom_third(10.)),
        ];
        let mut controller = Controller::new(&sources, false).unwrap();
        let mut tank = tank(35.);
        let reporter = RecordingReporter::default();

        // top third at 35 is within 20 K of the setpoint, so only the lower element starts
        controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &reporter)
            .unwrap();
        assert_eq!(phases(&controller), vec![Phase::Off, Phase::On]);

        tank.set_uniform_temp(25.);
        controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &reporter)
            .unwrap();
        assert_eq!(phases(&controller), vec![Phase::On, Phase::Off]);
    }

    #[rstest]
    fn should_heat_through_backup_when_locked_out() {
        let sources = vec![
            compressor("compressor").with_backup("element"),
            element("element", 0, HeatingLogic::bottom_third(10.)),
        ];
        let mut controller = Controller::new(&sources, false).unwrap();
        let mut tank = tank(20.);
        let outcomes = controller
            .step(&sources, &mut tank, SETPOINT, 0., 1., &RecordingReporter::default())
            .unwrap();

        assert_eq!(phases(&controller), vec![Phase::PendingLockout, Phase::Off]);
        assert_eq!(outcomes[0], HeatOutcome::default());
        assert_eq!(outcomes[1].runtime_minutes, 1.);
    }

    #[rstest]
    fn should_disengage_locked_out_source_without_backup() {
        let sources = vec![compressor("compressor")];
        let mut controller = Controller::new(&sources, false).unwrap();
        let mut tank = tank(20.);
        let outcomes = controller
            .step(&sources, &mut tank, SETPOINT, 50., 1., &RecordingReporter::default())
            .unwrap();
        assert_eq!(phases(&controller), vec![Phase::Off]);
        assert!(controller.states()[0].locked_out);
        assert_eq!(outcomes[0], HeatOutcome::default());
    }

    #[rstest]
    fn should_engage_follower_when_source_finishes_mid_step() {
        let sources = vec![
            element("upper", 9, HeatingLogic::standby(5.))
                .with_shut_off_logic(HeatingLogic::top_node_max_temp(40.))
                .with_followed_by("lower"),
            element("lower", 0, HeatingLogic::bottom_third(10.)),
        ];
        let mut controller = Controller::new(&sources, false).unwrap();
        let mut tank = tank(20.);
        tank.set_node_temps(&[20., 20., 20., 20., 20., 20., 20., 20., 20., 39.9, 39.9, 39.9])
            .unwrap();
        let outcomes = controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &RecordingReporter::default())
            .unwrap();

        assert!(outcomes[0].runtime_minutes > 0. && outcomes[0].runtime_minutes < 1.);
        assert!(outcomes[1].runtime_minutes > 0.);
        assert!(
            (outcomes[0].runtime_minutes + outcomes[1].runtime_minutes - 1.).abs() < 1e-9
        );
        assert_eq!(phases(&controller), vec![Phase::Off, Phase::On]);
    }

    #[rstest]
    fn should_run_only_one_compressor_per_step_unless_allowed(#[values(false, true)] allow: bool) {
        let sources = vec![compressor("first"), compressor("second")];
        let mut controller = Controller::new(&sources, allow).unwrap();
        let mut tank = tank(20.);
        controller.engage(0);
        controller.engage(1);
        let outcomes = controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &RecordingReporter::default())
            .unwrap();
        assert_eq!(outcomes[0].runtime_minutes, 1.);
        assert_eq!(outcomes[1].runtime_minutes > 0., allow);
    }

    #[rstest]
    fn should_hold_source_off_for_minimum_off_time() {
        let mut source = element("lower", 0, HeatingLogic::bottom_third(10.));
        source.min_off_time_min = 5.;
        let sources = vec![source];
        let mut controller = Controller::new(&sources, false).unwrap();
        let reporter = RecordingReporter::default();
        let mut tank = tank(20.);
        controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &reporter)
            .unwrap();
        assert!(controller.is_heating());

        tank.set_uniform_temp(SETPOINT);
        controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &reporter)
            .unwrap();
        assert!(!controller.is_heating());

        tank.set_uniform_temp(20.);
        for _ in 0..4 {
            controller
                .step(&sources, &mut tank, SETPOINT, 20., 1., &reporter)
                .unwrap();
            assert!(!controller.is_heating());
        }
        controller
            .step(&sources, &mut tank, SETPOINT, 20., 1., &reporter)
            .unwrap();
        assert!(controller.is_heating());
    }

    #[rstest]
    fn should_reject_unknown_or_duplicate_names() {
        let sources = vec![element("lower", 0, HeatingLogic::bottom_third(10.)).with_backup("nope")];
        assert!(matches!(
            Controller::new(&sources, false),
            Err(HpwhError::InvalidModel(_))
        ));
        let sources = vec![
            element("lower", 0, HeatingLogic::bottom_third(10.)),
            element("lower", 1, HeatingLogic::bottom_third(10.)),
        ];
        assert!(Controller::new(&sources, false).is_err());
    }
}
