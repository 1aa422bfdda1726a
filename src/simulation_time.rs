use crate::core::units::MINUTES_PER_DAY;

/// A span of simulated time, in minutes, divided into equal steps
#[derive(Clone, Copy, Debug)]
pub struct SimulationTime {
    start_minute: f64,
    end_minute: f64,
    step: f64,
}

impl SimulationTime {
    pub fn new(start_minute: f64, end_minute: f64, step: f64) -> Self {
        Self {
            start_minute,
            end_minute,
            step,
        }
    }

    /// A whole day from midnight, one minute at a time
    pub fn day() -> Self {
        Self::new(0., MINUTES_PER_DAY as f64, 1.)
    }

    pub fn total_steps(&self) -> usize {
        ((self.end_minute - self.start_minute) / self.step).ceil() as usize
    }

    pub fn iter(&self) -> SimulationTimeIterator {
        SimulationTimeIterator {
            current_index: 0,
            simulation_time: *self,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimulationTimeIterator {
    current_index: usize,
    simulation_time: SimulationTime,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationTimeIteration {
    pub index: usize,
    /// Minutes since the start of the simulation at the start of the step
    pub minute: f64,
    pub timestep: f64,
}

impl Iterator for SimulationTimeIterator {
    type Item = SimulationTimeIteration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.simulation_time.total_steps() {
            return None;
        }
        let iteration = SimulationTimeIteration {
            index: self.current_index,
            minute: self.simulation_time.start_minute
                + self.current_index as f64 * self.simulation_time.step,
            timestep: self.simulation_time.step,
        };
        self.current_index += 1;
        Some(iteration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    fn simtime() -> SimulationTime {
        SimulationTime::new(1430., 1450., 5.)
    }

    #[rstest]
    fn should_have_correct_total_steps(simtime: SimulationTime) {
        assert_eq!(simtime.total_steps(), 4);
        assert_eq!(SimulationTime::day().total_steps(), 1440);
    }

    #[rstest]
    fn should_iterate_correctly(simtime: SimulationTime) {
        let minutes: Vec<f64> = simtime.iter().map(|step| step.minute).collect();
        assert_eq!(minutes, vec![1430., 1435., 1440., 1445.]);
        assert!(simtime.iter().enumerate().all(|(i, step)| step.index == i && step.timestep == 5.));
    }

    #[rstest]
    fn should_yield_nothing_for_empty_span() {
        assert_eq!(SimulationTime::new(10., 10., 1.).iter().count(), 0);
    }
}
