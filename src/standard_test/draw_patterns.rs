use crate::core::units::{gallons_to_litres, MINUTES_PER_DAY, MINUTES_PER_HOUR};
use crate::standard_test::first_hour_rating::Designation;

/// One scheduled draw of the simulated-use test
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Draw {
    pub start_minute: usize,
    pub volume_litres: f64,
    pub flow_litres_per_minute: f64,
}

impl Draw {
    fn new(hours: usize, minutes: usize, gallons: f64, gallons_per_minute: f64) -> Self {
        Self {
            start_minute: hours * MINUTES_PER_HOUR as usize + minutes,
            volume_litres: gallons_to_litres(gallons),
            flow_litres_per_minute: gallons_to_litres(gallons_per_minute),
        }
    }

    /// Number of whole steps the draw touches
    pub fn duration_minutes(&self) -> usize {
        (self.volume_litres / self.flow_litres_per_minute).ceil() as usize
    }

    pub fn end_minute(&self) -> usize {
        self.start_minute + self.duration_minutes()
    }
}

// (hours, minutes, gallons, gallons per minute)
const VERY_SMALL: [(usize, usize, f64, f64); 9] = [
    (0, 0, 2., 1.),
    (1, 0, 1., 1.),
    (1, 5, 0.5, 1.),
    (1, 10, 0.5, 1.),
    (1, 15, 0.5, 1.),
    (8, 0, 1., 1.),
    (8, 15, 2., 1.),
    (9, 0, 1.5, 1.),
    (9, 15, 1., 1.),
];

const LOW: [(usize, usize, f64, f64); 11] = [
    (0, 0, 15., 1.7),
    (0, 30, 2., 1.),
    (1, 0, 1., 1.),
    (10, 30, 6., 1.7),
    (11, 30, 4., 1.7),
    (12, 0, 1., 1.),
    (12, 45, 1., 1.),
    (12, 50, 1., 1.),
    (16, 15, 2., 1.),
    (16, 45, 2., 1.7),
    (17, 0, 3., 1.7),
];

const MEDIUM: [(usize, usize, f64, f64); 12] = [
    (0, 0, 15., 1.7),
    (0, 30, 2., 1.),
    (1, 40, 9., 1.7),
    (10, 30, 9., 1.7),
    (11, 30, 5., 1.7),
    (12, 0, 1., 1.),
    (12, 45, 1., 1.),
    (12, 50, 1., 1.),
    (16, 0, 1., 1.),
    (16, 15, 2., 1.),
    (16, 45, 2., 1.7),
    (17, 0, 7., 1.7),
];

const HIGH: [(usize, usize, f64, f64); 14] = [
    (0, 0, 27., 3.),
    (0, 30, 2., 1.),
    (0, 40, 1., 1.),
    (1, 40, 9., 1.7),
    (10, 30, 15., 3.),
    (11, 30, 5., 1.7),
    (12, 0, 1., 1.),
    (12, 45, 1., 1.),
    (12, 50, 1., 1.),
    (16, 0, 2., 1.),
    (16, 15, 2., 1.),
    (16, 30, 2., 1.7),
    (16, 45, 2., 1.7),
    (17, 0, 14., 3.),
];

/// The 24-hour draw schedule for a first-hour-rating designation
pub fn draw_pattern(designation: Designation) -> Vec<Draw> {
    let rows: &[(usize, usize, f64, f64)] = match designation {
        Designation::VerySmall => &VERY_SMALL,
        Designation::Low => &LOW,
        Designation::Medium => &MEDIUM,
        Designation::High => &HIGH,
    };
    rows.iter()
        .map(|(hours, minutes, gallons, gpm)| Draw::new(*hours, *minutes, *gallons, *gpm))
        .collect()
}

/// Volume drawn in each minute of the day; a draw runs at its flow rate until its volume
/// has been delivered
pub fn minute_volumes(pattern: &[Draw]) -> Vec<f64> {
    let mut volumes = vec![0.; MINUTES_PER_DAY as usize];
    for draw in pattern {
        let mut remaining = draw.volume_litres;
        for volume in volumes.iter_mut().skip(draw.start_minute) {
            if remaining <= 0. {
                break;
            }
            let drawn = remaining.min(draw.flow_litres_per_minute);
            *volume += drawn;
            remaining -= drawn;
        }
    }
    volumes
}
