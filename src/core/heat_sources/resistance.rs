use crate::core::heat_sources::compressor::Performance;
use crate::errors::HpwhError;
use serde::{Deserialize, Serialize};

/// Electric immersion element; all input power becomes heat in the water
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResistanceElement {
    power_kw: f64,
}

impl ResistanceElement {
    pub fn new(power_kw: f64) -> Result<Self, HpwhError> {
        let element = Self { power_kw };
        element.validate()?;
        Ok(element)
    }

    pub fn validate(&self) -> Result<(), HpwhError> {
        if !(self.power_kw > 0.) {
            return Err(HpwhError::invalid_model(format!(
                "resistance element power must be positive, got {} kW",
                self.power_kw
            )));
        }
        Ok(())
    }

    pub fn power_kw(&self) -> f64 {
        self.power_kw
    }

    pub fn performance(&self) -> Performance {
        Performance {
            input_power_kw: self.power_kw,
            cop: 1.,
            capacity_kw: self.power_kw,
        }
    }
}
