use crate::core::units::JOULES_PER_KILOJOULE;
use std::sync::LazyLock;

/// This module contains data on the properties of the tank contents.

#[derive(Clone, Copy, Debug)]
pub struct MaterialProperties {
    density: f64,                  // kg/litre
    specific_heat_capacity: f64,   // J/(kg.K)
    volumetric_heat_capacity: f64, // J/(litre.K)
    thermal_conductivity: f64,     // W/(m.K)
}

impl MaterialProperties {
    pub fn new(density: f64, specific_heat_capacity: f64, thermal_conductivity: f64) -> Self {
        Self {
            density,
            specific_heat_capacity,
            volumetric_heat_capacity: specific_heat_capacity * density,
            thermal_conductivity,
        }
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn specific_heat_capacity(&self) -> f64 {
        self.specific_heat_capacity
    }

    pub fn specific_heat_capacity_kj(&self) -> f64 {
        self.specific_heat_capacity / JOULES_PER_KILOJOULE as f64
    }

    pub fn volumetric_heat_capacity(&self) -> f64 {
        self.volumetric_heat_capacity
    }

    pub fn thermal_conductivity(&self) -> f64 {
        self.thermal_conductivity
    }

    /// Heat capacity of a given volume of material, in kJ/K
    pub fn heat_capacity_kj_per_k(&self, volume_litres: f64) -> f64 {
        self.volumetric_heat_capacity * volume_litres / JOULES_PER_KILOJOULE as f64
    }

    /// Return energy content of a volume of material, in kJ
    ///
    /// Arguments:
    /// * `volume_litres` - volume of material
    /// * `temp_high` - temperature for which energy content should be calculated, in deg C or K
    /// * `temp_base` - temperature which defines "zero energy", in same units as temp_high
    pub fn energy_content_kj(&self, volume_litres: f64, temp_high: f64, temp_base: f64) -> f64 {
        self.heat_capacity_kj_per_k(volume_litres) * (temp_high - temp_base)
    }
}

pub static WATER: LazyLock<MaterialProperties> =
    LazyLock::new(|| MaterialProperties::new(0.995, 4180.0, 0.62));
