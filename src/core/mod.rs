pub mod common;
pub mod controller;
pub mod distribution;
pub mod heat_sources;
pub mod heating_logic;
pub mod material_properties;
pub(crate) mod solvers;
pub mod step_engine;
pub mod tank;
pub mod units;
pub mod water_heater;
