pub const JOULES_PER_KILOJOULE: u32 = 1_000;
pub const KILOJOULES_PER_KILOWATT_HOUR: u32 = 3_600;
pub const WATTS_PER_KILOWATT: u32 = 1_000;
pub const LITRES_PER_CUBIC_METRE: u32 = 1_000;
pub const MINUTES_PER_HOUR: u32 = 60;
pub const SECONDS_PER_MINUTE: u32 = 60;
pub const HOURS_PER_DAY: u32 = 24;
pub const MINUTES_PER_DAY: u32 = HOURS_PER_DAY * MINUTES_PER_HOUR;

pub const LITRES_PER_GALLON: f64 = 3.78541;
pub const LITRES_PER_CUBIC_FOOT: f64 = 28.3168;
pub const METRES_PER_FOOT: f64 = 0.3048;

pub fn fahrenheit_to_celsius(temp_f: f64) -> f64 {
    (temp_f - 32.) / 1.8
}

pub fn celsius_to_fahrenheit(temp_c: f64) -> f64 {
    temp_c * 1.8 + 32.
}

/// Convert a temperature difference (not an absolute temperature) from Fahrenheit to Celsius
pub fn delta_fahrenheit_to_celsius(delta_f: f64) -> f64 {
    delta_f / 1.8
}

pub fn gallons_to_litres(gallons: f64) -> f64 {
    gallons * LITRES_PER_GALLON
}

pub fn litres_to_gallons(litres: f64) -> f64 {
    litres / LITRES_PER_GALLON
}

pub fn kilojoules_to_kwh(energy_kj: f64) -> f64 {
    energy_kj / KILOJOULES_PER_KILOWATT_HOUR as f64
}

pub fn kwh_to_kilojoules(energy_kwh: f64) -> f64 {
    energy_kwh * KILOJOULES_PER_KILOWATT_HOUR as f64
}

/// Energy in kJ delivered by `power_kw` running for `minutes`
pub fn kw_minutes_to_kilojoules(power_kw: f64, minutes: f64) -> f64 {
    power_kw * minutes * SECONDS_PER_MINUTE as f64
}

pub fn kw_minutes_to_kwh(power_kw: f64, minutes: f64) -> f64 {
    power_kw * minutes / MINUTES_PER_HOUR as f64
}
