//! Carbon mass to CO2 conversions and the air-water diffusion model.
//!
//! All reservoir carbon is assumed to sit in CO2, so one mole of carbon is
//! one mole of CO2.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::warn;

pub const MOLAR_MASS_C: f64 = 12.0;
pub const MOLAR_MASS_CO2: f64 = 44.0;
/// L/mol of an ideal gas at STP.
pub const MOLAR_VOLUME_STP: f64 = 22.414;
/// J/(mol·K)
pub const GAS_CONSTANT: f64 = 8.314;

pub fn co2_mass_from_carbon(carbon_g: f64) -> f64 {
    carbon_g * MOLAR_MASS_CO2 / MOLAR_MASS_C
}

pub fn carbon_from_co2_mass(co2_g: f64) -> f64 {
    co2_g * MOLAR_MASS_C / MOLAR_MASS_CO2
}

pub fn co2_moles_from_carbon(carbon_g: f64) -> f64 {
    co2_mass_from_carbon(carbon_g) / MOLAR_MASS_CO2
}

pub fn carbon_from_co2_moles(moles: f64) -> f64 {
    carbon_from_co2_mass(moles * MOLAR_MASS_CO2)
}

/// CO2 concentration in ppm for `carbon_g` grams of carbon held in
/// `air_volume_m3` of air.
pub fn co2_ppm(carbon_g: f64, air_volume_m3: f64, calibration: f64) -> f64 {
    let litres = co2_moles_from_carbon(carbon_g) * MOLAR_VOLUME_STP;
    let cubic_metres = litres * 1e-3;
    cubic_metres / air_volume_m3 * 1e6 * calibration
}

/// Ideal-gas partial pressure (Pa) of the CO2 in a reservoir.
pub fn partial_pressure(carbon_g: f64, volume_m3: f64, temperature_k: f64) -> f64 {
    co2_moles_from_carbon(carbon_g) * GAS_CONSTANT * temperature_k / volume_m3
}

#[derive(Debug, Clone, Copy)]
pub struct ExchangeParams {
    pub air_volume_m3: f64,
    pub air_temperature_k: f64,
    pub water_volume_m3: f64,
    pub water_temperature_k: f64,
    pub henry_constant: f64,
    pub transfer_rate: f64,
}

/// Carbon (g) that diffuses from air into water this step. Negative values
/// flow from water to air. The amount never exceeds what the source holds.
pub fn air_water_exchange(air_carbon_g: f64, water_carbon_g: f64, params: &ExchangeParams) -> f64 {
    let air_pressure = partial_pressure(
        air_carbon_g,
        params.air_volume_m3,
        params.air_temperature_k,
    );
    let water_pressure = partial_pressure(
        water_carbon_g,
        params.water_volume_m3,
        params.water_temperature_k,
    );
    let equilibrium = air_pressure / params.henry_constant;
    let delta = equilibrium - water_pressure;
    let moles = delta.abs() * params.water_volume_m3
        / (GAS_CONSTANT * params.water_temperature_k)
        * params.transfer_rate;
    let carbon = carbon_from_co2_moles(moles);
    if delta > 0.0 {
        carbon.min(air_carbon_g.max(0.0))
    } else {
        -carbon.min(water_carbon_g.max(0.0))
    }
}

/// Decimal places kept when a float quantity enters the ledger. Keeps sums
/// of reservoir masses exact.
pub const LEDGER_SCALE: u32 = 9;

/// Lossy f64 to decimal conversion for ledger updates. Non-finite input
/// becomes zero.
pub fn to_decimal(value: f64) -> Decimal {
    match Decimal::from_f64(value) {
        Some(decimal) => decimal.round_dp(LEDGER_SCALE),
        None => {
            warn!(value, "non-finite quantity floored to zero");
            Decimal::ZERO
        }
    }
}

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ExchangeParams {
        ExchangeParams {
            air_volume_m3: 1.0e9,
            air_temperature_k: 288.15,
            water_volume_m3: 1.0e8,
            water_temperature_k: 283.15,
            henry_constant: 0.8,
            transfer_rate: 0.5,
        }
    }

    #[test]
    fn default_air_carbon_is_about_410_ppm() {
        let ppm = co2_ppm(2.2e8, 1.0e9, 1.0);
        assert!((ppm - 410.9).abs() < 0.5, "got {ppm}");
    }

    #[test]
    fn mass_conversions_invert() {
        let c = 1234.5;
        assert!((carbon_from_co2_mass(co2_mass_from_carbon(c)) - c).abs() < 1e-9);
        assert!((carbon_from_co2_moles(co2_moles_from_carbon(c)) - c).abs() < 1e-9);
    }

    #[test]
    fn excess_air_carbon_flows_into_water() {
        let flow = air_water_exchange(3.0e8, 2.8e7, &params());
        assert!(flow > 0.0);
        let reverse = air_water_exchange(1.0e8, 2.8e7, &params());
        assert!(reverse < 0.0);
    }

    #[test]
    fn default_reservoirs_are_near_equilibrium() {
        let flow = air_water_exchange(2.2e8, 2.8e7, &params());
        assert!(flow.abs() < 0.01 * 2.8e7, "flow {flow}");
    }

    #[test]
    fn exchange_is_capped_by_source_mass() {
        let mut p = params();
        p.transfer_rate = 1.0e6;
        assert_eq!(air_water_exchange(0.0, 5.0, &p), -5.0);
        assert_eq!(air_water_exchange(7.0, 0.0, &p), 7.0);
    }

    #[test]
    fn non_finite_values_become_zero() {
        assert_eq!(to_decimal(f64::NAN), Decimal::ZERO);
        assert_eq!(to_decimal(f64::INFINITY), Decimal::ZERO);
        assert_eq!(to_f64(to_decimal(2.5)), 2.5);
    }
}
