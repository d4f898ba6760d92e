//! Hydrostatics and stock bookkeeping.
//!
//! Pure functions, SI units throughout. Display conversions (kN, kPa) happen
//! only at the edges via [`to_kilo`].

use crate::RiskBand;

pub const WATER_DENSITY_KG_M3: f64 = 1000.0;
pub const GRAVITY_M_S2: f64 = 9.81;

/// Replaces NaN and infinities with 0 so they never reach a stock.
#[inline]
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Parses a user-typed number. Anything unparsable or non-finite becomes 0.
pub fn parse_or_zero(raw: &str) -> f64 {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .map_or(0.0, finite_or_zero)
}

/// N → kN, Pa → kPa.
#[inline]
pub fn to_kilo(value: f64) -> f64 {
    value / 1000.0
}

/// Gauge pressure at depth `height`: `ρ·g·h` (Pa).
pub fn hydrostatic_pressure(height: f64, fluid_density: f64, gravity: f64) -> f64 {
    finite_or_zero(fluid_density) * finite_or_zero(gravity) * finite_or_zero(height).max(0.0)
}

/// Submerged gate height: the water level capped at the gate's physical height.
pub fn effective_height(level: f64, gate_height: f64) -> f64 {
    finite_or_zero(level)
        .min(finite_or_zero(gate_height))
        .max(0.0)
}

/// Resultant hydrostatic force on a vertical rectangular gate: `½·ρ·g·h²·w` (N).
pub fn hydrostatic_force(
    effective_height: f64,
    width: f64,
    fluid_density: f64,
    gravity: f64,
) -> f64 {
    let h = finite_or_zero(effective_height).max(0.0);
    let w = finite_or_zero(width).max(0.0);
    0.5 * finite_or_zero(fluid_density) * finite_or_zero(gravity) * h * h * w
}

/// Torricelli outflow through a partly open orifice (m³/s).
///
/// `Cd·A·√(2·g·h)·opening`, zero for a shut orifice or an empty tank.
pub fn orifice_outflow(
    opening_fraction: f64,
    effective_area: f64,
    height: f64,
    discharge_coefficient: f64,
    gravity: f64,
) -> f64 {
    let opening = finite_or_zero(opening_fraction).clamp(0.0, 1.0);
    let height = finite_or_zero(height);
    if opening <= 0.0 || height <= 0.0 {
        return 0.0;
    }
    let velocity = (2.0 * finite_or_zero(gravity).max(0.0) * height).sqrt();
    finite_or_zero(discharge_coefficient).max(0.0)
        * finite_or_zero(effective_area).max(0.0)
        * velocity
        * opening
}

/// Explicit Euler step of a stock. Never returns a negative or non-finite value.
pub fn integrate_stock(stock: f64, inflow: f64, outflow: f64, dt: f64) -> f64 {
    let next = finite_or_zero(stock)
        + (finite_or_zero(inflow) - finite_or_zero(outflow)) * finite_or_zero(dt);
    finite_or_zero(next).max(0.0)
}

/// Volume → level, capped at `max_level · overflow_factor`. Zero area gives 0.
pub fn level_from_stock(stock: f64, area: f64, max_level: f64, overflow_factor: f64) -> f64 {
    let area = finite_or_zero(area);
    if area <= 0.0 {
        return 0.0;
    }
    let cap = (finite_or_zero(max_level) * finite_or_zero(overflow_factor)).max(0.0);
    (finite_or_zero(stock).max(0.0) / area).min(cap)
}

/// Load over limit. A non-positive limit means "no limit configured": 0.
pub fn utilization(force: f64, limit: f64) -> f64 {
    let limit = finite_or_zero(limit);
    if limit <= 0.0 {
        return 0.0;
    }
    finite_or_zero(force).max(0.0) / limit
}

/// Classifies a utilization for display.
pub fn risk_band(utilization: f64, limit: f64) -> RiskBand {
    if finite_or_zero(limit) <= 0.0 {
        RiskBand::Unset
    } else if utilization < 0.4 {
        RiskBand::Safe
    } else if utilization < 0.7 {
        RiskBand::Comfortable
    } else if utilization < 1.0 {
        RiskBand::NearLimit
    } else {
        RiskBand::OverLimit
    }
}
