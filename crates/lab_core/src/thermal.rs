//! Heat-transfer helpers for thermal nodes and the conduction rod.
//!
//! Temperatures are kelvin everywhere inside the core, so a temperature stock
//! obeys the same non-negativity rule as a water volume.

use crate::physics::finite_or_zero;

pub const STEFAN_BOLTZMANN: f64 = 5.670_374_419e-8;

/// Rod node count is clamped to this range.
pub const ROD_MIN_NODES: usize = 20;
pub const ROD_MAX_NODES: usize = 200;

/// Explicit FTCS is stable up to `0.5·dx²/α`; stay under it.
const FTCS_SAFETY: f64 = 0.9;

#[inline]
pub fn celsius_to_kelvin(celsius: f64) -> f64 {
    celsius + 273.15
}

/// Newton cooling: `h·A·(T − T∞)` (W). Positive means heat leaves the body.
pub fn convection_heat_rate(coefficient: f64, area: f64, surface_k: f64, ambient_k: f64) -> f64 {
    let delta = finite_or_zero(surface_k) - finite_or_zero(ambient_k);
    finite_or_zero(coefficient) * finite_or_zero(area) * delta
}

/// Net grey-body radiation: `ε·σ·A·(T⁴ − Tsur⁴)` (W).
pub fn radiation_heat_rate(emissivity: f64, area: f64, body_k: f64, surroundings_k: f64) -> f64 {
    let t = finite_or_zero(body_k).max(0.0);
    let t_sur = finite_or_zero(surroundings_k).max(0.0);
    finite_or_zero(emissivity).clamp(0.0, 1.0)
        * STEFAN_BOLTZMANN
        * finite_or_zero(area).max(0.0)
        * (t.powi(4) - t_sur.powi(4))
}

/// Thermal diffusivity `k/(ρ·cp)` (m²/s). Degenerate materials give 0.
pub fn diffusivity(conductivity: f64, density: f64, specific_heat: f64) -> f64 {
    let capacity = finite_or_zero(density) * finite_or_zero(specific_heat);
    if capacity <= 0.0 {
        return 0.0;
    }
    (finite_or_zero(conductivity) / capacity).max(0.0)
}

/// Number of equal substeps needed to cover `dt` without breaking FTCS stability.
pub fn stable_substeps(alpha: f64, dx: f64, dt: f64) -> u32 {
    if alpha <= 0.0 || dx <= 0.0 || dt <= 0.0 {
        return 1;
    }
    let dt_max = 0.5 * dx * dx / alpha * FTCS_SAFETY;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // positive, bounded below
    let steps = (dt / dt_max).ceil().min(f64::from(u32::MAX)) as u32;
    steps.max(1)
}

/// Advances a rod profile by `dt` with fixed end temperatures.
///
/// The step is split into [`stable_substeps`] pieces so no simulated time is
/// dropped when `dt` exceeds the stability limit.
pub fn conduction_step(
    profile: &mut [f64],
    alpha: f64,
    length: f64,
    dt: f64,
    left_k: f64,
    right_k: f64,
) {
    let n = profile.len();
    if n < 3 {
        return;
    }
    profile[0] = left_k;
    profile[n - 1] = right_k;
    let dx = length / (n - 1) as f64;
    if alpha <= 0.0 || dx <= 0.0 || dt <= 0.0 {
        return;
    }
    let substeps = stable_substeps(alpha, dx, dt);
    let h = dt / f64::from(substeps);
    let r = alpha * h / (dx * dx);
    let mut previous = profile.to_vec();
    for _ in 0..substeps {
        previous.copy_from_slice(profile);
        for i in 1..n - 1 {
            let laplacian = previous[i + 1] - 2.0 * previous[i] + previous[i - 1];
            profile[i] = previous[i] + r * laplacian;
        }
    }
}

/// Temperature at the middle node, or 0 for an empty profile.
pub fn centre_temperature(profile: &[f64]) -> f64 {
    profile.get(profile.len() / 2).copied().unwrap_or(0.0)
}
