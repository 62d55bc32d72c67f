// ===============================
// src/implied_vol.rs
// ===============================
//
// Newton-Raphson di atas vega. Kegagalan numerik (vega nol, keluar bound,
// iterasi habis) dikembalikan sebagai `Volatility::Undefined`, bukan panic.
//
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::domain::OptionPayoff;
use crate::pricing::{price_and_greeks, Greeks};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SolveFailure {
    ZeroVega,
    OutOfBounds(f64),
    MaxIterations,
    InvalidInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Volatility {
    Defined(f64),
    Undefined(SolveFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpliedVolResult {
    pub volatility: Volatility,
    /// Greeks pada iterasi terakhir (juga saat gagal)
    pub greeks: Greeks,
    pub iterations: u32,
}

impl ImpliedVolResult {
    pub fn vol(&self) -> Option<f64> {
        match self.volatility {
            Volatility::Defined(v) => Some(v),
            Volatility::Undefined(_) => None,
        }
    }

    pub fn failure(&self) -> Option<SolveFailure> {
        match self.volatility {
            Volatility::Defined(_) => None,
            Volatility::Undefined(f) => Some(f),
        }
    }

    fn undefined(reason: SolveFailure, greeks: Greeks, iterations: u32) -> Self {
        Self { volatility: Volatility::Undefined(reason), greeks, iterations }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SolverConfig {
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self { lower_bound: 0.0, upper_bound: 100.0, tolerance: 1.0e-5, max_iterations: 200 }
    }
}

/// Tebakan awal ATM (Brenner-Subrahmanyam). Hanya valid dekat ATM.
fn seed(price: f64, forward: f64, tte: f64, payoff: OptionPayoff) -> f64 {
    match payoff {
        OptionPayoff::Straddle => price / forward * (2.0 * PI / tte).sqrt(),
        _ => price / forward * (PI / (2.0 * tte)).sqrt(),
    }
}

/// Invert harga market ke implied volatility.
pub fn solve(
    observed_price: f64,
    forward: f64,
    strike: f64,
    tte: f64,
    payoff: OptionPayoff,
    rfr: f64,
    cfg: &SolverConfig,
) -> ImpliedVolResult {
    let inputs_ok = [observed_price, forward, strike, tte].iter().all(|x| x.is_finite() && *x > 0.0);
    if !inputs_ok {
        return ImpliedVolResult::undefined(SolveFailure::InvalidInput, Greeks::default(), 0);
    }

    let mut vol = seed(observed_price, forward, tte, payoff);
    let mut greeks = Greeks::default();

    for i in 0..cfg.max_iterations {
        let (model, g) = price_and_greeks(forward, strike, tte, vol, payoff, rfr, true);
        greeks = g;
        if greeks.vega == 0.0 {
            return ImpliedVolResult::undefined(SolveFailure::ZeroVega, greeks, i + 1);
        }
        if !(cfg.lower_bound..=cfg.upper_bound).contains(&vol) {
            return ImpliedVolResult::undefined(SolveFailure::OutOfBounds(vol), greeks, i + 1);
        }
        let diff = observed_price - model;
        if diff.abs() < cfg.tolerance {
            return ImpliedVolResult { volatility: Volatility::Defined(vol), greeks, iterations: i + 1 };
        }
        vol += diff / greeks.vega;
    }

    ImpliedVolResult::undefined(SolveFailure::MaxIterations, greeks, cfg.max_iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn recovers_atm_straddle_vol() {
        let (px, _) = price_and_greeks(50.0, 50.0, 0.1, 0.3, OptionPayoff::Straddle, 0.0, false);
        let r = solve(px, 50.0, 50.0, 0.1, OptionPayoff::Straddle, 0.0, &SolverConfig::default());
        assert_abs_diff_eq!(r.vol().unwrap(), 0.30, epsilon = 1e-4);
        assert!(r.greeks.vega > 0.0);
        assert!(r.greeks.gamma > 0.0);
    }

    #[test]
    fn round_trip_across_vols_and_payoffs() {
        let cfg = SolverConfig::default();
        for &payoff in &[OptionPayoff::Call, OptionPayoff::Put, OptionPayoff::Straddle] {
            for &(spot, strike) in &[(50.0, 50.0), (50.4, 50.0), (49.2, 49.0)] {
                for &sigma in &[0.1, 0.2, 0.35, 0.6, 1.0, 1.5] {
                    let tte = 0.08;
                    let (px, _) = price_and_greeks(spot, strike, tte, sigma, payoff, 0.0, false);
                    let r = solve(px, spot, strike, tte, payoff, 0.0, &cfg);
                    let vol = r.vol().unwrap_or_else(|| panic!("{payoff:?} {spot} {strike} {sigma}: {:?}", r.volatility));
                    // toleransi harga 1e-5 -> error vol <= tol / vega
                    assert_abs_diff_eq!(vol, sigma, epsilon = cfg.tolerance / r.greeks.vega * 2.0 + 1e-9);
                }
            }
        }
    }

    #[test]
    fn price_above_bound_is_undefined() {
        let cfg = SolverConfig { upper_bound: 1.0, ..SolverConfig::default() };
        let (px, _) = price_and_greeks(50.0, 50.0, 0.1, 2.5, OptionPayoff::Straddle, 0.0, false);
        let r = solve(px, 50.0, 50.0, 0.1, OptionPayoff::Straddle, 0.0, &cfg);
        assert!(matches!(r.volatility, Volatility::Undefined(SolveFailure::OutOfBounds(v)) if v > 1.0));
        assert!(r.vol().is_none());
    }

    #[test]
    fn forward_has_zero_vega() {
        let r = solve(2.0, 50.0, 48.0, 0.1, OptionPayoff::Forward, 0.0, &SolverConfig::default());
        assert_eq!(r.failure(), Some(SolveFailure::ZeroVega));
    }

    #[test]
    fn iteration_budget_exhaustion_is_undefined() {
        let cfg = SolverConfig { max_iterations: 1, tolerance: 1e-14, ..SolverConfig::default() };
        let (px, _) = price_and_greeks(55.0, 50.0, 0.1, 0.4, OptionPayoff::Call, 0.0, false);
        let r = solve(px, 55.0, 50.0, 0.1, OptionPayoff::Call, 0.0, &cfg);
        assert_eq!(r.failure(), Some(SolveFailure::MaxIterations));
        assert_eq!(r.iterations, 1);
    }

    #[test]
    fn invalid_input_short_circuits() {
        let cfg = SolverConfig::default();
        let r = solve(1.0, 50.0, 50.0, 0.0, OptionPayoff::Call, 0.0, &cfg);
        assert_eq!(r.failure(), Some(SolveFailure::InvalidInput));
        let r = solve(f64::NAN, 50.0, 50.0, 0.1, OptionPayoff::Call, 0.0, &cfg);
        assert_eq!(r.failure(), Some(SolveFailure::InvalidInput));
        assert_eq!(r.iterations, 0);
    }

    #[test]
    fn solver_is_deterministic() {
        let cfg = SolverConfig::default();
        let a = solve(3.9, 50.2, 50.0, 0.07, OptionPayoff::Straddle, 0.01, &cfg);
        let b = solve(3.9, 50.2, 50.0, 0.07, OptionPayoff::Straddle, 0.01, &cfg);
        assert_eq!(a, b);
    }
}
