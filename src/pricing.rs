// ===============================
// src/pricing.rs
// ===============================
//
// Black-Scholes closed form (European, tanpa dividen) untuk payoff vanilla
// dan kombinasinya. Straddle = call leg + put leg, Greeks dijumlah per leg.
//
use std::ops::Add;

use ahash::AHashMap as HashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use thiserror::Error;

use crate::domain::OptionPayoff;
use crate::implied_vol::{self, ImpliedVolResult, SolverConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub vega: f64,
    pub gamma: f64,
}

impl Add for Greeks {
    type Output = Greeks;
    fn add(self, o: Greeks) -> Greeks {
        Greeks { delta: self.delta + o.delta, vega: self.vega + o.vega, gamma: self.gamma + o.gamma }
    }
}

static STD_NORMAL: Lazy<Normal> = Lazy::new(|| Normal::new(0.0, 1.0).unwrap());

/// Standard normal CDF
pub fn norm_cdf(x: f64) -> f64 {
    STD_NORMAL.cdf(x)
}

/// Standard normal PDF
pub fn norm_pdf(x: f64) -> f64 {
    STD_NORMAL.pdf(x)
}

/// Harga dan Greeks satu payoff.
///
/// Butuh `tte > 0`, `vol > 0`, `strike > 0`, `spot > 0`; pemanggil wajib
/// guard `tte == 0` karena rumus membagi dengan `sqrt(tte)`.
/// Greeks hanya dihitung kalau `want_greeks`, selain itu nol.
pub fn price_and_greeks(
    spot: f64,
    strike: f64,
    tte: f64,
    vol: f64,
    payoff: OptionPayoff,
    rfr: f64,
    want_greeks: bool,
) -> (f64, Greeks) {
    let df = (-rfr * tte).exp();

    if payoff == OptionPayoff::Forward {
        let greeks = if want_greeks { Greeks { delta: 1.0, ..Greeks::default() } } else { Greeks::default() };
        return (spot - strike * df, greeks);
    }

    let sqrt_t = tte.sqrt();
    let d1 = ((spot / strike).ln() + (rfr + 0.5 * vol * vol) * tte) / (vol * sqrt_t);
    let d2 = d1 - vol * sqrt_t;

    // gamma/vega sama untuk call & put
    let leg_greeks = |delta: f64| {
        if want_greeks {
            let pdf = norm_pdf(d1);
            Greeks { delta, gamma: pdf / (spot * vol * sqrt_t), vega: spot * pdf * sqrt_t }
        } else {
            Greeks::default()
        }
    };

    let mut price = 0.0;
    let mut greeks = Greeks::default();

    if matches!(payoff, OptionPayoff::Call | OptionPayoff::Straddle) {
        price += spot * norm_cdf(d1) - strike * df * norm_cdf(d2);
        greeks = greeks + leg_greeks(norm_cdf(d1));
    }
    if matches!(payoff, OptionPayoff::Put | OptionPayoff::Straddle) {
        price += strike * df * norm_cdf(-d2) - spot * norm_cdf(-d1);
        greeks = greeks + leg_greeks(norm_cdf(d1) - 1.0);
    }

    (price, greeks)
}

#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    #[error("no price supplied for {payoff:?} @ {strike}")]
    MissingPrice { payoff: OptionPayoff, strike: u32 },
}

/// Kumpulan leg opsi (payoff, strike) -> jumlah kontrak
#[derive(Debug, Clone, Default)]
pub struct OptionStrategy {
    pub content: Vec<((OptionPayoff, u32), i64)>,
}

impl OptionStrategy {
    pub fn with_leg(mut self, payoff: OptionPayoff, strike: u32, qty: i64) -> Self {
        self.content.push(((payoff, strike), qty));
        self
    }
}

/// IV + Greeks untuk setiap leg portfolio, dari harga market per leg.
///
/// Semua leg harus punya harga; leg tanpa harga ditolak sebelum solver jalan.
pub fn portfolio_implied_vols(
    strategy: &OptionStrategy,
    forward: f64,
    prices: &HashMap<(OptionPayoff, u32), f64>,
    tte: f64,
    rfr: f64,
) -> Result<Vec<ImpliedVolResult>, PricingError> {
    for ((payoff, strike), _) in &strategy.content {
        if !prices.contains_key(&(*payoff, *strike)) {
            return Err(PricingError::MissingPrice { payoff: *payoff, strike: *strike });
        }
    }

    let cfg = SolverConfig::default();
    Ok(strategy
        .content
        .iter()
        .map(|((payoff, strike), _)| {
            let px = prices[&(*payoff, *strike)];
            implied_vol::solve(px, forward, *strike as f64, tte, *payoff, rfr, &cfg)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn atm_example_is_symmetric_when_rate_is_zero() {
        let (call, _) = price_and_greeks(50.0, 50.0, 0.1, 0.3, OptionPayoff::Call, 0.0, false);
        let (put, _) = price_and_greeks(50.0, 50.0, 0.1, 0.3, OptionPayoff::Put, 0.0, false);
        let (straddle, _) = price_and_greeks(50.0, 50.0, 0.1, 0.3, OptionPayoff::Straddle, 0.0, false);
        assert_abs_diff_eq!(call, 1.89164, epsilon = 1e-4);
        assert_abs_diff_eq!(put, call, epsilon = 1e-12);
        assert_abs_diff_eq!(straddle, 3.78328, epsilon = 1e-4);
    }

    #[test]
    fn standard_normal_reference_points() {
        assert_abs_diff_eq!(norm_cdf(0.0), 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(norm_cdf(1.96), 0.9750021048517795, epsilon = 1e-12);
        assert_abs_diff_eq!(norm_cdf(-1.96) + norm_cdf(1.96), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(norm_pdf(0.0), 0.3989422804014327, epsilon = 1e-15);
    }

    #[test]
    fn put_call_parity_holds() {
        for &(s, k, t, v, r) in &[
            (50.0, 50.0, 0.1, 0.3, 0.0),
            (48.3, 52.0, 0.05, 0.25, 0.02),
            (120.0, 95.0, 1.5, 0.6, 0.05),
            (10.0, 11.0, 0.01, 1.2, -0.01),
        ] {
            let (c, _) = price_and_greeks(s, k, t, v, OptionPayoff::Call, r, false);
            let (p, _) = price_and_greeks(s, k, t, v, OptionPayoff::Put, r, false);
            let (fwd, _) = price_and_greeks(s, k, t, v, OptionPayoff::Forward, r, false);
            assert_abs_diff_eq!(c - p, s - k * (-r * t).exp(), epsilon = 1e-9);
            assert_abs_diff_eq!(c - p, fwd, epsilon = 1e-9);
        }
    }

    #[test]
    fn straddle_is_sum_of_legs() {
        let (s, k, t, v, r) = (51.3, 50.0, 0.07, 0.22, 0.01);
        let (c, gc) = price_and_greeks(s, k, t, v, OptionPayoff::Call, r, true);
        let (p, gp) = price_and_greeks(s, k, t, v, OptionPayoff::Put, r, true);
        let (st, gs) = price_and_greeks(s, k, t, v, OptionPayoff::Straddle, r, true);
        assert_abs_diff_eq!(st, c + p, epsilon = 1e-12);
        assert_abs_diff_eq!(gs.delta, gc.delta + gp.delta, epsilon = 1e-12);
        assert_abs_diff_eq!(gs.gamma, 2.0 * gc.gamma, epsilon = 1e-12);
        assert_abs_diff_eq!(gs.vega, 2.0 * gc.vega, epsilon = 1e-12);
        assert_abs_diff_eq!(gc.gamma, gp.gamma, epsilon = 1e-15);
    }

    #[test]
    fn greeks_are_zero_unless_requested() {
        let (_, g) = price_and_greeks(50.0, 50.0, 0.1, 0.3, OptionPayoff::Straddle, 0.0, false);
        assert_eq!(g, Greeks::default());
        let (_, g) = price_and_greeks(50.0, 50.0, 0.1, 0.3, OptionPayoff::Call, 0.0, true);
        assert_abs_diff_eq!(g.delta, 0.518916, epsilon = 1e-6);
        assert_abs_diff_eq!(g.gamma, 0.084010, epsilon = 1e-6);
        assert_abs_diff_eq!(g.vega, 6.300739, epsilon = 1e-6);
    }

    #[test]
    fn forward_has_no_vol_exposure() {
        let (px, g) = price_and_greeks(50.0, 48.0, 0.1, 0.3, OptionPayoff::Forward, 0.0, true);
        assert_abs_diff_eq!(px, 2.0, epsilon = 1e-12);
        assert_eq!(g.delta, 1.0);
        assert_eq!(g.vega, 0.0);
    }

    #[test]
    fn portfolio_rejects_missing_price() {
        let strat = OptionStrategy::default()
            .with_leg(OptionPayoff::Call, 50, 1)
            .with_leg(OptionPayoff::Put, 50, 1);
        let mut prices = HashMap::new();
        prices.insert((OptionPayoff::Call, 50), 1.89164);
        let err = portfolio_implied_vols(&strat, 50.0, &prices, 0.1, 0.0).unwrap_err();
        assert_eq!(err, PricingError::MissingPrice { payoff: OptionPayoff::Put, strike: 50 });

        prices.insert((OptionPayoff::Put, 50), 1.89164);
        let res = portfolio_implied_vols(&strat, 50.0, &prices, 0.1, 0.0).unwrap();
        assert_eq!(res.len(), 2);
        for r in res {
            assert_abs_diff_eq!(r.vol().unwrap(), 0.3, epsilon = 1e-4);
        }
    }
}
