// ===============================
// src/signal.rs
// ===============================
//
// Aturan keputusan straddle ATM: realized vol (rv) vs implied vol (iv).
// Semua fungsi murni, tanpa state.
//
// 1) straddle_signal    : rv > iv -> Buy, selain itu Sell (baseline kasar)
// 2) gap_signal         : rasio rv/iv dengan band histeresis relatif k
// 3) transaction_signal : versi varians, gap aditif dari biaya komisi
//
use serde::{Deserialize, Serialize};

use crate::domain::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal { Buy, Sell, Hold }

impl Signal {
    pub fn side(&self) -> Option<Side> {
        match self { Signal::Buy => Some(Side::Buy), Signal::Sell => Some(Side::Sell), Signal::Hold => None }
    }
    pub fn label(&self) -> &'static str {
        match self { Signal::Buy => "buy", Signal::Sell => "sell", Signal::Hold => "hold" }
    }
}

pub fn straddle_signal(rv: f64, iv: f64) -> Signal {
    if rv > iv { Signal::Buy } else { Signal::Sell }
}

pub fn gap_signal(rv: f64, iv: f64, k: f64) -> Signal {
    let ratio = rv / iv;
    if ratio > 1.0 + k {
        Signal::Buy
    } else if ratio < 1.0 - k {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

pub fn transaction_signal(rv: f64, iv: f64, gap: f64) -> Signal {
    let (rv2, iv2) = (rv * rv, iv * iv);
    if rv2 > iv2 + gap {
        Signal::Buy
    } else if rv2 < iv2 - gap {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

/// Strangle: premium + jarak strike (relatif spot) dibanding gerak yang
/// diharapkan `rv * sqrt(tte)`. Premium kemahalan -> Sell.
pub fn strangle_signal(rv: f64, tte: f64, spot: f64, strike_gap: f64, premium: f64) -> Signal {
    let ev = (premium + strike_gap) / spot;
    if ev > rv * tte.sqrt() { Signal::Sell } else { Signal::Buy }
}

/// Band breakeven dari biaya round-trip, diskalakan gamma straddle.
///
/// `2 * commission * gap_scale / (spot^2 * gamma * mult * n)`. Gamma yang
/// tidak positif memberi band tak hingga (semua aturan jadi Hold).
pub fn breakeven_gap(commission: f64, gap_scale: f64, spot: f64, gamma: f64, mult: f64, n: f64) -> f64 {
    let denom = spot * spot * gamma * mult * n;
    if !(denom.is_finite() && denom > 0.0) {
        return f64::INFINITY;
    }
    2.0 * commission * gap_scale / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_compares_rv_and_iv() {
        assert_eq!(straddle_signal(0.25, 0.2), Signal::Buy);
        assert_eq!(straddle_signal(0.2, 0.2), Signal::Sell);
        assert_eq!(straddle_signal(0.1, 0.2), Signal::Sell);
    }

    #[test]
    fn gap_signal_examples() {
        assert_eq!(gap_signal(0.22, 0.20, 0.05), Signal::Buy);
        assert_eq!(gap_signal(0.205, 0.20, 0.05), Signal::Hold);
        assert_eq!(gap_signal(0.18, 0.20, 0.05), Signal::Sell);
    }

    #[test]
    fn gap_signal_never_trades_inside_band() {
        let (iv, k) = (0.2, 0.08);
        for i in 1..100 {
            // rasio di (1-k, 1+k), eksklusif
            let ratio = 1.0 - k + (2.0 * k) * (i as f64) / 100.0;
            assert_eq!(gap_signal(ratio * iv, iv, k), Signal::Hold, "ratio {ratio}");
        }
    }

    #[test]
    fn transaction_signal_uses_variance_gap() {
        // 0.25^2 = 0.0625 vs 0.2^2 = 0.04
        assert_eq!(transaction_signal(0.25, 0.2, 0.02), Signal::Buy);
        assert_eq!(transaction_signal(0.25, 0.2, 0.03), Signal::Hold);
        assert_eq!(transaction_signal(0.1, 0.2, 0.02), Signal::Sell);
        assert_eq!(transaction_signal(0.1, 0.2, f64::INFINITY), Signal::Hold);
    }

    #[test]
    fn strangle_sells_rich_premium() {
        // ev = (1.0 + 2.0)/50 = 0.06 ; rv*sqrt(t) = 0.2*0.2887 = 0.0577
        assert_eq!(strangle_signal(0.2, 1.0 / 12.0, 50.0, 2.0, 1.0), Signal::Sell);
        assert_eq!(strangle_signal(0.4, 1.0 / 12.0, 50.0, 2.0, 1.0), Signal::Buy);
    }

    #[test]
    fn breakeven_gap_degenerates_to_infinity() {
        let g = breakeven_gap(1000.0, 240.0, 50.0, 0.2, 100.0, 500.0);
        assert!((g - 2.0 * 1000.0 * 240.0 / (2500.0 * 0.2 * 100.0 * 500.0)).abs() < 1e-15);
        assert!(breakeven_gap(1000.0, 240.0, 50.0, 0.0, 100.0, 500.0).is_infinite());
        assert!(breakeven_gap(1000.0, 240.0, 50.0, f64::NAN, 100.0, 500.0).is_infinite());
    }

    #[test]
    fn signal_maps_to_side() {
        assert_eq!(Signal::Buy.side(), Some(Side::Buy));
        assert_eq!(Signal::Hold.side(), None);
    }
}
