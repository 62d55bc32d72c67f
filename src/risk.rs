// ===============================
// src/risk.rs
// ===============================
use thiserror::Error;

use crate::config::Limits;
use crate::domain::{OrderRequest, OrderType, Side};

#[derive(Debug, Error, PartialEq)]
pub enum OrderError {
    #[error("quantity must be positive, got {0}")]
    NonPositiveQty(i64),
    #[error("LIMIT order requires a price")]
    MissingLimitPrice,
    #[error("MARKET order must not carry a price")]
    UnexpectedPrice,
    #[error("limit price must be finite and positive, got {0}")]
    BadPrice(f64),
    #[error("unknown order action: {0}")]
    UnknownAction(String),
    #[error("unknown order type: {0}")]
    UnknownOrderType(String),
}

/// Pre-trade checks, dijalankan sebelum request apapun ke venue.
pub fn check(req: &OrderRequest) -> Result<(), OrderError> {
    if req.quantity <= 0 {
        return Err(OrderError::NonPositiveQty(req.quantity));
    }
    match (req.order_type, req.price) {
        (OrderType::Limit, None) => Err(OrderError::MissingLimitPrice),
        (OrderType::Limit, Some(px)) if !(px.is_finite() && px > 0.0) => Err(OrderError::BadPrice(px)),
        (OrderType::Market, Some(_)) => Err(OrderError::UnexpectedPrice),
        _ => Ok(()),
    }
}

/// Hasil sizing straddle di bawah cap exposure ETF
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraddleSizing {
    pub trade_n: i64,
    /// premium estimasi setelah diskalakan trade_n / n
    pub premium: f64,
    pub resized: bool,
}

/// Ukuran straddle: nominal `n`, kecuali `|delta * mult * n|` melewati
/// `max_n_etf`; maka diturunkan proporsional (dibulatkan ke bawah supaya
/// hedge tetap muat di cap).
pub fn size_straddle(delta_atm: f64, mult: f64, n: i64, premium: f64, max_n_etf: i64) -> StraddleSizing {
    let exposure = (delta_atm * mult * n as f64).abs();
    if exposure <= max_n_etf as f64 || n == 0 {
        return StraddleSizing { trade_n: n, premium, resized: false };
    }
    let trade_n = (max_n_etf as f64 / (delta_atm * mult).abs()).floor() as i64;
    StraddleSizing { trade_n, premium: premium / n as f64 * trade_n as f64, resized: true }
}

/// Order hedge ETF (bertanda) dari exposure delta opsi dalam shares.
///
/// Target = `round(-option_delta_shares)`, selisih terhadap posisi sekarang
/// di-clamp ke `max_n_etf`. Nol berarti tidak perlu order.
pub fn hedge_order_qty(option_delta_shares: f64, current_etf: i64, max_n_etf: i64) -> i64 {
    let target = (-option_delta_shares).round() as i64;
    (target - current_etf).clamp(-max_n_etf, max_n_etf)
}

/// Strike ATM = harga underlying dibulatkan, dibatasi range strike venue.
pub fn atm_strike(spot: f64, lim: &Limits) -> u32 {
    let k = spot.round().max(0.0) as u32;
    k.clamp(lim.strike_min, lim.strike_max)
}

/// Potong order besar jadi chunk sesuai batas ukuran venue.
pub fn chunk_sizes(qty: i64, max_chunk: i64) -> Vec<i64> {
    if qty <= 0 || max_chunk <= 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity((qty / max_chunk + 1) as usize);
    let mut remaining = qty;
    while remaining > 0 {
        let c = remaining.min(max_chunk);
        out.push(c);
        remaining -= c;
    }
    out
}

/// Arah order untuk membawa posisi bertanda kembali ke nol.
pub fn unwind_side(position: i64) -> Option<Side> {
    Side::from_signed(position).map(|s| s.opposite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Instrument;

    fn lim() -> Limits { Limits::default() }

    #[test]
    fn rejects_invalid_orders_before_network() {
        let mut req = OrderRequest::market(Instrument::Underlying, 0, Side::Buy);
        assert_eq!(check(&req), Err(OrderError::NonPositiveQty(0)));
        req.quantity = 10;
        assert_eq!(check(&req), Ok(()));
        req.order_type = OrderType::Limit;
        assert_eq!(check(&req), Err(OrderError::MissingLimitPrice));
        req.price = Some(-1.0);
        assert_eq!(check(&req), Err(OrderError::BadPrice(-1.0)));
        req.price = Some(50.1);
        assert_eq!(check(&req), Ok(()));
        req.order_type = OrderType::Market;
        assert_eq!(check(&req), Err(OrderError::UnexpectedPrice));
    }

    #[test]
    fn straddle_sizing_examples() {
        let s = size_straddle(0.5, 100.0, 500, 1_000.0, 50_000);
        assert_eq!(s, StraddleSizing { trade_n: 500, premium: 1_000.0, resized: false });

        let s = size_straddle(0.5, 100.0, 2000, 4_000.0, 50_000);
        assert_eq!(s.trade_n, 1000);
        assert!(s.resized);
        assert!((s.premium - 2_000.0).abs() < 1e-9);

        // delta negatif (straddle ITM put) diukur dengan magnitudo
        let s = size_straddle(-0.8, 100.0, 1000, 1.0, 50_000);
        assert_eq!(s.trade_n, 625);
    }

    #[test]
    fn hedge_targets_negative_option_delta_and_clamps() {
        // short straddle, delta straddle +0.1 per pasang, 500 kontrak
        let opt_delta_shares = -1.0 * 0.1 * 100.0 * 500.0;
        assert_eq!(hedge_order_qty(opt_delta_shares, 0, 50_000), 5_000);
        assert_eq!(hedge_order_qty(opt_delta_shares, 5_000, 50_000), 0);
        assert_eq!(hedge_order_qty(opt_delta_shares, 7_000, 50_000), -2_000);
        assert_eq!(hedge_order_qty(-120_000.4, 0, 50_000), 50_000);
        assert_eq!(hedge_order_qty(120_000.4, 0, 50_000), -50_000);
    }

    #[test]
    fn atm_strike_is_clamped_to_listed_range() {
        assert_eq!(atm_strike(49.6, &lim()), 50);
        assert_eq!(atm_strike(49.4, &lim()), 49);
        assert_eq!(atm_strike(41.0, &lim()), 45);
        assert_eq!(atm_strike(60.2, &lim()), 54);
    }

    #[test]
    fn chunking_preserves_total() {
        assert_eq!(chunk_sizes(25_000, 10_000), vec![10_000, 10_000, 5_000]);
        assert_eq!(chunk_sizes(100, 100), vec![100]);
        assert!(chunk_sizes(0, 100).is_empty());
        assert_eq!(unwind_side(-500), Some(Side::Buy));
        assert_eq!(unwind_side(0), None);
    }
}
