// ===============================
// src/router.rs (order API: validasi, chunking, helper straddle/hedge)
// ===============================
use tracing::{debug, warn};

use crate::config::Limits;
use crate::domain::{Instrument, InstrumentClass, OptionRight, OrderAck, OrderRequest, OrderType, Side};
use crate::gateway::{Venue, VenueError};
use crate::metrics::{HEDGE_QTY, ORDERS, ORDER_FAILURES};
use crate::risk::{self, OrderError};

/// Hasil satu order logis yang dipecah jadi beberapa child order.
/// `acks` berisi child yang diterima venue; kalau ada child gagal,
/// pengiriman berhenti dan errornya disimpan di `error`.
#[derive(Debug)]
pub struct ChunkedFill {
    pub ticker: Instrument,
    pub side: Side,
    pub requested: i64,
    pub acks: Vec<OrderAck>,
    pub error: Option<VenueError>,
}

impl ChunkedFill {
    pub fn filled_qty(&self) -> i64 {
        self.acks.iter().map(|a| a.quantity_filled).sum::<f64>().round() as i64
    }

    /// Qty terisi bertanda (+ beli, - jual)
    pub fn signed_filled(&self) -> i64 {
        self.side.sign() * self.filled_qty()
    }

    /// VWAP gabungan dari semua child yang punya vwap
    pub fn vwap(&self) -> Option<f64> {
        let (notional, qty) = self
            .acks
            .iter()
            .filter_map(|a| a.vwap.map(|px| (px * a.quantity_filled, a.quantity_filled)))
            .fold((0.0, 0.0), |(n, q), (dn, dq)| (n + dn, q + dq));
        (qty > 0.0).then(|| notional / qty)
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.filled_qty() == self.requested
    }
}

fn class_label(i: &Instrument) -> &'static str {
    match i.class() {
        InstrumentClass::Option => "option",
        InstrumentClass::Etf => "etf",
    }
}

fn failure_kind(e: &VenueError) -> &'static str {
    match e {
        VenueError::Timeout(_) => "timeout",
        VenueError::Http { .. } => "http",
        VenueError::Transport(_) => "transport",
        VenueError::Decode(_) => "decode",
        VenueError::Rejected(_) => "rejected",
        VenueError::Empty(_) => "empty",
    }
}

#[derive(Debug, Clone)]
pub struct OrderRouter {
    limits: Limits,
}

impl OrderRouter {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    fn max_chunk(&self, ticker: &Instrument) -> i64 {
        match ticker.class() {
            InstrumentClass::Option => self.limits.max_chunk_option,
            InstrumentClass::Etf => self.limits.max_chunk_etf,
        }
    }

    /// Validasi lalu kirim order, dipecah sesuai batas ukuran per kelas.
    /// Child dikirim berurutan; berhenti di child pertama yang gagal.
    pub async fn place_order<V: Venue + ?Sized>(&self, venue: &V, req: OrderRequest) -> Result<ChunkedFill, OrderError> {
        let class = class_label(&req.ticker);
        if let Err(e) = risk::check(&req) {
            ORDER_FAILURES.with_label_values(&[class, "invalid"]).inc();
            warn!(ticker = %req.ticker, qty = req.quantity, side = req.action.as_str(), error = %e, "order rejected locally");
            return Err(e);
        }

        let mut out = ChunkedFill {
            ticker: req.ticker,
            side: req.action,
            requested: req.quantity,
            acks: Vec::new(),
            error: None,
        };

        for qty in risk::chunk_sizes(req.quantity, self.max_chunk(&req.ticker)) {
            let child = OrderRequest { quantity: qty, ..req.clone() };
            let res = match venue.post_order(&child).await {
                Ok(ack) if ack.status.eq_ignore_ascii_case("REJECTED") => {
                    Err(VenueError::Rejected(format!("order {} for {}", ack.order_id, ack.ticker)))
                }
                other => other,
            };
            match res {
                Ok(ack) => {
                    ORDERS.with_label_values(&[class, req.action.as_str()]).inc();
                    debug!(ticker = %req.ticker, qty, filled = ack.quantity_filled, vwap = ?ack.vwap, "child filled");
                    out.acks.push(ack);
                }
                Err(e) => {
                    ORDER_FAILURES.with_label_values(&[class, failure_kind(&e)]).inc();
                    match &e {
                        VenueError::Http { status, body } => warn!(
                            ticker = %req.ticker, qty, side = req.action.as_str(), status, %body, "order failed"
                        ),
                        other => warn!(ticker = %req.ticker, qty, side = req.action.as_str(), error = %other, "order failed"),
                    }
                    out.error = Some(e);
                    break;
                }
            }
        }
        Ok(out)
    }

    pub async fn place_underlying<V: Venue + ?Sized>(
        &self,
        venue: &V,
        quantity: i64,
        order_type: OrderType,
        side: Side,
        price: Option<f64>,
    ) -> Result<ChunkedFill, OrderError> {
        let req = OrderRequest { ticker: Instrument::Underlying, order_type, quantity, action: side, price };
        self.place_order(venue, req).await
    }

    /// Order satu leg opsi pada strike ATM dari `spot` (dibatasi range listed).
    #[allow(clippy::too_many_arguments)]
    pub async fn place_atm_option<V: Venue + ?Sized>(
        &self,
        venue: &V,
        right: OptionRight,
        spot: f64,
        quantity: i64,
        order_type: OrderType,
        side: Side,
        price: Option<f64>,
    ) -> Result<ChunkedFill, OrderError> {
        let strike = risk::atm_strike(spot, &self.limits);
        let ticker = Instrument::Option { right, strike };
        let req = OrderRequest { ticker, order_type, quantity, action: side, price };
        self.place_order(venue, req).await
    }

    /// Market order `quantity` kontrak di kedua leg (call lalu put).
    /// Leg put tetap dikirim walau leg call gagal; caller membukukan apa
    /// yang terisi.
    pub async fn place_straddle<V: Venue + ?Sized>(
        &self,
        venue: &V,
        strike: u32,
        quantity: i64,
        side: Side,
    ) -> Result<[ChunkedFill; 2], OrderError> {
        let [c, p] = Instrument::straddle_legs(strike);
        let call = self.place_order(venue, OrderRequest::market(c, quantity, side)).await?;
        let put = self.place_order(venue, OrderRequest::market(p, quantity, side)).await?;
        Ok([call, put])
    }

    /// Hedge ETF terhadap exposure delta opsi (dalam shares).
    /// `None` kalau posisi ETF sudah di target.
    pub async fn delta_hedge<V: Venue + ?Sized>(
        &self,
        venue: &V,
        option_delta_shares: f64,
        current_etf: i64,
    ) -> Result<Option<ChunkedFill>, OrderError> {
        let diff = risk::hedge_order_qty(option_delta_shares, current_etf, self.limits.max_n_etf);
        HEDGE_QTY.set(diff);
        let Some(side) = Side::from_signed(diff) else {
            return Ok(None);
        };
        let req = OrderRequest::market(Instrument::Underlying, diff.abs(), side);
        self.place_order(venue, req).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{SimCfg, SimVenue};

    async fn venue() -> SimVenue {
        let v = SimVenue::new(SimCfg::default());
        v.get_case().await.unwrap();
        v
    }

    #[tokio::test]
    async fn large_etf_order_is_split_into_chunks() {
        let v = venue().await;
        let r = OrderRouter::new(Limits::default());
        let fill = r
            .place_underlying(&v, 25_000, OrderType::Market, Side::Buy, None)
            .await
            .unwrap();
        let sizes: Vec<f64> = fill.acks.iter().map(|a| a.quantity).collect();
        assert_eq!(sizes, vec![10_000.0, 10_000.0, 5_000.0]);
        assert!(fill.is_complete());
        assert_eq!(fill.signed_filled(), 25_000);
        assert_eq!(v.position(Instrument::Underlying), 25_000);
    }

    #[tokio::test]
    async fn partial_failure_keeps_successful_chunks() {
        let v = venue().await;
        v.inject_failure(Instrument::call(50), 2);
        let r = OrderRouter::new(Limits::default());
        let fill = r
            .place_order(&v, OrderRequest::market(Instrument::call(50), 450, Side::Sell))
            .await
            .unwrap();
        assert_eq!(fill.acks.len(), 2);
        assert_eq!(fill.signed_filled(), -200);
        assert!(matches!(fill.error, Some(VenueError::Http { status: 500, .. })));
        assert!(!fill.is_complete());
        assert_eq!(v.position(Instrument::call(50)), -200);
    }

    #[tokio::test]
    async fn invalid_orders_never_reach_the_venue() {
        let v = venue().await;
        let r = OrderRouter::new(Limits::default());
        let err = r
            .place_underlying(&v, 100, OrderType::Limit, Side::Buy, None)
            .await
            .unwrap_err();
        assert_eq!(err, OrderError::MissingLimitPrice);
        assert!(v.orders().is_empty());
    }

    #[tokio::test]
    async fn atm_option_strike_is_clamped() {
        let v = venue().await;
        let r = OrderRouter::new(Limits::default());
        let fill = r
            .place_atm_option(&v, OptionRight::Put, 61.3, 10, OrderType::Market, Side::Buy, None)
            .await
            .unwrap();
        assert_eq!(fill.ticker, Instrument::put(54));
        assert!(fill.vwap().is_some());
    }

    #[tokio::test]
    async fn straddle_places_both_legs() {
        let v = venue().await;
        let r = OrderRouter::new(Limits::default());
        let [c, p] = r.place_straddle(&v, 50, 250, Side::Sell).await.unwrap();
        assert_eq!((c.signed_filled(), p.signed_filled()), (-250, -250));
        assert_eq!(c.acks.len(), 3);
        assert_eq!(v.position(Instrument::put(50)), -250);
    }

    #[tokio::test]
    async fn hedge_moves_etf_to_target() {
        let v = venue().await;
        let r = OrderRouter::new(Limits::default());
        // short straddle dengan delta +0.1: exposure -5000 shares
        let fill = r.delta_hedge(&v, -5_000.0, 1_000).await.unwrap().unwrap();
        assert_eq!(fill.signed_filled(), 4_000);
        assert!(r.delta_hedge(&v, -5_000.0, 5_000).await.unwrap().is_none());
    }
}
