// ===============================
// src/gateway.rs (Venue interface + exchange simulasi)
// ===============================
use std::f64::consts::PI;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;

use crate::domain::{
    BookLevel, CaseInfo, CaseStatus, Instrument, NewsItem, OrderAck, OrderBook, OrderRequest, OrderType,
    Quote, Security, Side,
};
use crate::pricing::price_and_greeks;

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("venue returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("no data for {0}")]
    Empty(String),
}

/// Antarmuka venue yang dipakai core. Semua call di-await berurutan oleh
/// control loop; tidak ada request yang overlap.
#[async_trait]
pub trait Venue: Send + Sync {
    async fn get_case(&self) -> Result<CaseInfo, VenueError>;
    async fn get_news(&self, since: Option<u64>, limit: Option<u32>) -> Result<Vec<NewsItem>, VenueError>;
    async fn get_securities(&self, ticker: Instrument) -> Result<Vec<Security>, VenueError>;
    async fn get_securities_book(&self, ticker: Instrument, limit: u32) -> Result<OrderBook, VenueError>;
    async fn post_order(&self, req: &OrderRequest) -> Result<OrderAck, VenueError>;

    /// Snapshot pertama dari `/securities`
    async fn security(&self, ticker: Instrument) -> Result<Security, VenueError> {
        self.get_securities(ticker)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| VenueError::Empty(ticker.to_string()))
    }

    async fn quote(&self, ticker: Instrument) -> Result<Quote, VenueError> {
        let s = self.security(ticker).await?;
        Ok(Quote { instrument: ticker, bid: s.bid, ask: s.ask })
    }

    /// Mid dari best bid/ask order book
    async fn get_mid_price(&self, ticker: Instrument) -> Result<f64, VenueError> {
        self.get_securities_book(ticker, 1)
            .await?
            .mid()
            .ok_or_else(|| VenueError::Empty(format!("{ticker} book")))
    }
}

// -----------------------------------------------------------------------------
// Exchange simulasi (mock venue)
//   - Spot ETF: random walk log-normal, vol = realized vol yang diumumkan
//   - Opsi: harga Black-Scholes pada vol market yang berayun (sinus) di
//     sekitar `market_vol`, plus spread tetap
//   - Market order langsung terisi di bid/ask; ukuran order dibatasi
//   - News: rfr+rv (id 1), delta limit (id 2), update rv (id 3, 5, 7)
// -----------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct SimCfg {
    pub seed: u64,
    pub case_ticks: u32,
    pub horizon_years: f64,
    pub start_spot: f64,
    pub rfr: f64,
    /// rv per kuartal (persen) yang diumumkan di news
    pub rv_pct: [f64; 4],
    pub rv_ticks: [u32; 3],
    pub market_vol: f64,
    pub vol_swing: f64,
    pub option_spread: f64,
    pub etf_spread: f64,
    pub max_order_etf: i64,
    pub max_order_option: i64,
    pub strikes: (u32, u32),
    pub delta_limit: u32,
    pub penalty_pct: u32,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            seed: 7,
            case_ticks: 300,
            horizon_years: 1.0 / 12.0,
            start_spot: 50.0,
            rfr: 0.0,
            rv_pct: [20.0, 25.0, 15.0, 30.0],
            rv_ticks: [74, 149, 224],
            market_vol: 0.22,
            vol_swing: 0.08,
            option_spread: 0.02,
            etf_spread: 0.01,
            max_order_etf: 10_000,
            max_order_option: 100,
            strikes: (45, 54),
            delta_limit: 7_000,
            penalty_pct: 1,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SimPosition {
    qty: i64,
    avg_px: f64,
}

struct SimState {
    tick: u32,
    spot: f64,
    rng: StdRng,
    positions: HashMap<Instrument, SimPosition>,
    next_order_id: u64,
    /// ticker -> sisa order sukses sebelum venue mulai menolak
    fail_after: HashMap<Instrument, usize>,
    down: HashSet<Instrument>,
    orders: Vec<OrderAck>,
}

pub struct SimVenue {
    cfg: SimCfg,
    state: Mutex<SimState>,
}

impl SimVenue {
    pub fn new(cfg: SimCfg) -> Self {
        let state = SimState {
            tick: 0,
            spot: cfg.start_spot,
            rng: StdRng::seed_from_u64(cfg.seed),
            positions: HashMap::new(),
            next_order_id: 1,
            fail_after: HashMap::new(),
            down: HashSet::new(),
            orders: Vec::new(),
        };
        Self { cfg, state: Mutex::new(state) }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Order untuk `ticker` sukses `ok_orders` kali lagi, setelah itu gagal (HTTP 500).
    pub fn inject_failure(&self, ticker: Instrument, ok_orders: usize) {
        self.lock().fail_after.insert(ticker, ok_orders);
    }

    pub fn clear_failures(&self) {
        let mut st = self.lock();
        st.fail_after.clear();
        st.down.clear();
    }

    pub fn position(&self, ticker: Instrument) -> i64 {
        self.lock().positions.get(&ticker).map(|p| p.qty).unwrap_or(0)
    }

    pub fn orders(&self) -> Vec<OrderAck> {
        self.lock().orders.clone()
    }

    pub fn spot(&self) -> f64 {
        self.lock().spot
    }

    /// Vol market (untuk harga opsi) pada tick tertentu
    pub fn market_vol(&self, tick: u32) -> f64 {
        let phase = 2.0 * PI * tick as f64 / self.cfg.case_ticks as f64;
        (self.cfg.market_vol + self.cfg.vol_swing * phase.sin()).max(0.01)
    }

    fn realized_vol(&self, tick: u32) -> f64 {
        let quarter = self.cfg.rv_ticks.iter().filter(|t| tick > **t).count();
        self.cfg.rv_pct[quarter] / 100.0
    }

    fn tte(&self, tick: u32) -> f64 {
        (self.cfg.case_ticks.saturating_sub(tick)) as f64 / self.cfg.case_ticks as f64 * self.cfg.horizon_years
    }

    fn fair(&self, ticker: Instrument, spot: f64, tick: u32) -> f64 {
        match ticker {
            Instrument::Underlying => spot,
            Instrument::Option { right, strike } => {
                let k = strike as f64;
                let tte = self.tte(tick);
                if tte <= 0.0 {
                    return match right {
                        crate::domain::OptionRight::Call => (spot - k).max(0.0),
                        crate::domain::OptionRight::Put => (k - spot).max(0.0),
                    };
                }
                price_and_greeks(spot, k, tte, self.market_vol(tick), right.payoff(), self.cfg.rfr, false).0
            }
        }
    }

    fn bid_ask(&self, ticker: Instrument, spot: f64, tick: u32) -> (f64, f64) {
        let half = match ticker {
            Instrument::Underlying => self.cfg.etf_spread / 2.0,
            Instrument::Option { .. } => self.cfg.option_spread / 2.0,
        };
        let fair = self.fair(ticker, spot, tick);
        ((fair - half).max(0.01), (fair + half).max(0.02))
    }

    fn listed(&self, ticker: Instrument) -> bool {
        match ticker {
            Instrument::Underlying => true,
            Instrument::Option { strike, .. } => (self.cfg.strikes.0..=self.cfg.strikes.1).contains(&strike),
        }
    }

    fn news(&self) -> Vec<NewsItem> {
        let c = &self.cfg;
        let mut items = vec![
            NewsItem {
                news_id: 1,
                tick: 0,
                headline: "Welcome".into(),
                body: format!(
                    "The risk free rate is {}% and the realized volatility is {}% for the first quarter of the month.",
                    c.rfr * 100.0,
                    c.rv_pct[0]
                ),
            },
            NewsItem {
                news_id: 2,
                tick: 0,
                headline: "Risk limits".into(),
                body: format!(
                    "The delta limit for this case is {} and the penalty percentage is {}%.",
                    c.delta_limit, c.penalty_pct
                ),
            },
        ];
        for (i, t) in c.rv_ticks.iter().enumerate() {
            let id = 2 * i as u64 + 3;
            // analyst note (id genap 4, 6, ..) muncul 10 tick sebelum update
            // berikutnya, jadi id tetap naik searah tick dan tidak bentrok
            // dengan id 1 / 2
            if i > 0 {
                items.push(NewsItem {
                    news_id: id - 1,
                    tick: t.saturating_sub(10),
                    headline: "Analyst note".into(),
                    body: format!(
                        "Analysts expect next quarter volatility between {}% and {}%.",
                        c.rv_pct[i + 1] - 5.0,
                        c.rv_pct[i + 1] + 5.0
                    ),
                });
            }
            items.push(NewsItem {
                news_id: id,
                tick: *t,
                headline: "Volatility update".into(),
                body: format!("The realized volatility of RTM for the next quarter will be {}%.", c.rv_pct[i + 1]),
            });
        }
        items
    }
}

#[async_trait]
impl Venue for SimVenue {
    async fn get_case(&self) -> Result<CaseInfo, VenueError> {
        let dt = self.cfg.horizon_years / self.cfg.case_ticks as f64;
        let mut st = self.lock();
        if st.tick >= self.cfg.case_ticks {
            return Ok(CaseInfo { tick: self.cfg.case_ticks, status: CaseStatus::Ended });
        }
        st.tick += 1;
        // langkah random walk; uniform dengan varians 1
        let z: f64 = st.rng.gen_range(-1.0..1.0) * 3f64.sqrt();
        let sigma = self.realized_vol(st.tick);
        st.spot *= (sigma * dt.sqrt() * z - 0.5 * sigma * sigma * dt).exp();
        Ok(CaseInfo { tick: st.tick, status: CaseStatus::Active })
    }

    async fn get_news(&self, since: Option<u64>, limit: Option<u32>) -> Result<Vec<NewsItem>, VenueError> {
        let tick = self.lock().tick;
        let mut out: Vec<NewsItem> = self
            .news()
            .into_iter()
            .filter(|n| n.tick <= tick && since.map_or(true, |s| n.news_id > s))
            .collect();
        // RIT: terbaru dulu
        out.sort_by(|a, b| b.news_id.cmp(&a.news_id));
        if let Some(l) = limit {
            out.truncate(l as usize);
        }
        Ok(out)
    }

    async fn get_securities(&self, ticker: Instrument) -> Result<Vec<Security>, VenueError> {
        if !self.listed(ticker) {
            return Ok(Vec::new());
        }
        let st = self.lock();
        let (bid, ask) = self.bid_ask(ticker, st.spot, st.tick);
        let pos = st.positions.get(&ticker).copied().unwrap_or_default();
        Ok(vec![Security {
            ticker: ticker.to_string(),
            bid,
            ask,
            vwap: (pos.qty != 0).then_some(pos.avg_px),
            position: pos.qty as f64,
        }])
    }

    async fn get_securities_book(&self, ticker: Instrument, limit: u32) -> Result<OrderBook, VenueError> {
        if !self.listed(ticker) || limit == 0 {
            return Ok(OrderBook::default());
        }
        let st = self.lock();
        let (bid, ask) = self.bid_ask(ticker, st.spot, st.tick);
        Ok(OrderBook {
            bids: vec![BookLevel { price: bid, quantity: 10_000.0 }],
            asks: vec![BookLevel { price: ask, quantity: 10_000.0 }],
        })
    }

    async fn post_order(&self, req: &OrderRequest) -> Result<OrderAck, VenueError> {
        let mut st = self.lock();
        if !self.listed(req.ticker) {
            return Err(VenueError::Http { status: 404, body: format!("unknown ticker {}", req.ticker) });
        }
        let cap = if req.ticker.is_option() { self.cfg.max_order_option } else { self.cfg.max_order_etf };
        if req.quantity <= 0 || req.quantity > cap {
            return Err(VenueError::Http {
                status: 400,
                body: format!("quantity {} outside (0, {cap}] for {}", req.quantity, req.ticker),
            });
        }
        if st.down.contains(&req.ticker) {
            return Err(VenueError::Http { status: 500, body: "internal server error".into() });
        }
        if let Some(left) = st.fail_after.get_mut(&req.ticker) {
            if *left == 0 {
                st.fail_after.remove(&req.ticker);
                st.down.insert(req.ticker);
                return Err(VenueError::Http { status: 500, body: "internal server error".into() });
            }
            *left -= 1;
        }

        let (bid, ask) = self.bid_ask(req.ticker, st.spot, st.tick);
        let touch = match req.action { Side::Buy => ask, Side::Sell => bid };
        let fill_px = match (req.order_type, req.price) {
            (OrderType::Limit, Some(limit)) => {
                let marketable = match req.action { Side::Buy => limit >= ask, Side::Sell => limit <= bid };
                marketable.then_some(touch)
            }
            _ => Some(touch),
        };

        let order_id = st.next_order_id;
        st.next_order_id += 1;
        let filled = if fill_px.is_some() { req.quantity } else { 0 };

        if let Some(px) = fill_px {
            // avg cost per posisi, seperti tracker posisi
            let signed = req.action.sign() * filled;
            let p = st.positions.entry(req.ticker).or_default();
            let new_qty = p.qty + signed;
            if p.qty == 0 || p.qty.signum() == signed.signum() {
                p.avg_px = (p.avg_px * p.qty.abs() as f64 + px * signed.abs() as f64) / new_qty.abs() as f64;
            } else if new_qty == 0 {
                p.avg_px = 0.0;
            } else if new_qty.signum() != p.qty.signum() {
                p.avg_px = px;
            }
            p.qty = new_qty;
        }

        let ack = OrderAck {
            order_id,
            ticker: req.ticker.to_string(),
            order_type: req.order_type,
            quantity: req.quantity as f64,
            action: req.action,
            price: req.price,
            quantity_filled: filled as f64,
            vwap: fill_px,
            status: if fill_px.is_some() { "TRANSACTED".into() } else { "OPEN".into() },
        };
        st.orders.push(ack.clone());
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn case_runs_to_ended() {
        let v = SimVenue::new(SimCfg { case_ticks: 5, ..SimCfg::default() });
        for t in 1..=5 {
            let c = v.get_case().await.unwrap();
            assert_eq!((c.tick, c.status), (t, CaseStatus::Active));
        }
        let c = v.get_case().await.unwrap();
        assert_eq!(c.status, CaseStatus::Ended);
        assert_eq!(c.tick, 5);
    }

    #[tokio::test]
    async fn news_is_released_over_time() {
        let v = SimVenue::new(SimCfg::default());
        v.get_case().await.unwrap();
        let news = v.get_news(None, None).await.unwrap();
        let ids: Vec<u64> = news.iter().map(|n| n.news_id).collect();
        assert_eq!(ids, vec![2, 1]);
        for _ in 1..74 {
            v.get_case().await.unwrap();
        }
        let news = v.get_news(Some(2), None).await.unwrap();
        assert!(news.iter().any(|n| n.news_id == 3));
    }

    #[tokio::test]
    async fn news_ids_are_unique_and_follow_release_order() {
        let v = SimVenue::new(SimCfg::default());
        for _ in 0..300 {
            v.get_case().await.unwrap();
        }
        let news = v.get_news(None, None).await.unwrap();
        let ids: Vec<u64> = news.iter().map(|n| n.news_id).collect();
        assert_eq!(ids, vec![7, 6, 5, 4, 3, 2, 1]);
        // terbaru dulu: tick tidak pernah naik sepanjang list
        assert!(news.windows(2).all(|w| w[0].tick >= w[1].tick));
        let limits: Vec<_> = news.iter().filter(|n| n.news_id == 2).collect();
        assert_eq!(limits.len(), 1);
        assert!(limits[0].body.contains("delta limit"));
    }

    #[tokio::test]
    async fn market_orders_fill_at_touch_and_track_position() {
        let v = SimVenue::new(SimCfg::default());
        v.get_case().await.unwrap();
        let q = v.quote(Instrument::call(50)).await.unwrap();
        let ack = v.post_order(&OrderRequest::market(Instrument::call(50), 100, Side::Sell)).await.unwrap();
        assert_eq!(ack.vwap, Some(q.bid));
        assert_eq!(ack.quantity_filled, 100.0);
        assert_eq!(v.position(Instrument::call(50)), -100);

        let sec = v.security(Instrument::call(50)).await.unwrap();
        assert_eq!(sec.position, -100.0);
        assert!((sec.vwap.unwrap() - q.bid).abs() < 1e-12);
    }

    #[tokio::test]
    async fn oversized_and_injected_failures_are_http_errors() {
        let v = SimVenue::new(SimCfg::default());
        v.get_case().await.unwrap();
        let big = OrderRequest::market(Instrument::put(50), 101, Side::Buy);
        assert!(matches!(v.post_order(&big).await, Err(VenueError::Http { status: 400, .. })));

        v.inject_failure(Instrument::Underlying, 1);
        let o = OrderRequest::market(Instrument::Underlying, 10, Side::Buy);
        assert!(v.post_order(&o).await.is_ok());
        assert!(matches!(v.post_order(&o).await, Err(VenueError::Http { status: 500, .. })));
        assert!(v.post_order(&o).await.is_err());
        v.clear_failures();
        assert!(v.post_order(&o).await.is_ok());
    }

    #[tokio::test]
    async fn book_mid_matches_security_mid() {
        let v = SimVenue::new(SimCfg::default());
        v.get_case().await.unwrap();
        let mid = v.get_mid_price(Instrument::Underlying).await.unwrap();
        let sec = v.security(Instrument::Underlying).await.unwrap();
        assert!((mid - sec.mid()).abs() < 1e-12);
        assert!(v.get_mid_price(Instrument::call(60)).await.is_err());
    }
}
