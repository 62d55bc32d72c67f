// ===============================
// src/strategy.rs
// ===============================
//
// Control loop straddle ATM (vol-arb):
//   1) parameter case dari news (rfr, rv awal, update rv di checkpoint)
//   2) IV straddle ATM dari mid call + put
//   3) Flat -> buka straddle kalau transaction_signal keluar dari band biaya
//   4) Pegang straddle -> cek gap_signal di strike yang dipegang; kalau arah
//      berbalik: tutup, resize di bawah cap ETF, buka di strike ATM baru
//   5) Delta hedge ETF tiap tick selama ada opsi
//   6) Mark-to-market PnL
//
// Satu tick diproses sekali, semua call venue di-await berurutan. Error
// venue di dalam tick dicatat, sisa tick dilewati, loop lanjut ke tick
// berikutnya. Fill selalu dibukukan sebelum call venue berikutnya, dan
// mark-to-market tetap jalan walau tick terhenti.
//
use ahash::AHashMap as HashMap;
use thiserror::Error;
use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, info, warn};

use crate::config::StrategyCfg;
use crate::domain::{
    Event, Instrument, NewsItem, OptionPayoff, OrderRequest, Side, SignalEvent, TickEvent, TradeAction,
};
use crate::gateway::{Venue, VenueError};
use crate::implied_vol::{self, ImpliedVolResult, SolverConfig};
use crate::metrics::{
    CASE_TICK, DELTA_LIMIT, IMPLIED_VOL, PENALTY_PCT, REALIZED_VOL, RECONCILES, RISK_FREE_RATE, SIGNALS_BY,
    SOLVER_FAILURES, TICKS, TICK_ERRORS,
};
use crate::news::{self, StrategyParameters};
use crate::positions::{FillRecord, Ledger};
use crate::pricing::price_and_greeks;
use crate::risk::{self, OrderError};
use crate::router::{ChunkedFill, OrderRouter};
use crate::signal::{self, Signal};

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("venue: {0}")]
    Venue(#[from] VenueError),
    #[error("order: {0}")]
    Order(#[from] OrderError),
}

/// Posisi straddle, diturunkan dari ledger (bukan disimpan terpisah)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StraddleState {
    Flat,
    Short { strike: u32 },
    Long { strike: u32 },
}

/// Hasil satu polling `/case`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Processed(u32),
    Waiting,
    Finished,
}

/// Straddle di satu strike: premium mid (call + put) dan IV-nya
#[derive(Debug, Clone, Copy)]
struct StraddleView {
    strike: u32,
    premium: f64,
    iv: ImpliedVolResult,
}

pub struct StrategyController<V: Venue> {
    venue: V,
    router: OrderRouter,
    cfg: StrategyCfg,
    solver: SolverConfig,
    ledger: Ledger,
    params: Option<StrategyParameters>,
    /// checkpoint rv terakhir yang berhasil diterapkan
    rv_checkpoint: Option<u32>,
    last_tick: Option<u32>,
    recorder: Option<mpsc::Sender<Event>>,
}

impl<V: Venue> StrategyController<V> {
    pub fn new(venue: V, router: OrderRouter, cfg: StrategyCfg) -> Self {
        Self {
            venue,
            router,
            cfg,
            solver: SolverConfig::default(),
            ledger: Ledger::new(0.0),
            params: None,
            rv_checkpoint: None,
            last_tick: None,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, tx: mpsc::Sender<Event>) -> Self {
        self.recorder = Some(tx);
        self
    }

    pub fn venue(&self) -> &V {
        &self.venue
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn params(&self) -> Option<StrategyParameters> {
        self.params
    }

    pub fn state(&self) -> StraddleState {
        match (self.ledger.active_strike(), self.ledger.active_side()) {
            (Some(strike), Some(Side::Sell)) => StraddleState::Short { strike },
            (Some(strike), Some(Side::Buy)) => StraddleState::Long { strike },
            _ => StraddleState::Flat,
        }
    }

    pub async fn run(&mut self) {
        info!(n = self.cfg.straddle_n, case_ticks = self.cfg.case_ticks, "strategy loop started");
        loop {
            match self.poll().await {
                Poll::Processed(_) => {}
                Poll::Waiting => sleep(self.cfg.poll_interval).await,
                Poll::Finished => break,
            }
        }
    }

    pub async fn poll(&mut self) -> Poll {
        let case = match self.venue.get_case().await {
            Ok(c) => c,
            Err(e) => {
                TICK_ERRORS.inc();
                warn!(error = %e, "get_case failed");
                return Poll::Waiting;
            }
        };
        if case.tick == 0 {
            return Poll::Waiting;
        }
        if case.status.is_terminal() {
            info!(tick = case.tick, status = ?case.status, "case over");
            return Poll::Finished;
        }
        if self.last_tick.is_some_and(|t| case.tick <= t) {
            return Poll::Waiting;
        }

        self.last_tick = Some(case.tick);
        TICKS.inc();
        CASE_TICK.set(case.tick as i64);
        if let Err(e) = self.on_tick(case.tick).await {
            TICK_ERRORS.inc();
            warn!(tick = case.tick, error = %e, "tick aborted");
        }
        self.mark(case.tick).await;
        Poll::Processed(case.tick)
    }

    async fn on_tick(&mut self, tick: u32) -> Result<(), StrategyError> {
        let params = self.refresh_params(tick).await;
        let tte = self.cfg.tte(tick);
        if tte > 0.0 {
            self.trade(tick, tte, &params).await
        } else {
            debug!(tick, "at expiry, analytics skipped");
            Ok(())
        }
    }

    async fn trade(&mut self, tick: u32, tte: f64, p: &StrategyParameters) -> Result<(), StrategyError> {
        let spot = self.venue.quote(Instrument::Underlying).await?.mid();
        let atm_strike = risk::atm_strike(spot, self.router.limits());
        let atm = self.straddle_view(atm_strike, spot, tte, p.rfr).await?;
        let atm_iv = observe_iv("atm", &atm);
        self.emit(Event::Tick(TickEvent { tick, spot, atm_strike, atm_iv, rv: p.rv }));

        match self.state() {
            StraddleState::Flat => self.try_open(tick, spot, &atm, p).await?,
            StraddleState::Short { strike } => self.maybe_flip(tick, spot, tte, strike, Side::Sell, &atm, p).await?,
            StraddleState::Long { strike } => self.maybe_flip(tick, spot, tte, strike, Side::Buy, &atm, p).await?,
        }

        if self.ledger.has_options() {
            self.hedge(tick, spot, tte, &atm, p).await?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Parameter case
    // ---------------------------------------------------------------------

    /// Parameter untuk tick ini. Gagal baca news tidak menghentikan tick:
    /// parameter sebelumnya (atau fallback) dipakai, checkpoint yang belum
    /// diterapkan dicoba lagi di tick berikutnya.
    async fn refresh_params(&mut self, tick: u32) -> StrategyParameters {
        // checkpoint terbaru yang sudah lewat tapi belum diterapkan
        let applied = self.rv_checkpoint;
        let due = self
            .cfg
            .rv_checkpoints
            .iter()
            .copied()
            .filter(|c| *c <= tick && applied.map_or(true, |a| *c > a))
            .max();
        if let (Some(p), None) = (self.params, due) {
            return p;
        }

        let items = match self.venue.get_news(None, None).await {
            Ok(items) => items,
            Err(e) => {
                let p = self
                    .params
                    .unwrap_or_else(|| StrategyParameters::fallback(self.cfg.rfr_fallback, self.cfg.rv_fallback));
                warn!(tick, error = %e, rv = p.rv, pending_checkpoint = ?due, "news unavailable, keeping previous parameters");
                return p;
            }
        };
        let mut p = match self.params {
            Some(p) => p,
            None => self.initial_params(&items),
        };
        if let Some(checkpoint) = due {
            if let Some(id) = news::rv_news_id(checkpoint, &self.cfg.rv_checkpoints) {
                match news::parse_rv_update(&items, id) {
                    Ok(u) => {
                        p.apply(u);
                        self.rv_checkpoint = Some(checkpoint);
                        info!(tick, checkpoint, rv = p.rv, "realized vol updated");
                    }
                    Err(e) => warn!(tick, checkpoint, error = %e, rv = p.rv, "rv update unavailable, keeping previous"),
                }
            }
        }
        REALIZED_VOL.set(p.rv);
        self.params = Some(p);
        p
    }

    fn initial_params(&self, items: &[NewsItem]) -> StrategyParameters {
        let mut p = StrategyParameters::fallback(self.cfg.rfr_fallback, self.cfg.rv_fallback);
        match news::parse_initial(items) {
            Ok(u) => p.apply(u),
            Err(e) => warn!(error = %e, rfr = p.rfr, rv = p.rv, "initial news unusable, using fallback"),
        }
        match news::parse_limits(items) {
            Ok(u) => p.apply(u),
            Err(e) => warn!(error = %e, "delta limit news unusable"),
        }
        RISK_FREE_RATE.set(p.rfr);
        if let Some(d) = p.delta_limit {
            DELTA_LIMIT.set(d as f64);
        }
        if let Some(x) = p.penalty_pct {
            PENALTY_PCT.set(x);
        }
        info!(rfr = p.rfr, rv = p.rv, delta_limit = ?p.delta_limit, penalty_pct = ?p.penalty_pct, "case parameters");
        p
    }

    // ---------------------------------------------------------------------
    // Analytics
    // ---------------------------------------------------------------------

    async fn straddle_view(&self, strike: u32, spot: f64, tte: f64, rfr: f64) -> Result<StraddleView, VenueError> {
        let [c, p] = Instrument::straddle_legs(strike);
        let premium = self.venue.quote(c).await?.mid() + self.venue.quote(p).await?.mid();
        let iv = implied_vol::solve(premium, spot, strike as f64, tte, OptionPayoff::Straddle, rfr, &self.solver);
        Ok(StraddleView { strike, premium, iv })
    }

    fn breakeven(&self, spot: f64, view: &StraddleView) -> f64 {
        let n = self.cfg.straddle_n;
        signal::breakeven_gap(
            self.cfg.option_commission(n),
            self.cfg.gap_scale,
            spot,
            view.iv.greeks.gamma,
            self.cfg.contract_mult,
            n as f64,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn record_signal(&self, tick: u32, rule: &str, sig: Signal, strike: u32, iv: f64, rv: f64, gap: f64) {
        SIGNALS_BY.with_label_values(&[rule, sig.label()]).inc();
        debug!(tick, rule, signal = sig.label(), strike, iv, rv, gap, "signal");
        self.emit(Event::Sig(SignalEvent {
            tick,
            rule: rule.to_string(),
            signal: sig.label().to_string(),
            strike,
            iv,
            rv,
            gap,
        }));
    }

    // ---------------------------------------------------------------------
    // Trading
    // ---------------------------------------------------------------------

    async fn try_open(
        &mut self,
        tick: u32,
        spot: f64,
        atm: &StraddleView,
        p: &StrategyParameters,
    ) -> Result<(), StrategyError> {
        let Some(iv) = atm.iv.vol() else {
            warn!(tick, strike = atm.strike, reason = ?atm.iv.failure(), "ATM implied vol undefined, staying flat");
            return Ok(());
        };
        let gap = self.breakeven(spot, atm);
        let sig = signal::transaction_signal(p.rv, iv, gap);
        self.record_signal(tick, "transaction", sig, atm.strike, iv, p.rv, gap);
        let Some(side) = sig.side() else {
            return Ok(());
        };
        self.open_straddle(tick, atm, self.cfg.straddle_n, side).await
    }

    async fn open_straddle(
        &mut self,
        tick: u32,
        view: &StraddleView,
        n: i64,
        side: Side,
    ) -> Result<(), StrategyError> {
        if n <= 0 {
            return Ok(());
        }
        let legs = Instrument::straddle_legs(view.strike);
        let marks = self.leg_marks(&legs).await?;
        let fills = self.router.place_straddle(&self.venue, view.strike, n, side).await?;
        for (fill, mark) in fills.iter().zip(marks) {
            self.book_fill(tick, fill, TradeAction::Open, view.iv.vol(), view.iv.greeks.gamma / 2.0, mark);
            if let Some(e) = &fill.error {
                warn!(tick, ticker = %fill.ticker, filled = fill.filled_qty(), wanted = n, error = %e, "straddle leg incomplete");
            }
        }
        self.ledger.set_active(view.strike, side);
        if self.ledger.has_options() {
            info!(tick, strike = view.strike, side = side.as_str(), n, premium = view.premium, "straddle opened");
        }
        self.reconcile_all(tick, &legs).await?;
        Ok(())
    }

    /// Mid tiap leg sebelum order, cadangan harga booking kalau ack tanpa vwap
    async fn leg_marks(&self, legs: &[Instrument; 2]) -> Result<[f64; 2], VenueError> {
        Ok([self.venue.quote(legs[0]).await?.mid(), self.venue.quote(legs[1]).await?.mid()])
    }

    #[allow(clippy::too_many_arguments)]
    async fn maybe_flip(
        &mut self,
        tick: u32,
        spot: f64,
        tte: f64,
        held_strike: u32,
        held_side: Side,
        atm: &StraddleView,
        p: &StrategyParameters,
    ) -> Result<(), StrategyError> {
        let held = if held_strike == atm.strike {
            *atm
        } else {
            self.straddle_view(held_strike, spot, tte, p.rfr).await?
        };
        let Some(iv) = observe_iv("held", &held) else {
            warn!(tick, strike = held_strike, reason = ?held.iv.failure(), "held implied vol undefined, no flip check");
            return Ok(());
        };
        let gap = self.breakeven(spot, &held);
        let sig = signal::gap_signal(p.rv, iv, gap);
        self.record_signal(tick, "gap", sig, held_strike, iv, p.rv, gap);

        let Some(new_side) = sig.side() else {
            return Ok(());
        };
        if new_side == held_side {
            return Ok(());
        }
        if atm.iv.vol().is_none() {
            warn!(tick, strike = atm.strike, "ATM implied vol undefined, flip deferred");
            return Ok(());
        }

        // (a) tutup kedua leg sebesar posisi yang dipegang
        let legs = Instrument::straddle_legs(held_strike);
        let marks = self.leg_marks(&legs).await?;
        let (call_qty, put_qty) = self.ledger.straddle_qty(held_strike);
        let mut complete = true;
        for ((leg, qty), mark) in legs.into_iter().zip([call_qty, put_qty]).zip(marks) {
            let Some(side) = risk::unwind_side(qty) else { continue };
            let fill = match self
                .router
                .place_order(&self.venue, OrderRequest::market(leg, qty.abs(), side))
                .await
            {
                Ok(f) => f,
                Err(e) => {
                    warn!(tick, ticker = %leg, error = %e, "close rejected locally, flip aborted");
                    complete = false;
                    break;
                }
            };
            self.book_fill(tick, &fill, TradeAction::Close, Some(iv), held.iv.greeks.gamma / 2.0, mark);
            if let Some(e) = &fill.error {
                warn!(tick, ticker = %leg, closed = fill.filled_qty(), held = qty, error = %e, "close incomplete, flip aborted");
                complete = false;
                break;
            }
        }
        self.ledger.clear_active_if_flat();
        self.reconcile_all(tick, &legs).await?;
        if !complete {
            return Ok(());
        }
        if !self.ledger.clear_active_if_flat() {
            warn!(tick, "options still held after close, flip aborted");
            return Ok(());
        }
        info!(tick, strike = held_strike, side = held_side.as_str(), "straddle closed");

        // (b) sizing di bawah cap ETF, (c) buka di ATM
        let n = self.cfg.straddle_n;
        let mult = self.cfg.contract_mult;
        let sizing = risk::size_straddle(
            atm.iv.greeks.delta,
            mult,
            n,
            atm.premium * mult * n as f64,
            self.router.limits().max_n_etf,
        );
        if sizing.resized {
            info!(tick, n, trade_n = sizing.trade_n, premium = sizing.premium, "straddle resized under ETF cap");
        }
        self.open_straddle(tick, atm, sizing.trade_n, new_side).await
    }

    async fn hedge(
        &mut self,
        tick: u32,
        spot: f64,
        tte: f64,
        atm: &StraddleView,
        p: &StrategyParameters,
    ) -> Result<(), StrategyError> {
        let legs: Vec<(Instrument, i64)> = self
            .ledger
            .state()
            .positions
            .iter()
            .filter(|(i, _)| i.is_option())
            .map(|(i, q)| (*i, *q))
            .collect();

        let mut iv_by_strike: HashMap<u32, f64> = HashMap::new();
        for (leg, _) in &legs {
            let Instrument::Option { strike, .. } = *leg else { continue };
            if iv_by_strike.contains_key(&strike) {
                continue;
            }
            let view = if strike == atm.strike { *atm } else { self.straddle_view(strike, spot, tte, p.rfr).await? };
            let Some(iv) = observe_iv("held", &view) else {
                warn!(tick, strike, reason = ?view.iv.failure(), "implied vol undefined, hedge skipped");
                return Ok(());
            };
            iv_by_strike.insert(strike, iv);
        }

        let mult = self.cfg.contract_mult;
        let option_delta_shares: f64 = legs
            .iter()
            .filter_map(|(leg, qty)| match *leg {
                Instrument::Option { right, strike } => {
                    let vol = iv_by_strike.get(&strike).copied()?;
                    let (_, g) = price_and_greeks(spot, strike as f64, tte, vol, right.payoff(), p.rfr, true);
                    Some(*qty as f64 * g.delta * mult)
                }
                Instrument::Underlying => None,
            })
            .sum();

        let held = self.ledger.underlying_qty();
        let Some(fill) = self.router.delta_hedge(&self.venue, option_delta_shares, held).await? else {
            debug!(tick, held, option_delta_shares, "hedge on target");
            return Ok(());
        };
        self.book_fill(tick, &fill, TradeAction::Hedge, None, 0.0, spot);
        match &fill.error {
            Some(e) => warn!(tick, wanted = fill.requested, filled = fill.filled_qty(), error = %e, "hedge incomplete"),
            None => debug!(tick, qty = fill.signed_filled(), option_delta_shares, "hedged"),
        }
        self.reconcile(tick, Instrument::Underlying).await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Booking
    // ---------------------------------------------------------------------

    /// Booking qty yang benar-benar terisi, di vwap venue (fallback: mid
    /// sebelum order). Tidak ada call venue di sini.
    fn book_fill(
        &mut self,
        tick: u32,
        fill: &ChunkedFill,
        action: TradeAction,
        implied_vol: Option<f64>,
        gamma: f64,
        fallback_px: f64,
    ) {
        let qty = fill.signed_filled();
        if qty == 0 {
            return;
        }
        let price = fill.vwap().unwrap_or(fallback_px);
        let (multiplier, commission) = if fill.ticker.is_option() {
            (self.cfg.contract_mult, self.cfg.option_fee * qty.abs() as f64)
        } else {
            (1.0, self.cfg.stock_commission(qty))
        };
        let entry = self
            .ledger
            .book(FillRecord {
                tick,
                instrument: fill.ticker,
                quantity: qty,
                price,
                multiplier,
                commission,
                gamma,
                implied_vol,
                action,
                note: String::new(),
            })
            .clone();
        info!(tick, ticker = %entry.instrument, qty, price, action = ?action, cash = entry.cash_after, "fill booked");
        self.emit(Event::Fill(entry));
    }

    /// Reconcile semua ticker; error pertama dikembalikan setelah semua dicoba.
    async fn reconcile_all(&mut self, tick: u32, tickers: &[Instrument]) -> Result<(), VenueError> {
        let mut first_err = None;
        for t in tickers {
            if let Err(e) = self.reconcile(tick, *t).await {
                warn!(tick, ticker = %t, error = %e, "reconcile failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Samakan posisi ledger dengan posisi yang dilaporkan venue.
    async fn reconcile(&mut self, tick: u32, ticker: Instrument) -> Result<(), VenueError> {
        let sec = self.venue.security(ticker).await?;
        let venue_qty = sec.position.round() as i64;
        let ledger_qty = self.ledger.state().qty(&ticker);
        let diff = venue_qty - ledger_qty;
        if diff == 0 {
            return Ok(());
        }
        warn!(tick, %ticker, ledger_qty, venue_qty, "ledger diverged from venue, adopting venue position");
        RECONCILES.inc();
        let entry = self
            .ledger
            .book(FillRecord {
                tick,
                instrument: ticker,
                quantity: diff,
                price: sec.mid(),
                // multiplier 0: tanpa efek cash
                multiplier: 0.0,
                commission: 0.0,
                gamma: 0.0,
                implied_vol: None,
                action: TradeAction::Reconcile,
                note: "venue position".into(),
            })
            .clone();
        self.emit(Event::Fill(entry));
        self.sync_active();
        Ok(())
    }

    fn sync_active(&mut self) {
        if self.ledger.clear_active_if_flat() || self.ledger.active_strike().is_some() {
            return;
        }
        // opsi diadopsi dari venue tanpa strike aktif
        let adopted = self.ledger.state().positions.iter().find_map(|(i, q)| match i {
            Instrument::Option { strike, .. } => Some((*strike, *q)),
            Instrument::Underlying => None,
        });
        if let Some((strike, qty)) = adopted {
            if let Some(side) = Side::from_signed(qty) {
                self.ledger.set_active(strike, side);
            }
        }
    }

    async fn mark(&mut self, tick: u32) {
        let held: Vec<Instrument> = self.ledger.state().positions.keys().copied().collect();
        let mut marks: HashMap<Instrument, f64> = HashMap::new();
        for inst in held {
            match self.venue.quote(inst).await {
                Ok(q) => {
                    marks.insert(inst, q.mid());
                }
                Err(e) => warn!(tick, ticker = %inst, error = %e, "no mark price"),
            }
        }
        let (snap, missing) = self
            .ledger
            .mark_to_market(tick, self.cfg.contract_mult, |i| marks.get(i).copied());
        if !missing.is_empty() {
            warn!(tick, ?missing, "positions valued at zero");
        }
        debug!(tick, options = snap.options, etf = snap.etf, cost = snap.transaction_cost, total = snap.total, "pnl");
    }

    fn emit(&self, ev: Event) {
        if let Some(tx) = &self.recorder {
            if let Err(e) = tx.try_send(ev) {
                debug!(error = %e, "recorder busy, event dropped");
            }
        }
    }
}

fn observe_iv(which: &str, view: &StraddleView) -> Option<f64> {
    match view.iv.vol() {
        Some(v) => {
            IMPLIED_VOL.with_label_values(&[which]).set(v);
            Some(v)
        }
        None => {
            let reason = match view.iv.failure() {
                Some(implied_vol::SolveFailure::ZeroVega) => "zero_vega",
                Some(implied_vol::SolveFailure::OutOfBounds(_)) => "out_of_bounds",
                Some(implied_vol::SolveFailure::MaxIterations) => "max_iterations",
                Some(implied_vol::SolveFailure::InvalidInput) | None => "invalid_input",
            };
            SOLVER_FAILURES.with_label_values(&[reason]).inc();
            None
        }
    }
}
