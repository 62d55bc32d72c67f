// ===============================
// src/positions.rs (Ledger: cash, posisi, transaction log, PnL)
// ===============================
use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};

use crate::domain::{Instrument, InstrumentClass, Side, TradeAction};
use crate::metrics::{CASH, PNL_TOTAL, POSITION_QTY, TRANSACTION_COST};

/// State portfolio. Invariant: `active_strike` terisi iff ada posisi opsi.
#[derive(Debug, Clone, Default)]
pub struct PortfolioState {
    pub cash: f64,
    pub positions: HashMap<Instrument, i64>,
    pub active_strike: Option<u32>,
    pub active_side: Option<Side>,
}

impl PortfolioState {
    /// Mutasi atomik: posisi + cash. Instrumen yang net nol dihapus dari map.
    pub fn apply_fill(&mut self, instrument: Instrument, signed_qty: i64, cash_delta: f64) {
        self.cash += cash_delta;
        if signed_qty == 0 {
            return;
        }
        let net = self.positions.get(&instrument).copied().unwrap_or(0) + signed_qty;
        if net == 0 {
            self.positions.remove(&instrument);
        } else {
            self.positions.insert(instrument, net);
        }
    }

    pub fn qty(&self, instrument: &Instrument) -> i64 {
        self.positions.get(instrument).copied().unwrap_or(0)
    }

    pub fn has_options(&self) -> bool {
        self.positions.keys().any(|k| k.is_option())
    }
}

/// Satu baris log transaksi; tidak pernah diubah setelah di-append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub tick: u32,
    pub instrument: Instrument,
    pub quantity: i64,
    pub price: f64,
    pub gamma: f64,
    pub implied_vol: Option<f64>,
    pub instrument_class: InstrumentClass,
    pub action: TradeAction,
    pub cash_after: f64,
    pub note: String,
}

/// Input untuk `Ledger::book`: fill yang sudah dikonfirmasi venue.
#[derive(Debug, Clone)]
pub struct FillRecord {
    pub tick: u32,
    pub instrument: Instrument,
    /// positif = beli
    pub quantity: i64,
    pub price: f64,
    /// shares per unit (100 untuk opsi, 1 untuk ETF)
    pub multiplier: f64,
    pub commission: f64,
    pub gamma: f64,
    pub implied_vol: Option<f64>,
    pub action: TradeAction,
    pub note: String,
}

impl FillRecord {
    pub fn cash_delta(&self) -> f64 {
        -(self.quantity as f64) * self.price * self.multiplier - self.commission
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnlSnapshot {
    pub tick: u32,
    pub options: f64,
    pub etf: f64,
    pub transaction_cost: f64,
    pub total: f64,
}

#[derive(Debug, Default)]
pub struct Ledger {
    state: PortfolioState,
    starting_cash: f64,
    transaction_cost: f64,
    log: Vec<TransactionLogEntry>,
    pnl: Vec<PnlSnapshot>,
}

impl Ledger {
    pub fn new(starting_cash: f64) -> Self {
        Self { state: PortfolioState { cash: starting_cash, ..Default::default() }, starting_cash, ..Default::default() }
    }

    pub fn state(&self) -> &PortfolioState { &self.state }
    pub fn log(&self) -> &[TransactionLogEntry] { &self.log }
    pub fn pnl_history(&self) -> &[PnlSnapshot] { &self.pnl }
    pub fn starting_cash(&self) -> f64 { self.starting_cash }
    pub fn transaction_cost(&self) -> f64 { self.transaction_cost }

    pub fn has_options(&self) -> bool { self.state.has_options() }
    pub fn underlying_qty(&self) -> i64 { self.state.qty(&Instrument::Underlying) }
    pub fn active_strike(&self) -> Option<u32> { self.state.active_strike }
    pub fn active_side(&self) -> Option<Side> { self.state.active_side }

    /// Posisi kontrak (bertanda) per leg pada strike tertentu: (call, put)
    pub fn straddle_qty(&self, strike: u32) -> (i64, i64) {
        let [c, p] = Instrument::straddle_legs(strike);
        (self.state.qty(&c), self.state.qty(&p))
    }

    pub fn apply_fill(&mut self, instrument: Instrument, signed_qty: i64, cash_delta: f64) {
        self.state.apply_fill(instrument, signed_qty, cash_delta);
        POSITION_QTY.with_label_values(&[&instrument.to_string()]).set(self.state.qty(&instrument));
        CASH.set(self.state.cash);
    }

    /// Booking fill: update state lalu append log.
    pub fn book(&mut self, fill: FillRecord) -> &TransactionLogEntry {
        let cash_delta = fill.cash_delta();
        self.apply_fill(fill.instrument, fill.quantity, cash_delta);
        self.transaction_cost += fill.commission;
        TRANSACTION_COST.set(self.transaction_cost);

        self.log.push(TransactionLogEntry {
            tick: fill.tick,
            instrument: fill.instrument,
            quantity: fill.quantity,
            price: fill.price,
            gamma: fill.gamma,
            implied_vol: fill.implied_vol,
            instrument_class: fill.instrument.class(),
            action: fill.action,
            cash_after: self.state.cash,
            note: fill.note,
        });
        &self.log[self.log.len() - 1]
    }

    /// Tandai straddle aktif; diabaikan kalau tidak ada opsi yang terisi.
    pub fn set_active(&mut self, strike: u32, side: Side) {
        if self.state.has_options() {
            self.state.active_strike = Some(strike);
            self.state.active_side = Some(side);
        }
    }

    /// Reset strike/side kalau semua posisi opsi sudah tertutup.
    pub fn clear_active_if_flat(&mut self) -> bool {
        if self.state.has_options() {
            return false;
        }
        self.state.active_strike = None;
        self.state.active_side = None;
        true
    }

    /// Mark-to-market dengan harga mid. Instrumen tanpa mark dihitung nol
    /// dan dikembalikan di `missing`.
    pub fn mark_to_market<F>(&mut self, tick: u32, option_mult: f64, mark: F) -> (PnlSnapshot, Vec<Instrument>)
    where
        F: Fn(&Instrument) -> Option<f64>,
    {
        let mut options = 0.0;
        let mut etf = 0.0;
        let mut missing = Vec::new();
        for (inst, qty) in self.state.positions.iter() {
            let Some(px) = mark(inst) else {
                missing.push(*inst);
                continue;
            };
            match inst.class() {
                InstrumentClass::Option => options += *qty as f64 * px * option_mult,
                InstrumentClass::Etf => etf += *qty as f64 * px,
            }
        }
        let total = self.state.cash - self.starting_cash + options + etf;
        let snap = PnlSnapshot { tick, options, etf, transaction_cost: self.transaction_cost, total };
        self.pnl.push(snap);
        PNL_TOTAL.set(total);
        (snap, missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(instrument: Instrument, quantity: i64, price: f64, commission: f64) -> FillRecord {
        let multiplier = if instrument.is_option() { 100.0 } else { 1.0 };
        FillRecord {
            tick: 1,
            instrument,
            quantity,
            price,
            multiplier,
            commission,
            gamma: 0.0,
            implied_vol: None,
            action: TradeAction::Open,
            note: String::new(),
        }
    }

    #[test]
    fn cash_equals_sum_of_deltas_and_zero_positions_vanish() {
        let mut st = PortfolioState::default();
        let steps = [
            (Instrument::call(50), -500, 60_000.0),
            (Instrument::put(50), -500, 58_000.0),
            (Instrument::Underlying, 1200, -60_012.0),
            (Instrument::call(50), 500, -55_000.0),
            (Instrument::Underlying, -1200, 60_300.0),
        ];
        let mut sum = 0.0;
        for (inst, q, cd) in steps {
            st.apply_fill(inst, q, cd);
            sum += cd;
        }
        assert!((st.cash - sum).abs() < 1e-9);
        assert!(!st.positions.contains_key(&Instrument::call(50)));
        assert!(!st.positions.contains_key(&Instrument::Underlying));
        assert_eq!(st.qty(&Instrument::put(50)), -500);
        assert!(st.has_options());
    }

    #[test]
    fn book_appends_log_with_cash_after() {
        let mut l = Ledger::new(0.0);
        l.book(fill(Instrument::call(50), -500, 1.2, 500.0));
        let e = l.book(fill(Instrument::put(50), -500, 1.1, 500.0)).clone();
        // 1.2*500*100 - 500 + 1.1*500*100 - 500
        assert!((e.cash_after - 114_000.0).abs() < 1e-9);
        assert_eq!(e.instrument_class, InstrumentClass::Option);
        assert_eq!(l.log().len(), 2);
        assert!((l.transaction_cost() - 1000.0).abs() < 1e-12);
    }

    #[test]
    fn active_strike_tracks_option_membership() {
        let mut l = Ledger::new(0.0);
        l.set_active(50, Side::Sell);
        assert_eq!(l.active_strike(), None, "no options yet");

        l.book(fill(Instrument::call(50), -10, 1.0, 10.0));
        l.set_active(50, Side::Sell);
        assert_eq!(l.active_strike(), Some(50));
        assert!(!l.clear_active_if_flat());

        l.book(fill(Instrument::call(50), 10, 1.0, 10.0));
        l.book(fill(Instrument::Underlying, 300, 50.0, 3.0));
        assert!(l.clear_active_if_flat());
        assert_eq!(l.active_side(), None);
        assert_eq!(l.underlying_qty(), 300);
    }

    #[test]
    fn mark_to_market_splits_options_and_etf() {
        let mut l = Ledger::new(1_000.0);
        l.book(fill(Instrument::call(50), 2, 1.0, 2.0));
        l.book(fill(Instrument::Underlying, -100, 50.0, 1.0));
        let (snap, missing) = l.mark_to_market(5, 100.0, |i| match i {
            Instrument::Underlying => Some(49.0),
            _ => Some(1.5),
        });
        assert!(missing.is_empty());
        assert!((snap.options - 300.0).abs() < 1e-9);
        assert!((snap.etf + 4_900.0).abs() < 1e-9);
        // cash: -200 -2 +5000 -1 = 4797 ; total = 4797 + 300 - 4900
        assert!((snap.total - 197.0).abs() < 1e-9);
        assert_eq!(l.pnl_history().len(), 1);

        let (_, missing) = l.mark_to_market(6, 100.0, |_| None);
        assert_eq!(missing.len(), 2);
    }
}
