// ===============================
// src/posttrade.rs
// ===============================
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{Instrument, TradeAction};
use crate::positions::Ledger;

/// Ringkasan akhir sesi dari ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub transactions: usize,
    pub opens: usize,
    pub closes: usize,
    pub hedges: usize,
    pub reconciles: usize,
    pub cash: f64,
    pub transaction_cost: f64,
    pub final_pnl: Option<f64>,
    pub options_value: Option<f64>,
    pub etf_value: Option<f64>,
    pub open_positions: Vec<(Instrument, i64)>,
}

pub fn summarize(ledger: &Ledger) -> SessionSummary {
    let count = |a: TradeAction| ledger.log().iter().filter(|e| e.action == a).count();
    let last = ledger.pnl_history().last();
    let mut open_positions: Vec<(Instrument, i64)> =
        ledger.state().positions.iter().map(|(i, q)| (*i, *q)).collect();
    open_positions.sort();

    SessionSummary {
        transactions: ledger.log().len(),
        opens: count(TradeAction::Open),
        closes: count(TradeAction::Close),
        hedges: count(TradeAction::Hedge),
        reconciles: count(TradeAction::Reconcile),
        cash: ledger.state().cash,
        transaction_cost: ledger.transaction_cost(),
        final_pnl: last.map(|s| s.total),
        options_value: last.map(|s| s.options),
        etf_value: last.map(|s| s.etf),
        open_positions,
    }
}

pub fn report(ledger: &Ledger) -> SessionSummary {
    let s = summarize(ledger);
    info!(
        transactions = s.transactions,
        opens = s.opens,
        closes = s.closes,
        hedges = s.hedges,
        reconciles = s.reconciles,
        cash = s.cash,
        cost = s.transaction_cost,
        "session done"
    );
    match s.final_pnl {
        Some(total) => info!(total, options = ?s.options_value, etf = ?s.etf_value, "final pnl (mark-to-mid)"),
        None => warn!("no pnl snapshot recorded"),
    }
    for (inst, qty) in &s.open_positions {
        info!(ticker = %inst, qty, "open at end of session");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::FillRecord;

    #[test]
    fn summary_counts_actions_and_takes_last_snapshot() {
        let mut l = Ledger::new(0.0);
        let mut f = FillRecord {
            tick: 1,
            instrument: Instrument::call(50),
            quantity: -10,
            price: 1.0,
            multiplier: 100.0,
            commission: 10.0,
            gamma: 0.1,
            implied_vol: Some(0.2),
            action: TradeAction::Open,
            note: String::new(),
        };
        l.book(f.clone());
        f.instrument = Instrument::Underlying;
        f.quantity = 50;
        f.price = 50.0;
        f.multiplier = 1.0;
        f.commission = 0.5;
        f.action = TradeAction::Hedge;
        l.book(f);
        l.mark_to_market(1, 100.0, |_| Some(1.0));
        l.mark_to_market(2, 100.0, |i| if i.is_option() { Some(0.5) } else { Some(50.0) });

        let s = summarize(&l);
        assert_eq!((s.transactions, s.opens, s.hedges, s.closes), (2, 1, 1, 0));
        assert_eq!(s.open_positions, vec![(Instrument::Underlying, 50), (Instrument::call(50), -10)]);
        // cash: 1000 - 10 - 2500 - 0.5 = -1510.5 ; opsi -500 ; etf 2500
        assert_eq!(s.final_pnl, Some(489.5));
        assert_eq!(s.transaction_cost, 10.5);
    }
}
