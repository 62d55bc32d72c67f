// ===============================
// src/main.rs
// ===============================
/*
 # mode simulasi (tanpa RIT)
 VENUE_MODE=mock RUST_LOG=info cargo run --release

 # konfigurasi yang aktif & aktivitas
curl -s localhost:9898/metrics | egrep '^config_(venue_mode|straddle_n|max_n_etf)'
curl -s localhost:9898/metrics | grep '^signals_total_by'
curl -s localhost:9898/metrics | egrep '^(cash|pnl_total|position_qty)'

*/
/*
=============================================================================
Project : straddle_bot_rust — delta-hedged ATM straddle vol-arb bot in Rust
Module  : main.rs
Version : 0.5.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
License : MIT (see LICENSE)

Summary : Prices options with Black-Scholes, inverts market prices to implied
          vol, trades ATM straddles on the RIT options case when realized vol
          diverges from implied, re-hedges delta every tick, tracks cash /
          positions / PnL, exposes Prometheus metrics, records JSONL events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
mod config;
mod domain;
mod gateway;     // Venue trait + exchange simulasi
mod gateway_rit; // RIT REST API
mod implied_vol;
mod metrics;
mod news;
mod positions;
mod posttrade;
mod pricing;
mod recorder;
mod risk;
mod router;
mod signal;
mod strategy;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::VenueMode;
use crate::domain::Event;
use crate::gateway::{SimCfg, SimVenue, Venue};
use crate::gateway_rit::{CancelScope, OrderStatusFilter, RitClient};
use crate::router::OrderRouter;
use crate::strategy::StrategyController;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Load config & limits ----
    let (args, limits) = config::load();

    // ---- Metrics ----
    metrics::init();
    metrics::serve_metrics(args.metrics_port);

    // ---- Startup info + export config to metrics ----
    info!(
        venue_mode = args.venue_mode.as_str(),
        venue = %args.connection.base_url(),
        straddle_n = args.strategy.straddle_n,
        max_n_etf = limits.max_n_etf,
        strikes = ?(limits.strike_min, limits.strike_max),
        rv_checkpoints = ?args.strategy.rv_checkpoints,
        "startup config"
    );
    metrics::CONFIG_VENUE_MODE
        .with_label_values(&[args.venue_mode.as_str()])
        .set(1);
    metrics::CONFIG_STRADDLE_N.set(args.strategy.straddle_n);
    metrics::CONFIG_MAX_N_ETF.set(limits.max_n_etf);

    // ---- Recorder (optional) ----
    let (rec_tx, rec_task) = match args.record_file.clone() {
        Some(path) => {
            let (tx, rx) = mpsc::channel::<Event>(4096);
            (Some(tx), Some(tokio::spawn(recorder::run(rx, path))))
        }
        None => (None, None),
    };

    let router = OrderRouter::new(limits.clone());

    match args.venue_mode {
        VenueMode::Rit => {
            let client = match RitClient::new(&args.connection) {
                Ok(c) => c,
                Err(e) => {
                    error!(error = %e, "cannot build RIT client");
                    return;
                }
            };
            match client.get_trader().await {
                Ok(t) => info!(trader = %t.trader_id, nlv = t.nlv, "connected"),
                Err(e) => warn!(error = %e, "trader info unavailable"),
            }
            match client.get_limits().await {
                Ok(ls) => {
                    for l in ls {
                        info!(name = %l.name, gross_limit = l.gross_limit, net_limit = l.net_limit, "case limit");
                    }
                }
                Err(e) => warn!(error = %e, "limits unavailable"),
            }

            let ctrl = run_session(client, router, args.strategy, rec_tx).await;

            let rit = ctrl.venue();
            match rit.cancel(&CancelScope::All).await {
                Ok(r) => info!(cancelled = r.cancelled_order_ids.len(), "open orders cancelled"),
                Err(e) => warn!(error = %e, "cancel all failed"),
            }
            // sisa order yang lolos bulk cancel
            if let Ok(left) = rit.get_orders(OrderStatusFilter::Open).await {
                for o in left {
                    if let Err(e) = rit.delete_order(o.order_id).await {
                        warn!(order_id = o.order_id, ticker = %o.ticker, error = %e, "delete order failed");
                    }
                }
            }
            posttrade::report(ctrl.ledger());
        }
        VenueMode::Mock => {
            let sim = SimVenue::new(SimCfg {
                seed: args.sim_seed,
                case_ticks: args.strategy.case_ticks,
                horizon_years: args.strategy.horizon_years,
                max_order_etf: limits.max_chunk_etf,
                max_order_option: limits.max_chunk_option,
                strikes: (limits.strike_min, limits.strike_max),
                ..SimCfg::default()
            });
            let ctrl = run_session(sim, router, args.strategy, rec_tx).await;
            posttrade::report(ctrl.ledger());
        }
    }

    // recorder berhenti setelah semua sender di-drop
    if let Some(task) = rec_task {
        let _ = task.await;
    }
}

async fn run_session<V: Venue>(
    venue: V,
    router: OrderRouter,
    cfg: config::StrategyCfg,
    rec_tx: Option<mpsc::Sender<Event>>,
) -> StrategyController<V> {
    let mut ctrl = StrategyController::new(venue, router, cfg);
    if let Some(tx) = rec_tx {
        ctrl = ctrl.with_recorder(tx);
    }
    ctrl.run().await;
    ctrl
}
