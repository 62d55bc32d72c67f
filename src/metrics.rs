// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Case / loop --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "case ticks processed").unwrap());

pub static CASE_TICK: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("case_tick", "last processed case tick").unwrap());

pub static TICK_ERRORS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("tick_errors_total", "ticks aborted by a venue/order error").unwrap());

// -------- Analytics --------
pub static SIGNALS_BY: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("signals_total_by", "strategy signals (labels: rule, signal)"),
        &["rule", "signal"],
    )
    .unwrap()
});

pub static SOLVER_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("iv_solver_failures_total", "implied vol solver undefined results"),
        &["reason"],
    )
    .unwrap()
});

pub static IMPLIED_VOL: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("implied_vol", "straddle implied vol (label: which = atm|held)"),
        &["which"],
    )
    .unwrap()
});

pub static REALIZED_VOL: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("realized_vol", "realized vol from news").unwrap());

pub static RISK_FREE_RATE: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("risk_free_rate", "risk free rate from news").unwrap());

// delta limit & penalty: hanya visibilitas, belum di-enforce
pub static DELTA_LIMIT: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("delta_limit", "case delta limit from news").unwrap());

pub static PENALTY_PCT: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("delta_penalty_pct", "delta limit penalty percentage").unwrap());

// -------- Orders --------
pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_total", "orders accepted by venue (labels: class, side)"),
        &["class", "side"],
    )
    .unwrap()
});

pub static ORDER_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("order_failures_total", "orders rejected locally or by venue"),
        &["class", "kind"],
    )
    .unwrap()
});

pub static HEDGE_QTY: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("hedge_order_qty", "last signed ETF hedge order").unwrap());

pub static RECONCILES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ledger_reconciles_total", "ledger adjusted to venue position").unwrap());

// -------- Ledger & PnL --------
pub static POSITION_QTY: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("position_qty", "net qty per ticker"), &["ticker"]).unwrap()
});

pub static CASH: Lazy<Gauge> = Lazy::new(|| Gauge::new("cash", "ledger cash").unwrap());

pub static TRANSACTION_COST: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("transaction_cost", "cumulative commission").unwrap());

pub static PNL_TOTAL: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("pnl_total", "mark-to-mid PnL").unwrap());

// ---- Config visibility ----
pub static CONFIG_VENUE_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_venue_mode", "venue mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_STRADDLE_N: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_straddle_n", "nominal straddle size").unwrap());

pub static CONFIG_MAX_N_ETF: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_max_n_etf", "ETF exposure cap").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(CASE_TICK.clone())),
        REGISTRY.register(Box::new(TICK_ERRORS.clone())),
        REGISTRY.register(Box::new(SIGNALS_BY.clone())),
        REGISTRY.register(Box::new(SOLVER_FAILURES.clone())),
        REGISTRY.register(Box::new(IMPLIED_VOL.clone())),
        REGISTRY.register(Box::new(REALIZED_VOL.clone())),
        REGISTRY.register(Box::new(RISK_FREE_RATE.clone())),
        REGISTRY.register(Box::new(DELTA_LIMIT.clone())),
        REGISTRY.register(Box::new(PENALTY_PCT.clone())),
        REGISTRY.register(Box::new(ORDERS.clone())),
        REGISTRY.register(Box::new(ORDER_FAILURES.clone())),
        REGISTRY.register(Box::new(HEDGE_QTY.clone())),
        REGISTRY.register(Box::new(RECONCILES.clone())),
        REGISTRY.register(Box::new(POSITION_QTY.clone())),
        REGISTRY.register(Box::new(CASH.clone())),
        REGISTRY.register(Box::new(TRANSACTION_COST.clone())),
        REGISTRY.register(Box::new(PNL_TOTAL.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_VENUE_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_STRADDLE_N.clone())),
        REGISTRY.register(Box::new(CONFIG_MAX_N_ETF.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics): responder HTTP 1.1 mini
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Metrics server di OS thread sendiri (control loop tetap bersih)
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, ?e, "metrics bind failed");
                return;
            }
        };
        tracing::info!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => tracing::warn!(?e, "metrics accept error"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_families() {
        init();
        CONFIG_STRADDLE_N.set(500);
        let text = String::from_utf8(encode_metrics()).unwrap();
        assert!(text.contains("config_straddle_n 500"));
    }
}
