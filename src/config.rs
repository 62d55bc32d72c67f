// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : straddle_bot_rust — delta-hedged ATM straddle vol-arb bot in Rust
Module  : config.rs
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
use std::env;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;

/// Venue tujuan order & sumber quote
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VenueMode {
    /// RIT REST API (localhost:9999 default)
    Rit,
    /// Exchange simulasi in-process
    Mock,
}

impl VenueMode {
    pub fn from_env(key: &str, default_mode: VenueMode) -> VenueMode {
        match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
            "rit" | "live" => VenueMode::Rit,
            "mock" | "sim" => VenueMode::Mock,
            _ => default_mode,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueMode::Rit => "rit",
            VenueMode::Mock => "mock",
        }
    }
}

/// Parameter koneksi venue (CLI, fallback ke ENV)
#[derive(Clone, Debug, Parser)]
#[command(name = "straddle_bot_rust", about = "ATM straddle vol-arb bot for the RIT options case")]
pub struct Connection {
    #[arg(long, env = "RIT_HOST", default_value = "localhost")]
    pub host: String,
    #[arg(long, env = "RIT_PORT", default_value_t = 9999)]
    pub port: u16,
    #[arg(long, env = "RIT_BASE_PATH", default_value = "/v1")]
    pub base_path: String,
    #[arg(long, env = "RIT_API_KEY", default_value = "")]
    pub api_key: String,
    /// Timeout per request HTTP (detik)
    #[arg(long, env = "RIT_TIMEOUT_SECS", default_value_t = 20)]
    pub timeout_secs: u64,
}

impl Connection {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.base_path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Parameter strategi straddle
#[derive(Clone, Debug)]
pub struct StrategyCfg {
    /// jumlah straddle nominal (kontrak per leg)
    pub straddle_n: i64,
    pub contract_mult: f64,
    /// komisi per kontrak opsi
    pub option_fee: f64,
    /// komisi per share ETF
    pub etf_fee: f64,
    pub case_ticks: u32,
    /// sisa umur opsi di tick 0 (tahun)
    pub horizon_years: f64,
    pub gap_scale: f64,
    /// tick di mana rv di-refresh dari news
    pub rv_checkpoints: Vec<u32>,
    pub rfr_fallback: f64,
    pub rv_fallback: f64,
    pub poll_interval: Duration,
}

impl Default for StrategyCfg {
    fn default() -> Self {
        Self {
            straddle_n: 500,
            contract_mult: 100.0,
            option_fee: 1.0,
            etf_fee: 0.01,
            case_ticks: 300,
            horizon_years: 1.0 / 12.0,
            gap_scale: 240.0,
            rv_checkpoints: vec![74, 149, 224],
            rfr_fallback: 0.0,
            rv_fallback: 0.2,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl StrategyCfg {
    /// Time to expiry (tahun) pada tick tertentu
    pub fn tte(&self, tick: u32) -> f64 {
        (self.case_ticks as f64 - tick as f64) / self.case_ticks as f64 * self.horizon_years
    }

    /// Komisi round-trip straddle: n kontrak tiap leg
    pub fn option_commission(&self, contracts_each_leg: i64) -> f64 {
        2.0 * contracts_each_leg.abs() as f64 * self.option_fee
    }

    pub fn stock_commission(&self, shares: i64) -> f64 {
        self.etf_fee * shares.abs() as f64
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    pub connection: Connection,
    pub venue_mode: VenueMode,
    pub sim_seed: u64,

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: u16,

    pub strategy: StrategyCfg,
}

/// Batas venue (exposure & ukuran order)
#[derive(Clone, Debug)]
pub struct Limits {
    pub max_n_option: i64,
    pub max_n_etf: i64,
    pub max_chunk_etf: i64,
    pub max_chunk_option: i64,
    pub strike_min: u32,
    pub strike_max: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_n_option: 1000,
            max_n_etf: 50_000,
            max_chunk_etf: 10_000,
            max_chunk_option: 100,
            strike_min: 45,
            strike_max: 54,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

/// `74,149,224` -> [74, 149, 224]; kosong/invalid -> default
fn parse_checkpoints(raw: Option<String>, default: Vec<u32>) -> Vec<u32> {
    let Some(raw) = raw else { return default };
    let mut out: Vec<u32> = raw
        .split(',')
        .filter_map(|t| t.trim().parse().ok())
        .collect();
    out.sort_unstable();
    out.dedup();
    if out.is_empty() { default } else { out }
}

pub fn load() -> (Args, Limits) {
    // Pastikan .env dibaca sebelum clap membaca ENV
    let _ = dotenv();

    let connection = Connection::parse();

    // ===== Limits =====
    let d = Limits::default();
    let max_n_option = env_or("MAX_N_OPTION", d.max_n_option);
    let limits = Limits {
        max_n_option,
        max_n_etf: env_or("MAX_N_ETF", d.max_n_etf),
        max_chunk_etf: env_or("MAX_CHUNK_ETF", d.max_chunk_etf),
        max_chunk_option: env_or("MAX_CHUNK_OPTION", d.max_chunk_option),
        strike_min: env_or("STRIKE_MIN", d.strike_min),
        strike_max: env_or("STRIKE_MAX", d.strike_max),
    };

    // ===== Strategy =====
    let s = StrategyCfg::default();
    let strategy = StrategyCfg {
        // default: setengah limit opsi (call + put)
        straddle_n: env_or("STRADDLE_N", max_n_option / 2),
        contract_mult: env_or("CONTRACT_MULT", s.contract_mult),
        option_fee: env_or("OPTION_FEE", s.option_fee),
        etf_fee: env_or("ETF_FEE", s.etf_fee),
        case_ticks: env_or("CASE_TICKS", s.case_ticks),
        horizon_years: env_or("HORIZON_YEARS", s.horizon_years),
        gap_scale: env_or("GAP_SCALE", s.gap_scale),
        rv_checkpoints: parse_checkpoints(env::var("RV_CHECKPOINTS").ok(), s.rv_checkpoints),
        rfr_fallback: env_or("RFR_FALLBACK", s.rfr_fallback),
        rv_fallback: env_or("RV_FALLBACK", s.rv_fallback),
        poll_interval: Duration::from_millis(env_or("POLL_MS", 100u64)),
    };

    let args = Args {
        connection,
        venue_mode: VenueMode::from_env("VENUE_MODE", VenueMode::Rit),
        sim_seed: env_or("SIM_SEED", 7u64),
        record_file: env::var("RECORD_FILE").ok(),
        metrics_port: env_or("METRICS_PORT", 9898u16),
        strategy,
    };

    (args, limits)
}
