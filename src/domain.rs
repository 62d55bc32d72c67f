// ===============================
// src/domain.rs
// ===============================
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::risk::OrderError;

/// Ticker underlying ETF di case RIT
pub const UNDERLYING_TICKER: &str = "RTM";
/// Prefix seri opsi (bulan 1): RTM1C50, RTM1P50, ...
pub const OPTION_PREFIX: &str = "RTM1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side { Buy, Sell }
impl Side {
    pub fn sign(&self) -> i64 { match self { Side::Buy => 1, Side::Sell => -1 } }
    pub fn opposite(&self) -> Side { match self { Side::Buy => Side::Sell, Side::Sell => Side::Buy } }
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "BUY", Side::Sell => "SELL" } }
    /// Side dari quantity bertanda; None kalau nol
    pub fn from_signed(qty: i64) -> Option<Side> {
        match qty.signum() { 1 => Some(Side::Buy), -1 => Some(Side::Sell), _ => None }
    }
}
impl FromStr for Side {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(OrderError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType { Market, Limit }
impl OrderType {
    pub fn as_str(&self) -> &'static str { match self { OrderType::Market => "MARKET", OrderType::Limit => "LIMIT" } }
}
impl FromStr for OrderType {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            other => Err(OrderError::UnknownOrderType(other.to_string())),
        }
    }
}

/// Payoff vanilla yang bisa dihitung oleh pricing engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionPayoff { Call, Put, Forward, Straddle }

/// Satu leg opsi yang listed di venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionRight { Call, Put }
impl OptionRight {
    pub const BOTH: [OptionRight; 2] = [OptionRight::Call, OptionRight::Put];
    pub fn code(&self) -> char { match self { OptionRight::Call => 'C', OptionRight::Put => 'P' } }
    pub fn payoff(&self) -> OptionPayoff { match self { OptionRight::Call => OptionPayoff::Call, OptionRight::Put => OptionPayoff::Put } }
}

/// Instrument yang diperdagangkan: ETF underlying atau satu seri opsi.
/// Ditulis/dibaca sebagai ticker venue (`RTM`, `RTM1C50`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Instrument {
    Underlying,
    Option { right: OptionRight, strike: u32 },
}

impl Instrument {
    pub fn call(strike: u32) -> Self { Instrument::Option { right: OptionRight::Call, strike } }
    pub fn put(strike: u32) -> Self { Instrument::Option { right: OptionRight::Put, strike } }
    pub fn is_option(&self) -> bool { matches!(self, Instrument::Option { .. }) }
    pub fn class(&self) -> InstrumentClass {
        if self.is_option() { InstrumentClass::Option } else { InstrumentClass::Etf }
    }
    /// Kedua leg straddle pada strike yang sama: (call, put)
    pub fn straddle_legs(strike: u32) -> [Instrument; 2] { [Instrument::call(strike), Instrument::put(strike)] }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::Underlying => write!(f, "{UNDERLYING_TICKER}"),
            Instrument::Option { right, strike } => write!(f, "{}{}{:02}", OPTION_PREFIX, right.code(), strike),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown ticker: {0}")]
pub struct UnknownTicker(pub String);

impl FromStr for Instrument {
    type Err = UnknownTicker;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t == UNDERLYING_TICKER {
            return Ok(Instrument::Underlying);
        }
        let rest = t.strip_prefix(OPTION_PREFIX).ok_or_else(|| UnknownTicker(t.to_string()))?;
        let mut chars = rest.chars();
        let right = match chars.next() {
            Some('C') => OptionRight::Call,
            Some('P') => OptionRight::Put,
            _ => return Err(UnknownTicker(t.to_string())),
        };
        let strike = chars.as_str().parse::<u32>().map_err(|_| UnknownTicker(t.to_string()))?;
        Ok(Instrument::Option { right, strike })
    }
}

impl From<Instrument> for String {
    fn from(i: Instrument) -> String { i.to_string() }
}
impl TryFrom<String> for Instrument {
    type Error = UnknownTicker;
    fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentClass { Option, Etf }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction { Open, Close, Hedge, Reconcile }

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote { pub instrument: Instrument, pub bid: f64, pub ask: f64 }
impl Quote {
    pub fn mid(&self) -> f64 { (self.bid + self.ask) / 2.0 }
}

// ---- Payload venue (RIT REST) ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaseStatus {
    Active,
    Paused,
    Transacted,
    Stopped,
    Ended,
    Finished,
    #[serde(other)]
    Other,
}
impl CaseStatus {
    pub fn is_terminal(&self) -> bool { matches!(self, CaseStatus::Stopped | CaseStatus::Ended | CaseStatus::Finished) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseInfo { pub tick: u32, pub status: CaseStatus }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub news_id: u64,
    #[serde(default)]
    pub tick: u32,
    #[serde(default)]
    pub headline: String,
    pub body: String,
}

/// Snapshot satu security dari `/securities`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub ticker: String,
    #[serde(default)]
    pub bid: f64,
    #[serde(default)]
    pub ask: f64,
    #[serde(default)]
    pub vwap: Option<f64>,
    #[serde(default)]
    pub position: f64,
}
impl Security {
    pub fn mid(&self) -> f64 { (self.bid + self.ask) / 2.0 }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel { pub price: f64, #[serde(default)] pub quantity: f64 }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook { #[serde(default)] pub bids: Vec<BookLevel>, #[serde(default)] pub asks: Vec<BookLevel> }
impl OrderBook {
    pub fn mid(&self) -> Option<f64> {
        let bid = self.bids.first()?.price;
        let ask = self.asks.first()?.price;
        Some((bid + ask) / 2.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticker: Instrument,
    pub order_type: OrderType,
    pub quantity: i64,
    pub action: Side,
    pub price: Option<f64>,
}
impl OrderRequest {
    pub fn market(ticker: Instrument, quantity: i64, action: Side) -> Self {
        Self { ticker, order_type: OrderType::Market, quantity, action, price: None }
    }
}

/// Konfirmasi order dari venue (response `POST /orders`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    #[serde(default)]
    pub order_id: u64,
    pub ticker: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: f64,
    pub action: Side,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub quantity_filled: f64,
    #[serde(default)]
    pub vwap: Option<f64>,
    #[serde(default)]
    pub status: String,
}

// ---- Event untuk recorder JSONL ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickEvent { pub tick: u32, pub spot: f64, pub atm_strike: u32, pub atm_iv: Option<f64>, pub rv: f64 }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent { pub tick: u32, pub rule: String, pub signal: String, pub strike: u32, pub iv: f64, pub rv: f64, pub gap: f64 }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event { Tick(TickEvent), Sig(SignalEvent), Fill(crate::positions::TransactionLogEntry), Note(String) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_roundtrip_follows_venue_convention() {
        assert_eq!(Instrument::call(50).to_string(), "RTM1C50");
        assert_eq!(Instrument::put(5).to_string(), "RTM1P05");
        assert_eq!("RTM".parse::<Instrument>().unwrap(), Instrument::Underlying);
        assert_eq!("RTM1P48".parse::<Instrument>().unwrap(), Instrument::put(48));
        assert!("RTM1X48".parse::<Instrument>().is_err());
        assert!("SPY".parse::<Instrument>().is_err());
    }

    #[test]
    fn side_and_order_type_parse_strictly() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Buy);
        assert!(matches!("HOLD".parse::<Side>(), Err(OrderError::UnknownAction(_))));
        assert_eq!("LIMIT".parse::<OrderType>().unwrap(), OrderType::Limit);
        assert!(matches!("STOP".parse::<OrderType>(), Err(OrderError::UnknownOrderType(_))));
    }

    #[test]
    fn case_status_decodes_unknown_values() {
        let c: CaseInfo = serde_json::from_str(r#"{"tick":12,"status":"ACTIVE","name":"x"}"#).unwrap();
        assert_eq!(c.status, CaseStatus::Active);
        let c: CaseInfo = serde_json::from_str(r#"{"tick":0,"status":"WARMUP"}"#).unwrap();
        assert_eq!(c.status, CaseStatus::Other);
        assert!(CaseStatus::Ended.is_terminal());
        assert!(!CaseStatus::Transacted.is_terminal());
    }

    #[test]
    fn order_ack_decodes_rit_payload() {
        let raw = r#"{"order_id":7,"period":1,"tick":3,"trader_id":"t","ticker":"RTM1C50","type":"MARKET",
            "quantity":100.0,"action":"SELL","price":null,"quantity_filled":100.0,"vwap":1.25,"status":"TRANSACTED"}"#;
        let ack: OrderAck = serde_json::from_str(raw).unwrap();
        assert_eq!(ack.action, Side::Sell);
        assert_eq!(ack.vwap, Some(1.25));
        assert_eq!(ack.quantity_filled, 100.0);
    }
}
