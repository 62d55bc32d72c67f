// ===============================
// src/news.rs (parameter case dari news RIT)
// ===============================
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::domain::NewsItem;

#[derive(Debug, Error, PartialEq)]
pub enum NewsError {
    #[error("news item {0} not published")]
    MissingItem(u64),
    #[error("news item {0} does not match the expected text")]
    NoMatch(u64),
}

/// news_id yang membawa rfr + rv awal
pub const INITIAL_NEWS_ID: u64 = 1;
/// news_id yang membawa delta limit + penalty
pub const LIMITS_NEWS_ID: u64 = 2;

static INITIAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"risk free rate is (\d+(?:\.\d+)?)%.*?realized volatility is (\d+(?:\.\d+)?)%").unwrap()
});
static DELTA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)delta limit.*?(\d+).*?penalty percentage is (\d+)%").unwrap());
static PCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)%").unwrap());

/// Parameter pasar yang dipakai strategi; dimiliki control loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParameters {
    pub rfr: f64,
    pub rv: f64,
    pub delta_limit: Option<u32>,
    pub penalty_pct: Option<f64>,
}

impl StrategyParameters {
    pub fn fallback(rfr: f64, rv: f64) -> Self {
        Self { rfr, rv, delta_limit: None, penalty_pct: None }
    }

    pub fn apply(&mut self, update: ParamUpdate) {
        match update {
            ParamUpdate::Initial { rfr, rv } => {
                self.rfr = rfr;
                self.rv = rv;
            }
            ParamUpdate::Limits { delta_limit, penalty_pct } => {
                self.delta_limit = Some(delta_limit);
                self.penalty_pct = Some(penalty_pct);
            }
            ParamUpdate::RealizedVol(rv) => self.rv = rv,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamUpdate {
    Initial { rfr: f64, rv: f64 },
    Limits { delta_limit: u32, penalty_pct: f64 },
    RealizedVol(f64),
}

fn pct(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(0.0) / 100.0
}

fn find(news: &[NewsItem], id: u64) -> Result<&NewsItem, NewsError> {
    news.iter().find(|n| n.news_id == id).ok_or(NewsError::MissingItem(id))
}

pub fn parse_initial(news: &[NewsItem]) -> Result<ParamUpdate, NewsError> {
    let item = find(news, INITIAL_NEWS_ID)?;
    let caps = INITIAL_RE.captures(&item.body).ok_or(NewsError::NoMatch(item.news_id))?;
    Ok(ParamUpdate::Initial { rfr: pct(&caps[1]), rv: pct(&caps[2]) })
}

pub fn parse_limits(news: &[NewsItem]) -> Result<ParamUpdate, NewsError> {
    let item = find(news, LIMITS_NEWS_ID)?;
    let caps = DELTA_RE.captures(&item.body).ok_or(NewsError::NoMatch(item.news_id))?;
    let delta_limit = caps[1].parse::<u32>().map_err(|_| NewsError::NoMatch(item.news_id))?;
    let penalty_pct = caps[2].parse::<f64>().map_err(|_| NewsError::NoMatch(item.news_id))?;
    Ok(ParamUpdate::Limits { delta_limit, penalty_pct })
}

/// Update rv di checkpoint ke-k (0-based) ada di news_id `2k + 3`.
pub fn rv_news_id(tick: u32, checkpoints: &[u32]) -> Option<u64> {
    checkpoints.iter().position(|t| *t == tick).map(|k| 2 * k as u64 + 3)
}

pub fn parse_rv_update(news: &[NewsItem], news_id: u64) -> Result<ParamUpdate, NewsError> {
    let item = find(news, news_id)?;
    let caps = PCT_RE.captures(&item.body).ok_or(NewsError::NoMatch(news_id))?;
    Ok(ParamUpdate::RealizedVol(pct(&caps[1])))
}
