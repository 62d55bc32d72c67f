// ===============================
// src/gateway_rit.rs
// ===============================
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use url::Url;

use crate::config::Connection;
use crate::domain::{CaseInfo, Instrument, NewsItem, OrderAck, OrderBook, OrderRequest, OrderType, Security};
use crate::gateway::{Venue, VenueError};

/// Gateway RIT REST (Rotman Interactive Trader).
/// Semua request membawa header `X-API-Key`; parameter dikirim sebagai query string.
pub struct RitClient {
    http: Client,
    base: String,
    timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraderInfo {
    pub trader_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub nlv: f64,
}

/// Satu baris dari `/limits` (gross/net exposure vs batas case)
#[derive(Debug, Clone, Deserialize)]
pub struct LimitInfo {
    pub name: String,
    #[serde(default)]
    pub gross: f64,
    #[serde(default)]
    pub net: f64,
    #[serde(default)]
    pub gross_limit: f64,
    #[serde(default)]
    pub net_limit: f64,
    #[serde(default)]
    pub gross_fine: f64,
    #[serde(default)]
    pub net_fine: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatusFilter {
    Open,
    Transacted,
    Cancelled,
}

impl OrderStatusFilter {
    fn as_str(&self) -> &'static str {
        match self {
            OrderStatusFilter::Open => "OPEN",
            OrderStatusFilter::Transacted => "TRANSACTED",
            OrderStatusFilter::Cancelled => "CANCELLED",
        }
    }
}

/// Scope bulk cancel. RIT menerima tepat satu dari parameter ini per request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelScope {
    All,
    Ticker(Instrument),
    Ids(Vec<u64>),
    /// ekspresi filter RIT, mis. `Volume > 0`
    Query(String),
}

impl CancelScope {
    fn param(&self) -> (&'static str, String) {
        match self {
            CancelScope::All => ("all", "1".to_string()),
            CancelScope::Ticker(t) => ("ticker", t.to_string()),
            CancelScope::Ids(ids) => (
                "ids",
                ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(","),
            ),
            CancelScope::Query(q) => ("query", q.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelResult {
    #[serde(default)]
    pub cancelled_order_ids: Vec<u64>,
}

pub(crate) fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub(crate) fn order_params(req: &OrderRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("ticker", req.ticker.to_string()),
        ("type", req.order_type.as_str().to_string()),
        ("quantity", req.quantity.to_string()),
        ("action", req.action.as_str().to_string()),
    ];
    if let (OrderType::Limit, Some(px)) = (req.order_type, req.price) {
        params.push(("price", format!("{px}")));
    }
    params
}

impl RitClient {
    pub fn new(conn: &Connection) -> Result<Self, VenueError> {
        let base = conn.base_url();
        Url::parse(&base).map_err(|e| VenueError::Transport(format!("bad base url {base}: {e}")))?;

        let mut headers = header::HeaderMap::new();
        let key = header::HeaderValue::from_str(&conn.api_key)
            .map_err(|e| VenueError::Transport(format!("bad api key header: {e}")))?;
        headers.insert("X-API-Key", key);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(conn.timeout())
            .build()
            .map_err(|e| VenueError::Transport(e.to_string()))?;

        Ok(Self { http, base: base.trim_end_matches('/').to_string(), timeout: conn.timeout() })
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> String {
        if params.is_empty() {
            format!("{}{}", self.base, path)
        } else {
            format!("{}{}?{}", self.base, path, build_query(params))
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, VenueError> {
        let url = self.url(path, params);
        let rsp = self.http.request(method.clone(), &url).send().await.map_err(|e| {
            if e.is_timeout() {
                VenueError::Timeout(self.timeout)
            } else {
                VenueError::Transport(e.to_string())
            }
        })?;

        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            tracing::warn!(%method, %url, %status, %body, "rit request failed");
            return Err(http_error(status, body));
        }
        rsp.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                VenueError::Timeout(self.timeout)
            } else {
                VenueError::Decode(e.to_string())
            }
        })
    }

    pub async fn get_trader(&self) -> Result<TraderInfo, VenueError> {
        self.request(Method::GET, "/trader", &[]).await
    }

    pub async fn get_limits(&self) -> Result<Vec<LimitInfo>, VenueError> {
        self.request(Method::GET, "/limits", &[]).await
    }

    pub async fn get_orders(&self, status: OrderStatusFilter) -> Result<Vec<OrderAck>, VenueError> {
        self.request(Method::GET, "/orders", &[("status", status.as_str().to_string())]).await
    }

    pub async fn delete_order(&self, order_id: u64) -> Result<(), VenueError> {
        let _: serde_json::Value = self.request(Method::DELETE, &format!("/orders/{order_id}"), &[]).await?;
        Ok(())
    }

    pub async fn cancel(&self, scope: &CancelScope) -> Result<CancelResult, VenueError> {
        let (k, v) = scope.param();
        self.request(Method::POST, "/commands/cancel", &[(k, v)]).await
    }
}

fn http_error(status: StatusCode, body: String) -> VenueError {
    VenueError::Http { status: status.as_u16(), body }
}

#[async_trait]
impl Venue for RitClient {
    async fn get_case(&self) -> Result<CaseInfo, VenueError> {
        self.request(Method::GET, "/case", &[]).await
    }

    async fn get_news(&self, since: Option<u64>, limit: Option<u32>) -> Result<Vec<NewsItem>, VenueError> {
        let mut params = Vec::new();
        if let Some(s) = since {
            params.push(("since", s.to_string()));
        }
        if let Some(l) = limit {
            params.push(("limit", l.to_string()));
        }
        self.request(Method::GET, "/news", &params).await
    }

    async fn get_securities(&self, ticker: Instrument) -> Result<Vec<Security>, VenueError> {
        self.request(Method::GET, "/securities", &[("ticker", ticker.to_string())]).await
    }

    async fn get_securities_book(&self, ticker: Instrument, limit: u32) -> Result<OrderBook, VenueError> {
        self.request(
            Method::GET,
            "/securities/book",
            &[("ticker", ticker.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    async fn post_order(&self, req: &OrderRequest) -> Result<OrderAck, VenueError> {
        let ack: OrderAck = self.request(Method::POST, "/orders", &order_params(req)).await?;
        tracing::debug!(order_id = ack.order_id, ticker = %ack.ticker, filled = ack.quantity_filled, "order ack");
        Ok(ack)
    }
}
