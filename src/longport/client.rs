// =============================================================================
// Longport OpenAPI Client — HMAC-SHA256 signed REST + push WebSocket
// =============================================================================
//
// SECURITY: the app secret and access token are never logged or serialised.
// Every REST request carries the app key and access token as headers plus an
// HMAC-SHA256 signature over `method|path|query|timestamp`.
//
// All calls pass through the shared `Throttle` (≥ 30 ms gap) before leaving
// the process.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::types::{Kline, OrderSide, OrderStatus, OrderType};

use super::throttle::Throttle;
use super::types::{
    AccountBalance, CandlePeriod, ExpiryFilter, OrderChangedEvent, PushEvent, QuoteSnapshot,
    RawOrder, ReplaceOrderOptions, StaticInfo, StockPosition, SubmitOrderOptions,
    SubmitOrderResponse, TradingDays, WarrantInfo, WarrantStatus, WarrantType,
};
use super::{QuoteTransport, TradeTransport};

type HmacSha256 = Hmac<Sha256>;

/// History-order pagination size.
const HISTORY_PAGE_SIZE: usize = 100;

/// Longport OpenAPI client.
pub struct LongportClient {
    creds: Credentials,
    base_url: String,
    ws_url: String,
    http: reqwest::Client,
    throttle: Arc<Throttle>,
    subscribed: RwLock<HashSet<String>>,
}

impl LongportClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a client from environment credentials. The endpoint is chosen
    /// by `LONGPORT_REGION` (`hk` default).
    pub fn new(creds: Credentials, throttle: Arc<Throttle>) -> Self {
        let (base_url, ws_url) = match creds.region.as_str() {
            "cn" => (
                "https://openapi.longportapp.cn".to_string(),
                "wss://openapi-push.longportapp.cn/v1".to_string(),
            ),
            _ => (
                "https://openapi.longportapp.com".to_string(),
                "wss://openapi-push.longportapp.com/v1".to_string(),
            ),
        };

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!(base_url = %base_url, region = %creds.region, "LongportClient initialised");

        Self {
            creds,
            base_url,
            ws_url,
            http,
            throttle,
            subscribed: RwLock::new(HashSet::new()),
        }
    }

    /// Push endpoint for the WebSocket loop.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Access token used to authenticate the push connection.
    pub fn access_token(&self) -> &str {
        &self.creds.access_token
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// HMAC-SHA256 hex signature over the canonical request string.
    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.creds.app_secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Issue a signed GET and parse the `data` envelope.
    async fn get(&self, path: &str, query: &str) -> Result<serde_json::Value> {
        self.request(reqwest::Method::GET, path, query, None).await
    }

    /// Issue a signed POST with a JSON body and parse the `data` envelope.
    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        self.request(reqwest::Method::POST, path, "", Some(body)).await
    }

    async fn delete(&self, path: &str, query: &str) -> Result<serde_json::Value> {
        self.request(reqwest::Method::DELETE, path, query, None).await
    }

    async fn put(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        self.request(reqwest::Method::PUT, path, "", Some(body)).await
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.throttle.acquire().await;

        let ts = Self::timestamp_ms();
        let canonical = format!("{}|{}|{}|{}", method.as_str(), path, query, ts);
        let signature = self.sign(&canonical);

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("X-Api-Key", &self.creds.app_key)
            .header("Authorization", &self.creds.access_token)
            .header("X-Timestamp", ts.to_string())
            .header("X-Api-Signature", signature);

        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("{} {} request failed", method, path))?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("Longport {} {} returned {}: {}", method, path, status, payload);
        }

        // Longport wraps results in { code, message, data }.
        let code = payload.get("code").and_then(|v| v.as_i64()).unwrap_or(0);
        if code != 0 {
            anyhow::bail!("Longport {} {} error code {}: {}", method, path, code, payload);
        }

        Ok(payload.get("data").cloned().unwrap_or(payload))
    }

    // -------------------------------------------------------------------------
    // Parsing helpers
    // -------------------------------------------------------------------------

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn parse_f64(val: &serde_json::Value) -> f64 {
        if let Some(s) = val.as_str() {
            s.parse().unwrap_or(0.0)
        } else {
            val.as_f64().unwrap_or(0.0)
        }
    }

    fn parse_u64(val: &serde_json::Value) -> u64 {
        if let Some(s) = val.as_str() {
            s.parse().unwrap_or(0)
        } else {
            val.as_u64().unwrap_or(0)
        }
    }

    fn parse_i64(val: &serde_json::Value) -> i64 {
        if let Some(s) = val.as_str() {
            s.parse().unwrap_or(0)
        } else {
            val.as_i64().unwrap_or(0)
        }
    }

    fn parse_side(val: &serde_json::Value) -> OrderSide {
        match val.as_str().unwrap_or("") {
            "Sell" | "SELL" => OrderSide::Sell,
            _ => OrderSide::Buy,
        }
    }

    fn parse_status(val: &serde_json::Value) -> OrderStatus {
        match val.as_str().unwrap_or("") {
            "FilledStatus" | "Filled" => OrderStatus::Filled,
            "PartialFilledStatus" | "PartialFilled" => OrderStatus::PartialFilled,
            "CanceledStatus" | "Canceled" => OrderStatus::Canceled,
            "RejectedStatus" | "Rejected" => OrderStatus::Rejected,
            "WaitToNew" => OrderStatus::WaitToNew,
            "WaitToReplace" => OrderStatus::WaitToReplace,
            "PendingReplaceStatus" | "PendingReplace" => OrderStatus::PendingReplace,
            _ => OrderStatus::New,
        }
    }

    fn parse_order_type(val: &serde_json::Value) -> OrderType {
        match val.as_str().unwrap_or("") {
            "MO" => OrderType::Mo,
            "ELO" => OrderType::Elo,
            "ALO" => OrderType::Alo,
            "SLO" => OrderType::Slo,
            _ => OrderType::Lo,
        }
    }

    fn parse_raw_order(v: &serde_json::Value) -> RawOrder {
        RawOrder {
            order_id: v["order_id"].as_str().unwrap_or_default().to_string(),
            symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
            stock_name: v["stock_name"].as_str().unwrap_or_default().to_string(),
            side: Self::parse_side(&v["side"]),
            status: Self::parse_status(&v["status"]),
            order_type: Self::parse_order_type(&v["order_type"]),
            price: Self::parse_f64(&v["price"]),
            quantity: Self::parse_u64(&v["quantity"]),
            executed_qty: Self::parse_u64(&v["executed_quantity"]),
            executed_price: Self::parse_f64(&v["executed_price"]),
            submitted_at_ms: Self::parse_i64(&v["submitted_at"]) * 1000,
            updated_at_ms: Self::parse_i64(&v["updated_at"]) * 1000,
        }
    }
}

// =============================================================================
// QuoteTransport
// =============================================================================

#[async_trait]
impl QuoteTransport for LongportClient {
    async fn quote(&self, symbols: &[String]) -> Result<Vec<QuoteSnapshot>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!("symbol={}", symbols.join(","));
        let data = self.get("/v1/quote", &query).await?;

        let rows = data
            .get("secu_quote")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let quotes = rows
            .iter()
            .map(|v| QuoteSnapshot {
                symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
                last_done: Self::parse_f64(&v["last_done"]),
                open: Self::parse_f64(&v["open"]),
                high: Self::parse_f64(&v["high"]),
                low: Self::parse_f64(&v["low"]),
                volume: Self::parse_f64(&v["volume"]),
                turnover: Self::parse_f64(&v["turnover"]),
                ts_ms: Self::parse_i64(&v["timestamp"]) * 1000,
            })
            .collect::<Vec<_>>();

        debug!(requested = symbols.len(), received = quotes.len(), "quotes fetched");
        Ok(quotes)
    }

    async fn static_info(&self, symbols: &[String]) -> Result<Vec<StaticInfo>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!("symbol={}", symbols.join(","));
        let data = self.get("/v1/quote/static", &query).await?;

        let rows = data
            .get("secu_static_info")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(rows
            .iter()
            .map(|v| StaticInfo {
                symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
                name_cn: v["name_cn"].as_str().unwrap_or_default().to_string(),
                name_en: v["name_en"].as_str().unwrap_or_default().to_string(),
                lot_size: Self::parse_u64(&v["lot_size"]) as u32,
            })
            .collect())
    }

    async fn realtime_candlesticks(
        &self,
        symbol: &str,
        period: CandlePeriod,
        count: usize,
    ) -> Result<Vec<Kline>> {
        let query = format!(
            "symbol={}&period={}&count={}&adjust_type=0",
            symbol,
            period.as_str(),
            count
        );
        let data = self.get("/v1/quote/candlestick", &query).await?;

        let rows = data
            .get("candlesticks")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let bars = rows
            .iter()
            .map(|v| Kline {
                ts_ms: Self::parse_i64(&v["timestamp"]) * 1000,
                open: Self::parse_f64(&v["open"]),
                high: Self::parse_f64(&v["high"]),
                low: Self::parse_f64(&v["low"]),
                close: Self::parse_f64(&v["close"]),
                volume: Self::parse_f64(&v["volume"]),
                turnover: Self::parse_f64(&v["turnover"]),
            })
            .collect::<Vec<_>>();

        debug!(symbol, period = period.as_str(), count = bars.len(), "candlesticks fetched");
        Ok(bars)
    }

    async fn trading_days(&self, market: &str, begin: &str, end: &str) -> Result<TradingDays> {
        let query = format!("market={market}&beg_day={begin}&end_day={end}");
        let data = self.get("/v1/quote/trade_day", &query).await?;

        let collect = |key: &str| -> Vec<String> {
            data.get(key)
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(TradingDays {
            trading_days: collect("trade_day"),
            half_trading_days: collect("half_trade_day"),
        })
    }

    async fn warrant_list(
        &self,
        symbol: &str,
        warrant_type: WarrantType,
        expiry: &[ExpiryFilter],
    ) -> Result<Vec<WarrantInfo>> {
        let type_code = match warrant_type {
            WarrantType::Bull => 3,
            WarrantType::Bear => 4,
        };
        let expiry_codes: Vec<String> = expiry
            .iter()
            .map(|f| {
                match f {
                    ExpiryFilter::Between3And6Months => "2",
                    ExpiryFilter::Between6And12Months => "3",
                    ExpiryFilter::GreaterThan12Months => "4",
                }
                .to_string()
            })
            .collect();

        let query = format!(
            "symbol={}&warrant_type={}&expiry_date={}&sort_by=0&sort_order=1",
            symbol,
            type_code,
            expiry_codes.join(",")
        );
        let data = self.get("/v1/quote/warrant/list", &query).await?;

        let rows = data
            .get("warrant_list")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let warrants = rows
            .iter()
            .map(|v| {
                let status = match v["status"].as_i64().unwrap_or(2) {
                    2 => WarrantStatus::Normal,
                    1 => WarrantStatus::PrepareList,
                    3 => WarrantStatus::Suspend,
                    _ => WarrantStatus::Delisted,
                };
                WarrantInfo {
                    symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
                    name: v["name"].as_str().unwrap_or_default().to_string(),
                    warrant_type,
                    status,
                    call_price: Self::parse_f64(&v["call_price"]),
                    to_call_price: Self::parse_f64(&v["to_call_price"]),
                    expiry_date: v["expiry_date"].as_str().unwrap_or_default().to_string(),
                    turnover: Self::parse_f64(&v["turnover"]),
                    last_done: Self::parse_f64(&v["last_done"]),
                }
            })
            .collect::<Vec<_>>();

        debug!(symbol, warrant_type = %warrant_type, count = warrants.len(), "warrant list fetched");
        Ok(warrants)
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        if symbols.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({
            "symbol": symbols,
            "sub_type": [1],
            "is_first_push": true,
        });
        self.post("/v1/quote/subscribe", body).await?;

        let mut subs = self.subscribed.write();
        for s in symbols {
            subs.insert(s.clone());
        }
        info!(count = symbols.len(), "quote subscription added");
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        if symbols.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({
            "symbol": symbols,
            "sub_type": [1],
        });
        self.post("/v1/quote/unsubscribe", body).await?;

        let mut subs = self.subscribed.write();
        for s in symbols {
            subs.remove(s);
        }
        info!(count = symbols.len(), "quote subscription removed");
        Ok(())
    }
}

// =============================================================================
// TradeTransport
// =============================================================================

#[async_trait]
impl TradeTransport for LongportClient {
    async fn submit_order(&self, opts: SubmitOrderOptions) -> Result<SubmitOrderResponse> {
        let side = match opts.side {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        };
        let mut body = serde_json::json!({
            "symbol": opts.symbol,
            "side": side,
            "order_type": opts.order_type.to_string(),
            "submitted_quantity": opts.submitted_qty.to_string(),
            "time_in_force": "Day",
        });
        if let Some(price) = opts.submitted_price {
            body["submitted_price"] = serde_json::json!(format!("{price:.3}"));
        }
        if let Some(remark) = &opts.remark {
            body["remark"] = serde_json::json!(remark);
        }

        debug!(
            symbol = %opts.symbol,
            side = %opts.side,
            order_type = %opts.order_type,
            qty = opts.submitted_qty,
            "submitting order"
        );

        let data = self.post("/v1/trade/order", body).await?;
        let order_id = data["order_id"]
            .as_str()
            .context("submit response missing order_id")?
            .to_string();

        info!(symbol = %opts.symbol, side = %opts.side, order_id = %order_id, "order submitted");
        Ok(SubmitOrderResponse { order_id })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let query = format!("order_id={order_id}");
        debug!(order_id, "cancelling order");
        self.delete("/v1/trade/order", &query).await?;
        debug!(order_id, "order cancelled");
        Ok(())
    }

    async fn replace_order(&self, opts: ReplaceOrderOptions) -> Result<()> {
        let body = serde_json::json!({
            "order_id": opts.order_id,
            "quantity": opts.quantity.to_string(),
            "price": format!("{:.3}", opts.price),
        });
        debug!(order_id = %opts.order_id, qty = opts.quantity, price = opts.price, "replacing order");
        self.put("/v1/trade/order", body).await?;
        Ok(())
    }

    async fn today_orders(&self) -> Result<Vec<RawOrder>> {
        let data = self.get("/v1/trade/order/today", "").await?;
        let rows = data
            .get("orders")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(rows.iter().map(Self::parse_raw_order).collect())
    }

    async fn history_orders(&self, start_at_ms: i64) -> Result<Vec<RawOrder>> {
        let mut all = Vec::new();
        let mut start_at = start_at_ms / 1000;

        // Page forward until the broker returns a short page.
        loop {
            let query = format!("start_at={start_at}&limit={HISTORY_PAGE_SIZE}");
            let data = self.get("/v1/trade/order/history", &query).await?;
            let rows = data
                .get("orders")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            let page: Vec<RawOrder> = rows.iter().map(Self::parse_raw_order).collect();
            let page_len = page.len();
            if let Some(last) = page.last() {
                start_at = last.submitted_at_ms / 1000 + 1;
            }
            all.extend(page);

            if page_len < HISTORY_PAGE_SIZE {
                break;
            }
        }

        debug!(count = all.len(), "history orders fetched");
        Ok(all)
    }

    async fn account_balance(&self) -> Result<AccountBalance> {
        let data = self.get("/v1/asset/account", "currency=HKD").await?;
        let row = data
            .get("list")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .cloned()
            .context("account response missing list")?;

        Ok(AccountBalance {
            currency: row["currency"].as_str().unwrap_or("HKD").to_string(),
            total_cash: Self::parse_f64(&row["total_cash"]),
            net_assets: Self::parse_f64(&row["net_assets"]),
            buy_power: Self::parse_f64(&row["buy_power"]),
        })
    }

    async fn stock_positions(&self) -> Result<Vec<StockPosition>> {
        let data = self.get("/v1/asset/stock", "").await?;
        let channels = data
            .get("list")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut positions = Vec::new();
        for channel in &channels {
            if let Some(rows) = channel.get("stock_info").and_then(|v| v.as_array()) {
                for v in rows {
                    let qty = Self::parse_u64(&v["quantity"]);
                    if qty == 0 {
                        continue;
                    }
                    positions.push(StockPosition {
                        symbol: v["symbol"].as_str().unwrap_or_default().to_string(),
                        symbol_name: v["symbol_name"].as_str().unwrap_or_default().to_string(),
                        quantity: qty,
                        cost_price: Self::parse_f64(&v["cost_price"]),
                    });
                }
            }
        }
        Ok(positions)
    }
}

// =============================================================================
// Push WebSocket
// =============================================================================

/// Connect to the push WebSocket, authenticate, and forward parsed events to
/// `tx`. Returns when the stream ends or errors so the caller can reconnect.
pub async fn run_push_loop(
    client: Arc<LongportClient>,
    tx: UnboundedSender<PushEvent>,
) -> Result<()> {
    let url = format!("{}?token={}", client.ws_url(), client.access_token());
    info!("connecting to push WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to push WebSocket")?;

    info!("push WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_push_message(&text) {
                        Ok(Some(event)) => {
                            if tx.send(event).is_err() {
                                warn!("push consumer dropped — stopping push loop");
                                return Ok(());
                            }
                        }
                        Ok(None) => {} // heartbeat / unknown topic
                        Err(e) => warn!(error = %e, "failed to parse push message"),
                    }
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "push WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!("push WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse a push frame into a `PushEvent`. Unknown topics yield `Ok(None)`.
fn parse_push_message(text: &str) -> Result<Option<PushEvent>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse push JSON")?;

    match root.get("topic").and_then(|v| v.as_str()) {
        Some("quote") => {
            let d = &root["data"];
            Ok(Some(PushEvent::Quote(QuoteSnapshot {
                symbol: d["symbol"].as_str().unwrap_or_default().to_string(),
                last_done: LongportClient::parse_f64(&d["last_done"]),
                open: LongportClient::parse_f64(&d["open"]),
                high: LongportClient::parse_f64(&d["high"]),
                low: LongportClient::parse_f64(&d["low"]),
                volume: LongportClient::parse_f64(&d["volume"]),
                turnover: LongportClient::parse_f64(&d["turnover"]),
                ts_ms: LongportClient::parse_i64(&d["timestamp"]) * 1000,
            })))
        }
        Some("private") | Some("order_changed") => {
            let d = &root["data"];
            Ok(Some(PushEvent::OrderChanged(OrderChangedEvent {
                order_id: d["order_id"].as_str().unwrap_or_default().to_string(),
                symbol: d["symbol"].as_str().unwrap_or_default().to_string(),
                stock_name: d["stock_name"].as_str().unwrap_or_default().to_string(),
                side: LongportClient::parse_side(&d["side"]),
                status: LongportClient::parse_status(&d["status"]),
                order_type: LongportClient::parse_order_type(&d["order_type"]),
                submitted_qty: LongportClient::parse_u64(&d["submitted_quantity"]),
                submitted_price: LongportClient::parse_f64(&d["submitted_price"]),
                executed_qty: LongportClient::parse_u64(&d["executed_quantity"]),
                executed_price: LongportClient::parse_f64(&d["executed_price"]),
                updated_at_ms: LongportClient::parse_i64(&d["updated_at"]) * 1000,
            })))
        }
        _ => Ok(None),
    }
}

impl std::fmt::Debug for LongportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongportClient")
            .field("creds", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("subscribed", &self.subscribed.read().len())
            .finish()
    }
}
