//! Live REST broker adapter
//!
//! Orders go out as `application/x-www-form-urlencoded` with a single
//! `jData=<json>` field. A response is accepted only when `stat == "Ok"`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{BrokerExecutionAdapter, OrderAck, OrderRequest, OrderState, OrderStatus};
use crate::error::{EngineError, EngineResult};

const FIN_KEY: &str = "neotradeapi";

/// Session tokens obtained by an external login flow
#[derive(Debug, Clone)]
pub struct BrokerCredentials {
    pub access_token: String,
    pub session_token: String,
    pub sid: String,
}

impl BrokerCredentials {
    fn resolve_env(var: &str) -> Result<String> {
        let value = std::env::var(var).with_context(|| format!("{} not set", var))?;
        if value.trim().is_empty() {
            anyhow::bail!("{} is empty", var);
        }
        Ok(value)
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self {
            access_token: Self::resolve_env("OIW_BROKER_ACCESS_TOKEN")?,
            session_token: Self::resolve_env("OIW_BROKER_SESSION_TOKEN")?,
            sid: Self::resolve_env("OIW_BROKER_SID")?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default)]
    stat: String,
    #[serde(default, rename = "nOrdNo")]
    order_no: Option<Value>,
    #[serde(default)]
    emsg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderBookResponse {
    #[serde(default)]
    stat: String,
    #[serde(default)]
    data: Vec<OrderBookRow>,
    #[serde(default)]
    emsg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderBookRow {
    #[serde(rename = "nOrdNo")]
    order_no: Value,
    #[serde(default, rename = "ordSt")]
    status: String,
}

/// Numbers and strings both appear as order ids
fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn stat_ok(stat: &str) -> bool {
    stat.eq_ignore_ascii_case("ok")
}

pub struct LiveBroker {
    client: Client,
    base_url: String,
    product: String,
    segment: String,
    timeout: Duration,
    /// Requests we placed, needed to fill modify payloads
    placed: RwLock<HashMap<String, OrderRequest>>,
}

impl LiveBroker {
    pub fn new(
        base_url: &str,
        product: &str,
        segment: &str,
        timeout: Duration,
        credentials: BrokerCredentials,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            "authorization",
            HeaderValue::from_str(&credentials.access_token)
                .context("Invalid Authorization header value")?,
        );
        headers.insert(
            "auth",
            HeaderValue::from_str(&credentials.session_token).context("Invalid Auth header value")?,
        );
        headers.insert(
            "sid",
            HeaderValue::from_str(&credentials.sid).context("Invalid Sid header value")?,
        );
        headers.insert("neo-fin-key", HeaderValue::from_static(FIN_KEY));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            product: product.to_string(),
            segment: segment.to_string(),
            timeout,
            placed: RwLock::new(HashMap::new()),
        })
    }

    fn place_payload(&self, request: &OrderRequest) -> Value {
        json!({
            "am": "NO",
            "dq": "0",
            "es": self.segment,
            "mp": "0",
            "pc": self.product,
            "pf": "N",
            "pr": format!("{:.2}", request.price),
            "pt": request.order_type.code(),
            "qt": request.quantity.to_string(),
            "rt": "DAY",
            "tp": format!("{:.2}", request.trigger_price),
            "ts": request.symbol,
            "tt": request.side.code(),
        })
    }

    fn modify_payload(
        &self,
        order_id: &str,
        symbol: &str,
        original: &OrderRequest,
        new_price: f64,
        new_trigger: f64,
    ) -> Value {
        json!({
            "tk": "",
            "mp": "0",
            "pc": self.product,
            "dd": "NA",
            "dq": "0",
            "vd": "DAY",
            "ts": symbol,
            "tt": original.side.code(),
            "pr": format!("{:.2}", new_price),
            "tp": format!("{:.2}", new_trigger),
            "qt": original.quantity.to_string(),
            "no": order_id,
            "es": self.segment,
            "pt": original.order_type.code(),
        })
    }

    fn transport_error(&self, operation: &'static str, e: reqwest::Error) -> EngineError {
        if e.is_timeout() {
            EngineError::NetworkTimeout {
                operation,
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            EngineError::OrderRejected(format!("{} failed: {}", operation, e))
        }
    }

    async fn post_jdata(
        &self,
        operation: &'static str,
        path: &str,
        payload: &Value,
    ) -> EngineResult<OrderResponse> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .form(&[("jData", payload.to_string())])
            .send()
            .await
            .map_err(|e| self.transport_error(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(EngineError::OrderRejected(format!(
                "{} HTTP {}: {}",
                operation, status, snippet
            )));
        }

        let parsed: OrderResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(operation, e))?;

        if !stat_ok(&parsed.stat) {
            return Err(EngineError::OrderRejected(
                parsed
                    .emsg
                    .unwrap_or_else(|| format!("{} returned stat={:?}", operation, parsed.stat)),
            ));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl BrokerExecutionAdapter for LiveBroker {
    fn name(&self) -> &'static str {
        "LIVE"
    }

    async fn place_order(&self, request: &OrderRequest) -> EngineResult<OrderAck> {
        let payload = self.place_payload(request);
        info!(order = %request, "[LIVE] Placing order");

        let response = self
            .post_jdata("place_order", "/quick/order/rule/ms/place", &payload)
            .await
            .map_err(|e| {
                error!(order = %request, error = %e, "[LIVE] Order failed");
                e
            })?;

        let order_id = response
            .order_no
            .as_ref()
            .map(id_string)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EngineError::OrderRejected("accepted without order number".into()))?;

        if let Ok(mut placed) = self.placed.write() {
            placed.insert(order_id.clone(), request.clone());
        }
        info!(order_id = %order_id, "[LIVE] Order accepted");
        Ok(OrderAck { order_id })
    }

    async fn modify_order(
        &self,
        order_id: &str,
        symbol: &str,
        new_price: f64,
        new_trigger: f64,
    ) -> EngineResult<()> {
        let original = self
            .placed
            .read()
            .ok()
            .and_then(|placed| placed.get(order_id).cloned())
            .ok_or_else(|| EngineError::OrderRejected(format!("unknown order {}", order_id)))?;

        let payload = self.modify_payload(order_id, symbol, &original, new_price, new_trigger);
        self.post_jdata("modify_order", "/quick/order/vr/modify", &payload)
            .await?;

        if let Ok(mut placed) = self.placed.write() {
            if let Some(order) = placed.get_mut(order_id) {
                order.price = new_price;
                order.trigger_price = new_trigger;
            }
        }
        info!(order_id, new_price, new_trigger, "[LIVE] Order modified");
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> EngineResult<()> {
        let payload = json!({ "am": "NO", "on": order_id });
        self.post_jdata("cancel_order", "/quick/order/cancel", &payload)
            .await?;
        info!(order_id, "[LIVE] Order cancelled");
        Ok(())
    }

    async fn order_book(&self) -> EngineResult<Vec<OrderStatus>> {
        let url = format!("{}/quick/user/orders", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error("order_book", e))?;

        if !response.status().is_success() {
            return Err(EngineError::OrderRejected(format!(
                "order_book HTTP {}",
                response.status()
            )));
        }

        let book: OrderBookResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error("order_book", e))?;

        if !stat_ok(&book.stat) {
            warn!(stat = %book.stat, emsg = ?book.emsg, "[LIVE] Order book refused");
            return Err(EngineError::OrderRejected(
                book.emsg.unwrap_or_else(|| "order book unavailable".into()),
            ));
        }

        Ok(book
            .data
            .iter()
            .map(|row| OrderStatus {
                order_id: id_string(&row.order_no),
                state: OrderState::from_broker(&row.status),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;

    fn broker() -> LiveBroker {
        LiveBroker::new(
            "https://broker.example/",
            "NRML",
            "nse_fo",
            Duration::from_secs(3),
            BrokerCredentials {
                access_token: "a".into(),
                session_token: "b".into(),
                sid: "c".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn place_payload_matches_wire_format() {
        let b = broker();
        assert_eq!(b.base_url, "https://broker.example");

        let sl = OrderRequest::stop_loss("NIFTY25DEC22000CE", OrderSide::Buy, 75, 110.0, 110.5);
        let p = b.place_payload(&sl);
        assert_eq!(p["pt"], "SL");
        assert_eq!(p["tt"], "B");
        assert_eq!(p["tp"], "110.00");
        assert_eq!(p["pr"], "110.50");
        assert_eq!(p["qt"], "75");
        assert_eq!(p["es"], "nse_fo");
        assert_eq!(p["pc"], "NRML");

        let entry = OrderRequest::market("NIFTY25DEC22000CE", OrderSide::Sell, 75);
        let p = b.place_payload(&entry);
        assert_eq!(p["pt"], "MKT");
        assert_eq!(p["tt"], "S");
        assert_eq!(p["tp"], "0.00");
    }

    #[test]
    fn modify_payload_keeps_original_side_and_quantity() {
        let b = broker();
        let sl = OrderRequest::stop_loss("S", OrderSide::Buy, 150, 110.0, 110.5);
        let p = b.modify_payload("2401", "S", &sl, 105.5, 105.0);
        assert_eq!(p["no"], "2401");
        assert_eq!(p["qt"], "150");
        assert_eq!(p["tp"], "105.00");
        assert_eq!(p["pr"], "105.50");
        assert_eq!(p["vd"], "DAY");
    }

    #[test]
    fn responses_parse_numeric_and_string_ids() {
        let ok: OrderResponse = serde_json::from_str(r#"{"stat":"Ok","nOrdNo":240105000123}"#).unwrap();
        assert!(stat_ok(&ok.stat));
        assert_eq!(id_string(ok.order_no.as_ref().unwrap()), "240105000123");

        let rejected: OrderResponse =
            serde_json::from_str(r#"{"stat":"Not_Ok","emsg":"RMS: margin"}"#).unwrap();
        assert!(!stat_ok(&rejected.stat));

        let book: OrderBookResponse = serde_json::from_str(
            r#"{"stat":"Ok","data":[{"nOrdNo":"11","ordSt":"complete"},{"nOrdNo":"12","ordSt":"trigger pending"}]}"#,
        )
        .unwrap();
        assert_eq!(id_string(&book.data[0].order_no), "11");
        assert_eq!(OrderState::from_broker(&book.data[1].status), OrderState::Pending);
    }
}
