//! Broker execution seam
//!
//! The engine only sees `BrokerExecutionAdapter`. Paper and live execution are
//! chosen once at startup.

mod live;
mod paper;

pub use live::{BrokerCredentials, LiveBroker};
pub use paper::PaperBroker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineResult;
use crate::types::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    StopLossLimit,
}

impl OrderType {
    /// Price type code used by the broker API
    pub fn code(&self) -> &'static str {
        match self {
            OrderType::Market => "MKT",
            OrderType::StopLossLimit => "SL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub order_type: OrderType,
    /// Limit price; 0 for market orders
    pub price: f64,
    /// Trigger price; 0 unless stop-loss
    pub trigger_price: f64,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
            price: 0.0,
            trigger_price: 0.0,
        }
    }

    pub fn stop_loss(symbol: &str, side: OrderSide, quantity: u32, trigger: f64, limit: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type: OrderType::StopLossLimit,
            price: limit,
            trigger_price: trigger,
        }
    }
}

impl fmt::Display for OrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} x{} {}",
            self.side,
            self.symbol,
            self.quantity,
            self.order_type.code()
        )?;
        if self.order_type == OrderType::StopLossLimit {
            write!(f, " trg {:.2} lmt {:.2}", self.trigger_price, self.price)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Pending,
    Complete,
    Cancelled,
}

impl OrderState {
    /// Map a broker status string to our coarse state
    pub fn from_broker(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "COMPLETE" | "FILLED" | "EXECUTED" | "FULLY_FILLED" | "TRADED" => OrderState::Complete,
            "CANCELLED" | "REJECTED" | "EXPIRED" | "CANCELLED_BY_USER" => OrderState::Cancelled,
            _ => OrderState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub state: OrderState,
}

/// Trait for order execution backends
#[async_trait]
pub trait BrokerExecutionAdapter: Send + Sync {
    /// Backend label for logs (PAPER / LIVE)
    fn name(&self) -> &'static str;

    async fn place_order(&self, request: &OrderRequest) -> EngineResult<OrderAck>;

    async fn modify_order(
        &self,
        order_id: &str,
        symbol: &str,
        new_price: f64,
        new_trigger: f64,
    ) -> EngineResult<()>;

    async fn cancel_order(&self, order_id: &str) -> EngineResult<()>;

    async fn order_book(&self) -> EngineResult<Vec<OrderStatus>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_status_mapping() {
        assert_eq!(OrderState::from_broker("complete"), OrderState::Complete);
        assert_eq!(OrderState::from_broker("REJECTED"), OrderState::Cancelled);
        assert_eq!(OrderState::from_broker("trigger pending"), OrderState::Pending);
        assert_eq!(OrderState::from_broker(""), OrderState::Pending);
    }

    #[test]
    fn request_display() {
        let sl = OrderRequest::stop_loss("NIFTY25DEC22000CE", OrderSide::Buy, 75, 110.0, 110.5);
        assert_eq!(
            sl.to_string(),
            "BUY NIFTY25DEC22000CE x75 SL trg 110.00 lmt 110.50"
        );
        let mkt = OrderRequest::market("NIFTY25DEC22000CE", OrderSide::Sell, 75);
        assert_eq!(mkt.to_string(), "SELL NIFTY25DEC22000CE x75 MKT");
    }
}
