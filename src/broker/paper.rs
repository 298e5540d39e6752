use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};

use super::{BrokerExecutionAdapter, OrderAck, OrderRequest, OrderState, OrderStatus, OrderType};
use crate::error::EngineResult;

#[derive(Debug, Clone)]
struct PaperOrder {
    request: OrderRequest,
    state: OrderState,
    /// Insertion order, for a stable order book listing
    seq: u64,
}

/// Simulated broker: every call succeeds instantly.
///
/// Market orders complete immediately; stop-loss orders stay pending until
/// cancelled.
#[derive(Default)]
pub struct PaperBroker {
    orders: RwLock<HashMap<String, PaperOrder>>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests seen so far, oldest first
    pub fn placed(&self) -> Vec<(String, OrderRequest)> {
        let Ok(orders) = self.orders.read() else {
            return Vec::new();
        };
        let mut all: Vec<_> = orders.iter().collect();
        all.sort_by_key(|(_, o)| o.seq);
        all.into_iter()
            .map(|(id, o)| (id.clone(), o.request.clone()))
            .collect()
    }
}

#[async_trait]
impl BrokerExecutionAdapter for PaperBroker {
    fn name(&self) -> &'static str {
        "PAPER"
    }

    async fn place_order(&self, request: &OrderRequest) -> EngineResult<OrderAck> {
        let order_id = format!("PAPER-{}", uuid::Uuid::new_v4());
        let state = match request.order_type {
            OrderType::Market => OrderState::Complete,
            OrderType::StopLossLimit => OrderState::Pending,
        };

        if let Ok(mut orders) = self.orders.write() {
            let seq = orders.len() as u64;
            orders.insert(
                order_id.clone(),
                PaperOrder {
                    request: request.clone(),
                    state,
                    seq,
                },
            );
        }

        info!(order_id = %order_id, order = %request, "[PAPER] Order placed");
        Ok(OrderAck { order_id })
    }

    async fn modify_order(
        &self,
        order_id: &str,
        _symbol: &str,
        new_price: f64,
        new_trigger: f64,
    ) -> EngineResult<()> {
        if let Ok(mut orders) = self.orders.write() {
            if let Some(order) = orders.get_mut(order_id) {
                order.request.price = new_price;
                order.request.trigger_price = new_trigger;
            }
        }
        info!(order_id, new_price, new_trigger, "[PAPER] Order modified");
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> EngineResult<()> {
        if let Ok(mut orders) = self.orders.write() {
            match orders.get_mut(order_id) {
                Some(order) if order.state == OrderState::Pending => {
                    order.state = OrderState::Cancelled;
                }
                Some(_) => debug!(order_id, "[PAPER] Cancel on closed order ignored"),
                None => debug!(order_id, "[PAPER] Cancel on unknown order ignored"),
            }
        }
        info!(order_id, "[PAPER] Order cancelled");
        Ok(())
    }

    async fn order_book(&self) -> EngineResult<Vec<OrderStatus>> {
        let Ok(orders) = self.orders.read() else {
            return Ok(Vec::new());
        };
        let mut book: Vec<_> = orders.iter().collect();
        book.sort_by_key(|(_, o)| o.seq);
        Ok(book
            .into_iter()
            .map(|(id, o)| OrderStatus {
                order_id: id.clone(),
                state: o.state,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;

    #[tokio::test]
    async fn paper_orders_get_prefixed_ids_and_book_entries() {
        let broker = PaperBroker::new();
        let entry = broker
            .place_order(&OrderRequest::market("X", OrderSide::Sell, 75))
            .await
            .unwrap();
        let sl = broker
            .place_order(&OrderRequest::stop_loss("X", OrderSide::Buy, 75, 110.0, 110.5))
            .await
            .unwrap();

        assert!(entry.order_id.starts_with("PAPER-"));
        assert_ne!(entry.order_id, sl.order_id);

        let book = broker.order_book().await.unwrap();
        assert_eq!(book.len(), 2);
        assert_eq!(book[0].state, OrderState::Complete);
        assert_eq!(book[1].state, OrderState::Pending);
    }

    #[tokio::test]
    async fn modify_and_cancel_always_succeed() {
        let broker = PaperBroker::new();
        let sl = broker
            .place_order(&OrderRequest::stop_loss("X", OrderSide::Buy, 75, 110.0, 110.5))
            .await
            .unwrap();

        broker.modify_order(&sl.order_id, "X", 105.5, 105.0).await.unwrap();
        assert_eq!(broker.placed()[0].1.trigger_price, 105.0);

        broker.cancel_order(&sl.order_id).await.unwrap();
        broker.cancel_order("nope").await.unwrap();
        assert_eq!(broker.order_book().await.unwrap()[0].state, OrderState::Cancelled);
    }
}
