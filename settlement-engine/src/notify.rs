//! Notification dispatch worker
//!
//! The manager broadcasts events only after the transaction commits;
//! this worker forwards the relevant ones to the notification gateway
//! and the search indexer. Delivery failures are logged and swallowed,
//! they never feed back into settlement state.

use async_trait::async_trait;
use shared::settlement::{EventPayload, SettlementEvent, SettlementEventType};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Outbound notification channel (email, push, back office)
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify(&self, event: &SettlementEvent) -> anyhow::Result<()>;
}

/// Product search index maintenance
#[async_trait]
pub trait SearchIndexer: Send + Sync {
    /// Remove a product (or one of its variants) from the index
    async fn remove_product(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// Event types forwarded to the notification gateway
const NOTIFIED_EVENT_TYPES: &[SettlementEventType] = &[
    SettlementEventType::OrderCreated,
    SettlementEventType::OrderStatusChanged,
    SettlementEventType::LowStock,
    SettlementEventType::RefundRequested,
    SettlementEventType::RefundApprovalIssued,
    SettlementEventType::RefundClosed,
    SettlementEventType::WithdrawalRequested,
    SettlementEventType::WithdrawalStatusChanged,
];

/// Worker forwarding committed events to external collaborators
pub struct NotificationWorker {
    gateway: Arc<dyn NotificationGateway>,
    indexer: Arc<dyn SearchIndexer>,
}

impl NotificationWorker {
    pub fn new(gateway: Arc<dyn NotificationGateway>, indexer: Arc<dyn SearchIndexer>) -> Self {
        Self { gateway, indexer }
    }

    /// Run until the broadcast channel closes
    ///
    /// A lagged receiver skips the missed events and keeps going; the
    /// events are still in the audit log, notifications are best-effort.
    pub async fn run(self, mut event_rx: broadcast::Receiver<SettlementEvent>) {
        tracing::info!("NotificationWorker started");
        loop {
            match event_rx.recv().await {
                Ok(event) => self.dispatch(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notification receiver lagged, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event channel closed, shutting down NotificationWorker");
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, event: &SettlementEvent) {
        if let EventPayload::StockDepleted {
            product_id,
            variant_id,
            ..
        } = &event.payload
        {
            if let Err(e) = self
                .indexer
                .remove_product(product_id, variant_id.as_deref())
                .await
            {
                tracing::warn!(
                    product_id = %product_id,
                    error = %e,
                    "Failed to remove depleted product from search index"
                );
            }
        }

        if NOTIFIED_EVENT_TYPES.contains(&event.event_type) {
            if let Err(e) = self.gateway.notify(event).await {
                tracing::warn!(
                    event_type = %event.event_type,
                    entity_id = %event.entity_id,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        notified: Mutex<Vec<SettlementEventType>>,
        removed: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationGateway for Recording {
        async fn notify(&self, event: &SettlementEvent) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("gateway down");
            }
            self.notified.lock().push(event.event_type.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl SearchIndexer for Recording {
        async fn remove_product(
            &self,
            product_id: &str,
            _variant_id: Option<&str>,
        ) -> anyhow::Result<()> {
            self.removed.lock().push(product_id.to_string());
            Ok(())
        }
    }

    fn event(event_type: SettlementEventType, payload: EventPayload) -> SettlementEvent {
        SettlementEvent::new(
            1,
            "entity-1".to_string(),
            "op-1".to_string(),
            "operator".to_string(),
            "cmd-1".to_string(),
            0,
            event_type,
            payload,
        )
    }

    #[tokio::test]
    async fn depleted_stock_removes_from_index() {
        let sink = Arc::new(Recording::default());
        let worker = NotificationWorker::new(sink.clone(), sink.clone());
        worker
            .dispatch(&event(
                SettlementEventType::StockDepleted,
                EventPayload::StockDepleted {
                    product_id: "p-1".to_string(),
                    variant_id: None,
                    product_name: "item".to_string(),
                },
            ))
            .await;
        assert_eq!(sink.removed.lock().as_slice(), ["p-1".to_string()]);
        // StockDepleted is index maintenance, not a notification
        assert!(sink.notified.lock().is_empty());
    }

    #[tokio::test]
    async fn low_stock_is_notified() {
        let sink = Arc::new(Recording::default());
        let worker = NotificationWorker::new(sink.clone(), sink.clone());
        worker
            .dispatch(&event(
                SettlementEventType::LowStock,
                EventPayload::LowStock {
                    product_id: "p-1".to_string(),
                    variant_id: None,
                    product_name: "item".to_string(),
                    remaining: 2,
                    threshold: 5,
                },
            ))
            .await;
        assert_eq!(
            sink.notified.lock().as_slice(),
            [SettlementEventType::LowStock]
        );
    }

    #[tokio::test]
    async fn gateway_failure_is_swallowed() {
        let sink = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let worker = NotificationWorker::new(sink.clone(), sink.clone());
        // must not panic or propagate
        worker
            .dispatch(&event(
                SettlementEventType::OrderCreated,
                EventPayload::OrderCreated {
                    order_id: "ord-1".to_string(),
                    order_number: "A-000001".to_string(),
                    customer_id: "c-1".to_string(),
                    invoice_id: "inv-1".to_string(),
                    invoice_total: rust_decimal::Decimal::from(330),
                    payable_total: rust_decimal::Decimal::from(330),
                    shop_count: 2,
                },
            ))
            .await;
        assert!(sink.notified.lock().is_empty());
    }
}
