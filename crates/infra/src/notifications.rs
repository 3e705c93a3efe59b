//! Customer notification port (order confirmation, cancellation).

use std::sync::Arc;

use thiserror::Error;

use storefront_events::EventBus;
use storefront_orders::OrderNotice;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Fire-and-forget delivery of order notices.
pub trait OrderNotifier: Send + Sync {
    fn send(&self, notice: &OrderNotice) -> Result<(), NotifyError>;
}

impl<N> OrderNotifier for Arc<N>
where
    N: OrderNotifier + ?Sized,
{
    fn send(&self, notice: &OrderNotice) -> Result<(), NotifyError> {
        (**self).send(notice)
    }
}

/// Hands notices to a bus; a mailer subscribes on the other side.
#[derive(Debug)]
pub struct BusNotifier<B> {
    bus: B,
}

impl<B> BusNotifier<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> OrderNotifier for BusNotifier<B>
where
    B: EventBus<OrderNotice>,
{
    fn send(&self, notice: &OrderNotice) -> Result<(), NotifyError> {
        self.bus
            .publish(notice.clone())
            .map_err(|e| NotifyError::Delivery(format!("{e:?}")))?;
        tracing::info!(order = %notice.number, kind = ?notice.kind, "order notice sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_core::AggregateId;
    use storefront_events::InMemoryEventBus;
    use storefront_orders::{NoticeKind, OrderId};

    #[test]
    fn notices_reach_bus_subscribers() {
        let bus = Arc::new(InMemoryEventBus::<OrderNotice>::new());
        let inbox = bus.subscribe();
        let notifier = BusNotifier::new(bus);

        let notice = OrderNotice {
            order_id: OrderId(AggregateId::new()),
            number: "R000000001".to_string(),
            kind: NoticeKind::OrderConfirmation,
        };
        notifier.send(&notice).unwrap();

        assert_eq!(inbox.drain(), vec![notice]);
    }
}
