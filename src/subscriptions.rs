//! Event subscriptions for the HTTP transport.
//!
//! Each subscription owns a bounded queue drained by its event stream. The
//! hub keeps the sending halves in a single mutex-guarded map so any task
//! can push to one subscription or broadcast to all of them.
//!
//! Lifecycle: `Connecting` after [`SubscriptionHub::open`], `Open` once the
//! first event has been queued by [`SubscriptionHub::activate`], and
//! `Closed` when the client goes away, the queue closes, a push fails, or
//! [`SubscriptionHub::close`] is called. Closed entries are removed from
//! the map immediately.
//!
//! Tasks that do not own a request context publish through a channel that
//! [`SubscriptionHub::relay`] drains into [`SubscriptionHub::broadcast`].

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::ResponseEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Open,
    Closed,
}

/// One server-sent event waiting in a subscription queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub event: String,
    pub id: Option<String>,
    pub data: String,
}

impl Outbound {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            id: None,
            data: data.into(),
        }
    }

    /// A response envelope delivered asynchronously.
    #[must_use]
    pub fn envelope(envelope: &ResponseEnvelope) -> Self {
        Self::new("message", envelope.to_line())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HubError {
    #[error("too many open subscriptions (max {0})")]
    Full(usize),
    #[error("no subscription {0}")]
    NotFound(Uuid),
    #[error("subscription {0} is not open yet")]
    NotOpen(Uuid),
    #[error("subscription {0} closed")]
    Closed(Uuid),
}

struct Slot {
    tx: mpsc::Sender<Outbound>,
    state: SubscriptionState,
}

struct Inner {
    slots: Mutex<HashMap<Uuid, Slot>>,
    max: usize,
    buffer: usize,
}

/// Shared registry of open subscriptions. Cheap to clone.
#[derive(Clone)]
pub struct SubscriptionHub {
    inner: Arc<Inner>,
}

impl SubscriptionHub {
    pub fn new(max: usize, buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                max,
                buffer: buffer.max(1),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Uuid, Slot>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscription in the `Connecting` state.
    pub fn open(&self) -> Result<Subscription, HubError> {
        let mut slots = self.slots();
        if slots.len() >= self.inner.max {
            return Err(HubError::Full(self.inner.max));
        }
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        slots.insert(
            id,
            Slot {
                tx,
                state: SubscriptionState::Connecting,
            },
        );
        info!(%id, open = slots.len(), "subscription opened");
        Ok(Subscription {
            id,
            rx,
            hub: self.clone(),
        })
    }

    /// Queue the first event and move the subscription to `Open`.
    pub fn activate(&self, id: Uuid, first: Outbound) -> Result<(), HubError> {
        let mut slots = self.slots();
        let slot = slots.get_mut(&id).ok_or(HubError::NotFound(id))?;
        if slot.tx.try_send(first).is_err() {
            slots.remove(&id);
            return Err(HubError::Closed(id));
        }
        slot.state = SubscriptionState::Open;
        Ok(())
    }

    /// Queue an event for one subscription. A full or closed queue closes it.
    pub fn push(&self, id: Uuid, event: Outbound) -> Result<(), HubError> {
        let mut slots = self.slots();
        let slot = slots.get(&id).ok_or(HubError::NotFound(id))?;
        if slot.state != SubscriptionState::Open {
            return Err(HubError::NotOpen(id));
        }
        if let Err(e) = slot.tx.try_send(event) {
            debug!(%id, error = %e, "push failed, closing subscription");
            slots.remove(&id);
            return Err(HubError::Closed(id));
        }
        Ok(())
    }

    /// Queue an event on every open subscription; returns how many took it.
    pub fn broadcast(&self, event: &Outbound) -> usize {
        let mut slots = self.slots();
        let mut delivered = 0;
        slots.retain(|id, slot| {
            if slot.state != SubscriptionState::Open {
                return true;
            }
            match slot.tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(%id, "broadcast failed, closing subscription");
                    false
                }
            }
        });
        delivered
    }

    /// Broadcast every value received on `feed` as a `message` event until
    /// all senders are gone.
    pub async fn relay(self, mut feed: mpsc::Receiver<Value>) {
        while let Some(value) = feed.recv().await {
            let delivered = self.broadcast(&Outbound::new("message", value.to_string()));
            debug!(delivered, "relayed notification");
        }
        debug!("notification feed closed");
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn close(&self, id: Uuid) -> bool {
        let removed = self.slots().remove(&id).is_some();
        if removed {
            info!(%id, "subscription closed");
        }
        removed
    }

    pub fn state(&self, id: Uuid) -> SubscriptionState {
        self.slots()
            .get(&id)
            .map_or(SubscriptionState::Closed, |s| s.state)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

/// Receiving half of a subscription. Dropping it closes the subscription.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Outbound>,
    hub: SubscriptionHub,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Outbound;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(None) = polled {
            self.hub.close(self.id);
        }
        polled
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.close(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_connecting_open_closed() {
        let hub = SubscriptionHub::new(4, 8);
        let mut sub = hub.open().unwrap();
        let id = sub.id();
        assert_eq!(hub.state(id), SubscriptionState::Connecting);
        assert_eq!(hub.push(id, Outbound::new("message", "x")), Err(HubError::NotOpen(id)));

        hub.activate(id, Outbound::new("endpoint", "/messages")).unwrap();
        assert_eq!(hub.state(id), SubscriptionState::Open);
        hub.push(id, Outbound::new("message", "hello")).unwrap();

        assert_eq!(sub.recv().await.unwrap().event, "endpoint");
        assert_eq!(sub.recv().await.unwrap().data, "hello");

        drop(sub);
        assert_eq!(hub.state(id), SubscriptionState::Closed);
        assert!(hub.is_empty());
        assert_eq!(hub.push(id, Outbound::new("message", "late")), Err(HubError::NotFound(id)));
    }

    #[test]
    fn max_subscriptions_enforced() {
        let hub = SubscriptionHub::new(2, 1);
        let _a = hub.open().unwrap();
        let b = hub.open().unwrap();
        assert!(matches!(hub.open(), Err(HubError::Full(2))));
        drop(b);
        assert!(hub.open().is_ok());
    }

    #[test]
    fn full_queue_closes_subscription() {
        let hub = SubscriptionHub::new(4, 1);
        let sub = hub.open().unwrap();
        let id = sub.id();
        hub.activate(id, Outbound::new("endpoint", "/m")).unwrap();
        assert_eq!(hub.push(id, Outbound::new("message", "overflow")), Err(HubError::Closed(id)));
        assert_eq!(hub.state(id), SubscriptionState::Closed);
    }

    #[tokio::test]
    async fn broadcast_reaches_open_subscriptions_only() {
        let hub = SubscriptionHub::new(4, 4);
        let mut a = hub.open().unwrap();
        let b = hub.open().unwrap();
        hub.activate(a.id(), Outbound::new("endpoint", "/a")).unwrap();

        assert_eq!(hub.broadcast(&Outbound::new("message", "all")), 1);
        assert_eq!(a.recv().await.unwrap().event, "endpoint");
        assert_eq!(a.recv().await.unwrap().data, "all");
        assert_eq!(hub.state(b.id()), SubscriptionState::Connecting);
    }

    #[tokio::test]
    async fn relay_forwards_feed_to_open_subscriptions() {
        let hub = SubscriptionHub::new(4, 4);
        let mut sub = hub.open().unwrap();
        hub.activate(sub.id(), Outbound::new("endpoint", "/m")).unwrap();

        let (tx, rx) = mpsc::channel(4);
        let relay = tokio::spawn(hub.clone().relay(rx));
        tx.send(serde_json::json!({"method": "notifications/rules/changed"}))
            .await
            .unwrap();
        drop(tx);
        relay.await.unwrap();

        assert_eq!(sub.recv().await.unwrap().event, "endpoint");
        let event = sub.recv().await.unwrap();
        assert_eq!(event.event, "message");
        assert!(event.data.contains("notifications/rules/changed"));
    }

    #[test]
    fn close_is_idempotent() {
        let hub = SubscriptionHub::new(4, 4);
        let sub = hub.open().unwrap();
        assert!(hub.close(sub.id()));
        assert!(!hub.close(sub.id()));
        assert_eq!(hub.len(), 0);
    }
}
