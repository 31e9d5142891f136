/// Event bus
///
/// Single producer (the engine), many consumers (transport connections).
/// Each subscriber owns a bounded queue. Market and portfolio frames are
/// best-effort snapshots: when a queue is full they are dropped and
/// counted, and the next scan delivers a fresher one. Log, ledger and
/// status frames must keep their order and must not be silently lost, so a
/// subscriber whose queue is full for one of those is disconnected instead.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};

use crate::logger::{self, LogTag};
use crate::types::{BotLog, BotStatus, Coin, CompletedTrade, PortfolioItem};

/// Per-subscriber queue depth.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

pub type SubscriberId = u64;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Status(BotStatus),
    Log(BotLog),
    Market(Vec<Coin>),
    Portfolio {
        portfolio: Vec<PortfolioItem>,
        usdt_balance: f64,
    },
    Ledger(Vec<CompletedTrade>),
}

impl EngineEvent {
    /// Frames that a slow subscriber may miss without losing information.
    fn is_droppable(&self) -> bool {
        matches!(self, EngineEvent::Market(_) | EngineEvent::Portfolio { .. })
    }

    fn kind_name(&self) -> &'static str {
        match self {
            EngineEvent::Status(_) => "status",
            EngineEvent::Log(_) => "log",
            EngineEvent::Market(_) => "market",
            EngineEvent::Portfolio { .. } => "portfolio",
            EngineEvent::Ledger(_) => "ledger",
        }
    }
}

pub struct EventBus {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<EngineEvent>>>,
    next_id: AtomicU64,
    dropped_frames: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dropped_frames: AtomicU64::new(0),
        }
    }

    pub async fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<EngineEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.subscribers.write().await.insert(id, tx);
        logger::debug(
            LogTag::Events,
            &format!("subscriber {id} registered ({} active)", self.subscriber_count().await),
        );
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().await.remove(&id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Total market/portfolio frames dropped for slow subscribers.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub async fn publish(&self, event: EngineEvent) {
        let mut stale: Vec<SubscriberId> = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            if subscribers.is_empty() {
                return;
            }
            for (id, sender) in subscribers.iter() {
                match sender.try_send(event.clone()) {
                    Ok(_) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        if event.is_droppable() {
                            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                        } else {
                            // An ordered stream may not lose frames; cut the
                            // subscriber loose instead.
                            logger::warning(
                                LogTag::Events,
                                &format!(
                                    "subscriber {id} too slow for ordered {} frame, disconnecting",
                                    event.kind_name()
                                ),
                            );
                            stale.push(*id);
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        stale.push(*id);
                    }
                }
            }
        }

        if !stale.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in stale {
                subscribers.remove(&id);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogKind;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let (_a, mut rx_a) = bus.subscribe().await;
        let (_b, mut rx_b) = bus.subscribe().await;

        bus.publish(EngineEvent::Status(BotStatus::Running)).await;

        assert!(matches!(
            rx_a.recv().await,
            Some(EngineEvent::Status(BotStatus::Running))
        ));
        assert!(matches!(
            rx_b.recv().await,
            Some(EngineEvent::Status(BotStatus::Running))
        ));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe().await;
        bus.unsubscribe(id).await;
        bus.publish(EngineEvent::Status(BotStatus::Stopped)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_market_frames_but_stays() {
        let bus = EventBus::new();
        let (id, _rx) = bus.subscribe().await;

        // Saturate the queue without draining it.
        for _ in 0..SUBSCRIBER_QUEUE_CAPACITY + 5 {
            bus.publish(EngineEvent::Market(Vec::new())).await;
        }

        assert_eq!(bus.subscriber_count().await, 1);
        assert!(bus.dropped_frames() >= 5);
        bus.unsubscribe(id).await;
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_on_ordered_frames() {
        let bus = EventBus::new();
        let (_id, _rx) = bus.subscribe().await;

        for _ in 0..SUBSCRIBER_QUEUE_CAPACITY + 1 {
            bus.publish(EngineEvent::Log(BotLog::new(LogKind::Info, "tick"))).await;
        }

        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn closed_receiver_is_pruned() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe().await;
        drop(rx);
        bus.publish(EngineEvent::Status(BotStatus::Running)).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }
}
