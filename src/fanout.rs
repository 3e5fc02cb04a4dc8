use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cache::TopicCache;
use crate::envelope::RelayEnvelope;
use crate::{BROADCAST_CAPACITY, REBROADCAST_PERIOD};

/// Fan-out hub: owns the topic cache and the broadcast channel every client
/// socket subscribes to.  Delivery is best effort, most recent value wins.
/// A send with no receivers is not an error, and a receiver that lags just
/// skips frames until the periodic rebroadcast resynchronizes it.
#[derive(Clone)]
pub struct Fanout {
    cache: Arc<RwLock<TopicCache>>,
    live: broadcast::Sender<String>,
}

impl Fanout {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(BROADCAST_CAPACITY);
        Fanout {
            cache: Arc::new(RwLock::new(TopicCache::new())),
            live,
        }
    }

    /// Receiver of live frames for one client socket.  Dropping it is how a
    /// closed socket leaves the fan-out set.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.live.subscribe()
    }

    /// Record one broker message and relay it to every open socket.  The
    /// cache write happens before the send so any replay started afterwards
    /// already sees the value.
    pub async fn ingest(&self, topic: &str, payload: &str, received_at: u64) {
        self.cache.write().await.insert(topic, payload, received_at);
        self.send(&RelayEnvelope {
            topic: topic.to_string(),
            data: payload.to_string(),
            timestamp: received_at,
        });
    }

    fn send(&self, envelope: &RelayEnvelope) {
        match serde_json::to_string(envelope) {
            Ok(frame) => {
                let _ = self.live.send(frame);
            }
            Err(err) => warn!("could not serialize relay envelope: {err}"),
        }
    }

    /// Arbitrary-order copy of the cache, replayed to each late joiner.
    pub async fn snapshot(&self) -> Vec<RelayEnvelope> {
        self.cache.read().await.snapshot()
    }

    /// Re-send the entire cache to every open socket, so a client whose
    /// merge state drifted is eventually fully resynchronized.  Consumers
    /// must treat repeated values as idempotent.
    pub async fn rebroadcast_all(&self) {
        let entries = self.snapshot().await;
        trace!("rebroadcasting {} cached topics", entries.len());
        for envelope in &entries {
            self.send(envelope);
        }
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Fanout::new()
    }
}

/// Periodic full-cache rebroadcast, runs until cancelled.
pub async fn rebroadcast_loop(cancel_token: CancellationToken, fanout: Fanout) {
    let mut ticker = tokio::time::interval(REBROADCAST_PERIOD);
    // the immediate first tick is pointless, replay-on-connect covers startup
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("shutting down rebroadcast loop");
                break;
            }
            _ = ticker.tick() => fanout.rebroadcast_all().await,
        }
    }
}
