use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::envelope::{RelayEnvelope, WireMessage};
use crate::{epoch_ms, LINK_LOG_CAP, RECONNECT_PERIOD, WS_PATH};

/// Connection phase of the display link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkPhase {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPhase::Disconnected => "disconnected",
            LinkPhase::Connecting => "connecting",
            LinkPhase::Connected => "connected",
        }
    }
}

/// One notable link event.
#[derive(Clone, Debug)]
pub struct LinkEvent {
    pub at_ms: u64,
    pub detail: String,
}

/// Bounded rolling event log, oldest entries drop past the cap.
#[derive(Debug)]
pub struct LinkLog {
    entries: VecDeque<LinkEvent>,
    cap: usize,
}

impl LinkLog {
    pub fn new(cap: usize) -> Self {
        LinkLog {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, detail: impl Into<String>) {
        if self.entries.len() == self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(LinkEvent {
            at_ms: epoch_ms(),
            detail: detail.into(),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &LinkEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reconnect policy: a fixed delay between attempts, cancellation through
/// the token the owning link manager holds.  There is no retry cap, the
/// display keeps searching for its relay for as long as it is on screen.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            delay: RECONNECT_PERIOD,
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid relay URL {url}: {source}")]
    BadUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Resolves the socket address.  An explicit override wins, its scheme
/// normalized to ws/wss when missing or http-flavored; otherwise the page
/// host plus the fixed socket path, secure pages getting secure sockets.
pub fn resolve_ws_url(
    override_url: Option<&str>,
    host: &str,
    secure: bool,
) -> Result<Url, LinkError> {
    let scheme = if secure { "wss" } else { "ws" };
    let raw = match override_url {
        Some(configured) => {
            let trimmed = configured.trim();
            if let Some(rest) = trimmed.strip_prefix("http://") {
                format!("ws://{rest}")
            } else if let Some(rest) = trimmed.strip_prefix("https://") {
                format!("wss://{rest}")
            } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
                trimmed.to_string()
            } else {
                format!("{scheme}://{trimmed}")
            }
        }
        None => format!("{scheme}://{host}{WS_PATH}"),
    };
    Url::parse(&raw).map_err(|source| LinkError::BadUrl { url: raw, source })
}

/// Owns the one WebSocket connection to the relay and its permanent
/// reconnect loop.  Every phase transition goes out on the watch channel;
/// dropping the cancel token's guard side (or cancelling it) tears the
/// socket and the retry timer down.
pub struct LinkManager {
    url: Url,
    retry: RetryPolicy,
    cancel_token: CancellationToken,
    phase_tx: watch::Sender<LinkPhase>,
    log: LinkLog,
}

impl LinkManager {
    pub fn new(
        url: Url,
        retry: RetryPolicy,
        cancel_token: CancellationToken,
    ) -> (LinkManager, watch::Receiver<LinkPhase>) {
        let (phase_tx, phase_rx) = watch::channel(LinkPhase::Disconnected);
        (
            LinkManager {
                url,
                retry,
                cancel_token,
                phase_tx,
                log: LinkLog::new(LINK_LOG_CAP),
            },
            phase_rx,
        )
    }

    fn set_phase(&self, phase: LinkPhase) {
        trace!("link phase: {}", phase.as_str());
        let _ = self.phase_tx.send(phase);
    }

    /// Runs until cancelled, handing every decoded telemetry envelope to
    /// `out`.  Status frames go to the event log, unknown frames are
    /// dropped.
    pub async fn run(mut self, out: mpsc::Sender<RelayEnvelope>) {
        loop {
            if self.cancel_token.is_cancelled() {
                break;
            }
            self.set_phase(LinkPhase::Connecting);
            let connect = tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                connect = connect_async(self.url.clone()) => connect,
            };
            match connect {
                Ok((mut stream, _)) => {
                    info!("link established to {}", self.url);
                    self.log.push(format!("connected to {}", self.url));
                    self.set_phase(LinkPhase::Connected);
                    loop {
                        tokio::select! {
                            _ = self.cancel_token.cancelled() => {
                                let _ = stream.close(None).await;
                                self.set_phase(LinkPhase::Disconnected);
                                return;
                            }
                            frame = stream.next() => match frame {
                                Some(Ok(Message::Text(raw))) => self.handle_frame(&raw, &out).await,
                                Some(Ok(Message::Close(close))) => {
                                    let code = close.map(|frame| u16::from(frame.code));
                                    debug!("closed by relay, code {code:?}");
                                    self.log.push(format!("closed by relay, code {code:?}"));
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(err)) => {
                                    warn!("link error: {err}");
                                    self.log.push(format!("socket error: {err}"));
                                    break;
                                }
                                None => {
                                    self.log.push("socket ended");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!("could not reach relay: {err}");
                    self.log.push(format!("connect failed: {err}"));
                }
            }
            self.set_phase(LinkPhase::Disconnected);
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = tokio::time::sleep(self.retry.delay) => {}
            }
        }
        self.set_phase(LinkPhase::Disconnected);
    }

    async fn handle_frame(&mut self, raw: &str, out: &mpsc::Sender<RelayEnvelope>) {
        match serde_json::from_str::<WireMessage>(raw) {
            Ok(WireMessage::Status(status)) => {
                debug!("relay status: {}", status.msg);
                self.log.push(format!("relay status: {}", status.msg));
            }
            Ok(WireMessage::Telemetry(envelope)) => {
                if out.send(envelope).await.is_err() {
                    // consumer is gone, stop retrying on its behalf
                    self.cancel_token.cancel();
                }
            }
            Err(err) => trace!("ignoring unknown frame: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_ws_override_is_used_verbatim() {
        let url = resolve_ws_url(Some("wss://relay.example:9443/ws"), "ignored", false).unwrap();
        assert_eq!(url.as_str(), "wss://relay.example:9443/ws");
    }

    #[test]
    fn http_schemes_normalize_to_socket_schemes() {
        let plain = resolve_ws_url(Some("http://relay.example/ws"), "ignored", true).unwrap();
        assert_eq!(plain.scheme(), "ws");
        let secure = resolve_ws_url(Some("https://relay.example/ws"), "ignored", false).unwrap();
        assert_eq!(secure.scheme(), "wss");
    }

    #[test]
    fn schemeless_override_follows_the_page_scheme() {
        let insecure = resolve_ws_url(Some("relay.example:8090/ws"), "ignored", false).unwrap();
        assert_eq!(insecure.scheme(), "ws");
        let secure = resolve_ws_url(Some("relay.example:8090/ws"), "ignored", true).unwrap();
        assert_eq!(secure.scheme(), "wss");
    }

    #[test]
    fn fallback_is_page_host_plus_fixed_path() {
        let url = resolve_ws_url(None, "hud.local:8090", false).unwrap();
        assert_eq!(url.as_str(), "ws://hud.local:8090/ws");
    }

    #[test]
    fn rolling_log_drops_oldest_past_cap() {
        let mut log = LinkLog::new(3);
        for n in 0..5 {
            log.push(format!("event {n}"));
        }
        assert_eq!(log.len(), 3);
        let details: Vec<_> = log.entries().map(|event| event.detail.clone()).collect();
        assert_eq!(details, vec!["event 2", "event 3", "event 4"]);
    }

    #[tokio::test]
    async fn reconnects_after_forced_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                // force-close every connection straight away
                let _ = ws.close(None).await;
            }
        });

        let url = resolve_ws_url(Some(&addr.to_string()), "unused", false).unwrap();
        let token = CancellationToken::new();
        let (manager, mut phase_rx) = LinkManager::new(
            url,
            RetryPolicy {
                delay: Duration::from_millis(150),
            },
            token.clone(),
        );
        let (tx, _keepalive_rx) = mpsc::channel(16);
        tokio::spawn(manager.run(tx));

        let mut phases = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while phases.len() < 6 {
            tokio::select! {
                changed = phase_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    phases.push(*phase_rx.borrow_and_update());
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        token.cancel();

        let wanted = [
            LinkPhase::Connected,
            LinkPhase::Disconnected,
            LinkPhase::Connecting,
        ];
        let mut cursor = wanted.iter().peekable();
        for phase in &phases {
            if cursor.peek() == Some(&phase) {
                cursor.next();
            }
        }
        assert!(
            cursor.peek().is_none(),
            "expected connected -> disconnected -> connecting, observed {phases:?}"
        );
    }
}
