use std::sync::Arc;
use std::time::Duration;

use rumqttc::v5::{
    mqttbytes::{v5::Packet, QoS},
    AsyncClient, Event, EventLoop, MqttOptions,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::BrokerProtocol;
use crate::fanout::Fanout;
use crate::{epoch_ms, CONNECT_TIMEOUT_SECS, RECONNECT_PERIOD};

/// The broker side of the relay: keeps one subscription to the vehicle's
/// topic tree and feeds every publish into the cache and the fan-out.
/// No error on this link is ever fatal to the process, clients are simply
/// served whatever the cache last saw.
pub struct BrokerLink {
    cancel_token: CancellationToken,
    fanout: Fanout,
    opts: BrokerLinkOptions,
}

/// broker link options, these are static immutable settings
pub struct BrokerLinkOptions {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Plain or TLS transport
    pub protocol: BrokerProtocol,
    /// Topic namespace the vehicle publishes under
    pub topic_prefix: String,
    /// Vehicle identifier within the namespace
    pub car_id: u32,
}

impl BrokerLink {
    /// Builds the link and the mqtt options to connect it with.
    pub fn new(
        cancel_token: CancellationToken,
        fanout: Fanout,
        opts: BrokerLinkOptions,
    ) -> (BrokerLink, MqttOptions) {
        let mut mqtt_opts = MqttOptions::new(
            format!("argus-relay-{}", epoch_ms()),
            &opts.host,
            opts.port,
        );
        mqtt_opts
            .set_keep_alive(Duration::from_secs(20))
            .set_clean_start(true)
            .set_connection_timeout(CONNECT_TIMEOUT_SECS);
        if opts.protocol == BrokerProtocol::Mqtts {
            mqtt_opts.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        (
            BrokerLink {
                cancel_token,
                fanout,
                opts,
            },
            mqtt_opts,
        )
    }

    /// The topic filter this link subscribes to.
    pub fn filter(&self) -> String {
        format!("{}/cars/{}/#", self.opts.topic_prefix, self.opts.car_id)
    }

    /// Handles the subscription until cancelled, will not return otherwise.
    /// Poll errors are logged and retried on a fixed period; nothing is
    /// synthesized during an outage, clients just stop receiving updates.
    pub async fn run(self, client: Arc<AsyncClient>, mut eventloop: EventLoop) {
        let filter = self.filter();
        debug!("relaying topics under {filter}");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("shutting down broker link");
                    break;
                }
                msg = eventloop.poll() => match msg {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        debug!("broker connection established");
                        // clean-start session, so resubscribe on every connect
                        if let Err(err) = client.subscribe(filter.as_str(), QoS::AtMostOnce).await {
                            warn!("could not subscribe to broker: {err}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        let Ok(topic) = std::str::from_utf8(&msg.topic) else {
                            warn!("could not parse topic, topic: {:?}", msg.topic);
                            continue;
                        };
                        let Ok(payload) = std::str::from_utf8(&msg.payload) else {
                            warn!("dropping non-utf8 payload on {topic}");
                            continue;
                        };
                        trace!("{topic} = {payload}");
                        // cache write happens inside, before the relay send
                        self.fanout.ingest(topic, payload, epoch_ms()).await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("broker link error, retrying in {:?}: {err}", RECONNECT_PERIOD);
                        tokio::select! {
                            _ = self.cancel_token.cancelled() => break,
                            _ = tokio::time::sleep(RECONNECT_PERIOD) => {}
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_covers_the_whole_vehicle_subtree() {
        let (link, _opts) = BrokerLink::new(
            CancellationToken::new(),
            Fanout::new(),
            BrokerLinkOptions {
                host: "localhost".to_string(),
                port: 1883,
                protocol: BrokerProtocol::Mqtt,
                topic_prefix: "teslamate".to_string(),
                car_id: 4,
            },
        );
        assert_eq!(link.filter(), "teslamate/cars/4/#");
    }
}
