// End-to-end checks of the relay surface: status-then-replay on connect,
// live relay, and late-join merge equivalence.

use std::collections::HashMap;
use std::net::TcpListener;
use std::time::Duration;

use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use argus_relay::config::PublicConfig;
use argus_relay::envelope::{RelayEnvelope, StatusEnvelope};
use argus_relay::fanout::Fanout;
use argus_relay::http::{router, AppState};
use argus_relay::state::{topic_suffix, VehicleState};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn test_state(fanout: Fanout) -> AppState {
    AppState {
        fanout,
        public_config: PublicConfig {
            topic_prefix: "teslamate".to_string(),
            car_id: 1,
            proxy_url: None,
        },
    }
}

async fn serve(app_state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(app_state);
    tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn recv_text(stream: &mut WsStream) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(raw) = msg {
            return raw;
        }
    }
}

fn apply(state: &mut VehicleState, envelope: &RelayEnvelope) {
    if let Some(suffix) = topic_suffix(&envelope.topic, "teslamate", 1) {
        state.apply(suffix, &envelope.data, 0);
    }
}

#[tokio::test]
async fn late_joiner_gets_status_then_full_replay() {
    let fanout = Fanout::new();
    fanout.ingest("teslamate/cars/1/speed", "88", 1).await;
    fanout.ingest("teslamate/cars/1/battery_level", "54", 2).await;
    // overwrite, the replay must only carry the latest value
    fanout.ingest("teslamate/cars/1/speed", "91", 3).await;

    let url = serve(test_state(fanout)).await;
    let (mut stream, _) = connect_async(url).await.unwrap();

    let first = recv_text(&mut stream).await;
    let status: StatusEnvelope = serde_json::from_str(&first).unwrap();
    assert_eq!(status.kind, "status");

    let mut topics = HashMap::new();
    for _ in 0..2 {
        let raw = recv_text(&mut stream).await;
        let envelope: RelayEnvelope = serde_json::from_str(&raw).unwrap();
        topics.insert(envelope.topic, envelope.data);
    }
    assert_eq!(
        topics.get("teslamate/cars/1/speed").map(String::as_str),
        Some("91")
    );
    assert_eq!(
        topics
            .get("teslamate/cars/1/battery_level")
            .map(String::as_str),
        Some("54")
    );
}

#[tokio::test]
async fn live_frames_reach_connected_clients() {
    let fanout = Fanout::new();
    let url = serve(test_state(fanout.clone())).await;
    let (mut stream, _) = connect_async(url).await.unwrap();
    let _status = recv_text(&mut stream).await;

    fanout.ingest("teslamate/cars/1/power", "-7.2", 10).await;

    let raw = recv_text(&mut stream).await;
    let envelope: RelayEnvelope = serde_json::from_str(&raw).unwrap();
    assert_eq!(envelope.topic, "teslamate/cars/1/power");
    assert_eq!(envelope.data, "-7.2");
    assert_eq!(envelope.timestamp, 10);
}

#[tokio::test]
async fn late_joiner_converges_with_an_early_client() {
    let fanout = Fanout::new();
    let url = serve(test_state(fanout.clone())).await;

    let (mut early, _) = connect_async(url.clone()).await.unwrap();
    let _status = recv_text(&mut early).await;

    let updates = [
        ("teslamate/cars/1/speed", "42.5"),
        ("teslamate/cars/1/battery_level", "88"),
        ("teslamate/cars/1/shift_state", "D"),
        ("teslamate/cars/1/geofence", "Home"),
    ];
    for (topic, payload) in updates {
        fanout.ingest(topic, payload, 1).await;
    }

    let mut early_state = VehicleState::default();
    for _ in 0..updates.len() {
        let envelope: RelayEnvelope =
            serde_json::from_str(&recv_text(&mut early).await).unwrap();
        apply(&mut early_state, &envelope);
    }

    // a client connecting only now must end up with the same merged record
    let (mut late, _) = connect_async(url).await.unwrap();
    let _status = recv_text(&mut late).await;
    let mut late_state = VehicleState::default();
    for _ in 0..updates.len() {
        let envelope: RelayEnvelope =
            serde_json::from_str(&recv_text(&mut late).await).unwrap();
        apply(&mut late_state, &envelope);
    }

    assert_eq!(early_state, late_state);
    assert_eq!(late_state.speed, 42.5);
    assert_eq!(late_state.gear, "D");
    assert_eq!(late_state.geofence, "Home");
}

#[tokio::test]
async fn config_read_back_serves_camel_case_json() {
    let fanout = Fanout::new();
    let url = serve(test_state(fanout)).await;
    let base = url
        .trim_start_matches("ws://")
        .trim_end_matches("/ws")
        .to_string();

    let body = reqwest::get(format!("http://{base}/config"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["topicPrefix"], "teslamate");
    assert_eq!(value["carId"], 1);
    assert!(value["proxyUrl"].is_null());
}
