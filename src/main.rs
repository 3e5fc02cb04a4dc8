use std::sync::Arc;

use clap::Parser;
use rumqttc::v5::AsyncClient;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use argus_relay::broker::{BrokerLink, BrokerLinkOptions};
use argus_relay::config::RelayArgs;
use argus_relay::fanout::{rebroadcast_loop, Fanout};
use argus_relay::http::{router, AppState};

#[tokio::main]
async fn main() {
    let cli = RelayArgs::parse();

    // construct a subscriber that prints formatted traces to stdout
    // if RUST_LOG is not set, defaults to loglevel INFO
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Could not init tracing");

    let task_tracker = TaskTracker::new();
    let token = CancellationToken::new();

    let fanout = Fanout::new();

    info!(
        "Running broker link ({}:{})",
        cli.mqtt_host, cli.mqtt_port
    );
    let (link, opts) = BrokerLink::new(
        token.clone(),
        fanout.clone(),
        BrokerLinkOptions {
            host: cli.mqtt_host.clone(),
            port: cli.mqtt_port,
            protocol: cli.mqtt_protocol,
            topic_prefix: cli.topic_prefix.clone(),
            car_id: cli.car_id,
        },
    );
    let (client, eventloop) = AsyncClient::new(opts, 600);
    let client_sharable: Arc<AsyncClient> = Arc::new(client);
    task_tracker.spawn(link.run(client_sharable, eventloop));

    info!("Running rebroadcast loop");
    task_tracker.spawn(rebroadcast_loop(token.clone(), fanout.clone()));

    let addr: std::net::SocketAddr = format!("{}:{}", cli.http_bind, cli.http_port)
        .parse()
        .expect("invalid ARGUS_HTTP_BIND or ARGUS_HTTP_PORT");
    let app = router(AppState {
        fanout,
        public_config: cli.public_config(),
    });

    info!(%addr, "Running relay server");
    let server_token = token.clone();
    task_tracker.spawn(async move {
        let shutdown = server_token.clone();
        if let Err(err) = axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            warn!("http server exited: {err}");
        }
    });

    task_tracker.close();

    info!("Initialization complete, ready...");
    info!("Use Ctrl+C or SIGINT to exit cleanly!");

    signal::ctrl_c()
        .await
        .expect("Could not read cancellation trigger (ctrl+c)");
    info!("Received exit signal, shutting down!");
    token.cancel();
    task_tracker.wait().await;
}
