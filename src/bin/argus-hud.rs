use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use argus_relay::config::{fetch_public_config, merge_client_config, ClientOverrides};
use argus_relay::demo::demo_loop;
use argus_relay::epoch_ms;
use argus_relay::link::{resolve_ws_url, LinkManager, LinkPhase, RetryPolicy};
use argus_relay::state::{topic_suffix, VehicleState};

/// argus HUD command line arguments
#[derive(Parser, Debug)]
#[command(version)]
struct HudArgs {
    /// Relay HTTP base URL, used for config bootstrap and as the default
    /// socket host
    #[arg(
        short = 'r',
        long,
        default_value = "http://localhost:8090",
        env = "ARGUS_HUD_RELAY_URL"
    )]
    relay_url: String,

    /// Local override record (JSON: proxyUrl, topicPrefix, carId)
    #[arg(short = 'o', long, env = "ARGUS_HUD_OVERRIDES")]
    overrides: Option<PathBuf>,

    /// Prefer a secure socket when the configured URL carries no scheme
    #[arg(long, env = "ARGUS_HUD_SECURE")]
    secure: bool,

    /// Play the built-in demo drive instead of connecting
    #[arg(short = 'd', long, env = "ARGUS_HUD_DEMO")]
    demo: bool,
}

#[tokio::main]
async fn main() {
    let cli = HudArgs::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Could not init tracing");

    let token = CancellationToken::new();

    if cli.demo {
        run_demo(token).await;
        return;
    }

    // bootstrap: local overrides first, then the relay's read-back values
    // on top of them
    let overrides = match &cli.overrides {
        Some(path) => match ClientOverrides::load(path) {
            Ok(overrides) => overrides,
            Err(err) => {
                warn!("ignoring override record: {err}");
                ClientOverrides::default()
            }
        },
        None => ClientOverrides::default(),
    };
    let read_back = fetch_public_config(&cli.relay_url).await;
    let config = merge_client_config(read_back, &overrides);

    let secure = cli.secure || cli.relay_url.starts_with("https://");
    let host = cli
        .relay_url
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');
    let url = match resolve_ws_url(config.proxy_url.as_deref(), host, secure) {
        Ok(url) => url,
        Err(err) => {
            eprintln!("cannot resolve relay address: {err}");
            return;
        }
    };
    info!("connecting to {url}");

    let (envelope_tx, mut envelope_rx) = mpsc::channel(64);
    let (manager, mut phase_rx) = LinkManager::new(url, RetryPolicy::default(), token.clone());
    tokio::spawn(manager.run(envelope_tx));

    let mut state = VehicleState::default();
    let mut phase = LinkPhase::Disconnected;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                token.cancel();
                break;
            }
            changed = phase_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                phase = *phase_rx.borrow_and_update();
                match phase {
                    LinkPhase::Connected => println!("{}", phase_tag(phase)),
                    _ => println!("{} searching for vehicle...", phase_tag(phase)),
                }
            }
            envelope = envelope_rx.recv() => match envelope {
                Some(envelope) => {
                    let Some(suffix) =
                        topic_suffix(&envelope.topic, &config.topic_prefix, config.car_id)
                    else {
                        continue;
                    };
                    state.apply(suffix, &envelope.data, epoch_ms());
                    render(&state, phase);
                }
                None => break,
            }
        }
    }
}

/// Colored phase indicator, green/yellow/red for
/// connected/connecting/disconnected.
fn phase_tag(phase: LinkPhase) -> String {
    let color = match phase {
        LinkPhase::Connected => "\x1b[32m",
        LinkPhase::Connecting => "\x1b[33m",
        LinkPhase::Disconnected => "\x1b[31m",
    };
    format!("[{}{}\x1b[0m]", color, phase.as_str())
}

async fn run_demo(token: CancellationToken) {
    println!("[demo] playing built-in drive");
    let (patch_tx, mut patch_rx) = mpsc::channel(16);
    tokio::spawn(demo_loop(
        token.clone(),
        Duration::from_millis(200),
        patch_tx,
    ));

    let mut state = VehicleState::default();
    let mut last_label = "";
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                token.cancel();
                break;
            }
            patch = patch_rx.recv() => match patch {
                Some((patch, label)) => {
                    if label != last_label {
                        println!("[demo] {label}");
                        last_label = label;
                    }
                    state.merge_patch(&patch);
                    render(&state, LinkPhase::Connected);
                }
                None => break,
            }
        }
    }
}

/// One-line HUD rendering of the merged record.
fn render(state: &VehicleState, phase: LinkPhase) {
    let eta = state
        .est_arrival_ms
        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms as i64))
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let gear = if state.gear.is_empty() {
        "-"
    } else {
        state.gear.as_str()
    };
    let destination = if state.destination.is_empty() {
        "-"
    } else {
        state.destination.as_str()
    };
    println!(
        "{} {:>6.1} km/h | bat {:>5.1}% | gear {} | range {:>6.1} km | {} | {} (eta {})",
        phase_tag(phase),
        state.speed,
        state.battery_level,
        gear,
        state.range_km,
        state.car_state,
        destination,
        eta,
    );
}
