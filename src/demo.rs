use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::state::VehicleState;

/// Partial vehicle state carried by a demo keyframe.  Unset fields keep
/// their prior value when merged, the same contract live updates follow.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatePatch {
    pub speed: Option<f64>,
    pub battery_level: Option<f64>,
    pub power: Option<f64>,
    pub range_km: Option<f64>,
    pub time_to_arrival_min: Option<f64>,
    pub gear: Option<&'static str>,
    pub car_state: Option<&'static str>,
    pub destination: Option<&'static str>,
}

/// One point on the demo timeline.
pub struct Keyframe {
    pub at_ms: u64,
    pub label: &'static str,
    pub patch: StatePatch,
}

impl VehicleState {
    /// Merge a demo patch into the record.
    pub fn merge_patch(&mut self, patch: &StatePatch) {
        if let Some(speed) = patch.speed {
            self.speed = speed;
        }
        if let Some(battery_level) = patch.battery_level {
            self.battery_level = battery_level;
        }
        if let Some(power) = patch.power {
            self.power = power;
        }
        if let Some(range_km) = patch.range_km {
            self.range_km = range_km;
        }
        if let Some(minutes) = patch.time_to_arrival_min {
            self.time_to_arrival_min = minutes;
        }
        if let Some(gear) = patch.gear {
            self.gear = gear.to_string();
        }
        if let Some(car_state) = patch.car_state {
            self.car_state = car_state.to_string();
            self.charging = car_state == "charging";
            self.driving = car_state == "driving";
        }
        if let Some(destination) = patch.destination {
            self.destination = destination.to_string();
        }
    }
}

fn lerp_opt(a: Option<f64>, b: Option<f64>, t: f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + (b - a) * t),
        (Some(a), None) => Some(a),
        (None, Some(b)) => (t >= 0.5).then_some(b),
        (None, None) => None,
    }
}

fn step_opt<T: Copy>(a: Option<T>, b: Option<T>, t: f64) -> Option<T> {
    if t < 0.5 {
        a
    } else {
        b.or(a)
    }
}

/// Interpolated patch and segment label for `elapsed_ms` on the timeline.
/// Numeric fields are linearly interpolated between the two bracketing
/// keyframes, non-numeric fields step over at the segment midpoint.
pub fn sample(frames: &[Keyframe], elapsed_ms: u64) -> (StatePatch, &'static str) {
    let Some(first) = frames.first() else {
        return (StatePatch::default(), "");
    };
    if elapsed_ms <= first.at_ms {
        return (first.patch.clone(), first.label);
    }
    let last = frames.last().expect("frames is non-empty");
    if elapsed_ms >= last.at_ms {
        return (last.patch.clone(), last.label);
    }
    let idx = frames
        .iter()
        .position(|frame| frame.at_ms > elapsed_ms)
        .expect("elapsed is before the last keyframe");
    let (prev, next) = (&frames[idx - 1], &frames[idx]);
    let span = (next.at_ms - prev.at_ms).max(1) as f64;
    let t = (elapsed_ms - prev.at_ms) as f64 / span;

    let patch = StatePatch {
        speed: lerp_opt(prev.patch.speed, next.patch.speed, t),
        battery_level: lerp_opt(prev.patch.battery_level, next.patch.battery_level, t),
        power: lerp_opt(prev.patch.power, next.patch.power, t),
        range_km: lerp_opt(prev.patch.range_km, next.patch.range_km, t),
        time_to_arrival_min: lerp_opt(
            prev.patch.time_to_arrival_min,
            next.patch.time_to_arrival_min,
            t,
        ),
        gear: step_opt(prev.patch.gear, next.patch.gear, t),
        car_state: step_opt(prev.patch.car_state, next.patch.car_state, t),
        destination: step_opt(prev.patch.destination, next.patch.destination, t),
    };
    (patch, prev.label)
}

/// A short city drive: depart, cruise, arrive, plug in.
pub fn demo_drive() -> Vec<Keyframe> {
    vec![
        Keyframe {
            at_ms: 0,
            label: "parked at home",
            patch: StatePatch {
                speed: Some(0.0),
                battery_level: Some(88.0),
                power: Some(0.0),
                range_km: Some(310.0),
                time_to_arrival_min: Some(0.0),
                gear: Some("P"),
                car_state: Some("online"),
                destination: Some(""),
            },
        },
        Keyframe {
            at_ms: 8_000,
            label: "pulling out",
            patch: StatePatch {
                speed: Some(25.0),
                power: Some(18.0),
                time_to_arrival_min: Some(28.0),
                gear: Some("D"),
                car_state: Some("driving"),
                destination: Some("Amsterdam Centraal"),
                ..Default::default()
            },
        },
        Keyframe {
            at_ms: 25_000,
            label: "on the motorway",
            patch: StatePatch {
                speed: Some(118.0),
                battery_level: Some(84.0),
                power: Some(34.0),
                range_km: Some(292.0),
                time_to_arrival_min: Some(19.0),
                ..Default::default()
            },
        },
        Keyframe {
            at_ms: 48_000,
            label: "city traffic",
            patch: StatePatch {
                speed: Some(32.0),
                battery_level: Some(81.0),
                power: Some(9.0),
                range_km: Some(281.0),
                time_to_arrival_min: Some(6.0),
                ..Default::default()
            },
        },
        Keyframe {
            at_ms: 60_000,
            label: "arriving",
            patch: StatePatch {
                speed: Some(0.0),
                battery_level: Some(80.0),
                power: Some(0.0),
                range_km: Some(278.0),
                time_to_arrival_min: Some(0.0),
                gear: Some("P"),
                car_state: Some("online"),
                ..Default::default()
            },
        },
        Keyframe {
            at_ms: 75_000,
            label: "charging",
            patch: StatePatch {
                speed: Some(0.0),
                battery_level: Some(83.0),
                power: Some(-11.0),
                range_km: Some(289.0),
                car_state: Some("charging"),
                destination: Some(""),
                ..Default::default()
            },
        },
    ]
}

/// Plays the built-in drive into `out` until cancelled, looping from the
/// top when the timeline runs out.
pub async fn demo_loop(
    cancel_token: CancellationToken,
    tick: Duration,
    out: Sender<(StatePatch, &'static str)>,
) {
    let frames = demo_drive();
    let total = frames.last().map(|frame| frame.at_ms).unwrap_or(0).max(1);
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(tick);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("shutting down demo loop");
                break;
            }
            _ = ticker.tick() => {
                let elapsed = started.elapsed().as_millis() as u64 % total;
                let (patch, label) = sample(&frames, elapsed);
                if out.send((patch, label)).await.is_err() {
                    break;
                }
            }
        }
    }
}
