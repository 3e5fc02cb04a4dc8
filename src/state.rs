use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Typed destination of one topic suffix.  The suffix table is closed:
/// anything not listed here produces zero field updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopicField {
    Speed,
    BatteryLevel,
    Power,
    ShiftState,
    IdealRangeKm,
    OutsideTemp,
    InsideTemp,
    Odometer,
    Heading,
    Elevation,
    Geofence,
    CarState,
    Locked,
    ChargerPower,
    TimeToFullCharge,
    ChargeLimitSoc,
    TpmsFrontLeft,
    TpmsFrontRight,
    TpmsRearLeft,
    TpmsRearRight,
    Destination,
    EstArrivalTime,
    TimeToArrival,
    ActiveRouteDestination,
    ActiveRouteMinutes,
    ActiveRoute,
}

/// Exact-match lookup from topic suffix to field kind, one dispatch instead
/// of a conditional chain.
pub fn field_for_suffix(suffix: &str) -> Option<TopicField> {
    use TopicField::*;
    Some(match suffix {
        "speed" => Speed,
        "battery_level" => BatteryLevel,
        "power" => Power,
        "shift_state" => ShiftState,
        "ideal_battery_range_km" => IdealRangeKm,
        "outside_temp" => OutsideTemp,
        "inside_temp" => InsideTemp,
        "odometer" => Odometer,
        "heading" => Heading,
        "elevation" => Elevation,
        "geofence" => Geofence,
        "state" => CarState,
        "locked" => Locked,
        "charger_power" => ChargerPower,
        "time_to_full_charge" => TimeToFullCharge,
        "charge_limit_soc" => ChargeLimitSoc,
        "tpms_pressure_fl" => TpmsFrontLeft,
        "tpms_pressure_fr" => TpmsFrontRight,
        "tpms_pressure_rl" => TpmsRearLeft,
        "tpms_pressure_rr" => TpmsRearRight,
        "destination" => Destination,
        "est_arrival_time" => EstArrivalTime,
        "time_to_arrival" => TimeToArrival,
        "active_route_destination" => ActiveRouteDestination,
        "active_route_minutes_to_arrival" => ActiveRouteMinutes,
        "active_route" => ActiveRoute,
        _ => return None,
    })
}

/// Suffix of `topic` under `{prefix}/cars/{car_id}/`, if the topic belongs
/// to the configured vehicle.
pub fn topic_suffix<'a>(topic: &'a str, prefix: &str, car_id: u32) -> Option<&'a str> {
    let base = format!("{prefix}/cars/{car_id}/");
    topic.strip_prefix(base.as_str())
}

/// Last reported position on the active route.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// The rich navigation payload.  Deserialized from the broker's snake_case
/// JSON, re-serialized camelCase for rendering.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"), default)]
pub struct ActiveRoute {
    pub destination: Option<String>,
    pub energy_at_arrival: Option<f64>,
    pub miles_to_arrival: Option<f64>,
    pub minutes_to_arrival: Option<f64>,
    pub traffic_minutes_delay: Option<f64>,
    pub location: Option<RouteLocation>,
    pub error: Option<String>,
}

/// Merged vehicle-state record consumed by rendering.  Built by successive
/// partial merges, fields not named by an update keep their prior value.
/// Starts zeroed/idle and lives for the whole display session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleState {
    pub speed: f64,
    pub battery_level: f64,
    pub power: f64,
    pub gear: String,
    pub range_km: f64,
    pub outside_temp: f64,
    pub inside_temp: f64,
    pub odometer: f64,
    pub heading: f64,
    pub elevation: f64,
    pub geofence: String,
    pub car_state: String,
    pub locked: bool,
    pub charging: bool,
    pub driving: bool,
    pub charger_power: f64,
    pub time_to_full_charge: f64,
    pub charge_limit_soc: f64,
    pub tpms_pressure_fl: f64,
    pub tpms_pressure_fr: f64,
    pub tpms_pressure_rl: f64,
    pub tpms_pressure_rr: f64,
    pub destination: String,
    pub time_to_arrival_min: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub est_arrival_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_route: Option<ActiveRoute>,
}

/// Lenient numeric parse.  Malformed input becomes NaN, rendering tolerates
/// the sentinel instead of crashing.
fn parse_num(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(f64::NAN)
}

/// Estimated arrival is always re-derived from the wall clock, never taken
/// from a payload timestamp, so the displayed clock value shifts as delay
/// estimates change mid-trip.
fn arrival_from_minutes(minutes: f64, now_ms: u64) -> Option<u64> {
    if minutes.is_finite() && minutes >= 0.0 {
        Some(now_ms + (minutes * 60_000.0) as u64)
    } else {
        None
    }
}

impl VehicleState {
    /// Merge one relayed (suffix, payload) pair into the record at wall
    /// clock `now_ms`.  Unknown suffixes are ignored, malformed payloads
    /// fall back to safe defaults, this never panics.
    ///
    /// Navigation data is last-write-wins per field: the legacy flat
    /// topics, the newer active_route_* flat topics, and the rich
    /// active_route object all write the same destination/arrival fields,
    /// and whichever arrived most recently holds them.
    pub fn apply(&mut self, suffix: &str, payload: &str, now_ms: u64) {
        let Some(field) = field_for_suffix(suffix) else {
            trace!("ignoring unknown topic suffix {suffix}");
            return;
        };
        match field {
            // speed is the one field with an explicit zero fallback
            TopicField::Speed => self.speed = payload.trim().parse().unwrap_or(0.0),
            TopicField::BatteryLevel => self.battery_level = parse_num(payload),
            TopicField::Power => self.power = parse_num(payload),
            TopicField::ShiftState => self.gear = payload.to_string(),
            TopicField::IdealRangeKm => self.range_km = parse_num(payload),
            TopicField::OutsideTemp => self.outside_temp = parse_num(payload),
            TopicField::InsideTemp => self.inside_temp = parse_num(payload),
            TopicField::Odometer => self.odometer = parse_num(payload),
            TopicField::Heading => self.heading = parse_num(payload),
            TopicField::Elevation => self.elevation = parse_num(payload),
            TopicField::Geofence => self.geofence = payload.to_string(),
            TopicField::CarState => {
                self.car_state = payload.to_string();
                self.charging = payload == "charging";
                self.driving = payload == "driving";
            }
            TopicField::Locked => self.locked = payload == "true",
            TopicField::ChargerPower => self.charger_power = parse_num(payload),
            TopicField::TimeToFullCharge => self.time_to_full_charge = parse_num(payload),
            TopicField::ChargeLimitSoc => self.charge_limit_soc = parse_num(payload),
            TopicField::TpmsFrontLeft => self.tpms_pressure_fl = parse_num(payload),
            TopicField::TpmsFrontRight => self.tpms_pressure_fr = parse_num(payload),
            TopicField::TpmsRearLeft => self.tpms_pressure_rl = parse_num(payload),
            TopicField::TpmsRearRight => self.tpms_pressure_rr = parse_num(payload),
            TopicField::Destination => self.destination = payload.to_string(),
            TopicField::EstArrivalTime => {
                self.est_arrival_ms = chrono::DateTime::parse_from_rfc3339(payload.trim())
                    .ok()
                    .map(|t| t.timestamp_millis() as u64);
            }
            TopicField::TimeToArrival => self.time_to_arrival_min = parse_num(payload),
            TopicField::ActiveRouteDestination => self.destination = payload.to_string(),
            TopicField::ActiveRouteMinutes => {
                let minutes = parse_num(payload);
                self.time_to_arrival_min = minutes;
                self.est_arrival_ms = arrival_from_minutes(minutes, now_ms);
            }
            TopicField::ActiveRoute => self.apply_active_route(payload, now_ms),
        }
    }

    fn apply_active_route(&mut self, payload: &str, now_ms: u64) {
        let route: ActiveRoute = match serde_json::from_str(payload) {
            Ok(route) => route,
            Err(err) => {
                // never keep a partially parsed route around
                warn!("discarding unparsable active_route payload: {err}");
                self.active_route = None;
                return;
            }
        };
        if route.error.is_some() {
            // an explicit routing error erases stale navigation state
            self.destination.clear();
            self.time_to_arrival_min = 0.0;
            self.est_arrival_ms = None;
            self.active_route = None;
            return;
        }
        if let Some(destination) = &route.destination {
            self.destination = destination.clone();
        }
        if let Some(minutes) = route.minutes_to_arrival {
            self.time_to_arrival_min = minutes;
            self.est_arrival_ms = arrival_from_minutes(minutes, now_ms);
        }
        self.active_route = Some(route);
    }
}
