// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! TCX (Garmin Training Center XML) decoding.
//!
//! Parsing is pure: the caller passes the document text and gets back one
//! [`ParsedActivity`] per `<Activity>` block. Elements are matched by local
//! name so both prefixed and default-namespace documents decode.
//!
//! TCX stores laps, trackpoints and a handful of device aggregates; average
//! pace, best pace, elevation gain/loss and moving time are derived here.

use crate::error::AppError;
use crate::models::{ActivityType, NormalizedActivity, SourceKind};
use crate::services::normalize::{
    elevation_gain_loss, is_valid_coordinate, pace_from_speed, pace_sec_per_km, to_split_set,
    to_track, RawLap, RawPoint,
};
use crate::time_utils::{format_utc_rfc3339, offset_by_seconds, parse_rfc3339_utc};
use chrono::{DateTime, Utc};
use geo::{Distance, Haversine, Point};
use roxmltree::{Document, Node};

const ROOT_ELEMENT: &str = "TrainingCenterDatabase";

/// Segments slower than this are treated as stopped when computing moving time.
const MOVING_SPEED_THRESHOLD_MPS: f64 = 0.5;

/// Errors from TCX decoding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TcxError {
    #[error("Document is not well-formed XML: {0}")]
    Malformed(String),

    #[error("Unexpected root element <{0}>, expected <TrainingCenterDatabase>")]
    UnexpectedRoot(String),

    #[error("Document has no <Activities> element")]
    MissingActivities,

    #[error("Activity {index} has no start time")]
    MissingStartTime { index: usize },

    #[error("Activity {index} has no laps")]
    MissingLaps { index: usize },

    #[error("Activity {index} has an out-of-range duration")]
    DurationOutOfRange { index: usize },
}

impl From<TcxError> for AppError {
    fn from(err: TcxError) -> Self {
        AppError::Parse(err.to_string())
    }
}

/// Result of decoding one TCX document.
///
/// Activities that fail to decode are reported in `rejected` without
/// affecting the others.
#[derive(Debug, Clone, Default)]
pub struct TcxDocument {
    pub activities: Vec<ParsedActivity>,
    pub rejected: Vec<TcxError>,
}

/// One decoded `<Activity>` with raw samples and derived metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedActivity {
    /// Contents of `<Id>` (the recording start time by convention)
    pub provider_id: String,
    pub sport: ActivityType,
    pub start_time: DateTime<Utc>,
    /// `start_time` plus the total time
    pub finished_at: DateTime<Utc>,
    pub total_time_seconds: f64,
    pub moving_time_seconds: f64,
    pub distance_meters: f64,
    pub calories: Option<f64>,
    pub avg_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub avg_cadence: Option<f64>,
    pub avg_pace_sec_per_km: Option<f64>,
    pub best_pace_sec_per_km: Option<f64>,
    pub elevation_gain_meters: Option<f64>,
    pub elevation_loss_meters: Option<f64>,
    pub points: Vec<RawPoint>,
    pub laps: Vec<RawLap>,
}

impl ParsedActivity {
    /// Build the normalized activity for this parsed block.
    pub fn into_normalized(self) -> NormalizedActivity {
        NormalizedActivity {
            external_id: SourceKind::ImportedFile.external_id(&self.provider_id),
            source_kind: SourceKind::ImportedFile,
            activity_type: self.sport,
            name: None,
            started_at: self.start_time,
            finished_at: self.finished_at,
            duration_seconds: self.total_time_seconds,
            moving_time_seconds: self.moving_time_seconds,
            distance_meters: self.distance_meters,
            avg_pace_sec_per_km: self.avg_pace_sec_per_km,
            best_pace_sec_per_km: self.best_pace_sec_per_km,
            avg_heart_rate: round_u16(self.avg_heart_rate),
            max_heart_rate: round_u16(self.max_heart_rate),
            elevation_gain_meters: self.elevation_gain_meters,
            elevation_loss_meters: self.elevation_loss_meters,
            avg_cadence: round_u16(self.avg_cadence),
            calories: self.calories.map(|c| c.round() as u32),
            track: to_track(self.points),
            splits: to_split_set(self.laps),
        }
    }
}

/// Trackpoint with the fields only needed for derivation.
struct Sample {
    point: RawPoint,
    distance: Option<f64>,
    speed: Option<f64>,
}

/// Lap with its device-reported maximum speed.
struct Lap {
    raw: RawLap,
    max_speed: Option<f64>,
}

/// Decode a TCX document.
///
/// Fails only when the document itself is unusable; missing optional
/// fields decode as `None`.
pub fn parse(xml: &str) -> Result<TcxDocument, TcxError> {
    let doc = Document::parse(xml).map_err(|e| TcxError::Malformed(e.to_string()))?;
    let root = doc.root_element();

    if root.tag_name().name() != ROOT_ELEMENT {
        return Err(TcxError::UnexpectedRoot(root.tag_name().name().to_string()));
    }

    let activities = child(root, "Activities").ok_or(TcxError::MissingActivities)?;

    let mut result = TcxDocument::default();
    for (index, node) in children(activities, "Activity").enumerate() {
        match parse_activity(node, index) {
            Ok(activity) => result.activities.push(activity),
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping undecodable TCX activity");
                result.rejected.push(e);
            }
        }
    }

    Ok(result)
}

fn parse_activity(node: Node, index: usize) -> Result<ParsedActivity, TcxError> {
    let sport = node
        .attribute("Sport")
        .map(ActivityType::from_tcx_sport)
        .unwrap_or(ActivityType::Other);

    let lap_nodes: Vec<Node> = children(node, "Lap").collect();
    if lap_nodes.is_empty() {
        return Err(TcxError::MissingLaps { index });
    }

    let mut laps = Vec::with_capacity(lap_nodes.len());
    let mut samples = Vec::new();
    for lap_node in &lap_nodes {
        laps.push(parse_lap(*lap_node));
        for track in children(*lap_node, "Track") {
            samples.extend(children(track, "Trackpoint").map(parse_trackpoint));
        }
    }

    let id = child_text(node, "Id");
    let start_time = id
        .and_then(parse_rfc3339_utc)
        .or_else(|| laps.iter().find_map(|l| l.raw.start_time))
        .or_else(|| samples.iter().find_map(|s| s.point.timestamp))
        .ok_or(TcxError::MissingStartTime { index })?;
    let provider_id = id
        .map(str::to_string)
        .unwrap_or_else(|| format_utc_rfc3339(start_time));

    let mut total_time_seconds: f64 = laps.iter().map(|l| l.raw.duration_seconds).sum();
    if total_time_seconds <= 0.0 {
        total_time_seconds = sample_time_span(&samples).unwrap_or(0.0);
    }

    let mut distance_meters: f64 = laps.iter().map(|l| l.raw.distance_meters).sum();
    if distance_meters <= 0.0 {
        distance_meters = samples
            .iter()
            .filter_map(|s| s.distance)
            .fold(0.0, f64::max);
    }

    let finished_at = offset_by_seconds(start_time, total_time_seconds)
        .ok_or(TcxError::DurationOutOfRange { index })?;

    let (elevation_gain_meters, elevation_loss_meters) =
        elevation_gain_loss(samples.iter().map(|s| s.point.elevation));

    let moving_time_seconds = moving_time(&samples)
        .map(|m| m.min(total_time_seconds))
        .unwrap_or(total_time_seconds);

    Ok(ParsedActivity {
        provider_id,
        sport,
        start_time,
        finished_at,
        total_time_seconds,
        moving_time_seconds,
        distance_meters,
        calories: sum_present(laps.iter().map(|l| l.raw.calories)),
        avg_heart_rate: weighted_lap_average(&laps, |l| l.avg_heart_rate)
            .or_else(|| mean(samples.iter().filter_map(|s| s.point.heart_rate))),
        max_heart_rate: laps
            .iter()
            .filter_map(|l| l.raw.max_heart_rate)
            .chain(samples.iter().filter_map(|s| s.point.heart_rate))
            .reduce(f64::max),
        avg_cadence: weighted_lap_average(&laps, |l| l.cadence)
            .or_else(|| mean(samples.iter().filter_map(|s| s.point.cadence))),
        avg_pace_sec_per_km: pace_sec_per_km(total_time_seconds, distance_meters),
        best_pace_sec_per_km: best_pace(&laps, &samples),
        elevation_gain_meters,
        elevation_loss_meters,
        points: samples.into_iter().map(|s| s.point).collect(),
        laps: laps.into_iter().map(|l| l.raw).collect(),
    })
}

fn parse_lap(node: Node) -> Lap {
    let extensions = child(node, "Extensions");
    let cadence = child_f64(node, "Cadence")
        .or_else(|| extensions.and_then(|e| descendant_f64(e, "AvgRunCadence")));

    Lap {
        raw: RawLap {
            start_time: node.attribute("StartTime").and_then(parse_rfc3339_utc),
            duration_seconds: child_f64(node, "TotalTimeSeconds").unwrap_or(0.0),
            distance_meters: child_f64(node, "DistanceMeters").unwrap_or(0.0),
            avg_heart_rate: child(node, "AverageHeartRateBpm").and_then(|n| child_f64(n, "Value")),
            max_heart_rate: child(node, "MaximumHeartRateBpm").and_then(|n| child_f64(n, "Value")),
            cadence,
            calories: child_f64(node, "Calories"),
        },
        max_speed: child_f64(node, "MaximumSpeed"),
    }
}

fn parse_trackpoint(node: Node) -> Sample {
    let position = child(node, "Position");
    let extensions = child(node, "Extensions");
    let cadence = child_f64(node, "Cadence")
        .or_else(|| extensions.and_then(|e| descendant_f64(e, "RunCadence")));

    Sample {
        point: RawPoint {
            lat: position.and_then(|p| child_f64(p, "LatitudeDegrees")),
            lon: position.and_then(|p| child_f64(p, "LongitudeDegrees")),
            elevation: child_f64(node, "AltitudeMeters"),
            timestamp: child_text(node, "Time").and_then(parse_rfc3339_utc),
            heart_rate: child(node, "HeartRateBpm").and_then(|n| child_f64(n, "Value")),
            cadence,
        },
        distance: child_f64(node, "DistanceMeters"),
        speed: extensions.and_then(|e| descendant_f64(e, "Speed")),
    }
}

/// Distance and elapsed seconds between two consecutive samples.
///
/// Uses the recorded cumulative distance when both samples carry it, and
/// the great-circle distance between positions otherwise.
fn segment(a: &Sample, b: &Sample) -> Option<(f64, f64)> {
    let dt = (b.point.timestamp? - a.point.timestamp?).num_milliseconds() as f64 / 1000.0;
    let dd = match (a.distance, b.distance) {
        (Some(da), Some(db)) => db - da,
        _ => {
            let (lat_a, lon_a) = (a.point.lat?, a.point.lon?);
            let (lat_b, lon_b) = (b.point.lat?, b.point.lon?);
            if !is_valid_coordinate(lat_a, lon_a) || !is_valid_coordinate(lat_b, lon_b) {
                return None;
            }
            Haversine.distance(Point::new(lon_a, lat_a), Point::new(lon_b, lat_b))
        }
    };
    Some((dd, dt))
}

/// Minimum positive pace over per-point and per-lap candidates.
///
/// Zero and negative speed samples are sensor noise and never count.
fn best_pace(laps: &[Lap], samples: &[Sample]) -> Option<f64> {
    let per_segment = samples
        .windows(2)
        .filter_map(|w| segment(&w[0], &w[1]))
        .filter_map(|(dd, dt)| pace_sec_per_km(dt, dd));
    let per_point_speed = samples.iter().filter_map(|s| s.speed).filter_map(pace_from_speed);
    let per_lap = laps
        .iter()
        .filter_map(|l| pace_sec_per_km(l.raw.duration_seconds, l.raw.distance_meters));
    let per_lap_max_speed = laps.iter().filter_map(|l| l.max_speed).filter_map(pace_from_speed);

    per_segment
        .chain(per_point_speed)
        .chain(per_lap)
        .chain(per_lap_max_speed)
        .filter(|p| *p > 0.0)
        .reduce(f64::min)
}

/// Seconds spent in segments at or above the moving threshold.
///
/// `None` when no segment carries both time and distance.
fn moving_time(samples: &[Sample]) -> Option<f64> {
    let mut measured = false;
    let mut moving = 0.0;
    for (dd, dt) in samples.windows(2).filter_map(|w| segment(&w[0], &w[1])) {
        if dt <= 0.0 {
            continue;
        }
        measured = true;
        if dd / dt >= MOVING_SPEED_THRESHOLD_MPS {
            moving += dt;
        }
    }
    measured.then_some(moving)
}

fn sample_time_span(samples: &[Sample]) -> Option<f64> {
    let first = samples.iter().find_map(|s| s.point.timestamp)?;
    let last = samples.iter().rev().find_map(|s| s.point.timestamp)?;
    Some((last - first).num_milliseconds() as f64 / 1000.0)
}

/// Lap average weighted by lap duration, over laps that report the value.
fn weighted_lap_average(laps: &[Lap], value: impl Fn(&RawLap) -> Option<f64>) -> Option<f64> {
    let (sum, weight) = laps
        .iter()
        .filter_map(|l| value(&l.raw).map(|v| (v, l.raw.duration_seconds.max(0.0))))
        .fold((0.0, 0.0), |(s, w), (v, d)| (s + v * d, w + d));
    (weight > 0.0).then(|| sum / weight)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

fn sum_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().reduce(|a, b| a + b)
}

fn round_u16(value: Option<f64>) -> Option<u16> {
    value
        .filter(|v| v.is_finite() && *v > 0.0 && *v < f64::from(u16::MAX))
        .map(|v| v.round() as u16)
}

// ─── XML helpers ─────────────────────────────────────────────

fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn child<'a, 'input: 'a>(node: Node<'a, 'input>, name: &'static str) -> Option<Node<'a, 'input>> {
    children(node, name).next()
}

fn child_text<'a, 'input: 'a>(node: Node<'a, 'input>, name: &'static str) -> Option<&'a str> {
    child(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn child_f64(node: Node, name: &'static str) -> Option<f64> {
    child_text(node, name)
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn descendant_f64(node: Node, name: &'static str) -> Option<f64> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| n.text())
        .and_then(|t| t.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
