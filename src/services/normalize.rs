// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Time-series normalization shared by the TCX and Strava ingestion paths.
//!
//! Both parsers hand over loosely-typed samples; everything downstream
//! (charts, maps, the splits table) only ever sees [`Track`] and [`SplitSet`].

use crate::models::{Split, SplitSet, Track, Trackpoint};
use chrono::{DateTime, Utc};

/// A sample as delivered by a parser, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPoint {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub elevation: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub heart_rate: Option<f64>,
    pub cadence: Option<f64>,
}

/// A lap as delivered by a parser. Any source lap index is ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawLap {
    pub start_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub distance_meters: f64,
    pub avg_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub cadence: Option<f64>,
    pub calories: Option<f64>,
}

/// Convert raw samples into a track, dropping samples without a valid position.
///
/// Samples whose timestamp goes backwards relative to the previous kept
/// sample are dropped as well, so timestamps in the result never decrease.
pub fn to_track<I>(points: I) -> Track
where
    I: IntoIterator<Item = RawPoint>,
{
    let mut track = Track::new();
    let mut last_time: Option<DateTime<Utc>> = None;
    let mut dropped = 0usize;

    for point in points {
        let (lat, lon) = match (point.lat, point.lon) {
            (Some(lat), Some(lon)) if is_valid_coordinate(lat, lon) => (lat, lon),
            _ => {
                dropped += 1;
                continue;
            }
        };

        if let (Some(prev), Some(ts)) = (last_time, point.timestamp) {
            if ts < prev {
                dropped += 1;
                continue;
            }
        }
        if point.timestamp.is_some() {
            last_time = point.timestamp;
        }

        track.push(Trackpoint {
            lat,
            lon,
            elevation: point.elevation.filter(|e| e.is_finite()),
            timestamp: point.timestamp,
            heart_rate: to_sensor_value(point.heart_rate),
            cadence: to_sensor_value(point.cadence),
        });
    }

    if dropped > 0 {
        tracing::debug!(dropped, kept = track.len(), "Dropped invalid trackpoints");
    }
    track
}

/// Convert raw laps into splits numbered 1..=n.
pub fn to_split_set<I>(laps: I) -> SplitSet
where
    I: IntoIterator<Item = RawLap>,
{
    laps.into_iter()
        .enumerate()
        .map(|(idx, lap)| {
            let duration_seconds = non_negative(lap.duration_seconds);
            let distance_meters = non_negative(lap.distance_meters);
            Split {
                lap_number: idx as u32 + 1,
                start_time: lap.start_time,
                duration_seconds,
                distance_meters,
                pace_sec_per_km: pace_sec_per_km(duration_seconds, distance_meters),
                avg_heart_rate: to_sensor_value(lap.avg_heart_rate),
                max_heart_rate: to_sensor_value(lap.max_heart_rate),
                cadence: to_sensor_value(lap.cadence),
                calories: lap
                    .calories
                    .filter(|c| c.is_finite() && *c > 0.0)
                    .map(|c| c.round() as u32)
                    .unwrap_or(0),
            }
        })
        .collect()
}

/// Latitude in [-90, 90] and longitude in [-180, 180], both finite.
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Pace in whole seconds per km; `None` unless both time and distance are positive.
pub fn pace_sec_per_km(seconds: f64, meters: f64) -> Option<f64> {
    if !(seconds.is_finite() && meters.is_finite()) || seconds <= 0.0 || meters <= 0.0 {
        return None;
    }
    Some((seconds / (meters / 1000.0)).round())
}

/// Pace in whole seconds per km for a speed in m/s; `None` for non-positive speeds.
pub fn pace_from_speed(meters_per_second: f64) -> Option<f64> {
    if !meters_per_second.is_finite() || meters_per_second <= 0.0 {
        return None;
    }
    Some((1000.0 / meters_per_second).round())
}

/// Sum positive and negative deltas between consecutive present samples.
///
/// Missing samples are skipped without resetting the accumulator. Loss is
/// reported as a positive magnitude. Returns `(None, None)` when fewer than
/// two samples are present.
pub fn elevation_gain_loss<I>(samples: I) -> (Option<f64>, Option<f64>)
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut prev: Option<f64> = None;
    let mut gain = 0.0;
    let mut loss = 0.0;
    let mut deltas = 0usize;

    for elevation in samples.into_iter().flatten().filter(|e| e.is_finite()) {
        if let Some(p) = prev {
            let delta = elevation - p;
            if delta > 0.0 {
                gain += delta;
            } else {
                loss -= delta;
            }
            deltas += 1;
        }
        prev = Some(elevation);
    }

    if deltas == 0 {
        (None, None)
    } else {
        (Some(gain), Some(loss))
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Heart rate / cadence readings: drop zero, negative and absurd values.
fn to_sensor_value(value: Option<f64>) -> Option<u16> {
    value
        .filter(|v| v.is_finite() && *v > 0.0 && *v < f64::from(u16::MAX))
        .map(|v| v.round() as u16)
}
