// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Canonical time-series shapes shared by every ingestion path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One GPS/sensor sample with a valid position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trackpoint {
    pub lat: f64,
    pub lon: f64,
    pub elevation: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub heart_rate: Option<u16>,
    pub cadence: Option<u16>,
}

/// Ordered trackpoints; empty when the activity has no recorded stream.
pub type Track = Vec<Trackpoint>;

/// One lap with derived aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    /// 1-based, sequential within the activity
    pub lap_number: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub distance_meters: f64,
    /// `None` when the lap covers no distance
    pub pace_sec_per_km: Option<f64>,
    pub avg_heart_rate: Option<u16>,
    pub max_heart_rate: Option<u16>,
    pub cadence: Option<u16>,
    pub calories: u32,
}

/// Ordered splits with `lap_number` strictly increasing from 1.
pub type SplitSet = Vec<Split>;
