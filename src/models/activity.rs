// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Normalized activity model for storage and API.

use crate::models::{SplitSet, Track};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Where an activity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Uploaded file (TCX)
    ImportedFile,
    /// Pulled from the Strava API
    SyncedService,
}

impl SourceKind {
    /// Prefix of the idempotency key for this source.
    fn prefix(self) -> &'static str {
        match self {
            SourceKind::ImportedFile => "tcx",
            SourceKind::SyncedService => "strava",
        }
    }

    /// Build the idempotency key `"<source>_<providerActivityId>"`.
    pub fn external_id(self, provider_id: &str) -> String {
        format!("{}_{}", self.prefix(), provider_id.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Run,
    Walk,
    Cycling,
    Swimming,
    CrossTraining,
    Other,
}

impl ActivityType {
    /// Map a TCX `Sport` attribute.
    pub fn from_tcx_sport(sport: &str) -> Self {
        match sport.trim().to_ascii_lowercase().as_str() {
            "running" => ActivityType::Run,
            "biking" | "cycling" => ActivityType::Cycling,
            "walking" => ActivityType::Walk,
            "swimming" => ActivityType::Swimming,
            _ => ActivityType::Other,
        }
    }

    /// Map a Strava `sport_type`.
    pub fn from_strava_sport(sport_type: &str) -> Self {
        match sport_type {
            "Run" | "TrailRun" | "VirtualRun" => ActivityType::Run,
            "Walk" | "Hike" => ActivityType::Walk,
            "Ride" | "VirtualRide" | "MountainBikeRide" | "GravelRide" | "EBikeRide"
            | "EMountainBikeRide" | "Velomobile" | "Handcycle" => ActivityType::Cycling,
            "Swim" => ActivityType::Swimming,
            "Workout" | "WeightTraining" | "Crossfit" | "Elliptical" | "StairStepper"
            | "HighIntensityIntervalTraining" | "Rowing" | "Yoga" | "Pilates" => {
                ActivityType::CrossTraining
            }
            _ => ActivityType::Other,
        }
    }
}

/// The single internal representation every ingestion path produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedActivity {
    /// Idempotency key, unique per owning user
    pub external_id: String,
    pub source_kind: SourceKind,
    pub activity_type: ActivityType,
    pub name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub moving_time_seconds: f64,
    /// Never negative
    pub distance_meters: f64,
    pub avg_pace_sec_per_km: Option<f64>,
    pub best_pace_sec_per_km: Option<f64>,
    pub avg_heart_rate: Option<u16>,
    pub max_heart_rate: Option<u16>,
    pub elevation_gain_meters: Option<f64>,
    pub elevation_loss_meters: Option<f64>,
    pub avg_cadence: Option<u16>,
    pub calories: Option<u32>,
    pub track: Track,
    pub splits: SplitSet,
}

/// Stored activity document: the normalized activity plus its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub user_id: String,
    pub activity: NormalizedActivity,
    pub imported_at: DateTime<Utc>,
}
