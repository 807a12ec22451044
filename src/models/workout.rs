// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Structured workout plans (authored upstream, read by the encoder).

use crate::models::ActivityType;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// How long a step lasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DurationTarget {
    Time { seconds: u32 },
    Distance { meters: f64 },
    /// Ends when the athlete presses lap
    Open,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    #[default]
    Active,
    Rest,
    Warmup,
    Cooldown,
    Recovery,
    Interval,
}

/// What the athlete should hold during a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepTarget {
    #[default]
    Open,
    HeartRate { low_bpm: u16, high_bpm: u16 },
    Pace {
        fastest_sec_per_km: u32,
        slowest_sec_per_km: u32,
    },
    Cadence { low: u16, high: u16 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntensityTarget {
    #[serde(default)]
    pub intensity: Intensity,
    #[serde(default)]
    pub target: StepTarget,
}

/// A workout step: a leaf, or a block repeated `count` times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepNode {
    Simple {
        duration_target: DurationTarget,
        #[serde(default)]
        intensity_target: IntensityTarget,
    },
    Repeat { count: u32, steps: Vec<StepNode> },
}

impl StepNode {
    /// Leaf step with an open target at active intensity.
    pub fn simple(duration_target: DurationTarget) -> Self {
        StepNode::Simple {
            duration_target,
            intensity_target: IntensityTarget::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkoutStructure {
    #[serde(default)]
    pub steps: Vec<StepNode>,
}

/// A workout to be exported as a device file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct WorkoutExport {
    #[validate(length(max = 200))]
    pub title: String,
    pub activity_type: ActivityType,
    #[serde(default)]
    pub structure: Option<WorkoutStructure>,
    #[validate(range(min = 1, max = 1440))]
    #[serde(default)]
    pub fallback_duration_minutes: Option<u32>,
    #[validate(range(min = 0.01, max = 1000.0))]
    #[serde(default)]
    pub fallback_distance_km: Option<f64>,
}
