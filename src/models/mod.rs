// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod token;
pub mod track;
pub mod workout;

pub use activity::{ActivityRecord, ActivityType, NormalizedActivity, SourceKind};
pub use token::TokenState;
pub use track::{Split, SplitSet, Track, Trackpoint};
pub use workout::{
    DurationTarget, Intensity, IntensityTarget, StepNode, StepTarget, WorkoutExport,
    WorkoutStructure,
};
