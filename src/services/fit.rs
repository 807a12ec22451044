// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Structured workout export as a FIT workout file.
//!
//! Layout:
//! - 14-byte file header with its own CRC
//! - `file_id`, `workout` and one `workout_step` message per leaf step,
//!   each preceded once by its definition message
//! - CRC over header and data
//!
//! FIT records carry no CRC of their own; the header CRC and the file CRC
//! are the only integrity checks.
//!
//! Repeat blocks are not unrolled: the repeated steps are written once,
//! followed by a `repeat_until_steps_cmplt` step pointing back at the first
//! of them. Output depends only on the input, never on the clock.

use crate::error::AppError;
use crate::models::{
    ActivityType, DurationTarget, Intensity, IntensityTarget, StepNode, StepTarget,
    WorkoutExport,
};

/// Deepest allowed nesting of repeat blocks.
pub const MAX_REPEAT_DEPTH: usize = 4;

/// Longest title written to the file, in bytes (excluding the NUL).
pub const MAX_TITLE_LEN: usize = 31;

const DEFAULT_TITLE: &str = "Workout";

const HEADER_SIZE: u8 = 14;
const PROTOCOL_VERSION: u8 = 0x20;
const PROFILE_VERSION: u16 = 2140;
const DATA_TYPE: &[u8; 4] = b".FIT";

// Base types
const ENUM: u8 = 0x00;
const STRING: u8 = 0x07;
const UINT16: u8 = 0x84;
const UINT32: u8 = 0x86;

const INVALID_ENUM: u8 = 0xFF;
const INVALID_UINT32: u32 = 0xFFFF_FFFF;

// Global message numbers
const MESG_FILE_ID: u16 = 0;
const MESG_WORKOUT: u16 = 26;
const MESG_WORKOUT_STEP: u16 = 27;

// Local message types
const LOCAL_FILE_ID: u8 = 0;
const LOCAL_WORKOUT: u8 = 1;
const LOCAL_WORKOUT_STEP: u8 = 2;

const FILE_TYPE_WORKOUT: u8 = 5;
const MANUFACTURER_DEVELOPMENT: u16 = 255;

// wkt_step_duration
const DURATION_TIME: u8 = 0;
const DURATION_DISTANCE: u8 = 1;
const DURATION_OPEN: u8 = 5;
const DURATION_REPEAT_UNTIL_STEPS_CMPLT: u8 = 6;

// wkt_step_target
const TARGET_SPEED: u8 = 0;
const TARGET_HEART_RATE: u8 = 1;
const TARGET_OPEN: u8 = 2;
const TARGET_CADENCE: u8 = 3;

/// Custom heart-rate targets are offset by 100 to distinguish them from zones.
const HEART_RATE_OFFSET: u32 = 100;

/// Definition of one field: (field number, size in bytes, base type).
type FieldDef = (u8, u8, u8);

const FILE_ID_FIELDS: &[FieldDef] = &[(0, 1, ENUM), (1, 2, UINT16), (2, 2, UINT16)];

const WORKOUT_FIELDS: &[FieldDef] = &[
    (8, MAX_TITLE_LEN as u8 + 1, STRING),
    (4, 1, ENUM),
    (6, 2, UINT16),
];

const WORKOUT_STEP_FIELDS: &[FieldDef] = &[
    (254, 2, UINT16),
    (1, 1, ENUM),
    (2, 4, UINT32),
    (3, 1, ENUM),
    (4, 4, UINT32),
    (5, 4, UINT32),
    (6, 4, UINT32),
    (7, 1, ENUM),
];

/// Errors from workout encoding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("Repeat blocks nested deeper than {max} levels")]
    TooDeep { max: usize },

    #[error("Repeat count must be at least 1")]
    ZeroRepeatCount,

    #[error("Repeat block has no steps")]
    EmptyRepeat,

    #[error("Workout has more steps than the format can index")]
    TooManySteps,

    #[error("Invalid step duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid step target: {0}")]
    InvalidTarget(String),
}

impl From<EncodeError> for AppError {
    fn from(err: EncodeError) -> Self {
        AppError::Encoding(err.to_string())
    }
}

/// One `workout_step` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FlatStep {
    duration_type: u8,
    duration_value: u32,
    target_type: u8,
    target_value: u32,
    custom_low: u32,
    custom_high: u32,
    intensity: u8,
}

/// Encode a workout as a FIT file.
pub fn encode(workout: &WorkoutExport) -> Result<Vec<u8>, EncodeError> {
    let steps = flatten_workout(workout)?;
    let num_steps = u16::try_from(steps.len()).map_err(|_| EncodeError::TooManySteps)?;

    let mut data = Vec::with_capacity(64 + steps.len() * 24);

    write_definition(&mut data, LOCAL_FILE_ID, MESG_FILE_ID, FILE_ID_FIELDS);
    data.push(LOCAL_FILE_ID);
    data.push(FILE_TYPE_WORKOUT);
    data.extend_from_slice(&MANUFACTURER_DEVELOPMENT.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());

    write_definition(&mut data, LOCAL_WORKOUT, MESG_WORKOUT, WORKOUT_FIELDS);
    data.push(LOCAL_WORKOUT);
    let mut name = [0u8; MAX_TITLE_LEN + 1];
    let title = sanitize_title(&workout.title);
    name[..title.len()].copy_from_slice(title.as_bytes());
    data.extend_from_slice(&name);
    data.push(sport_code(workout.activity_type));
    data.extend_from_slice(&num_steps.to_le_bytes());

    write_definition(
        &mut data,
        LOCAL_WORKOUT_STEP,
        MESG_WORKOUT_STEP,
        WORKOUT_STEP_FIELDS,
    );
    for (index, step) in steps.iter().enumerate() {
        data.push(LOCAL_WORKOUT_STEP);
        data.extend_from_slice(&(index as u16).to_le_bytes());
        data.push(step.duration_type);
        data.extend_from_slice(&step.duration_value.to_le_bytes());
        data.push(step.target_type);
        data.extend_from_slice(&step.target_value.to_le_bytes());
        data.extend_from_slice(&step.custom_low.to_le_bytes());
        data.extend_from_slice(&step.custom_high.to_le_bytes());
        data.push(step.intensity);
    }

    let data_len = u32::try_from(data.len()).map_err(|_| EncodeError::TooManySteps)?;

    let mut file = Vec::with_capacity(HEADER_SIZE as usize + data.len() + 2);
    file.push(HEADER_SIZE);
    file.push(PROTOCOL_VERSION);
    file.extend_from_slice(&PROFILE_VERSION.to_le_bytes());
    file.extend_from_slice(&data_len.to_le_bytes());
    file.extend_from_slice(DATA_TYPE);
    let header_crc = crc16(&file);
    file.extend_from_slice(&header_crc.to_le_bytes());

    file.extend_from_slice(&data);
    let file_crc = crc16(&file);
    file.extend_from_slice(&file_crc.to_le_bytes());

    tracing::debug!(
        steps = steps.len(),
        bytes = file.len(),
        "Encoded workout file"
    );
    Ok(file)
}

/// Reduce a title to the format's character set and length.
///
/// Keeps printable ASCII, collapses whitespace, and truncates to
/// [`MAX_TITLE_LEN`] bytes. An empty result becomes `"Workout"`.
pub fn sanitize_title(title: &str) -> String {
    let printable: String = title
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect();
    let collapsed = printable.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_TITLE_LEN).collect();
    let trimmed = truncated.trim_end();

    if trimmed.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// FIT CRC-16 (nibble table form).
pub fn crc16(data: &[u8]) -> u16 {
    const CRC_TABLE: [u16; 16] = [
        0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
        0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
    ];

    data.iter().fold(0u16, |crc, byte| {
        let mut tmp = CRC_TABLE[(crc & 0xF) as usize];
        let mut crc = (crc >> 4) & 0x0FFF;
        crc ^= tmp ^ CRC_TABLE[(byte & 0xF) as usize];
        tmp = CRC_TABLE[(crc & 0xF) as usize];
        crc = (crc >> 4) & 0x0FFF;
        crc ^ tmp ^ CRC_TABLE[((byte >> 4) & 0xF) as usize]
    })
}

fn write_definition(buf: &mut Vec<u8>, local: u8, global: u16, fields: &[FieldDef]) {
    buf.push(0x40 | local);
    buf.push(0); // reserved
    buf.push(0); // little-endian
    buf.extend_from_slice(&global.to_le_bytes());
    buf.push(fields.len() as u8);
    for (num, size, base_type) in fields {
        buf.extend_from_slice(&[*num, *size, *base_type]);
    }
}

/// The steps to encode, synthesizing one from the fallbacks when the
/// structure is missing or empty. A zero or non-finite fallback counts as
/// absent, so an unstructured workout always yields a file.
fn flatten_workout(workout: &WorkoutExport) -> Result<Vec<FlatStep>, EncodeError> {
    let mut steps = Vec::new();
    match workout.structure.as_ref().filter(|s| !s.steps.is_empty()) {
        Some(structure) => flatten(&structure.steps, 0, &mut steps)?,
        None => {
            let minutes = workout.fallback_duration_minutes.filter(|m| *m > 0);
            let km = workout
                .fallback_distance_km
                .filter(|km| km.is_finite() && *km > 0.0);
            let duration = if let Some(minutes) = minutes {
                DurationTarget::Time {
                    seconds: minutes.saturating_mul(60),
                }
            } else if let Some(km) = km {
                DurationTarget::Distance {
                    meters: km * 1000.0,
                }
            } else {
                DurationTarget::Open
            };
            steps.push(leaf_step(&duration, &IntensityTarget::default())?);
        }
    }
    Ok(steps)
}

fn flatten(nodes: &[StepNode], depth: usize, out: &mut Vec<FlatStep>) -> Result<(), EncodeError> {
    for node in nodes {
        match node {
            StepNode::Simple {
                duration_target,
                intensity_target,
            } => out.push(leaf_step(duration_target, intensity_target)?),
            StepNode::Repeat { count, steps } => {
                let level = depth + 1;
                if level > MAX_REPEAT_DEPTH {
                    return Err(EncodeError::TooDeep {
                        max: MAX_REPEAT_DEPTH,
                    });
                }
                if *count == 0 {
                    return Err(EncodeError::ZeroRepeatCount);
                }
                if steps.is_empty() {
                    return Err(EncodeError::EmptyRepeat);
                }

                let first = out.len();
                flatten(steps, level, out)?;
                if out.len() >= usize::from(u16::MAX) {
                    return Err(EncodeError::TooManySteps);
                }
                out.push(FlatStep {
                    duration_type: DURATION_REPEAT_UNTIL_STEPS_CMPLT,
                    duration_value: first as u32,
                    target_type: INVALID_ENUM,
                    target_value: *count,
                    custom_low: INVALID_UINT32,
                    custom_high: INVALID_UINT32,
                    intensity: INVALID_ENUM,
                });
            }
        }
        if out.len() >= usize::from(u16::MAX) {
            return Err(EncodeError::TooManySteps);
        }
    }
    Ok(())
}

fn leaf_step(duration: &DurationTarget, target: &IntensityTarget) -> Result<FlatStep, EncodeError> {
    let (duration_type, duration_value) = match duration {
        DurationTarget::Time { seconds } => {
            if *seconds == 0 {
                return Err(EncodeError::InvalidDuration("zero time".to_string()));
            }
            let millis = seconds.checked_mul(1000).ok_or_else(|| {
                EncodeError::InvalidDuration(format!("{} seconds is too long", seconds))
            })?;
            (DURATION_TIME, millis)
        }
        DurationTarget::Distance { meters } => {
            let centimeters = meters * 100.0;
            if !centimeters.is_finite() || centimeters < 1.0 || centimeters >= f64::from(u32::MAX)
            {
                return Err(EncodeError::InvalidDuration(format!(
                    "distance {} m out of range",
                    meters
                )));
            }
            (DURATION_DISTANCE, centimeters.round() as u32)
        }
        DurationTarget::Open => (DURATION_OPEN, INVALID_UINT32),
    };

    let (target_type, custom_low, custom_high) = match &target.target {
        StepTarget::Open => (TARGET_OPEN, INVALID_UINT32, INVALID_UINT32),
        StepTarget::HeartRate { low_bpm, high_bpm } => {
            if low_bpm > high_bpm || *low_bpm == 0 {
                return Err(EncodeError::InvalidTarget(format!(
                    "heart rate range {}-{}",
                    low_bpm, high_bpm
                )));
            }
            (
                TARGET_HEART_RATE,
                u32::from(*low_bpm) + HEART_RATE_OFFSET,
                u32::from(*high_bpm) + HEART_RATE_OFFSET,
            )
        }
        StepTarget::Pace {
            fastest_sec_per_km,
            slowest_sec_per_km,
        } => {
            if *fastest_sec_per_km == 0 || fastest_sec_per_km > slowest_sec_per_km {
                return Err(EncodeError::InvalidTarget(format!(
                    "pace range {}-{} s/km",
                    fastest_sec_per_km, slowest_sec_per_km
                )));
            }
            // Slower pace is the lower speed bound.
            (
                TARGET_SPEED,
                pace_to_speed_mm_per_s(*slowest_sec_per_km),
                pace_to_speed_mm_per_s(*fastest_sec_per_km),
            )
        }
        StepTarget::Cadence { low, high } => {
            if low > high {
                return Err(EncodeError::InvalidTarget(format!(
                    "cadence range {}-{}",
                    low, high
                )));
            }
            (TARGET_CADENCE, u32::from(*low), u32::from(*high))
        }
    };

    Ok(FlatStep {
        duration_type,
        duration_value,
        target_type,
        target_value: 0,
        custom_low,
        custom_high,
        intensity: intensity_code(target.intensity),
    })
}

/// FIT speeds are m/s scaled by 1000.
fn pace_to_speed_mm_per_s(sec_per_km: u32) -> u32 {
    (1_000_000.0 / f64::from(sec_per_km)).round() as u32
}

fn intensity_code(intensity: Intensity) -> u8 {
    match intensity {
        Intensity::Active => 0,
        Intensity::Rest => 1,
        Intensity::Warmup => 2,
        Intensity::Cooldown => 3,
        Intensity::Recovery => 4,
        Intensity::Interval => 5,
    }
}

fn sport_code(activity_type: ActivityType) -> u8 {
    match activity_type {
        ActivityType::Other => 0,
        ActivityType::Run => 1,
        ActivityType::Cycling => 2,
        ActivityType::Swimming => 5,
        ActivityType::CrossTraining => 10,
        ActivityType::Walk => 11,
    }
}
