//! Request types for the external song cover pipeline.

mod command;

use std::{fmt, path::PathBuf, str::FromStr};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ModelEntry;

pub use command::{CommandPipeline, PipelineSettings};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PitchDetection {
    #[default]
    Rmvpe,
    MangioCrepe,
}

impl PitchDetection {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PitchDetection::Rmvpe => "rmvpe",
            PitchDetection::MangioCrepe => "mangio-crepe",
        }
    }
}

impl FromStr for PitchDetection {
    type Err = ParamError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "rmvpe" => Ok(PitchDetection::Rmvpe),
            "mangio-crepe" => Ok(PitchDetection::MangioCrepe),
            other => Err(ParamError::UnknownChoice {
                field: "pitch detection",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp3,
    Wav,
}

impl OutputFormat {
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ParamError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mp3" => Ok(OutputFormat::Mp3),
            "wav" => Ok(OutputFormat::Wav),
            other => Err(ParamError::UnknownChoice {
                field: "output format",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("{field} must be within {min}..={max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("unknown {field} `{value}`")]
    UnknownChoice { field: &'static str, value: String },
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Tunables of one cover generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CoverParams {
    /// Vocal pitch change in octaves.
    pub pitch: i32,
    /// Pitch change of vocals and instrumentals together, in semitones.
    pub pitch_all: i32,
    pub keep_files: bool,
    pub main_gain: i32,
    pub backup_gain: i32,
    pub inst_gain: i32,
    pub index_rate: f32,
    pub filter_radius: u32,
    pub rms_mix_rate: f32,
    pub protect: f32,
    pub f0_method: PitchDetection,
    pub crepe_hop_length: u32,
    pub reverb_room_size: f32,
    pub reverb_wet: f32,
    pub reverb_dry: f32,
    pub reverb_damping: f32,
    pub output_format: OutputFormat,
}

impl Default for CoverParams {
    fn default() -> Self {
        Self {
            pitch: 0,
            pitch_all: 0,
            keep_files: false,
            main_gain: 0,
            backup_gain: 0,
            inst_gain: 0,
            index_rate: 0.5,
            filter_radius: 3,
            rms_mix_rate: 0.25,
            protect: 0.33,
            f0_method: PitchDetection::Rmvpe,
            crepe_hop_length: 128,
            reverb_room_size: 0.15,
            reverb_wet: 0.2,
            reverb_dry: 0.8,
            reverb_damping: 0.7,
            output_format: OutputFormat::Mp3,
        }
    }
}

fn check(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ParamError> {
    if value.is_nan() || value < min || value > max {
        return Err(ParamError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

impl CoverParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        check("pitch", self.pitch.into(), -3.0, 3.0)?;
        check("pitch_all", self.pitch_all.into(), -12.0, 12.0)?;
        check("main_gain", self.main_gain.into(), -20.0, 20.0)?;
        check("backup_gain", self.backup_gain.into(), -20.0, 20.0)?;
        check("inst_gain", self.inst_gain.into(), -20.0, 20.0)?;
        check("index_rate", self.index_rate.into(), 0.0, 1.0)?;
        check("filter_radius", self.filter_radius.into(), 0.0, 7.0)?;
        check("rms_mix_rate", self.rms_mix_rate.into(), 0.0, 1.0)?;
        check("protect", self.protect.into(), 0.0, 0.5)?;
        check("crepe_hop_length", self.crepe_hop_length.into(), 32.0, 320.0)?;
        check("reverb_room_size", self.reverb_room_size.into(), 0.0, 1.0)?;
        check("reverb_wet", self.reverb_wet.into(), 0.0, 1.0)?;
        check("reverb_dry", self.reverb_dry.into(), 0.0, 1.0)?;
        check("reverb_damping", self.reverb_damping.into(), 0.0, 1.0)?;
        Ok(())
    }
}

/// A song (YouTube link or local path) to be sung by an installed model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoverRequest {
    pub song: String,
    pub model: String,
    #[serde(default)]
    pub params: CoverParams,
}

impl CoverRequest {
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.song.trim().is_empty() {
            return Err(ParamError::Empty("song"));
        }
        if self.model.trim().is_empty() {
            return Err(ParamError::Empty("model"));
        }
        self.params.validate()
    }
}

impl fmt::Display for CoverRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} as {}", self.song, self.model)
    }
}

/// The voice conversion and mixing stage, treated as a black box.
pub trait ConversionPipeline {
    /// Produces the cover and returns the path of the mixed file.
    fn generate(&self, request: &CoverRequest, model: &ModelEntry) -> Result<PathBuf>;
}
