//! Golden-fixture validation harness.
//!
//! The reference pipeline exports per-stage arrays as `.npy` files plus a
//! `fixture_metadata.json` document (shape and spacing per stage, the
//! bounding box for the crop stage). This module reads those fixtures and
//! compares pipeline output against them with explicit tolerances.
//!
//! Tolerance-exceeded is a *finding*, not a panic: [`compare_volumes`]
//! returns a [`ToleranceReport`] carrying the measured deviation so a
//! failing comparison tells you how far off the output was. This harness
//! is a testing aid, not a production interface.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ndarray::Array3;
use ndarray_npy::{read_npy, write_npy};
use serde::Deserialize;

use crate::error::PrepError;
use crate::volume::VolumeBuffer;

/// File name of the fixture metadata document.
pub const METADATA_FILE: &str = "fixture_metadata.json";

/// The five exported pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixtureStage {
    Raw,
    Transposed,
    Cropped,
    Normalized,
    Resampled,
}

impl FixtureStage {
    pub const ALL: [FixtureStage; 5] = [
        Self::Raw,
        Self::Transposed,
        Self::Cropped,
        Self::Normalized,
        Self::Resampled,
    ];

    /// Key used in the metadata document and as the array file stem.
    pub fn key(self) -> &'static str {
        match self {
            Self::Raw => "01_raw",
            Self::Transposed => "02_transposed",
            Self::Cropped => "03_cropped",
            Self::Normalized => "04_normalized",
            Self::Resampled => "05_resampled",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.npy", self.key())
    }
}

/// Companion metadata for a fixture directory.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureMetadata {
    #[serde(default)]
    pub input_file: String,
    #[serde(default)]
    pub configuration: String,
    pub stages: HashMap<String, StageMetadata>,
    #[serde(default)]
    pub checksums: HashMap<String, String>,
}

/// Per-stage metadata; fields beyond `shape` appear only where the
/// exporter records them.
#[derive(Debug, Clone, Deserialize)]
pub struct StageMetadata {
    pub shape: Vec<usize>,
    #[serde(default)]
    pub spacing: Option<Vec<f32>>,
    /// Half-open (start, end) per axis, crop stage only.
    #[serde(default)]
    pub bbox: Option<Vec<[usize; 2]>>,
    #[serde(default)]
    pub target_spacing: Option<Vec<f32>>,
}

/// A fixture directory: per-stage `.npy` arrays plus metadata.
#[derive(Debug)]
pub struct FixtureSet {
    dir: PathBuf,
    pub metadata: FixtureMetadata,
}

impl FixtureSet {
    /// Open a fixture directory and parse its metadata document.
    pub fn load(dir: &Path) -> Result<Self> {
        let metadata_path = dir.join(METADATA_FILE);
        let text = std::fs::read_to_string(&metadata_path)
            .with_context(|| format!("reading {}", metadata_path.display()))?;
        let metadata: FixtureMetadata =
            serde_json::from_str(&text).context("parsing fixture metadata")?;
        Ok(Self {
            dir: dir.to_path_buf(),
            metadata,
        })
    }

    pub fn stage_metadata(&self, stage: FixtureStage) -> Result<&StageMetadata> {
        self.metadata
            .stages
            .get(stage.key())
            .with_context(|| format!("metadata missing stage {}", stage.key()))
    }

    /// Read one stage's golden array.
    pub fn stage_array(&self, stage: FixtureStage) -> Result<Array3<f32>> {
        let path = self.dir.join(stage.file_name());
        read_npy(&path).with_context(|| format!("reading {}", path.display()))
    }

    /// Read one stage as a [`VolumeBuffer`], taking spacing from the
    /// metadata where recorded (unit spacing otherwise).
    pub fn stage_volume(&self, stage: FixtureStage) -> Result<VolumeBuffer> {
        let array = self.stage_array(stage)?;
        let spacing = match self.stage_metadata(stage).ok().and_then(|m| m.spacing.clone()) {
            Some(s) if s.len() == 3 => [s[0], s[1], s[2]],
            _ => [1.0, 1.0, 1.0],
        };
        array_to_volume(array, spacing).map_err(Into::into)
    }
}

/// Convert a volume to a (depth, height, width) array for export.
pub fn volume_to_array(volume: &VolumeBuffer) -> Array3<f32> {
    let [d, h, w] = volume.shape;
    Array3::from_shape_vec((d, h, w), volume.samples.clone())
        .expect("sample count matches shape by VolumeBuffer invariant")
}

/// Convert a golden array to a volume with the given spacing.
pub fn array_to_volume(array: Array3<f32>, spacing: [f32; 3]) -> Result<VolumeBuffer, PrepError> {
    let shape = [array.shape()[0], array.shape()[1], array.shape()[2]];
    let samples = array.iter().copied().collect();
    VolumeBuffer::new(samples, shape, spacing)
}

/// Write one stage array, for regenerating goldens from the CPU reference.
pub fn write_stage_array(dir: &Path, stage: FixtureStage, volume: &VolumeBuffer) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating fixture dir {}", dir.display()))?;
    let path = dir.join(stage.file_name());
    write_npy(&path, &volume_to_array(volume))
        .with_context(|| format!("writing {}", path.display()))
}

/// Measured deviation between an output and its golden reference.
#[derive(Debug, Clone)]
pub struct ToleranceReport {
    pub tolerance: f32,
    pub compared: usize,
    pub max_abs_diff: f32,
    pub mean_abs_diff: f32,
    /// Elements whose absolute difference exceeds the tolerance.
    pub num_exceeding: usize,
}

impl ToleranceReport {
    /// Whether every element is within tolerance.
    pub fn within(&self) -> bool {
        self.num_exceeding == 0
    }

    /// Whether the mean absolute difference is within `mae`.
    pub fn mean_within(&self, mae: f32) -> bool {
        self.mean_abs_diff <= mae
    }
}

impl fmt::Display for ToleranceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max |d| {:.6}, mean |d| {:.6}, {}/{} over tolerance {}",
            self.max_abs_diff, self.mean_abs_diff, self.num_exceeding, self.compared, self.tolerance
        )
    }
}

/// Compare two sample buffers elementwise.
pub fn compare_samples(actual: &[f32], expected: &[f32], tolerance: f32) -> Result<ToleranceReport> {
    if actual.len() != expected.len() {
        bail!(
            "sample count mismatch: actual {} vs expected {}",
            actual.len(),
            expected.len()
        );
    }

    let mut max_abs = 0.0f32;
    let mut sum_abs = 0.0f64;
    let mut num_exceeding = 0usize;
    for (&a, &e) in actual.iter().zip(expected) {
        let diff = (a - e).abs();
        max_abs = max_abs.max(diff);
        sum_abs += diff as f64;
        if diff > tolerance {
            num_exceeding += 1;
        }
    }

    let compared = actual.len();
    Ok(ToleranceReport {
        tolerance,
        compared,
        max_abs_diff: max_abs,
        mean_abs_diff: if compared == 0 {
            0.0
        } else {
            (sum_abs / compared as f64) as f32
        },
        num_exceeding,
    })
}

/// Compare a pipeline output against a golden volume.
///
/// A shape mismatch is an error (the volumes are not comparable); a value
/// deviation is reported, not raised.
pub fn compare_volumes(
    actual: &VolumeBuffer,
    expected: &VolumeBuffer,
    tolerance: f32,
) -> Result<ToleranceReport> {
    if actual.shape != expected.shape {
        bail!(
            "shape mismatch: actual {:?} vs expected {:?}",
            actual.shape,
            expected.shape
        );
    }
    compare_samples(&actual.samples, &expected.samples, tolerance)
}
