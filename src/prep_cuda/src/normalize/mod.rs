//! CT intensity normalization.
//!
//! Clips voxel intensities to a percentile-derived range and applies
//! z-score normalization with dataset-level foreground statistics:
//! `(clamp(v, lower, upper) - mean) / max(std, epsilon)`. Elementwise and
//! order-independent, so the GPU twin parallelizes it one thread per voxel.

mod cpu;

pub use cpu::normalize_cpu;

use serde::{Deserialize, Serialize};

use crate::error::PrepError;
use crate::volume::VolumeBuffer;

/// Floor applied to `std` before division.
pub const STD_EPSILON: f32 = 1e-8;

/// Dataset-level CT normalization statistics.
///
/// `mean` and `std` come from foreground voxels across the training
/// dataset; `lower_bound`/`upper_bound` are the 0.5 / 99.5 intensity
/// percentiles used as clip bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CtNormalization {
    pub mean: f32,
    pub std: f32,
    pub lower_bound: f32,
    pub upper_bound: f32,
}

impl CtNormalization {
    /// Properties under which normalization is a no-op.
    pub fn identity() -> Self {
        Self {
            mean: 0.0,
            std: 1.0,
            lower_bound: f32::NEG_INFINITY,
            upper_bound: f32::INFINITY,
        }
    }

    /// Validate the clip bounds.
    pub fn validate(&self) -> Result<(), PrepError> {
        if self.lower_bound > self.upper_bound {
            return Err(PrepError::InvalidBounds {
                lower: self.lower_bound,
                upper: self.upper_bound,
            });
        }
        Ok(())
    }

    /// Reciprocal of the floored standard deviation.
    #[inline]
    pub fn inv_std(&self) -> f32 {
        1.0 / self.std.max(STD_EPSILON)
    }
}

/// Normalize a volume on the CPU reference path.
///
/// Bounds are validated at entry; malformed properties are surfaced, never
/// silently repaired.
pub fn normalize(
    volume: &VolumeBuffer,
    props: &CtNormalization,
) -> Result<VolumeBuffer, PrepError> {
    props.validate()?;
    Ok(cpu::normalize_cpu(volume, props))
}
