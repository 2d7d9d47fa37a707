//! Spacing resampling.
//!
//! Resamples a volume to a target voxel spacing. Two modes, selected by
//! the anisotropy of the *input* spacing:
//!
//! - **Full 3D**: cubic interpolation over a 4x4x4 neighborhood for every
//!   output voxel. Used when spacing is near-isotropic.
//! - **Separate-axis**: in-plane (y, x) cubic per slice, then a lower-order
//!   pass (nearest or linear) along the through-plane axis. Used when one
//!   axis is much coarser than the others, where full cubic would smear
//!   across slices.
//!
//! The output shape uses ties-to-even rounding of
//! `shape * spacing / target_spacing` per axis. Ties-away-from-zero would
//! diverge from the reference pipeline by one voxel on exact halves.

mod cpu;

pub use cpu::{resample_full_3d, resample_separate_axis};

use crate::error::PrepError;
use crate::volume::VolumeBuffer;

/// Spacing ratio above which separate-axis resampling is selected.
pub const DEFAULT_ANISOTROPY_THRESHOLD: f32 = 3.0;

/// Interpolation order along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpOrder {
    /// Round to the nearest source index (clamped).
    Nearest,
    /// Two-tap linear interpolation.
    Linear,
    /// Four-tap cubic interpolation.
    Cubic,
}

impl InterpOrder {
    /// Order for the main axes. 0 = nearest, 1 = linear, 2-3 = cubic.
    pub fn from_main_order(order: u8) -> Result<Self, PrepError> {
        match order {
            0 => Ok(Self::Nearest),
            1 => Ok(Self::Linear),
            2 | 3 => Ok(Self::Cubic),
            other => Err(PrepError::UnsupportedOrder(other)),
        }
    }

    /// Order for the through-plane axis in separate-axis mode:
    /// 0 = nearest, anything higher = linear.
    pub fn from_z_order(order_z: u8) -> Self {
        if order_z == 0 {
            Self::Nearest
        } else {
            Self::Linear
        }
    }
}

/// Resampling configuration, supplied by the external planning source.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampleConfig {
    /// Target voxel spacing in millimeters, ordered (z, y, x).
    pub target_spacing: [f32; 3],
    /// Interpolation order for the main axes (3 = cubic, the data default).
    pub order: u8,
    /// Through-plane order in separate-axis mode (0 = nearest, >=1 = linear).
    pub order_z: u8,
    /// Overrides the anisotropy decision when set.
    pub force_separate_z: Option<bool>,
    /// Spacing ratio that triggers separate-axis mode.
    pub anisotropy_threshold: f32,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            target_spacing: [1.0, 1.0, 1.0],
            order: 3,
            order_z: 0,
            force_separate_z: None,
            anisotropy_threshold: DEFAULT_ANISOTROPY_THRESHOLD,
        }
    }
}

impl ResampleConfig {
    pub fn validate(&self) -> Result<(), PrepError> {
        if self
            .target_spacing
            .iter()
            .any(|&s| !(s > 0.0) || !s.is_finite())
        {
            return Err(PrepError::NonPositiveSpacing(self.target_spacing));
        }
        InterpOrder::from_main_order(self.order)?;
        Ok(())
    }
}

/// Ratio of the coarsest to the finest spacing component.
pub fn anisotropy_ratio(spacing: [f32; 3]) -> f32 {
    let max = spacing.iter().copied().fold(f32::MIN, f32::max);
    let min = spacing.iter().copied().fold(f32::MAX, f32::min);
    max / min
}

/// Whether separate-axis mode applies for a volume with the given input
/// spacing. `force_separate_z` wins over the computed ratio; otherwise the
/// ratio must strictly exceed the threshold.
pub fn use_separate_axis(spacing: [f32; 3], config: &ResampleConfig) -> bool {
    match config.force_separate_z {
        Some(force) => force,
        None => anisotropy_ratio(spacing) > config.anisotropy_threshold,
    }
}

/// Output shape for resampling: ties-to-even rounding of
/// `shape[i] * spacing[i] / target[i]`, floored at one voxel per axis.
pub fn output_shape(shape: [usize; 3], spacing: [f32; 3], target: [f32; 3]) -> [usize; 3] {
    let mut out = [0usize; 3];
    for i in 0..3 {
        let exact = shape[i] as f64 * spacing[i] as f64 / target[i] as f64;
        out[i] = (exact.round_ties_even() as usize).max(1);
    }
    out
}

/// Resample a volume to the configured target spacing (CPU reference path).
pub fn resample(volume: &VolumeBuffer, config: &ResampleConfig) -> Result<VolumeBuffer, PrepError> {
    config.validate()?;

    let order = InterpOrder::from_main_order(config.order)?;
    let shape = output_shape(volume.shape, volume.spacing, config.target_spacing);

    if shape == volume.shape {
        // Nothing to interpolate; only the spacing bookkeeping changes.
        return Ok(volume.successor(volume.samples.clone(), shape, config.target_spacing));
    }

    let samples = if use_separate_axis(volume.spacing, config) {
        cpu::resample_separate_axis(
            volume,
            shape,
            order,
            InterpOrder::from_z_order(config.order_z),
        )
    } else {
        cpu::resample_full_3d(volume, shape, order)
    };

    Ok(volume.successor(samples, shape, config.target_spacing))
}
