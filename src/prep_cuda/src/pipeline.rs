//! High-level preprocessing pipeline.
//!
//! Composes the four stages in their fixed order — transpose →
//! crop-to-nonzero → normalize → resample — and owns the CPU/GPU dispatch
//! decision. Each stage consumes the previous stage's output and nothing
//! else, so the order is not configurable.
//!
//! # Example
//!
//! ```ignore
//! use prep_cuda::{Preprocessor, CtNormalization};
//!
//! let preprocessor = Preprocessor::builder()
//!     .transpose_axes([0, 1, 2])
//!     .normalization(CtNormalization {
//!         mean: 100.5,
//!         std: 50.2,
//!         lower_bound: -1024.0,
//!         upper_bound: 1500.0,
//!     })
//!     .target_spacing([1.0, 0.5, 0.5])
//!     .use_gpu(true)
//!     .build()?;
//!
//! let output = preprocessor.run(&volume)?;
//! // output.volume feeds the inference engine; output.crop_bbox and
//! // output.inverse_transpose_axes map results back to scan geometry.
//! ```

use tracing::{debug, warn};

use crate::crop::crop_to_nonzero;
use crate::error::PrepError;
use crate::normalize::{normalize, CtNormalization};
use crate::resample::{resample, ResampleConfig};
use crate::timing::{PreprocessTiming, StageTimer};
use crate::transpose::{inverse_permutation, transpose, validate_permutation, IDENTITY_PERMUTATION};
use crate::volume::{BoundingBox, VolumeBuffer};

#[cfg(feature = "cuda")]
use crate::error::AcceleratorError;
#[cfg(feature = "cuda")]
use crate::runtime::GpuRuntime;

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessorConfig {
    /// Axis permutation applied before any other stage.
    pub transpose_axes: [usize; 3],
    /// CT normalization statistics.
    pub normalization: CtNormalization,
    /// Resampling configuration.
    pub resample: ResampleConfig,
    /// Dispatch normalize/resample to the GPU when a device is available.
    /// Falls back to the CPU path when it is not.
    pub use_gpu: bool,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            transpose_axes: IDENTITY_PERMUTATION,
            normalization: CtNormalization::identity(),
            resample: ResampleConfig::default(),
            use_gpu: false,
        }
    }
}

/// Builder for [`Preprocessor`].
#[derive(Debug, Clone, Default)]
pub struct PreprocessorBuilder {
    config: PreprocessorConfig,
}

impl PreprocessorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transpose_axes(mut self, axes: [usize; 3]) -> Self {
        self.config.transpose_axes = axes;
        self
    }

    pub fn normalization(mut self, props: CtNormalization) -> Self {
        self.config.normalization = props;
        self
    }

    pub fn target_spacing(mut self, spacing: [f32; 3]) -> Self {
        self.config.resample.target_spacing = spacing;
        self
    }

    pub fn order(mut self, order: u8) -> Self {
        self.config.resample.order = order;
        self
    }

    pub fn order_z(mut self, order_z: u8) -> Self {
        self.config.resample.order_z = order_z;
        self
    }

    pub fn force_separate_z(mut self, force: Option<bool>) -> Self {
        self.config.resample.force_separate_z = force;
        self
    }

    pub fn anisotropy_threshold(mut self, threshold: f32) -> Self {
        self.config.resample.anisotropy_threshold = threshold;
        self
    }

    pub fn use_gpu(mut self, use_gpu: bool) -> Self {
        self.config.use_gpu = use_gpu;
        self
    }

    /// Validate the assembled configuration and build the preprocessor.
    pub fn build(self) -> Result<Preprocessor, PrepError> {
        Preprocessor::new(self.config)
    }
}

/// Result of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PreprocessOutput {
    /// Normalized, resampled volume ready for inference.
    pub volume: VolumeBuffer,
    /// Region of the transposed volume the output represents; consumers use
    /// it to place inference results back into pre-crop geometry.
    pub crop_bbox: BoundingBox,
    /// Permutation that was applied.
    pub transpose_axes: [usize; 3],
    /// Permutation that undoes it.
    pub inverse_transpose_axes: [usize; 3],
    /// Per-stage wall-clock timing.
    pub timing: PreprocessTiming,
}

/// The preprocessing pipeline.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessorConfig,
}

impl Preprocessor {
    /// Create a preprocessor, validating the whole configuration up front
    /// so a malformed plan fails before any volume is touched.
    pub fn new(config: PreprocessorConfig) -> Result<Self, PrepError> {
        validate_permutation(config.transpose_axes)?;
        config.normalization.validate()?;
        config.resample.validate()?;
        Ok(Self { config })
    }

    pub fn builder() -> PreprocessorBuilder {
        PreprocessorBuilder::new()
    }

    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    /// Run the four stages in order on one volume.
    pub fn run(&self, volume: &VolumeBuffer) -> Result<PreprocessOutput, PrepError> {
        let total = StageTimer::start();
        let mut timer = StageTimer::start();
        let mut timing = PreprocessTiming::default();

        let transposed = transpose(volume, self.config.transpose_axes)?;
        timing.transpose_ms = timer.lap_ms();

        let (cropped, crop_bbox) = crop_to_nonzero(&transposed);
        timing.crop_ms = timer.lap_ms();
        debug!(
            shape = ?cropped.shape,
            bbox = ?crop_bbox,
            "cropped to nonzero region"
        );

        let (normalized, normalize_gpu) = self.normalize_stage(&cropped)?;
        timing.normalize_ms = timer.lap_ms();

        let (resampled, resample_gpu) = self.resample_stage(&normalized)?;
        timing.resample_ms = timer.lap_ms();

        timing.total_ms = total.elapsed_ms();
        timing.used_gpu = normalize_gpu && resample_gpu;
        debug!(
            shape = ?resampled.shape,
            used_gpu = timing.used_gpu,
            total_ms = timing.total_ms,
            "preprocessing complete"
        );

        Ok(PreprocessOutput {
            volume: resampled,
            crop_bbox,
            transpose_axes: self.config.transpose_axes,
            inverse_transpose_axes: inverse_permutation(self.config.transpose_axes),
            timing,
        })
    }

    fn normalize_stage(&self, volume: &VolumeBuffer) -> Result<(VolumeBuffer, bool), PrepError> {
        if self.config.use_gpu {
            if let Some(out) = self.gpu_normalize(volume)? {
                return Ok((out, true));
            }
        }
        Ok((normalize(volume, &self.config.normalization)?, false))
    }

    fn resample_stage(&self, volume: &VolumeBuffer) -> Result<(VolumeBuffer, bool), PrepError> {
        if self.config.use_gpu {
            if let Some(out) = self.gpu_resample(volume)? {
                return Ok((out, true));
            }
        }
        Ok((resample(volume, &self.config.resample)?, false))
    }

    /// GPU normalization; `Ok(None)` means "accelerator unavailable, use
    /// the CPU path". Device execution failures propagate — an unavailable
    /// accelerator is recoverable, a failed dispatch is not retried.
    #[cfg(feature = "cuda")]
    fn gpu_normalize(&self, volume: &VolumeBuffer) -> Result<Option<VolumeBuffer>, PrepError> {
        let runtime = match GpuRuntime::shared() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(%err, "accelerator unavailable; using CPU normalization");
                return Ok(None);
            }
        };
        match runtime.normalize(volume, &self.config.normalization) {
            Ok(out) => Ok(Some(out)),
            Err(PrepError::Accelerator(AcceleratorError::Unavailable(msg))) => {
                warn!(%msg, "GPU normalization unavailable; using CPU path");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    #[cfg(feature = "cuda")]
    fn gpu_resample(&self, volume: &VolumeBuffer) -> Result<Option<VolumeBuffer>, PrepError> {
        let runtime = match GpuRuntime::shared() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(%err, "accelerator unavailable; using CPU resampling");
                return Ok(None);
            }
        };
        match runtime.resample(volume, &self.config.resample) {
            Ok(out) => Ok(Some(out)),
            Err(PrepError::Accelerator(AcceleratorError::Unavailable(msg))) => {
                warn!(%msg, "GPU resampling unavailable; using CPU path");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    #[cfg(not(feature = "cuda"))]
    fn gpu_normalize(&self, _volume: &VolumeBuffer) -> Result<Option<VolumeBuffer>, PrepError> {
        warn!("built without the `cuda` feature; using CPU normalization");
        Ok(None)
    }

    #[cfg(not(feature = "cuda"))]
    fn gpu_resample(&self, _volume: &VolumeBuffer) -> Result<Option<VolumeBuffer>, PrepError> {
        warn!("built without the `cuda` feature; using CPU resampling");
        Ok(None)
    }
}
