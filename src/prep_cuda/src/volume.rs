//! Volume data model shared by every pipeline stage.
//!
//! [`VolumeBuffer`] is the value type that flows through the pipeline:
//! a contiguous f32 sample buffer in (depth, height, width) order plus the
//! spatial metadata needed to place results back into scanner geometry.
//! Stages never mutate a buffer in place; each returns a new one.

use nalgebra::{Matrix3, Point3};

use crate::error::PrepError;

/// Half-open voxel box recorded by the crop stage.
///
/// Axes are ordered (z, y, x) to match [`VolumeBuffer::shape`]; `end` is
/// exclusive, so `size(i) == end[i] - start[i]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub start: [usize; 3],
    pub end: [usize; 3],
}

impl BoundingBox {
    /// Box spanning the full extent of a volume with the given shape.
    pub fn full(shape: [usize; 3]) -> Self {
        Self {
            start: [0, 0, 0],
            end: shape,
        }
    }

    /// Extent along one axis.
    pub fn size(&self, axis: usize) -> usize {
        self.end[axis] - self.start[axis]
    }

    /// Shape of the region described by this box.
    pub fn shape(&self) -> [usize; 3] {
        [self.size(0), self.size(1), self.size(2)]
    }

    /// Total number of voxels in the box.
    pub fn num_voxels(&self) -> usize {
        self.size(0) * self.size(1) * self.size(2)
    }
}

/// A 3D scalar volume with spatial metadata.
///
/// - `samples`: row-major (depth, height, width); depth varies slowest.
/// - `shape`: (depth, height, width).
/// - `spacing`: physical voxel size in millimeters, ordered (z, y, x) to
///   match `shape`.
/// - `origin`: world-space coordinate (x, y, z) of voxel (0, 0, 0).
///   Carried through unchanged by every stage.
/// - `orientation`: 3x3 direction-cosine matrix. Carried through unchanged.
/// - `bounding_box`: set once by the crop stage; records which sub-region
///   of the pre-crop volume this buffer represents.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeBuffer {
    pub samples: Vec<f32>,
    pub shape: [usize; 3],
    pub spacing: [f32; 3],
    pub origin: Point3<f32>,
    pub orientation: Matrix3<f32>,
    pub bounding_box: Option<BoundingBox>,
}

impl VolumeBuffer {
    /// Create a volume with default geometry (origin at zero, identity
    /// orientation).
    pub fn new(
        samples: Vec<f32>,
        shape: [usize; 3],
        spacing: [f32; 3],
    ) -> Result<Self, PrepError> {
        Self::with_geometry(
            samples,
            shape,
            spacing,
            Point3::origin(),
            Matrix3::identity(),
        )
    }

    /// Create a volume with explicit world-space geometry.
    pub fn with_geometry(
        samples: Vec<f32>,
        shape: [usize; 3],
        spacing: [f32; 3],
        origin: Point3<f32>,
        orientation: Matrix3<f32>,
    ) -> Result<Self, PrepError> {
        validate_shape(shape)?;
        validate_spacing(spacing)?;
        let expected = shape[0] * shape[1] * shape[2];
        if samples.len() != expected {
            return Err(PrepError::ShapeMismatch {
                samples: samples.len(),
                shape,
                expected,
            });
        }
        Ok(Self {
            samples,
            shape,
            spacing,
            origin,
            orientation,
            bounding_box: None,
        })
    }

    /// Total number of voxels.
    pub fn num_voxels(&self) -> usize {
        self.shape[0] * self.shape[1] * self.shape[2]
    }

    /// Linear index of voxel (d, h, w).
    #[inline]
    pub fn index(&self, d: usize, h: usize, w: usize) -> usize {
        (d * self.shape[1] + h) * self.shape[2] + w
    }

    /// Sample at voxel (d, h, w).
    #[inline]
    pub fn at(&self, d: usize, h: usize, w: usize) -> f32 {
        self.samples[self.index(d, h, w)]
    }

    /// Build a successor buffer that keeps this volume's world geometry and
    /// bounding box but carries new samples, shape, and spacing.
    ///
    /// Callers guarantee `samples.len()` matches `shape`; stages construct
    /// their outputs exactly sized, so this skips re-validation.
    pub(crate) fn successor(
        &self,
        samples: Vec<f32>,
        shape: [usize; 3],
        spacing: [f32; 3],
    ) -> Self {
        debug_assert_eq!(samples.len(), shape[0] * shape[1] * shape[2]);
        Self {
            samples,
            shape,
            spacing,
            origin: self.origin,
            orientation: self.orientation,
            bounding_box: self.bounding_box,
        }
    }
}

fn validate_shape(shape: [usize; 3]) -> Result<(), PrepError> {
    if shape.iter().any(|&s| s == 0) {
        return Err(PrepError::NonPositiveShape(shape));
    }
    Ok(())
}

fn validate_spacing(spacing: [f32; 3]) -> Result<(), PrepError> {
    if spacing.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
        return Err(PrepError::NonPositiveSpacing(spacing));
    }
    Ok(())
}
