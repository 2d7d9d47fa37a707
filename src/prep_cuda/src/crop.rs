//! Crop-to-nonzero stage.
//!
//! Finds the tight bounding box of voxels that differ from the background
//! sentinel (exact zero, matching the reference pipeline) and extracts it.
//! The recorded box lets a downstream consumer place results back into the
//! original geometry.

use crate::volume::{BoundingBox, VolumeBuffer};

/// Crop a volume to the bounding box of its nonzero voxels.
///
/// One O(n) scan finds the per-axis minimal start and maximal (exclusive)
/// end among voxels with value != 0.0, followed by an O(cropped) copy.
/// If every voxel is background the volume is returned uncropped with a
/// bounding box spanning the full extent; the result is never empty.
///
/// The returned buffer carries the bounding box; it is set here once and
/// only consumed by later stages.
pub fn crop_to_nonzero(volume: &VolumeBuffer) -> (VolumeBuffer, BoundingBox) {
    let [depth, height, width] = volume.shape;

    let mut start = [usize::MAX; 3];
    let mut end = [0usize; 3];
    let mut any_nonzero = false;

    let mut idx = 0usize;
    for d in 0..depth {
        for h in 0..height {
            for w in 0..width {
                if volume.samples[idx] != 0.0 {
                    any_nonzero = true;
                    let coord = [d, h, w];
                    for axis in 0..3 {
                        start[axis] = start[axis].min(coord[axis]);
                        end[axis] = end[axis].max(coord[axis] + 1);
                    }
                }
                idx += 1;
            }
        }
    }

    if !any_nonzero {
        let bbox = BoundingBox::full(volume.shape);
        let mut out = volume.clone();
        out.bounding_box = Some(bbox);
        return (out, bbox);
    }

    let bbox = BoundingBox { start, end };
    if bbox == BoundingBox::full(volume.shape) {
        let mut out = volume.clone();
        out.bounding_box = Some(bbox);
        return (out, bbox);
    }

    let shape = bbox.shape();
    let mut samples = Vec::with_capacity(bbox.num_voxels());
    for d in start[0]..end[0] {
        for h in start[1]..end[1] {
            let row = volume.index(d, h, start[2]);
            samples.extend_from_slice(&volume.samples[row..row + shape[2]]);
        }
    }

    let mut out = volume.successor(samples, shape, volume.spacing);
    out.bounding_box = Some(bbox);
    (out, bbox)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_background_returns_full_extent() {
        let vol = VolumeBuffer::new(vec![0.0; 60], [3, 4, 5], [1.0, 1.0, 1.0]).unwrap();
        let (out, bbox) = crop_to_nonzero(&vol);

        assert_eq!(bbox, BoundingBox::full([3, 4, 5]));
        assert_eq!(out.shape, [3, 4, 5]);
        assert_eq!(out.bounding_box, Some(bbox));
        assert!(out.num_voxels() > 0);
    }

    #[test]
    fn test_single_voxel_crop() {
        let mut samples = vec![0.0; 4 * 4 * 4];
        let vol = VolumeBuffer::new(samples.clone(), [4, 4, 4], [1.0, 1.0, 1.0]).unwrap();
        samples[vol.index(1, 2, 3)] = 7.0;
        let vol = VolumeBuffer::new(samples, [4, 4, 4], [1.0, 1.0, 1.0]).unwrap();

        let (out, bbox) = crop_to_nonzero(&vol);
        assert_eq!(bbox.start, [1, 2, 3]);
        assert_eq!(bbox.end, [2, 3, 4]);
        assert_eq!(out.shape, [1, 1, 1]);
        assert_eq!(out.samples, vec![7.0]);
    }

    #[test]
    fn test_interior_block_crop() {
        let mut samples = vec![0.0; 5 * 6 * 7];
        let vol = VolumeBuffer::new(samples.clone(), [5, 6, 7], [1.0, 1.0, 1.0]).unwrap();
        for d in 1..4 {
            for h in 2..5 {
                for w in 3..6 {
                    samples[vol.index(d, h, w)] = 1.0;
                }
            }
        }
        let vol = VolumeBuffer::new(samples, [5, 6, 7], [1.0, 1.0, 1.0]).unwrap();

        let (out, bbox) = crop_to_nonzero(&vol);
        assert_eq!(bbox.start, [1, 2, 3]);
        assert_eq!(bbox.end, [4, 5, 6]);
        assert_eq!(out.shape, [3, 3, 3]);
        assert!(out.samples.iter().all(|&v| v == 1.0));
        assert_eq!(out.spacing, vol.spacing);
    }

    #[test]
    fn test_negative_values_count_as_foreground() {
        let mut samples = vec![0.0; 27];
        samples[13] = -1000.0; // center of a 3x3x3
        let vol = VolumeBuffer::new(samples, [3, 3, 3], [1.0, 1.0, 1.0]).unwrap();

        let (out, bbox) = crop_to_nonzero(&vol);
        assert_eq!(bbox.start, [1, 1, 1]);
        assert_eq!(out.samples, vec![-1000.0]);
    }

    #[test]
    fn test_full_volume_nonzero_is_identity() {
        let vol = VolumeBuffer::new(vec![1.0; 24], [2, 3, 4], [1.0, 1.0, 1.0]).unwrap();
        let (out, bbox) = crop_to_nonzero(&vol);
        assert_eq!(bbox, BoundingBox::full([2, 3, 4]));
        assert_eq!(out.samples, vol.samples);
    }
}
