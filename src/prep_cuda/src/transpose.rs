//! Axis transpose stage.
//!
//! Reorders the three spatial axes (and their spacing) according to a
//! permutation supplied by the external planning source. The sample at new
//! coordinate (d, h, w) equals the sample at the corresponding old
//! coordinate under the inverse permutation, matching the reference
//! pipeline's array transpose.

use crate::error::PrepError;
use crate::volume::VolumeBuffer;

/// The no-op permutation.
pub const IDENTITY_PERMUTATION: [usize; 3] = [0, 1, 2];

/// Check that `axes` is a bijection on {0, 1, 2}.
pub fn validate_permutation(axes: [usize; 3]) -> Result<(), PrepError> {
    let mut seen = [false; 3];
    for &a in &axes {
        if a > 2 || seen[a] {
            return Err(PrepError::InvalidPermutation(axes));
        }
        seen[a] = true;
    }
    Ok(())
}

/// Inverse of a valid permutation: `inverse(p)[p[i]] == i`.
///
/// The output of the pipeline carries this so a downstream consumer can
/// transpose results back into the scan's native axis order.
pub fn inverse_permutation(axes: [usize; 3]) -> [usize; 3] {
    let mut inv = [0usize; 3];
    for (i, &a) in axes.iter().enumerate() {
        inv[a] = i;
    }
    inv
}

/// Transpose a volume's axes.
///
/// New shape and spacing are `old[axes[i]]` per axis. The identity
/// permutation returns an equal buffer without touching the voxel data.
pub fn transpose(volume: &VolumeBuffer, axes: [usize; 3]) -> Result<VolumeBuffer, PrepError> {
    validate_permutation(axes)?;

    if axes == IDENTITY_PERMUTATION {
        return Ok(volume.clone());
    }

    let shape = [
        volume.shape[axes[0]],
        volume.shape[axes[1]],
        volume.shape[axes[2]],
    ];
    let spacing = [
        volume.spacing[axes[0]],
        volume.spacing[axes[1]],
        volume.spacing[axes[2]],
    ];

    let mut samples = Vec::with_capacity(volume.num_voxels());
    let mut old = [0usize; 3];
    for d in 0..shape[0] {
        old[axes[0]] = d;
        for h in 0..shape[1] {
            old[axes[1]] = h;
            for w in 0..shape[2] {
                old[axes[2]] = w;
                samples.push(volume.at(old[0], old[1], old[2]));
            }
        }
    }

    Ok(volume.successor(samples, shape, spacing))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_PERMUTATIONS: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];

    fn make_volume() -> VolumeBuffer {
        let samples: Vec<f32> = (0..24).map(|v| v as f32).collect();
        VolumeBuffer::new(samples, [2, 3, 4], [2.5, 0.7, 0.9]).unwrap()
    }

    #[test]
    fn test_rejects_invalid_permutations() {
        let vol = make_volume();
        assert!(matches!(
            transpose(&vol, [0, 0, 2]),
            Err(PrepError::InvalidPermutation(_))
        ));
        assert!(matches!(
            transpose(&vol, [0, 1, 3]),
            Err(PrepError::InvalidPermutation(_))
        ));
    }

    #[test]
    fn test_identity_returns_equal_volume() {
        let vol = make_volume();
        let out = transpose(&vol, IDENTITY_PERMUTATION).unwrap();
        assert_eq!(out, vol);
    }

    #[test]
    fn test_permutes_shape_and_spacing() {
        let vol = make_volume();
        let out = transpose(&vol, [2, 0, 1]).unwrap();
        assert_eq!(out.shape, [4, 2, 3]);
        assert_eq!(out.spacing, [0.9, 2.5, 0.7]);
        assert_eq!(out.num_voxels(), vol.num_voxels());
    }

    #[test]
    fn test_sample_mapping_matches_reference_transpose() {
        let vol = make_volume();
        let out = transpose(&vol, [1, 2, 0]).unwrap();
        // out[h', w', d'] where axes = [1, 2, 0]: out[i, j, k] = in[k, i, j]
        for d in 0..out.shape[0] {
            for h in 0..out.shape[1] {
                for w in 0..out.shape[2] {
                    assert_eq!(out.at(d, h, w), vol.at(w, d, h));
                }
            }
        }
    }

    #[test]
    fn test_round_trip_identity_for_all_permutations() {
        let vol = make_volume();
        for axes in ALL_PERMUTATIONS {
            let there = transpose(&vol, axes).unwrap();
            let back = transpose(&there, inverse_permutation(axes)).unwrap();
            assert_eq!(back, vol, "round trip failed for {axes:?}");
        }
    }

    #[test]
    fn test_inverse_permutation() {
        for axes in ALL_PERMUTATIONS {
            let inv = inverse_permutation(axes);
            for i in 0..3 {
                assert_eq!(inv[axes[i]], i);
            }
        }
    }
}
