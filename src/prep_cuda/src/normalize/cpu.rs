//! CPU reference implementation of CT normalization.

use super::CtNormalization;
use crate::volume::VolumeBuffer;

/// Elementwise clip + z-score. Properties are assumed validated by the
/// caller ([`super::normalize`] does so at entry).
pub fn normalize_cpu(volume: &VolumeBuffer, props: &CtNormalization) -> VolumeBuffer {
    let inv_std = props.inv_std();
    let samples = volume
        .samples
        .iter()
        .map(|&v| (v.clamp(props.lower_bound, props.upper_bound) - props.mean) * inv_std)
        .collect();

    volume.successor(samples, volume.shape, volume.spacing)
}
