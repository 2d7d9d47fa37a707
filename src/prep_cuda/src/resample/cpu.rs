//! CPU reference implementation of the resampler.
//!
//! Output voxels map to fractional source coordinates via
//! `src = dst * (src_extent - 1) / (dst_extent - 1)` (0 when the output
//! extent is 1), then blend a per-axis tap window: one tap for nearest, two
//! for linear, four for cubic. Out-of-range neighbor indices clamp to the
//! valid range (edge replication), never wrap or zero-pad. The cubic kernel
//! is an interpolating spline whose window weights sum to one, so constant
//! input stays constant through any resampling.

use rayon::prelude::*;

use super::InterpOrder;
use crate::volume::VolumeBuffer;

/// Cubic interpolation weight.
///
/// `w(t) = (1.5|t| - 2.5)t^2 + 1` for |t| < 1,
/// `w(t) = ((-0.5|t| + 2.5)|t| - 4)|t| + 2` for 1 <= |t| < 2, else 0.
#[inline]
pub fn cubic_weight(t: f32) -> f32 {
    let a = t.abs();
    if a < 1.0 {
        (1.5 * a - 2.5) * a * a + 1.0
    } else if a < 2.0 {
        ((-0.5 * a + 2.5) * a - 4.0) * a + 2.0
    } else {
        0.0
    }
}

/// Fractional source coordinate for an output index along one axis.
#[inline]
pub fn source_coord(dst: usize, src_extent: usize, dst_extent: usize) -> f32 {
    if dst_extent <= 1 {
        0.0
    } else {
        dst as f32 * (src_extent - 1) as f32 / (dst_extent - 1) as f32
    }
}

#[inline]
fn clamp_index(i: isize, extent: usize) -> usize {
    i.clamp(0, extent as isize - 1) as usize
}

/// Clamped indices and weights blending one axis sample.
#[derive(Debug, Clone, Copy)]
struct AxisTaps {
    idx: [usize; 4],
    weight: [f32; 4],
    count: usize,
}

impl AxisTaps {
    fn new(src: f32, extent: usize, order: InterpOrder) -> Self {
        let mut taps = Self {
            idx: [0; 4],
            weight: [0.0; 4],
            count: 0,
        };
        match order {
            InterpOrder::Nearest => {
                taps.idx[0] = clamp_index(src.round() as isize, extent);
                taps.weight[0] = 1.0;
                taps.count = 1;
            }
            InterpOrder::Linear => {
                let base = src.floor();
                let frac = src - base;
                let b = base as isize;
                taps.idx[0] = clamp_index(b, extent);
                taps.idx[1] = clamp_index(b + 1, extent);
                taps.weight[0] = 1.0 - frac;
                taps.weight[1] = frac;
                taps.count = 2;
            }
            InterpOrder::Cubic => {
                let base = src.floor() as isize;
                for (n, k) in (-1isize..=2).enumerate() {
                    taps.idx[n] = clamp_index(base + k, extent);
                    taps.weight[n] = cubic_weight(src - (base + k) as f32);
                }
                taps.count = 4;
            }
        }
        taps
    }
}

/// Tap table for every output index along one axis.
fn axis_tap_table(
    src_extent: usize,
    dst_extent: usize,
    order: InterpOrder,
) -> Vec<AxisTaps> {
    (0..dst_extent)
        .map(|dst| AxisTaps::new(source_coord(dst, src_extent, dst_extent), src_extent, order))
        .collect()
}

/// Full-3D resampling: a single interpolation order over all three axes.
pub fn resample_full_3d(
    volume: &VolumeBuffer,
    out_shape: [usize; 3],
    order: InterpOrder,
) -> Vec<f32> {
    let [sd, sh, sw] = volume.shape;
    let [od, oh, ow] = out_shape;

    let z_taps = axis_tap_table(sd, od, order);
    let y_taps = axis_tap_table(sh, oh, order);
    let x_taps = axis_tap_table(sw, ow, order);

    let src = &volume.samples;
    let mut out = vec![0.0f32; od * oh * ow];
    out.par_chunks_mut(oh * ow)
        .enumerate()
        .for_each(|(d, plane)| {
            let zt = &z_taps[d];
            for h in 0..oh {
                let yt = &y_taps[h];
                let row = &mut plane[h * ow..(h + 1) * ow];
                for (w, out_voxel) in row.iter_mut().enumerate() {
                    let xt = &x_taps[w];
                    let mut acc = 0.0f32;
                    for zi in 0..zt.count {
                        let wz = zt.weight[zi];
                        let z_off = zt.idx[zi] * sh;
                        for yi in 0..yt.count {
                            let wzy = wz * yt.weight[yi];
                            let row_off = (z_off + yt.idx[yi]) * sw;
                            for xi in 0..xt.count {
                                acc += wzy * xt.weight[xi] * src[row_off + xt.idx[xi]];
                            }
                        }
                    }
                    *out_voxel = acc;
                }
            }
        });

    out
}

/// Separate-axis resampling: in-plane (y, x) with the main order per source
/// slice, then the through-plane axis with `z_order`.
pub fn resample_separate_axis(
    volume: &VolumeBuffer,
    out_shape: [usize; 3],
    order: InterpOrder,
    z_order: InterpOrder,
) -> Vec<f32> {
    let [sd, sh, sw] = volume.shape;
    let [od, oh, ow] = out_shape;

    // Pass 1: every source slice to the output in-plane shape.
    let y_taps = axis_tap_table(sh, oh, order);
    let x_taps = axis_tap_table(sw, ow, order);

    let src = &volume.samples;
    let mut planes = vec![0.0f32; sd * oh * ow];
    planes
        .par_chunks_mut(oh * ow)
        .enumerate()
        .for_each(|(d, plane)| {
            let slice = &src[d * sh * sw..(d + 1) * sh * sw];
            for h in 0..oh {
                let yt = &y_taps[h];
                let row = &mut plane[h * ow..(h + 1) * ow];
                for (w, out_voxel) in row.iter_mut().enumerate() {
                    let xt = &x_taps[w];
                    let mut acc = 0.0f32;
                    for yi in 0..yt.count {
                        let wy = yt.weight[yi];
                        let row_off = yt.idx[yi] * sw;
                        for xi in 0..xt.count {
                            acc += wy * xt.weight[xi] * slice[row_off + xt.idx[xi]];
                        }
                    }
                    *out_voxel = acc;
                }
            }
        });

    if sd == od {
        return planes;
    }

    // Pass 2: through-plane.
    let z_taps = axis_tap_table(sd, od, z_order);
    let plane_len = oh * ow;
    let mut out = vec![0.0f32; od * plane_len];
    out.par_chunks_mut(plane_len)
        .enumerate()
        .for_each(|(d, plane)| {
            let zt = &z_taps[d];
            for (i, out_voxel) in plane.iter_mut().enumerate() {
                let mut acc = 0.0f32;
                for zi in 0..zt.count {
                    acc += zt.weight[zi] * planes[zt.idx[zi] * plane_len + i];
                }
                *out_voxel = acc;
            }
        });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::{resample, output_shape, ResampleConfig};

    #[test]
    fn test_cubic_weight_interpolates_at_integers() {
        assert!((cubic_weight(0.0) - 1.0).abs() < 1e-6);
        assert!(cubic_weight(1.0).abs() < 1e-6);
        assert!(cubic_weight(-1.0).abs() < 1e-6);
        assert!(cubic_weight(2.0).abs() < 1e-6);
        assert!(cubic_weight(2.5).abs() < 1e-6);
    }

    #[test]
    fn test_cubic_weights_sum_to_one_across_window() {
        for frac in [0.0, 0.1, 0.25, 0.5, 0.75, 0.9] {
            let sum: f32 = (-1..=2).map(|k| cubic_weight(frac - k as f32)).sum();
            assert!((sum - 1.0).abs() < 1e-5, "frac {frac}: sum {sum}");
        }
    }

    #[test]
    fn test_source_coord_endpoints_and_singleton() {
        assert_eq!(source_coord(0, 10, 5), 0.0);
        assert!((source_coord(4, 10, 5) - 9.0).abs() < 1e-6);
        // A singleton output axis maps to the first source index.
        assert_eq!(source_coord(0, 10, 1), 0.0);
    }

    #[test]
    fn test_constant_volume_stays_constant_full_3d() {
        let vol = VolumeBuffer::new(vec![3.25; 6 * 6 * 6], [6, 6, 6], [1.0, 1.0, 1.0]).unwrap();
        let samples = resample_full_3d(&vol, [9, 4, 13], InterpOrder::Cubic);
        assert_eq!(samples.len(), 9 * 4 * 13);
        for &v in &samples {
            assert!((v - 3.25).abs() < 1e-3);
        }
    }

    #[test]
    fn test_constant_volume_stays_constant_separate_axis() {
        let vol = VolumeBuffer::new(
            vec![-7.5; 4 * 8 * 8],
            [4, 8, 8],
            [5.0, 1.0, 1.0],
        )
        .unwrap();
        for z_order in [InterpOrder::Nearest, InterpOrder::Linear] {
            let samples =
                resample_separate_axis(&vol, [11, 12, 12], InterpOrder::Cubic, z_order);
            for &v in &samples {
                assert!((v + 7.5).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_upsample_8_cube_to_16_cube_of_ones() {
        let vol = VolumeBuffer::new(vec![1.0; 8 * 8 * 8], [8, 8, 8], [1.0, 1.0, 1.0]).unwrap();
        let config = ResampleConfig {
            target_spacing: [0.5, 0.5, 0.5],
            ..Default::default()
        };
        let out = resample(&vol, &config).unwrap();
        assert_eq!(out.shape, [16, 16, 16]);
        for &v in &out.samples {
            assert!((v - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_linear_ramp_preserved_in_interior() {
        // Cubic interpolation reproduces a linear field away from the
        // clamped borders.
        let sw = 9usize;
        let samples: Vec<f32> = (0..5 * 5 * sw)
            .map(|i| (i % sw) as f32)
            .collect();
        let vol = VolumeBuffer::new(samples, [5, 5, sw], [1.0, 1.0, 1.0]).unwrap();

        let out_shape = [5, 5, 17];
        let out = resample_full_3d(&vol, out_shape, InterpOrder::Cubic);
        for w in 2..15 {
            let src = source_coord(w, sw, 17);
            let got = out[w]; // d = 0, h = 0 row
            assert!(
                (got - src).abs() < 1e-3,
                "w {w}: expected {src}, got {got}"
            );
        }
    }

    #[test]
    fn test_nearest_z_picks_closest_slice() {
        // Two slices valued 0 and 10; upsample z to 4 with nearest.
        let mut samples = vec![0.0; 2 * 2 * 2];
        samples[4..].fill(10.0);
        let vol = VolumeBuffer::new(samples, [2, 2, 2], [5.0, 1.0, 1.0]).unwrap();

        let out = resample_separate_axis(&vol, [4, 2, 2], InterpOrder::Cubic, InterpOrder::Nearest);
        // src z coords: 0, 1/3, 2/3, 1 -> nearest slices 0, 0, 1, 1
        assert_eq!(&out[0..4], &[0.0; 4]);
        assert_eq!(&out[4..8], &[0.0; 4]);
        assert_eq!(&out[8..12], &[10.0; 4]);
        assert_eq!(&out[12..16], &[10.0; 4]);
    }

    #[test]
    fn test_linear_z_blends_slices() {
        let mut samples = vec![0.0; 2 * 2 * 2];
        samples[4..].fill(10.0);
        let vol = VolumeBuffer::new(samples, [2, 2, 2], [5.0, 1.0, 1.0]).unwrap();

        let out = resample_separate_axis(&vol, [3, 2, 2], InterpOrder::Cubic, InterpOrder::Linear);
        // src z coords: 0, 0.5, 1
        assert_eq!(&out[0..4], &[0.0; 4]);
        for &v in &out[4..8] {
            assert!((v - 5.0).abs() < 1e-5);
        }
        assert_eq!(&out[8..12], &[10.0; 4]);
    }

    #[test]
    fn test_downsample_shape_and_finite_values() {
        let samples: Vec<f32> = (0..10 * 10 * 10).map(|i| (i % 97) as f32).collect();
        let vol = VolumeBuffer::new(samples, [10, 10, 10], [1.0, 1.0, 1.0]).unwrap();
        let config = ResampleConfig {
            target_spacing: [2.0, 2.0, 2.0],
            ..Default::default()
        };
        let out = resample(&vol, &config).unwrap();
        assert_eq!(out.shape, output_shape([10, 10, 10], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]));
        assert!(out.samples.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_edge_clamping_does_not_overshoot_flat_borders(){
        // A volume that is flat near the borders: clamped cubic taps must
        // reproduce the border value exactly, not ring past it.
        let mut samples = vec![2.0; 5 * 5 * 5];
        let vol = VolumeBuffer::new(samples.clone(), [5, 5, 5], [1.0, 1.0, 1.0]).unwrap();
        samples[vol.index(2, 2, 2)] = 9.0;
        let vol = VolumeBuffer::new(samples, [5, 5, 5], [1.0, 1.0, 1.0]).unwrap();

        let out = resample_full_3d(&vol, [9, 9, 9], InterpOrder::Cubic);
        // Corner output voxel maps exactly onto the flat corner region.
        assert!((out[0] - 2.0).abs() < 1e-4);
        let last = out.len() - 1;
        assert!((out[last] - 2.0).abs() < 1e-4);
    }
}
