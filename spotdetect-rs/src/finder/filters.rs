//! Small n-d image filters shared by the finders. All volumes are (z, y, x).

use ndarray::{Array3, ArrayView3, Axis};
use std::collections::VecDeque;

/// Mirror an out-of-range index back into `0..len` (`d c b a | a b c d | d c b a`).
pub(crate) fn reflect_index(i: isize, len: usize) -> usize {
    let n = len as isize;
    let period = 2 * n;
    let m = i.rem_euclid(period);
    if m < n {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Normalized 1D Gaussian kernel truncated at four sigma.
pub(crate) fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (4.0 * sigma).ceil().max(1.0) as isize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|i| (-((i * i) as f64) / denom).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

fn convolve_axis(data: &Array3<f64>, axis: usize, kernel: &[f64]) -> Array3<f64> {
    let len = data.len_of(Axis(axis));
    if len == 1 {
        // Reflection of a single sample is itself; the normalized kernel is a no-op.
        return data.clone();
    }
    let half = (kernel.len() / 2) as isize;
    let mut out = Array3::<f64>::zeros(data.raw_dim());
    for (idx, value) in out.indexed_iter_mut() {
        let mut pos = [idx.0, idx.1, idx.2];
        let center = pos[axis] as isize;
        let mut acc = 0.0;
        for (k, w) in kernel.iter().enumerate() {
            pos[axis] = reflect_index(center + k as isize - half, len);
            acc += w * data[pos];
        }
        *value = acc;
    }
    out
}

/// Separable Gaussian smoothing with reflected borders.
pub(crate) fn gaussian_filter(image: &ArrayView3<'_, f32>, sigma: f64) -> Array3<f64> {
    let kernel = gaussian_kernel(sigma);
    let mut data = image.mapv(f64::from);
    for axis in 0..3 {
        data = convolve_axis(&data, axis, &kernel);
    }
    data
}

/// Discrete Laplacian (3-point second difference per axis, reflected borders).
pub(crate) fn laplacian(data: &Array3<f64>) -> Array3<f64> {
    let dims = data.dim();
    let dims = [dims.0, dims.1, dims.2];
    let mut out = Array3::<f64>::zeros(data.raw_dim());
    for (idx, value) in out.indexed_iter_mut() {
        let pos = [idx.0, idx.1, idx.2];
        let center = data[pos];
        let mut acc = 0.0;
        for axis in 0..3 {
            let mut lo = pos;
            let mut hi = pos;
            lo[axis] = reflect_index(pos[axis] as isize - 1, dims[axis]);
            hi[axis] = reflect_index(pos[axis] as isize + 1, dims[axis]);
            acc += data[lo] + data[hi] - 2.0 * center;
        }
        *value = acc;
    }
    out
}

/// Integer offsets inside a ball of `radius`; the z extent collapses for
/// single-plane volumes.
pub(crate) fn ball_offsets(radius: f64, depth: usize) -> Vec<[isize; 3]> {
    let r = radius.max(0.0);
    let reach = r.floor() as isize;
    let z_reach = if depth > 1 { reach } else { 0 };
    let r2 = r * r;
    let mut offsets = Vec::new();
    for dz in -z_reach..=z_reach {
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                if (dz * dz + dy * dy + dx * dx) as f64 <= r2 {
                    offsets.push([dz, dy, dx]);
                }
            }
        }
    }
    offsets
}

/// Add a signed offset to a voxel, returning `None` outside the volume.
pub(crate) fn offset_voxel(
    pos: [usize; 3],
    offset: [isize; 3],
    dims: [usize; 3],
) -> Option<[usize; 3]> {
    let mut out = [0usize; 3];
    for axis in 0..3 {
        let v = pos[axis] as isize + offset[axis];
        if v < 0 || v >= dims[axis] as isize {
            return None;
        }
        out[axis] = v as usize;
    }
    Some(out)
}

/// Grey dilation with a ball footprint; voxels outside the volume are ignored.
pub(crate) fn grey_dilation(image: &ArrayView3<'_, f32>, radius: f64) -> Array3<f32> {
    let (d, h, w) = image.dim();
    let dims = [d, h, w];
    let offsets = ball_offsets(radius, d);
    let mut out = Array3::<f32>::zeros(image.raw_dim());
    for (idx, value) in out.indexed_iter_mut() {
        let pos = [idx.0, idx.1, idx.2];
        *value = offsets
            .iter()
            .filter_map(|&o| offset_voxel(pos, o, dims))
            .map(|p| image[p])
            .fold(f32::NEG_INFINITY, f32::max);
    }
    out
}

/// Maximum over the `(2 * reach + 1)^3` box around each voxel, clipped to the
/// volume. Separable, one pass per axis.
pub(crate) fn box_max_filter(image: &ArrayView3<'_, f32>, reach: usize) -> Array3<f32> {
    let mut data = image.to_owned();
    for axis in 0..3 {
        let len = data.len_of(Axis(axis));
        let mut out = Array3::<f32>::zeros(data.raw_dim());
        for (idx, value) in out.indexed_iter_mut() {
            let mut pos = [idx.0, idx.1, idx.2];
            let center = pos[axis];
            let hi = (center + reach + 1).min(len);
            let mut max = f32::NEG_INFINITY;
            for i in center.saturating_sub(reach)..hi {
                pos[axis] = i;
                max = max.max(data[pos]);
            }
            *value = max;
        }
        data = out;
    }
    data
}

/// Face-connected component labeling. Labels start at 1; index 0 of the
/// returned sizes is unused.
pub(crate) fn label_components(mask: &Array3<bool>) -> (Array3<u32>, Vec<usize>) {
    let (d, h, w) = mask.dim();
    let dims = [d, h, w];
    let mut labels = Array3::<u32>::zeros(mask.raw_dim());
    let mut sizes = vec![0usize];
    let neighbors: [[isize; 3]; 6] = [
        [-1, 0, 0],
        [1, 0, 0],
        [0, -1, 0],
        [0, 1, 0],
        [0, 0, -1],
        [0, 0, 1],
    ];
    let mut queue = VecDeque::new();

    for (idx, &set) in mask.indexed_iter() {
        let start = [idx.0, idx.1, idx.2];
        if !set || labels[start] != 0 {
            continue;
        }
        let label = sizes.len() as u32;
        let mut size = 0usize;
        labels[start] = label;
        queue.push_back(start);
        while let Some(pos) = queue.pop_front() {
            size += 1;
            for &n in &neighbors {
                if let Some(next) = offset_voxel(pos, n, dims) {
                    if mask[next] && labels[next] == 0 {
                        labels[next] = label;
                        queue.push_back(next);
                    }
                }
            }
        }
        sizes.push(size);
    }
    (labels, sizes)
}

/// Linear-interpolated percentile (`q` in 0..=100) of all voxels.
pub(crate) fn percentile(image: &ArrayView3<'_, f32>, q: f64) -> f32 {
    let mut values: Vec<f32> = image.iter().copied().collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    values[lo] + (values[hi] - values[lo]) * frac
}

pub(crate) fn min_max(image: &ArrayView3<'_, f32>) -> (f32, f32) {
    image
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    #[test]
    fn reflect_mirrors_both_edges() {
        assert_eq!(reflect_index(-1, 4), 0);
        assert_eq!(reflect_index(-2, 4), 1);
        assert_eq!(reflect_index(4, 4), 3);
        assert_eq!(reflect_index(5, 4), 2);
        assert_eq!(reflect_index(2, 4), 2);
        assert_eq!(reflect_index(7, 1), 0);
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(1.5);
        assert_eq!(k.len(), 13);
        assert_relative_eq!(k.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(k[0], k[12]);
    }

    #[test]
    fn gaussian_filter_preserves_mass_away_from_borders() {
        let mut image = Array3::<f32>::zeros((1, 21, 21));
        image[[0, 10, 10]] = 1.0;
        let blurred = gaussian_filter(&image.view(), 1.0);
        assert_relative_eq!(blurred.sum(), 1.0, epsilon = 1e-9);
        assert!(blurred[[0, 10, 10]] > blurred[[0, 10, 11]]);
    }

    #[test]
    fn laplacian_of_constant_is_zero() {
        let data = Array3::<f64>::from_elem((3, 4, 5), 2.5);
        assert!(laplacian(&data).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn ball_offsets_are_flat_for_single_plane() {
        let flat = ball_offsets(1.0, 1);
        assert_eq!(flat.len(), 5);
        assert!(flat.iter().all(|o| o[0] == 0));
        assert_eq!(ball_offsets(1.0, 3).len(), 7);
        assert_eq!(ball_offsets(0.0, 3), vec![[0, 0, 0]]);
    }

    #[test]
    fn dilation_spreads_maximum() {
        let mut image = Array3::<f32>::zeros((1, 5, 5));
        image[[0, 2, 2]] = 3.0;
        let dilated = grey_dilation(&image.view(), 1.0);
        assert_eq!(dilated[[0, 1, 2]], 3.0);
        assert_eq!(dilated[[0, 1, 1]], 0.0);
    }

    #[test]
    fn box_max_covers_the_whole_window() {
        let mut image = Array3::<f32>::zeros((3, 7, 7));
        image[[0, 1, 1]] = 5.0;
        image[[2, 6, 6]] = 2.0;
        let filtered = box_max_filter(&image.view(), 2);
        assert_eq!(filtered[[2, 3, 3]], 5.0);
        assert_eq!(filtered[[2, 4, 4]], 2.0);
        assert_eq!(filtered[[1, 0, 6]], 0.0);
        assert_eq!(box_max_filter(&image.view(), 0), image);
    }

    #[test]
    fn components_use_face_connectivity() {
        let mut mask = Array3::from_elem((1, 4, 4), false);
        mask[[0, 0, 0]] = true;
        mask[[0, 0, 1]] = true;
        mask[[0, 1, 2]] = true;
        mask[[0, 3, 3]] = true;
        let (labels, sizes) = label_components(&mask);
        assert_eq!(sizes, vec![0, 2, 1, 1]);
        assert_eq!(labels[[0, 0, 1]], 1);
        assert_eq!(labels[[0, 1, 2]], 2);
        assert_eq!(labels[[0, 2, 2]], 0);
    }

    #[test]
    fn percentile_interpolates() {
        let image = Array3::from_shape_vec((1, 1, 5), vec![4.0f32, 0.0, 1.0, 3.0, 2.0]).unwrap();
        assert_relative_eq!(percentile(&image.view(), 50.0), 2.0);
        assert_relative_eq!(percentile(&image.view(), 25.0), 1.0);
        assert_relative_eq!(percentile(&image.view(), 90.0), 3.6, epsilon = 1e-6);
        assert_eq!(min_max(&image.view()), (0.0, 4.0));
    }
}
