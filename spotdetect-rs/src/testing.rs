//! Synthetic stacks for pipeline tests.

use ndarray::{Array3, Array5};

use crate::stack::ImageStack;

pub(crate) const SPOT_CENTERS: [[f64; 3]; 2] = [[0.0, 10.0, 12.0], [0.0, 28.0, 30.0]];
pub(crate) const SPOT_SIGMA: f64 = 1.5;

/// Add an isotropic Gaussian with peak `amplitude` at `center` over the whole
/// volume.
pub(crate) fn render_gaussian(image: &mut Array3<f32>, center: [f64; 3], sigma: f64, amplitude: f32) {
    let denom = 2.0 * sigma * sigma;
    for ((z, y, x), value) in image.indexed_iter_mut() {
        let d2 = (z as f64 - center[0]).powi(2)
            + (y as f64 - center[1]).powi(2)
            + (x as f64 - center[2]).powi(2);
        *value += (f64::from(amplitude) * (-d2 / denom).exp()) as f32;
    }
}

fn two_spot_plane(amplitude: f32) -> Array3<f32> {
    let mut plane = Array3::<f32>::zeros((1, 40, 40));
    for center in SPOT_CENTERS {
        render_gaussian(&mut plane, center, SPOT_SIGMA, amplitude);
    }
    plane
}

/// Both spots at `amplitude` in every (round, channel) plane.
pub(crate) fn two_spot_stack(rounds: usize, channels: usize, amplitude: f32) -> ImageStack {
    let plane = two_spot_plane(amplitude);
    let data = Array5::from_shape_fn((rounds, channels, 1, 40, 40), |(_, _, z, y, x)| {
        plane[[z, y, x]]
    });
    ImageStack::new(data).unwrap()
}

/// Like [`two_spot_stack`], but `blank_channel` carries no signal at all.
pub(crate) fn two_spot_stack_with_blank_channel(
    rounds: usize,
    channels: usize,
    blank_channel: usize,
    amplitude: f32,
) -> ImageStack {
    let plane = two_spot_plane(amplitude);
    let data = Array5::from_shape_fn((rounds, channels, 1, 40, 40), |(_, c, z, y, x)| {
        if c == blank_channel {
            0.0
        } else {
            plane[[z, y, x]]
        }
    });
    ImageStack::new(data).unwrap()
}

/// Planes in which each of the two spots is lit, as (round, channel) pairs.
pub(crate) type SpotCodes<'a> = [&'a [(usize, usize)]; 2];

/// One spot per lit plane: spot `s` appears at `amplitude` exactly in the
/// planes listed in `codes[s]`. Every other plane is blank.
pub(crate) fn coded_stack(
    rounds: usize,
    channels: usize,
    codes: SpotCodes<'_>,
    amplitude: f32,
) -> ImageStack {
    let spot_planes: Vec<Array3<f32>> = SPOT_CENTERS
        .iter()
        .map(|&center| {
            let mut plane = Array3::<f32>::zeros((1, 40, 40));
            render_gaussian(&mut plane, center, SPOT_SIGMA, amplitude);
            plane
        })
        .collect();
    let mut data = Array5::<f32>::zeros((rounds, channels, 1, 40, 40));
    for (spot, planes) in codes.iter().enumerate() {
        for &(r, c) in planes.iter() {
            data.slice_mut(ndarray::s![r, c, .., .., ..])
                .zip_mut_with(&spot_planes[spot], |dst, &src| *dst += src);
        }
    }
    ImageStack::new(data).unwrap()
}

/// 2 rounds x 2 channels, each spot lit in a single channel per round.
pub(crate) fn one_hot_stack(amplitude: f32) -> ImageStack {
    coded_stack(2, 2, [&[(0, 0), (1, 1)], &[(0, 1), (1, 0)]], amplitude)
}

/// 3 rounds x 2 channels, each spot lit in only two planes; planes (0, 1) and
/// (1, 0) are blank.
pub(crate) fn sparse_stack(amplitude: f32) -> ImageStack {
    coded_stack(3, 2, [&[(0, 0), (2, 1)], &[(1, 1), (2, 0)]], amplitude)
}

/// The one-hot layout with a third channel that is blank in every round.
pub(crate) fn informative_blank_stack(amplitude: f32) -> ImageStack {
    coded_stack(2, 3, [&[(0, 0), (1, 1)], &[(0, 1), (1, 0)]], amplitude)
}

/// Every spot is lit in exactly two planes.
pub(crate) fn coded_fixtures(amplitude: f32) -> Vec<(&'static str, ImageStack)> {
    vec![
        ("one-hot", one_hot_stack(amplitude)),
        ("sparse", sparse_stack(amplitude)),
        ("informative-blank", informative_blank_stack(amplitude)),
    ]
}

/// 3D stack of shape (rounds, channels, 7, 24, 24) with two Gaussian spots at
/// [`VOLUME_SPOT_CENTERS`] in every plane.
pub(crate) fn two_spot_volume_stack(rounds: usize, channels: usize, amplitude: f32) -> ImageStack {
    let mut volume = Array3::<f32>::zeros((7, 24, 24));
    for center in VOLUME_SPOT_CENTERS {
        render_gaussian(&mut volume, center, SPOT_SIGMA, amplitude);
    }
    let data = Array5::from_shape_fn((rounds, channels, 7, 24, 24), |(_, _, z, y, x)| {
        volume[[z, y, x]]
    });
    ImageStack::new(data).unwrap()
}

pub(crate) const VOLUME_SPOT_CENTERS: [[f64; 3]; 2] = [[3.0, 6.0, 7.0], [3.0, 17.0, 16.0]];
