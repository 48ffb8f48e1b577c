//! Thresholded local-maxima peak finding with connected-component area filtering.

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

use super::filters::{box_max_filter, label_components, min_max};
use super::{effective_ndim, require_non_empty, FinderError, RadiusConvention, Spot, SpotFinder};

const THRESHOLD_SWEEP_LEVELS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalMaxPeakFinder {
    /// Minimum Chebyshev distance between accepted peaks.
    pub min_distance: usize,
    /// Extra sweep levels added to an automatically selected threshold.
    pub stringency: usize,
    pub min_obj_area: usize,
    pub max_obj_area: usize,
    /// Absolute intensity threshold; `None` selects one by sweeping.
    pub threshold: Option<f32>,
}

impl Default for LocalMaxPeakFinder {
    fn default() -> Self {
        Self {
            min_distance: 6,
            stringency: 0,
            min_obj_area: 0,
            max_obj_area: usize::MAX,
            threshold: None,
        }
    }
}

impl LocalMaxPeakFinder {
    pub fn new(min_distance: usize, threshold: Option<f32>) -> Self {
        Self {
            min_distance,
            threshold,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), FinderError> {
        if self.min_distance == 0 {
            return Err(FinderError::InvalidParameter {
                name: "min_distance",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.min_obj_area > self.max_obj_area {
            return Err(FinderError::InvalidParameter {
                name: "min_obj_area",
                reason: format!(
                    "{} exceeds max_obj_area {}",
                    self.min_obj_area, self.max_obj_area
                ),
            });
        }
        Ok(())
    }

    /// Voxels equal to the maximum of their `min_distance` box, brightest
    /// first; raster order on ties.
    fn window_maxima(&self, image: &ArrayView3<'_, f32>) -> Vec<([usize; 3], f32)> {
        let window_max = box_max_filter(image, self.min_distance);
        let mut candidates: Vec<([usize; 3], f32)> = image
            .indexed_iter()
            .filter(|&((z, y, x), &v)| v >= window_max[[z, y, x]])
            .map(|((z, y, x), &v)| ([z, y, x], v))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates
    }

    /// Window maxima above `threshold`, thinned greedily so that no two lie
    /// within `min_distance` of each other.
    fn peaks(&self, window_maxima: &[([usize; 3], f32)], threshold: f32) -> Vec<[usize; 3]> {
        let mut accepted: Vec<[usize; 3]> = Vec::new();
        for &(pos, _) in window_maxima.iter().take_while(|&&(_, v)| v > threshold) {
            let too_close = accepted.iter().any(|a| {
                (0..3)
                    .map(|i| a[i].abs_diff(pos[i]))
                    .max()
                    .unwrap_or(0)
                    <= self.min_distance
            });
            if !too_close {
                accepted.push(pos);
            }
        }
        accepted
    }

    /// Sweep evenly spaced thresholds and pick the first level where the peak
    /// count changes least, among levels that still find peaks.
    fn select_threshold(
        &self,
        image: &ArrayView3<'_, f32>,
        window_maxima: &[([usize; 3], f32)],
    ) -> Option<f32> {
        let (lo, hi) = min_max(image);
        if hi <= lo {
            return None;
        }
        let step = (hi - lo) / THRESHOLD_SWEEP_LEVELS as f32;
        let levels: Vec<f32> = (0..THRESHOLD_SWEEP_LEVELS)
            .map(|i| lo + step * i as f32)
            .collect();
        let counts: Vec<usize> = levels.iter().map(|&t| self.peaks(window_maxima, t).len()).collect();

        let best = (0..levels.len() - 1)
            .filter(|&i| counts[i] > 0 && counts[i + 1] > 0)
            .min_by_key(|&i| counts[i].abs_diff(counts[i + 1]))?;
        let index = (best + self.stringency).min(levels.len() - 1);
        tracing::debug!(
            "selected threshold {} ({} peaks) from sweep",
            levels[index],
            counts[index]
        );
        Some(levels[index])
    }

    fn equivalent_radius(area: usize, ndim: usize) -> f64 {
        let a = area as f64;
        if ndim == 2 {
            (a / PI).sqrt()
        } else {
            (3.0 * a / (4.0 * PI)).cbrt()
        }
    }
}

impl SpotFinder for LocalMaxPeakFinder {
    fn radius_convention(&self) -> RadiusConvention {
        RadiusConvention::Radius
    }

    fn find(&self, image: ArrayView3<'_, f32>) -> Result<Vec<Spot>, FinderError> {
        self.validate()?;
        require_non_empty(&image)?;

        let window_maxima = self.window_maxima(&image);
        let threshold = match self.threshold {
            Some(t) => t,
            None => match self.select_threshold(&image, &window_maxima) {
                Some(t) => t,
                None => return Ok(Vec::new()),
            },
        };

        let mut peaks = self.peaks(&window_maxima, threshold);
        peaks.sort_unstable();

        let mask: Array3<bool> = image.mapv(|v| v > threshold);
        let (labels, _) = label_components(&mask);
        let areas = peak_areas(&peaks, &labels);
        let ndim = effective_ndim(&image);

        Ok(peaks
            .iter()
            .zip(areas)
            .filter(|&(_, area)| area >= self.min_obj_area && area <= self.max_obj_area)
            .map(|(&pos, area)| {
                // Disks of neighboring peaks never overlap.
                let limit = 0.5 * nearest_peak_distance(pos, &peaks);
                let radius = Self::equivalent_radius(area, ndim).min(limit);
                let [z, y, x] = pos;
                Spot::new(z as f64, y as f64, x as f64, radius)
                    .with_attribute("intensity", f64::from(image[pos]))
                    .with_attribute("area", area as f64)
            })
            .collect())
    }
}

fn squared_distance(a: [usize; 3], b: [usize; 3]) -> usize {
    (0..3).map(|i| a[i].abs_diff(b[i]).pow(2)).sum()
}

/// Split each labeled component among the peaks inside it: every voxel goes
/// to its nearest peak, the earlier peak on ties.
fn peak_areas(peaks: &[[usize; 3]], labels: &Array3<u32>) -> Vec<usize> {
    let mut owners: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (i, &pos) in peaks.iter().enumerate() {
        owners.entry(labels[pos]).or_default().push(i);
    }
    let mut areas = vec![0usize; peaks.len()];
    for ((z, y, x), label) in labels.indexed_iter() {
        let Some(candidates) = owners.get(label) else {
            continue;
        };
        let nearest = candidates
            .iter()
            .copied()
            .min_by_key(|&i| squared_distance(peaks[i], [z, y, x]));
        if let Some(i) = nearest {
            areas[i] += 1;
        }
    }
    areas
}

fn nearest_peak_distance(pos: [usize; 3], peaks: &[[usize; 3]]) -> f64 {
    peaks
        .iter()
        .filter(|&&other| other != pos)
        .map(|&other| (squared_distance(pos, other) as f64).sqrt())
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{render_gaussian, SPOT_CENTERS, SPOT_SIGMA};
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn two_squares() -> Array3<f32> {
        let mut image = Array3::<f32>::zeros((1, 30, 30));
        for y in 4..7 {
            for x in 4..7 {
                image[[0, y, x]] = 0.4;
            }
        }
        image[[0, 5, 5]] = 0.9;
        for y in 20..22 {
            for x in 20..22 {
                image[[0, y, x]] = 0.6;
            }
        }
        image
    }

    #[test]
    fn peaks_carry_component_area() {
        let finder = LocalMaxPeakFinder::new(3, Some(0.0));
        let spots = finder.find(two_squares().view()).unwrap();
        assert_eq!(spots.len(), 2);
        assert_eq!(spots[0].voxel(), [0, 5, 5]);
        assert_eq!(spots[0].attribute("area"), Some(9.0));
        assert_relative_eq!(spots[0].radius, (9.0 / PI).sqrt());
        // Plateau resolves to its first raster voxel.
        assert_eq!(spots[1].voxel(), [0, 20, 20]);
        assert_eq!(spots[1].attribute("area"), Some(4.0));
    }

    #[test]
    fn shared_component_is_split_between_peaks() {
        let mut image = Array3::<f32>::zeros((1, 40, 40));
        for center in SPOT_CENTERS {
            render_gaussian(&mut image, center, SPOT_SIGMA, 0.75);
        }
        let component = image.iter().filter(|&&v| v > 0.0).count() as f64;

        let spots = LocalMaxPeakFinder::new(6, Some(0.0)).find(image.view()).unwrap();
        assert_eq!(spots.len(), 2);
        let areas: Vec<f64> = spots.iter().map(|s| s.attribute("area").unwrap()).collect();
        assert_relative_eq!(areas[0] + areas[1], component);

        let gap = ((18.0f64 * 18.0) * 2.0).sqrt();
        for spot in &spots {
            assert!(spot.radius <= 0.5 * gap);
            assert!(spot.radius > 1.0);
        }
    }

    #[test]
    fn area_bounds_filter_peaks() {
        let finder = LocalMaxPeakFinder {
            min_obj_area: 5,
            ..LocalMaxPeakFinder::new(3, Some(0.0))
        };
        let spots = finder.find(two_squares().view()).unwrap();
        assert_eq!(spots.len(), 1);
        assert_eq!(spots[0].voxel(), [0, 5, 5]);
    }

    #[test]
    fn min_distance_suppresses_weaker_neighbor() {
        let mut image = Array3::<f32>::zeros((1, 12, 12));
        image[[0, 5, 5]] = 1.0;
        image[[0, 5, 8]] = 0.5;
        let near = LocalMaxPeakFinder::new(4, Some(0.0));
        assert_eq!(near.find(image.view()).unwrap().len(), 1);
        let far = LocalMaxPeakFinder::new(2, Some(0.0));
        assert_eq!(far.find(image.view()).unwrap().len(), 2);
    }

    #[test]
    fn automatic_threshold_finds_both_squares() {
        let finder = LocalMaxPeakFinder::new(3, None);
        let spots = finder.find(two_squares().view()).unwrap();
        assert_eq!(spots.len(), 2);
    }

    #[test]
    fn flat_image_has_no_peaks() {
        let image = Array3::<f32>::from_elem((1, 8, 8), 0.3);
        assert!(LocalMaxPeakFinder::default().find(image.view()).unwrap().is_empty());
    }

    #[test]
    fn rejects_zero_min_distance() {
        let image = Array3::<f32>::zeros((1, 4, 4));
        let finder = LocalMaxPeakFinder::new(0, Some(0.0));
        assert!(finder.find(image.view()).is_err());
    }
}
