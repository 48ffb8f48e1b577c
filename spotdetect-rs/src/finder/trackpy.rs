//! Particle-tracking style peak finder: grey-dilation maxima, centroid
//! refinement, mass and radius-of-gyration filtering.

use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

use super::filters::{ball_offsets, grey_dilation, offset_voxel, percentile};
use super::{require_non_empty, require_positive, FinderError, RadiusConvention, Spot, SpotFinder};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackpyLocalMaxPeakFinder {
    /// Expected spot diameter in pixels; must be odd.
    pub spot_diameter: usize,
    /// Spots with integrated brightness at or below this are dropped.
    pub min_mass: f64,
    /// Spots with a radius of gyration at or above this are dropped.
    pub max_size: f64,
    /// Minimum distance between two reported spots.
    pub separation: f64,
    /// Maxima must exceed this percentile of the image.
    pub percentile: f64,
}

impl Default for TrackpyLocalMaxPeakFinder {
    fn default() -> Self {
        Self {
            spot_diameter: 3,
            min_mass: 0.01,
            max_size: 10.0,
            separation: 2.0,
            percentile: 64.0,
        }
    }
}

#[derive(Debug)]
struct Refined {
    center: [f64; 3],
    mass: f64,
    gyration: f64,
}

impl TrackpyLocalMaxPeakFinder {
    pub fn new(spot_diameter: usize, min_mass: f64, max_size: f64, separation: f64) -> Self {
        Self {
            spot_diameter,
            min_mass,
            max_size,
            separation,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), FinderError> {
        if self.spot_diameter % 2 == 0 {
            return Err(FinderError::InvalidParameter {
                name: "spot_diameter",
                reason: format!("must be odd, got {}", self.spot_diameter),
            });
        }
        require_positive("max_size", self.max_size)?;
        require_positive("separation", self.separation)?;
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(FinderError::InvalidParameter {
                name: "percentile",
                reason: format!("must lie in [0, 100], got {}", self.percentile),
            });
        }
        Ok(())
    }

    fn feature_radius(&self) -> f64 {
        (self.spot_diameter / 2) as f64
    }

    fn maxima(&self, image: &ArrayView3<'_, f32>) -> Vec<([usize; 3], f32)> {
        let threshold = percentile(image, self.percentile);
        let dilated = grey_dilation(image, self.feature_radius());
        let mut maxima: Vec<([usize; 3], f32)> = image
            .indexed_iter()
            .filter(|&((z, y, x), &v)| v > threshold && v == dilated[[z, y, x]])
            .map(|((z, y, x), &v)| ([z, y, x], v))
            .collect();
        maxima.sort_by(|a, b| b.1.total_cmp(&a.1));

        let sep2 = self.separation * self.separation;
        let mut kept: Vec<([usize; 3], f32)> = Vec::new();
        for (pos, v) in maxima {
            let close = kept.iter().any(|(k, _)| {
                let d2: f64 = (0..3)
                    .map(|i| {
                        let d = k[i] as f64 - pos[i] as f64;
                        d * d
                    })
                    .sum();
                d2 < sep2
            });
            if !close {
                kept.push((pos, v));
            }
        }
        kept
    }

    fn refine(&self, image: &ArrayView3<'_, f32>, pos: [usize; 3]) -> Option<Refined> {
        let (d, h, w) = image.dim();
        let dims = [d, h, w];
        let offsets = ball_offsets(self.feature_radius(), d);
        let samples: Vec<([usize; 3], f64)> = offsets
            .iter()
            .filter_map(|&o| offset_voxel(pos, o, dims))
            .map(|p| (p, f64::from(image[p])))
            .collect();

        let mass: f64 = samples.iter().map(|(_, v)| v).sum();
        if mass <= 0.0 {
            return None;
        }
        let mut center = [0.0f64; 3];
        for (p, v) in &samples {
            for i in 0..3 {
                center[i] += p[i] as f64 * v;
            }
        }
        center.iter_mut().for_each(|c| *c /= mass);

        let second: f64 = samples
            .iter()
            .map(|(p, v)| {
                let d2: f64 = (0..3)
                    .map(|i| {
                        let d = p[i] as f64 - center[i];
                        d * d
                    })
                    .sum();
                v * d2
            })
            .sum();
        Some(Refined {
            center,
            mass,
            gyration: (second / mass).sqrt(),
        })
    }
}

impl SpotFinder for TrackpyLocalMaxPeakFinder {
    fn radius_convention(&self) -> RadiusConvention {
        RadiusConvention::RadiusOfGyration
    }

    fn find(&self, image: ArrayView3<'_, f32>) -> Result<Vec<Spot>, FinderError> {
        self.validate()?;
        require_non_empty(&image)?;

        let mut spots: Vec<([usize; 3], Spot)> = self
            .maxima(&image)
            .into_iter()
            .filter_map(|(pos, peak)| {
                let refined = self.refine(&image, pos)?;
                if refined.mass <= self.min_mass || refined.gyration >= self.max_size {
                    return None;
                }
                let [z, y, x] = refined.center;
                let spot = Spot::new(z, y, x, refined.gyration)
                    .with_attribute("mass", refined.mass)
                    .with_attribute("intensity", f64::from(peak));
                Some((pos, spot))
            })
            .collect();
        spots.sort_by_key(|(pos, _)| *pos);
        Ok(spots.into_iter().map(|(_, s)| s).collect())
    }
}
