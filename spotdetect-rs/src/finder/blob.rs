//! Laplacian-of-Gaussian blob detection over a linear sigma scale space.

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use super::filters::{gaussian_filter, laplacian};
use super::{
    effective_ndim, require_non_empty, require_positive, FinderError, RadiusConvention, Spot,
    SpotFinder,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobDetector {
    pub min_sigma: f64,
    pub max_sigma: f64,
    pub num_sigma: usize,
    /// Minimum scale-normalized response for a blob to be kept.
    pub threshold: f64,
    /// Blobs whose centers are closer than `(1 - overlap) * (r_a + r_b)` are
    /// merged into the stronger one.
    pub overlap: f64,
}

impl Default for BlobDetector {
    fn default() -> Self {
        Self {
            min_sigma: 1.0,
            max_sigma: 4.0,
            num_sigma: 5,
            threshold: 0.0,
            overlap: 0.5,
        }
    }
}

struct Candidate {
    scale: usize,
    voxel: [usize; 3],
    response: f64,
}

impl BlobDetector {
    pub fn new(min_sigma: f64, max_sigma: f64, num_sigma: usize, threshold: f64) -> Self {
        Self {
            min_sigma,
            max_sigma,
            num_sigma,
            threshold,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), FinderError> {
        require_positive("min_sigma", self.min_sigma)?;
        require_positive("max_sigma", self.max_sigma)?;
        if self.max_sigma < self.min_sigma {
            return Err(FinderError::InvalidParameter {
                name: "max_sigma",
                reason: format!(
                    "{} is smaller than min_sigma {}",
                    self.max_sigma, self.min_sigma
                ),
            });
        }
        if self.num_sigma == 0 {
            return Err(FinderError::InvalidParameter {
                name: "num_sigma",
                reason: "at least one scale is required".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.overlap) {
            return Err(FinderError::InvalidParameter {
                name: "overlap",
                reason: format!("must lie in [0, 1], got {}", self.overlap),
            });
        }
        Ok(())
    }

    fn sigmas(&self) -> Vec<f64> {
        if self.num_sigma == 1 {
            return vec![self.min_sigma];
        }
        let step = (self.max_sigma - self.min_sigma) / (self.num_sigma - 1) as f64;
        (0..self.num_sigma)
            .map(|i| self.min_sigma + step * i as f64)
            .collect()
    }

    fn scale_space(&self, image: &ArrayView3<'_, f32>, sigmas: &[f64]) -> Vec<Array3<f64>> {
        sigmas
            .iter()
            .map(|&sigma| {
                let smoothed = gaussian_filter(image, sigma);
                laplacian(&smoothed).mapv(|v| -v * sigma * sigma)
            })
            .collect()
    }

    /// Voxels that are maximal in their (scale, z, y, x) 3^4 neighborhood.
    fn local_maxima(&self, space: &[Array3<f64>]) -> Vec<Candidate> {
        let mut out = Vec::new();
        let n_scales = space.len() as isize;
        for (scale, layer) in space.iter().enumerate() {
            let (d, h, w) = layer.dim();
            for ((z, y, x), &value) in layer.indexed_iter() {
                if value <= self.threshold {
                    continue;
                }
                let mut is_max = true;
                'search: for ds in -1isize..=1 {
                    let s = scale as isize + ds;
                    if s < 0 || s >= n_scales {
                        continue;
                    }
                    let other = &space[s as usize];
                    for dz in -1isize..=1 {
                        for dy in -1isize..=1 {
                            for dx in -1isize..=1 {
                                let (nz, ny, nx) =
                                    (z as isize + dz, y as isize + dy, x as isize + dx);
                                if nz < 0
                                    || ny < 0
                                    || nx < 0
                                    || nz >= d as isize
                                    || ny >= h as isize
                                    || nx >= w as isize
                                {
                                    continue;
                                }
                                if other[[nz as usize, ny as usize, nx as usize]] > value {
                                    is_max = false;
                                    break 'search;
                                }
                            }
                        }
                    }
                }
                if is_max {
                    out.push(Candidate {
                        scale,
                        voxel: [z, y, x],
                        response: value,
                    });
                }
            }
        }
        out
    }

    fn prune(&self, mut candidates: Vec<Candidate>, radii: &[f64]) -> Vec<Candidate> {
        // Stable: equal responses keep scale-then-raster order.
        candidates.sort_by(|a, b| b.response.total_cmp(&a.response));
        let mut kept: Vec<Candidate> = Vec::new();
        for cand in candidates {
            let r_c = radii[cand.scale];
            let clash = kept.iter().any(|k| {
                let dist2: f64 = (0..3)
                    .map(|i| {
                        let d = k.voxel[i] as f64 - cand.voxel[i] as f64;
                        d * d
                    })
                    .sum();
                let limit = (1.0 - self.overlap) * (radii[k.scale] + r_c);
                dist2 < limit * limit
            });
            if !clash {
                kept.push(cand);
            }
        }
        kept
    }
}

impl SpotFinder for BlobDetector {
    fn radius_convention(&self) -> RadiusConvention {
        RadiusConvention::Radius
    }

    fn find(&self, image: ArrayView3<'_, f32>) -> Result<Vec<Spot>, FinderError> {
        self.validate()?;
        require_non_empty(&image)?;

        let sigmas = self.sigmas();
        let ndim = effective_ndim(&image) as f64;
        let radii: Vec<f64> = sigmas.iter().map(|s| s * ndim.sqrt()).collect();

        let space = self.scale_space(&image, &sigmas);
        let mut blobs = self.prune(self.local_maxima(&space), &radii);
        blobs.sort_by_key(|c| c.voxel);

        Ok(blobs
            .into_iter()
            .map(|c| {
                let [z, y, x] = c.voxel;
                Spot::new(z as f64, y as f64, x as f64, radii[c.scale])
                    .with_attribute("intensity", f64::from(image[c.voxel]))
                    .with_attribute("response", c.response)
            })
            .collect())
    }
}
