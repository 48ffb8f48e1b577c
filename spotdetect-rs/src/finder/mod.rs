//! Spot finding algorithms.
//!
//! Every algorithm implements [`SpotFinder`]: a dense (z, y, x) volume in,
//! an ordered list of [`Spot`]s out. 2D images are z=1 volumes.

mod blob;
mod filters;
mod local_max;
mod trackpy;

pub use blob::BlobDetector;
pub use local_max::LocalMaxPeakFinder;
pub use trackpy::TrackpyLocalMaxPeakFinder;

use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// How a finder's spot radius should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadiusConvention {
    /// Simple bounding radius.
    Radius,
    /// Second-moment radius estimate.
    RadiusOfGyration,
}

impl RadiusConvention {
    pub fn from_gyration_flag(radius_is_gyration: bool) -> Self {
        if radius_is_gyration {
            RadiusConvention::RadiusOfGyration
        } else {
            RadiusConvention::Radius
        }
    }

    pub fn is_gyration(self) -> bool {
        self == RadiusConvention::RadiusOfGyration
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FinderError {
    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("unsupported image shape {shape:?}: {reason}")]
    UnsupportedShape { shape: Vec<usize>, reason: String },
}

/// A candidate spot. Coordinates live in the space of the image it was found
/// in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub z: f64,
    pub y: f64,
    pub x: f64,
    pub radius: f64,
    /// Extra per-spot scalars reported by the finder (`intensity`, `mass`, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,
}

impl Spot {
    pub fn new(z: f64, y: f64, x: f64, radius: f64) -> Self {
        Self {
            z,
            y,
            x,
            radius,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: f64) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).copied()
    }

    /// Center rounded to the nearest voxel, as signed (z, y, x).
    pub fn voxel(&self) -> [isize; 3] {
        [
            self.z.round() as isize,
            self.y.round() as isize,
            self.x.round() as isize,
        ]
    }
}

/// Capability shared by all detection algorithms.
///
/// `find` must be deterministic for identical input and must not depend on
/// earlier calls.
pub trait SpotFinder: Sync {
    fn radius_convention(&self) -> RadiusConvention;

    fn find(&self, image: ArrayView3<'_, f32>) -> Result<Vec<Spot>, FinderError>;
}

impl<T: SpotFinder + ?Sized> SpotFinder for Box<T> {
    fn radius_convention(&self) -> RadiusConvention {
        (**self).radius_convention()
    }

    fn find(&self, image: ArrayView3<'_, f32>) -> Result<Vec<Spot>, FinderError> {
        (**self).find(image)
    }
}

pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<(), FinderError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FinderError::InvalidParameter {
            name,
            reason: format!("must be a positive number, got {}", value),
        })
    }
}

pub(crate) fn require_non_empty(image: &ArrayView3<'_, f32>) -> Result<(), FinderError> {
    if image.is_empty() {
        return Err(FinderError::UnsupportedShape {
            shape: image.shape().to_vec(),
            reason: "image has no voxels".to_string(),
        });
    }
    Ok(())
}

/// Number of spatial dimensions that carry information (2 for z=1 volumes).
pub(crate) fn effective_ndim(image: &ArrayView3<'_, f32>) -> usize {
    if image.len_of(ndarray::Axis(0)) == 1 {
        2
    } else {
        3
    }
}
