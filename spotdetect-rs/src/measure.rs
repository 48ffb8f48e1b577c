//! Per-plane re-measurement of candidate spots.
//!
//! Each spot's support is the ball of its radius around its center voxel. The
//! ball's bounding box is clamped to the plane before any indexing, so voxels
//! past the edge are simply not part of the neighborhood.

use clap::ValueEnum;
use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpotError};
use crate::finder::Spot;

/// Reduces the voxel values of one spot's neighborhood to a scalar.
pub trait Aggregator: Sync {
    fn aggregate(&self, values: &[f32]) -> Result<f32>;
}

impl<F> Aggregator for F
where
    F: Fn(&[f32]) -> f32 + Sync,
{
    fn aggregate(&self, values: &[f32]) -> Result<f32> {
        Ok(self(values))
    }
}

/// Built-in aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Measurement {
    #[default]
    Max,
    Mean,
    Sum,
    Median,
}

impl Aggregator for Measurement {
    fn aggregate(&self, values: &[f32]) -> Result<f32> {
        if values.is_empty() {
            return Err(SpotError::Aggregate(format!(
                "{:?} of an empty neighborhood",
                self
            )));
        }
        let value = match self {
            Measurement::Max => values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            Measurement::Sum => values.iter().map(|&v| f64::from(v)).sum::<f64>() as f32,
            Measurement::Mean => {
                (values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len() as f64) as f32
            }
            Measurement::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 1 {
                    sorted[mid]
                } else {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                }
            }
        };
        Ok(value)
    }
}

/// A spot whose clipped neighborhood held no voxels in some plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementDiagnostic {
    /// Row of the spot within the measured candidate set.
    pub spot: usize,
    /// Round label of the plane.
    pub round: usize,
    /// Channel label of the plane.
    pub channel: usize,
}

/// One plane's worth of measurements, addressed by round/channel position.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneMeasurement {
    pub round_index: usize,
    pub channel_index: usize,
    pub values: Vec<f32>,
    pub diagnostics: Vec<MeasurementDiagnostic>,
}

/// Half-open voxel ranges of a spot's bounding box, clamped to `dims`.
/// `None` when the box misses the volume entirely or the spot geometry is not
/// finite.
pub(crate) fn clipped_bounds(spot: &Spot, dims: [usize; 3]) -> Option<[(usize, usize); 3]> {
    let finite = [spot.z, spot.y, spot.x, spot.radius]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        return None;
    }
    let center = spot.voxel();
    let reach = spot.radius.max(0.0).floor() as isize;
    let mut bounds = [(0usize, 0usize); 3];
    for axis in 0..3 {
        let lo = center[axis].saturating_sub(reach).max(0);
        let hi = center[axis]
            .saturating_add(reach)
            .saturating_add(1)
            .min(dims[axis] as isize);
        if lo >= hi {
            return None;
        }
        bounds[axis] = (lo as usize, hi as usize);
    }
    Some(bounds)
}

/// Voxel values of `spot`'s ball neighborhood inside `plane`.
pub fn neighborhood(plane: &ArrayView3<'_, f32>, spot: &Spot) -> Vec<f32> {
    let (d, h, w) = plane.dim();
    let Some(bounds) = clipped_bounds(spot, [d, h, w]) else {
        return Vec::new();
    };
    let center = spot.voxel();
    let r = spot.radius.max(0.0);
    let r2 = r * r;
    let offset = |i: usize, axis: usize| (i as f64 - center[axis] as f64).powi(2);
    let mut values = Vec::new();
    for z in bounds[0].0..bounds[0].1 {
        let dz2 = offset(z, 0);
        for y in bounds[1].0..bounds[1].1 {
            let dy2 = offset(y, 1);
            for x in bounds[2].0..bounds[2].1 {
                if dz2 + dy2 + offset(x, 2) <= r2 {
                    values.push(plane[[z, y, x]]);
                }
            }
        }
    }
    values
}

/// Measure every spot in one plane. Values follow the order of `spots`.
///
/// `round` and `channel` are labels, used only for diagnostics.
pub fn measure_spot_intensities<A: Aggregator + ?Sized>(
    plane: ArrayView3<'_, f32>,
    spots: &[Spot],
    aggregator: &A,
    round: usize,
    channel: usize,
) -> Result<(Vec<f32>, Vec<MeasurementDiagnostic>)> {
    let mut values = Vec::with_capacity(spots.len());
    let mut diagnostics = Vec::new();
    for (i, spot) in spots.iter().enumerate() {
        let support = neighborhood(&plane, spot);
        if support.is_empty() {
            tracing::warn!(
                "spot {} at ({:.1}, {:.1}, {:.1}) r={:.2} lies outside round {} channel {}; measured as 0",
                i,
                spot.z,
                spot.y,
                spot.x,
                spot.radius,
                round,
                channel
            );
            diagnostics.push(MeasurementDiagnostic {
                spot: i,
                round,
                channel,
            });
            values.push(0.0);
            continue;
        }
        values.push(aggregator.aggregate(&support)?);
    }
    Ok((values, diagnostics))
}
