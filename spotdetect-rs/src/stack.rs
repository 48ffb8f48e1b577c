//! Labeled five-axis image stack: (round, channel, z, y, x).
//!
//! Rounds and channels carry label values so that a sub-selection keeps
//! addressing planes by their acquisition index rather than by position.

use ndarray::{Array3, Array5, ArrayView3, ArrayViewD, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SpotError};

/// Named axes of an [`ImageStack`], in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axes {
    Round,
    Channel,
    Z,
    Y,
    X,
}

impl Axes {
    pub const ALL: [Axes; 5] = [Axes::Round, Axes::Channel, Axes::Z, Axes::Y, Axes::X];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Axes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axes::Round => "round",
            Axes::Channel => "channel",
            Axes::Z => "z",
            Axes::Y => "y",
            Axes::X => "x",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageStack {
    data: Array5<f32>,
    rounds: Vec<usize>,
    channels: Vec<usize>,
}

impl ImageStack {
    /// Wrap a (round, channel, z, y, x) array; rounds and channels are labeled
    /// `0..n`.
    pub fn new(data: Array5<f32>) -> Result<Self> {
        let (n_r, n_c, ..) = data.dim();
        Self::with_labels(data, (0..n_r).collect(), (0..n_c).collect())
    }

    pub fn with_labels(data: Array5<f32>, rounds: Vec<usize>, channels: Vec<usize>) -> Result<Self> {
        let (n_r, n_c, n_z, n_y, n_x) = data.dim();
        if rounds.len() != n_r || channels.len() != n_c {
            return Err(SpotError::InvalidStack(format!(
                "{} round labels and {} channel labels for a stack with {} rounds and {} channels",
                rounds.len(),
                channels.len(),
                n_r,
                n_c
            )));
        }
        if n_z == 0 || n_y == 0 || n_x == 0 {
            return Err(SpotError::InvalidStack(format!(
                "spatial shape ({}, {}, {}) has an empty axis",
                n_z, n_y, n_x
            )));
        }
        if has_duplicates(&rounds) || has_duplicates(&channels) {
            return Err(SpotError::InvalidStack(
                "round and channel labels must be unique".to_string(),
            ));
        }
        Ok(Self {
            data,
            rounds,
            channels,
        })
    }

    pub fn size(&self, axis: Axes) -> usize {
        self.data.len_of(Axis(axis.index()))
    }

    pub fn num_rounds(&self) -> usize {
        self.size(Axes::Round)
    }

    pub fn num_channels(&self) -> usize {
        self.size(Axes::Channel)
    }

    pub fn num_planes(&self) -> usize {
        self.num_rounds() * self.num_channels()
    }

    /// Spatial shape (z, y, x) shared by every plane.
    pub fn spatial_shape(&self) -> [usize; 3] {
        let (_, _, z, y, x) = self.data.dim();
        [z, y, x]
    }

    pub fn rounds(&self) -> &[usize] {
        &self.rounds
    }

    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    pub fn data(&self) -> &Array5<f32> {
        &self.data
    }

    /// Plane at round/channel *positions* (not labels).
    pub fn plane(&self, round: usize, channel: usize) -> ArrayView3<'_, f32> {
        self.data
            .index_axis(Axis(0), round)
            .index_axis_move(Axis(0), channel)
    }

    /// (round position, channel position) pairs in round-major order.
    pub fn plane_indices(&self) -> Vec<(usize, usize)> {
        let n_c = self.num_channels();
        (0..self.num_rounds())
            .flat_map(|r| (0..n_c).map(move |c| (r, c)))
            .collect()
    }

    /// Slice by any combination of `axis = position` constraints. Constrained
    /// axes are removed from the returned view.
    pub fn sel(&self, constraints: &[(Axes, usize)]) -> Result<ArrayViewD<'_, f32>> {
        let mut sorted = constraints.to_vec();
        sorted.sort_by(|a, b| b.0.cmp(&a.0));
        if sorted.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(SpotError::InvalidStack(
                "an axis may be constrained at most once".to_string(),
            ));
        }

        let mut view = self.data.view().into_dyn();
        // Highest axis first so remaining axis positions stay valid.
        for (axis, value) in sorted {
            let len = self.size(axis);
            if value >= len {
                return Err(SpotError::InvalidStack(format!(
                    "{} index {} out of range (size {})",
                    axis, value, len
                )));
            }
            view = view.index_axis_move(Axis(axis.index()), value);
        }
        Ok(view)
    }

    /// Keep only the given round and channel positions, in the given order.
    pub fn isel(&self, rounds: &[usize], channels: &[usize]) -> Result<ImageStack> {
        for (axis, picks) in [(Axes::Round, rounds), (Axes::Channel, channels)] {
            if let Some(&bad) = picks.iter().find(|&&i| i >= self.size(axis)) {
                return Err(SpotError::InvalidStack(format!(
                    "{} index {} out of range (size {})",
                    axis,
                    bad,
                    self.size(axis)
                )));
            }
        }
        let data = self
            .data
            .select(Axis(0), rounds)
            .select(Axis(1), channels);
        ImageStack::with_labels(
            data,
            rounds.iter().map(|&i| self.rounds[i]).collect(),
            channels.iter().map(|&i| self.channels[i]).collect(),
        )
    }

    /// Element-wise maximum over `axes`. Projected axes keep size one and the
    /// label of their first entry.
    pub fn max_proj(&self, axes: &[Axes]) -> Result<ImageStack> {
        if self.num_planes() == 0 {
            return Err(SpotError::EmptyStack);
        }
        let mut data = self.data.clone();
        for axis in axes {
            let ax = Axis(axis.index());
            data = data
                .fold_axis(ax, f32::NEG_INFINITY, |&acc, &v| acc.max(v))
                .insert_axis(ax);
        }
        let rounds = if axes.contains(&Axes::Round) {
            vec![self.rounds[0]]
        } else {
            self.rounds.clone()
        };
        let channels = if axes.contains(&Axes::Channel) {
            vec![self.channels[0]]
        } else {
            self.channels.clone()
        };
        ImageStack::with_labels(data, rounds, channels)
    }

    /// Max projection over every round and channel as a single volume.
    pub fn max_proj_spatial(&self) -> Result<Array3<f32>> {
        let mut planes = self
            .plane_indices()
            .into_iter()
            .map(|(r, c)| self.plane(r, c));
        let first = planes.next().ok_or(SpotError::EmptyStack)?;
        let mut acc = first.to_owned();
        for plane in planes {
            Zip::from(&mut acc).and(&plane).for_each(|a, &v| {
                if v > *a {
                    *a = v;
                }
            });
        }
        Ok(acc)
    }
}

fn has_duplicates(labels: &[usize]) -> bool {
    let mut sorted = labels.to_vec();
    sorted.sort_unstable();
    sorted.windows(2).any(|w| w[0] == w[1])
}
