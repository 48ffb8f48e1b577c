//! Spot detection for multiplexed fluorescence image stacks.
//!
//! Spots are localized either once on a reference image and re-measured in
//! every (round, channel) plane, or independently per plane. Results land in
//! an [`IntensityTable`] of spots × rounds × channels.

pub mod config;
pub mod detect;
pub mod error;
pub mod finder;
pub mod intensity_table;
pub mod measure;
pub mod reference;
pub mod slices;
pub mod stack;
pub mod zarr;

#[cfg(test)]
mod testing;

pub use config::{FinderConfig, Method};
pub use detect::{detect_spots, DetectParams};
pub use error::{Result, SpotError};
pub use finder::{RadiusConvention, Spot, SpotFinder};
pub use intensity_table::IntensityTable;
pub use measure::{Aggregator, Measurement};
pub use stack::{Axes, ImageStack};
