//! Detector selection and parameters, loadable from JSON.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::finder::{BlobDetector, LocalMaxPeakFinder, SpotFinder, TrackpyLocalMaxPeakFinder};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read detector config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid detector config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Detection algorithm names as used on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Method {
    #[default]
    Blob,
    LocalMax,
    Trackpy,
}

/// A detection algorithm together with its parameters.
///
/// Serialized with a `method` tag, e.g.
/// `{"method": "local-max", "min_distance": 4}`. Omitted parameters take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum FinderConfig {
    Blob(BlobDetector),
    LocalMax(LocalMaxPeakFinder),
    Trackpy(TrackpyLocalMaxPeakFinder),
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self::for_method(Method::default())
    }
}

impl FinderConfig {
    /// Default parameters for `method`.
    pub fn for_method(method: Method) -> Self {
        match method {
            Method::Blob => FinderConfig::Blob(BlobDetector::default()),
            Method::LocalMax => FinderConfig::LocalMax(LocalMaxPeakFinder::default()),
            Method::Trackpy => FinderConfig::Trackpy(TrackpyLocalMaxPeakFinder::default()),
        }
    }

    pub fn method(&self) -> Method {
        match self {
            FinderConfig::Blob(_) => Method::Blob,
            FinderConfig::LocalMax(_) => Method::LocalMax,
            FinderConfig::Trackpy(_) => Method::Trackpy,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn build(&self) -> Box<dyn SpotFinder> {
        match self {
            FinderConfig::Blob(finder) => Box::new(finder.clone()),
            FinderConfig::LocalMax(finder) => Box::new(finder.clone()),
            FinderConfig::Trackpy(finder) => Box::new(finder.clone()),
        }
    }
}
