/*
  Copyright© 2023 Raúl Wolters(1)

  This file is part of rustronomy-binary-watershed.

  rustronomy is free software: you can redistribute it and/or modify it under
  the terms of the European Union Public License version 1.2 or later, as
  published by the European Commission.

  rustronomy is distributed in the hope that it will be useful, but WITHOUT ANY
  WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
  A PARTICULAR PURPOSE. See the European Union Public License for more details.

  You should have received a copy of the EUPL in an/all official language(s) of
  the European Union along with rustronomy.  If not, see
  <https://ec.europa.eu/info/european-union-public-licence_en/>.

  (1) Resident of the Kingdom of the Netherlands; agreement between licensor and
  licensee subject to Dutch law as per article 15 of the EUPL.
*/

//! Error types shared by all stages of the segmentation.

use std::fmt;
use thiserror::Error;

/// Result type used throughout this crate.
pub type SegmentationResult<T> = Result<T, SegmentationError>;

/// Stages of the binary watershed segmentation. Used to tag errors with the
/// stage they originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
  DistanceTransform,
  LocalMaxima,
  Markers,
  Watershed,
  Masking,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::DistanceTransform => "distance transform",
      Stage::LocalMaxima => "local maxima",
      Stage::Markers => "marker construction",
      Stage::Watershed => "marker watershed",
      Stage::Masking => "masking",
    };
    f.write_str(name)
  }
}

/// Errors that can occur while segmenting a voxel mask.
#[derive(Debug, Error)]
pub enum SegmentationError {
  /// Input had the wrong element type, was not binary, had zero extents or
  /// was otherwise unusable. Raised before any work is done.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// A coordinate had a component outside `[0, extent)`.
  #[error("coordinate {coord:?} is outside grid with extents {extents:?}")]
  OutOfBounds {
    /// The offending coordinate (x, y, z).
    coord: [usize; 3],
    /// Extents of the grid that was indexed.
    extents: [usize; 3],
  },

  /// A stage of the segmentation pipeline failed.
  #[error("{stage} stage failed: {source}")]
  Stage {
    stage: Stage,
    #[source]
    source: Box<SegmentationError>,
  },

  /// The array store does not hold an array with this name.
  #[error("no array named \"{0}\" in the array store")]
  MissingArray(String),

  /// The array store already holds an array with this name.
  #[error("an array named \"{0}\" already exists in the array store")]
  ArrayExists(String),
}

impl SegmentationError {
  /// Wraps `self` with the stage that produced it. Errors that are already
  /// tagged keep their original stage.
  pub fn in_stage(self, stage: Stage) -> Self {
    match self {
      tagged @ SegmentationError::Stage { .. } => tagged,
      other => SegmentationError::Stage { stage, source: Box::new(other) },
    }
  }

  /// Returns the stage this error originated from, if it was raised by the
  /// pipeline.
  pub fn stage(&self) -> Option<Stage> {
    match self {
      SegmentationError::Stage { stage, .. } => Some(*stage),
      _ => None,
    }
  }

  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    SegmentationError::InvalidInput(msg.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stage_tag_is_not_overwritten() {
    let err = SegmentationError::invalid("empty").in_stage(Stage::LocalMaxima);
    let err = err.in_stage(Stage::Watershed);
    assert_eq!(err.stage(), Some(Stage::LocalMaxima));
    assert_eq!(err.to_string(), "local maxima stage failed: invalid input: empty");
  }
}
