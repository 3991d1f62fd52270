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

#![doc(
  html_logo_url = "https://raw.githubusercontent.com/smups/rustronomy/main/logos/Rustronomy_ferris.png?raw=true"
)]
//! Rustronomy-binary-watershed splits the foreground of a binary 2D or 3D
//! voxel mask into separate segments, one per "grain", using marker-controlled
//! watershed segmentation (see Beucher & Meyer, 1993[^1]).
//!
//! # Features
//! The segmentation is built from three algorithms, each of which is exposed
//! on its own as well:
//! 1. an exact signed Euclidean distance transform (`DistanceTransform`),
//! 2. a local maxima search with noise-tolerance suppression (`MaximaFinder`),
//! 3. a priority-flood marker-controlled watershed (`MarkerWatershed`).
//!
//! `BinaryWatershed` chains them: the distance map of the mask is computed,
//! its distinct peaks become markers, the inverted distance map is flooded
//! from those markers and the result is masked back to the foreground.
//!
//! In addition, `rustronomy-binary-watershed` provides extra functionality which
//! can be accessed via cargo feature gates. A list of all additional features
//! [can be found below](#cargo-feature-gates).
//!
//! ## Short example: separating two touching discs
//! `rustronomy-binary-watershed` uses the "builder pattern" to configure the
//! segmentation before executing it. Create a `SegmentationBuilder`, set the
//! options you need and call `build()`.
//! ```rust
//! use rustronomy_binary_watershed::prelude::*;
//!
//! //Two overlapping discs
//! let mask = BinaryMask::from_ndarray(
//!   nd::Array2::from_shape_fn((32, 48), |(y, x)| {
//!     let (y, x) = (y as f64, x as f64);
//!     (x - 14.0).hypot(y - 16.0) < 10.0 || (x - 32.0).hypot(y - 16.0) < 10.0
//!   }),
//!   &[1.0, 1.0],
//! )
//! .unwrap();
//!
//! let watershed = SegmentationBuilder::new().set_peak_tolerance(1.0).build().unwrap();
//! let report = watershed.run(&mask).unwrap();
//! assert_eq!(report.segment_count(), 2);
//! ```
//! [^1]: S. Beucher and F. Meyer. **The morphological approach to segmentation:
//! the watershed transformation.** *Mathematical Morphology in Image Processing*,
//! 1993.
//!
//! # Logging
//! This crate logs through the `log` facade. Install any `log` compatible
//! logger in your application to see what the segmentation is doing.
//!
//! # Cargo feature gates
//! *By default, all features behind cargo feature gates are **disabled***
//! - `jemalloc`: this feature enables the [jemalloc allocator](https://jemalloc.net).
//! Enabling this feature can improve run-time performance on machines with many
//! cores. To compile `rustronomy-binary-watershed` with the `jemalloc` feature,
//! jemalloc must be installed on the host system.
//! - `plots`: adds the `plotting` module, which renders 2D slices of distance
//! maps and label fields to png files. Plotting support adds the `plotters`
//! crate as a dependency,
//! [see the `plotters` documentation for details](https://docs.rs/plotters/).
//! - `progress`: this feature enables a progress bar for the watershed flooding.
//! Enabling this feature adds the `indicatif` crate as a dependency.
//! - `debug`: this feature enables a per-stage timing report, logged at debug
//! level after each segmentation. Enabling this feature does not add additional
//! dependencies.

//Set Jemalloc as the global allocator for this crate
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

pub mod distance;
pub mod error;
pub mod grid;
pub mod maxima;
pub mod pipeline;
pub mod store;
pub mod watershed;

#[cfg(feature = "plots")]
pub mod plotting;

pub use distance::{DistanceMap, DistanceTransform};
pub use error::{SegmentationError, SegmentationResult, Stage};
pub use grid::{
  BinaryMask, Connectivity, Coord, DistanceField, LabelField, MarkerField, Neighbours, Scalar,
  VoxelGrid,
};
pub use maxima::{MaximaFinder, Peak};
pub use pipeline::{segment, BinaryWatershed, SegmentationBuilder, SegmentationReport};
pub use store::{ArrayStore, BinaryWatershedFilter, DataArray, MemoryStore};
pub use watershed::{markers_from_peaks, MarkerWatershed, WATERSHED_LINE};

/// Label of voxels that do not belong to any segment.
pub const UNLABELED: u32 = 0;

//Utility prelude for batch import
pub mod prelude {
  pub use crate::{
    segment, BinaryMask, BinaryWatershed, Connectivity, DistanceTransform, LabelField,
    MarkerWatershed, MaximaFinder, SegmentationBuilder, SegmentationError, VoxelGrid,
    UNLABELED, WATERSHED_LINE,
  };
  pub use ndarray as nd;
  #[cfg(feature = "plots")]
  pub mod color_maps {
    pub use crate::plotting::grey_scale;
    pub use crate::plotting::labels;
  }
}

////////////////////////////////////////////////////////////////////////////////
//                              HELPER FUNCTIONS                              //
////////////////////////////////////////////////////////////////////////////////

#[cfg(feature = "progress")]
fn set_up_bar(voxels: u64) -> indicatif::ProgressBar {
  const TEMPLATE: &str = "{spinner}[{elapsed}/{duration}] flooded {pos}/{len} voxels {bar:60}";
  let bar = indicatif::ProgressBar::new(voxels);
  if let Ok(style) = indicatif::ProgressStyle::with_template(TEMPLATE) {
    bar.set_style(style);
  }
  bar
}

////////////////////////////////////////////////////////////////////////////////
//                             OPTIONAL MODULES                               //
////////////////////////////////////////////////////////////////////////////////
#[cfg(feature = "debug")]
mod performance_monitoring {

  #[derive(Clone, Debug, Default)]
  pub struct PerfReport {
    pub voxels: usize,
    pub peaks: usize,
    pub distance_ms: usize,
    pub maxima_ms: usize,
    pub watershed_ms: usize,
    pub total_ms: usize,
  }

  impl PerfReport {
    pub fn stage_total(&self) -> usize {
      self.distance_ms + self.maxima_ms + self.watershed_ms
    }
  }

  impl std::fmt::Display for PerfReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      writeln!(f, ">---------[Performance Summary]---------")?;
      writeln!(f, ">  {} voxels, {} peaks", self.voxels, self.peaks)?;
      writeln!(f, ">  Distance transform: {}ms", self.distance_ms)?;
      writeln!(f, ">  Local maxima: {}ms", self.maxima_ms)?;
      writeln!(f, ">  Watershed: {}ms", self.watershed_ms)?;
      writeln!(f, ">--------------------------------+ total")?;
      writeln!(
        f,
        ">  {}ms with {}ms overhead (Δt)",
        self.total_ms,
        self.total_ms.saturating_sub(self.stage_total())
      )
    }
  }
}
