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

//! Binary watershed segmentation: distance map, peaks, flooding, masking.

use ndarray as nd;

use crate::{
  distance::DistanceTransform,
  error::{SegmentationError, SegmentationResult, Stage},
  grid::{BinaryMask, Connectivity, DistanceField, LabelField},
  maxima::{MaximaFinder, Peak},
  watershed::{markers_from_peaks, MarkerWatershed},
  UNLABELED,
};

/// Default noise tolerance used to separate peaks of the distance map.
pub const DEFAULT_PEAK_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
/// Builder for configuring a binary watershed segmentation.
///
/// Start with `SegmentationBuilder::new()`, adjust the options you need and
/// call `build()` to obtain a `BinaryWatershed`, which is `Send + Sync` and can
/// be used to segment any number of masks.
pub struct SegmentationBuilder {
  peak_tolerance: f64,
  mark_watershed_line: bool,
  inside_is_positive: bool,
  connectivity: Connectivity,
}

impl Default for SegmentationBuilder {
  fn default() -> Self {
    SegmentationBuilder {
      peak_tolerance: DEFAULT_PEAK_TOLERANCE,
      mark_watershed_line: false,
      inside_is_positive: true,
      connectivity: Connectivity::Face,
    }
  }
}

impl SegmentationBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the minimum dip in the distance map between two peaks for them to
  /// seed separate segments.
  pub fn set_peak_tolerance(mut self, tolerance: f64) -> Self {
    self.peak_tolerance = tolerance;
    self
  }

  /// Mark voxels between two segments with `WATERSHED_LINE` instead of
  /// assigning them to either segment.
  pub fn set_mark_watershed_line(mut self, mark: bool) -> Self {
    self.mark_watershed_line = mark;
    self
  }

  /// Sign convention of the distance map returned in the `SegmentationReport`.
  /// The labels do not depend on this setting.
  pub fn set_inside_is_positive(mut self, inside_is_positive: bool) -> Self {
    self.inside_is_positive = inside_is_positive;
    self
  }

  pub fn set_connectivity(mut self, connectivity: Connectivity) -> Self {
    self.connectivity = connectivity;
    self
  }

  /// Build a `BinaryWatershed` from the current configuration. Returns an
  /// `InvalidInput` error if the peak tolerance is negative or not finite.
  pub fn build(self) -> SegmentationResult<BinaryWatershed> {
    if !(self.peak_tolerance.is_finite() && self.peak_tolerance >= 0.0) {
      Err(SegmentationError::invalid(format!(
        "peak tolerance must be finite and non-negative, got {}",
        self.peak_tolerance
      )))?
    }
    Ok(BinaryWatershed {
      distance: DistanceTransform::new().with_inside_is_positive(self.inside_is_positive),
      //Background voxels of the distance map never seed or join peaks
      maxima: MaximaFinder::new()
        .with_tolerance(self.peak_tolerance)
        .with_strict_on_plateau(true)
        .with_connectivity(self.connectivity)
        .with_floor(Some(0.0)),
      watershed: MarkerWatershed::new()
        .with_connectivity(self.connectivity)
        .with_mark_watershed_line(self.mark_watershed_line),
    })
  }
}

#[derive(Debug, Clone)]
/// Everything produced by a single segmentation run.
pub struct SegmentationReport {
  /// Segment labels, zero outside the mask.
  pub labels: LabelField,
  /// Seeds in label order: `peaks[i]` seeded label `i + 1`.
  pub peaks: Vec<Peak>,
  /// Signed distance map, with the configured sign convention.
  pub distance: DistanceField,
  /// True if the mask held only foreground or only background voxels.
  pub degenerate: bool,
}

impl SegmentationReport {
  /// Number of segments.
  pub fn segment_count(&self) -> usize {
    self.peaks.len()
  }
}

#[derive(Debug, Clone, Copy)]
/// Configured binary watershed segmentation. Create one with
/// `SegmentationBuilder`.
///
/// Segmenting a mask runs five stages, each to completion before the next:
/// 1. signed distance transform of the mask,
/// 2. peak search in the distance map (inside the mask only),
/// 3. one marker per peak, numbered in peak order,
/// 4. watershed of the inverted distance map from those markers,
/// 5. removal of all labels outside the mask.
pub struct BinaryWatershed {
  distance: DistanceTransform,
  maxima: MaximaFinder,
  watershed: MarkerWatershed,
}

impl BinaryWatershed {
  /// Returns the segment labels of `mask`.
  pub fn segment(&self, mask: &BinaryMask) -> SegmentationResult<LabelField> {
    Ok(self.run(mask)?.labels)
  }

  /// Segments `mask` and returns the labels together with the intermediate
  /// peaks and distance map.
  pub fn run(&self, mask: &BinaryMask) -> SegmentationResult<SegmentationReport> {
    #[cfg(feature = "debug")]
    let mut perf = crate::performance_monitoring::PerfReport::default();
    #[cfg(feature = "debug")]
    let run_start = std::time::Instant::now();

    if mask.is_empty() {
      Err(SegmentationError::invalid("mask has no voxels"))?
    }

    //(1) Distance map. Peak search always happens on the inside-positive map
    #[cfg(feature = "debug")]
    let stage_start = std::time::Instant::now();
    let map = self.distance.compute(mask).map_err(|err| err.in_stage(Stage::DistanceTransform))?;
    let inside_up = if self.distance.inside_is_positive() {
      map.field.clone()
    } else {
      map.field.map(|&d| -d)
    };
    #[cfg(feature = "debug")]
    {
      perf.distance_ms = stage_start.elapsed().as_millis() as usize;
    }

    //(2) Peaks
    #[cfg(feature = "debug")]
    let stage_start = std::time::Instant::now();
    let peaks = self.maxima.find(&inside_up).map_err(|err| err.in_stage(Stage::LocalMaxima))?;
    #[cfg(feature = "debug")]
    {
      perf.maxima_ms = stage_start.elapsed().as_millis() as usize;
    }

    //(3) Markers
    let markers = markers_from_peaks(mask, &peaks).map_err(|err| err.in_stage(Stage::Markers))?;

    //(4) Flood the inverted distance map: the deepest interior floods first
    #[cfg(feature = "debug")]
    let stage_start = std::time::Instant::now();
    let max = inside_up.max_value().unwrap_or(0.0);
    let elevation = inside_up.map(|&d| max - d);
    let mut labels =
      self.watershed.transform(&elevation, &markers).map_err(|err| err.in_stage(Stage::Watershed))?;
    #[cfg(feature = "debug")]
    {
      perf.watershed_ms = stage_start.elapsed().as_millis() as usize;
    }

    //(5) Nothing outside the mask is labeled
    apply_mask(&mut labels, mask).map_err(|err| err.in_stage(Stage::Masking))?;

    log::info!(
      "segmented {} voxels into {} segments (tolerance {})",
      mask.len(),
      peaks.len(),
      self.maxima.tolerance()
    );

    #[cfg(feature = "debug")]
    {
      perf.voxels = mask.len();
      perf.peaks = peaks.len();
      perf.total_ms = run_start.elapsed().as_millis() as usize;
      log::debug!("{perf}");
    }

    Ok(SegmentationReport { labels, peaks, distance: map.field, degenerate: map.degenerate })
  }
}

/// Zeroes every label where `mask` is false.
pub fn apply_mask(labels: &mut LabelField, mask: &BinaryMask) -> SegmentationResult<()> {
  if !labels.same_shape(mask) {
    Err(SegmentationError::invalid(format!(
      "label extents {:?} do not match mask extents {:?}",
      labels.extents(),
      mask.extents()
    )))?
  }
  nd::Zip::from(labels.view_mut()).and(mask.view()).par_for_each(|label, &inside| {
    if !inside {
      *label = UNLABELED;
    }
  });
  Ok(())
}

/// Segments `mask` using the given voxel `spacing` and peak `tolerance`, with
/// all other options at their defaults.
pub fn segment(
  mask: &BinaryMask,
  spacing: &[f64],
  tolerance: f64,
) -> SegmentationResult<LabelField> {
  let mask = mask.with_spacing(spacing)?;
  SegmentationBuilder::new().set_peak_tolerance(tolerance).build()?.segment(&mask)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn negative_tolerance_does_not_build() {
    assert!(matches!(
      SegmentationBuilder::new().set_peak_tolerance(-0.5).build(),
      Err(SegmentationError::InvalidInput(_))
    ));
    assert!(SegmentationBuilder::new().set_peak_tolerance(f64::NAN).build().is_err());
  }

  #[test]
  fn polarity_only_changes_the_reported_map() {
    let mut mask = BinaryMask::new(&[6, 4], &[1.0, 1.0], false).unwrap();
    for x in 1..5 {
      mask.set(&[x, 1, 0], true).unwrap();
      mask.set(&[x, 2, 0], true).unwrap();
    }
    let up = SegmentationBuilder::new().build().unwrap().run(&mask).unwrap();
    let down =
      SegmentationBuilder::new().set_inside_is_positive(false).build().unwrap().run(&mask).unwrap();
    assert_eq!(up.labels, down.labels);
    assert_eq!(up.distance.map(|&d| -d), down.distance);
  }

  #[test]
  fn stage_failures_name_their_stage() {
    let mut mask = BinaryMask::new(&[5, 5], &[1.0, 1.0], false).unwrap();
    mask.set(&[2, 2, 0], true).unwrap();

    let mut watershed = SegmentationBuilder::new().build().unwrap();
    watershed.maxima = watershed.maxima.with_tolerance(-1.0);
    let err = watershed.run(&mask).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::LocalMaxima));
    let SegmentationError::Stage { source, .. } = err else {
      panic!("error is not tagged with a stage");
    };
    assert!(matches!(*source, SegmentationError::InvalidInput(_)));
  }

  #[test]
  fn mismatched_mask_is_rejected() {
    let mut labels = LabelField::new(&[3, 3], &[1.0, 1.0], 1).unwrap();
    let mask = BinaryMask::new(&[3, 4], &[1.0, 1.0], true).unwrap();
    assert!(apply_mask(&mut labels, &mask).is_err());
  }
}
