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

//! Marker-controlled watershed by priority flooding.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{
  error::{SegmentationError, SegmentationResult},
  grid::{Connectivity, LabelField, MarkerField, Neighbours, Scalar, VoxelGrid},
  maxima::Peak,
  UNLABELED,
};

/// Label given to voxels on the line between two basins when
/// `mark_watershed_line` is enabled. Markers may not use this label.
pub const WATERSHED_LINE: u32 = u32::MAX;

/// Entry of the flooding queue.
#[derive(Debug, Clone, Copy)]
struct FloodEntry {
  elevation: f64,
  /// Insertion counter, makes equal elevations pop in FIFO order.
  order: u64,
  index: usize,
  label: u32,
}

impl PartialEq for FloodEntry {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for FloodEntry {}

impl PartialOrd for FloodEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for FloodEntry {
  fn cmp(&self, other: &Self) -> Ordering {
    //Reversed, BinaryHeap is a max-heap and we want the lowest entry first
    other.elevation.total_cmp(&self.elevation).then_with(|| other.order.cmp(&self.order))
  }
}

#[derive(Debug, Clone, Copy, Default)]
/// Marker-controlled watershed transform.
///
/// The elevation field is flooded starting from the marker voxels, always
/// continuing at the lowest queued elevation. Each voxel gets the label of the
/// first flood that reaches it; floods that arrive at the same elevation are
/// served first-come-first-served. Voxels that no flood can reach keep label
/// zero.
///
/// With `mark_watershed_line` enabled, a voxel that is claimed by one basin
/// while it already borders a different basin becomes part of the watershed
/// line and gets the `WATERSHED_LINE` label. The flood still continues past
/// line voxels with the label of the basin that reached them.
///
/// The flooding itself is strictly sequential.
pub struct MarkerWatershed {
  connectivity: Connectivity,
  mark_watershed_line: bool,
}

impl MarkerWatershed {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
    self.connectivity = connectivity;
    self
  }

  pub fn with_mark_watershed_line(mut self, mark: bool) -> Self {
    self.mark_watershed_line = mark;
    self
  }

  /// Floods `elevation` from the non-zero voxels of `markers`.
  pub fn transform<T: Scalar>(
    &self,
    elevation: &VoxelGrid<T>,
    markers: &MarkerField,
  ) -> SegmentationResult<LabelField> {
    //(1) validate everything before doing any work
    if !elevation.same_shape(markers) {
      Err(SegmentationError::invalid(format!(
        "elevation extents {:?} do not match marker extents {:?}",
        elevation.extents(),
        markers.extents()
      )))?
    }
    let heights: Vec<f64> = elevation
      .iter()
      .map(|v| v.to_f64().filter(|f| !f.is_nan()))
      .collect::<Option<_>>()
      .ok_or_else(|| SegmentationError::invalid("elevation contains values that are not numbers"))?;
    let seeds = markers.to_vec();
    if self.mark_watershed_line && seeds.contains(&WATERSHED_LINE) {
      Err(SegmentationError::invalid(format!(
        "marker label {WATERSHED_LINE} is reserved for the watershed line"
      )))?
    }

    //(2) seed the queue in linear-index order
    let extents = markers.extents3();
    let mut labels = vec![UNLABELED; seeds.len()];
    let mut settled = vec![false; seeds.len()];
    let mut queue = BinaryHeap::with_capacity(seeds.len());
    let mut order = 0u64;
    for (index, &label) in seeds.iter().enumerate().filter(|(_, label)| **label != UNLABELED) {
      queue.push(FloodEntry { elevation: heights[index], order, index, label });
      order += 1;
    }
    log::debug!("flooding {} voxels from {} marker voxels", seeds.len(), queue.len());

    #[cfg(feature = "progress")]
    let bar = crate::set_up_bar(seeds.len() as u64);

    //(3) flood
    while let Some(FloodEntry { index, label, .. }) = queue.pop() {
      if settled[index] {
        continue;
      }
      settled[index] = true;
      #[cfg(feature = "progress")]
      {
        bar.inc(1);
      }

      let neighbours = Neighbours::new(markers.unflat(index), extents, self.connectivity);
      let contested = self.mark_watershed_line
        && seeds[index] == UNLABELED
        && neighbours.clone().map(|nb| labels[markers.flat(&nb)]).any(|other| {
          other != UNLABELED && other != WATERSHED_LINE && other != label
        });
      labels[index] = if contested { WATERSHED_LINE } else { label };

      //Line voxels keep the flood going, so pockets behind the line are reached
      for nb in neighbours {
        let nb = markers.flat(&nb);
        //Marker voxels are flooded by their own seed entry
        if !settled[nb] && seeds[nb] == UNLABELED {
          queue.push(FloodEntry { elevation: heights[nb], order, index: nb, label });
          order += 1;
        }
      }
    }

    #[cfg(feature = "progress")]
    {
      bar.finish_and_clear();
    }

    LabelField::from_vec(markers.extents(), markers.spacing(), labels)
  }
}

/// Builds a marker field with the geometry of `template`, writing label `i + 1`
/// at the coordinate of `peaks[i]`.
pub fn markers_from_peaks<T>(
  template: &VoxelGrid<T>,
  peaks: &[Peak],
) -> SegmentationResult<MarkerField> {
  if peaks.len() >= WATERSHED_LINE as usize {
    Err(SegmentationError::invalid(format!("too many peaks to label: {}", peaks.len())))?
  }
  let mut markers = template.map(|_| UNLABELED);
  for (i, peak) in peaks.iter().enumerate() {
    markers.set(&peak.coord(), i as u32 + 1)?;
  }
  Ok(markers)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn grid<T>(extents: &[usize], values: Vec<T>) -> VoxelGrid<T> {
    VoxelGrid::from_vec(extents, &vec![1.0; extents.len()], values).unwrap()
  }

  #[test]
  fn queue_pops_lowest_then_oldest() {
    let mut queue = BinaryHeap::new();
    queue.push(FloodEntry { elevation: 2.0, order: 0, index: 0, label: 1 });
    queue.push(FloodEntry { elevation: 1.0, order: 1, index: 1, label: 1 });
    queue.push(FloodEntry { elevation: 1.0, order: 2, index: 2, label: 1 });
    let popped: Vec<usize> = std::iter::from_fn(|| queue.pop()).map(|e| e.index).collect();
    assert_eq!(popped, vec![1, 2, 0]);
  }

  #[test]
  fn no_markers_gives_empty_labels() {
    let elevation = grid(&[4, 2], vec![0.0; 8]);
    let markers = grid(&[4, 2], vec![0u32; 8]);
    let labels = MarkerWatershed::new().transform(&elevation, &markers).unwrap();
    assert!(labels.iter().all(|&l| l == UNLABELED));
  }

  #[test]
  fn basins_split_at_the_ridge() {
    let elevation = grid(&[7, 1], vec![0.0, 1.0, 2.0, 3.0, 2.0, 1.0, 0.0]);
    let markers = grid(&[7, 1], vec![1u32, 0, 0, 0, 0, 0, 2]);
    let labels = MarkerWatershed::new().transform(&elevation, &markers).unwrap();
    //The ridge voxel is reached at the same elevation by both floods, the
    //flood from the first marker was queued first
    assert_eq!(labels.to_vec(), vec![1, 1, 1, 1, 2, 2, 2]);

    let lined = MarkerWatershed::new().with_mark_watershed_line(true);
    let labels = lined.transform(&elevation, &markers).unwrap();
    assert_eq!(labels.to_vec(), vec![1, 1, 1, WATERSHED_LINE, 2, 2, 2]);
  }

  #[test]
  fn mismatched_shapes_are_rejected() {
    let elevation = grid(&[4, 2], vec![0.0; 8]);
    let markers = grid(&[2, 4], vec![0u32; 8]);
    assert!(matches!(
      MarkerWatershed::new().transform(&elevation, &markers),
      Err(SegmentationError::InvalidInput(_))
    ));
  }

  #[test]
  fn reserved_label_is_rejected_with_lines() {
    let elevation = grid(&[2, 1], vec![0.0; 2]);
    let markers = grid(&[2, 1], vec![WATERSHED_LINE, 0]);
    let lined = MarkerWatershed::new().with_mark_watershed_line(true);
    assert!(matches!(
      lined.transform(&elevation, &markers),
      Err(SegmentationError::InvalidInput(_))
    ));
  }

  #[test]
  fn pockets_behind_the_line_are_flooded() {
    //Flat field: the corners only border voxels that end up on the line
    let elevation = grid(&[3, 3], vec![0.0; 9]);
    let markers = grid(&[3, 3], vec![0u32, 0, 1, 0, 3, 0, 2, 0, 0]);
    let lined = MarkerWatershed::new().with_mark_watershed_line(true);
    let labels = lined.transform(&elevation, &markers).unwrap();
    const L: u32 = WATERSHED_LINE;
    assert_eq!(labels.to_vec(), vec![1, L, 1, L, 3, L, 2, L, 1]);
  }
}
