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

//! Local maxima with noise-tolerance suppression.

use rayon::prelude::*;

use crate::{
  error::{SegmentationError, SegmentationResult},
  grid::{Connectivity, Coord, Neighbours, Scalar, VoxelGrid},
};

//Marks voxels no flood has claimed yet
const UNCLAIMED: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq)]
/// A voxel selected as watershed seed.
pub struct Peak {
  coord: Coord,
  index: usize,
  value: f64,
}

impl Peak {
  /// `[x, y, z]` coordinate of the peak.
  pub fn coord(&self) -> Coord {
    self.coord
  }

  /// Linear index of the peak in the field it was found in.
  pub fn index(&self) -> usize {
    self.index
  }

  /// Field value at the peak.
  pub fn value(&self) -> f64 {
    self.value
  }
}

#[derive(Debug, Clone, Copy)]
/// Finds the distinct local maxima of a scalar field.
///
/// A voxel is a *candidate* if it is not lower than any of its neighbours.
/// Candidates are visited from the highest value down, ties broken by ascending
/// linear index. From each candidate we flood all connected voxels whose value
/// lies within `tolerance` of the candidate's value. If that flood runs into a
/// voxel with a higher value, or into the flood of an earlier candidate, the
/// candidate is separated from a higher maximum by a dip of at most `tolerance`
/// and is suppressed. Otherwise it is accepted as a peak.
///
/// Peaks are returned in the order they were accepted. Downstream labels are
/// numbered in this order, so it is fully determined by the input field.
///
/// With `strict_on_plateau` set (the default), a plateau of equal-valued
/// maxima yields a single peak at its lowest linear index. Without it, every
/// voxel of the plateau is reported.
pub struct MaximaFinder {
  tolerance: f64,
  strict_on_plateau: bool,
  connectivity: Connectivity,
  floor: Option<f64>,
}

impl Default for MaximaFinder {
  fn default() -> Self {
    MaximaFinder {
      tolerance: 1.0,
      strict_on_plateau: true,
      connectivity: Connectivity::Face,
      floor: None,
    }
  }
}

impl MaximaFinder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Minimum dip (must be exceeded) between two maxima for both to be kept.
  pub fn with_tolerance(mut self, tolerance: f64) -> Self {
    self.tolerance = tolerance;
    self
  }

  pub fn with_strict_on_plateau(mut self, strict: bool) -> Self {
    self.strict_on_plateau = strict;
    self
  }

  pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
    self.connectivity = connectivity;
    self
  }

  /// Voxels with a value at or below `floor` are never reported as peaks and
  /// never connect two maxima: regions separated by such voxels are always
  /// treated as distinct.
  pub fn with_floor(mut self, floor: Option<f64>) -> Self {
    self.floor = floor;
    self
  }

  pub fn tolerance(&self) -> f64 {
    self.tolerance
  }

  /// Returns the distinct maxima of `field` in acceptance order.
  pub fn find<T: Scalar>(&self, field: &VoxelGrid<T>) -> SegmentationResult<Vec<Peak>> {
    if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
      Err(SegmentationError::invalid(format!(
        "peak tolerance must be finite and non-negative, got {}",
        self.tolerance
      )))?
    }
    if field.is_empty() {
      Err(SegmentationError::invalid("cannot search maxima of an empty field"))?
    }
    let values: Vec<f64> = field
      .iter()
      .map(|v| v.to_f64().filter(|f| !f.is_nan()))
      .collect::<Option<_>>()
      .ok_or_else(|| SegmentationError::invalid("field contains values that are not numbers"))?;

    let extents = field.extents3();
    let neighbours =
      |index: usize| Neighbours::new(field.unflat(index), extents, self.connectivity);
    let above_floor = |idx: usize| self.floor.map_or(true, |floor| values[idx] > floor);

    //(1) Find candidates. Collecting an indexed parallel iterator keeps order
    let mut candidates: Vec<usize> = (0..values.len())
      .into_par_iter()
      .filter(|&idx| above_floor(idx))
      .filter(|&idx| neighbours(idx).all(|nb| values[field.flat(&nb)] <= values[idx]))
      .collect();

    //(2) Highest first, lowest linear index first among equals
    candidates.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then(a.cmp(&b)));
    let num_candidates = candidates.len();

    //(3) Flood from every candidate and keep the ones that do not merge
    let mut owner = vec![UNCLAIMED; values.len()];
    let mut stack: Vec<usize> = Vec::new();
    let mut on_plateau: Vec<bool> =
      if self.strict_on_plateau { Vec::new() } else { vec![false; values.len()] };
    let mut peaks = Vec::new();

    for (flood_id, &candidate) in candidates.iter().enumerate() {
      if owner[candidate] != UNCLAIMED {
        //Already inside the flood of a higher (or equal, earlier) maximum
        continue;
      }
      let top = values[candidate];
      let threshold = top - self.tolerance;
      let mut distinct = true;

      owner[candidate] = flood_id;
      stack.clear();
      stack.push(candidate);

      'flood: while let Some(idx) = stack.pop() {
        for nb in neighbours(idx) {
          let nb = field.flat(&nb);
          if values[nb] < threshold || owner[nb] == flood_id || !above_floor(nb) {
            continue;
          }
          if values[nb] > top || owner[nb] != UNCLAIMED {
            distinct = false;
            break 'flood;
          }
          owner[nb] = flood_id;
          stack.push(nb);
        }
      }

      if !distinct {
        continue;
      }

      if self.strict_on_plateau {
        peaks.push(Peak { coord: field.unflat(candidate), index: candidate, value: top });
      } else {
        //A complete flood owns the whole plateau around the candidate
        let owned = &owner;
        let mut plateau = plateau_of(candidate, &values, &mut on_plateau, move |idx| {
          neighbours(idx).map(move |nb| field.flat(&nb)).filter(move |&nb| owned[nb] == flood_id)
        });
        plateau.sort_unstable();
        peaks.extend(
          plateau.into_iter().map(|idx| Peak { coord: field.unflat(idx), index: idx, value: top }),
        );
      }
    }

    log::debug!(
      "{} of {num_candidates} maxima candidates survived tolerance {}",
      peaks.len(),
      self.tolerance
    );
    Ok(peaks)
  }
}

/// Equal-valued voxels connected to `seed`. `visited` must be all false on
/// entry and is all false again on return.
fn plateau_of<F, I>(seed: usize, values: &[f64], visited: &mut [bool], neighbours: F) -> Vec<usize>
where
  F: Fn(usize) -> I,
  I: Iterator<Item = usize>,
{
  let level = values[seed];
  visited[seed] = true;
  let mut found = vec![seed];
  let mut cursor = 0;
  while let Some(&idx) = found.get(cursor) {
    cursor += 1;
    for nb in neighbours(idx) {
      if !visited[nb] && values[nb] == level {
        visited[nb] = true;
        found.push(nb);
      }
    }
  }
  found.iter().for_each(|&idx| visited[idx] = false);
  found
}

#[cfg(test)]
mod tests {
  use super::*;

  fn field(extents: &[usize], values: Vec<f64>) -> VoxelGrid<f64> {
    VoxelGrid::from_vec(extents, &vec![1.0; extents.len()], values).unwrap()
  }

  #[test]
  fn uniform_field_has_one_peak() {
    let grid = VoxelGrid::new(&[4, 3], &[1.0, 1.0], 2.5).unwrap();
    let peaks = MaximaFinder::new().with_tolerance(0.0).find(&grid).unwrap();
    assert_eq!(peaks.len(), 1);
    assert_eq!(peaks[0].index(), 0);
  }

  #[test]
  fn floor_removes_background() {
    let grid = VoxelGrid::new(&[4, 3], &[1.0, 1.0], -3.0).unwrap();
    let peaks = MaximaFinder::new().with_floor(Some(0.0)).find(&grid).unwrap();
    assert!(peaks.is_empty());
  }

  #[test]
  fn ties_are_broken_by_linear_index() {
    //Two equal maxima separated by a deep valley
    let grid = field(&[5, 1], vec![3.0, 0.0, -5.0, 0.0, 3.0]);
    let peaks = MaximaFinder::new().find(&grid).unwrap();
    let idx: Vec<usize> = peaks.iter().map(Peak::index).collect();
    assert_eq!(idx, vec![0, 4]);
  }

  #[test]
  fn peaks_come_out_highest_first() {
    let grid = field(&[7, 1], vec![1.0, 0.0, 5.0, 0.0, 3.0, 0.0, 4.0]);
    let peaks = MaximaFinder::new().with_tolerance(0.5).find(&grid).unwrap();
    let idx: Vec<usize> = peaks.iter().map(Peak::index).collect();
    assert_eq!(idx, vec![2, 6, 4, 0]);
  }

  #[test]
  fn non_strict_plateaus_report_every_voxel() {
    let grid = field(&[6, 1], vec![0.0, 2.0, 2.0, 2.0, 0.0, 1.0]);
    let strict = MaximaFinder::new().with_tolerance(0.5).find(&grid).unwrap();
    assert_eq!(strict.iter().map(Peak::index).collect::<Vec<_>>(), vec![1, 5]);
    let loose =
      MaximaFinder::new().with_tolerance(0.5).with_strict_on_plateau(false).find(&grid).unwrap();
    assert_eq!(loose.iter().map(Peak::index).collect::<Vec<_>>(), vec![1, 2, 3, 5]);
  }

  #[test]
  fn large_plateau_is_reported_once_in_order() {
    let grid = VoxelGrid::new(&[40, 40, 40], &[1.0, 1.0, 1.0], 1.0).unwrap();
    let loose = MaximaFinder::new().with_strict_on_plateau(false).find(&grid).unwrap();
    assert_eq!(loose.len(), grid.len());
    assert!(loose.iter().enumerate().all(|(i, peak)| peak.index() == i));
  }

  #[test]
  fn floor_separates_maxima() {
    //Two maxima joined only through voxels at the floor
    let grid = field(&[7, 1], vec![1.0, 2.0, 1.0, 0.0, 1.0, 3.0, 1.0]);
    let peaks = MaximaFinder::new().with_tolerance(5.0).with_floor(Some(0.0)).find(&grid).unwrap();
    assert_eq!(peaks.iter().map(Peak::index).collect::<Vec<_>>(), vec![5, 1]);
    assert_eq!(MaximaFinder::new().with_tolerance(5.0).find(&grid).unwrap().len(), 1);
  }

  #[test]
  fn shallow_dip_merges_maxima() {
    let grid = field(&[5, 1], vec![4.0, 3.5, 3.0, 3.5, 3.9]);
    assert_eq!(MaximaFinder::new().with_tolerance(1.0).find(&grid).unwrap().len(), 1);
    assert_eq!(MaximaFinder::new().with_tolerance(0.5).find(&grid).unwrap().len(), 2);
  }

  #[test]
  fn invalid_tolerance_and_nan_are_rejected() {
    let grid = field(&[2, 1], vec![0.0, f64::NAN]);
    assert!(matches!(MaximaFinder::new().find(&grid), Err(SegmentationError::InvalidInput(_))));
    let grid = field(&[2, 1], vec![0.0, 1.0]);
    assert!(matches!(
      MaximaFinder::new().with_tolerance(-1.0).find(&grid),
      Err(SegmentationError::InvalidInput(_))
    ));
  }
}
