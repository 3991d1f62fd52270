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

//! Dense 2D/3D voxel grids and their neighbourhoods.
//!
//! A `VoxelGrid<T>` always stores its samples in a three-dimensional `ndarray`
//! indexed as `[z, y, x]`, so the x axis varies fastest in memory. Two
//! dimensional grids simply have a z-extent of one. Coordinates are given as
//! `[x, y, z]` triples everywhere in the public API, and the linear index of a
//! voxel is `x + nx * (y + ny * z)`.

use std::collections::BTreeMap;

use ndarray as nd;
use num_traits::{Num, ToPrimitive};

use crate::{
  error::{SegmentationError, SegmentationResult},
  watershed::WATERSHED_LINE,
  UNLABELED,
};

/// Coordinate of a voxel as an `[x, y, z]` triple. For 2D grids `z` is 0.
pub type Coord = [usize; 3];

/// Boolean foreground/background mask.
pub type BinaryMask = VoxelGrid<bool>;
/// Signed Euclidean distance map.
pub type DistanceField = VoxelGrid<f64>;
/// Sparse seed labels, zero everywhere except at the markers.
pub type MarkerField = VoxelGrid<u32>;
/// Output of the watershed: one label per voxel, zero for unlabeled voxels.
pub type LabelField = VoxelGrid<u32>;

/// Numeric element types the algorithms in this crate can operate on.
///
/// This replaces a run-time switch over pixel types: any ordered numeric type
/// that can be converted to `f64` is accepted.
pub trait Scalar: Num + Copy + PartialOrd + ToPrimitive + Send + Sync {}
impl<T> Scalar for T where T: Num + Copy + PartialOrd + ToPrimitive + Send + Sync {}

/// Which voxels count as neighbours of a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
  /// Voxels sharing a face: 4 neighbours in 2D, 6 in 3D.
  #[default]
  Face,
  /// Voxels sharing a face, edge or corner: 8 neighbours in 2D, 26 in 3D.
  Full,
}

#[derive(Debug, Clone, PartialEq)]
/// Dense 2D or 3D grid of samples with per-axis physical spacing.
///
/// The grid is constructed once with fixed extents and can only be changed
/// through explicit per-voxel setters afterwards.
pub struct VoxelGrid<T> {
  data: nd::Array3<T>,
  ndim: usize,
  extents: [usize; 3],
  spacing: [f64; 3],
}

fn validate_geometry(extents: &[usize], spacing: &[f64]) -> SegmentationResult<()> {
  if extents.len() != 2 && extents.len() != 3 {
    Err(SegmentationError::invalid(format!(
      "grids must be 2 or 3 dimensional, got {} extents",
      extents.len()
    )))?
  }
  if spacing.len() != extents.len() {
    Err(SegmentationError::invalid(format!(
      "got {} spacing values for a {}D grid",
      spacing.len(),
      extents.len()
    )))?
  }
  if extents.iter().any(|&n| n == 0) {
    Err(SegmentationError::invalid(format!("grid has a zero extent: {extents:?}")))?
  }
  if spacing.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
    Err(SegmentationError::invalid(format!("spacing must be finite and positive: {spacing:?}")))?
  }
  Ok(())
}

fn pad<V: Copy>(values: &[V], fill: V) -> [V; 3] {
  let mut out = [fill; 3];
  out[..values.len()].copy_from_slice(values);
  out
}

impl<T> VoxelGrid<T> {
  /// Creates a grid with the given extents (`[nx, ny]` or `[nx, ny, nz]`) and
  /// spacing, filled with `fill`.
  pub fn new(extents: &[usize], spacing: &[f64], fill: T) -> SegmentationResult<Self>
  where
    T: Clone,
  {
    validate_geometry(extents, spacing)?;
    let ext = pad(extents, 1);
    Ok(VoxelGrid {
      data: nd::Array3::from_elem((ext[2], ext[1], ext[0]), fill),
      ndim: extents.len(),
      extents: ext,
      spacing: pad(spacing, 1.0),
    })
  }

  /// Creates a grid from a buffer in linear-index order (x fastest).
  pub fn from_vec(extents: &[usize], spacing: &[f64], values: Vec<T>) -> SegmentationResult<Self> {
    validate_geometry(extents, spacing)?;
    let ext = pad(extents, 1);
    let expected: usize = ext.iter().product();
    if values.len() != expected {
      Err(SegmentationError::invalid(format!(
        "buffer holds {} values but extents {extents:?} require {expected}",
        values.len()
      )))?
    }
    let data = nd::Array3::from_shape_vec((ext[2], ext[1], ext[0]), values)
      .map_err(|err| SegmentationError::invalid(err.to_string()))?;
    Ok(VoxelGrid { data, ndim: extents.len(), extents: ext, spacing: pad(spacing, 1.0) })
  }

  /// Wraps a 2D (`[y, x]`) or 3D (`[z, y, x]`) ndarray. The last array axis
  /// becomes the grid's x axis.
  pub fn from_ndarray<D>(array: nd::Array<T, D>, spacing: &[f64]) -> SegmentationResult<Self>
  where
    T: Clone,
    D: nd::Dimension,
  {
    //Grid extents are listed fastest axis first, ndarray shapes slowest first
    let extents: Vec<usize> = array.shape().iter().rev().copied().collect();
    let values: Vec<T> = array.iter().cloned().collect();
    Self::from_vec(&extents, spacing, values)
  }

  /// Copy of the grid with a different spacing.
  pub fn with_spacing(&self, spacing: &[f64]) -> SegmentationResult<Self>
  where
    T: Clone,
  {
    validate_geometry(self.extents(), spacing)?;
    Ok(VoxelGrid { spacing: pad(spacing, 1.0), ..self.clone() })
  }

  /// Number of dimensions: 2 or 3.
  pub fn dimensionality(&self) -> usize {
    self.ndim
  }

  /// Per-axis voxel counts, fastest axis first.
  pub fn extents(&self) -> &[usize] {
    &self.extents[..self.ndim]
  }

  /// Per-axis physical voxel size, fastest axis first.
  pub fn spacing(&self) -> &[f64] {
    &self.spacing[..self.ndim]
  }

  pub(crate) fn extents3(&self) -> [usize; 3] {
    self.extents
  }

  pub(crate) fn spacing3(&self) -> [f64; 3] {
    self.spacing
  }

  /// Total number of voxels.
  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Length of the grid's diagonal in physical units.
  pub fn diagonal_length(&self) -> f64 {
    self
      .extents()
      .iter()
      .zip(self.spacing().iter())
      .map(|(&n, &s)| (n as f64 * s).powi(2))
      .sum::<f64>()
      .sqrt()
  }

  /// True if both grids have the same extents and dimensionality.
  pub fn same_shape<U>(&self, other: &VoxelGrid<U>) -> bool {
    self.ndim == other.ndim && self.extents == other.extents
  }

  pub fn contains(&self, coord: &Coord) -> bool {
    coord.iter().zip(self.extents.iter()).all(|(&c, &n)| c < n)
  }

  fn check(&self, coord: &Coord) -> SegmentationResult<()> {
    if self.contains(coord) {
      Ok(())
    } else {
      Err(SegmentationError::OutOfBounds { coord: *coord, extents: self.extents })
    }
  }

  /// Linear index of `coord`: `x + nx * (y + ny * z)`.
  pub fn linear_index(&self, coord: &Coord) -> SegmentationResult<usize> {
    self.check(coord)?;
    Ok(self.flat(coord))
  }

  /// Inverse of `linear_index`.
  pub fn coord_of(&self, index: usize) -> SegmentationResult<Coord> {
    if index >= self.len() {
      //Report the first out of range coordinate along the slowest axis
      Err(SegmentationError::OutOfBounds {
        coord: [0, 0, index / (self.extents[0] * self.extents[1])],
        extents: self.extents,
      })?
    }
    Ok(self.unflat(index))
  }

  #[inline]
  pub(crate) fn flat(&self, coord: &Coord) -> usize {
    coord[0] + self.extents[0] * (coord[1] + self.extents[1] * coord[2])
  }

  #[inline]
  pub(crate) fn unflat(&self, index: usize) -> Coord {
    let plane = self.extents[0] * self.extents[1];
    let rem = index % plane;
    [rem % self.extents[0], rem / self.extents[0], index / plane]
  }

  /// Bounds-checked read by coordinate.
  pub fn get(&self, coord: &Coord) -> SegmentationResult<&T> {
    self.check(coord)?;
    Ok(&self.data[[coord[2], coord[1], coord[0]]])
  }

  /// Bounds-checked write by coordinate.
  pub fn set(&mut self, coord: &Coord, value: T) -> SegmentationResult<()> {
    self.check(coord)?;
    self.data[[coord[2], coord[1], coord[0]]] = value;
    Ok(())
  }

  /// Bounds-checked read by linear index.
  pub fn get_linear(&self, index: usize) -> SegmentationResult<&T> {
    let coord = self.coord_of(index)?;
    Ok(&self.data[[coord[2], coord[1], coord[0]]])
  }

  /// Bounds-checked write by linear index.
  pub fn set_linear(&mut self, index: usize, value: T) -> SegmentationResult<()> {
    let coord = self.coord_of(index)?;
    self.data[[coord[2], coord[1], coord[0]]] = value;
    Ok(())
  }

  /// Neighbours of `coord` under `connectivity`, clipped to the grid.
  pub fn neighbours(
    &self,
    coord: &Coord,
    connectivity: Connectivity,
  ) -> SegmentationResult<Neighbours> {
    self.check(coord)?;
    Ok(Neighbours::new(*coord, self.extents, connectivity))
  }

  /// Iterates over all voxels in linear-index order.
  pub fn iter(&self) -> impl Iterator<Item = &T> {
    self.data.iter()
  }

  /// Iterates over `(coordinate, value)` pairs in linear-index order.
  pub fn iter_indexed(&self) -> impl Iterator<Item = (Coord, &T)> {
    self.data.indexed_iter().map(|((z, y, x), v)| ([x, y, z], v))
  }

  /// Read-only view of the samples, indexed `[z, y, x]`.
  pub fn view(&self) -> nd::ArrayView3<T> {
    self.data.view()
  }

  pub(crate) fn view_mut(&mut self) -> nd::ArrayViewMut3<T> {
    self.data.view_mut()
  }

  /// Returns a grid with the same geometry holding `f` applied to every voxel.
  pub fn map<U, F>(&self, f: F) -> VoxelGrid<U>
  where
    F: FnMut(&T) -> U,
  {
    VoxelGrid {
      data: self.data.map(f),
      ndim: self.ndim,
      extents: self.extents,
      spacing: self.spacing,
    }
  }

  /// Overwrites every voxel with `value`.
  pub fn fill(&mut self, value: T)
  where
    T: Clone,
  {
    self.data.fill(value)
  }

  /// Copies the samples out in linear-index order.
  pub fn to_vec(&self) -> Vec<T>
  where
    T: Clone,
  {
    self.data.iter().cloned().collect()
  }

  /// Unwraps the grid into its `[z, y, x]` array.
  pub fn into_array(self) -> nd::Array3<T> {
    self.data
  }
}

impl<T: Scalar> VoxelGrid<T> {
  /// Largest finite value in the grid, if any.
  pub fn max_value(&self) -> Option<T> {
    self.data.iter().copied().filter(|v| v.to_f64().is_some_and(f64::is_finite)).fold(
      None,
      |acc, v| match acc {
        Some(max) if max >= v => Some(max),
        _ => Some(v),
      },
    )
  }
}

impl VoxelGrid<bool> {
  /// Converts a numeric grid into a mask. Every value has to be either zero or
  /// one, anything else is rejected as a non-binary mask.
  pub fn from_scalar_grid<T: Scalar>(grid: &VoxelGrid<T>) -> SegmentationResult<BinaryMask> {
    if let Some((coord, _)) = grid.iter_indexed().find(|(_, v)| !(v.is_zero() || v.is_one())) {
      Err(SegmentationError::invalid(format!(
        "mask is not binary: voxel {coord:?} is neither 0 nor 1"
      )))?
    }
    Ok(grid.map(|v| v.is_one()))
  }

  /// Number of `true` voxels.
  pub fn count_foreground(&self) -> usize {
    self.data.iter().filter(|&&v| v).count()
  }

  /// Mask with every voxel flipped.
  pub fn inverted(&self) -> BinaryMask {
    self.map(|&v| !v)
  }
}

impl VoxelGrid<u32> {
  /// Number of voxels carrying each label present in the grid, including the
  /// unlabeled voxels under label 0. Watershed-line voxels are not counted.
  pub fn label_sizes(&self) -> BTreeMap<u32, usize> {
    let mut sizes = BTreeMap::new();
    for &label in self.data.iter().filter(|&&label| label != WATERSHED_LINE) {
      *sizes.entry(label).or_insert(0) += 1;
    }
    sizes
  }

  /// Number of distinct non-zero labels in the grid.
  pub fn label_count(&self) -> usize {
    self.label_sizes().keys().filter(|&&label| label != UNLABELED).count()
  }
}

////////////////////////////////////////////////////////////////////////////////
//                               NEIGHBOURHOODS                               //
////////////////////////////////////////////////////////////////////////////////

/// Lazy iterator over the in-bounds neighbours of a voxel.
///
/// Neighbours are produced in ascending linear-index order. The iterator is
/// finite and can be cloned or restarted to walk the neighbourhood again.
#[derive(Debug, Clone)]
pub struct Neighbours {
  centre: Coord,
  extents: [usize; 3],
  connectivity: Connectivity,
  cursor: u8,
}

impl Neighbours {
  pub(crate) fn new(centre: Coord, extents: [usize; 3], connectivity: Connectivity) -> Self {
    Neighbours { centre, extents, connectivity, cursor: 0 }
  }

  /// Rewinds the iterator to the first neighbour.
  pub fn restart(&mut self) {
    self.cursor = 0;
  }
}

impl Iterator for Neighbours {
  type Item = Coord;

  fn next(&mut self) -> Option<Coord> {
    //Walk the 3x3x3 cube around the centre, x offset varying fastest
    while self.cursor < 27 {
      let k = self.cursor as isize;
      self.cursor += 1;
      let offset = [k % 3 - 1, (k / 3) % 3 - 1, k / 9 - 1];
      let taxicab: isize = offset.iter().map(|o| o.abs()).sum();
      if taxicab == 0 || (self.connectivity == Connectivity::Face && taxicab != 1) {
        continue;
      }
      let mut neighbour = [0usize; 3];
      let in_bounds = (0..3).all(|axis| {
        let c = self.centre[axis] as isize + offset[axis];
        neighbour[axis] = c as usize;
        c >= 0 && (c as usize) < self.extents[axis]
      });
      if in_bounds {
        return Some(neighbour);
      }
    }
    None
  }
}
