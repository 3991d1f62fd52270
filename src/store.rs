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

//! Glue between the segmentation and a host application's array storage.
//!
//! Host applications keep their voxel data as named arrays. They expose that
//! storage through the `ArrayStore` trait, and run the segmentation with a
//! `BinaryWatershedFilter`, which follows the usual check-then-execute protocol
//! of a filter pipeline.

use std::collections::BTreeMap;

use crate::{
  error::{SegmentationError, SegmentationResult},
  grid::{BinaryMask, VoxelGrid},
  pipeline::{SegmentationBuilder, SegmentationReport},
};

/// Name of the output array if none was configured.
pub const DEFAULT_OUTPUT_NAME: &str = "BinaryWatershedLabeled";

#[derive(Debug, Clone, PartialEq)]
/// A named array as held by the host, tagged with its element type.
pub enum DataArray {
  Bool(VoxelGrid<bool>),
  UInt8(VoxelGrid<u8>),
  UInt32(VoxelGrid<u32>),
  Float32(VoxelGrid<f32>),
  Float64(VoxelGrid<f64>),
}

impl DataArray {
  pub fn type_name(&self) -> &'static str {
    match self {
      DataArray::Bool(_) => "bool",
      DataArray::UInt8(_) => "uint8",
      DataArray::UInt32(_) => "uint32",
      DataArray::Float32(_) => "float32",
      DataArray::Float64(_) => "float64",
    }
  }

  pub fn extents(&self) -> &[usize] {
    match self {
      DataArray::Bool(grid) => grid.extents(),
      DataArray::UInt8(grid) => grid.extents(),
      DataArray::UInt32(grid) => grid.extents(),
      DataArray::Float32(grid) => grid.extents(),
      DataArray::Float64(grid) => grid.extents(),
    }
  }

  /// True if this array's element type can hold a mask.
  pub fn is_mask_type(&self) -> bool {
    matches!(self, DataArray::Bool(_) | DataArray::UInt8(_))
  }

  /// Interprets the array as a mask. `bool` arrays are used as-is, `uint8`
  /// arrays must only hold zeros and ones. Other element types are rejected.
  pub fn to_mask(&self) -> SegmentationResult<BinaryMask> {
    match self {
      DataArray::Bool(grid) => Ok(grid.clone()),
      DataArray::UInt8(grid) => BinaryMask::from_scalar_grid(grid),
      other => Err(SegmentationError::invalid(format!(
        "expected a bool or uint8 mask, got a {} array",
        other.type_name()
      ))),
    }
  }
}

/// Named array storage of a host application.
pub trait ArrayStore {
  fn get(&self, name: &str) -> Option<&DataArray>;

  /// Adds a new array. Fails with `ArrayExists` if the name is taken.
  fn insert(&mut self, name: &str, array: DataArray) -> SegmentationResult<()>;

  fn remove(&mut self, name: &str) -> Option<DataArray>;

  fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  /// Overwrites the array stored under `name`, returning the old one.
  fn replace(&mut self, name: &str, array: DataArray) -> SegmentationResult<DataArray> {
    let old = self.remove(name).ok_or_else(|| SegmentationError::MissingArray(name.to_string()))?;
    self.insert(name, array)?;
    Ok(old)
  }

  /// Moves an array to a new name.
  fn rename(&mut self, from: &str, to: &str) -> SegmentationResult<()> {
    if self.contains(to) {
      Err(SegmentationError::ArrayExists(to.to_string()))?
    }
    let array = self.remove(from).ok_or_else(|| SegmentationError::MissingArray(from.to_string()))?;
    self.insert(to, array)
  }
}

#[derive(Debug, Clone, Default)]
/// In-memory `ArrayStore`.
pub struct MemoryStore {
  arrays: BTreeMap<String, DataArray>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Array names in sorted order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.arrays.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.arrays.len()
  }

  pub fn is_empty(&self) -> bool {
    self.arrays.is_empty()
  }
}

impl ArrayStore for MemoryStore {
  fn get(&self, name: &str) -> Option<&DataArray> {
    self.arrays.get(name)
  }

  fn insert(&mut self, name: &str, array: DataArray) -> SegmentationResult<()> {
    if self.arrays.contains_key(name) {
      Err(SegmentationError::ArrayExists(name.to_string()))?
    }
    self.arrays.insert(name.to_string(), array);
    Ok(())
  }

  fn remove(&mut self, name: &str) -> Option<DataArray> {
    self.arrays.remove(name)
  }
}

#[derive(Debug, Clone)]
/// Runs a binary watershed segmentation on an array of an `ArrayStore`.
///
/// The labels are written to a new `uint32` array (`DEFAULT_OUTPUT_NAME`
/// unless configured otherwise). With `save_as_new_array` disabled, the labels
/// replace the input array under its original name instead.
pub struct BinaryWatershedFilter {
  selected_array: String,
  output_array: String,
  save_as_new_array: bool,
  config: SegmentationBuilder,
}

impl BinaryWatershedFilter {
  /// Creates a filter segmenting the array named `selected_array`.
  pub fn new(selected_array: &str) -> Self {
    BinaryWatershedFilter {
      selected_array: selected_array.to_string(),
      output_array: DEFAULT_OUTPUT_NAME.to_string(),
      save_as_new_array: true,
      config: SegmentationBuilder::new(),
    }
  }

  pub fn set_output_array(mut self, name: &str) -> Self {
    self.output_array = name.to_string();
    self
  }

  pub fn set_save_as_new_array(mut self, save_as_new: bool) -> Self {
    self.save_as_new_array = save_as_new;
    self
  }

  pub fn set_config(mut self, config: SegmentationBuilder) -> Self {
    self.config = config;
    self
  }

  /// Name of the array the labels will be written to.
  pub fn output_name(&self) -> &str {
    if self.save_as_new_array {
      &self.output_array
    } else {
      &self.selected_array
    }
  }

  /// Checks that the filter can run against `store` without modifying it.
  pub fn data_check<S: ArrayStore>(&self, store: &S) -> SegmentationResult<()> {
    let input = store
      .get(&self.selected_array)
      .ok_or_else(|| SegmentationError::MissingArray(self.selected_array.clone()))?;
    if !input.is_mask_type() {
      Err(SegmentationError::invalid(format!(
        "array \"{}\" has element type {}, expected bool or uint8",
        self.selected_array,
        input.type_name()
      )))?
    }
    if self.save_as_new_array {
      if self.output_array.is_empty() {
        Err(SegmentationError::invalid("output array name is empty"))?
      }
      if store.contains(&self.output_array) {
        Err(SegmentationError::ArrayExists(self.output_array.clone()))?
      }
    }
    self.config.build()?;
    Ok(())
  }

  /// Segments the selected array and writes the labels back into `store`.
  /// Nothing is written if any stage fails.
  pub fn execute<S: ArrayStore>(&self, store: &mut S) -> SegmentationResult<SegmentationReport> {
    self.data_check(store)?;
    let mask = store
      .get(&self.selected_array)
      .ok_or_else(|| SegmentationError::MissingArray(self.selected_array.clone()))?
      .to_mask()?;

    let report = self.config.build()?.run(&mask)?;

    let output = DataArray::UInt32(report.labels.clone());
    if self.save_as_new_array {
      store.insert(&self.output_array, output)?;
    } else {
      store.replace(&self.selected_array, output)?;
    }

    log::info!(
      "wrote {} segments of \"{}\" to \"{}\"",
      report.segment_count(),
      self.selected_array,
      self.output_name()
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store_with(name: &str, array: DataArray) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.insert(name, array).unwrap();
    store
  }

  #[test]
  fn wrong_element_type_fails_data_check() {
    let grid = VoxelGrid::new(&[3, 3], &[1.0, 1.0], 1.0f32).unwrap();
    let store = store_with("Phases", DataArray::Float32(grid));
    let filter = BinaryWatershedFilter::new("Phases");
    assert!(matches!(filter.data_check(&store), Err(SegmentationError::InvalidInput(_))));
  }

  #[test]
  fn missing_and_taken_names_fail_data_check() {
    let grid = VoxelGrid::new(&[3, 3], &[1.0, 1.0], true).unwrap();
    let mut store = store_with("Mask", DataArray::Bool(grid.clone()));
    assert!(matches!(
      BinaryWatershedFilter::new("Nope").data_check(&store),
      Err(SegmentationError::MissingArray(_))
    ));
    store.insert(DEFAULT_OUTPUT_NAME, DataArray::Bool(grid)).unwrap();
    assert!(matches!(
      BinaryWatershedFilter::new("Mask").data_check(&store),
      Err(SegmentationError::ArrayExists(_))
    ));
  }

  #[test]
  fn rename_moves_arrays() {
    let grid = VoxelGrid::new(&[2, 2], &[1.0, 1.0], 0u8).unwrap();
    let mut store = store_with("a", DataArray::UInt8(grid));
    store.rename("a", "b").unwrap();
    assert_eq!(store.names().collect::<Vec<_>>(), vec!["b"]);
    assert!(matches!(store.rename("a", "c"), Err(SegmentationError::MissingArray(_))));
    assert!(matches!(
      store.replace("a", DataArray::Bool(VoxelGrid::new(&[2, 2], &[1.0, 1.0], true).unwrap())),
      Err(SegmentationError::MissingArray(_))
    ));
  }
}
