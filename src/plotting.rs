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

//! This module renders z-slices of voxel grids (masks, distance maps, label
//! fields) to png files. Each pixel in the generated images corresponds 1:1 to
//! a voxel of the slice.

use plotters::prelude::*;
use std::{error::Error, path::Path};

use crate::{
  grid::{Scalar, VoxelGrid},
  watershed::WATERSHED_LINE,
  UNLABELED,
};

//Colour for pixels at or below the minimum
const NAN_COL: RGBColor = BLACK;

/// Signature of the colour maps accepted by `plot_slice`.
pub type ColourMap = fn(value: f64, min: f64, max: f64) -> Result<RGBColor, Box<dyn Error>>;

/// Renders the z-slice `z` of `grid` to a png file at `file_name`.
pub fn plot_slice<T: Scalar>(
  grid: &VoxelGrid<T>,
  z: usize,
  file_name: &Path,
  color_map: ColourMap,
) -> Result<(), Box<dyn Error>> {
  let [x_size, y_size, z_size] = grid.extents3();
  if z >= z_size {
    Err(format!("slice {z} is out of bounds for a grid with {z_size} slices"))?
  }
  let slice = grid.view().index_axis_move(ndarray::Axis(0), z);

  //Get min and max vals of slice
  let values = || slice.iter().filter_map(|v| v.to_f64()).filter(|v| v.is_finite());
  let min = values().fold(f64::INFINITY, f64::min);
  let max = values().fold(f64::NEG_INFINITY, f64::max);

  //Make new fig
  let root = BitMapBackend::new(file_name, (x_size as u32, y_size as u32)).into_drawing_area();
  root.fill(&WHITE)?;

  //make empty drawing area in fig
  let mut chart =
    ChartBuilder::on(&root).build_cartesian_2d(0..x_size as u32, 0..y_size as u32)?;
  chart.configure_mesh().disable_mesh().disable_axes().draw()?;
  let plotting_area = chart.plotting_area();

  //fill pixels
  for ((y, x), px) in slice.indexed_iter() {
    let value = px.to_f64().ok_or("voxel value cannot be represented as f64")?;
    plotting_area.draw_pixel((x as u32, y as u32), &color_map(value, min, max)?)?
  }

  //save file
  root.present()?;
  log::debug!("slice {z} saved as png: {file_name:?}; max:{max:2}, min:{min:2}");
  Ok(())
}

#[inline(always)]
/// Linear grey scale between `min` (black) and `max` (white).
pub fn grey_scale(value: f64, min: f64, max: f64) -> Result<RGBColor, Box<dyn Error>> {
  if !value.is_finite() || value <= min {
    Ok(NAN_COL)
  } else {
    let range = max - min;
    let gray =
      if range > 0.0 { (255.0 * (value - min) / range).clamp(0.0, 255.0) as u8 } else { 255 };
    Ok(RGBColor(gray, gray, gray))
  }
}

#[inline(always)]
/// Distinct colours for segment labels. Unlabeled voxels are black and
/// watershed-line voxels white.
pub fn labels(value: f64, _min: f64, _max: f64) -> Result<RGBColor, Box<dyn Error>> {
  if !(value.is_finite() && value >= 0.0) {
    Err(format!("{value} is not a segment label"))?
  }
  let label = value as u32;
  Ok(match label {
    UNLABELED => NAN_COL,
    WATERSHED_LINE => WHITE,
    _ => {
      //Spread consecutive labels over the hue circle
      let hue = (label as f64 * 0.618_033_988_749_895).fract();
      let (r, g, b) = HSLColor(hue, 0.75, 0.55).to_rgba().rgb();
      RGBColor(r, g, b)
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn label_colours() {
    assert_eq!(labels(0.0, 0.0, 3.0).unwrap(), NAN_COL);
    assert_eq!(labels(WATERSHED_LINE as f64, 0.0, 3.0).unwrap(), WHITE);
    assert_ne!(labels(1.0, 0.0, 3.0).unwrap(), labels(2.0, 0.0, 3.0).unwrap());
    assert!(labels(-1.0, 0.0, 3.0).is_err());
  }

  #[test]
  fn grey_scale_spans_the_range() {
    assert_eq!(grey_scale(0.0, 0.0, 2.0).unwrap(), NAN_COL);
    assert_eq!(grey_scale(2.0, 0.0, 2.0).unwrap(), RGBColor(255, 255, 255));
    assert_eq!(grey_scale(1.0, 0.0, 2.0).unwrap(), RGBColor(127, 127, 127));
  }
}
