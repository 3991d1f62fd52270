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

//! Exact signed Euclidean distance transform of binary masks.
//!
//! The transform is separable: the squared distance is first computed along
//! the x axis, then refined along y and finally along z. Each refinement is a
//! one-dimensional lower envelope of parabolas (Maurer et al., 2003[^1];
//! Felzenszwalb & Huttenlocher, 2012[^2]), computed independently per scan
//! line. Scan lines are distributed over the rayon thread pool; since no two
//! lines share state the output does not depend on the number of threads.
//!
//! [^1]: C. R. Maurer, R. Qi and V. Raghavan. **A linear time algorithm for
//! computing exact Euclidean distance transforms of binary images in arbitrary
//! dimensions.** *IEEE TPAMI* 25(2), 2003.
//! [^2]: P. F. Felzenszwalb and D. P. Huttenlocher. **Distance transforms of
//! sampled functions.** *Theory of Computing* 8, 2012.

use ndarray as nd;

use crate::{
  error::{SegmentationError, SegmentationResult},
  grid::{BinaryMask, DistanceField},
};

#[derive(Debug, Clone, Copy)]
/// Configuration of the signed distance transform.
///
/// For a voxel inside the mask the distance is measured to the centre of the
/// nearest voxel outside the mask, and vice versa, taking the grid's spacing
/// into account. Mask voxels that touch the background through a face thus
/// get a distance equal to the spacing along that axis (1.0 on a unit grid).
pub struct DistanceTransform {
  inside_is_positive: bool,
}

impl Default for DistanceTransform {
  fn default() -> Self {
    DistanceTransform { inside_is_positive: true }
  }
}

#[derive(Debug, Clone)]
/// Output of the distance transform.
pub struct DistanceMap {
  /// Signed distances, same geometry as the input mask.
  pub field: DistanceField,
  /// True if the mask held only one class. Every voxel then carries the
  /// sentinel distance `diagonal_length + 1`.
  pub degenerate: bool,
}

impl DistanceTransform {
  pub fn new() -> Self {
    Self::default()
  }

  /// Choose whether voxels inside the mask get positive (default) or negative
  /// distances.
  pub fn with_inside_is_positive(mut self, inside_is_positive: bool) -> Self {
    self.inside_is_positive = inside_is_positive;
    self
  }

  pub fn inside_is_positive(&self) -> bool {
    self.inside_is_positive
  }

  /// Computes the signed distance map of `mask`.
  pub fn compute(&self, mask: &BinaryMask) -> SegmentationResult<DistanceMap> {
    if mask.is_empty() {
      Err(SegmentationError::invalid("cannot compute the distance map of an empty mask"))?
    }

    let foreground = mask.count_foreground();
    let degenerate = foreground == 0 || foreground == mask.len();
    let sentinel = mask.diagonal_length() + 1.0;
    let sign = if self.inside_is_positive { 1.0 } else { -1.0 };

    if degenerate {
      log::warn!(
        "distance transform of a mask with only {} voxels, using sentinel distance {sentinel:.3}",
        if foreground == 0 { "background" } else { "foreground" }
      );
      let field = mask.map(|&inside| if inside { sign * sentinel } else { -sign * sentinel });
      return Ok(DistanceMap { field, degenerate });
    }

    //Squared distance of foreground voxels to the background, and the reverse
    let to_background = squared_edt(mask, false);
    let to_foreground = squared_edt(mask, true);

    let mut field = mask.map(|_| 0.0f64);
    nd::Zip::from(field.view_mut())
      .and(mask.view())
      .and(&to_background)
      .and(&to_foreground)
      .par_for_each(|out, &inside, &d_bg, &d_fg| {
        *out = if inside { sign * d_bg.sqrt() } else { -sign * d_fg.sqrt() };
      });

    log::debug!("computed signed distance map over {} voxels", mask.len());
    Ok(DistanceMap { field, degenerate })
  }
}

/// Squared Euclidean distance from every voxel to the nearest voxel whose mask
/// value equals `feature`. Feature voxels themselves get zero.
fn squared_edt(mask: &BinaryMask, feature: bool) -> nd::Array3<f64> {
  let spacing = mask.spacing3();
  let mut sq = mask.view().mapv(|v| if v == feature { 0.0 } else { f64::INFINITY });

  //Array axis 2 is the grid's x axis, axis 0 is z
  for (axis, step) in [(2usize, spacing[0]), (1, spacing[1]), (0, spacing[2])] {
    if sq.len_of(nd::Axis(axis)) < 2 {
      continue;
    }
    nd::Zip::from(sq.lanes_mut(nd::Axis(axis)))
      .par_for_each(|mut lane| lower_envelope(&mut lane, step));
  }
  sq
}

/// Replaces `lane[i]` by `min_j (lane[j] + ((i - j) * step)^2)`.
///
/// Works by building the lower envelope of the parabolas rooted at every
/// finite sample: a stack of dominating sites, each owning the interval
/// starting at `bounds[k]`. A site whose parabola is nowhere minimal is popped.
fn lower_envelope(lane: &mut nd::ArrayViewMut1<f64>, step: f64) {
  let n = lane.len();
  let f: Vec<f64> = lane.to_vec();
  let mut sites: Vec<usize> = Vec::with_capacity(n);
  let mut bounds: Vec<f64> = Vec::with_capacity(n);

  for q in 0..n {
    if !f[q].is_finite() {
      continue;
    }
    let pos_q = q as f64 * step;
    loop {
      match (sites.last(), bounds.last()) {
        (Some(&p), Some(&bound)) => {
          let pos_p = p as f64 * step;
          //Position where the parabolas of p and q intersect
          let s = ((f[q] + pos_q * pos_q) - (f[p] + pos_p * pos_p)) / (2.0 * (pos_q - pos_p));
          if s <= bound {
            sites.pop();
            bounds.pop();
          } else {
            sites.push(q);
            bounds.push(s);
            break;
          }
        }
        _ => {
          sites.push(q);
          bounds.push(f64::NEG_INFINITY);
          break;
        }
      }
    }
  }

  //Lane holds no feature voxels at all: nothing to propagate
  if sites.is_empty() {
    return;
  }

  let mut k = 0;
  for i in 0..n {
    let pos = i as f64 * step;
    while k + 1 < sites.len() && bounds[k + 1] < pos {
      k += 1;
    }
    let d = pos - sites[k] as f64 * step;
    lane[i] = f[sites[k]] + d * d;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_relative_eq;

  fn brute_force(mask: &BinaryMask, voxel: [usize; 3]) -> f64 {
    let s = mask.spacing3();
    let inside = *mask.get(&voxel).unwrap();
    mask
      .iter_indexed()
      .filter(|(_, v)| **v != inside)
      .map(|(c, _)| {
        (0..3).map(|a| ((c[a] as f64 - voxel[a] as f64) * s[a]).powi(2)).sum::<f64>().sqrt()
      })
      .fold(f64::INFINITY, f64::min)
  }

  #[test]
  fn lower_envelope_matches_brute_force() {
    let input = [f64::INFINITY, 4.0, f64::INFINITY, 0.0, f64::INFINITY, f64::INFINITY, 1.0];
    let mut lane = nd::Array1::from_vec(input.to_vec());
    lower_envelope(&mut lane.view_mut(), 0.5);
    for (i, &got) in lane.iter().enumerate() {
      let expected = input
        .iter()
        .enumerate()
        .map(|(j, &f)| f + ((i as f64 - j as f64) * 0.5).powi(2))
        .fold(f64::INFINITY, f64::min);
      assert_relative_eq!(got, expected);
    }
  }

  #[test]
  fn exact_on_anisotropic_grid() {
    let mut mask = BinaryMask::new(&[7, 6, 3], &[1.0, 0.5, 2.0], false).unwrap();
    for x in 1..6 {
      for y in 1..5 {
        mask.set(&[x, y, 1], true).unwrap();
      }
    }
    mask.set(&[3, 3, 0], true).unwrap();
    let map = DistanceTransform::new().compute(&mask).unwrap();
    assert!(!map.degenerate);
    for (coord, &d) in map.field.iter_indexed() {
      let sign = if *mask.get(&coord).unwrap() { 1.0 } else { -1.0 };
      assert_relative_eq!(d, sign * brute_force(&mask, coord), epsilon = 1e-12);
    }
  }

  #[test]
  fn uniform_mask_gets_sentinel() {
    let mask = BinaryMask::new(&[3, 4], &[1.0, 1.0], true).unwrap();
    let map = DistanceTransform::new().compute(&mask).unwrap();
    assert!(map.degenerate);
    let sentinel = 5.0 + 1.0;
    assert!(map.field.iter().all(|&d| (d - sentinel).abs() < 1e-12));

    let empty = mask.inverted();
    let map = DistanceTransform::new().compute(&empty).unwrap();
    assert!(map.field.iter().all(|&d| (d + sentinel).abs() < 1e-12));
  }
}
