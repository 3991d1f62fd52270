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

use ndarray as nd;
use ndarray_rand::{rand_distr::Bernoulli, RandomExt};
use rand::{rngs::StdRng, SeedableRng};
use rustronomy_binary_watershed::prelude::*;

#[test]
fn core_bench() {
  //Create a random mask
  let mut rng = StdRng::seed_from_u64(1993);
  let rf = nd::Array3::random_using((32, 64, 64), Bernoulli::new(0.8).unwrap(), &mut rng);
  let mask = BinaryMask::from_ndarray(rf, &[1.0, 1.0, 1.0]).unwrap();

  //Set-up the segmentation
  let watershed = SegmentationBuilder::new().set_peak_tolerance(0.5).build().unwrap();

  let max_threads = rayon::current_num_threads().max(2);
  println!("Testing 1 to {max_threads} threads performance");

  //Time with num cores
  let results: Vec<(f64, _)> = (1..=max_threads)
    .map(|num_threads| {
      //Set core count
      println!("Running algorithm with {num_threads} thread(s)");
      let pool = rayon::ThreadPoolBuilder::new().num_threads(num_threads).build().unwrap();
      //Time segmentation
      let start = std::time::Instant::now();
      let report = pool.install(|| watershed.run(&mask)).unwrap();
      (start.elapsed().as_secs_f64(), report)
    })
    .collect();

  //Print per run results
  for (threads, (time, report)) in results.iter().enumerate().map(|(i, r)| (i + 1, r)) {
    println!("{threads:02} threads = {time:000.02}s, {} segments", report.segment_count());
  }

  //Output may not depend on the number of threads
  let (_, reference) = &results[0];
  for (_, report) in &results[1..] {
    assert_eq!(report.peaks, reference.peaks);
    assert_eq!(report.labels, reference.labels);
    assert!(report
      .distance
      .iter()
      .zip(reference.distance.iter())
      .all(|(a, b)| a.to_bits() == b.to_bits()));
  }

  //Print total results
  let average = (1.0 / (results.len() as f64)) * results.iter().map(|(t, _)| t).sum::<f64>();
  println!("Average time: {average:.02}");
}
