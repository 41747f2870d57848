//! Resampler scenarios driven through the pipeline: 1 Hz density, track
//! separation, and the post-hoc proximity analysis over resampled history.

mod common;

use std::sync::Arc;

use common::{bump, count_of, counter, scenic_layer};
use serde_json::json;
use skywatch::rules::config::RulesFile;
use skywatch::{Pipeline, Resampler, ResamplerConfig};

const LAT: f64 = 40.7635;
const LON: f64 = -119.2122;

/// A message with a decodable US-registration hex so the resampler gets a
/// tail to key on.
fn tailed_msg(hex: &str, lat: f64, lon: f64, alt: i32, now: f64) -> serde_json::Value {
    json!({
        "now": now,
        "alt_baro": alt,
        "gs": 120.0,
        "lat": lat,
        "lon": lon,
        "track": 90.0,
        "hex": hex,
        "flight": "",
    })
}

fn resampling_pipeline(yaml: &str) -> Pipeline {
    let mut pipeline = Pipeline::new(RulesFile::from_str(yaml).unwrap(), vec![scenic_layer()]);
    let resampler = Resampler::new(
        ResamplerConfig::default(),
        Arc::new(vec![]),
        Arc::clone(pipeline.stats()),
    );
    pipeline.enable_resampler(resampler);
    pipeline
}

#[test]
fn test_one_entry_per_second_through_pipeline() {
    let pipeline = resampling_pipeline("rules: {}");

    pipeline.run_iter(vec![
        tailed_msg("a00001", 40.70, LON, 5000, 1000.0),
        tailed_msg("a00001", 40.71, LON, 5000, 1005.0),
        tailed_msg("a00001", 40.80, LON, 5000, 1040.0),
    ]);

    let resampler = pipeline.resampler().unwrap().lock().unwrap();
    assert_eq!(resampler.time_range(), Some((1000, 1040)));

    let mut per_second = 0;
    resampler.for_each_resampled_point(|_loc| per_second += 1);
    assert_eq!(per_second, 41, "one entry per integer second in [1000, 1040]");

    // An interpolated sample lies strictly between the bracketing raw ones.
    let mid = &resampler.points_at(1023).unwrap()[0];
    assert!(mid.lat > 40.71 && mid.lat < 40.80);
}

#[test]
fn test_altitude_band_keeps_resampler_clean() {
    let pipeline = resampling_pipeline("rules: {}");

    pipeline.run_iter(vec![
        tailed_msg("a00001", LAT, LON, 800, 1000.0), // below the 3000 ft floor
        tailed_msg("a00001", LAT, LON, 5000, 1005.0),
        tailed_msg("a00001", LAT, LON, 14_000, 1010.0), // above the 12000 ft ceiling
    ]);

    let resampler = pipeline.resampler().unwrap().lock().unwrap();
    let mut count = 0;
    resampler.for_each_resampled_point(|_| count += 1);
    assert_eq!(count, 1, "only the in-band sample survives");
    assert!(pipeline.stats().get(&pipeline.stats().resampler_skipped) >= 2);
}

#[test]
fn test_post_hoc_proximity_over_resampled_history() {
    // Two aircraft fly converging tracks sampled only every ~20 s; the raw
    // stream never shows them at the same instant except at start. The
    // resampled history still exposes the continuous conflict.
    let pipeline = resampling_pipeline(
        r#"
rules:
  prox:
    conditions:
      min_alt: 3000
      max_alt: 10000
      proximity: [ 400, 0.3 ]
    actions:
      callback: los
"#,
    );

    let pairs = counter();
    let c = pairs.clone();
    pipeline.register_pair_callback("los", move |f1, f2| {
        assert_ne!(f1.flight_id, f2.flight_id);
        bump(&c);
    });

    // a00001 -> N1; a18d50 -> N2. Parallel tracks 0.1 nm apart at 5000 ft.
    pipeline.run_iter(vec![
        tailed_msg("a00001", 40.700, LON, 5000, 2000.0),
        tailed_msg("a18d50", 40.7017, LON, 5000, 2000.0),
        tailed_msg("a00001", 40.710, LON, 5000, 2020.0),
        tailed_msg("a18d50", 40.7117, LON, 5000, 2020.0),
        tailed_msg("a00001", 40.720, LON, 5000, 2040.0),
        tailed_msg("a18d50", 40.7217, LON, 5000, 2040.0),
    ]);

    let finals = counter();
    let f = finals.clone();
    let resampler = pipeline.resampler().unwrap().lock().unwrap();
    resampler.do_prox_checks(pipeline.engine(), Arc::new(vec![]), 1, move |_t| bump(&f));

    // Every resampled second with both aircraft fresh can fire the pair.
    assert!(count_of(&pairs) > 30, "got {}", count_of(&pairs));
    // The gc callback ran once per sampled second.
    assert_eq!(count_of(&finals), 41);
}

#[test]
fn test_gap_separates_tracks_through_pipeline() {
    let pipeline = resampling_pipeline("rules: {}");

    pipeline.run_iter(vec![
        tailed_msg("a00001", 40.70, LON, 5000, 1000.0),
        tailed_msg("a00001", 40.80, LON, 5000, 1200.0), // 200 s silence
    ]);

    let resampler = pipeline.resampler().unwrap().lock().unwrap();
    let mut count = 0;
    resampler.for_each_resampled_point(|_| count += 1);
    assert_eq!(count, 2, "no synthetic points across the gap");

    // The second sample starts a new sequence-numbered track.
    assert_eq!(resampler.points_at(1200).unwrap()[0].callsign, "N1_2");
    assert_eq!(resampler.points_at(1000).unwrap()[0].callsign, "N1_1");
}
