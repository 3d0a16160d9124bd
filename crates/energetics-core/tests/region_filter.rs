use std::sync::Arc;

use energetics_core::continent::Polygon;
use energetics_core::error::InvalidTrackError;
use energetics_core::filter::Decision;
use energetics_core::{
    assign_region, compute_land_fraction, BoundingBox, ContinentMask, RawPoint, Region,
    RegionFilter, RegionSet, Track,
};

fn raw(track_id: i64, step: usize, lon: f64, lat: f64, vor: f64) -> RawPoint {
    RawPoint {
        track_id,
        date: format!("2000-01-{:02} {:02}:00:00", 1 + step / 4, (step % 4) * 6),
        longitude: lon.to_string(),
        latitude: lat.to_string(),
        vorticity: vor.to_string(),
    }
}

fn se_br_only() -> RegionSet {
    RegionSet::new(vec![Region::new(
        "SE-BR",
        BoundingBox::new(-52.0, -38.0, -37.0, -23.0),
    )])
    .unwrap()
}

/// Land square covering lon -60..-40, lat -40..-20.
fn land_square() -> Arc<ContinentMask> {
    Arc::new(ContinentMask::from_polygons(vec![Polygon::new(
        vec![
            (-60.0, -40.0),
            (-40.0, -40.0),
            (-40.0, -20.0),
            (-60.0, -20.0),
            (-60.0, -40.0),
        ],
        Vec::new(),
    )]))
}

fn allowed(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[test]
fn genesis_point_decides_region() {
    let points = vec![
        raw(1, 0, -45.0, -30.0, -1e-5),
        raw(1, 1, -30.0, -35.0, -2e-5),
        raw(2, 0, 0.0, 0.0, -1e-5),
        raw(2, 1, -45.0, -30.0, -1e-5),
    ];
    let filter = RegionFilter::new(se_br_only(), Arc::new(ContinentMask::default()));

    let outcome = filter.filter(&points, &allowed(&["SE-BR"]), 80.0).unwrap();

    assert_eq!(
        outcome.classifications[&1].region.as_deref(),
        Some("SE-BR")
    );
    assert_eq!(outcome.classifications[&2].region, None);
    assert_eq!(outcome.classifications[&2].decision, Decision::Unmatched);
    assert_eq!(outcome.table.track_ids(), vec![1]);
    assert_eq!(outcome.report.unmatched, 1);
    assert_eq!(outcome.report.retained, 1);
}

#[test]
fn later_points_never_change_the_region() {
    let regions = RegionSet::default();
    let original = vec![
        raw(5, 0, -45.0, -30.0, -1e-5),
        raw(5, 1, -44.0, -31.0, -1e-5),
        raw(5, 2, -43.0, -32.0, -1e-5),
    ];
    let mut moved = original.clone();
    moved[1].longitude = "10.0".to_string();
    moved[2].latitude = "-70.0".to_string();

    let before = Track::from_raw(5, &original).unwrap();
    let after = Track::from_raw(5, &moved).unwrap();

    assert_eq!(
        assign_region(&before, &regions).map(|region| region.name.clone()),
        assign_region(&after, &regions).map(|region| region.name.clone())
    );
}

#[test]
fn genesis_is_the_earliest_point_not_the_first_row() {
    let regions = se_br_only();
    // Rows out of order: the earliest observation is outside every region.
    let rows = vec![raw(8, 3, -45.0, -30.0, -1e-5), raw(8, 0, 5.0, 5.0, -1e-5)];
    let track = Track::from_raw(8, &rows).unwrap();
    assert!(assign_region(&track, &regions).is_none());
}

#[test]
fn land_fraction_threshold_is_exclusive() {
    let mut points: Vec<RawPoint> = (0..9)
        .map(|step| raw(10, step, -45.0, -30.0 - step as f64 * 0.5, -1e-5))
        .collect();
    points.push(raw(10, 9, -30.0, -30.0, -1e-5));

    let track = Track::from_raw(10, &points).unwrap();
    let fraction = compute_land_fraction(10, track.points(), &land_square()).unwrap();
    assert!((fraction - 0.9).abs() < 1e-12);

    let filter = RegionFilter::new(se_br_only(), land_square());
    let strict = filter.filter(&points, &allowed(&["SE-BR"]), 80.0).unwrap();
    assert!(strict.table.is_empty());
    assert!(matches!(
        strict.classifications[&10].decision,
        Decision::Continental { .. }
    ));
    assert_eq!(strict.report.continental, 1);

    let lenient = filter.filter(&points, &allowed(&["SE-BR"]), 95.0).unwrap();
    assert_eq!(lenient.table.track_ids(), vec![10]);
    assert_eq!(lenient.table.len(), 10);

    let exact = filter.filter(&points, &allowed(&["SE-BR"]), 90.0).unwrap();
    assert!(exact.table.is_empty());
}

#[test]
fn retained_rows_are_copied_with_region_added() {
    let points = vec![
        raw(3, 0, 315.0, -30.0, 1.5e-5),
        raw(3, 1, 316.5, -31.25, -2.5e-5),
    ];
    let filter = RegionFilter::new(se_br_only(), Arc::new(ContinentMask::default()));
    let outcome = filter.filter(&points, &allowed(&["SE-BR"]), 80.0).unwrap();

    let rows = outcome.table.rows_for(3);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].date.as_deref(), Some("2000-01-01 00:00:00"));
    assert_eq!(rows[0].longitude, Some(-45.0));
    assert_eq!(rows[0].latitude, Some(-30.0));
    assert_eq!(rows[0].vorticity, Some(1.5e-5));
    assert_eq!(rows[1].longitude, Some(-43.5));
    assert_eq!(rows[1].vorticity, Some(-2.5e-5));
    assert!(rows.iter().all(|row| row.region.as_deref() == Some("SE-BR")));
}

#[test]
fn regions_outside_the_allow_list_are_dropped() {
    let points = vec![
        raw(1, 0, -45.0, -30.0, -1e-5),
        raw(2, 0, -60.0, -30.0, -1e-5),
        raw(3, 0, -60.0, -45.0, -1e-5),
    ];
    let filter = RegionFilter::new(RegionSet::default(), Arc::new(ContinentMask::default()));
    let outcome = filter
        .filter(&points, &allowed(&["LA-PLATA", "ARG"]), 80.0)
        .unwrap();

    assert_eq!(outcome.table.track_ids(), vec![2, 3]);
    assert_eq!(
        outcome.classifications[&1].decision,
        Decision::RegionNotAllowed
    );
    assert_eq!(outcome.report.not_allowed, 1);
    let se_br = outcome
        .report
        .tracks_per_region
        .iter()
        .find(|(name, _)| name == "SE-BR")
        .unwrap();
    assert_eq!(se_br.1, 1);
}

#[test]
fn malformed_track_does_not_stop_the_batch() {
    let mut points = vec![
        raw(1, 0, -45.0, -30.0, -1e-5),
        raw(2, 0, -45.0, -30.0, -1e-5),
        raw(3, 0, -45.0, -30.0, -1e-5),
    ];
    points[1].latitude = "n/a".to_string();

    let filter = RegionFilter::new(se_br_only(), Arc::new(ContinentMask::default()));
    let outcome = filter.filter(&points, &allowed(&["SE-BR"]), 80.0).unwrap();

    assert_eq!(outcome.table.track_ids(), vec![1, 3]);
    assert_eq!(outcome.classifications[&2].region, None);
    assert!(matches!(
        outcome.classifications[&2].decision,
        Decision::Malformed(InvalidTrackError::Coordinate { .. })
    ));
    assert_eq!(outcome.report.malformed, 1);
}

#[test]
fn empty_point_list_is_invalid() {
    let err = compute_land_fraction(42, &[], &ContinentMask::default()).unwrap_err();
    assert_eq!(err, InvalidTrackError::Empty { track_id: 42 });
}

#[test]
fn worker_count_does_not_change_the_result() {
    let mut points = Vec::new();
    for track_id in 0..97_i64 {
        let lon = -58.0 + (track_id % 23) as f64;
        let lat = -42.0 + (track_id % 17) as f64;
        for step in 0..(1 + track_id as usize % 6) {
            points.push(raw(
                track_id,
                step,
                lon + step as f64 * 2.5,
                lat - step as f64,
                if track_id % 2 == 0 { 1e-5 } else { -1e-5 },
            ));
        }
    }
    // Shuffle row order deterministically.
    points.reverse();

    let names = allowed(&["SE-BR", "LA-PLATA", "ARG"]);
    let sequential = RegionFilter::new(RegionSet::default(), land_square())
        .with_workers(1)
        .filter(&points, &names, 50.0)
        .unwrap();
    assert!(!sequential.table.is_empty());

    for workers in [2, 3, 7, 16, 200] {
        let parallel = RegionFilter::new(RegionSet::default(), land_square())
            .with_workers(workers)
            .filter(&points, &names, 50.0)
            .unwrap();
        assert_eq!(parallel.table, sequential.table, "workers = {workers}");
        assert_eq!(parallel.report, sequential.report, "workers = {workers}");
    }
}
