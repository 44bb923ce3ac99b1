use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use delivery_coordinator::models::{GeofenceRegion, LocationSample};
use delivery_coordinator::services::GeofenceMonitor;
use delivery_coordinator::time_utils::ManualClock;
use std::hint::black_box;
use std::sync::Arc;

fn benchmark_evaluate(c: &mut Criterion) {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let monitor = GeofenceMonitor::new(Arc::new(ManualClock::new(start)));

    // A 20x25 grid of 150 m regions roughly 500 m apart
    for row in 0..20 {
        for col in 0..25 {
            let region = GeofenceRegion::new(
                format!("r{row}-{col}"),
                37.70 + f64::from(row) * 0.0045,
                -122.50 + f64::from(col) * 0.0057,
                150.0,
            );
            monitor.add_region(region).expect("Failed to add region");
        }
    }

    let inside = LocationSample::new(37.70, -122.50, start);
    let outside = LocationSample::new(36.00, -120.00, start);

    let mut group = c.benchmark_group("geofence_evaluate");

    group.bench_function("500_regions_inside_one", |b| {
        b.iter(|| monitor.evaluate(black_box("driver-1"), black_box(&inside)))
    });

    group.bench_function("500_regions_far_away", |b| {
        b.iter(|| monitor.evaluate(black_box("driver-2"), black_box(&outside)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_evaluate);
criterion_main!(benches);
