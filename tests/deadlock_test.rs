// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! These tests drive the real engine from many threads and verify that the
//! trip → driver → request → ledger lock order never forms a cycle, and that
//! racing callers cannot both win an assignment.

use parking_lot::deadlock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use trip_ledger::{
    DriverId, Engine, EntryType, NewTariff, NewTrip, RequestStatus, TripError, TripId,
    TripStatus, TripType,
};

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150)); // Let detector thread exit
}

fn engine_with_drivers(drivers: u32) -> Arc<Engine> {
    let engine = Engine::new();
    engine.tariffs().insert(NewTariff {
        vehicle_type: "sedan".to_string(),
        one_way_per_km: dec!(14.00),
        one_way_min_km: 130,
        round_trip_per_km: dec!(12.00),
        round_trip_min_km: 250,
        driver_allowance: dec!(300.00),
        commission_percent: Some(dec!(10)),
        is_active: true,
    });
    for id in 1..=drivers {
        engine.register_driver(DriverId(id), true).unwrap();
    }
    Arc::new(engine)
}

fn new_trip(engine: &Engine) -> TripId {
    engine
        .create_trip(NewTrip::new(TripType::OneWay, "sedan"))
        .id
}

// === Tests ===

/// Many drivers race for the same open trip; exactly one wins.
#[test]
fn concurrent_assignment_has_one_winner() {
    let detector = start_deadlock_detector();
    const NUM_THREADS: u32 = 32;

    for _ in 0..20 {
        let engine = engine_with_drivers(NUM_THREADS);
        let trip = new_trip(&engine);
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (1..=NUM_THREADS)
            .map(|driver| {
                let engine = engine.clone();
                let winners = winners.clone();
                thread::spawn(move || match engine.assign(trip, DriverId(driver)) {
                    Ok(_) => {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => assert_eq!(e, TripError::AlreadyAssigned),
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        let trip = engine.get_trip(&trip).unwrap();
        let winner = trip.assigned_driver.expect("trip should have a driver");
        let busy: Vec<DriverId> = engine
            .drivers()
            .iter()
            .filter(|d| !d.is_available())
            .map(|d| d.id())
            .collect();
        assert_eq!(busy, vec![winner]);
    }

    stop_deadlock_detector(detector);
}

/// One driver races for many trips; strict assignment lets only one through.
#[test]
fn concurrent_assignment_of_one_driver() {
    let detector = start_deadlock_detector();
    let engine = engine_with_drivers(1);
    let trips: Vec<TripId> = (0..16).map(|_| new_trip(&engine)).collect();

    let handles: Vec<_> = trips
        .iter()
        .map(|&trip| {
            let engine = engine.clone();
            thread::spawn(move || engine.assign(trip, DriverId(1)).is_ok())
        })
        .collect();
    let won: usize = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked") as usize)
        .sum();

    stop_deadlock_detector(detector);
    assert_eq!(won, 1);
    assert_eq!(engine.active_trips(Some(DriverId(1))).len(), 1);
}

/// Approvals of competing requests for the same trip: one accepted, the
/// rest rejected or refused.
#[test]
fn concurrent_approvals_accept_one_request() {
    let detector = start_deadlock_detector();
    const NUM_DRIVERS: u32 = 16;
    let engine = engine_with_drivers(NUM_DRIVERS);
    let trip = new_trip(&engine);
    let requests: Vec<_> = (1..=NUM_DRIVERS)
        .map(|d| engine.create_request(trip, DriverId(d)).unwrap().id)
        .collect();

    let handles: Vec<_> = requests
        .iter()
        .map(|&request| {
            let engine = engine.clone();
            thread::spawn(move || engine.approve_request(request).is_ok())
        })
        .collect();
    let approved: usize = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked") as usize)
        .sum();

    stop_deadlock_detector(detector);
    assert_eq!(approved, 1);
    let statuses: Vec<RequestStatus> = engine
        .requests()
        .for_trip(trip)
        .iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == RequestStatus::Accepted)
            .count(),
        1
    );
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == RequestStatus::Rejected)
            .count(),
        NUM_DRIVERS as usize - 1
    );
}

/// Full lifecycles on many trips, with wallet postings and readers running
/// alongside.
#[test]
fn no_deadlock_full_lifecycle_under_contention() {
    let detector = start_deadlock_detector();
    const NUM_DRIVERS: u32 = 8;
    const TRIPS_PER_DRIVER: u64 = 25;
    let engine = engine_with_drivers(NUM_DRIVERS);
    let running = Arc::new(AtomicBool::new(true));

    let mut handles = Vec::new();
    for driver in 1..=NUM_DRIVERS {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            for i in 0..TRIPS_PER_DRIVER {
                let trip = new_trip(&engine);
                engine.assign(trip, DriverId(driver)).unwrap();
                engine.record_odometer_start(trip, i * 1000).unwrap();
                if i % 5 == 0 {
                    engine.cancel(trip, "rider no-show").unwrap();
                } else {
                    engine.record_odometer_end(trip, i * 1000 + 250).unwrap();
                    // Duplicate delivery of the same reading.
                    engine.record_odometer_end(trip, i * 1000 + 250).unwrap();
                }
                engine
                    .post_wallet_entry(DriverId(driver), None, dec!(100.00), EntryType::Credit)
                    .unwrap();
            }
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        let running = running.clone();
        readers.push(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let _ = engine.stats();
                let _ = engine.available_drivers();
                let _ = engine.active_trips(None);
                for driver in 1..=NUM_DRIVERS {
                    let _ = engine.reconcile_wallet(DriverId(driver));
                }
                thread::yield_now();
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    running.store(false, Ordering::SeqCst);
    for reader in readers {
        reader.join().expect("Reader panicked");
    }
    stop_deadlock_detector(detector);

    let stats = engine.stats();
    let total = u64::from(NUM_DRIVERS) * TRIPS_PER_DRIVER;
    assert_eq!(stats.total as u64, total);
    assert_eq!(stats.cancelled as u64, u64::from(NUM_DRIVERS) * 5);
    assert_eq!(stats.active, 0);

    // 20 completed trips per driver at 350.00 commission, 25 credits of 100.00.
    for driver in engine.drivers() {
        assert!(driver.is_available());
        assert_eq!(driver.wallet_balance(), dec!(2500.00) - dec!(7000.00));
        assert_eq!(
            driver.wallet_balance(),
            engine.ledger().balance(driver.id())
        );
    }
}

/// Deleting trips while other threads read and mutate them.
#[test]
fn no_deadlock_delete_during_queries() {
    let detector = start_deadlock_detector();
    let engine = engine_with_drivers(4);
    let trips: Vec<TripId> = (0..200).map(|_| new_trip(&engine)).collect();
    let trips = Arc::new(trips);

    let mut handles = Vec::new();
    for worker in 0..4u32 {
        let engine = engine.clone();
        let trips = trips.clone();
        handles.push(thread::spawn(move || {
            for (i, &trip) in trips.iter().enumerate() {
                match (i as u32 + worker) % 4 {
                    0 => {
                        let _ = engine.delete_trip(trip);
                    }
                    1 => {
                        if engine.assign(trip, DriverId(worker + 1)).is_ok() {
                            let _ = engine.unassign(trip);
                        }
                    }
                    2 => {
                        let _ = engine.trips_by_status(TripStatus::Open);
                    }
                    _ => {
                        let _ = engine.available_trips();
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    stop_deadlock_detector(detector);

    for driver in engine.drivers() {
        assert!(driver.is_available());
    }
    assert_eq!(engine.ledger().balance(DriverId(1)), Decimal::ZERO);
}

/// Manual entries race against deletion of the trip they point at.
#[test]
fn wallet_entries_never_outlive_their_trip() {
    let detector = start_deadlock_detector();
    let engine = engine_with_drivers(2);
    let trips: Vec<TripId> = (0..300).map(|_| new_trip(&engine)).collect();
    let trips = Arc::new(trips);
    let posted = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for worker in 0..4u32 {
        let engine = engine.clone();
        let trips = trips.clone();
        let posted = posted.clone();
        handles.push(thread::spawn(move || {
            for &trip in trips.iter() {
                if worker % 2 == 0 {
                    let _ = engine.delete_trip(trip);
                } else {
                    match engine.post_wallet_entry(
                        DriverId(worker / 2 + 1),
                        Some(trip),
                        dec!(5.00),
                        EntryType::Credit,
                    ) {
                        Ok(_) => {
                            posted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => assert_eq!(e, TripError::TripNotFound),
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    stop_deadlock_detector(detector);

    let mut linked = 0;
    for &trip in trips.iter() {
        let entries = engine.ledger().entries_for_trip(trip);
        if engine.get_trip(&trip).is_none() {
            assert!(entries.is_empty(), "deleted trip {trip} kept entries");
        }
        linked += entries.len();
    }
    assert_eq!(linked, posted.load(Ordering::SeqCst));
    assert_eq!(engine.ledger().len(), linked);
}
