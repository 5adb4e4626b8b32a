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

//! Trip lifecycle engine.
//!
//! The [`Engine`] is the central component that moves trips through their
//! lifecycle, prices completed trips, and settles the platform commission on
//! the driver's wallet ledger.
//!
//! # Lifecycle
//!
//! - **Assign**: Attach a driver to an open trip (directly or by approving a
//!   driver's request). The driver takes a lease on the trip.
//! - **Start**: Record the starting odometer reading.
//! - **Complete**: Record the ending odometer reading, price the trip, post
//!   the commission, and release the driver.
//! - **Cancel**: Stop a trip that has not completed and release the driver.
//!
//! # Settlement
//!
//! The customer pays the driver directly. On completion the engine posts a
//! single `COMMISSION` entry for the platform's cut. Recalculation posts only
//! the difference against what was already settled.
//!
//! # Thread Safety
//!
//! Trips and drivers are `Mutex`-guarded rows inside [`DashMap`]s. Locks are
//! always taken in the order trip → driver → request queue → ledger, so two
//! operations on the same trip serialize and no operation can deadlock.

use crate::base::{DriverId, RequestId, TripId};
use crate::config::EngineConfig;
use crate::driver::Driver;
use crate::fare::{self, FareBreakdown};
use crate::request_queue::{RequestStatus, TripDriverRequest, TripRequestQueue};
use crate::tariff::TariffCatalog;
use crate::trip::{NewTrip, Trip, TripStatus};
use crate::wallet::{EntryType, WalletLedger, WalletTransaction};
use crate::TripError;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which guards apply when attaching a driver to a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignMode {
    /// Driver must be approved and free.
    Strict,
    /// Administrator override: approval and availability are not checked.
    Override,
}

/// Trip counts per status, plus revenue from completed trips.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TripStats {
    pub total: usize,
    pub open: usize,
    pub assigned: usize,
    pub started: usize,
    pub completed: usize,
    pub cancelled: usize,
    /// Assigned plus started.
    pub active: usize,
    /// Sum of fares of completed trips.
    pub total_revenue: Decimal,
}

/// Trip lifecycle engine.
///
/// # Invariants
///
/// - A trip has at most one assigned driver; two concurrent assignments of
///   the same open trip cannot both succeed.
/// - A driver is available iff it holds no trip lease.
/// - Odometer end is never below odometer start.
/// - Ledger entries are only appended, and each driver's cached balance is
///   updated under the same lock as the append.
/// - Recording the same odometer end twice never posts a second settlement.
pub struct Engine {
    config: EngineConfig,
    trips: DashMap<TripId, Arc<Mutex<Trip>>>,
    drivers: DashMap<DriverId, Arc<Driver>>,
    tariffs: TariffCatalog,
    ledger: WalletLedger,
    requests: TripRequestQueue,
    next_trip_id: AtomicU64,
}

impl Engine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Engine {
            config,
            trips: DashMap::new(),
            drivers: DashMap::new(),
            tariffs: TariffCatalog::new(),
            ledger: WalletLedger::new(),
            requests: TripRequestQueue::new(),
            next_trip_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tariffs(&self) -> &TariffCatalog {
        &self.tariffs
    }

    /// Read access to the ledger. There is no way to change a posted entry.
    pub fn ledger(&self) -> &WalletLedger {
        &self.ledger
    }

    pub fn requests(&self) -> &TripRequestQueue {
        &self.requests
    }

    // === Lookups ===

    fn trip_cell(&self, id: TripId) -> Result<Arc<Mutex<Trip>>, TripError> {
        // Clone the Arc so the map shard is released before the row is locked.
        self.trips
            .get(&id)
            .map(|cell| Arc::clone(cell.value()))
            .ok_or(TripError::TripNotFound)
    }

    fn driver_row(&self, id: DriverId) -> Result<Arc<Driver>, TripError> {
        self.drivers
            .get(&id)
            .map(|driver| Arc::clone(driver.value()))
            .ok_or(TripError::DriverNotFound)
    }

    fn trip_cells(&self) -> Vec<Arc<Mutex<Trip>>> {
        self.trips
            .iter()
            .map(|cell| Arc::clone(cell.value()))
            .collect()
    }

    // === Drivers ===

    /// Registers a driver owned by the surrounding system.
    ///
    /// # Errors
    ///
    /// Returns [`TripError::DuplicateDriver`] if the ID is taken.
    pub fn register_driver(&self, id: DriverId, approved: bool) -> Result<(), TripError> {
        match self.drivers.entry(id) {
            Entry::Occupied(_) => Err(TripError::DuplicateDriver),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Driver::new(id, approved)));
                tracing::info!(driver = %id, approved, "driver registered");
                Ok(())
            }
        }
    }

    /// Retrieves a driver by ID.
    pub fn get_driver(&self, id: &DriverId) -> Option<Arc<Driver>> {
        self.drivers.get(id).map(|driver| Arc::clone(driver.value()))
    }

    /// Returns all drivers ordered by ID.
    pub fn drivers(&self) -> Vec<Arc<Driver>> {
        let mut drivers: Vec<(DriverId, Arc<Driver>)> = self
            .drivers
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        drivers.sort_by_key(|(id, _)| *id);
        drivers.into_iter().map(|(_, driver)| driver).collect()
    }

    /// Approved drivers holding no lease, ordered by ID.
    pub fn available_drivers(&self) -> Vec<DriverId> {
        self.drivers()
            .into_iter()
            .filter(|driver| {
                let data = driver.lock();
                data.is_approved() && data.is_available()
            })
            .map(|driver| driver.id())
            .collect()
    }

    // === Trip creation ===

    /// Creates an open trip from a booking. The fare stays unset until the
    /// trip completes.
    pub fn create_trip(&self, booking: NewTrip) -> Trip {
        let id = TripId(self.next_trip_id.fetch_add(1, Ordering::Relaxed));
        let trip = Trip::open(id, booking, Utc::now());
        self.trips.insert(id, Arc::new(Mutex::new(trip.clone())));
        tracing::info!(
            trip = %id,
            vehicle_type = %trip.vehicle_type,
            trip_type = ?trip.trip_type,
            "trip created"
        );
        trip
    }

    /// Retrieves a trip snapshot by ID.
    pub fn get_trip(&self, id: &TripId) -> Option<Trip> {
        let cell = self.trip_cell(*id).ok()?;
        let trip = cell.lock().clone();
        Some(trip)
    }

    // === Assignment ===

    /// Attaches `driver` to an open trip. The caller holds the trip lock.
    fn attach_driver(
        &self,
        trip: &mut Trip,
        driver: &Driver,
        mode: AssignMode,
    ) -> Result<(), TripError> {
        if trip.assigned_driver.is_some() {
            return Err(TripError::AlreadyAssigned);
        }
        trip.status.ensure_transition(TripStatus::Assigned)?;

        let mut data = driver.lock();
        if mode == AssignMode::Strict {
            if !data.is_available() {
                return Err(TripError::DriverUnavailable);
            }
            if !data.is_approved() {
                return Err(TripError::DriverNotApproved);
            }
        }

        trip.assigned_driver = Some(data.id());
        trip.transition(TripStatus::Assigned)?;
        data.acquire_lease(trip.id);
        Ok(())
    }

    /// Directly assigns a driver to an open trip.
    ///
    /// # Errors
    ///
    /// - [`TripError::TripNotFound`] / [`TripError::DriverNotFound`] - Unknown ID.
    /// - [`TripError::AlreadyAssigned`] - The trip already has a driver.
    /// - [`TripError::InvalidStatusTransition`] - The trip is not open.
    /// - [`TripError::DriverUnavailable`] - The driver is on another trip.
    /// - [`TripError::DriverNotApproved`] - The driver is not approved.
    pub fn assign(&self, trip_id: TripId, driver_id: DriverId) -> Result<Trip, TripError> {
        self.assign_with(trip_id, driver_id, AssignMode::Strict)
    }

    /// Administrator assignment that skips the availability and approval
    /// checks. The driver still takes a lease on the trip.
    pub fn assign_override(&self, trip_id: TripId, driver_id: DriverId) -> Result<Trip, TripError> {
        self.assign_with(trip_id, driver_id, AssignMode::Override)
    }

    fn assign_with(
        &self,
        trip_id: TripId,
        driver_id: DriverId,
        mode: AssignMode,
    ) -> Result<Trip, TripError> {
        let cell = self.trip_cell(trip_id)?;
        let driver = self.driver_row(driver_id)?;

        let mut trip = cell.lock();
        self.attach_driver(&mut trip, &driver, mode)?;
        trip.is_manual_assignment = true;

        tracing::info!(trip = %trip_id, driver = %driver_id, mode = ?mode, "driver assigned");
        Ok(trip.clone())
    }

    /// Releases the driver and returns the trip to open.
    ///
    /// If the driver came from an approved request, that request is
    /// cancelled so the trip can accept a new one.
    ///
    /// # Errors
    ///
    /// - [`TripError::InvalidStatusTransition`] - Trip has started or finished.
    /// - [`TripError::NoDriverAssigned`] - Nothing to release.
    pub fn unassign(&self, trip_id: TripId) -> Result<Trip, TripError> {
        let cell = self.trip_cell(trip_id)?;
        let mut trip = cell.lock();

        if !matches!(trip.status, TripStatus::Open | TripStatus::Assigned) {
            return Err(TripError::InvalidStatusTransition {
                from: trip.status,
                to: TripStatus::Open,
            });
        }
        let driver_id = trip.assigned_driver.ok_or(TripError::NoDriverAssigned)?;

        trip.transition(TripStatus::Open)?;
        trip.assigned_driver = None;
        trip.is_manual_assignment = false;
        self.release_driver(driver_id, trip_id);
        let released = self.requests.release_accepted(trip_id);

        tracing::info!(
            trip = %trip_id,
            driver = %driver_id,
            released_request = ?released,
            "driver unassigned"
        );
        Ok(trip.clone())
    }

    /// Returns the lease a driver holds on a trip. The caller holds the trip lock.
    fn release_driver(&self, driver_id: DriverId, trip_id: TripId) {
        match self.drivers.get(&driver_id).map(|d| Arc::clone(d.value())) {
            Some(driver) => {
                if !driver.lock().release_lease(trip_id) {
                    tracing::warn!(trip = %trip_id, driver = %driver_id, "driver held no lease on trip");
                }
            }
            None => {
                tracing::warn!(trip = %trip_id, driver = %driver_id, "assigned driver not registered");
            }
        }
    }

    // === Driving ===

    /// Starts an assigned trip, optionally recording the starting odometer.
    ///
    /// # Errors
    ///
    /// Returns [`TripError::InvalidStatusTransition`] unless the trip is assigned.
    pub fn start(&self, trip_id: TripId, odometer_start: Option<u64>) -> Result<Trip, TripError> {
        let cell = self.trip_cell(trip_id)?;
        let mut trip = cell.lock();
        Self::start_locked(&mut trip, odometer_start)?;
        Ok(trip.clone())
    }

    fn start_locked(trip: &mut Trip, odometer_start: Option<u64>) -> Result<(), TripError> {
        trip.status.ensure_transition(TripStatus::Started)?;
        if odometer_start.is_some() {
            trip.odometer_start = odometer_start;
        }
        trip.started_at = Some(Utc::now());
        trip.transition(TripStatus::Started)?;
        tracing::info!(trip = %trip.id, odometer_start = ?trip.odometer_start, "trip started");
        Ok(())
    }

    /// Completes a started trip: prices it, settles the commission, and
    /// releases the driver.
    ///
    /// # Errors
    ///
    /// - [`TripError::InvalidStatusTransition`] - The trip has not started.
    /// - [`TripError::InvalidOdometerReading`] - No start reading, or end < start.
    /// - [`TripError::TariffNotFound`] - No active tariff for the vehicle type.
    pub fn complete(&self, trip_id: TripId, odometer_end: u64) -> Result<Trip, TripError> {
        let cell = self.trip_cell(trip_id)?;
        let mut trip = cell.lock();
        self.complete_locked(&mut trip, odometer_end)?;
        Ok(trip.clone())
    }

    fn complete_locked(&self, trip: &mut Trip, odometer_end: u64) -> Result<FareBreakdown, TripError> {
        trip.status.ensure_transition(TripStatus::Completed)?;
        let odometer_start = trip.odometer_start.ok_or(TripError::InvalidOdometerReading)?;
        if odometer_end < odometer_start {
            return Err(TripError::InvalidOdometerReading);
        }
        let driver_id = trip.assigned_driver.ok_or(TripError::NoDriverAssigned)?;

        // Everything that can fail happens before the trip is touched.
        let tariff = self.tariffs.active(&trip.vehicle_type)?;
        let quote = fare::quote(
            &tariff,
            trip.trip_type,
            odometer_end - odometer_start,
            self.config.default_commission_percent,
        );
        let driver = self.driver_row(driver_id)?;

        {
            let mut data = driver.lock();
            if quote.commission > Decimal::ZERO {
                let entry = self.ledger.post(
                    driver_id,
                    Some(trip.id),
                    quote.commission,
                    EntryType::Commission,
                )?;
                data.apply_wallet_delta(entry.signed_amount());
            }
            data.release_lease(trip.id);
        }

        trip.odometer_end = Some(odometer_end);
        trip.distance = Some(quote.distance);
        trip.fare = Some(quote.fare);
        trip.commission = Some(quote.commission);
        trip.ended_at = Some(Utc::now());
        trip.transition(TripStatus::Completed)?;

        tracing::info!(
            trip = %trip.id,
            driver = %driver_id,
            tariff = %tariff.id,
            distance = %quote.distance,
            billable_km = %quote.billable_km,
            fare = %quote.fare,
            commission = %quote.commission,
            "trip completed"
        );
        Ok(quote)
    }

    /// Cancels a trip that has not finished, releases its driver, and
    /// rejects its pending requests.
    ///
    /// Ledger entries are never reversed by cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`TripError::InvalidStatusTransition`] for completed or
    /// cancelled trips.
    pub fn cancel(&self, trip_id: TripId, reason: &str) -> Result<Trip, TripError> {
        let cell = self.trip_cell(trip_id)?;
        let mut trip = cell.lock();
        self.cancel_locked(&mut trip, reason)?;
        Ok(trip.clone())
    }

    fn cancel_locked(&self, trip: &mut Trip, reason: &str) -> Result<(), TripError> {
        let from = trip.status;
        trip.transition(TripStatus::Cancelled)?;
        trip.cancel_reason = Some(reason.to_string());
        if let Some(driver_id) = trip.assigned_driver {
            self.release_driver(driver_id, trip.id);
        }
        let rejected = self.requests.reject_pending(trip.id);
        tracing::info!(
            trip = %trip.id,
            from = %from,
            reason,
            rejected_requests = rejected.len(),
            "trip cancelled"
        );
        Ok(())
    }

    // === Odometer recording ===

    /// Records the starting odometer reading.
    ///
    /// On an assigned trip this starts it. On a started trip without a start
    /// reading it fills the reading in. Repeating the recorded value is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TripError::InvalidStatusTransition`] when the trip is open,
    /// finished with a different reading, or a different start reading is
    /// already recorded.
    pub fn record_odometer_start(&self, trip_id: TripId, reading: u64) -> Result<Trip, TripError> {
        let cell = self.trip_cell(trip_id)?;
        let mut trip = cell.lock();

        match (trip.status, trip.odometer_start) {
            (TripStatus::Assigned, _) => Self::start_locked(&mut trip, Some(reading))?,
            (TripStatus::Started, None) => {
                trip.odometer_start = Some(reading);
                tracing::info!(trip = %trip_id, odometer_start = reading, "odometer start recorded");
            }
            (_, Some(recorded)) if recorded == reading => {
                tracing::debug!(trip = %trip_id, reading, "odometer start already recorded");
            }
            (status, _) => {
                return Err(TripError::InvalidStatusTransition {
                    from: status,
                    to: TripStatus::Started,
                });
            }
        }
        Ok(trip.clone())
    }

    /// Records the ending odometer reading.
    ///
    /// On a started trip this completes it. Recording the same value again on
    /// the completed trip is a no-op and posts nothing.
    ///
    /// # Errors
    ///
    /// - [`TripError::InvalidOdometerReading`] - No start reading, or end < start.
    /// - [`TripError::InvalidStatusTransition`] - Cancelled trip, or a
    ///   different end reading on a completed trip.
    /// - [`TripError::TariffNotFound`] - No active tariff for the vehicle type.
    pub fn record_odometer_end(&self, trip_id: TripId, reading: u64) -> Result<Trip, TripError> {
        let cell = self.trip_cell(trip_id)?;
        let mut trip = cell.lock();

        match trip.status {
            TripStatus::Started => {
                self.complete_locked(&mut trip, reading)?;
            }
            TripStatus::Completed if trip.odometer_end == Some(reading) => {
                tracing::debug!(trip = %trip_id, reading, "odometer end already recorded");
            }
            TripStatus::Open | TripStatus::Assigned => {
                return Err(TripError::InvalidOdometerReading);
            }
            status => {
                return Err(TripError::InvalidStatusTransition {
                    from: status,
                    to: TripStatus::Completed,
                });
            }
        }
        Ok(trip.clone())
    }

    // === Settlement ===

    /// Reprices a completed trip with the current tariff.
    ///
    /// If the fare is unchanged nothing is posted and `None` is returned.
    /// Otherwise a single entry for the commission difference is posted
    /// (`DEBIT` when the commission grew, `CREDIT` when it shrank).
    ///
    /// # Errors
    ///
    /// - [`TripError::InsufficientContext`] - The trip has no settled fare.
    /// - [`TripError::TariffNotFound`] - No active tariff for the vehicle type.
    pub fn recalculate_fare(&self, trip_id: TripId) -> Result<Option<WalletTransaction>, TripError> {
        let cell = self.trip_cell(trip_id)?;
        let mut trip = cell.lock();
        self.ensure_listed(trip_id)?;

        let (Some(old_fare), Some(old_commission), Some(distance), Some(driver_id)) = (
            trip.fare,
            trip.commission,
            trip.odometer_distance(),
            trip.assigned_driver,
        ) else {
            return Err(TripError::InsufficientContext);
        };

        let tariff = self.tariffs.active(&trip.vehicle_type)?;
        let quote = fare::quote(
            &tariff,
            trip.trip_type,
            distance,
            self.config.default_commission_percent,
        );
        if quote.fare == old_fare {
            tracing::debug!(trip = %trip_id, fare = %old_fare, "fare unchanged");
            return Ok(None);
        }

        let delta = quote.commission - old_commission;
        let entry = if delta.is_zero() {
            None
        } else {
            let driver = self.driver_row(driver_id)?;
            let mut data = driver.lock();
            let entry_type = if delta > Decimal::ZERO {
                EntryType::Debit
            } else {
                EntryType::Credit
            };
            let entry = self
                .ledger
                .post(driver_id, Some(trip_id), delta.abs(), entry_type)?;
            data.apply_wallet_delta(entry.signed_amount());
            Some(entry)
        };

        trip.fare = Some(quote.fare);
        trip.commission = Some(quote.commission);

        tracing::info!(
            trip = %trip_id,
            old_fare = %old_fare,
            new_fare = %quote.fare,
            commission_delta = %delta,
            "fare recalculated"
        );
        Ok(entry)
    }

    /// Posts a manual wallet entry (top-up, refund, correction).
    ///
    /// # Errors
    ///
    /// - [`TripError::DriverNotFound`] / [`TripError::TripNotFound`] - Unknown ID.
    /// - [`TripError::InvalidAmount`] - Amount is not positive.
    pub fn post_wallet_entry(
        &self,
        driver_id: DriverId,
        trip_id: Option<TripId>,
        amount: Decimal,
        entry_type: EntryType,
    ) -> Result<WalletTransaction, TripError> {
        let cell = trip_id.map(|id| self.trip_cell(id)).transpose()?;
        let _trip = cell.as_ref().map(|cell| cell.lock());
        if let Some(trip_id) = trip_id {
            self.ensure_listed(trip_id)?;
        }
        let driver = self.driver_row(driver_id)?;
        let mut data = driver.lock();
        let entry = self.ledger.post(driver_id, trip_id, amount, entry_type)?;
        data.apply_wallet_delta(entry.signed_amount());
        Ok(entry)
    }

    /// The driver's balance computed from the ledger.
    pub fn wallet_balance(&self, driver_id: DriverId) -> Result<Decimal, TripError> {
        let driver = self.driver_row(driver_id)?;
        let _guard = driver.lock();
        Ok(self.ledger.balance(driver_id))
    }

    /// Recomputes the cached balance from the ledger and returns the drift
    /// that was corrected (zero when the cache was right).
    pub fn reconcile_wallet(&self, driver_id: DriverId) -> Result<Decimal, TripError> {
        let driver = self.driver_row(driver_id)?;
        let mut data = driver.lock();
        let drift = data.reset_wallet_balance(self.ledger.balance(driver_id));
        if !drift.is_zero() {
            tracing::warn!(
                driver = %driver_id,
                drift = %drift,
                balance = %data.wallet_balance(),
                "wallet cache drifted from ledger"
            );
        }
        Ok(drift)
    }

    // === Requests ===

    /// A driver offers to take an open trip.
    ///
    /// # Errors
    ///
    /// - [`TripError::InvalidStatusTransition`] - The trip is not open.
    /// - [`TripError::DuplicateRequest`] - The driver already has a live request.
    pub fn create_request(
        &self,
        trip_id: TripId,
        driver_id: DriverId,
    ) -> Result<TripDriverRequest, TripError> {
        let cell = self.trip_cell(trip_id)?;
        self.driver_row(driver_id)?;

        let trip = cell.lock();
        if trip.status != TripStatus::Open {
            return Err(TripError::InvalidStatusTransition {
                from: trip.status,
                to: TripStatus::Assigned,
            });
        }
        let request = self.requests.push(trip_id, driver_id)?;
        tracing::info!(request = %request.id, trip = %trip_id, driver = %driver_id, "trip requested");
        Ok(request)
    }

    /// Approves a pending request: assigns its driver and rejects every other
    /// pending request for the trip, all under the trip's lock.
    ///
    /// Approval is an administrator action, so the driver's availability and
    /// approval are not checked.
    ///
    /// # Errors
    ///
    /// - [`TripError::RequestNotFound`] - Unknown request.
    /// - [`TripError::InvalidRequestStatus`] - Request is not pending.
    /// - [`TripError::TripAlreadyAssigned`] - The trip already has a driver.
    pub fn approve_request(&self, request_id: RequestId) -> Result<Trip, TripError> {
        let trip_id = self
            .requests
            .trip_of(request_id)
            .ok_or(TripError::RequestNotFound)?;
        let cell = self.trip_cell(trip_id)?;
        let mut trip = cell.lock();

        let request = self
            .requests
            .get(request_id)
            .ok_or(TripError::RequestNotFound)?;
        if request.status != RequestStatus::Pending {
            return Err(TripError::InvalidRequestStatus);
        }
        if trip.assigned_driver.is_some() {
            return Err(TripError::TripAlreadyAssigned);
        }

        let driver = self.driver_row(request.driver)?;
        self.attach_driver(&mut trip, &driver, AssignMode::Override)?;
        trip.is_manual_assignment = false;
        let rejected = self.requests.accept(request_id)?;

        tracing::info!(
            request = %request_id,
            trip = %trip_id,
            driver = %request.driver,
            rejected = rejected.len(),
            "request approved"
        );
        Ok(trip.clone())
    }

    /// Withdraws a pending request.
    pub fn cancel_request(&self, request_id: RequestId) -> Result<TripDriverRequest, TripError> {
        let trip_id = self
            .requests
            .trip_of(request_id)
            .ok_or(TripError::RequestNotFound)?;
        let cell = self.trip_cell(trip_id)?;
        let _trip = cell.lock();
        let request = self.requests.cancel(request_id)?;
        tracing::info!(request = %request_id, trip = %trip_id, "request cancelled");
        Ok(request)
    }

    // === Administrative overrides ===

    /// Moves a trip to `status` through the matching lifecycle operation.
    ///
    /// | Target | Operation |
    /// |--------|-----------|
    /// | Open | [`Engine::unassign`] |
    /// | Started | [`Engine::start`] with `reading` as the start reading |
    /// | Completed | [`Engine::complete`] with `reading` as the end reading |
    /// | Cancelled | [`Engine::cancel`] |
    ///
    /// `reading` is ignored for the other targets. `Assigned` needs a driver
    /// and is always rejected here.
    ///
    /// # Errors
    ///
    /// Besides the errors of the routed operation, a completion without a
    /// reading fails with [`TripError::InvalidOdometerReading`] once the
    /// transition itself is legal.
    pub fn set_status(
        &self,
        trip_id: TripId,
        status: TripStatus,
        reading: Option<u64>,
    ) -> Result<Trip, TripError> {
        match status {
            TripStatus::Open => self.unassign(trip_id),
            TripStatus::Started => self.start(trip_id, reading),
            TripStatus::Cancelled => self.cancel(trip_id, "status override"),
            TripStatus::Completed => {
                let cell = self.trip_cell(trip_id)?;
                let mut trip = cell.lock();
                trip.status.ensure_transition(TripStatus::Completed)?;
                let end = reading.ok_or(TripError::InvalidOdometerReading)?;
                self.complete_locked(&mut trip, end)?;
                Ok(trip.clone())
            }
            TripStatus::Assigned => {
                let cell = self.trip_cell(trip_id)?;
                let from = cell.lock().status;
                Err(TripError::InvalidStatusTransition {
                    from,
                    to: TripStatus::Assigned,
                })
            }
        }
    }

    /// Removes a trip that no ledger entry refers to.
    ///
    /// An unfinished trip is cancelled first so its driver is released and
    /// any caller still holding the row sees a terminal trip. The trip's
    /// requests are dropped with it. The trip leaves the map while its lock
    /// is held, so operations that post against it serialize with the
    /// ledger check.
    ///
    /// # Errors
    ///
    /// Returns [`TripError::TripHasLedgerEntries`] if the ledger refers to it.
    pub fn delete_trip(&self, trip_id: TripId) -> Result<Trip, TripError> {
        let cell = self.trip_cell(trip_id)?;
        let mut trip = cell.lock();
        self.ensure_listed(trip_id)?;
        if self.ledger.has_trip_entries(trip_id) {
            return Err(TripError::TripHasLedgerEntries);
        }
        if !trip.status.is_terminal() {
            self.cancel_locked(&mut trip, "deleted")?;
        }

        self.trips.remove(&trip_id);
        let dropped = self.requests.remove_trip(trip_id);
        tracing::info!(trip = %trip_id, dropped_requests = dropped, "trip deleted");
        Ok(trip.clone())
    }

    /// Fails if the trip was deleted. The caller holds the trip lock.
    fn ensure_listed(&self, trip_id: TripId) -> Result<(), TripError> {
        if self.trips.contains_key(&trip_id) {
            Ok(())
        } else {
            Err(TripError::TripNotFound)
        }
    }

    // === Queries ===

    /// All trips ordered by ID.
    pub fn trips(&self) -> Vec<Trip> {
        let mut trips: Vec<Trip> = self
            .trip_cells()
            .iter()
            .map(|cell| cell.lock().clone())
            .collect();
        trips.sort_by_key(|trip| trip.id);
        trips
    }

    pub fn trips_by_status(&self, status: TripStatus) -> Vec<Trip> {
        self.trips()
            .into_iter()
            .filter(|trip| trip.status == status)
            .collect()
    }

    /// Open trips without a driver.
    pub fn available_trips(&self) -> Vec<Trip> {
        self.trips()
            .into_iter()
            .filter(|trip| trip.status == TripStatus::Open && trip.assigned_driver.is_none())
            .collect()
    }

    /// Trips ever assigned to the driver, newest first.
    pub fn trips_for_driver(&self, driver_id: DriverId) -> Vec<Trip> {
        let mut trips: Vec<Trip> = self
            .trips()
            .into_iter()
            .filter(|trip| trip.assigned_driver == Some(driver_id))
            .collect();
        trips.reverse();
        trips
    }

    /// Assigned or started trips, optionally for one driver.
    pub fn active_trips(&self, driver_id: Option<DriverId>) -> Vec<Trip> {
        self.trips()
            .into_iter()
            .filter(|trip| trip.status.is_active())
            .filter(|trip| driver_id.is_none_or(|id| trip.assigned_driver == Some(id)))
            .collect()
    }

    pub fn stats(&self) -> TripStats {
        let mut stats = TripStats::default();
        for trip in self.trips() {
            stats.total += 1;
            match trip.status {
                TripStatus::Open => stats.open += 1,
                TripStatus::Assigned => stats.assigned += 1,
                TripStatus::Started => stats.started += 1,
                TripStatus::Completed => {
                    stats.completed += 1;
                    stats.total_revenue += trip.fare.unwrap_or_default();
                }
                TripStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.active = stats.assigned + stats.started;
        stats
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tariff::NewTariff;
    use crate::trip::TripType;
    use rust_decimal_macros::dec;

    fn engine_with_sedan() -> Engine {
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
        engine
    }

    #[test]
    fn attach_checks_availability_before_approval() {
        let engine = engine_with_sedan();
        engine.register_driver(DriverId(1), false).unwrap();
        let first = engine.create_trip(NewTrip::new(TripType::OneWay, "sedan"));
        let second = engine.create_trip(NewTrip::new(TripType::OneWay, "sedan"));
        engine.assign_override(first.id, DriverId(1)).unwrap();

        assert_eq!(
            engine.assign(second.id, DriverId(1)),
            Err(TripError::DriverUnavailable)
        );
    }

    #[test]
    fn failed_completion_leaves_trip_untouched() {
        let engine = Engine::new();
        engine.register_driver(DriverId(1), true).unwrap();
        let trip = engine.create_trip(NewTrip::new(TripType::OneWay, "van"));
        engine.assign(trip.id, DriverId(1)).unwrap();
        engine.record_odometer_start(trip.id, 100).unwrap();

        assert_eq!(
            engine.record_odometer_end(trip.id, 200),
            Err(TripError::TariffNotFound)
        );
        let trip = engine.get_trip(&trip.id).unwrap();
        assert_eq!(trip.status, TripStatus::Started);
        assert_eq!(trip.odometer_end, None);
        assert!(engine.ledger().is_empty());
        assert!(!engine.get_driver(&DriverId(1)).unwrap().is_available());
    }

    #[test]
    fn zero_commission_posts_nothing() {
        let engine = Engine::new();
        engine.tariffs().insert(NewTariff {
            vehicle_type: "auto".to_string(),
            one_way_per_km: dec!(10.00),
            one_way_min_km: 0,
            round_trip_per_km: dec!(10.00),
            round_trip_min_km: 0,
            driver_allowance: Decimal::ZERO,
            commission_percent: Some(Decimal::ZERO),
            is_active: true,
        });
        engine.register_driver(DriverId(1), true).unwrap();
        let trip = engine.create_trip(NewTrip::new(TripType::OneWay, "auto"));
        engine.assign(trip.id, DriverId(1)).unwrap();
        engine.record_odometer_start(trip.id, 0).unwrap();
        let done = engine.record_odometer_end(trip.id, 12).unwrap();

        assert_eq!(done.fare, Some(dec!(120.00)));
        assert_eq!(done.commission, Some(dec!(0.00)));
        assert!(engine.ledger().is_empty());
        // No ledger reference, so the trip can be removed.
        engine.delete_trip(trip.id).unwrap();
        assert!(engine.get_trip(&trip.id).is_none());
    }

    #[test]
    fn stats_count_every_status() {
        let engine = engine_with_sedan();
        engine.register_driver(DriverId(1), true).unwrap();
        engine.register_driver(DriverId(2), true).unwrap();

        engine.create_trip(NewTrip::new(TripType::OneWay, "sedan"));
        let assigned = engine.create_trip(NewTrip::new(TripType::OneWay, "sedan"));
        engine.assign(assigned.id, DriverId(1)).unwrap();
        let done = engine.create_trip(NewTrip::new(TripType::OneWay, "sedan"));
        engine.assign(done.id, DriverId(2)).unwrap();
        engine.record_odometer_start(done.id, 1000).unwrap();
        engine.record_odometer_end(done.id, 1250).unwrap();
        let cancelled = engine.create_trip(NewTrip::new(TripType::OneWay, "sedan"));
        engine.cancel(cancelled.id, "no show").unwrap();

        let stats = engine.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.assigned, 1);
        assert_eq!(stats.started, 0);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.total_revenue, dec!(3500.00));
    }
}
