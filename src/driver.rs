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

//! Driver records.
//!
//! A driver's availability is not a flag. It is derived from the set of trip
//! leases the driver holds: a lease is taken when the driver is attached to a
//! trip and returned when that trip completes, is cancelled, or is unassigned.
//!
//! ```text
//!  no leases ──assign──► lease(T) ──complete / cancel / unassign──► no leases
//! ```
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use trip_ledger::{Driver, DriverId};
//!
//! let driver = Driver::new(DriverId(1), true);
//! assert!(driver.is_available());
//! assert_eq!(driver.wallet_balance(), dec!(0.00));
//! ```

use crate::base::{DriverId, MONEY_SCALE, TripId};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeSet;

#[derive(Debug)]
pub(crate) struct DriverData {
    id: DriverId,
    approved: bool,
    /// Cached ledger balance. The ledger is the source of truth.
    wallet_balance: Decimal,
    /// Trips this driver is currently attached to.
    leases: BTreeSet<TripId>,
}

impl DriverData {
    fn new(id: DriverId, approved: bool) -> Self {
        Self {
            id,
            approved,
            wallet_balance: Decimal::ZERO,
            leases: BTreeSet::new(),
        }
    }

    pub(crate) fn id(&self) -> DriverId {
        self.id
    }

    pub(crate) fn is_approved(&self) -> bool {
        self.approved
    }

    pub(crate) fn is_available(&self) -> bool {
        self.leases.is_empty()
    }

    pub(crate) fn wallet_balance(&self) -> Decimal {
        self.wallet_balance
    }

    /// Attaches the driver to a trip.
    pub(crate) fn acquire_lease(&mut self, trip: TripId) {
        let inserted = self.leases.insert(trip);
        debug_assert!(
            inserted,
            "Invariant violated: driver {} already leased to trip {}",
            self.id, trip
        );
    }

    /// Detaches the driver from a trip. Returns `false` if no lease was held.
    pub(crate) fn release_lease(&mut self, trip: TripId) -> bool {
        self.leases.remove(&trip)
    }

    /// Applies a signed ledger delta to the cached balance.
    pub(crate) fn apply_wallet_delta(&mut self, delta: Decimal) {
        self.wallet_balance += delta;
    }

    /// Overwrites the cache with a recomputed balance, returning the drift.
    pub(crate) fn reset_wallet_balance(&mut self, balance: Decimal) -> Decimal {
        let drift = balance - self.wallet_balance;
        self.wallet_balance = balance;
        drift
    }
}

/// A driver as seen by the trip engine.
#[derive(Debug)]
pub struct Driver {
    inner: Mutex<DriverData>,
}

impl Driver {
    pub fn new(id: DriverId, approved: bool) -> Self {
        Self {
            inner: Mutex::new(DriverData::new(id, approved)),
        }
    }

    pub fn id(&self) -> DriverId {
        self.inner.lock().id
    }

    pub fn is_approved(&self) -> bool {
        self.inner.lock().approved
    }

    /// `true` when the driver holds no trip lease.
    pub fn is_available(&self) -> bool {
        self.inner.lock().is_available()
    }

    /// Cached wallet balance.
    pub fn wallet_balance(&self) -> Decimal {
        self.inner.lock().wallet_balance
    }

    /// Trips the driver is currently attached to, in ID order.
    pub fn leases(&self) -> Vec<TripId> {
        self.inner.lock().leases.iter().copied().collect()
    }

    pub fn set_approved(&self, approved: bool) {
        self.inner.lock().approved = approved;
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DriverData> {
        self.inner.lock()
    }
}

impl Serialize for Driver {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Driver", 5)?;
        state.serialize_field("driver", &data.id)?;
        state.serialize_field("approved", &data.approved)?;
        state.serialize_field("available", &data.is_available())?;
        state.serialize_field("active_trips", &data.leases.len())?;
        state.serialize_field("wallet_balance", &data.wallet_balance.round_dp(MONEY_SCALE))?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn availability_follows_leases() {
        let mut data = DriverData::new(DriverId(1), true);
        assert!(data.is_available());
        data.acquire_lease(TripId(10));
        assert!(!data.is_available());
        assert!(data.release_lease(TripId(10)));
        assert!(data.is_available());
    }

    #[test]
    fn releasing_unknown_lease_is_reported() {
        let mut data = DriverData::new(DriverId(1), true);
        assert!(!data.release_lease(TripId(10)));
    }

    #[test]
    fn driver_with_two_leases_stays_unavailable_until_both_released() {
        let mut data = DriverData::new(DriverId(1), true);
        data.acquire_lease(TripId(1));
        data.acquire_lease(TripId(2));
        data.release_lease(TripId(1));
        assert!(!data.is_available());
        data.release_lease(TripId(2));
        assert!(data.is_available());
    }

    #[test]
    fn wallet_delta_and_reset() {
        let mut data = DriverData::new(DriverId(1), true);
        data.apply_wallet_delta(dec!(-350.00));
        data.apply_wallet_delta(dec!(100.00));
        assert_eq!(data.wallet_balance(), dec!(-250.00));
        let drift = data.reset_wallet_balance(dec!(-200.00));
        assert_eq!(drift, dec!(50.00));
        assert_eq!(data.wallet_balance(), dec!(-200.00));
    }

    #[test]
    fn serializer_reports_derived_availability() {
        let driver = Driver::new(DriverId(42), true);
        driver.lock().acquire_lease(TripId(5));
        driver.lock().apply_wallet_delta(dec!(-182.00));

        let json = serde_json::to_value(&driver).unwrap();
        assert_eq!(json["driver"], 42);
        assert_eq!(json["approved"], true);
        assert_eq!(json["available"], false);
        assert_eq!(json["active_trips"], 1);
        assert_eq!(json["wallet_balance"], "-182.00");
    }

    #[test]
    fn approval_can_be_toggled() {
        let driver = Driver::new(DriverId(1), false);
        assert!(!driver.is_approved());
        driver.set_approved(true);
        assert!(driver.is_approved());
        assert_eq!(driver.id(), DriverId(1));
        assert!(driver.leases().is_empty());
    }
}
