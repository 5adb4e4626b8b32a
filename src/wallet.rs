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

//! Append-only driver wallet ledger.
//!
//! Entries are never updated or deleted. Corrections are new entries that
//! offset earlier ones. Amounts are always positive; the entry type carries
//! the sign:
//!
//! | Type | Effect on balance |
//! |------|-------------------|
//! | Credit | + |
//! | Refund | + |
//! | Debit | - |
//! | Commission | - |

use crate::TripError;
use crate::base::{DriverId, EntryId, TripId, round_money};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Credit,
    Debit,
    Commission,
    Refund,
}

impl EntryType {
    /// Applies this type's sign to a positive amount.
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            Self::Credit | Self::Refund => amount,
            Self::Debit | Self::Commission => -amount,
        }
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletTransaction {
    pub id: EntryId,
    pub driver: DriverId,
    pub trip: Option<TripId>,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// The entry's contribution to the driver's balance.
    pub fn signed_amount(&self) -> Decimal {
        self.entry_type.signed(self.amount)
    }
}

/// Thread-safe append-only ledger.
///
/// Keeps the global journal in posting order plus per-driver and per-trip
/// indexes. All three hold the same `Arc`s; nothing hands out a mutable
/// reference to a posted entry.
#[derive(Debug)]
pub struct WalletLedger {
    journal: RwLock<Vec<Arc<WalletTransaction>>>,
    by_driver: DashMap<DriverId, Vec<Arc<WalletTransaction>>>,
    by_trip: DashMap<TripId, Vec<Arc<WalletTransaction>>>,
    next_id: AtomicU64,
}

impl WalletLedger {
    pub fn new() -> Self {
        Self {
            journal: RwLock::new(Vec::new()),
            by_driver: DashMap::new(),
            by_trip: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Appends an entry.
    ///
    /// Callers that also keep a cached balance must hold the driver's lock
    /// across this call and the cache update.
    ///
    /// # Errors
    ///
    /// Returns [`TripError::InvalidAmount`] unless the amount is positive
    /// after rounding to cents.
    pub fn post(
        &self,
        driver: DriverId,
        trip: Option<TripId>,
        amount: Decimal,
        entry_type: EntryType,
    ) -> Result<WalletTransaction, TripError> {
        let amount = round_money(amount);
        if amount <= Decimal::ZERO {
            return Err(TripError::InvalidAmount);
        }

        let entry = Arc::new(WalletTransaction {
            id: EntryId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            driver,
            trip,
            amount,
            entry_type,
            created_at: Utc::now(),
        });

        self.journal.write().push(Arc::clone(&entry));
        self.by_driver
            .entry(driver)
            .or_default()
            .push(Arc::clone(&entry));
        if let Some(trip) = trip {
            self.by_trip.entry(trip).or_default().push(Arc::clone(&entry));
        }

        tracing::info!(
            entry = %entry.id,
            driver = %driver,
            trip = ?trip,
            amount = %amount,
            entry_type = ?entry_type,
            "wallet entry posted"
        );
        Ok((*entry).clone())
    }

    /// Signed sum of every entry for the driver. This is the true balance.
    pub fn balance(&self, driver: DriverId) -> Decimal {
        self.by_driver
            .get(&driver)
            .map(|entries| entries.iter().map(|e| e.signed_amount()).sum())
            .unwrap_or(Decimal::ZERO)
    }

    /// Signed sum of every entry linked to the trip.
    pub fn trip_net(&self, trip: TripId) -> Decimal {
        self.by_trip
            .get(&trip)
            .map(|entries| entries.iter().map(|e| e.signed_amount()).sum())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn has_trip_entries(&self, trip: TripId) -> bool {
        self.by_trip
            .get(&trip)
            .is_some_and(|entries| !entries.is_empty())
    }

    /// Entries for a driver in posting order.
    pub fn entries_for_driver(&self, driver: DriverId) -> Vec<WalletTransaction> {
        self.by_driver
            .get(&driver)
            .map(|entries| entries.iter().map(|e| (**e).clone()).collect())
            .unwrap_or_default()
    }

    /// Entries linked to a trip in posting order.
    pub fn entries_for_trip(&self, trip: TripId) -> Vec<WalletTransaction> {
        self.by_trip
            .get(&trip)
            .map(|entries| entries.iter().map(|e| (**e).clone()).collect())
            .unwrap_or_default()
    }

    /// A page of the global journal.
    pub fn entries(&self, skip: usize, limit: usize) -> Vec<WalletTransaction> {
        self.journal
            .read()
            .iter()
            .skip(skip)
            .take(limit)
            .map(|e| (**e).clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.journal.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.journal.read().is_empty()
    }
}

impl Default for WalletLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn balance_is_signed_sum() {
        let ledger = WalletLedger::new();
        let driver = DriverId(1);
        ledger.post(driver, None, dec!(500.00), EntryType::Credit).unwrap();
        ledger.post(driver, Some(TripId(1)), dec!(350.00), EntryType::Commission).unwrap();
        ledger.post(driver, None, dec!(20.00), EntryType::Refund).unwrap();
        ledger.post(driver, None, dec!(70.00), EntryType::Debit).unwrap();
        assert_eq!(ledger.balance(driver), dec!(100.00));
    }

    #[test]
    fn unknown_driver_has_zero_balance() {
        let ledger = WalletLedger::new();
        assert_eq!(ledger.balance(DriverId(9)), Decimal::ZERO);
        assert!(ledger.entries_for_driver(DriverId(9)).is_empty());
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let ledger = WalletLedger::new();
        assert_eq!(
            ledger.post(DriverId(1), None, Decimal::ZERO, EntryType::Credit),
            Err(TripError::InvalidAmount)
        );
        assert_eq!(
            ledger.post(DriverId(1), None, dec!(-5), EntryType::Debit),
            Err(TripError::InvalidAmount)
        );
        // Rounds to 0.00.
        assert_eq!(
            ledger.post(DriverId(1), None, dec!(0.004), EntryType::Credit),
            Err(TripError::InvalidAmount)
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn entries_are_indexed_by_trip() {
        let ledger = WalletLedger::new();
        ledger.post(DriverId(1), Some(TripId(7)), dec!(350.00), EntryType::Commission).unwrap();
        ledger.post(DriverId(1), Some(TripId(7)), dec!(25.00), EntryType::Debit).unwrap();
        ledger.post(DriverId(1), Some(TripId(8)), dec!(10.00), EntryType::Commission).unwrap();

        assert!(ledger.has_trip_entries(TripId(7)));
        assert!(!ledger.has_trip_entries(TripId(9)));
        assert_eq!(ledger.entries_for_trip(TripId(7)).len(), 2);
        assert_eq!(ledger.trip_net(TripId(7)), dec!(-375.00));
    }

    #[test]
    fn ids_increase_in_posting_order() {
        let ledger = WalletLedger::new();
        let first = ledger.post(DriverId(1), None, dec!(1), EntryType::Credit).unwrap();
        let second = ledger.post(DriverId(2), None, dec!(1), EntryType::Credit).unwrap();
        assert!(second.id > first.id);

        let page = ledger.entries(1, 10);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, second.id);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn entry_serializes_type_field() {
        let ledger = WalletLedger::new();
        let entry = ledger
            .post(DriverId(3), Some(TripId(4)), dec!(182.00), EntryType::Commission)
            .unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "COMMISSION");
        assert_eq!(json["amount"], "182.00");
        assert_eq!(json["driver"], 3);
        assert_eq!(json["trip"], 4);
    }

    #[test]
    fn returned_entries_are_copies() {
        let ledger = WalletLedger::new();
        ledger.post(DriverId(1), None, dec!(10.00), EntryType::Credit).unwrap();
        let mut entries = ledger.entries_for_driver(DriverId(1));
        entries[0].amount = dec!(9999);
        assert_eq!(ledger.balance(DriverId(1)), dec!(10.00));
    }
}
