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

//! Tariff catalog.
//!
//! Holds the pricing rows for each vehicle type. The engine only ever reads
//! the single active row for a vehicle type at the moment it prices a trip.

use crate::TripError;
use crate::base::TariffId;
use crate::trip::TripType;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Pricing for one vehicle type, as supplied by the tariff admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTariff {
    pub vehicle_type: String,
    pub one_way_per_km: Decimal,
    pub one_way_min_km: u32,
    pub round_trip_per_km: Decimal,
    pub round_trip_min_km: u32,
    pub driver_allowance: Decimal,
    #[serde(default)]
    pub commission_percent: Option<Decimal>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// A stored tariff row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TariffConfig {
    pub id: TariffId,
    pub vehicle_type: String,
    pub one_way_per_km: Decimal,
    pub one_way_min_km: u32,
    pub round_trip_per_km: Decimal,
    pub round_trip_min_km: u32,
    /// Shown to drivers; never added to the fare.
    pub driver_allowance: Decimal,
    pub commission_percent: Option<Decimal>,
    pub is_active: bool,
}

impl TariffConfig {
    pub fn min_km(&self, trip_type: TripType) -> u32 {
        match trip_type {
            TripType::OneWay => self.one_way_min_km,
            TripType::RoundTrip => self.round_trip_min_km,
        }
    }

    pub fn rate(&self, trip_type: TripType) -> Decimal {
        match trip_type {
            TripType::OneWay => self.one_way_per_km,
            TripType::RoundTrip => self.round_trip_per_km,
        }
    }

    /// Commission percent, or `default` when the row leaves it unset.
    pub fn commission_percent_or(&self, default: Decimal) -> Decimal {
        self.commission_percent.unwrap_or(default)
    }
}

fn vehicle_key(vehicle_type: &str) -> String {
    vehicle_type.trim().to_ascii_lowercase()
}

/// Concurrent tariff store indexed by vehicle type.
///
/// Vehicle types are matched case-insensitively ("Sedan" and "sedan" are the
/// same key).
#[derive(Debug)]
pub struct TariffCatalog {
    tariffs: DashMap<String, Vec<TariffConfig>>,
    next_id: AtomicU32,
}

impl TariffCatalog {
    pub fn new() -> Self {
        Self {
            tariffs: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Stores a new tariff row and returns it with its assigned ID.
    pub fn insert(&self, tariff: NewTariff) -> TariffConfig {
        let id = TariffId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let config = TariffConfig {
            id,
            vehicle_type: tariff.vehicle_type,
            one_way_per_km: tariff.one_way_per_km,
            one_way_min_km: tariff.one_way_min_km,
            round_trip_per_km: tariff.round_trip_per_km,
            round_trip_min_km: tariff.round_trip_min_km,
            driver_allowance: tariff.driver_allowance,
            commission_percent: tariff.commission_percent,
            is_active: tariff.is_active,
        };
        self.tariffs
            .entry(vehicle_key(&config.vehicle_type))
            .or_default()
            .push(config.clone());
        tracing::info!(tariff = %id, vehicle_type = %config.vehicle_type, "tariff registered");
        config
    }

    /// Turns a tariff row on or off.
    ///
    /// # Errors
    ///
    /// Returns [`TripError::TariffNotFound`] if no row has the given ID.
    pub fn set_active(&self, id: TariffId, active: bool) -> Result<(), TripError> {
        for mut rows in self.tariffs.iter_mut() {
            if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
                row.is_active = active;
                return Ok(());
            }
        }
        Err(TripError::TariffNotFound)
    }

    /// Returns the tariff row with the given ID.
    pub fn get(&self, id: TariffId) -> Option<TariffConfig> {
        self.tariffs
            .iter()
            .find_map(|rows| rows.iter().find(|row| row.id == id).cloned())
    }

    /// Returns the active tariff for a vehicle type.
    ///
    /// When several rows are active the one with the highest ID (the most
    /// recently registered) wins and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns [`TripError::TariffNotFound`] if no active row exists.
    pub fn active(&self, vehicle_type: &str) -> Result<TariffConfig, TripError> {
        let rows = self
            .tariffs
            .get(&vehicle_key(vehicle_type))
            .ok_or(TripError::TariffNotFound)?;

        let active_count = rows.iter().filter(|row| row.is_active).count();
        if active_count > 1 {
            tracing::warn!(
                vehicle_type,
                active_count,
                "multiple active tariffs, using the most recent"
            );
        }

        rows.iter()
            .filter(|row| row.is_active)
            .max_by_key(|row| row.id)
            .cloned()
            .ok_or(TripError::TariffNotFound)
    }

    /// Returns every stored row, ordered by ID.
    pub fn all(&self) -> Vec<TariffConfig> {
        let mut rows: Vec<TariffConfig> = self
            .tariffs
            .iter()
            .flat_map(|rows| rows.value().clone())
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }
}

impl Default for TariffCatalog {
    fn default() -> Self {
        Self::new()
    }
}
