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

//! # Trip Ledger
//!
//! This library runs the lifecycle of cab trips (open, assigned, started,
//! completed, cancelled) and settles the platform commission for completed
//! trips on an append-only driver wallet ledger.
//!
//! ## Core Components
//!
//! - [`Engine`]: Central coordinator owning trips, drivers, tariffs, requests, and the ledger
//! - [`Trip`] / [`TripStatus`]: Trip record and its forward-only state machine
//! - [`TariffCatalog`]: Per-vehicle-type pricing rows
//! - [`fare`]: Fare and commission arithmetic
//! - [`WalletLedger`]: Append-only wallet entries; the source of truth for balances
//! - [`TripRequestQueue`]: Driver requests for open trips
//! - [`TripError`]: Error types for lifecycle and settlement failures
//!
//! ## Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use trip_ledger::{DriverId, Engine, NewTariff, NewTrip, TripStatus, TripType};
//!
//! let engine = Engine::new();
//! engine.tariffs().insert(NewTariff {
//!     vehicle_type: "sedan".to_string(),
//!     one_way_per_km: dec!(14.00),
//!     one_way_min_km: 130,
//!     round_trip_per_km: dec!(12.00),
//!     round_trip_min_km: 250,
//!     driver_allowance: dec!(300.00),
//!     commission_percent: Some(dec!(10)),
//!     is_active: true,
//! });
//! engine.register_driver(DriverId(7), true).unwrap();
//!
//! let trip = engine.create_trip(NewTrip::new(TripType::OneWay, "sedan"));
//! engine.assign(trip.id, DriverId(7)).unwrap();
//! engine.record_odometer_start(trip.id, 10_000).unwrap();
//! let trip = engine.record_odometer_end(trip.id, 10_250).unwrap();
//!
//! assert_eq!(trip.status, TripStatus::Completed);
//! assert_eq!(trip.fare, Some(dec!(3500.00)));
//! assert_eq!(engine.wallet_balance(DriverId(7)).unwrap(), dec!(-350.00));
//! ```
//!
//! ## Thread Safety
//!
//! All engine operations take `&self`. Operations on the same trip
//! serialize on that trip's lock; operations on different trips run in
//! parallel.

mod base;
pub mod config;
pub mod driver;
mod engine;
pub mod error;
pub mod fare;
pub mod request_queue;
pub mod tariff;
pub mod trip;
pub mod wallet;

pub use base::{DriverId, EntryId, MONEY_SCALE, RequestId, TariffId, TripId, round_money};
pub use config::{ConfigError, EngineConfig};
pub use driver::Driver;
pub use engine::{Engine, TripStats};
pub use error::TripError;
pub use fare::FareBreakdown;
pub use request_queue::{RequestStatus, TripDriverRequest, TripRequestQueue};
pub use tariff::{NewTariff, TariffCatalog, TariffConfig};
pub use trip::{NewTrip, Trip, TripStatus, TripType};
pub use wallet::{EntryType, WalletLedger, WalletTransaction};
