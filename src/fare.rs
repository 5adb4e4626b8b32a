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

//! Fare and commission computation.
//!
//! ```text
//! billable_km = max(distance, min_km[trip_type])
//! fare        = round_half_up(billable_km * rate[trip_type], 2)
//! commission  = round_half_up(fare * commission_percent / 100, 2)
//! ```
//!
//! The driver allowance is carried in the breakdown for display and is never
//! part of the fare.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use trip_ledger::fare::{billable_km, commission_for, fare_for};
//!
//! let billable = billable_km(50, 130);
//! assert_eq!(billable, dec!(130));
//! let fare = fare_for(billable, dec!(14.00));
//! assert_eq!(fare, dec!(1820.00));
//! assert_eq!(commission_for(fare, dec!(10)), dec!(182.00));
//! ```

use crate::base::round_money;
use crate::tariff::TariffConfig;
use crate::trip::TripType;
use rust_decimal::Decimal;
use serde::Serialize;

/// Everything that went into pricing a trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FareBreakdown {
    pub distance: Decimal,
    pub min_km: Decimal,
    pub billable_km: Decimal,
    pub rate: Decimal,
    pub fare: Decimal,
    pub driver_allowance: Decimal,
    pub commission_percent: Decimal,
    pub commission: Decimal,
}

/// Distance charged for: the actual distance, floored at the tariff minimum.
pub fn billable_km(distance_km: u64, min_km: u32) -> Decimal {
    Decimal::from(distance_km.max(u64::from(min_km)))
}

pub fn fare_for(billable_km: Decimal, rate: Decimal) -> Decimal {
    round_money(billable_km * rate)
}

pub fn commission_for(fare: Decimal, commission_percent: Decimal) -> Decimal {
    round_money(fare * commission_percent / Decimal::ONE_HUNDRED)
}

/// Prices a trip of `distance_km` under `tariff`.
///
/// `default_commission_percent` applies when the tariff has no commission of
/// its own.
pub fn quote(
    tariff: &TariffConfig,
    trip_type: TripType,
    distance_km: u64,
    default_commission_percent: Decimal,
) -> FareBreakdown {
    let min_km = tariff.min_km(trip_type);
    let billable = billable_km(distance_km, min_km);
    let rate = tariff.rate(trip_type);
    let fare = fare_for(billable, rate);
    let commission_percent = tariff.commission_percent_or(default_commission_percent);

    FareBreakdown {
        distance: Decimal::from(distance_km),
        min_km: Decimal::from(min_km),
        billable_km: billable,
        rate,
        fare,
        driver_allowance: tariff.driver_allowance,
        commission_percent,
        commission: commission_for(fare, commission_percent),
    }
}
