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

//! Trip records.
//!
//! Trips follow a state machine:
//! - [`Open`] → [`Assigned`] (via assign or request approval)
//! - [`Assigned`] → [`Open`] (via unassign)
//! - [`Assigned`] → [`Started`] (via start / odometer start)
//! - [`Started`] → [`Completed`] (via complete / odometer end)
//! - [`Open`], [`Assigned`], [`Started`] → [`Cancelled`]
//!
//! [`Open`]: TripStatus::Open
//! [`Assigned`]: TripStatus::Assigned
//! [`Started`]: TripStatus::Started
//! [`Completed`]: TripStatus::Completed
//! [`Cancelled`]: TripStatus::Cancelled

use crate::base::{DriverId, TripId};
use crate::error::TripError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Open,
    Assigned,
    Started,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub const ALL: [TripStatus; 5] = [
        TripStatus::Open,
        TripStatus::Assigned,
        TripStatus::Started,
        TripStatus::Completed,
        TripStatus::Cancelled,
    ];

    /// Completed and cancelled trips never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// A driver is on the job (assigned or driving).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Assigned | Self::Started)
    }

    /// Whether the state machine has an edge from `self` to `to`.
    pub fn can_transition_to(self, to: TripStatus) -> bool {
        use TripStatus::*;
        matches!(
            (self, to),
            (Open, Assigned)
                | (Assigned, Open)
                | (Assigned, Started)
                | (Started, Completed)
                | (Open | Assigned | Started, Cancelled)
        )
    }

    /// Returns `Ok(())` if the edge exists, otherwise the typed error.
    pub fn ensure_transition(self, to: TripStatus) -> Result<(), TripError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(TripError::InvalidStatusTransition { from: self, to })
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "OPEN",
            Self::Assigned => "ASSIGNED",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripType {
    #[serde(alias = "One Way", alias = "one_way")]
    OneWay,
    #[serde(alias = "Round Trip", alias = "round_trip")]
    RoundTrip,
}

/// Booking details supplied when a trip is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTrip {
    pub customer_name: String,
    pub customer_phone: String,
    pub pickup_address: String,
    pub drop_address: String,
    pub trip_type: TripType,
    pub vehicle_type: String,
    #[serde(default = "default_passenger_count")]
    pub passenger_count: u32,
    #[serde(default)]
    pub planned_start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub planned_end_at: Option<DateTime<Utc>>,
}

fn default_passenger_count() -> u32 {
    1
}

impl NewTrip {
    /// Minimal booking with placeholder customer details.
    pub fn new(trip_type: TripType, vehicle_type: impl Into<String>) -> Self {
        Self {
            customer_name: String::new(),
            customer_phone: String::new(),
            pickup_address: String::new(),
            drop_address: String::new(),
            trip_type,
            vehicle_type: vehicle_type.into(),
            passenger_count: default_passenger_count(),
            planned_start_at: None,
            planned_end_at: None,
        }
    }
}

/// Snapshot of a trip.
///
/// Trips are only mutated by the engine; callers receive clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trip {
    pub id: TripId,
    pub status: TripStatus,
    pub trip_type: TripType,
    pub vehicle_type: String,
    pub assigned_driver: Option<DriverId>,
    pub is_manual_assignment: bool,
    pub odometer_start: Option<u64>,
    pub odometer_end: Option<u64>,
    pub distance: Option<Decimal>,
    pub fare: Option<Decimal>,
    /// Commission currently settled on the ledger for this trip.
    pub commission: Option<Decimal>,
    pub customer_name: String,
    pub customer_phone: String,
    pub pickup_address: String,
    pub drop_address: String,
    pub passenger_count: u32,
    pub planned_start_at: Option<DateTime<Utc>>,
    pub planned_end_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    pub(crate) fn open(id: TripId, booking: NewTrip, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: TripStatus::Open,
            trip_type: booking.trip_type,
            vehicle_type: booking.vehicle_type,
            assigned_driver: None,
            is_manual_assignment: false,
            odometer_start: None,
            odometer_end: None,
            distance: None,
            fare: None,
            commission: None,
            customer_name: booking.customer_name,
            customer_phone: booking.customer_phone,
            pickup_address: booking.pickup_address,
            drop_address: booking.drop_address,
            passenger_count: booking.passenger_count,
            planned_start_at: booking.planned_start_at,
            planned_end_at: booking.planned_end_at,
            started_at: None,
            ended_at: None,
            cancel_reason: None,
            created_at: now,
        }
    }

    fn assert_invariants(&self) {
        if let (Some(start), Some(end)) = (self.odometer_start, self.odometer_end) {
            debug_assert!(
                end >= start,
                "Invariant violated: odometer went backwards on trip {}: {} -> {}",
                self.id,
                start,
                end
            );
        }
        debug_assert!(
            self.fare.is_none() || self.status == TripStatus::Completed,
            "Invariant violated: trip {} has a fare while {}",
            self.id,
            self.status
        );
        debug_assert!(
            !self.status.is_active() || self.assigned_driver.is_some(),
            "Invariant violated: trip {} is {} without a driver",
            self.id,
            self.status
        );
    }

    /// Moves the trip to `to`, checking the state machine.
    pub(crate) fn transition(&mut self, to: TripStatus) -> Result<(), TripError> {
        self.status.ensure_transition(to)?;
        self.status = to;
        self.assert_invariants();
        Ok(())
    }

    /// Distance driven, if both readings are recorded.
    pub fn odometer_distance(&self) -> Option<u64> {
        match (self.odometer_start, self.odometer_end) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}
