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

//! Error types for trip lifecycle and settlement operations.
//!
//! Every variant is a recoverable, caller-visible business error. The enum
//! serializes as a tagged object (`{"kind": "AlreadyAssigned"}`) so an HTTP
//! layer can forward it without inventing its own error schema.

use crate::trip::TripStatus;
use serde::Serialize;
use thiserror::Error;

/// Trip lifecycle and ledger errors.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum TripError {
    /// The requested transition is not legal from the trip's current status
    #[error("cannot move trip from {from} to {to}")]
    InvalidStatusTransition { from: TripStatus, to: TripStatus },

    /// A driver is already attached to the trip
    #[error("trip already has an assigned driver")]
    AlreadyAssigned,

    /// A request was approved for a trip that already has a driver
    #[error("trip already assigned")]
    TripAlreadyAssigned,

    /// Driver currently holds a lease on another trip
    #[error("driver is not available")]
    DriverUnavailable,

    /// Driver has not been approved by an administrator
    #[error("driver is not approved")]
    DriverNotApproved,

    /// Odometer end is below start, or no start reading was recorded
    #[error("invalid odometer reading")]
    InvalidOdometerReading,

    /// No active tariff exists for the trip's vehicle type
    #[error("no active tariff for vehicle type")]
    TariffNotFound,

    /// The driver already has a pending or accepted request for this trip
    #[error("request already exists")]
    DuplicateRequest,

    /// Fare recalculation needs a settled fare and both odometer readings
    #[error("trip has no settled fare to recalculate")]
    InsufficientContext,

    /// Referenced trip does not exist
    #[error("trip not found")]
    TripNotFound,

    /// Referenced driver does not exist
    #[error("driver not found")]
    DriverNotFound,

    /// Driver ID is already registered
    #[error("driver already exists")]
    DuplicateDriver,

    /// Referenced trip request does not exist
    #[error("request not found")]
    RequestNotFound,

    /// Unassign was attempted on a trip without a driver
    #[error("no driver assigned to this trip")]
    NoDriverAssigned,

    /// Request is no longer pending
    #[error("request is not pending")]
    InvalidRequestStatus,

    /// Ledger amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Trip is referenced by ledger entries and cannot be removed
    #[error("trip is referenced by wallet entries")]
    TripHasLedgerEntries,
}

impl TripError {
    /// Stable numeric code for the error.
    ///
    /// Codes are grouped by area: 1xxx driver, 2xxx tariff, 3xxx trip and
    /// request, 4xxx wallet.
    pub fn code(&self) -> u16 {
        match self {
            Self::DriverNotFound => 1001,
            Self::DuplicateDriver => 1002,
            Self::DriverNotApproved => 1003,
            Self::DriverUnavailable => 1004,
            Self::TariffNotFound => 2004,
            Self::TripNotFound => 3001,
            Self::AlreadyAssigned | Self::TripAlreadyAssigned => 3002,
            Self::InvalidStatusTransition { .. } => 3005,
            Self::InvalidOdometerReading => 3006,
            Self::NoDriverAssigned => 3007,
            Self::RequestNotFound => 3101,
            Self::DuplicateRequest => 3102,
            Self::InvalidRequestStatus => 3103,
            Self::InvalidAmount => 4004,
            Self::InsufficientContext => 4005,
            Self::TripHasLedgerEntries => 4006,
        }
    }

    /// Returns `true` when the error means a referenced entity is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TripNotFound | Self::DriverNotFound | Self::RequestNotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::TripError;
    use crate::trip::TripStatus;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            TripError::InvalidStatusTransition {
                from: TripStatus::Completed,
                to: TripStatus::Cancelled,
            }
            .to_string(),
            "cannot move trip from COMPLETED to CANCELLED"
        );
        assert_eq!(
            TripError::AlreadyAssigned.to_string(),
            "trip already has an assigned driver"
        );
        assert_eq!(TripError::TripAlreadyAssigned.to_string(), "trip already assigned");
        assert_eq!(TripError::DriverUnavailable.to_string(), "driver is not available");
        assert_eq!(TripError::DriverNotApproved.to_string(), "driver is not approved");
        assert_eq!(
            TripError::InvalidOdometerReading.to_string(),
            "invalid odometer reading"
        );
        assert_eq!(
            TripError::TariffNotFound.to_string(),
            "no active tariff for vehicle type"
        );
        assert_eq!(TripError::DuplicateRequest.to_string(), "request already exists");
        assert_eq!(
            TripError::InsufficientContext.to_string(),
            "trip has no settled fare to recalculate"
        );
        assert_eq!(TripError::InvalidAmount.to_string(), "invalid amount (must be positive)");
    }

    #[test]
    fn errors_serialize_as_tagged_kinds() {
        let json = serde_json::to_value(TripError::DuplicateRequest).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "DuplicateRequest" }));

        let json = serde_json::to_value(TripError::InvalidStatusTransition {
            from: TripStatus::Open,
            to: TripStatus::Started,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "InvalidStatusTransition",
                "from": "OPEN",
                "to": "STARTED",
            })
        );
    }

    #[test]
    fn codes_are_grouped_by_area() {
        assert_eq!(TripError::DriverNotApproved.code(), 1003);
        assert_eq!(TripError::AlreadyAssigned.code(), 3002);
        assert_eq!(TripError::TripAlreadyAssigned.code(), 3002);
        assert_eq!(TripError::InvalidOdometerReading.code(), 3006);
        assert_eq!(TripError::InsufficientContext.code(), 4005);
    }

    #[test]
    fn not_found_classification() {
        assert!(TripError::TripNotFound.is_not_found());
        assert!(TripError::RequestNotFound.is_not_found());
        assert!(!TripError::TariffNotFound.is_not_found());
    }

    #[test]
    fn errors_are_cloneable() {
        let error = TripError::DriverUnavailable;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
