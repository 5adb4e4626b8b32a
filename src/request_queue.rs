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

//! Thread-safe queue of driver requests for open trips.
//!
//! Requests follow a state machine:
//! - [`Pending`] → [`Accepted`] (approval)
//! - [`Pending`] → [`Rejected`] (a sibling request was approved)
//! - [`Pending`] → [`Cancelled`] (withdrawn by the driver)
//!
//! The queue does not know about trip status. The engine holds the trip's
//! lock around every mutating call so request changes and trip changes
//! commit together.
//!
//! [`Pending`]: RequestStatus::Pending
//! [`Accepted`]: RequestStatus::Accepted
//! [`Rejected`]: RequestStatus::Rejected
//! [`Cancelled`]: RequestStatus::Cancelled

use crate::TripError;
use crate::base::{DriverId, RequestId, TripId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    /// Pending and accepted requests block a new request for the same pair.
    fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}

/// A driver's offer to take an open trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TripDriverRequest {
    pub id: RequestId,
    pub trip: TripId,
    pub driver: DriverId,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Requests grouped by trip, with an ID index for direct lookup.
#[derive(Debug)]
pub struct TripRequestQueue {
    /// Requests per trip, in creation order.
    requests: DashMap<TripId, Vec<TripDriverRequest>>,
    /// Request ID to owning trip.
    index: DashMap<RequestId, TripId>,
    next_id: AtomicU64,
}

impl TripRequestQueue {
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
            index: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`TripError::DuplicateRequest`] if the driver already has a
    /// pending or accepted request for the trip.
    pub(crate) fn push(
        &self,
        trip: TripId,
        driver: DriverId,
    ) -> Result<TripDriverRequest, TripError> {
        // The entry guard makes the duplicate check and the insert atomic.
        let mut requests = self.requests.entry(trip).or_default();
        if requests
            .iter()
            .any(|r| r.driver == driver && r.status.is_live())
        {
            return Err(TripError::DuplicateRequest);
        }

        let now = Utc::now();
        let request = TripDriverRequest {
            id: RequestId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            trip,
            driver,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        requests.push(request.clone());
        self.index.insert(request.id, trip);
        Ok(request)
    }

    /// Marks a pending request accepted and rejects its pending siblings.
    ///
    /// Returns the IDs of the rejected siblings.
    pub(crate) fn accept(&self, id: RequestId) -> Result<Vec<RequestId>, TripError> {
        let trip = self.trip_of(id).ok_or(TripError::RequestNotFound)?;
        let mut requests = self
            .requests
            .get_mut(&trip)
            .ok_or(TripError::RequestNotFound)?;

        let target = requests
            .iter()
            .position(|r| r.id == id)
            .ok_or(TripError::RequestNotFound)?;
        if requests[target].status != RequestStatus::Pending {
            return Err(TripError::InvalidRequestStatus);
        }

        let now = Utc::now();
        let mut rejected = Vec::new();
        for request in requests.iter_mut() {
            if request.id == id {
                request.status = RequestStatus::Accepted;
                request.updated_at = now;
            } else if request.status == RequestStatus::Pending {
                request.status = RequestStatus::Rejected;
                request.updated_at = now;
                rejected.push(request.id);
            }
        }
        debug_assert!(
            requests
                .iter()
                .filter(|r| r.status == RequestStatus::Accepted)
                .count()
                == 1,
            "Invariant violated: trip {} has more than one accepted request",
            trip
        );
        Ok(rejected)
    }

    /// Withdraws a pending request.
    ///
    /// # Errors
    ///
    /// - [`TripError::RequestNotFound`] - Unknown request ID.
    /// - [`TripError::InvalidRequestStatus`] - Request is no longer pending.
    pub(crate) fn cancel(&self, id: RequestId) -> Result<TripDriverRequest, TripError> {
        let trip = self.trip_of(id).ok_or(TripError::RequestNotFound)?;
        let mut requests = self
            .requests
            .get_mut(&trip)
            .ok_or(TripError::RequestNotFound)?;
        let request = requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(TripError::RequestNotFound)?;

        if request.status != RequestStatus::Pending {
            return Err(TripError::InvalidRequestStatus);
        }
        request.status = RequestStatus::Cancelled;
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    /// Cancels the trip's accepted request once its driver has been released.
    ///
    /// Returns the request that was cancelled, if any.
    pub(crate) fn release_accepted(&self, trip: TripId) -> Option<RequestId> {
        let mut requests = self.requests.get_mut(&trip)?;
        let request = requests
            .iter_mut()
            .find(|r| r.status == RequestStatus::Accepted)?;
        request.status = RequestStatus::Cancelled;
        request.updated_at = Utc::now();
        Some(request.id)
    }

    /// Rejects every pending request for a trip that can no longer be taken.
    pub(crate) fn reject_pending(&self, trip: TripId) -> Vec<RequestId> {
        let Some(mut requests) = self.requests.get_mut(&trip) else {
            return Vec::new();
        };
        let now = Utc::now();
        requests
            .iter_mut()
            .filter(|r| r.status == RequestStatus::Pending)
            .map(|r| {
                r.status = RequestStatus::Rejected;
                r.updated_at = now;
                r.id
            })
            .collect()
    }

    /// Drops every request for a trip. Used when a trip is deleted.
    pub(crate) fn remove_trip(&self, trip: TripId) -> usize {
        match self.requests.remove(&trip) {
            Some((_, requests)) => {
                for request in &requests {
                    self.index.remove(&request.id);
                }
                requests.len()
            }
            None => 0,
        }
    }

    /// Trip the request belongs to.
    pub fn trip_of(&self, id: RequestId) -> Option<TripId> {
        self.index.get(&id).map(|trip| *trip)
    }

    pub fn get(&self, id: RequestId) -> Option<TripDriverRequest> {
        let trip = self.trip_of(id)?;
        self.requests
            .get(&trip)?
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Requests for a trip in creation order.
    pub fn for_trip(&self, trip: TripId) -> Vec<TripDriverRequest> {
        self.requests
            .get(&trip)
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Requests made by a driver, ordered by request ID.
    pub fn for_driver(&self, driver: DriverId) -> Vec<TripDriverRequest> {
        let mut found: Vec<TripDriverRequest> = self
            .requests
            .iter()
            .flat_map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.driver == driver)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        found.sort_by_key(|r| r.id);
        found
    }

    /// Most recent request by the driver for the trip.
    pub fn find(&self, trip: TripId, driver: DriverId) -> Option<TripDriverRequest> {
        self.requests
            .get(&trip)?
            .iter()
            .rev()
            .find(|r| r.driver == driver)
            .cloned()
    }
}

impl Default for TripRequestQueue {
    fn default() -> Self {
        Self::new()
    }
}
