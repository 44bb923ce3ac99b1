// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Orders, candidates and assignment offers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::geo_utils::Coordinates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Expired,
    Rejected,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Expired => "expired",
            OfferStatus::Rejected => "rejected",
        }
    }

    /// Pending or accepted offers keep an order occupied.
    pub fn is_active(&self) -> bool {
        matches!(self, OfferStatus::Pending | OfferStatus::Accepted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    AwaitingAssignment,
    Assigned,
    /// Terminal: every candidate was tried.
    NoCandidateAccepted,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::AwaitingAssignment => "awaiting_assignment",
            OrderStatus::Assigned => "assigned",
            OrderStatus::NoCandidateAccepted => "no_candidate_accepted",
        }
    }
}

/// An offer of one order to one candidate.
///
/// `expires_at` is always later than `offered_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentOffer {
    pub id: String,
    pub order_id: String,
    pub candidate_id: String,
    pub status: OfferStatus,
    #[serde(with = "crate::time_utils::rfc3339_millis")]
    pub offered_at: DateTime<Utc>,
    #[serde(with = "crate::time_utils::rfc3339_millis")]
    pub expires_at: DateTime<Utc>,
    #[serde(
        default,
        with = "crate::time_utils::rfc3339_millis_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub responded_at: Option<DateTime<Utc>>,
}

impl AssignmentOffer {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == OfferStatus::Pending && self.expires_at < now
    }
}

/// An order awaiting (or holding) a courier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropoff: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_candidate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unassignable_reason: Option<String>,
    #[serde(with = "crate::time_utils::rfc3339_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::time_utils::rfc3339_millis")]
    pub updated_at: DateTime<Utc>,
}

/// A courier that may receive an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Candidate {
    #[validate(length(min = 1))]
    pub id: String,
    /// Where the candidate is. Falls back to the latest fresh tracked fix.
    #[serde(default)]
    #[validate(nested)]
    pub location: Option<Coordinates>,
    /// Average rating on a 0 to 5 scale.
    #[serde(default)]
    #[validate(range(min = 0.0, max = 5.0))]
    pub rating: f64,
    #[serde(default)]
    pub active_orders: u32,
}

/// Ranked candidate list entry for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCandidate {
    pub id: String,
    pub order_id: String,
    pub candidate_id: String,
    pub rank: u32,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}

impl OrderCandidate {
    pub fn row_id(order_id: &str, candidate_id: &str) -> String {
        format!("{order_id}_{candidate_id}")
    }
}

/// Append-only offer transition record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferHistoryEntry {
    pub id: String,
    pub offer_id: String,
    pub order_id: String,
    pub candidate_id: String,
    pub from_status: OfferStatus,
    pub to_status: OfferStatus,
    pub reason: String,
    #[serde(with = "crate::time_utils::rfc3339_millis")]
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    OfferCreated,
    AssignmentExpired,
    AssignmentRejected,
    AssignmentAccepted,
    NoCandidateAccepted,
    Reconciled,
}

/// Append-only order timeline record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHistoryEntry {
    pub id: String,
    pub order_id: String,
    pub event: OrderEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(with = "crate::time_utils::rfc3339_millis")]
    pub recorded_at: DateTime<Utc>,
}

/// Result of trying to move an order forward.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CascadeOutcome {
    /// The order still has a pending or accepted offer.
    AlreadyActive,
    Offered { offer: AssignmentOffer },
    /// Every candidate was tried; the order is now terminal.
    NoCandidateAvailable,
    /// The order was already terminal.
    AlreadyTerminal,
}

/// A per-item failure inside a sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    pub item: String,
    pub stage: &'static str,
    pub error: String,
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepSummary {
    pub expired: usize,
    pub reoffered: usize,
    pub unassignable: usize,
    pub reconciled: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepSummary {
    pub fn is_noop(&self) -> bool {
        self.expired == 0
            && self.reoffered == 0
            && self.unassignable == 0
            && self.reconciled == 0
            && self.failures.is_empty()
    }
}
