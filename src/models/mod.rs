// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod assignment;
pub mod geofence;
pub mod location;
pub mod signals;
pub mod sync;

pub use assignment::{
    AssignmentOffer, Candidate, CascadeOutcome, OfferHistoryEntry, OfferStatus, Order,
    OrderCandidate, OrderEvent, OrderHistoryEntry, OrderStatus, SweepFailure, SweepSummary,
};
pub use geofence::{GeofenceError, GeofenceEvent, GeofenceEventKind, GeofenceRegion, RegionMembership};
pub use location::{
    AccuracyTier, EnrichedUpdate, FixSource, Freshness, LocationFix, LocationSample, NetworkType,
    PollPlan, TrackingProfile,
};
pub use signals::{BatteryState, NetworkQuality, NetworkState, SignalReadings};
pub use sync::{
    DroppedOperation, FlushMode, FlushReport, FlushSkipped, SyncOperation, SyncStats, SyncStatus,
};
