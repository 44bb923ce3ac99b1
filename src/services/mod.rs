// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod assignment;
pub mod geofence;
pub mod notify;
pub mod publisher;
pub mod retry;
pub mod sampling;
pub mod signals;
pub mod subscribers;
pub mod sweeper;
pub mod sync_queue;

pub use assignment::{priority_score, AssignmentManager, RankedCandidate};
pub use geofence::GeofenceMonitor;
pub use notify::{LogNotifier, NotificationKind, Notifier, RecordingNotifier, WebhookNotifier};
pub use publisher::{LocationPublisher, LocationSource};
pub use retry::RetryPolicy;
pub use sampling::{AdaptiveSamplingController, SamplingConfig};
pub use signals::{ReportedSignals, SignalProvider};
pub use subscribers::{Subscribers, Subscription};
pub use sweeper::ExpirationSweeper;
pub use sync_queue::{MutationSyncQueue, SubmitOutcome, SyncQueueOptions};
