// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Assignment offer lifecycle.
//!
//! Each order walks its ranked candidate list one offer at a time:
//!
//! ```text
//! pending -> accepted | expired | rejected
//! ```
//!
//! An expired or rejected offer cascades to the best candidate not yet
//! offered. When none is left the order becomes `no_candidate_accepted`.
//! All state changes on an order are serialized by a per-order lock, and
//! every status write is conditional on the status it expects, so a change
//! that lost a race affects zero rows and is skipped.
//!
//! Offer and order rows are written directly so reads see them at once.
//! History rows are append-only and go through the sync queue.
//!
//! With a geofence monitor attached, a dispatched order gets a pickup zone
//! and, when a drop-off is known, a delivery zone. Both are removed once the
//! order becomes terminal.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use validator::Validate;

use crate::db::{self, collections, to_row, Filter, OpType, Storage};
use crate::error::{AppError, Result};
use crate::geo_utils::{haversine_distance_m, Coordinates};
use crate::models::{
    AssignmentOffer, Candidate, CascadeOutcome, GeofenceRegion, OfferHistoryEntry, OfferStatus,
    Order, OrderCandidate, OrderEvent, OrderHistoryEntry, OrderStatus,
};
use crate::services::geofence::GeofenceMonitor;
use crate::services::notify::{NotificationKind, Notifier};
use crate::services::publisher::LocationPublisher;
use crate::services::sync_queue::MutationSyncQueue;
use crate::time_utils::{format_utc_rfc3339, Clock};

/// Per-order mutex to serialize transitions.
pub type OrderLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

const DISTANCE_WEIGHT: f64 = 0.5;
const RATING_WEIGHT: f64 = 0.3;
const LOAD_WEIGHT: f64 = 0.2;

pub const PICKUP_ZONE_RADIUS_M: f64 = 100.0;
pub const DELIVERY_ZONE_RADIUS_M: f64 = 50.0;

/// Which end of a delivery an order zone marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneType {
    Pickup,
    Delivery,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::Pickup => "pickup",
            ZoneType::Delivery => "delivery",
        }
    }

    pub fn radius_m(&self) -> f64 {
        match self {
            ZoneType::Pickup => PICKUP_ZONE_RADIUS_M,
            ZoneType::Delivery => DELIVERY_ZONE_RADIUS_M,
        }
    }

    /// Region id, `order-{order_id}-{zone}`.
    pub fn region_id(&self, order_id: &str) -> String {
        format!("order-{order_id}-{}", self.as_str())
    }
}

/// Ranking score in `0.0..=1.0`; higher is better.
///
/// Candidates with an unknown distance get no distance credit.
pub fn priority_score(distance_m: Option<f64>, rating: f64, active_orders: u32) -> f64 {
    let distance_score = distance_m.map_or(0.0, |m| 1.0 / (1.0 + m / 1000.0));
    let rating_score = (rating / 5.0).clamp(0.0, 1.0);
    let load_score = 1.0 / (1.0 + f64::from(active_orders));
    DISTANCE_WEIGHT * distance_score + RATING_WEIGHT * rating_score + LOAD_WEIGHT * load_score
}

/// A candidate with its score, best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub candidate_id: String,
    pub score: f64,
    pub distance_m: Option<f64>,
}

/// Result of a rejection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectResult {
    pub offer: AssignmentOffer,
    pub next: CascadeOutcome,
}

/// Result of force-expiring an order's offers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForceExpireResult {
    pub expired: usize,
    pub next: CascadeOutcome,
}

/// What reconciliation did to an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Reconciliation {
    /// `assigned` without an accepted offer: reopened and cascaded.
    Reopened { next: CascadeOutcome },
    /// `awaiting_assignment` with an accepted offer: marked assigned.
    MarkedAssigned { candidate_id: String },
    /// `awaiting_assignment` with no live offer: cascaded.
    Cascaded { next: CascadeOutcome },
}

pub struct AssignmentManager {
    store: Arc<dyn Storage>,
    history: Arc<MutationSyncQueue>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    publisher: Option<Arc<LocationPublisher>>,
    geofences: Option<Arc<GeofenceMonitor>>,
    offer_ttl: Duration,
    order_locks: OrderLocks,
}

impl AssignmentManager {
    pub fn new(
        store: Arc<dyn Storage>,
        history: Arc<MutationSyncQueue>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        offer_ttl: Duration,
    ) -> Self {
        Self {
            store,
            history,
            notifier,
            clock,
            publisher: None,
            geofences: None,
            offer_ttl,
            order_locks: Arc::new(DashMap::new()),
        }
    }

    /// Use tracked locations for candidates that do not report their own.
    pub fn with_publisher(mut self, publisher: Arc<LocationPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Register pickup and delivery zones for dispatched orders.
    pub fn with_geofences(mut self, geofences: Arc<GeofenceMonitor>) -> Self {
        self.geofences = Some(geofences);
        self
    }

    pub fn offer_ttl(&self) -> Duration {
        self.offer_ttl
    }

    fn order_lock(&self, order_id: &str) -> Arc<Mutex<()>> {
        self.order_locks
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop a terminal order's lock unless someone else is waiting on it.
    /// The map holds one reference and the caller another.
    fn release_order_lock(&self, order_id: &str) {
        self.order_locks
            .remove_if(order_id, |_, lock| Arc::strong_count(lock) <= 2);
    }

    /// Orders that currently have a lock entry.
    pub fn active_order_locks(&self) -> usize {
        self.order_locks.len()
    }

    // ─── Ranking ──────────────────────────────────────────────────

    /// Score and sort candidates, best first; ties break on candidate id.
    pub fn rank_candidates(
        &self,
        pickup: Option<Coordinates>,
        candidates: &[Candidate],
    ) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = candidates
            .iter()
            .map(|candidate| {
                let location = candidate.location.or_else(|| {
                    self.publisher
                        .as_ref()
                        .and_then(|p| p.latest_fresh(&candidate.id))
                        .map(|sample| sample.coordinates())
                });
                let distance_m = pickup
                    .zip(location)
                    .map(|(a, b)| haversine_distance_m(a.point(), b.point()));
                RankedCandidate {
                    candidate_id: candidate.id.clone(),
                    score: priority_score(distance_m, candidate.rating, candidate.active_orders),
                    distance_m,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        ranked
    }

    // ─── Reads ────────────────────────────────────────────────────

    pub async fn order(&self, order_id: &str) -> Result<Order> {
        db::read_one(self.store.as_ref(), collections::ORDERS, order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))
    }

    pub async fn offer(&self, offer_id: &str) -> Result<AssignmentOffer> {
        db::read_one(self.store.as_ref(), collections::ASSIGNMENT_OFFERS, offer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("offer {offer_id}")))
    }

    pub async fn offers_for_order(&self, order_id: &str) -> Result<Vec<AssignmentOffer>> {
        let mut offers: Vec<AssignmentOffer> = db::read_all(
            self.store.as_ref(),
            collections::ASSIGNMENT_OFFERS,
            &Filter::new().eq("order_id", order_id),
        )
        .await?;
        offers.sort_by(|a, b| a.offered_at.cmp(&b.offered_at).then_with(|| a.id.cmp(&b.id)));
        Ok(offers)
    }

    pub async fn candidates_for_order(&self, order_id: &str) -> Result<Vec<OrderCandidate>> {
        let mut candidates: Vec<OrderCandidate> = db::read_all(
            self.store.as_ref(),
            collections::ORDER_CANDIDATES,
            &Filter::new().eq("order_id", order_id),
        )
        .await?;
        candidates.sort_by_key(|c| c.rank);
        Ok(candidates)
    }

    pub async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        db::read_all(
            self.store.as_ref(),
            collections::ORDERS,
            &Filter::new().eq("status", status.as_str()),
        )
        .await
    }

    /// Pending offers whose deadline is before `now`.
    pub async fn overdue_offers(&self, now: DateTime<Utc>) -> Result<Vec<AssignmentOffer>> {
        db::read_all(
            self.store.as_ref(),
            collections::ASSIGNMENT_OFFERS,
            &Filter::new()
                .eq("status", OfferStatus::Pending.as_str())
                .lt("expires_at", format_utc_rfc3339(now)),
        )
        .await
    }

    // ─── Transitions ──────────────────────────────────────────────

    /// Create an order, store its ranked candidates and make the first offer.
    ///
    /// Fails with `NoCandidateAvailable` when there is nobody to offer to;
    /// the order is then already terminal.
    pub async fn dispatch(
        &self,
        order_id: &str,
        pickup: Option<Coordinates>,
        candidates: &[Candidate],
    ) -> Result<AssignmentOffer> {
        self.dispatch_with_dropoff(order_id, pickup, None, candidates)
            .await
    }

    /// [`dispatch`](Self::dispatch) for an order with a known drop-off.
    pub async fn dispatch_with_dropoff(
        &self,
        order_id: &str,
        pickup: Option<Coordinates>,
        dropoff: Option<Coordinates>,
        candidates: &[Candidate],
    ) -> Result<AssignmentOffer> {
        if order_id.trim().is_empty() {
            return Err(AppError::BadRequest("order id must not be empty".into()));
        }
        for candidate in candidates {
            candidate.validate()?;
        }

        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;

        if db::read_one::<Order>(self.store.as_ref(), collections::ORDERS, order_id)
            .await?
            .is_some()
        {
            return Err(AppError::InvalidTransition(format!(
                "order {order_id} was already dispatched"
            )));
        }

        // Leftovers from an earlier dispatch that failed before the order
        // row was written.
        self.store
            .write(
                collections::ORDER_CANDIDATES,
                OpType::Delete,
                &json!({}),
                Some(&Filter::new().eq("order_id", order_id)),
            )
            .await?;

        let mut seen = HashSet::new();
        let unique: Vec<Candidate> = candidates
            .iter()
            .filter(|c| seen.insert(c.id.clone()))
            .cloned()
            .collect();
        for (rank, ranked) in self.rank_candidates(pickup, &unique).into_iter().enumerate() {
            let row = OrderCandidate {
                id: OrderCandidate::row_id(order_id, &ranked.candidate_id),
                order_id: order_id.to_string(),
                candidate_id: ranked.candidate_id,
                rank: rank as u32,
                score: ranked.score,
                distance_m: ranked.distance_m,
            };
            db::insert(self.store.as_ref(), collections::ORDER_CANDIDATES, &row).await?;
        }

        // Written last: an order row only exists with its candidate list.
        let now = self.clock.now();
        let order = Order {
            id: order_id.to_string(),
            status: OrderStatus::AwaitingAssignment,
            pickup,
            dropoff,
            assigned_candidate_id: None,
            unassignable_reason: None,
            created_at: now,
            updated_at: now,
        };
        db::insert(self.store.as_ref(), collections::ORDERS, &order).await?;

        tracing::info!(order_id, candidates = unique.len(), "Order dispatched");
        self.register_zones(order_id, pickup, dropoff);

        match self.cascade_locked(order_id).await? {
            CascadeOutcome::Offered { offer } => Ok(offer),
            _ => Err(AppError::NoCandidateAvailable(order_id.to_string())),
        }
    }

    /// Accept a pending, unexpired offer and assign the order.
    pub async fn accept(&self, offer_id: &str) -> Result<AssignmentOffer> {
        let order_id = self.offer(offer_id).await?.order_id;
        let lock = self.order_lock(&order_id);
        let _guard = lock.lock().await;

        let offer = self.offer(offer_id).await?;
        let now = self.clock.now();
        if offer.status != OfferStatus::Pending {
            return Err(AppError::InvalidTransition(format!(
                "offer {offer_id} is {}",
                offer.status.as_str()
            )));
        }
        if offer.is_overdue(now) {
            return Err(AppError::InvalidTransition(format!(
                "offer {offer_id} expired at {}",
                format_utc_rfc3339(offer.expires_at)
            )));
        }

        let accepted = self
            .transition_offer(&offer, OfferStatus::Accepted, "accepted", now)
            .await?
            .ok_or_else(|| AppError::InvalidTransition(format!("offer {offer_id} changed concurrently")))?;

        db::update_where(
            self.store.as_ref(),
            collections::ORDERS,
            json!({
                "status": OrderStatus::Assigned.as_str(),
                "assigned_candidate_id": offer.candidate_id,
                "updated_at": format_utc_rfc3339(now),
            }),
            &Filter::by_id(&order_id),
        )
        .await?;

        self.record_order_event(&order_id, OrderEvent::AssignmentAccepted, Some(&offer.candidate_id), None)
            .await;
        self.notifier.notify(
            &offer.candidate_id,
            NotificationKind::OfferAccepted,
            json!({"order_id": order_id, "offer_id": offer_id}),
        );
        tracing::info!(order_id = %order_id, offer_id, candidate_id = %offer.candidate_id, "Offer accepted");
        Ok(accepted)
    }

    /// Reject a pending offer and move on to the next candidate.
    pub async fn reject(&self, offer_id: &str, reason: Option<&str>) -> Result<RejectResult> {
        let order_id = self.offer(offer_id).await?.order_id;
        let lock = self.order_lock(&order_id);
        let _guard = lock.lock().await;

        let offer = self.offer(offer_id).await?;
        if offer.status != OfferStatus::Pending {
            return Err(AppError::InvalidTransition(format!(
                "offer {offer_id} is {}",
                offer.status.as_str()
            )));
        }

        let now = self.clock.now();
        let reason = reason.unwrap_or("rejected");
        let rejected = self
            .transition_offer(&offer, OfferStatus::Rejected, reason, now)
            .await?
            .ok_or_else(|| AppError::InvalidTransition(format!("offer {offer_id} changed concurrently")))?;

        self.record_order_event(
            &order_id,
            OrderEvent::AssignmentRejected,
            Some(&offer.candidate_id),
            Some(reason),
        )
        .await;
        self.notifier.notify(
            &offer.candidate_id,
            NotificationKind::OfferRejected,
            json!({"order_id": order_id, "offer_id": offer_id}),
        );
        tracing::info!(order_id = %order_id, offer_id, "Offer rejected");

        let next = self.cascade_locked(&order_id).await?;
        Ok(RejectResult {
            offer: rejected,
            next,
        })
    }

    /// Expire an offer if it is still pending and overdue.
    ///
    /// Returns `false` when the offer already moved on (another sweep or a
    /// response got there first).
    pub async fn expire_if_overdue(&self, offer: &AssignmentOffer) -> Result<bool> {
        let lock = self.order_lock(&offer.order_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let current = self.offer(&offer.id).await?;
        if !current.is_overdue(now) {
            return Ok(false);
        }
        self.expire_locked(&current, "expired", now).await
    }

    /// Expire every pending offer of an order now and cascade.
    pub async fn force_expire(&self, order_id: &str) -> Result<ForceExpireResult> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;

        self.order(order_id).await?;
        let now = self.clock.now();
        let mut expired = 0;
        for offer in self.offers_for_order(order_id).await? {
            if offer.status == OfferStatus::Pending && self.expire_locked(&offer, "force_expired", now).await? {
                expired += 1;
            }
        }
        tracing::info!(order_id, expired, "Offers force-expired");

        let next = self.cascade_locked(order_id).await?;
        Ok(ForceExpireResult { expired, next })
    }

    /// Offer the order to its next candidate if it has no live offer.
    pub async fn cascade(&self, order_id: &str) -> Result<CascadeOutcome> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;
        self.cascade_locked(order_id).await
    }

    /// Repair an order whose status disagrees with its offers.
    pub async fn reconcile(&self, order_id: &str) -> Result<Option<Reconciliation>> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;

        let order = self.order(order_id).await?;
        let offers = self.offers_for_order(order_id).await?;
        let accepted = offers.iter().find(|o| o.status == OfferStatus::Accepted);
        let has_pending = offers.iter().any(|o| o.status == OfferStatus::Pending);
        let now = self.clock.now();

        match (order.status, accepted) {
            (OrderStatus::Assigned, None) => {
                let reopened = db::update_where(
                    self.store.as_ref(),
                    collections::ORDERS,
                    json!({
                        "status": OrderStatus::AwaitingAssignment.as_str(),
                        "assigned_candidate_id": Value::Null,
                        "updated_at": format_utc_rfc3339(now),
                    }),
                    &Filter::by_id(order_id).eq("status", OrderStatus::Assigned.as_str()),
                )
                .await?;
                if reopened == 0 {
                    return Ok(None);
                }
                tracing::warn!(order_id, "Assigned order had no accepted offer; reopened");
                self.record_order_event(order_id, OrderEvent::Reconciled, None, Some("reopened"))
                    .await;
                let next = self.cascade_locked(order_id).await?;
                Ok(Some(Reconciliation::Reopened { next }))
            }
            (OrderStatus::AwaitingAssignment, Some(offer)) => {
                let candidate_id = offer.candidate_id.clone();
                let updated = db::update_where(
                    self.store.as_ref(),
                    collections::ORDERS,
                    json!({
                        "status": OrderStatus::Assigned.as_str(),
                        "assigned_candidate_id": candidate_id,
                        "updated_at": format_utc_rfc3339(now),
                    }),
                    &Filter::by_id(order_id).eq("status", OrderStatus::AwaitingAssignment.as_str()),
                )
                .await?;
                if updated == 0 {
                    return Ok(None);
                }
                tracing::warn!(order_id, candidate_id = %candidate_id, "Accepted offer on open order; marked assigned");
                self.record_order_event(order_id, OrderEvent::Reconciled, Some(&candidate_id), Some("marked_assigned"))
                    .await;
                Ok(Some(Reconciliation::MarkedAssigned { candidate_id }))
            }
            (OrderStatus::AwaitingAssignment, None) if !has_pending => {
                let next = self.cascade_locked(order_id).await?;
                Ok(Some(Reconciliation::Cascaded { next }))
            }
            _ => Ok(None),
        }
    }

    // ─── Internals (order lock held) ──────────────────────────────

    async fn cascade_locked(&self, order_id: &str) -> Result<CascadeOutcome> {
        let order = self.order(order_id).await?;
        if order.status == OrderStatus::NoCandidateAccepted {
            return Ok(CascadeOutcome::AlreadyTerminal);
        }

        let offers = self.offers_for_order(order_id).await?;
        if offers.iter().any(|o| o.status.is_active()) {
            return Ok(CascadeOutcome::AlreadyActive);
        }

        let attempted: HashSet<&str> = offers.iter().map(|o| o.candidate_id.as_str()).collect();
        let next = self
            .candidates_for_order(order_id)
            .await?
            .into_iter()
            .find(|c| !attempted.contains(c.candidate_id.as_str()));

        let now = self.clock.now();
        match next {
            Some(candidate) => {
                let offer = AssignmentOffer {
                    id: uuid::Uuid::new_v4().to_string(),
                    order_id: order_id.to_string(),
                    candidate_id: candidate.candidate_id.clone(),
                    status: OfferStatus::Pending,
                    offered_at: now,
                    expires_at: now + self.offer_ttl,
                    responded_at: None,
                };
                db::insert(self.store.as_ref(), collections::ASSIGNMENT_OFFERS, &offer).await?;
                if order.status != OrderStatus::AwaitingAssignment {
                    db::update_where(
                        self.store.as_ref(),
                        collections::ORDERS,
                        json!({
                            "status": OrderStatus::AwaitingAssignment.as_str(),
                            "updated_at": format_utc_rfc3339(now),
                        }),
                        &Filter::by_id(order_id),
                    )
                    .await?;
                }

                self.record_order_event(order_id, OrderEvent::OfferCreated, Some(&offer.candidate_id), None)
                    .await;
                self.notifier.notify(
                    &offer.candidate_id,
                    NotificationKind::OfferCreated,
                    json!({
                        "order_id": order_id,
                        "offer_id": offer.id,
                        "expires_at": format_utc_rfc3339(offer.expires_at),
                    }),
                );
                tracing::info!(
                    order_id,
                    offer_id = %offer.id,
                    candidate_id = %offer.candidate_id,
                    rank = candidate.rank,
                    "Offer created"
                );
                Ok(CascadeOutcome::Offered { offer })
            }
            None => {
                let reason = if offers.is_empty() {
                    "no candidates"
                } else {
                    "all candidates expired or rejected"
                };
                let updated = db::update_where(
                    self.store.as_ref(),
                    collections::ORDERS,
                    json!({
                        "status": OrderStatus::NoCandidateAccepted.as_str(),
                        "unassignable_reason": reason,
                        "updated_at": format_utc_rfc3339(now),
                    }),
                    &Filter::by_id(order_id).ne("status", OrderStatus::NoCandidateAccepted.as_str()),
                )
                .await?;
                if updated == 0 {
                    return Ok(CascadeOutcome::AlreadyTerminal);
                }

                self.record_order_event(order_id, OrderEvent::NoCandidateAccepted, None, Some(reason))
                    .await;
                self.notifier.notify(
                    order_id,
                    NotificationKind::NoCandidateAvailable,
                    json!({"order_id": order_id, "reason": reason}),
                );
                tracing::warn!(order_id, reason, "No candidate available");
                self.remove_zones(order_id);
                // Every later transition on a terminal order is refused.
                self.release_order_lock(order_id);
                Ok(CascadeOutcome::NoCandidateAvailable)
            }
        }
    }

    fn register_zones(
        &self,
        order_id: &str,
        pickup: Option<Coordinates>,
        dropoff: Option<Coordinates>,
    ) {
        let Some(geofences) = &self.geofences else {
            return;
        };
        let zones = [(ZoneType::Pickup, pickup), (ZoneType::Delivery, dropoff)];
        for (zone, center) in zones {
            let Some(center) = center else {
                continue;
            };
            let mut metadata = Map::new();
            metadata.insert("order_id".to_string(), json!(order_id));
            metadata.insert("zone_type".to_string(), json!(zone.as_str()));
            let region = GeofenceRegion {
                metadata,
                ..GeofenceRegion::new(
                    zone.region_id(order_id),
                    center.latitude,
                    center.longitude,
                    zone.radius_m(),
                )
            };
            if let Err(e) = geofences.add_region(region) {
                tracing::warn!(order_id, zone = zone.as_str(), error = %e, "Failed to register order zone");
            }
        }
    }

    fn remove_zones(&self, order_id: &str) {
        if let Some(geofences) = &self.geofences {
            for zone in [ZoneType::Pickup, ZoneType::Delivery] {
                geofences.remove_region(&zone.region_id(order_id));
            }
        }
    }

    async fn expire_locked(
        &self,
        offer: &AssignmentOffer,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(_) = self
            .transition_offer(offer, OfferStatus::Expired, reason, now)
            .await?
        else {
            return Ok(false);
        };

        self.record_order_event(
            &offer.order_id,
            OrderEvent::AssignmentExpired,
            Some(&offer.candidate_id),
            Some(reason),
        )
        .await;
        self.notifier.notify(
            &offer.candidate_id,
            NotificationKind::OfferExpired,
            json!({"order_id": offer.order_id, "offer_id": offer.id}),
        );
        tracing::info!(order_id = %offer.order_id, offer_id = %offer.id, reason, "Offer expired");
        Ok(true)
    }

    /// Move a pending offer to `to`, guarded on it still being pending.
    async fn transition_offer(
        &self,
        offer: &AssignmentOffer,
        to: OfferStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AssignmentOffer>> {
        let updated = db::update_where(
            self.store.as_ref(),
            collections::ASSIGNMENT_OFFERS,
            json!({
                "status": to.as_str(),
                "responded_at": format_utc_rfc3339(now),
            }),
            &Filter::by_id(&offer.id).eq("status", OfferStatus::Pending.as_str()),
        )
        .await?;
        if updated == 0 {
            return Ok(None);
        }

        let entry = OfferHistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            offer_id: offer.id.clone(),
            order_id: offer.order_id.clone(),
            candidate_id: offer.candidate_id.clone(),
            from_status: offer.status,
            to_status: to,
            reason: reason.to_string(),
            recorded_at: now,
        };
        self.append_history(collections::ASSIGNMENT_OFFER_HISTORY, &entry).await;

        Ok(Some(AssignmentOffer {
            status: to,
            responded_at: Some(now),
            ..offer.clone()
        }))
    }

    async fn record_order_event(
        &self,
        order_id: &str,
        event: OrderEvent,
        candidate_id: Option<&str>,
        details: Option<&str>,
    ) {
        let entry = OrderHistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            event,
            candidate_id: candidate_id.map(str::to_string),
            details: details.map(str::to_string),
            recorded_at: self.clock.now(),
        };
        self.append_history(collections::ORDER_HISTORY, &entry).await;
    }

    async fn append_history<T: Serialize>(&self, table: &str, entry: &T) {
        let result = match to_row(entry) {
            Ok(row) => self
                .history
                .submit(table, OpType::Insert, Value::Object(row), None)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::error!(table, error = %e, "Failed to record history");
        }
    }
}
