// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Periodic expiration sweep.
//!
//! One pass expires overdue offers, cascades the affected orders and then
//! repairs orders whose status disagrees with their offers. Failures are
//! collected per item; one bad order never stops the pass. Running a pass
//! twice with no time passing does nothing the second time.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{CascadeOutcome, OrderStatus, SweepFailure, SweepSummary};
use crate::services::assignment::{AssignmentManager, Reconciliation};
use crate::time_utils::Clock;

pub struct ExpirationSweeper {
    assignments: Arc<AssignmentManager>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ExpirationSweeper {
    pub fn new(assignments: Arc<AssignmentManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            assignments,
            clock,
            running: AtomicBool::new(false),
        }
    }

    /// Run one pass. Returns `None` if a pass is already running.
    pub async fn try_sweep(&self) -> Option<SweepSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sweep already running, skipping");
            return None;
        }
        let _guard = RunningGuard(&self.running);
        Some(self.sweep_once().await)
    }

    /// Run one pass unconditionally.
    pub async fn sweep_once(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let now = self.clock.now();

        let overdue = match self.assignments.overdue_offers(now).await {
            Ok(offers) => offers,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query overdue offers");
                summary.failures.push(SweepFailure {
                    item: "overdue_offers".to_string(),
                    stage: "query",
                    error: e.to_string(),
                });
                Vec::new()
            }
        };

        let mut touched = BTreeSet::new();
        for offer in &overdue {
            match self.assignments.expire_if_overdue(offer).await {
                Ok(true) => {
                    summary.expired += 1;
                    touched.insert(offer.order_id.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(offer_id = %offer.id, error = %e, "Failed to expire offer");
                    summary.failures.push(SweepFailure {
                        item: offer.id.clone(),
                        stage: "expire",
                        error: e.to_string(),
                    });
                }
            }
        }

        for order_id in &touched {
            match self.assignments.cascade(order_id).await {
                Ok(outcome) => tally(&mut summary, &outcome),
                Err(e) => {
                    tracing::warn!(order_id = %order_id, error = %e, "Cascade failed");
                    summary.failures.push(SweepFailure {
                        item: order_id.clone(),
                        stage: "cascade",
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = self.reconcile(&mut summary).await {
            tracing::error!(error = %e, "Failed to list orders for reconciliation");
            summary.failures.push(SweepFailure {
                item: "orders".to_string(),
                stage: "reconcile_query",
                error: e.to_string(),
            });
        }

        if summary.is_noop() {
            tracing::debug!("Sweep found nothing to do");
        } else {
            tracing::info!(
                expired = summary.expired,
                reoffered = summary.reoffered,
                unassignable = summary.unassignable,
                reconciled = summary.reconciled,
                failures = summary.failures.len(),
                "Sweep completed"
            );
        }
        summary
    }

    async fn reconcile(&self, summary: &mut SweepSummary) -> Result<()> {
        let mut orders = self
            .assignments
            .orders_with_status(OrderStatus::Assigned)
            .await?;
        orders.extend(
            self.assignments
                .orders_with_status(OrderStatus::AwaitingAssignment)
                .await?,
        );

        for order in orders {
            match self.assignments.reconcile(&order.id).await {
                Ok(Some(action)) => {
                    summary.reconciled += 1;
                    match action {
                        Reconciliation::Reopened { next } | Reconciliation::Cascaded { next } => {
                            tally(summary, &next)
                        }
                        Reconciliation::MarkedAssigned { .. } => {}
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "Reconciliation failed");
                    summary.failures.push(SweepFailure {
                        item: order.id.clone(),
                        stage: "reconcile",
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Sweep every `period` until `token` is cancelled.
    pub fn spawn(self: &Arc<Self>, period: Duration, token: CancellationToken) -> JoinHandle<()> {
        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("Expiration sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        sweeper.try_sweep().await;
                    }
                }
            }
        })
    }
}

fn tally(summary: &mut SweepSummary, outcome: &CascadeOutcome) {
    match outcome {
        CascadeOutcome::Offered { .. } => summary.reoffered += 1,
        CascadeOutcome::NoCandidateAvailable => summary.unassignable += 1,
        CascadeOutcome::AlreadyActive | CascadeOutcome::AlreadyTerminal => {}
    }
}
