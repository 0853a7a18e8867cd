use crate::data_structures::{Entitlement, Plan, UserId};
use crate::entitlements::EntitlementStore;
use crate::error::UPSELL_MESSAGE;
use crate::trial::TrialCounter;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessGrant {
    Subscribed(Plan),
    Trial { used: u32, limit: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed(AccessGrant),
    /// Never subscribed, expired and trial exhausted all look the same to the user.
    Denied { reason: &'static str },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed(_))
    }
}

/// What `/checksub` reports. Reading it never consumes a trial use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Subscribed { plan: Plan, days_left: i64 },
    Unsubscribed { trial_remaining: u32 },
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionStatus::Subscribed { plan, days_left } => {
                write!(f, "Subscribed ({} plan, {} days left)", plan, days_left)
            }
            SubscriptionStatus::Unsubscribed { trial_remaining } => {
                write!(f, "Not subscribed. Trial remaining: {}", trial_remaining)
            }
        }
    }
}

pub struct AccessGate {
    store: Arc<EntitlementStore>,
    trials: Arc<TrialCounter>,
}

impl AccessGate {
    pub fn new(store: Arc<EntitlementStore>, trials: Arc<TrialCounter>) -> Self {
        Self { store, trials }
    }

    /// An active entitlement wins and leaves the trial untouched. An expired one
    /// counts as never subscribed and falls through to the trial.
    pub fn authorize(&self, user_id: UserId, now: DateTime<Utc>) -> AccessDecision {
        if let Some(entitlement) = self.store.active(user_id, now) {
            return AccessDecision::Allowed(AccessGrant::Subscribed(entitlement.plan()));
        }

        match self.trials.try_consume(user_id) {
            Some(used) => {
                debug!(user_id, used, limit = self.trials.limit(), "Trial use consumed");
                AccessDecision::Allowed(AccessGrant::Trial {
                    used,
                    limit: self.trials.limit(),
                })
            }
            None => {
                debug!(user_id, "Access denied");
                AccessDecision::Denied {
                    reason: UPSELL_MESSAGE,
                }
            }
        }
    }

    pub fn status(&self, user_id: UserId, now: DateTime<Utc>) -> SubscriptionStatus {
        match self.store.active(user_id, now) {
            Some(entitlement) => subscribed_status(&entitlement, now),
            None => SubscriptionStatus::Unsubscribed {
                trial_remaining: self.trials.remaining(user_id),
            },
        }
    }
}

fn subscribed_status(entitlement: &Entitlement, now: DateTime<Utc>) -> SubscriptionStatus {
    SubscriptionStatus::Subscribed {
        plan: entitlement.plan(),
        days_left: entitlement.days_left(now),
    }
}
