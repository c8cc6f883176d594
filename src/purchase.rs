//! Checkout redirects and the success-callback reconciliation.
//!
//! A user may buy a plan once. Any later success callback for the same user
//! is treated as a repeat-purchase anomaly: it is recorded for review, the
//! hire flag is cleared and the identity account is deleted on the spot.

use std::sync::Arc;

use crate::config::CheckoutConfig;
use crate::identity::{IdentityProvider, Session};
use crate::plan::Plan;
use crate::store::{FraudRecord, PlanHireRecord, Store, StoreError, UserRecord};
use crate::{GenieError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconciliation {
    /// Unknown checkout token; nothing was written.
    Invalid,
    FirstPurchase { plan: Plan },
    FlaggedAsFraud {
        previous_plan: Option<String>,
        incoming: Plan,
    },
}

pub struct PurchaseReconciler {
    store: Arc<dyn Store>,
    identity: Arc<dyn IdentityProvider>,
    checkout: CheckoutConfig,
}

impl PurchaseReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
        checkout: CheckoutConfig,
    ) -> Self {
        Self {
            store,
            identity,
            checkout,
        }
    }

    /// Redirect target for buying `plan`.
    pub fn checkout_url(&self, plan: Plan) -> Result<&str> {
        if !plan.is_purchasable() {
            return Err(GenieError::InvalidInput(format!(
                "plan {} cannot be purchased",
                plan.id()
            )));
        }
        self.checkout
            .url_for(plan)
            .ok_or_else(|| GenieError::not_found("checkout url", plan.id()))
    }

    pub async fn reconcile(
        &self,
        session: &Session,
        checkout_token: &str,
        now_ms: u64,
    ) -> Result<Reconciliation> {
        let Some(plan) = Plan::from_checkout_token(checkout_token) else {
            tracing::warn!(user_id = %session.user_id, "unknown checkout token");
            return Ok(Reconciliation::Invalid);
        };
        let uid = session.user_id.as_str();

        if let Some(existing) = self.store.load_plan_hire(uid).await? {
            return self.flag_repeat_purchase(session, existing, plan, now_ms).await;
        }

        self.store
            .put_plan_hire(&PlanHireRecord {
                uid: uid.to_string(),
                email: session.email.clone(),
                hired: true,
                plan_id: Some(plan.id().to_string()),
                hired_at_ms: Some(now_ms),
                updated_at_ms: None,
            })
            .await?;

        let mut user = self
            .store
            .load_user(uid)
            .await?
            .unwrap_or_else(|| UserRecord::new(uid));
        user.plan = Some(plan.display_name().to_string());
        user.updated_at_ms = Some(now_ms);
        self.store.put_user(&user).await?;

        tracing::info!(user_id = uid, plan = plan.id(), "plan purchase recorded");
        Ok(Reconciliation::FirstPurchase { plan })
    }

    async fn flag_repeat_purchase(
        &self,
        session: &Session,
        existing: PlanHireRecord,
        incoming: Plan,
        now_ms: u64,
    ) -> Result<Reconciliation> {
        let uid = session.user_id.as_str();
        let snapshot = match self.store.load_user(uid).await? {
            Some(user) => Some(serde_json::to_value(&user).map_err(StoreError::from)?),
            None => None,
        };

        self.store
            .put_fraud_record(&FraudRecord {
                uid: uid.to_string(),
                email: session.email.clone(),
                plan_id: incoming.id().to_string(),
                previous_plan: existing.plan_id.clone(),
                user_data: snapshot,
                detected_at_ms: now_ms,
            })
            .await?;

        self.store
            .put_plan_hire(&PlanHireRecord {
                hired: false,
                email: session.email.clone(),
                updated_at_ms: Some(now_ms),
                ..existing.clone()
            })
            .await?;

        tracing::warn!(
            user_id = uid,
            previous_plan = existing.plan_id.as_deref().unwrap_or(""),
            incoming_plan = incoming.id(),
            "repeat plan purchase flagged; deleting account"
        );
        self.identity.delete_account(uid).await?;

        Ok(Reconciliation::FlaggedAsFraud {
            previous_plan: existing.plan_id,
            incoming,
        })
    }
}
