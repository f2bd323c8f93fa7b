//! Action gate.
//!
//! Every metered pin action goes through the same procedure:
//!
//! 1. Check preconditions (cooldown for top-level posts, the target pin for
//!    replies, boosts and deletes).
//! 2. Evaluate the free predicate. If the action is free, apply it and take
//!    the free use in one transaction. Any attached invoice is ignored.
//! 3. Otherwise, without an invoice, answer [`GateOutcome::PaymentRequired`]
//!    and write nothing.
//! 4. With an invoice, refresh it from the provider, then in one immediate
//!    transaction re-check preconditions, consume the invoice, apply the
//!    effect and count the paid use.
//!
//! Consumption and effect share a transaction, so neither can land without
//! the other.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use waypost_db::begin_immediate;
use waypost_db::queries::pins;
use waypost_types::invoice::{Invoice, InvoiceConflict};
use waypost_types::pin::{EffectResult, Pin};
use waypost_types::{day_of, Presence, Purpose, QuotaStatus, MAX_BODY_CHARS};

use crate::{
    new_id, validate_presence, Clock, GateError, InvoiceLedger, NotEligible, PricingPolicy,
    QuotaLedger, Result, SharedDb,
};

/// What the caller must pay before the action can proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequired {
    pub purpose: Purpose,
    pub amount_sats: u64,
    /// Free posts used today, for post and reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posts_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posts_limit: Option<u32>,
}

/// A completed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applied {
    pub effect: EffectResult,
    /// Free posts left today after a free post or reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_free_actions: Option<u32>,
    /// The invoice consumed, if the action was paid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
}

/// Result of a gated action that was not refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Applied(Applied),
    PaymentRequired(PaymentRequired),
}

impl GateOutcome {
    pub fn applied(self) -> Option<Applied> {
        match self {
            GateOutcome::Applied(applied) => Some(applied),
            GateOutcome::PaymentRequired(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action<'a> {
    Post { body: &'a str },
    Reply { parent_id: &'a str, body: &'a str },
    Boost { pin_id: &'a str },
    Delete { pin_id: &'a str },
}

impl Action<'_> {
    fn validate(&self) -> Result<()> {
        match self {
            Action::Post { body } | Action::Reply { body, .. } => validate_body(body),
            Action::Boost { pin_id } | Action::Delete { pin_id } if pin_id.trim().is_empty() => {
                Err(GateError::Validation("pin_id is required".into()))
            }
            Action::Boost { .. } | Action::Delete { .. } => Ok(()),
        }
    }
}

fn validate_body(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(GateError::Validation("body is empty".into()));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(GateError::Validation(format!(
            "body exceeds {MAX_BODY_CHARS} characters"
        )));
    }
    Ok(())
}

/// The paid path an action fell through to.
struct Charge {
    purpose: Purpose,
    subject_ref: Option<String>,
    required: PaymentRequired,
}

enum Step {
    Done(Applied),
    Pay(Charge),
}

/// Decides and applies metered pin actions.
#[derive(Clone)]
pub struct ActionGate {
    db: SharedDb,
    invoices: InvoiceLedger,
    quota: QuotaLedger,
    pricing: PricingPolicy,
    clock: Arc<dyn Clock>,
}

impl ActionGate {
    pub fn new(
        db: SharedDb,
        invoices: InvoiceLedger,
        pricing: PricingPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            invoices,
            quota: QuotaLedger::from_policy(&pricing),
            pricing,
            clock,
        }
    }

    pub fn pricing(&self) -> &PricingPolicy {
        &self.pricing
    }

    /// Post a new top-level pin.
    pub async fn create_post(
        &self,
        presence: &Presence,
        body: &str,
        invoice_id: Option<&str>,
    ) -> Result<GateOutcome> {
        self.run(presence, Action::Post { body }, invoice_id).await
    }

    /// Reply to a pin. Replies skip the cooldown but share the post quota.
    pub async fn create_reply(
        &self,
        presence: &Presence,
        parent_id: &str,
        body: &str,
        invoice_id: Option<&str>,
    ) -> Result<GateOutcome> {
        self.run(presence, Action::Reply { parent_id, body }, invoice_id)
            .await
    }

    /// Extend a pin's boost window. Always paid.
    pub async fn boost_pin(
        &self,
        presence: &Presence,
        pin_id: &str,
        invoice_id: Option<&str>,
    ) -> Result<GateOutcome> {
        self.run(presence, Action::Boost { pin_id }, invoice_id).await
    }

    /// Delete one of the caller's own pins. Free inside the delete window.
    pub async fn delete_pin(
        &self,
        presence: &Presence,
        pin_id: &str,
        invoice_id: Option<&str>,
    ) -> Result<GateOutcome> {
        self.run(presence, Action::Delete { pin_id }, invoice_id).await
    }

    /// Today's quota standing plus the running cooldown.
    pub async fn quota_status(&self, presence: &Presence) -> Result<(QuotaStatus, u64)> {
        validate_presence(presence)?;
        let conn = self.db.lock().await;
        let now = self.clock.now();
        let status = self.quota.check_quota(&conn, presence, day_of(now))?;
        let cooldown = self.quota.check_cooldown(&conn, presence, now)?;
        Ok((status, cooldown))
    }

    /// Open an invoice priced for a pin action.
    ///
    /// Boost and delete invoices are bound to a live pin at the caller's
    /// location so they cannot be redirected later.
    pub async fn request_invoice(
        &self,
        presence: &Presence,
        purpose: Purpose,
        subject_ref: Option<&str>,
    ) -> Result<Invoice> {
        validate_presence(presence)?;
        let amount = self.pricing.price_for(purpose).ok_or_else(|| {
            GateError::Validation("sponsor invoices are opened by placing a bid".into())
        })?;
        if let Some(pin_id) = subject_ref {
            let conn = self.db.lock().await;
            let pin = live_pin_at(&conn, pin_id, &presence.location_id)?;
            if purpose == Purpose::Delete && pin.device_session_id != presence.device_session_id {
                return Err(NotEligible::NotOwner.into());
            }
        }
        self.invoices
            .open_invoice(presence, purpose, subject_ref.map(str::to_string), amount, None)
            .await
    }

    async fn run(
        &self,
        presence: &Presence,
        action: Action<'_>,
        invoice_id: Option<&str>,
    ) -> Result<GateOutcome> {
        validate_presence(presence)?;
        action.validate()?;

        let charge = {
            let mut conn = self.db.lock().await;
            let now = self.clock.now();
            let tx = begin_immediate(&mut conn)?;
            match self.try_free(&tx, presence, action, now)? {
                Step::Done(applied) => {
                    tx.commit()?;
                    tracing::debug!(
                        device = %presence.device_session_id,
                        location = %presence.location_id,
                        effect = ?applied.effect,
                        "free action applied"
                    );
                    return Ok(GateOutcome::Applied(applied));
                }
                // Nothing was written; dropping the transaction rolls back.
                Step::Pay(charge) => charge,
            }
        };

        let Some(invoice_id) = invoice_id else {
            return Ok(GateOutcome::PaymentRequired(charge.required));
        };

        let refreshed = self.invoices.refresh(invoice_id).await?;
        if refreshed.invoice.location_id != presence.location_id {
            return Err(GateError::InvoiceConflict(InvoiceConflict::WrongOwner));
        }

        let mut conn = self.db.lock().await;
        let now = self.clock.now();
        let tx = begin_immediate(&mut conn)?;
        self.precheck(&tx, presence, action, now)?;
        InvoiceLedger::mark_used(
            &tx,
            invoice_id,
            &presence.device_session_id,
            charge.purpose,
            charge.subject_ref.as_deref(),
            now,
        )?;
        let effect = self.apply(&tx, presence, action, now)?;
        self.quota.record_paid_use(&tx, presence, day_of(now))?;
        tx.commit()?;

        tracing::info!(
            invoice_id,
            purpose = %charge.purpose,
            amount_sats = charge.required.amount_sats,
            device = %presence.device_session_id,
            location = %presence.location_id,
            effect = ?effect,
            "invoice consumed"
        );
        Ok(GateOutcome::Applied(Applied {
            effect,
            remaining_free_actions: None,
            invoice_id: Some(invoice_id.to_string()),
        }))
    }

    /// Refusals that no payment can lift. Returns the target pin, if any.
    fn precheck(
        &self,
        conn: &Connection,
        presence: &Presence,
        action: Action<'_>,
        now: u64,
    ) -> Result<Option<Pin>> {
        match action {
            Action::Post { .. } => {
                let remaining_secs = self.quota.check_cooldown(conn, presence, now)?;
                if remaining_secs > 0 {
                    return Err(NotEligible::CooldownActive { remaining_secs }.into());
                }
                Ok(None)
            }
            Action::Reply { parent_id, .. } => {
                live_pin_at(conn, parent_id, &presence.location_id).map(Some)
            }
            Action::Boost { pin_id } => live_pin_at(conn, pin_id, &presence.location_id).map(Some),
            Action::Delete { pin_id } => {
                let pin = live_pin_at(conn, pin_id, &presence.location_id)?;
                if pin.device_session_id != presence.device_session_id {
                    return Err(NotEligible::NotOwner.into());
                }
                Ok(Some(pin))
            }
        }
    }

    fn try_free(
        &self,
        conn: &Connection,
        presence: &Presence,
        action: Action<'_>,
        now: u64,
    ) -> Result<Step> {
        let target = self.precheck(conn, presence, action, now)?;
        let day = day_of(now);

        match action {
            Action::Post { .. } | Action::Reply { .. } => {
                if self.quota.record_free_use(conn, presence, day)? {
                    let effect = self.apply(conn, presence, action, now)?;
                    let status = self.quota.check_quota(conn, presence, day)?;
                    return Ok(Step::Done(Applied {
                        effect,
                        remaining_free_actions: Some(status.free_remaining),
                        invoice_id: None,
                    }));
                }
                let status = self.quota.check_quota(conn, presence, day)?;
                Ok(Step::Pay(Charge {
                    purpose: Purpose::Post,
                    subject_ref: None,
                    required: PaymentRequired {
                        purpose: Purpose::Post,
                        amount_sats: self.pricing.post_price_sats,
                        posts_used: Some(status.free_used),
                        posts_limit: Some(status.free_limit),
                    },
                }))
            }
            Action::Boost { pin_id } => Ok(Step::Pay(self.charge_for(Purpose::Boost, pin_id))),
            Action::Delete { pin_id } => {
                let age = target.map_or(0, |pin| now.saturating_sub(pin.created_at));
                if age < self.pricing.free_delete_window_secs {
                    let effect = self.apply(conn, presence, action, now)?;
                    return Ok(Step::Done(Applied {
                        effect,
                        remaining_free_actions: None,
                        invoice_id: None,
                    }));
                }
                Ok(Step::Pay(self.charge_for(Purpose::Delete, pin_id)))
            }
        }
    }

    fn charge_for(&self, purpose: Purpose, pin_id: &str) -> Charge {
        let amount_sats = match purpose {
            Purpose::Boost => self.pricing.boost_price_sats,
            _ => self.pricing.delete_price_sats,
        };
        Charge {
            purpose,
            subject_ref: Some(pin_id.to_string()),
            required: PaymentRequired {
                purpose,
                amount_sats,
                posts_used: None,
                posts_limit: None,
            },
        }
    }

    fn apply(
        &self,
        conn: &Connection,
        presence: &Presence,
        action: Action<'_>,
        now: u64,
    ) -> Result<EffectResult> {
        match action {
            Action::Post { body } => insert_pin(conn, presence, None, body, now),
            Action::Reply { parent_id, body } => {
                insert_pin(conn, presence, Some(parent_id), body, now)
            }
            Action::Boost { pin_id } => {
                let boosted_until =
                    pins::extend_boost(conn, pin_id, now, self.pricing.boost_duration_secs)?;
                Ok(EffectResult::Boosted {
                    pin_id: pin_id.to_string(),
                    boosted_until,
                })
            }
            Action::Delete { pin_id } => {
                if !pins::soft_delete(conn, pin_id, now)? {
                    return Err(NotEligible::PinDeleted.into());
                }
                Ok(EffectResult::Deleted {
                    pin_id: pin_id.to_string(),
                })
            }
        }
    }
}

fn insert_pin(
    conn: &Connection,
    presence: &Presence,
    parent_id: Option<&str>,
    body: &str,
    now: u64,
) -> Result<EffectResult> {
    let pin = Pin {
        id: new_id(),
        location_id: presence.location_id.clone(),
        device_session_id: presence.device_session_id.clone(),
        parent_id: parent_id.map(str::to_string),
        body: body.trim().to_string(),
        created_at: now,
        deleted_at: None,
        boosted_until: None,
    };
    pins::insert(conn, &pin)?;
    Ok(EffectResult::Created { pin_id: pin.id })
}

/// A pin that exists at `location` and has not been deleted.
fn live_pin_at(conn: &Connection, pin_id: &str, location: &str) -> Result<Pin> {
    let pin = pins::find(conn, pin_id)?
        .filter(|pin| pin.location_id == location)
        .ok_or(GateError::NotEligible(NotEligible::PinNotFound))?;
    if pin.is_deleted() {
        return Err(NotEligible::PinDeleted.into());
    }
    Ok(pin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{harness, Harness, T0};
    use waypost_types::InvoiceStatus;

    fn gate(h: &Harness) -> ActionGate {
        ActionGate::new(
            h.db.clone(),
            h.invoices.clone(),
            PricingPolicy::default(),
            h.clock.clone(),
        )
    }

    fn alice() -> Presence {
        Presence::new("dev-a", "loc-1")
    }

    fn created_id(outcome: GateOutcome) -> String {
        match outcome.applied().expect("applied").effect {
            EffectResult::Created { pin_id } => pin_id,
            other => panic!("unexpected effect {other:?}"),
        }
    }

    /// Use up the free quota, spacing posts past the cooldown.
    async fn exhaust_quota(h: &Harness, g: &ActionGate, p: &Presence) {
        for _ in 0..3 {
            g.create_post(p, "free", None).await.expect("free post");
            h.clock.advance(61);
        }
    }

    async fn paid_invoice(
        g: &ActionGate,
        p: &Presence,
        purpose: Purpose,
        subject: Option<&str>,
    ) -> String {
        let inv = g.request_invoice(p, purpose, subject).await.expect("invoice");
        g.invoices.dev_mark_paid(&inv.id).await.expect("pay");
        inv.id
    }

    #[tokio::test]
    async fn test_free_post_reports_remaining() {
        let h = harness();
        let g = gate(&h);
        let applied = g
            .create_post(&alice(), "hello", None)
            .await
            .expect("post")
            .applied()
            .expect("applied");
        assert_eq!(applied.remaining_free_actions, Some(2));
        assert!(applied.invoice_id.is_none());
    }

    #[tokio::test]
    async fn test_paid_post_scenario() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        exhaust_quota(&h, &g, &p).await;

        let outcome = g.create_post(&p, "fourth", None).await.expect("post");
        assert_eq!(
            outcome,
            GateOutcome::PaymentRequired(PaymentRequired {
                purpose: Purpose::Post,
                amount_sats: 5,
                posts_used: Some(3),
                posts_limit: Some(3),
            })
        );

        let invoice_id = paid_invoice(&g, &p, Purpose::Post, None).await;
        let applied = g
            .create_post(&p, "fourth", Some(&invoice_id))
            .await
            .expect("paid post")
            .applied()
            .expect("applied");
        assert_eq!(applied.invoice_id.as_deref(), Some(invoice_id.as_str()));

        let (status, _) = g.quota_status(&p).await.expect("quota");
        assert_eq!(status.paid_used, 1);
        assert_eq!(status.free_used, 3);

        h.clock.advance(61);
        assert!(matches!(
            g.create_post(&p, "fifth", Some(&invoice_id)).await,
            Err(GateError::InvoiceConflict(InvoiceConflict::AlreadyUsed))
        ));
    }

    #[tokio::test]
    async fn test_payment_required_writes_nothing() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        exhaust_quota(&h, &g, &p).await;
        let before = g.quota_status(&p).await.expect("quota").0;
        g.create_post(&p, "x", None).await.expect("post");
        g.create_post(&p, "x", None).await.expect("post");
        assert_eq!(g.quota_status(&p).await.expect("quota").0, before);
    }

    #[tokio::test]
    async fn test_unpaid_invoice_rejected() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        exhaust_quota(&h, &g, &p).await;
        let inv = g.request_invoice(&p, Purpose::Post, None).await.expect("invoice");
        assert!(matches!(
            g.create_post(&p, "x", Some(&inv.id)).await,
            Err(GateError::InvoiceConflict(InvoiceConflict::NotPaid))
        ));
    }

    #[tokio::test]
    async fn test_expired_invoice_rejected_even_if_paid() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        exhaust_quota(&h, &g, &p).await;
        let invoice_id = paid_invoice(&g, &p, Purpose::Post, None).await;
        h.clock.advance(900);
        assert!(matches!(
            g.create_post(&p, "late", Some(&invoice_id)).await,
            Err(GateError::InvoiceConflict(InvoiceConflict::Expired))
        ));
    }

    #[tokio::test]
    async fn test_invoice_of_another_device_rejected() {
        let h = harness();
        let g = gate(&h);
        let bob = Presence::new("dev-b", "loc-1");
        exhaust_quota(&h, &g, &alice()).await;
        let bobs = paid_invoice(&g, &bob, Purpose::Post, None).await;
        assert!(matches!(
            g.create_post(&alice(), "x", Some(&bobs)).await,
            Err(GateError::InvoiceConflict(InvoiceConflict::WrongOwner))
        ));
        // Still usable by its owner.
        let conn = h.db.lock().await;
        let inv = waypost_db::queries::invoices::get(&conn, &bobs).expect("invoice");
        assert_eq!(inv.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_quota_available_ignores_invoice() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        let invoice_id = paid_invoice(&g, &p, Purpose::Post, None).await;
        let applied = g
            .create_post(&p, "free anyway", Some(&invoice_id))
            .await
            .expect("post")
            .applied()
            .expect("applied");
        assert!(applied.invoice_id.is_none());
        let inv = g.invoices.lookup(&invoice_id).await.expect("lookup");
        assert_eq!(inv.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_even_with_payment() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        g.create_post(&p, "first", None).await.expect("post");
        let invoice_id = paid_invoice(&g, &p, Purpose::Post, None).await;
        h.clock.advance(15);
        match g.create_post(&p, "second", Some(&invoice_id)).await {
            Err(GateError::NotEligible(NotEligible::CooldownActive { remaining_secs })) => {
                assert_eq!(remaining_secs, 45)
            }
            other => panic!("expected cooldown, got {other:?}"),
        }
        let inv = g.invoices.lookup(&invoice_id).await.expect("lookup");
        assert_eq!(inv.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_reply_skips_cooldown_but_uses_quota() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        let parent = created_id(g.create_post(&p, "parent", None).await.expect("post"));
        let applied = g
            .create_reply(&p, &parent, "reply", None)
            .await
            .expect("reply")
            .applied()
            .expect("applied");
        assert_eq!(applied.remaining_free_actions, Some(1));

        g.create_reply(&p, &parent, "reply 2", None).await.expect("reply");
        let outcome = g.create_reply(&p, &parent, "reply 3", None).await.expect("reply");
        assert!(matches!(
            outcome,
            GateOutcome::PaymentRequired(PaymentRequired { purpose: Purpose::Post, .. })
        ));
    }

    #[tokio::test]
    async fn test_reply_needs_live_parent_here() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        assert!(matches!(
            g.create_reply(&p, "missing", "hi", None).await,
            Err(GateError::NotEligible(NotEligible::PinNotFound))
        ));
        let parent = created_id(g.create_post(&p, "parent", None).await.expect("post"));
        let elsewhere = Presence::new("dev-a", "loc-2");
        assert!(matches!(
            g.create_reply(&elsewhere, &parent, "hi", None).await,
            Err(GateError::NotEligible(NotEligible::PinNotFound))
        ));
        g.delete_pin(&p, &parent, None).await.expect("delete");
        assert!(matches!(
            g.create_reply(&p, &parent, "hi", None).await,
            Err(GateError::NotEligible(NotEligible::PinDeleted))
        ));
    }

    #[tokio::test]
    async fn test_boost_always_paid_and_stacks() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        let pin = created_id(g.create_post(&p, "boost me", None).await.expect("post"));
        let bob = Presence::new("dev-b", "loc-1");

        let outcome = g.boost_pin(&bob, &pin, None).await.expect("boost");
        assert!(matches!(
            outcome,
            GateOutcome::PaymentRequired(PaymentRequired {
                purpose: Purpose::Boost,
                amount_sats: 10,
                ..
            })
        ));

        let first = paid_invoice(&g, &bob, Purpose::Boost, Some(&pin)).await;
        let applied = g
            .boost_pin(&bob, &pin, Some(&first))
            .await
            .expect("boost")
            .applied()
            .expect("applied");
        assert_eq!(
            applied.effect,
            EffectResult::Boosted {
                pin_id: pin.clone(),
                boosted_until: T0 + 21_600
            }
        );

        let second = paid_invoice(&g, &bob, Purpose::Boost, Some(&pin)).await;
        let applied = g
            .boost_pin(&bob, &pin, Some(&second))
            .await
            .expect("boost")
            .applied()
            .expect("applied");
        assert_eq!(
            applied.effect,
            EffectResult::Boosted {
                pin_id: pin,
                boosted_until: T0 + 2 * 21_600
            }
        );
    }

    #[tokio::test]
    async fn test_boost_invoice_bound_to_pin() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        let a = created_id(g.create_post(&p, "a", None).await.expect("post"));
        h.clock.advance(61);
        let b = created_id(g.create_post(&p, "b", None).await.expect("post"));
        let for_a = paid_invoice(&g, &p, Purpose::Boost, Some(&a)).await;
        assert!(matches!(
            g.boost_pin(&p, &b, Some(&for_a)).await,
            Err(GateError::InvoiceConflict(InvoiceConflict::WrongPurpose))
        ));
    }

    #[tokio::test]
    async fn test_delete_window_scenario() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        let old = created_id(g.create_post(&p, "old", None).await.expect("post"));
        h.clock.advance(9 * 60);
        let young = created_id(g.create_post(&p, "young", None).await.expect("post"));
        h.clock.advance(2 * 60);

        // Eleven minutes old: needs a delete invoice.
        let outcome = g.delete_pin(&p, &old, None).await.expect("delete");
        assert!(matches!(
            outcome,
            GateOutcome::PaymentRequired(PaymentRequired {
                purpose: Purpose::Delete,
                amount_sats: 5,
                ..
            })
        ));

        // Two minutes old: free even with a stale invoice attached.
        let applied = g
            .delete_pin(&p, &young, Some("stale-invoice"))
            .await
            .expect("delete")
            .applied()
            .expect("applied");
        assert_eq!(applied.effect, EffectResult::Deleted { pin_id: young.clone() });
        assert!(applied.invoice_id.is_none());

        let invoice_id = paid_invoice(&g, &p, Purpose::Delete, Some(&old)).await;
        let applied = g
            .delete_pin(&p, &old, Some(&invoice_id))
            .await
            .expect("paid delete")
            .applied()
            .expect("applied");
        assert_eq!(applied.effect, EffectResult::Deleted { pin_id: old.clone() });

        assert!(matches!(
            g.delete_pin(&p, &old, None).await,
            Err(GateError::NotEligible(NotEligible::PinDeleted))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_owner_only() {
        let h = harness();
        let g = gate(&h);
        let pin = created_id(g.create_post(&alice(), "mine", None).await.expect("post"));
        let bob = Presence::new("dev-b", "loc-1");
        assert!(matches!(
            g.delete_pin(&bob, &pin, None).await,
            Err(GateError::NotEligible(NotEligible::NotOwner))
        ));
        assert!(matches!(
            g.request_invoice(&bob, Purpose::Delete, Some(&pin)).await,
            Err(GateError::NotEligible(NotEligible::NotOwner))
        ));
    }

    #[tokio::test]
    async fn test_deleting_does_not_reset_cooldown() {
        let h = harness();
        let g = gate(&h);
        let p = alice();
        let pin = created_id(g.create_post(&p, "oops", None).await.expect("post"));
        g.delete_pin(&p, &pin, None).await.expect("delete");
        assert!(matches!(
            g.create_post(&p, "again", None).await,
            Err(GateError::NotEligible(NotEligible::CooldownActive { .. }))
        ));
    }

    #[tokio::test]
    async fn test_body_validation() {
        let h = harness();
        let g = gate(&h);
        assert!(matches!(
            g.create_post(&alice(), "   ", None).await,
            Err(GateError::Validation(_))
        ));
        let long = "x".repeat(MAX_BODY_CHARS + 1);
        assert!(matches!(
            g.create_post(&alice(), &long, None).await,
            Err(GateError::Validation(_))
        ));
        assert!(matches!(
            g.create_post(&Presence::new("", "loc-1"), "hi", None).await,
            Err(GateError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_sponsor_invoice_not_requestable_here() {
        let h = harness();
        let g = gate(&h);
        assert!(matches!(
            g.request_invoice(&alice(), Purpose::Sponsor, None).await,
            Err(GateError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_provider_blocks_paid_path() {
        use waypost_lightning::DisabledProvider;

        let h = harness();
        let invoices = InvoiceLedger::new(
            h.db.clone(),
            Arc::new(DisabledProvider::new("no backend")),
            h.clock.clone(),
            900,
        );
        let g = ActionGate::new(h.db.clone(), invoices, PricingPolicy::default(), h.clock.clone());
        let p = alice();
        exhaust_quota(&h, &g, &p).await;

        assert!(matches!(
            g.request_invoice(&p, Purpose::Post, None).await,
            Err(GateError::ProviderUnavailable(_))
        ));

        // A pending invoice recorded earlier cannot be verified either.
        {
            let conn = h.db.lock().await;
            InvoiceLedger::record(
                &conn,
                &Invoice {
                    id: "pending-1".into(),
                    purpose: Purpose::Post,
                    subject_ref: None,
                    device_session_id: "dev-a".into(),
                    location_id: "loc-1".into(),
                    amount_sats: 5,
                    payment_request: "lnsim".into(),
                    status: InvoiceStatus::Pending,
                    created_at: h.clock.now(),
                    expires_at: h.clock.now() + 900,
                    paid_at: None,
                    used_at: None,
                    payload: None,
                },
            )
            .expect("record");
        }
        assert!(matches!(
            g.create_post(&p, "x", Some("pending-1")).await,
            Err(GateError::ProviderUnavailable(_))
        ));

        // Free actions still work.
        h.clock.advance(waypost_types::DAY_SECS);
        g.create_post(&p, "new day", None).await.expect("free post");
    }
}
