//! Integration test: ledgers under concurrent writers.
//!
//! Every worker gets its own SQLite connection to one database file, the
//! way several daemon processes would share it. The immediate transactions
//! and compare-and-set updates must keep the ledgers exact:
//! 1. The free quota is never over-granted
//! 2. A paid invoice is consumed exactly once
//! 3. Concurrent sponsor confirmations serialize on the chain tail

use std::path::Path;
use std::sync::Arc;

use waypost_gate::{
    ActionGate, GateError, GateOutcome, InvoiceLedger, ManualClock, NotEligible, PricingPolicy,
    SharedDb, SponsorAuction, SponsorPolicy,
};
use waypost_lightning::simulated::SimulatedProvider;
use waypost_lightning::PaymentProvider;
use waypost_types::invoice::InvoiceConflict;
use waypost_types::pin::EffectResult;
use waypost_types::{InvoiceStatus, Presence, Purpose};

/// Simulated timestamp for deterministic testing.
const TEST_TIMESTAMP: u64 = 1_700_000_000;

const WORKERS: usize = 8;

/// One connection's view of the ledgers.
#[derive(Clone)]
struct Worker {
    gate: ActionGate,
    invoices: InvoiceLedger,
    auction: SponsorAuction,
}

fn worker(path: &Path, provider: &Arc<SimulatedProvider>, clock: &Arc<ManualClock>) -> Worker {
    let db: SharedDb = Arc::new(tokio::sync::Mutex::new(
        waypost_db::open(path).expect("open shared db"),
    ));
    let pricing = PricingPolicy::default();
    let invoices = InvoiceLedger::new(
        db.clone(),
        provider.clone() as Arc<dyn PaymentProvider>,
        clock.clone(),
        pricing.invoice_ttl_secs,
    );
    let gate = ActionGate::new(db.clone(), invoices.clone(), pricing, clock.clone());
    let auction = SponsorAuction::new(
        db,
        invoices.clone(),
        SponsorPolicy::default(),
        clock.clone(),
    );
    Worker {
        gate,
        invoices,
        auction,
    }
}

struct Cluster {
    _dir: tempfile::TempDir,
    provider: Arc<SimulatedProvider>,
    workers: Vec<Worker>,
}

fn cluster() -> Cluster {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("waypost.db");
    let provider = Arc::new(SimulatedProvider::new());
    let clock = Arc::new(ManualClock::new(TEST_TIMESTAMP));
    let workers = (0..WORKERS)
        .map(|_| worker(&path, &provider, &clock))
        .collect();
    Cluster {
        _dir: dir,
        provider,
        workers,
    }
}

async fn root_pin(w: &Worker, who: &Presence) -> String {
    let applied = w
        .gate
        .create_post(who, "thread", None)
        .await
        .expect("root post")
        .applied()
        .expect("applied");
    match applied.effect {
        EffectResult::Created { pin_id } => pin_id,
        other => panic!("unexpected effect {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn free_quota_is_never_overgranted() {
    let c = cluster();
    let alice = Presence::new("device-alice", "stadium");
    let parent = root_pin(&c.workers[0], &alice).await;

    // Replies skip the cooldown, so all of them race for the two
    // remaining free actions.
    let mut handles = Vec::new();
    for w in c.workers.iter().cloned() {
        let alice = alice.clone();
        let parent = parent.clone();
        handles.push(tokio::spawn(async move {
            w.gate.create_reply(&alice, &parent, "me too", None).await
        }));
    }

    let mut free = 0;
    let mut charged = 0;
    for handle in handles {
        match handle.await.expect("join").expect("reply") {
            GateOutcome::Applied(_) => free += 1,
            GateOutcome::PaymentRequired(_) => charged += 1,
        }
    }
    assert_eq!(free, 2);
    assert_eq!(charged, WORKERS - 2);

    let (status, _) = c.workers[0].gate.quota_status(&alice).await.expect("quota");
    assert_eq!(status.free_used, 3);
    assert_eq!(status.free_remaining, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn paid_invoice_is_consumed_once() {
    let c = cluster();
    let alice = Presence::new("device-alice", "stadium");
    let parent = root_pin(&c.workers[0], &alice).await;
    for _ in 0..2 {
        c.workers[0]
            .gate
            .create_reply(&alice, &parent, "free", None)
            .await
            .expect("free reply");
    }

    let invoice = c.workers[0]
        .gate
        .request_invoice(&alice, Purpose::Post, None)
        .await
        .expect("open invoice");
    c.provider.mark_paid(&invoice.id).await.expect("pay");

    let mut handles = Vec::new();
    for w in c.workers.iter().cloned() {
        let alice = alice.clone();
        let parent = parent.clone();
        let invoice_id = invoice.id.clone();
        handles.push(tokio::spawn(async move {
            w.gate
                .create_reply(&alice, &parent, "paid", Some(&invoice_id))
                .await
        }));
    }

    let mut applied = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.expect("join") {
            Ok(GateOutcome::Applied(_)) => applied += 1,
            Err(GateError::InvoiceConflict(InvoiceConflict::AlreadyUsed)) => conflicts += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(conflicts, WORKERS - 1);

    let stored = c.workers[3].invoices.lookup(&invoice.id).await.expect("lookup");
    assert_eq!(stored.status, InvoiceStatus::Used);
    let (status, _) = c.workers[5].gate.quota_status(&alice).await.expect("quota");
    assert_eq!(status.paid_used, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sponsor_confirmations_serialize() {
    let c = cluster();

    // Every bidder opens and pays a minimum bid against the empty chain.
    let mut bids = Vec::new();
    for (i, w) in c.workers.iter().enumerate() {
        let who = Presence::new(format!("device-{i}"), "stadium");
        let invoice = w
            .auction
            .open_bid(&who, &format!("Sponsor {i}"), None, 10)
            .await
            .expect("open bid");
        c.provider.mark_paid(&invoice.id).await.expect("pay bid");
        bids.push((w.clone(), who, invoice.id));
    }

    let mut handles = Vec::new();
    for (w, who, invoice_id) in bids {
        handles.push(tokio::spawn(async move {
            let result = w.auction.confirm_bid(&who, &invoice_id).await;
            (w, invoice_id, result)
        }));
    }

    let mut accepted = Vec::new();
    let mut outbid = Vec::new();
    for handle in handles {
        let (w, invoice_id, result) = handle.await.expect("join");
        match result {
            Ok(bid) => accepted.push(bid),
            Err(GateError::NotEligible(NotEligible::BidTooLow { minimum_sats })) => {
                assert_eq!(minimum_sats, 11);
                outbid.push((w, invoice_id));
            }
            Err(other) => panic!("unexpected error {other}"),
        }
    }

    // Equal bids cannot stack: the first to commit wins.
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].activates_at, TEST_TIMESTAMP);
    assert_eq!(outbid.len(), WORKERS - 1);

    // Losers keep a paid, unconsumed invoice for refund.
    for (w, invoice_id) in &outbid {
        let invoice = w.invoices.lookup(invoice_id).await.expect("lookup");
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }

    let queue = c.workers[0].auction.queue("stadium").await.expect("queue");
    assert_eq!(queue.total_in_queue, 0);
    assert_eq!(
        queue.current.map(|b| b.id),
        Some(accepted[0].id.clone())
    );
}
