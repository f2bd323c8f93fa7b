//! SQL schema definitions.

/// Complete schema for the Waypost v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Pins (effect surface of the action gate)
-- ============================================================

CREATE TABLE IF NOT EXISTS pins (
    id TEXT PRIMARY KEY,
    location_id TEXT NOT NULL,
    device_session_id TEXT NOT NULL,
    parent_id TEXT REFERENCES pins(id),
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    deleted_at INTEGER,
    boosted_until INTEGER
);

CREATE INDEX IF NOT EXISTS idx_pins_location ON pins(location_id, created_at);
CREATE INDEX IF NOT EXISTS idx_pins_cooldown
    ON pins(device_session_id, location_id, created_at) WHERE parent_id IS NULL;

-- ============================================================
-- Quota ledger: one row per device, location and UTC day
-- ============================================================

CREATE TABLE IF NOT EXISTS device_location_days (
    device_session_id TEXT NOT NULL,
    location_id TEXT NOT NULL,
    day INTEGER NOT NULL,
    free_actions_used INTEGER NOT NULL DEFAULT 0 CHECK (free_actions_used >= 0),
    paid_actions_used INTEGER NOT NULL DEFAULT 0 CHECK (paid_actions_used >= 0),
    PRIMARY KEY (device_session_id, location_id, day)
);

-- ============================================================
-- Invoice ledger
-- ============================================================

CREATE TABLE IF NOT EXISTS invoices (
    id TEXT PRIMARY KEY,
    purpose TEXT NOT NULL CHECK (purpose IN ('post', 'boost', 'delete', 'sponsor')),
    subject_ref TEXT,
    device_session_id TEXT NOT NULL,
    location_id TEXT NOT NULL,
    amount_sats INTEGER NOT NULL CHECK (amount_sats > 0),
    payment_request TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'paid', 'used', 'expired')),
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    paid_at INTEGER,
    used_at INTEGER,
    payload TEXT
);

CREATE INDEX IF NOT EXISTS idx_invoices_owner ON invoices(device_session_id, location_id);
CREATE INDEX IF NOT EXISTS idx_invoices_open ON invoices(status) WHERE status = 'pending';

-- ============================================================
-- Sponsorship continuation chain
-- ============================================================

CREATE TABLE IF NOT EXISTS sponsor_bids (
    id TEXT PRIMARY KEY,
    location_id TEXT NOT NULL,
    sponsor_label TEXT NOT NULL,
    sponsor_url TEXT,
    amount_sats INTEGER NOT NULL CHECK (amount_sats > 0),
    invoice_id TEXT NOT NULL UNIQUE REFERENCES invoices(id),
    device_session_id TEXT NOT NULL,
    paid_at INTEGER NOT NULL,
    activates_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL CHECK (expires_at > activates_at),
    UNIQUE (location_id, activates_at)
);

CREATE INDEX IF NOT EXISTS idx_sponsor_chain ON sponsor_bids(location_id, expires_at);
"#;
