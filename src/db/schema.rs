//! PostgreSQL schema for the ledger
//!
//! Endpoints are stored as text labels (`account:7`, `sink:SPApp/Starter`,
//! `escrow:3`, `card:00001`). Amounts are NUMERIC and never negative.

use sqlx::PgPool;

/// Create every ledger table if missing
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing ledger schema...");
    for stmt in MIGRATION {
        sqlx::query(stmt).execute(pool).await?;
    }
    tracing::info!("Ledger schema ready ({} statements)", MIGRATION.len());
    Ok(())
}

pub const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts_tb (
    id          BIGSERIAL PRIMARY KEY,
    owner_id    BIGINT NOT NULL,
    scope       SMALLINT NOT NULL,
    balance     NUMERIC(30, 8) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    held        NUMERIC(30, 8) NOT NULL DEFAULT 0,
    is_default  BOOLEAN NOT NULL DEFAULT FALSE,
    name        VARCHAR(64) NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT accounts_held_ck CHECK (held >= 0 AND held <= balance)
)"#;

pub const CREATE_ACCOUNTS_DEFAULT_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS accounts_default_uq
    ON accounts_tb (owner_id, scope) WHERE is_default"#;

pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS account_transactions_tb (
    id           BIGSERIAL PRIMARY KEY,
    initiator_id BIGINT NOT NULL,
    tx_type      SMALLINT NOT NULL,
    amount       NUMERIC(30, 8) NOT NULL CHECK (amount > 0),
    source       VARCHAR(128) NOT NULL,
    destination  VARCHAR(128) NOT NULL,
    success      BOOLEAN NOT NULL DEFAULT FALSE,
    fail_reason  SMALLINT,
    scope        SMALLINT NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

pub const CREATE_PAYMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payment_requests_tb (
    id             UUID PRIMARY KEY,
    initiator_id   BIGINT NOT NULL,
    destination_id BIGINT NOT NULL REFERENCES accounts_tb (id),
    amount         BIGINT NOT NULL CHECK (amount >= 1),
    trans_code     UUID NOT NULL UNIQUE,
    hash           TEXT NOT NULL DEFAULT '',
    data           TEXT NOT NULL DEFAULT '',
    pay_url        TEXT NOT NULL DEFAULT '',
    expires_at     TIMESTAMPTZ NOT NULL,
    status         SMALLINT NOT NULL DEFAULT 0,
    payer          VARCHAR(128) NOT NULL DEFAULT '',
    scope          SMALLINT NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

pub const CREATE_PAYMENTS_INITIATOR_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS payment_requests_initiator_idx
    ON payment_requests_tb (initiator_id, status, created_at)"#;

pub const CREATE_COMPANIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS crowdfund_companies_tb (
    id                BIGSERIAL PRIMARY KEY,
    owner_id          BIGINT NOT NULL,
    scope             SMALLINT NOT NULL,
    title             VARCHAR(48) NOT NULL,
    short_description VARCHAR(512) NOT NULL DEFAULT '',
    goal              NUMERIC(30, 8) NOT NULL,
    current_amount    NUMERIC(30, 8) NOT NULL DEFAULT 0,
    end_date          TIMESTAMPTZ NOT NULL,
    is_over           BOOLEAN NOT NULL DEFAULT FALSE,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

pub const CREATE_PLEDGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS company_pledges_tb (
    company_id     BIGINT NOT NULL REFERENCES crowdfund_companies_tb (id),
    transaction_id BIGINT NOT NULL REFERENCES account_transactions_tb (id),
    PRIMARY KEY (company_id, transaction_id)
)"#;

pub const CREATE_FORBIDDEN_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS forbidden_actions_tb (
    id              BIGSERIAL PRIMARY KEY,
    user_id         BIGINT NOT NULL,
    scope           SMALLINT NOT NULL,
    action          SMALLINT NOT NULL,
    forbidden_until TIMESTAMPTZ NOT NULL,
    reason          TEXT NOT NULL DEFAULT ''
)"#;

pub const CREATE_ACTIVITY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS activity_log_tb (
    id         BIGSERIAL PRIMARY KEY,
    user_id    BIGINT NOT NULL,
    activity   SMALLINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
)"#;

/// Applied in order by [`init_schema`]
pub const MIGRATION: &[&str] = &[
    CREATE_ACCOUNTS_TABLE,
    CREATE_ACCOUNTS_DEFAULT_INDEX,
    CREATE_TRANSACTIONS_TABLE,
    CREATE_PAYMENTS_TABLE,
    CREATE_PAYMENTS_INITIATOR_INDEX,
    CREATE_COMPANIES_TABLE,
    CREATE_PLEDGES_TABLE,
    CREATE_FORBIDDEN_TABLE,
    CREATE_ACTIVITY_TABLE,
];
