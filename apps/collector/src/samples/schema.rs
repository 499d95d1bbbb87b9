//! `location_samples` table definition.
//!
//! Applied on every startup. Each statement is `IF NOT EXISTS`, so re-running
//! against an existing database is a no-op.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS location_samples (
    server_id       UUID             PRIMARY KEY,
    seq             BIGSERIAL        NOT NULL,
    client_id       VARCHAR          NOT NULL,
    lat             DOUBLE PRECISION NOT NULL,
    lon             DOUBLE PRECISION NOT NULL,
    acc             DOUBLE PRECISION NOT NULL,
    sample_date     VARCHAR          NOT NULL,
    sample_time     VARCHAR          NOT NULL,
    captured_at_utc BIGINT           NOT NULL,
    provider        VARCHAR          NOT NULL,
    freq            VARCHAR          NOT NULL,
    rf_pwr          VARCHAR          NOT NULL,
    comm_state      VARCHAR          NOT NULL,
    "user"          VARCHAR          NOT NULL,
    station         VARCHAR          NOT NULL,
    device_id       VARCHAR          NOT NULL,
    received_at     TIMESTAMP        NOT NULL,
    processed       BOOLEAN          NOT NULL,
    sync            BOOLEAN          DEFAULT false,
    attempt_count   INTEGER          DEFAULT 0,
    last_error      TEXT,
    synced_at_utc   BIGINT
)
"#;

// client_id uniqueness is the ingestion dedup key.
const CREATE_CLIENT_ID_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS ix_location_samples_client_id
    ON location_samples (client_id)
"#;

// seq orders rows that share a received_at.
const CREATE_DEVICE_ID_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS ix_location_samples_device_id
    ON location_samples (device_id, received_at, seq)
"#;

/// Create the table and its indexes in a single transaction.
pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    for statement in [CREATE_TABLE, CREATE_CLIENT_ID_INDEX, CREATE_DEVICE_ID_INDEX] {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .context("Failed to apply location_samples schema")?;
    }

    tx.commit().await?;
    info!("location_samples schema ready");
    Ok(())
}
