//! Postgres-backed credential store.
//!
//! Portal credentials are written with `pgp_sym_encrypt` and read back with
//! `pgp_sym_decrypt` (pgcrypto), so plaintext never crosses the wire to the
//! application except inside a handler that is about to open a session.
//! The symmetric key is supplied by the operator and held only in memory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use databox::DataboxCredentials;

use super::traits::BaseCredentialStore;

pub struct PostgresCredentialStore {
    pool: PgPool,
    encryption_key: String,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool, encryption_key: String) -> Self {
        Self {
            pool,
            encryption_key,
        }
    }

    /// Store (or replace) the credentials for an account.
    pub async fn put(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        credentials: &DataboxCredentials,
    ) -> Result<()> {
        let plaintext = serde_json::to_string(credentials)?;

        sqlx::query(
            r#"
            UPDATE databox_accounts
            SET credentials = pgp_sym_encrypt($1, $2),
                updated_at = NOW()
            WHERE id = $3 AND tenant_id = $4
            "#,
        )
        .bind(plaintext)
        .bind(&self.encryption_key)
        .bind(account_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .context("failed to store account credentials")?;

        Ok(())
    }
}

#[async_trait]
impl BaseCredentialStore for PostgresCredentialStore {
    async fn credentials_for_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<DataboxCredentials> {
        let plaintext: Option<String> = sqlx::query_scalar(
            r#"
            SELECT pgp_sym_decrypt(credentials, $1)
            FROM databox_accounts
            WHERE id = $2 AND tenant_id = $3 AND credentials IS NOT NULL
            "#,
        )
        .bind(&self.encryption_key)
        .bind(account_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read account credentials")?;

        let plaintext = plaintext
            .with_context(|| format!("no credentials stored for account {account_id}"))?;

        serde_json::from_str(&plaintext).context("stored credentials are not decodable")
    }
}
