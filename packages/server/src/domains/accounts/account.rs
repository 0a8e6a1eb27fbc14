//! Databox accounts: one per (tenant, portal subscriber).

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::kernel::jobs::ScheduleInterval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "portal", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Portal {
    /// Tax authority databox.
    Finanzonline,
    /// Social insurance gateway.
    Elda,
    /// Company registry.
    Firmenbuch,
}

const ACCOUNT_COLUMNS: &str = r#"
    id, tenant_id, portal, subscriber_id, display_name,
    auto_sync_enabled, sync_interval, last_sync_at, created_at, updated_at
"#;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct DataboxAccount {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub tenant_id: Uuid,
    #[builder(default = Portal::Finanzonline)]
    pub portal: Portal,
    pub subscriber_id: String,
    pub display_name: String,
    #[builder(default = true)]
    pub auto_sync_enabled: bool,
    #[builder(default = ScheduleInterval::Daily)]
    pub sync_interval: ScheduleInterval,
    #[builder(default, setter(strip_option))]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl DataboxAccount {
    /// Whether this account is due for an automatic sync at `now`.
    pub fn is_sync_due(&self, now: DateTime<Utc>) -> bool {
        if !self.auto_sync_enabled {
            return false;
        }
        let Some(interval) = self.sync_interval.duration() else {
            return false;
        };
        match self.last_sync_at {
            None => true,
            Some(last) => now >= last + interval,
        }
    }

    pub async fn find_by_id(tenant_id: Uuid, id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let account = sqlx::query_as::<_, Self>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM databox_accounts WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(account)
    }

    /// Accounts of a tenant that are due for an automatic sync.
    pub async fn find_sync_due(
        tenant_id: Uuid,
        now: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let accounts = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS} FROM databox_accounts
            WHERE tenant_id = $1
              AND auto_sync_enabled = TRUE
              AND sync_interval <> 'disabled'
              AND (
                  last_sync_at IS NULL
                  OR last_sync_at + CASE sync_interval
                      WHEN 'hourly' THEN INTERVAL '1 hour'
                      WHEN '4hourly' THEN INTERVAL '4 hours'
                      WHEN 'daily' THEN INTERVAL '24 hours'
                      WHEN 'weekly' THEN INTERVAL '168 hours'
                  END <= $2
              )
            ORDER BY last_sync_at ASC NULLS FIRST
            "#
        ))
        .bind(tenant_id)
        .bind(now)
        .fetch_all(pool)
        .await?;

        Ok(accounts)
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self> {
        let account = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO databox_accounts (
                id, tenant_id, portal, subscriber_id, display_name,
                auto_sync_enabled, sync_interval, last_sync_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(self.tenant_id)
        .bind(self.portal)
        .bind(&self.subscriber_id)
        .bind(&self.display_name)
        .bind(self.auto_sync_enabled)
        .bind(self.sync_interval)
        .bind(self.last_sync_at)
        .fetch_one(pool)
        .await?;

        Ok(account)
    }

    pub async fn mark_synced(id: Uuid, at: DateTime<Utc>, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE databox_accounts SET last_sync_at = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> DataboxAccount {
        DataboxAccount::builder()
            .tenant_id(Uuid::new_v4())
            .subscriber_id("123456789")
            .display_name("Hauptkonto")
            .build()
    }

    #[test]
    fn never_synced_account_is_due() {
        let a = account();
        assert!(a.is_sync_due(Utc::now()));
    }

    #[test]
    fn disabled_account_is_not_due() {
        let mut a = account();
        a.auto_sync_enabled = false;
        assert!(!a.is_sync_due(Utc::now()));

        let mut a = account();
        a.sync_interval = ScheduleInterval::Disabled;
        assert!(!a.is_sync_due(Utc::now()));
    }

    #[test]
    fn recently_synced_account_is_not_due() {
        let now = Utc::now();
        let mut a = account();
        a.sync_interval = ScheduleInterval::Hourly;
        a.last_sync_at = Some(now - chrono::Duration::minutes(30));
        assert!(!a.is_sync_due(now));

        a.last_sync_at = Some(now - chrono::Duration::minutes(61));
        assert!(a.is_sync_due(now));
    }
}
