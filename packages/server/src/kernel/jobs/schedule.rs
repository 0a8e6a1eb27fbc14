//! Recurring job schedules.
//!
//! A schedule is a persisted recurrence (cron expression or fixed interval)
//! that the scheduler materialises into jobs. Cron expressions are the
//! standard 5-field form, evaluated in the schedule's IANA timezone.

use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "schedule_interval", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScheduleInterval {
    Hourly,
    #[sqlx(rename = "4hourly")]
    #[serde(rename = "4hourly")]
    FourHourly,
    #[default]
    Daily,
    Weekly,
    Disabled,
}

impl ScheduleInterval {
    pub fn duration(&self) -> Option<chrono::Duration> {
        match self {
            ScheduleInterval::Hourly => Some(chrono::Duration::hours(1)),
            ScheduleInterval::FourHourly => Some(chrono::Duration::hours(4)),
            ScheduleInterval::Daily => Some(chrono::Duration::hours(24)),
            ScheduleInterval::Weekly => Some(chrono::Duration::hours(7 * 24)),
            ScheduleInterval::Disabled => None,
        }
    }
}

const SCHEDULE_COLUMNS: &str = r#"
    id, tenant_id, name, job_type, job_payload, cron_expression, interval,
    timezone, enabled, last_run_at, next_run_at, run_count, fail_count,
    created_at, updated_at
"#;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobSchedule {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub job_type: String,
    /// Template copied into each materialised job's payload.
    #[builder(default = serde_json::json!({}))]
    pub job_payload: serde_json::Value,
    #[builder(default, setter(strip_option))]
    pub cron_expression: Option<String>,
    #[builder(default)]
    pub interval: ScheduleInterval,
    #[builder(default = "UTC".to_string())]
    pub timezone: String,
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default, setter(strip_option))]
    pub last_run_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub next_run_at: Option<DateTime<Utc>>,
    #[builder(default = 0)]
    pub run_count: i64,
    #[builder(default = 0)]
    pub fail_count: i64,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

/// Accept both the classic 5-field form and the 6-field form (with
/// seconds) used by the `cron` crate; 5-field input gets seconds pinned
/// to zero.
fn normalize_cron(expression: &str) -> Result<String> {
    let fields = expression.split_whitespace().count();
    match fields {
        5 => Ok(format!("0 {expression}")),
        6 | 7 => Ok(expression.to_string()),
        n => bail!("cron expression has {n} fields, expected 5"),
    }
}

impl JobSchedule {
    /// Next instant this schedule should fire, strictly after
    /// `max(now, next_run_at)`.
    ///
    /// Cron schedules evaluate in the schedule's timezone, so local-time
    /// DST jumps are handled by the cron iterator; the returned instant is
    /// UTC and monotonically non-decreasing across calls.
    pub fn compute_next_run(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if !self.enabled {
            return Ok(None);
        }

        if let Some(expression) = &self.cron_expression {
            let normalized = normalize_cron(expression)?;
            let schedule = cron::Schedule::from_str(&normalized)
                .with_context(|| format!("invalid cron expression: {expression}"))?;
            let tz: Tz = self
                .timezone
                .parse()
                .with_context(|| format!("invalid timezone: {}", self.timezone))?;

            let anchor = match self.next_run_at {
                Some(next) if next > now => next,
                _ => now,
            };

            let next = schedule
                .after(&anchor.with_timezone(&tz))
                .next()
                .map(|t| t.with_timezone(&Utc));
            return Ok(next);
        }

        Ok(self.interval.duration().map(|d| now + d))
    }

    /// Enabled schedules that are due at `now` (never-run schedules count
    /// as due).
    pub async fn find_due(now: DateTime<Utc>, pool: &PgPool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS} FROM job_schedules
            WHERE enabled = TRUE
              AND interval <> 'disabled'
              AND (next_run_at IS NULL OR next_run_at <= $1)
            ORDER BY next_run_at ASC NULLS FIRST
            "#
        ))
        .bind(now)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM job_schedules WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self> {
        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO job_schedules (
                id, tenant_id, name, job_type, job_payload, cron_expression, interval,
                timezone, enabled, last_run_at, next_run_at, run_count, fail_count,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW())
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(self.tenant_id)
        .bind(&self.name)
        .bind(&self.job_type)
        .bind(&self.job_payload)
        .bind(&self.cron_expression)
        .bind(self.interval)
        .bind(&self.timezone)
        .bind(self.enabled)
        .bind(self.last_run_at)
        .bind(self.next_run_at)
        .bind(self.run_count)
        .bind(self.fail_count)
        .fetch_one(pool)
        .await?;

        Ok(row)
    }

    /// Record a materialised run: stamp last_run_at, advance next_run_at,
    /// bump run_count.
    pub async fn advance_after_enqueue(
        id: Uuid,
        now: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_schedules
            SET last_run_at = $1,
                next_run_at = $2,
                run_count = run_count + 1,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(now)
        .bind(next_run_at)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Advance next_run_at without counting a run. Used when another
    /// scheduler process already materialised this tick (idempotency hit).
    pub async fn advance_only(
        id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_schedules
            SET next_run_at = $1,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(next_run_at)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn increment_fail_count<'e, E>(id: Uuid, executor: E) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            "UPDATE job_schedules SET fail_count = fail_count + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule() -> JobSchedule {
        JobSchedule::builder()
            .tenant_id(Uuid::new_v4())
            .name("hourly databox poll")
            .job_type("databox_sync")
            .build()
    }

    #[test]
    fn interval_durations() {
        assert_eq!(
            ScheduleInterval::Hourly.duration(),
            Some(chrono::Duration::hours(1))
        );
        assert_eq!(
            ScheduleInterval::FourHourly.duration(),
            Some(chrono::Duration::hours(4))
        );
        assert_eq!(
            ScheduleInterval::Weekly.duration(),
            Some(chrono::Duration::hours(168))
        );
        assert_eq!(ScheduleInterval::Disabled.duration(), None);
    }

    #[test]
    fn interval_serde_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&ScheduleInterval::FourHourly).unwrap(),
            "\"4hourly\""
        );
        assert_eq!(
            serde_json::from_str::<ScheduleInterval>("\"weekly\"").unwrap(),
            ScheduleInterval::Weekly
        );
    }

    #[test]
    fn disabled_schedule_has_no_next_run() {
        let mut s = schedule();
        s.enabled = false;
        assert_eq!(s.compute_next_run(Utc::now()).unwrap(), None);

        let mut s = schedule();
        s.interval = ScheduleInterval::Disabled;
        assert_eq!(s.compute_next_run(Utc::now()).unwrap(), None);
    }

    #[test]
    fn interval_advances_from_now() {
        let mut s = schedule();
        s.interval = ScheduleInterval::Hourly;
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 30).unwrap();
        let next = s.compute_next_run(now).unwrap().unwrap();
        assert_eq!(next, now + chrono::Duration::hours(1));
    }

    #[test]
    fn cron_advances_strictly_after_anchor() {
        let mut s = schedule();
        s.cron_expression = Some("0 6 * * *".to_string());
        s.timezone = "Europe/Vienna".to_string();

        // 06:00 Vienna in June is 04:00 UTC.
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 4, 0, 0).unwrap();
        let next = s.compute_next_run(now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 2, 4, 0, 0).unwrap());
    }

    #[test]
    fn cron_respects_future_next_run_at() {
        let mut s = schedule();
        s.cron_expression = Some("0 * * * *".to_string());
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 30).unwrap();
        s.next_run_at = Some(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());

        // Anchor is the future next_run_at, so the result is the hour after it.
        let next = s.compute_next_run(now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn cron_is_monotonic_across_dst_spring_forward() {
        let mut s = schedule();
        // 02:30 local does not exist on 2025-03-30 in Vienna.
        s.cron_expression = Some("30 2 * * *".to_string());
        s.timezone = "Europe/Vienna".to_string();

        let mut anchor = Utc.with_ymd_and_hms(2025, 3, 28, 0, 0, 0).unwrap();
        let mut previous: Option<DateTime<Utc>> = None;
        for _ in 0..4 {
            s.next_run_at = None;
            let next = s.compute_next_run(anchor).unwrap().unwrap();
            if let Some(prev) = previous {
                assert!(next > prev, "next runs must advance monotonically");
            }
            previous = Some(next);
            anchor = next;
        }
    }

    #[test]
    fn five_field_cron_is_accepted() {
        assert_eq!(normalize_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert!(normalize_cron("* * *").is_err());
    }

    #[test]
    fn invalid_cron_is_an_error() {
        let mut s = schedule();
        s.cron_expression = Some("not a cron".to_string());
        assert!(s.compute_next_run(Utc::now()).is_err());
    }

    #[test]
    fn invalid_timezone_is_an_error() {
        let mut s = schedule();
        s.cron_expression = Some("0 6 * * *".to_string());
        s.timezone = "Mars/Olympus".to_string();
        assert!(s.compute_next_run(Utc::now()).is_err());
    }
}
