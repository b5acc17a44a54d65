use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::ports::{
    GeoCacheRepository, HouseholdRepository, UserIpGroup,
};
use crate::error::{MonitorError, Result};
use vigil_model::{GeoResult, HouseholdLocation};

#[derive(Debug, Clone)]
pub struct PostgresGeoCacheRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct GeoRow {
    ip: String,
    city: Option<String>,
    country: Option<String>,
    isp: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    private: bool,
}

impl PostgresGeoCacheRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GeoCacheRepository for PostgresGeoCacheRepository {
    async fn get_fresh(
        &self,
        ip: &str,
        ttl: Duration,
    ) -> Result<Option<GeoResult>> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| {
            MonitorError::Internal(format!("geo TTL out of range: {e}"))
        })?;
        let cutoff = Utc::now() - ttl;
        let row: Option<GeoRow> = sqlx::query_as(
            r#"
            SELECT ip, city, country, isp, latitude, longitude, private
            FROM geo_cache
            WHERE ip = $1 AND resolved_at >= $2
            "#,
        )
        .bind(ip)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| GeoResult {
            ip: r.ip,
            city: r.city,
            country: r.country,
            isp: r.isp,
            latitude: r.latitude,
            longitude: r.longitude,
            private: r.private,
        }))
    }

    async fn upsert(&self, result: &GeoResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO geo_cache
                (ip, city, country, isp, latitude, longitude, private, resolved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (ip) DO UPDATE
            SET city = EXCLUDED.city,
                country = EXCLUDED.country,
                isp = EXCLUDED.isp,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                private = EXCLUDED.private,
                resolved_at = EXCLUDED.resolved_at
            "#,
        )
        .bind(&result.ip)
        .bind(&result.city)
        .bind(&result.country)
        .bind(&result.isp)
        .bind(result.latitude)
        .bind(result.longitude)
        .bind(result.private)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PostgresHouseholdRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct HouseholdRow {
    id: Uuid,
    user_name: String,
    ip_address: Option<String>,
    city: Option<String>,
    country: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    session_count: i64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    auto_learned: bool,
    trusted: bool,
}

impl HouseholdRow {
    fn into_location(self) -> HouseholdLocation {
        HouseholdLocation {
            id: self.id,
            user_name: self.user_name,
            ip_address: self.ip_address,
            city: self.city,
            country: self.country,
            latitude: self.latitude,
            longitude: self.longitude,
            session_count: self.session_count,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            auto_learned: self.auto_learned,
            trusted: self.trusted,
        }
    }
}

const HOUSEHOLD_SELECT: &str = r#"
    SELECT id, user_name, ip_address, city, country, latitude, longitude,
           session_count, first_seen, last_seen, auto_learned, trusted
    FROM household_locations
"#;

impl PostgresHouseholdRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HouseholdRepository for PostgresHouseholdRepository {
    async fn list_for_user(
        &self,
        user_name: &str,
    ) -> Result<Vec<HouseholdLocation>> {
        let rows: Vec<HouseholdRow> = sqlx::query_as(&format!(
            "{HOUSEHOLD_SELECT} WHERE user_name = $1 ORDER BY last_seen DESC"
        ))
        .bind(user_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(HouseholdRow::into_location).collect())
    }

    async fn list(&self) -> Result<Vec<HouseholdLocation>> {
        let rows: Vec<HouseholdRow> = sqlx::query_as(&format!(
            "{HOUSEHOLD_SELECT} ORDER BY user_name, last_seen DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(HouseholdRow::into_location).collect())
    }

    async fn get_by_user_ip(
        &self,
        user_name: &str,
        ip: &str,
    ) -> Result<Option<HouseholdLocation>> {
        let row: Option<HouseholdRow> = sqlx::query_as(&format!(
            "{HOUSEHOLD_SELECT} WHERE user_name = $1 AND ip_address = $2"
        ))
        .bind(user_name)
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(HouseholdRow::into_location))
    }

    async fn insert(&self, location: &HouseholdLocation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO household_locations
                (id, user_name, ip_address, city, country, latitude,
                 longitude, session_count, first_seen, last_seen,
                 auto_learned, trusted)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (user_name, ip_address) DO NOTHING
            "#,
        )
        .bind(location.id)
        .bind(&location.user_name)
        .bind(&location.ip_address)
        .bind(&location.city)
        .bind(&location.country)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.session_count)
        .bind(location.first_seen)
        .bind(location.last_seen)
        .bind(location.auto_learned)
        .bind(location.trusted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch(
        &self,
        id: Uuid,
        session_count: i64,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE household_locations
            SET session_count = $2, last_seen = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(session_count)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_trusted(&self, id: Uuid, trusted: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE household_locations SET trusted = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(trusted)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!(
                "household location {id}"
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM household_locations WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!(
                "household location {id}"
            )));
        }
        Ok(())
    }

    async fn user_ip_groups(
        &self,
        min_sessions: i64,
    ) -> Result<Vec<UserIpGroup>> {
        #[derive(sqlx::FromRow)]
        struct GroupRow {
            user_name: String,
            ip_address: String,
            session_count: i64,
            first_seen: DateTime<Utc>,
            last_seen: DateTime<Utc>,
        }

        let rows: Vec<GroupRow> = sqlx::query_as(
            r#"
            SELECT user_name, ip_address,
                   COUNT(*) AS session_count,
                   MIN(started_at) AS first_seen,
                   MAX(stopped_at) AS last_seen
            FROM watch_history
            WHERE ip_address <> ''
            GROUP BY user_name, ip_address
            HAVING COUNT(*) >= $1
            "#,
        )
        .bind(min_sessions)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| UserIpGroup {
                user_name: r.user_name,
                ip_address: r.ip_address,
                session_count: r.session_count,
                first_seen: r.first_seen,
                last_seen: r.last_seen,
            })
            .collect())
    }
}
