use chrono::{DateTime, Duration, Utc};
use sea_query::{Cond, Expr, Iden, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{from_json, to_json, Error, Result, SqliteStore};
use crate::core::{Connection, ConnectionStatus};

#[derive(Iden)]
enum Connections {
    Table,
    Id,
    TenantId,
    RequisitionId,
    InstitutionId,
    Name,
    Status,
    AccessValidUntil,
    InstitutionLogoUrl,
    InstitutionCountry,
    RawPayload,
    RawInstitutionPayload,
    ScheduledForDeletion,
    SyncLeaseExpiresAt,
    CreatedAt,
    UpdatedAt,
}

const COLUMNS: [Connections; 12] = [
    Connections::Id,
    Connections::TenantId,
    Connections::RequisitionId,
    Connections::InstitutionId,
    Connections::Name,
    Connections::Status,
    Connections::AccessValidUntil,
    Connections::InstitutionLogoUrl,
    Connections::InstitutionCountry,
    Connections::RawPayload,
    Connections::RawInstitutionPayload,
    Connections::ScheduledForDeletion,
];

pub struct Store<'a>(&'a SqliteStore);

impl<'a> Store<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self(store)
    }

    pub async fn save(&self, conn: &Connection) -> Result<()> {
        let now = Utc::now();
        let (query, values) = Query::insert()
            .into_table(Connections::Table)
            .columns(
                COLUMNS
                    .into_iter()
                    .chain([Connections::CreatedAt, Connections::UpdatedAt]),
            )
            .values_panic(vec![
                conn.id.as_str().into(),
                conn.tenant_id.as_str().into(),
                conn.requisition_id.as_str().into(),
                conn.institution_id.as_str().into(),
                conn.name.as_str().into(),
                conn.status.as_str().into(),
                conn.access_valid_until.into(),
                conn.institution_logo_url.as_deref().into(),
                conn.institution_country.as_deref().into(),
                to_json(&conn.raw_payload)?.into(),
                to_json(&conn.raw_institution_payload)?.into(),
                conn.scheduled_for_deletion.into(),
                now.into(),
                now.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values)
            .execute(self.0.conn.as_ref())
            .await?;

        Ok(())
    }

    /// Writes everything a sync or a reconnect may change. The deletion flag
    /// and the sync lease have their own writers.
    pub async fn update(&self, conn: &Connection) -> Result<()> {
        let (query, values) = Query::update()
            .table(Connections::Table)
            .values(vec![
                (Connections::RequisitionId, conn.requisition_id.as_str().into()),
                (Connections::Name, conn.name.as_str().into()),
                (Connections::Status, conn.status.as_str().into()),
                (Connections::AccessValidUntil, conn.access_valid_until.into()),
                (
                    Connections::InstitutionLogoUrl,
                    conn.institution_logo_url.as_deref().into(),
                ),
                (
                    Connections::InstitutionCountry,
                    conn.institution_country.as_deref().into(),
                ),
                (Connections::RawPayload, to_json(&conn.raw_payload)?.into()),
                (
                    Connections::RawInstitutionPayload,
                    to_json(&conn.raw_institution_payload)?.into(),
                ),
                (Connections::UpdatedAt, Utc::now().into()),
            ])
            .and_where(Expr::col(Connections::Id).eq(conn.id.as_str()))
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&query, values)
            .execute(self.0.conn.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("connection {}", conn.id)));
        }

        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: ConnectionStatus) -> Result<()> {
        let (query, values) = Query::update()
            .table(Connections::Table)
            .values(vec![
                (Connections::Status, status.as_str().into()),
                (Connections::UpdatedAt, Utc::now().into()),
            ])
            .and_where(Expr::col(Connections::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values)
            .execute(self.0.conn.as_ref())
            .await?;

        Ok(())
    }

    pub async fn mark_for_deletion(&self, id: &str) -> Result<()> {
        let (query, values) = Query::update()
            .table(Connections::Table)
            .values(vec![
                (Connections::ScheduledForDeletion, true.into()),
                (Connections::UpdatedAt, Utc::now().into()),
            ])
            .and_where(Expr::col(Connections::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&query, values)
            .execute(self.0.conn.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("connection {}", id)));
        }

        Ok(())
    }

    pub async fn by_id(&self, id: &str) -> Result<Connection> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("connection {}", id)))
    }

    pub async fn find(&self, id: &str) -> Result<Option<Connection>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(Connections::Table)
            .and_where(Expr::col(Connections::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&query, values)
            .fetch_optional(self.0.conn.as_ref())
            .await?;

        Ok(row.map(|row| Connection::from_row(&row)).transpose()?)
    }

    pub async fn by_requisition(&self, requisition_id: &str) -> Result<Option<Connection>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(Connections::Table)
            .and_where(Expr::col(Connections::RequisitionId).eq(requisition_id))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&query, values)
            .fetch_optional(self.0.conn.as_ref())
            .await?;

        Ok(row.map(|row| Connection::from_row(&row)).transpose()?)
    }

    pub async fn list(&self) -> Result<Vec<Connection>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(Connections::Table)
            .order_by(Connections::CreatedAt, Order::Desc)
            .build_sqlx(SqliteQueryBuilder);

        self.fetch(&query, values).await
    }

    /// Connections that are not on their way out.
    pub async fn active(&self) -> Result<Vec<Connection>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(Connections::Table)
            .and_where(Expr::col(Connections::ScheduledForDeletion).eq(false))
            .order_by(Connections::CreatedAt, Order::Desc)
            .build_sqlx(SqliteQueryBuilder);

        self.fetch(&query, values).await
    }

    /// Connections the user has to consent to again.
    pub async fn needs_reauth(&self) -> Result<Vec<Connection>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(Connections::Table)
            .and_where(Expr::col(Connections::Status).is_in([
                ConnectionStatus::Expired.as_str(),
                ConnectionStatus::Suspended.as_str(),
            ]))
            .build_sqlx(SqliteQueryBuilder);

        self.fetch(&query, values).await
    }

    /// Takes the sync lease for a connection unless someone else holds an
    /// unexpired one. Returns whether the lease was acquired.
    pub async fn acquire_lease(&self, id: &str, now: DateTime<Utc>, ttl: Duration) -> Result<bool> {
        let (query, values) = Query::update()
            .table(Connections::Table)
            .values(vec![(
                Connections::SyncLeaseExpiresAt,
                (now + ttl).timestamp().into(),
            )])
            .cond_where(
                Cond::all().add(Expr::col(Connections::Id).eq(id)).add(
                    Cond::any()
                        .add(Expr::col(Connections::SyncLeaseExpiresAt).is_null())
                        .add(Expr::col(Connections::SyncLeaseExpiresAt).lte(now.timestamp())),
                ),
            )
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&query, values)
            .execute(self.0.conn.as_ref())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn release_lease(&self, id: &str) -> Result<()> {
        let (query, values) = Query::update()
            .table(Connections::Table)
            .values(vec![(
                Connections::SyncLeaseExpiresAt,
                Option::<i64>::None.into(),
            )])
            .and_where(Expr::col(Connections::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values)
            .execute(self.0.conn.as_ref())
            .await?;

        Ok(())
    }

    /// Removes the connection row; linked accounts go with it.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let (query, values) = Query::delete()
            .from_table(Connections::Table)
            .and_where(Expr::col(Connections::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&query, values)
            .execute(self.0.conn.as_ref())
            .await?;

        Ok(())
    }

    async fn fetch(
        &self,
        query: &str,
        values: sea_query_binder::SqlxValues,
    ) -> Result<Vec<Connection>> {
        let rows = sqlx::query_with(query, values)
            .fetch_all(self.0.conn.as_ref())
            .await?;

        let mut conns = Vec::with_capacity(rows.len());
        for row in rows {
            conns.push(Connection::from_row(&row)?);
        }

        Ok(conns)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Connection {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let raw_payload: String = row.try_get("raw_payload")?;
        let raw_institution_payload: String = row.try_get("raw_institution_payload")?;

        Ok(Connection {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            requisition_id: row.try_get("requisition_id")?,
            institution_id: row.try_get("institution_id")?,
            name: row.try_get("name")?,
            status: status.parse().map_err(|e: anyhow::Error| decode_error("status", e))?,
            access_valid_until: row.try_get("access_valid_until")?,
            institution_logo_url: row.try_get("institution_logo_url")?,
            institution_country: row.try_get("institution_country")?,
            raw_payload: from_json(&raw_payload).map_err(|e| decode_error("raw_payload", e))?,
            raw_institution_payload: from_json(&raw_institution_payload)
                .map_err(|e| decode_error("raw_institution_payload", e))?,
            scheduled_for_deletion: row.try_get("scheduled_for_deletion")?,
        })
    }
}

pub(crate) fn decode_error<E>(column: &str, err: E) -> sqlx::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: err.into(),
    }
}
