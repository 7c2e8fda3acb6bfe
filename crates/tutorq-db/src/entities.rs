//! Generated entity table written by batch reconciliation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use tutorq_core::{EntitySink, Error, MaterializedEntity, NewEntity, Result};

/// PostgreSQL implementation of [`EntitySink`] over `generated_entity`.
#[derive(Clone)]
pub struct PgEntitySink {
    pool: Pool<Postgres>,
}

impl PgEntitySink {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitySink for PgEntitySink {
    async fn materialize(&self, entity: NewEntity) -> Result<MaterializedEntity> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            "INSERT INTO generated_entity (id, job_id, item_index, tenant_id, creator_id, kind, content)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (job_id, item_index) DO NOTHING
             RETURNING id",
        )
        .bind(Uuid::now_v7())
        .bind(entity.job_id)
        .bind(entity.item_index)
        .bind(entity.tenant_id)
        .bind(entity.creator_id)
        .bind(&entity.kind)
        .bind(&entity.content)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if let Some(id) = inserted {
            return Ok(MaterializedEntity { id, created: true });
        }

        let id: Uuid = sqlx::query_scalar(
            "SELECT id FROM generated_entity WHERE job_id = $1 AND item_index = $2",
        )
        .bind(entity.job_id)
        .bind(entity.item_index)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(MaterializedEntity { id, created: false })
    }

    async fn count_for_job(&self, job_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM generated_entity WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }
}
