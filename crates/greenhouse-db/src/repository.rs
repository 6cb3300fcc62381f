//! `PostgreSQL` implementation of the core persistence interfaces.
//!
//! [`PgRepository`] reads the species and plant tables into a [`Catalog`],
//! updates the water level and liveness of a plant after every committed
//! mutation, and appends audit entries to the `logs` table. Creating,
//! renaming and deleting plants is left to the CRUD layer that owns the
//! tables; [`PgRepository::insert_plant`] exists for seeding.

use futures::future::BoxFuture;
use greenhouse_core::{AuditLog, PersistError, PlantRepository};
use greenhouse_types::{AuditEntry, Catalog, Plant, PlantId, Species, UserId, clamp_water};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;
use crate::postgres::PostgresPool;

/// A row from the `species` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SpeciesRow {
    /// Species id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Water lost per tick.
    pub decay_rate: Decimal,
}

impl From<SpeciesRow> for Species {
    fn from(row: SpeciesRow) -> Self {
        Self {
            id: row.id.into(),
            name: row.name,
            decay_rate: row.decay_rate,
        }
    }
}

/// A row from the `plants` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlantRow {
    /// Plant id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Owning user, if any.
    pub owner_id: Option<Uuid>,
    /// Species the plant belongs to.
    pub species_id: Uuid,
    /// Stored water level.
    pub current_water: Decimal,
    /// Whether the plant has died.
    pub is_dead: bool,
}

impl From<PlantRow> for Plant {
    fn from(row: PlantRow) -> Self {
        Self {
            id: row.id.into(),
            name: row.name,
            owner: row.owner_id.map(Into::into),
            species_id: row.species_id.into(),
            current_water: clamp_water(row.current_water),
            is_dead: row.is_dead,
        }
    }
}

const SELECT_ALL_PLANTS: &str = r"SELECT id, name, owner_id, species_id, current_water, is_dead
    FROM plants ORDER BY id";

const SELECT_PLANT: &str = r"SELECT id, name, owner_id, species_id, current_water, is_dead
    FROM plants WHERE id = $1";

/// Plant repository and audit log backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Create a repository over an existing pool.
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool().clone(),
        }
    }

    /// Insert a species, or update its rate if the name already exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails.
    pub async fn upsert_species(&self, species: &Species) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO species (id, name, decay_rate)
              VALUES ($1, $2, $3)
              ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, decay_rate = EXCLUDED.decay_rate",
        )
        .bind(species.id.into_inner())
        .bind(&species.name)
        .bind(species.decay_rate)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of rows in the `species` table.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn species_count(&self) -> Result<u64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM species")
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(count).map_err(|e| DbError::InvalidRow(format!("negative count: {e}")))
    }

    /// Write a species and plant catalog, typically the configured seed.
    ///
    /// Runs in one transaction so a partial seed is never visible.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if any statement fails.
    pub async fn seed(&self, catalog: &Catalog) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for species in &catalog.species {
            sqlx::query(
                r"INSERT INTO species (id, name, decay_rate) VALUES ($1, $2, $3)
                  ON CONFLICT DO NOTHING",
            )
            .bind(species.id.into_inner())
            .bind(&species.name)
            .bind(species.decay_rate)
            .execute(&mut *tx)
            .await?;
        }
        for plant in &catalog.plants {
            insert_plant_row(&mut *tx, plant).await?;
        }
        tx.commit().await?;
        tracing::info!(
            species = catalog.species.len(),
            plants = catalog.plants.len(),
            "Seeded greenhouse catalog"
        );
        Ok(())
    }

    /// Create a plant record. An existing record with the same id is left
    /// untouched; returns whether a row was inserted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails.
    pub async fn insert_plant(&self, plant: &Plant) -> Result<bool, DbError> {
        insert_plant_row(&self.pool, plant).await
    }

    /// Update water and liveness. `Ok(false)` means no row has this id.
    async fn update_water(&self, plant: &Plant) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"UPDATE plants
              SET current_water = $2, is_dead = $3, updated_at = now()
              WHERE id = $1",
        )
        .bind(plant.id.into_inner())
        .bind(plant.current_water)
        .bind(plant.is_dead)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn catalog(&self) -> Result<Catalog, DbError> {
        let species = sqlx::query_as::<_, SpeciesRow>(
            "SELECT id, name, decay_rate FROM species ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        let plants = sqlx::query_as::<_, PlantRow>(SELECT_ALL_PLANTS)
            .fetch_all(&self.pool)
            .await?;
        Ok(Catalog {
            species: species.into_iter().map(Species::from).collect(),
            plants: plants.into_iter().map(Plant::from).collect(),
        })
    }

    async fn plant(&self, id: PlantId) -> Result<Option<Plant>, DbError> {
        let row = sqlx::query_as::<_, PlantRow>(SELECT_PLANT)
            .bind(id.into_inner())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Plant::from))
    }

    async fn insert_log(&self, entry: &AuditEntry) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO logs (id, message, level, plant_id, created_at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.id.into_inner())
        .bind(&entry.message)
        .bind(entry.level.as_str())
        .bind(entry.plant_id.map(PlantId::into_inner))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn insert_plant_row<'e, E>(executor: E, plant: &Plant) -> Result<bool, DbError>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        r"INSERT INTO plants (id, name, owner_id, species_id, current_water, is_dead)
          VALUES ($1, $2, $3, $4, $5, $6)
          ON CONFLICT (id) DO NOTHING",
    )
    .bind(plant.id.into_inner())
    .bind(&plant.name)
    .bind(plant.owner.map(UserId::into_inner))
    .bind(plant.species_id.into_inner())
    .bind(plant.current_water)
    .bind(plant.is_dead)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

impl PlantRepository for PgRepository {
    fn load_catalog(&self) -> BoxFuture<'_, Result<Catalog, PersistError>> {
        Box::pin(async move { Ok(self.catalog().await?) })
    }

    fn fetch_plant(&self, id: PlantId) -> BoxFuture<'_, Result<Option<Plant>, PersistError>> {
        Box::pin(async move { Ok(self.plant(id).await?) })
    }

    fn save_plant<'a>(&'a self, plant: &'a Plant) -> BoxFuture<'a, Result<(), PersistError>> {
        Box::pin(async move {
            if self.update_water(plant).await? {
                Ok(())
            } else {
                Err(PersistError::Missing(plant.id))
            }
        })
    }
}

impl AuditLog for PgRepository {
    fn record<'a>(&'a self, entry: &'a AuditEntry) -> BoxFuture<'a, Result<(), PersistError>> {
        Box::pin(async move { Ok(self.insert_log(entry).await?) })
    }
}

#[cfg(test)]
mod tests {
    use greenhouse_types::MAX_WATER;

    use super::*;

    #[test]
    fn plant_row_maps_and_clamps_water() {
        let row = PlantRow {
            id: Uuid::now_v7(),
            name: String::from("My Tomato"),
            owner_id: None,
            species_id: Uuid::now_v7(),
            current_water: Decimal::new(120, 0),
            is_dead: false,
        };
        let id = row.id;
        let plant = Plant::from(row);
        assert_eq!(plant.id.into_inner(), id);
        assert_eq!(plant.current_water, MAX_WATER);
        assert!(plant.owner.is_none());
    }

    #[test]
    fn species_row_maps() {
        let row = SpeciesRow {
            id: Uuid::now_v7(),
            name: String::from("Cactus"),
            decay_rate: Decimal::new(5, 1),
        };
        let species = Species::from(row);
        assert_eq!(species.name, "Cactus");
        assert_eq!(species.decay_rate, Decimal::new(5, 1));
    }
}
