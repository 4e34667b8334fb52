//! Knowledge index backed by Postgres + pgvector
//!
//! Expects a table with columns `text`, `embedding vector(N)`, `category`,
//! `state`, `disaster_type`, `source` and `embedding_model`.

use super::{Category, ChunkMetadata, FilterClause, IndexHit, KnowledgeIndex, MetadataFilter};
use crate::config::KnowledgeConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, QueryResult, Statement};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &KnowledgeConfig) -> Result<Self> {
        let url = config.database_url.as_deref().ok_or_else(|| AppError::Configuration {
            message: "knowledge.database_url is required for the pgvector backend".to_string(),
        })?;

        info!("Connecting to knowledge database...");

        let mut opts = ConnectOptions::new(url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Knowledge database connection established");
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// pgvector-backed index; the chunk count is read once at connect
pub struct PgVectorIndex {
    pool: DbPool,
    table: String,
    embedding_model: String,
    dimension: usize,
    count: usize,
}

fn valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(",")
    )
}

/// WHERE fragment and bind values for a filter; placeholders start at `$first`
fn filter_sql(filter: &MetadataFilter, first: usize) -> (String, Vec<sea_orm::Value>) {
    let mut clauses = Vec::with_capacity(filter.any_of.len());
    let mut values: Vec<sea_orm::Value> = Vec::with_capacity(filter.any_of.len());

    for (offset, clause) in filter.any_of.iter().enumerate() {
        let placeholder = first + offset;
        let (column, value) = match clause {
            FilterClause::State(state) => ("state", state.clone()),
            FilterClause::DisasterType(disaster) => ("disaster_type", disaster.clone()),
            FilterClause::Category(category) => ("category", category.as_str().to_string()),
        };
        clauses.push(format!("{} = ${}", column, placeholder));
        values.push(value.into());
    }

    if clauses.is_empty() {
        return (String::new(), values);
    }
    (format!("WHERE ({})", clauses.join(" OR ")), values)
}

impl PgVectorIndex {
    /// Connect and verify the table was built with the configured embedder
    pub async fn connect(pool: DbPool, table: &str, embedding_model: &str, dimension: usize) -> Result<Self> {
        if !valid_identifier(table) {
            return Err(AppError::Configuration {
                message: format!("invalid knowledge table name '{}'", table),
            });
        }

        let stats_sql = format!(
            "SELECT COUNT(*)::bigint AS chunks, \
             COUNT(DISTINCT embedding_model)::bigint AS models, \
             MIN(embedding_model) AS model, \
             MIN(vector_dims(embedding))::bigint AS dims \
             FROM {}",
            table
        );
        let row = pool
            .conn()
            .query_one(Statement::from_string(DbBackend::Postgres, stats_sql))
            .await?
            .ok_or_else(|| AppError::Index {
                message: format!("no statistics returned for table {}", table),
            })?;

        let count: i64 = row.try_get("", "chunks")?;
        let models: i64 = row.try_get("", "models")?;
        let model: Option<String> = row.try_get("", "model")?;
        let dims: Option<i64> = row.try_get("", "dims")?;

        if count > 0 {
            let stored_model = model.unwrap_or_default();
            let stored_dims = dims.unwrap_or_default() as usize;
            if models != 1 || stored_model != embedding_model || stored_dims != dimension {
                return Err(AppError::Configuration {
                    message: format!(
                        "embedding model mismatch: table {} holds {} model(s), '{}' ({} dims); configured '{}' ({} dims)",
                        table, models, stored_model, stored_dims, embedding_model, dimension
                    ),
                });
            }
        }

        info!(table = %table, chunks = count, "pgvector knowledge index ready");

        Ok(Self {
            pool,
            table: table.to_string(),
            embedding_model: embedding_model.to_string(),
            dimension,
            count: count.max(0) as usize,
        })
    }

    fn hit_from_row(row: &QueryResult) -> Result<IndexHit> {
        let tag: String = row.try_get("", "category")?;
        let category = Category::parse(&tag).ok_or_else(|| AppError::Index {
            message: format!("unknown chunk category '{}'", tag),
        })?;

        Ok(IndexHit {
            text: row.try_get("", "text")?,
            metadata: ChunkMetadata {
                category,
                state: row.try_get("", "state")?,
                disaster_type: row.try_get("", "disaster_type")?,
                source: row.try_get("", "source")?,
            },
            distance: row.try_get("", "distance")?,
        })
    }
}

#[async_trait]
impl KnowledgeIndex for PgVectorIndex {
    async fn query(&self, embedding: &[f32], filter: Option<&MetadataFilter>, k: usize) -> Result<Vec<IndexHit>> {
        let (where_clause, filter_values) = match filter {
            Some(filter) => filter_sql(filter, 3),
            None => (String::new(), Vec::new()),
        };

        let sql = format!(
            r#"
            SELECT
                text,
                category,
                state,
                disaster_type,
                source,
                (embedding <=> $1::vector)::float8 AS distance
            FROM {}
            {}
            ORDER BY embedding <=> $1::vector
            LIMIT $2
            "#,
            self.table, where_clause
        );

        let mut values: Vec<sea_orm::Value> = vec![vector_literal(embedding).into(), (k as i64).into()];
        values.extend(filter_values);

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);
        let rows = self.pool.conn().query_all(stmt).await?;

        rows.iter().map(Self::hit_from_row).collect()
    }

    fn len(&self) -> usize {
        self.count
    }

    fn backend(&self) -> &'static str {
        "pgvector"
    }

    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_sql_placeholders() {
        let filter = MetadataFilter {
            any_of: vec![
                FilterClause::State("CA".into()),
                FilterClause::DisasterType("fire".into()),
                FilterClause::Category(Category::Fema),
            ],
        };
        let (sql, values) = filter_sql(&filter, 3);
        assert_eq!(sql, "WHERE (state = $3 OR disaster_type = $4 OR category = $5)");
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_table_name_validation() {
        assert!(valid_identifier("knowledge_chunks"));
        assert!(valid_identifier("_kb2"));
        assert!(!valid_identifier("chunks; DROP TABLE x"));
        assert!(!valid_identifier("Chunks"));
        assert!(!valid_identifier(""));
    }

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[0.5, -1.0, 2.0]), "[0.5,-1,2]");
    }
}
