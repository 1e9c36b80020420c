// Durable filter catalog backed by SQLite

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::core::errors::BridgeError;
use crate::utils::time::iso_timestamp;

/// Filter kind: record filters drop rows, field filters reshape them,
/// chains compose other filters in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Record,
    Field,
    Chain,
}

impl FilterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Field => "field",
            Self::Chain => "chain",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "record" => Some(Self::Record),
            "field" => Some(Self::Field),
            "chain" => Some(Self::Chain),
            _ => None,
        }
    }
}

/// Declared parameter types for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Date,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterExample {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterTestCase {
    #[serde(default)]
    pub name: String,
    pub input: Value,
    pub expected: Value,
}

/// A complete filter definition with all related rows loaded.
#[derive(Debug, Clone, Serialize)]
pub struct FilterDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub kind: FilterKind,
    pub expression: String,
    pub author: String,
    pub version: String,
    pub active: bool,
    pub estimated_reduction_percent: Option<i64>,
    pub endpoints: Vec<String>,
    pub parameters: Vec<FilterParameter>,
    pub examples: Vec<FilterExample>,
    pub tags: Vec<String>,
    pub tests: Vec<FilterTestCase>,
    /// Ordered step ids; non-empty only for chains.
    pub chain_steps: Vec<String>,
}

/// Seed/import document format. `filters` and `chains` are both lists of
/// definitions; the split only exists so chains can be grouped in seed files.
#[derive(Debug, Deserialize)]
pub struct SeedDocument {
    #[serde(default)]
    pub filters: Vec<SeedFilter>,
    #[serde(default)]
    pub chains: Vec<SeedFilter>,
}

#[derive(Debug, Deserialize)]
pub struct SeedFilter {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub kind: FilterKind,
    #[serde(default)]
    pub expression: String,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub estimated_reduction_percent: Option<i64>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<FilterParameter>,
    #[serde(default)]
    pub examples: Vec<FilterExample>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tests: Vec<FilterTestCase>,
    #[serde(default)]
    pub chain_steps: Vec<String>,
}

fn default_author() -> String {
    "system".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Search criteria; every field is optional and they compose with AND.
#[derive(Debug, Clone, Default)]
pub struct FilterSearch {
    pub endpoint: Option<String>,
    pub category: Option<String>,
    pub kind: Option<FilterKind>,
    pub search_term: Option<String>,
}

const SCHEMA_VERSION: i64 = 2;

/// Ordered, idempotent migrations applied on open.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_catalog_schema",
        r#"
        CREATE TABLE IF NOT EXISTS filters (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT '',
            kind TEXT NOT NULL CHECK (kind IN ('record', 'field', 'chain')),
            expression TEXT NOT NULL DEFAULT '',
            author TEXT NOT NULL DEFAULT 'system',
            version TEXT NOT NULL DEFAULT '1.0.0',
            is_active INTEGER NOT NULL DEFAULT 1,
            estimated_reduction_percent INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS filter_endpoints (
            filter_id TEXT NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
            endpoint_name TEXT NOT NULL,
            PRIMARY KEY (filter_id, endpoint_name)
        );
        CREATE TABLE IF NOT EXISTS filter_parameters (
            filter_id TEXT NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            parameter_name TEXT NOT NULL,
            parameter_type TEXT NOT NULL,
            default_value TEXT,
            is_required INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (filter_id, parameter_name)
        );
        CREATE TABLE IF NOT EXISTS filter_examples (
            filter_id TEXT NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
            example_name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            parameters TEXT NOT NULL DEFAULT '{}'
        );
        CREATE TABLE IF NOT EXISTS filter_tags (
            filter_id TEXT NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
            tag TEXT NOT NULL,
            PRIMARY KEY (filter_id, tag)
        );
        CREATE TABLE IF NOT EXISTS filter_tests (
            filter_id TEXT NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
            test_name TEXT NOT NULL DEFAULT '',
            input_json TEXT NOT NULL,
            expected_json TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS filter_chains (
            chain_filter_id TEXT NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
            step_order INTEGER NOT NULL,
            step_filter_id TEXT NOT NULL,
            PRIMARY KEY (chain_filter_id, step_order)
        );
        "#,
    ),
    (
        "0002_metadata",
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    ),
];

/// The catalog store. Reads are cached (read-mostly workload); writes are
/// limited to seed imports, which invalidate the cache wholesale.
pub struct FilterCatalog {
    pool: SqlitePool,
    by_id: Cache<String, Arc<FilterDefinition>>,
}

impl FilterCatalog {
    /// Open (creating if missing), migrate, and return the catalog.
    pub async fn open(path: &Path) -> Result<Self, BridgeError> {
        let in_memory = path.to_str() == Some(":memory:");
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            // a shared in-memory database needs a single connection
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .map_err(|e| store_error("open", e))?;

        let catalog = Self {
            pool,
            by_id: Cache::builder().max_capacity(1_000).build(),
        };
        catalog.migrate().await?;
        Ok(catalog)
    }

    /// In-memory catalog for tests.
    pub async fn open_in_memory() -> Result<Self, BridgeError> {
        Self::open(Path::new(":memory:")).await
    }

    async fn migrate(&self) -> Result<(), BridgeError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL UNIQUE,
                executed_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("create migrations table", e))?;

        let executed: HashSet<String> = sqlx::query("SELECT filename FROM migrations")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("read migrations", e))?
            .into_iter()
            .map(|row| row.get::<String, _>("filename"))
            .collect();

        for (name, sql) in MIGRATIONS.iter().copied() {
            if executed.contains(name) {
                continue;
            }
            debug!(migration = name, "applying catalog migration");
            sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| store_error(name, e))?;
            sqlx::query("INSERT INTO migrations (filename) VALUES (?1)")
                .bind(name)
                .execute(&self.pool)
                .await
                .map_err(|e| store_error("record migration", e))?;
        }

        sqlx::query(
            "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(SCHEMA_VERSION.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("record schema version", e))?;

        Ok(())
    }

    /// Whether seed content has already been imported.
    pub async fn is_seeded(&self) -> Result<bool, BridgeError> {
        let row = sqlx::query("SELECT value FROM metadata WHERE key = 'seeded_at'")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("read seed marker", e))?;
        Ok(row.is_some())
    }

    pub async fn mark_seeded(&self) -> Result<(), BridgeError> {
        sqlx::query(
            "INSERT INTO metadata (key, value) VALUES ('seeded_at', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(iso_timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("record seed marker", e))?;
        Ok(())
    }

    /// Import a seed document. Upserts by id, so re-imports are idempotent.
    /// Chain integrity (resolvable non-chain steps, no cycles) is verified
    /// before commit; a violation rolls the whole document back.
    pub async fn import_document(&self, doc: &SeedDocument) -> Result<usize, BridgeError> {
        let mut tx = self.pool.begin().await.map_err(|e| store_error("begin", e))?;
        let mut count = 0usize;

        for seed in doc.filters.iter().chain(doc.chains.iter()) {
            Self::validate_seed(seed)?;
            Self::upsert(&mut tx, seed).await?;
            count += 1;
        }

        Self::verify_chain_integrity(&mut tx).await?;

        tx.commit().await.map_err(|e| store_error("commit", e))?;
        self.by_id.invalidate_all();
        info!(imported = count, "filter catalog import complete");
        Ok(count)
    }

    fn validate_seed(seed: &SeedFilter) -> Result<(), BridgeError> {
        if seed.id.trim().is_empty() {
            return Err(BridgeError::invalid_input("filter id is required"));
        }
        match seed.kind {
            FilterKind::Chain => {
                if seed.chain_steps.is_empty() {
                    return Err(BridgeError::invalid_input(format!(
                        "chain filter '{}' must declare steps",
                        seed.id
                    )));
                }
            }
            _ => {
                if seed.expression.trim().is_empty() {
                    return Err(BridgeError::invalid_input(format!(
                        "filter '{}' must declare an expression",
                        seed.id
                    )));
                }
            }
        }
        Ok(())
    }

    async fn upsert(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        seed: &SeedFilter,
    ) -> Result<(), BridgeError> {
        sqlx::query(
            "INSERT INTO filters
                 (id, name, description, category, kind, expression, author, version,
                  is_active, estimated_reduction_percent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 category = excluded.category,
                 kind = excluded.kind,
                 expression = excluded.expression,
                 author = excluded.author,
                 version = excluded.version,
                 is_active = 1,
                 estimated_reduction_percent = excluded.estimated_reduction_percent,
                 updated_at = datetime('now')",
        )
        .bind(&seed.id)
        .bind(&seed.name)
        .bind(&seed.description)
        .bind(&seed.category)
        .bind(seed.kind.as_str())
        .bind(&seed.expression)
        .bind(&seed.author)
        .bind(&seed.version)
        .bind(seed.estimated_reduction_percent)
        .execute(&mut **tx)
        .await
        .map_err(|e| store_error("upsert filter", e))?;

        for table in [
            "filter_endpoints",
            "filter_parameters",
            "filter_examples",
            "filter_tags",
            "filter_tests",
            "filter_chains",
        ] {
            let column = if table == "filter_chains" {
                "chain_filter_id"
            } else {
                "filter_id"
            };
            sqlx::query(&format!("DELETE FROM {} WHERE {} = ?1", table, column))
                .bind(&seed.id)
                .execute(&mut **tx)
                .await
                .map_err(|e| store_error("clear related rows", e))?;
        }

        for endpoint in &seed.endpoints {
            sqlx::query("INSERT INTO filter_endpoints (filter_id, endpoint_name) VALUES (?1, ?2)")
                .bind(&seed.id)
                .bind(endpoint)
                .execute(&mut **tx)
                .await
                .map_err(|e| store_error("insert endpoint", e))?;
        }

        for (position, param) in seed.parameters.iter().enumerate() {
            let default_json = match &param.default {
                Some(value) => Some(
                    serde_json::to_string(value)
                        .map_err(|e| BridgeError::Internal(format!("encode default: {}", e)))?,
                ),
                None => None,
            };
            sqlx::query(
                "INSERT INTO filter_parameters
                     (filter_id, position, parameter_name, parameter_type,
                      default_value, is_required, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&seed.id)
            .bind(position as i64)
            .bind(&param.name)
            .bind(param.param_type.as_str())
            .bind(default_json)
            .bind(param.required as i64)
            .bind(&param.description)
            .execute(&mut **tx)
            .await
            .map_err(|e| store_error("insert parameter", e))?;
        }

        for example in &seed.examples {
            sqlx::query(
                "INSERT INTO filter_examples (filter_id, example_name, description, parameters)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&seed.id)
            .bind(&example.name)
            .bind(&example.description)
            .bind(example.parameters.to_string())
            .execute(&mut **tx)
            .await
            .map_err(|e| store_error("insert example", e))?;
        }

        for tag in &seed.tags {
            sqlx::query("INSERT INTO filter_tags (filter_id, tag) VALUES (?1, ?2)")
                .bind(&seed.id)
                .bind(tag)
                .execute(&mut **tx)
                .await
                .map_err(|e| store_error("insert tag", e))?;
        }

        for test in &seed.tests {
            sqlx::query(
                "INSERT INTO filter_tests (filter_id, test_name, input_json, expected_json)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&seed.id)
            .bind(&test.name)
            .bind(test.input.to_string())
            .bind(test.expected.to_string())
            .execute(&mut **tx)
            .await
            .map_err(|e| store_error("insert test", e))?;
        }

        for (order, step_id) in seed.chain_steps.iter().enumerate() {
            sqlx::query(
                "INSERT INTO filter_chains (chain_filter_id, step_order, step_filter_id)
                 VALUES (?1, ?2, ?3)",
            )
            .bind(&seed.id)
            .bind(order as i64 + 1)
            .bind(step_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| store_error("insert chain step", e))?;
        }

        Ok(())
    }

    /// Every chain step must resolve to an active non-chain filter, and the
    /// step graph must be acyclic (checked by depth-first traversal).
    async fn verify_chain_integrity(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ) -> Result<(), BridgeError> {
        let rows = sqlx::query(
            "SELECT c.chain_filter_id, c.step_filter_id, f.kind AS step_kind, f.is_active
             FROM filter_chains c
             LEFT JOIN filters f ON f.id = c.step_filter_id
             ORDER BY c.chain_filter_id, c.step_order",
        )
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| store_error("load chain steps", e))?;

        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        for row in &rows {
            let chain_id: String = row.get("chain_filter_id");
            let step_id: String = row.get("step_filter_id");
            let step_kind: Option<String> = row.get("step_kind");
            let active: Option<i64> = row.get("is_active");

            match (step_kind.as_deref(), active) {
                (None, _) | (_, Some(0)) => {
                    return Err(BridgeError::invalid_input(format!(
                        "chain '{}' references unknown or inactive filter '{}'",
                        chain_id, step_id
                    )));
                }
                (Some("chain"), _) => {
                    return Err(BridgeError::invalid_input(format!(
                        "chain '{}' may not nest chain filter '{}'",
                        chain_id, step_id
                    )));
                }
                _ => {}
            }
            edges.entry(chain_id).or_default().push(step_id);
        }

        // DFS cycle detection over the step graph
        let mut visiting = HashSet::new();
        let mut done = HashSet::new();
        for node in edges.keys() {
            Self::dfs_cycle(node, &edges, &mut visiting, &mut done)?;
        }
        Ok(())
    }

    fn dfs_cycle(
        node: &str,
        edges: &HashMap<String, Vec<String>>,
        visiting: &mut HashSet<String>,
        done: &mut HashSet<String>,
    ) -> Result<(), BridgeError> {
        if done.contains(node) {
            return Ok(());
        }
        if !visiting.insert(node.to_string()) {
            return Err(BridgeError::invalid_input(format!(
                "filter chain cycle detected at '{}'",
                node
            )));
        }
        if let Some(next) = edges.get(node) {
            for step in next {
                Self::dfs_cycle(step, edges, visiting, done)?;
            }
        }
        visiting.remove(node);
        done.insert(node.to_string());
        Ok(())
    }

    /// Look up an active filter with all related rows, via the read cache.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Arc<FilterDefinition>>, BridgeError> {
        if let Some(cached) = self.by_id.get(id).await {
            return Ok(Some(cached));
        }

        let Some(definition) = self.load(id).await? else {
            return Ok(None);
        };
        let definition = Arc::new(definition);
        self.by_id.insert(id.to_string(), definition.clone()).await;
        Ok(Some(definition))
    }

    async fn load(&self, id: &str) -> Result<Option<FilterDefinition>, BridgeError> {
        let Some(row) = sqlx::query(
            "SELECT id, name, description, category, kind, expression, author, version,
                    is_active, estimated_reduction_percent
             FROM filters WHERE id = ?1 AND is_active = 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("load filter", e))?
        else {
            return Ok(None);
        };

        let kind_text: String = row.get("kind");
        let kind = FilterKind::parse(&kind_text)
            .ok_or_else(|| BridgeError::Internal(format!("corrupt filter kind '{}'", kind_text)))?;

        let endpoints = sqlx::query(
            "SELECT endpoint_name FROM filter_endpoints WHERE filter_id = ?1 ORDER BY endpoint_name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("load endpoints", e))?
        .into_iter()
        .map(|r| r.get::<String, _>("endpoint_name"))
        .collect();

        let parameters = sqlx::query(
            "SELECT parameter_name, parameter_type, default_value, is_required, description
             FROM filter_parameters WHERE filter_id = ?1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("load parameters", e))?
        .into_iter()
        .map(|r| {
            let type_text: String = r.get("parameter_type");
            let default_text: Option<String> = r.get("default_value");
            FilterParameter {
                name: r.get("parameter_name"),
                param_type: ParamType::parse(&type_text).unwrap_or(ParamType::String),
                default: default_text.and_then(|t| serde_json::from_str(&t).ok()),
                required: r.get::<i64, _>("is_required") != 0,
                description: r.get("description"),
            }
        })
        .collect();

        let examples = sqlx::query(
            "SELECT example_name, description, parameters FROM filter_examples WHERE filter_id = ?1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("load examples", e))?
        .into_iter()
        .map(|r| {
            let params_text: String = r.get("parameters");
            FilterExample {
                name: r.get("example_name"),
                description: r.get("description"),
                parameters: serde_json::from_str(&params_text).unwrap_or(Value::Null),
            }
        })
        .collect();

        let tags = sqlx::query("SELECT tag FROM filter_tags WHERE filter_id = ?1 ORDER BY tag")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("load tags", e))?
            .into_iter()
            .map(|r| r.get::<String, _>("tag"))
            .collect();

        let tests = sqlx::query(
            "SELECT test_name, input_json, expected_json FROM filter_tests WHERE filter_id = ?1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("load tests", e))?
        .into_iter()
        .filter_map(|r| {
            let input: Option<Value> = serde_json::from_str(&r.get::<String, _>("input_json")).ok();
            let expected: Option<Value> =
                serde_json::from_str(&r.get::<String, _>("expected_json")).ok();
            Some(FilterTestCase {
                name: r.get("test_name"),
                input: input?,
                expected: expected?,
            })
        })
        .collect();

        let chain_steps = sqlx::query(
            "SELECT step_filter_id FROM filter_chains WHERE chain_filter_id = ?1 ORDER BY step_order",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("load chain steps", e))?
        .into_iter()
        .map(|r| r.get::<String, _>("step_filter_id"))
        .collect();

        Ok(Some(FilterDefinition {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            category: row.get("category"),
            kind,
            expression: row.get("expression"),
            author: row.get("author"),
            version: row.get("version"),
            active: row.get::<i64, _>("is_active") != 0,
            estimated_reduction_percent: row.get("estimated_reduction_percent"),
            endpoints,
            parameters,
            examples,
            tags,
            tests,
            chain_steps,
        }))
    }

    /// Search active filters by any subset of criteria.
    pub async fn search(
        &self,
        criteria: &FilterSearch,
    ) -> Result<Vec<Arc<FilterDefinition>>, BridgeError> {
        let like = criteria
            .search_term
            .as_ref()
            .map(|term| format!("%{}%", term));

        let ids: Vec<String> = sqlx::query(
            "SELECT f.id FROM filters f
             WHERE f.is_active = 1
               AND (?1 IS NULL OR f.category = ?1)
               AND (?2 IS NULL OR f.kind = ?2)
               AND (?3 IS NULL
                    OR f.name LIKE ?3
                    OR f.description LIKE ?3
                    OR EXISTS (SELECT 1 FROM filter_tags ft
                               WHERE ft.filter_id = f.id AND ft.tag LIKE ?3))
               AND (?4 IS NULL
                    OR EXISTS (SELECT 1 FROM filter_endpoints fe
                               WHERE fe.filter_id = f.id AND fe.endpoint_name = ?4))
             ORDER BY f.category, f.name",
        )
        .bind(criteria.category.as_deref())
        .bind(criteria.kind.map(|k| k.as_str()))
        .bind(like.as_deref())
        .bind(criteria.endpoint.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("search", e))?
        .into_iter()
        .map(|r| r.get::<String, _>("id"))
        .collect();

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(def) = self.get_by_id(&id).await? {
                results.push(def);
            }
        }
        Ok(results)
    }

    /// Operation names a filter may bind to.
    pub async fn list_endpoints_for(&self, id: &str) -> Result<Vec<String>, BridgeError> {
        Ok(self
            .get_by_id(id)
            .await?
            .map(|def| def.endpoints.clone())
            .unwrap_or_default())
    }

    /// Declared parameters of a filter, in declaration order.
    pub async fn list_parameters(&self, id: &str) -> Result<Vec<FilterParameter>, BridgeError> {
        Ok(self
            .get_by_id(id)
            .await?
            .map(|def| def.parameters.clone())
            .unwrap_or_default())
    }

    /// Ordered step ids for a chain filter.
    pub async fn list_chain_steps(&self, id: &str) -> Result<Vec<String>, BridgeError> {
        Ok(self
            .get_by_id(id)
            .await?
            .map(|def| def.chain_steps.clone())
            .unwrap_or_default())
    }

    /// Count of active filters; used by health reporting.
    pub async fn active_count(&self) -> Result<i64, BridgeError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM filters WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("count", e))?;
        Ok(row.get("n"))
    }
}

fn store_error(action: &str, err: sqlx::Error) -> BridgeError {
    BridgeError::Internal(format!("filter catalog {} failed: {}", action, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc() -> SeedDocument {
        serde_json::from_value(json!({
            "filters": [
                {
                    "id": "t_record",
                    "name": "Test record filter",
                    "description": "keeps big rows",
                    "category": "orders",
                    "kind": "record",
                    "expression": "filter(.x > {threshold})",
                    "endpoints": ["get_orders"],
                    "parameters": [
                        {"name": "threshold", "type": "number", "default": 10, "required": false}
                    ],
                    "tags": ["test"]
                },
                {
                    "id": "t_field",
                    "name": "Test field filter",
                    "kind": "field",
                    "expression": "map(pick(.x))",
                    "endpoints": ["get_orders"],
                    "estimated_reduction_percent": 70
                }
            ],
            "chains": [
                {
                    "id": "t_chain",
                    "name": "Test chain",
                    "kind": "chain",
                    "chain_steps": ["t_record", "t_field"]
                }
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn import_and_lookup() {
        let catalog = FilterCatalog::open_in_memory().await.unwrap();
        let count = catalog.import_document(&sample_doc()).await.unwrap();
        assert_eq!(count, 3);

        let def = catalog.get_by_id("t_record").await.unwrap().unwrap();
        assert_eq!(def.kind, FilterKind::Record);
        assert_eq!(def.parameters.len(), 1);
        assert_eq!(def.parameters[0].name, "threshold");
        assert_eq!(def.endpoints, vec!["get_orders".to_string()]);

        let chain = catalog.get_by_id("t_chain").await.unwrap().unwrap();
        assert_eq!(chain.chain_steps, vec!["t_record", "t_field"]);
    }

    #[tokio::test]
    async fn reimport_is_idempotent() {
        let catalog = FilterCatalog::open_in_memory().await.unwrap();
        catalog.import_document(&sample_doc()).await.unwrap();
        catalog.import_document(&sample_doc()).await.unwrap();

        assert_eq!(catalog.active_count().await.unwrap(), 3);
        let def = catalog.get_by_id("t_record").await.unwrap().unwrap();
        assert_eq!(def.parameters.len(), 1);
        assert_eq!(def.tags, vec!["test".to_string()]);
    }

    #[tokio::test]
    async fn unknown_chain_step_rejected() {
        let catalog = FilterCatalog::open_in_memory().await.unwrap();
        let doc: SeedDocument = serde_json::from_value(json!({
            "chains": [
                {"id": "bad", "name": "Bad", "kind": "chain", "chain_steps": ["missing"]}
            ]
        }))
        .unwrap();
        let err = catalog.import_document(&doc).await.unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        // rollback: nothing imported
        assert_eq!(catalog.active_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nested_chain_rejected() {
        let catalog = FilterCatalog::open_in_memory().await.unwrap();
        catalog.import_document(&sample_doc()).await.unwrap();

        let doc: SeedDocument = serde_json::from_value(json!({
            "chains": [
                {"id": "outer", "name": "Outer", "kind": "chain", "chain_steps": ["t_chain"]}
            ]
        }))
        .unwrap();
        let err = catalog.import_document(&doc).await.unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[tokio::test]
    async fn search_by_criteria() {
        let catalog = FilterCatalog::open_in_memory().await.unwrap();
        catalog.import_document(&sample_doc()).await.unwrap();

        let by_kind = catalog
            .search(&FilterSearch {
                kind: Some(FilterKind::Field),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_kind.len(), 1);
        assert_eq!(by_kind[0].id, "t_field");

        let by_endpoint = catalog
            .search(&FilterSearch {
                endpoint: Some("get_orders".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_endpoint.len(), 2);

        let by_term = catalog
            .search(&FilterSearch {
                search_term: Some("big rows".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_term.len(), 1);

        let none = catalog
            .search(&FilterSearch {
                category: Some("inventory".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn related_row_queries() {
        let catalog = FilterCatalog::open_in_memory().await.unwrap();
        catalog.import_document(&sample_doc()).await.unwrap();

        assert_eq!(
            catalog.list_endpoints_for("t_record").await.unwrap(),
            vec!["get_orders".to_string()]
        );
        let params = catalog.list_parameters("t_record").await.unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "threshold");
        assert_eq!(
            catalog.list_chain_steps("t_chain").await.unwrap(),
            vec!["t_record".to_string(), "t_field".to_string()]
        );
        assert!(catalog.list_chain_steps("t_record").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn seed_marker_round_trip() {
        let catalog = FilterCatalog::open_in_memory().await.unwrap();
        assert!(!catalog.is_seeded().await.unwrap());
        catalog.mark_seeded().await.unwrap();
        assert!(catalog.is_seeded().await.unwrap());
    }
}
