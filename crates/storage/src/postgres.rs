//! PostgreSQL implementation of WorkflowStore
//!
//! - Compound writes run in one transaction
//! - Route uniqueness and the single start route are enforced by unique indexes
//! - Instance rows are locked with FOR UPDATE before read-modify-write

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder};
use stepflow_core::{
    merge_payload, ActorId, FileRef, Instance, InstancePredicate, LockOutcome, NewRoute, Payload,
    Route, RouteUpdate, TrailEntry, Workflow, WorkflowState, WorkflowView,
};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;

const WORKFLOW_COLUMNS: &str = "id, name, description, subject_kind, created_at";
const CATALOG_COLUMNS: &str = "id, workflow_id, name, created_at";
const ROUTE_COLUMNS: &str =
    "id, workflow_id, view, state, next_view, next_role_id, start_sign, created_at, updated_at";
const INSTANCE_COLUMNS: &str = "id, workflow_id, subject_id, state, next_view, next_role_id, \
     processed_by_user_ids, being_held_by_user_id, payload, version, created_at, updated_at";
const TRAIL_COLUMNS: &str = "id, instance_id, view, state, next_view, next_role_id, \
     processed_by_user_id, comment, files, created_at";

// ============================================
// Row types
// ============================================

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    subject_kind: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<WorkflowRow> for Workflow {
    fn from(row: WorkflowRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            subject_kind: row.subject_kind,
            created_at: row.created_at,
        }
    }
}

/// Shared shape of `workflow_views` and `workflow_states`.
#[derive(Debug, FromRow)]
struct CatalogRow {
    id: Uuid,
    workflow_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<CatalogRow> for WorkflowView {
    fn from(row: CatalogRow) -> Self {
        Self {
            id: row.id,
            workflow_id: row.workflow_id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

impl From<CatalogRow> for WorkflowState {
    fn from(row: CatalogRow) -> Self {
        Self {
            id: row.id,
            workflow_id: row.workflow_id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RouteRow {
    id: Uuid,
    workflow_id: Uuid,
    view: String,
    state: String,
    next_view: String,
    next_role_id: Option<String>,
    start_sign: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RouteRow> for Route {
    fn from(row: RouteRow) -> Self {
        Self {
            id: row.id,
            workflow_id: row.workflow_id,
            view: row.view,
            state: row.state,
            next_view: row.next_view,
            next_role_id: row.next_role_id,
            start_sign: row.start_sign,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct InstanceRow {
    id: Uuid,
    workflow_id: Uuid,
    subject_id: String,
    state: String,
    next_view: String,
    next_role_id: Option<String>,
    processed_by_user_ids: Vec<String>,
    being_held_by_user_id: Option<String>,
    payload: Option<serde_json::Value>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<InstanceRow> for Instance {
    fn from(row: InstanceRow) -> Self {
        let payload = match row.payload {
            Some(serde_json::Value::Object(map)) => Some(map),
            _ => None,
        };
        Self {
            id: row.id,
            workflow_id: row.workflow_id,
            subject_id: row.subject_id,
            state: row.state,
            next_view: row.next_view,
            next_role_id: row.next_role_id,
            processed_by_user_ids: row.processed_by_user_ids,
            being_held_by_user_id: row.being_held_by_user_id,
            payload,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TrailRow {
    id: Uuid,
    instance_id: Uuid,
    view: String,
    state: String,
    next_view: String,
    next_role_id: Option<String>,
    processed_by_user_id: String,
    comment: Option<String>,
    files: Json<Vec<FileRef>>,
    created_at: DateTime<Utc>,
}

impl From<TrailRow> for TrailEntry {
    fn from(row: TrailRow) -> Self {
        Self {
            id: row.id,
            instance_id: row.instance_id,
            view: row.view,
            state: row.state,
            next_view: row.next_view,
            next_role_id: row.next_role_id,
            processed_by_user_id: row.processed_by_user_id,
            comment: row.comment,
            files: row.files.0,
            created_at: row.created_at,
        }
    }
}

// ============================================
// Helpers
// ============================================

fn db_error(e: sqlx::Error) -> StoreError {
    error!("Database error: {}", e);
    StoreError::Database(e.to_string())
}

/// Name of the violated unique constraint, if `e` is a unique violation.
fn unique_violation(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

fn payload_json(payload: Option<&Payload>) -> Option<serde_json::Value> {
    payload.map(|p| serde_json::Value::Object(p.clone()))
}

/// Compile a predicate into a WHERE clause. `Custom` compiles to TRUE, so
/// the result over-approximates and callers re-check in process.
fn push_predicate(qb: &mut QueryBuilder<'_, Postgres>, predicate: &InstancePredicate) {
    match predicate {
        InstancePredicate::Any | InstancePredicate::Custom(_) => {
            qb.push("TRUE");
        }
        InstancePredicate::Workflow(id) => {
            qb.push("workflow_id = ").push_bind(*id);
        }
        InstancePredicate::Subject(subject_id) => {
            qb.push("subject_id = ").push_bind(subject_id.clone());
        }
        InstancePredicate::AwaitingRole(role) => {
            qb.push("next_role_id = ").push_bind(role.clone());
        }
        InstancePredicate::TouchedByUser(user) => {
            qb.push_bind(user.clone()).push(" = ANY(processed_by_user_ids)");
        }
        InstancePredicate::HeldBy(user) => {
            qb.push("being_held_by_user_id = ").push_bind(user.clone());
        }
        InstancePredicate::And(terms) | InstancePredicate::Or(terms) if terms.is_empty() => {
            let empty = if matches!(predicate, InstancePredicate::And(_)) {
                "TRUE"
            } else {
                "FALSE"
            };
            qb.push(empty);
        }
        InstancePredicate::And(terms) | InstancePredicate::Or(terms) => {
            let joiner = if matches!(predicate, InstancePredicate::And(_)) {
                " AND "
            } else {
                " OR "
            };
            qb.push("(");
            for (i, term) in terms.iter().enumerate() {
                if i > 0 {
                    qb.push(joiner);
                }
                push_predicate(qb, term);
            }
            qb.push(")");
        }
    }
}

async fn insert_trail(
    conn: &mut PgConnection,
    instance_id: Uuid,
    route: &Route,
    actor_id: &str,
    comment: Option<&str>,
    files: &[FileRef],
) -> Result<TrailEntry, StoreError> {
    let row = sqlx::query_as::<_, TrailRow>(&format!(
        r#"
        INSERT INTO workflow_trail
            (id, instance_id, view, state, next_view, next_role_id, processed_by_user_id, comment, files)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {TRAIL_COLUMNS}
        "#
    ))
    .bind(Uuid::now_v7())
    .bind(instance_id)
    .bind(&route.view)
    .bind(&route.state)
    .bind(&route.next_view)
    .bind(&route.next_role_id)
    .bind(actor_id)
    .bind(comment)
    .bind(Json(files))
    .fetch_one(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(row.into())
}

async fn lock_instance(conn: &mut PgConnection, id: Uuid) -> Result<Instance, StoreError> {
    let row = sqlx::query_as::<_, InstanceRow>(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?
    .ok_or(StoreError::InstanceNotFound(id))?;

    Ok(row.into())
}

async fn set_holder(
    conn: &mut PgConnection,
    id: Uuid,
    holder: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE workflow_instances SET being_held_by_user_id = $2 WHERE id = $1")
        .bind(id)
        .bind(holder)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;
    Ok(())
}

/// PostgreSQL implementation of WorkflowStore
///
/// # Example
///
/// ```ignore
/// use stepflow_storage::PostgresWorkflowStore;
///
/// let store = PostgresWorkflowStore::from_url("postgres://localhost/stepflow").await?;
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create store from a database URL
    pub async fn from_url(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await.map_err(db_error)?;
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn catalog_name_taken(
        conn: &mut PgConnection,
        table: &str,
        workflow_id: Uuid,
        name: &str,
    ) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(&format!(
            "SELECT EXISTS(SELECT 1 FROM {table} WHERE workflow_id = $1 AND name = $2)"
        ))
        .bind(workflow_id)
        .bind(name)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error)
    }

    async fn create_catalog_entry(
        &self,
        table: &str,
        kind: &'static str,
        workflow_id: Uuid,
        name: &str,
    ) -> Result<CatalogRow, StoreError> {
        sqlx::query_as::<_, CatalogRow>(&format!(
            r#"
            INSERT INTO {table} (id, workflow_id, name)
            SELECT $1, id, $3 FROM workflows WHERE id = $2
            RETURNING {CATALOG_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(workflow_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => StoreError::Duplicate {
                kind,
                name: name.to_string(),
            },
            None => db_error(e),
        })?
        .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn get_catalog_entry(
        &self,
        table: &str,
        id: Uuid,
    ) -> Result<Option<CatalogRow>, StoreError> {
        sqlx::query_as::<_, CatalogRow>(&format!(
            "SELECT {CATALOG_COLUMNS} FROM {table} WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn list_catalog_entries(
        &self,
        table: &str,
        workflow_id: Uuid,
    ) -> Result<Vec<CatalogRow>, StoreError> {
        sqlx::query_as::<_, CatalogRow>(&format!(
            "SELECT {CATALOG_COLUMNS} FROM {table} WHERE workflow_id = $1 ORDER BY created_at, id"
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Rename a view or state. `in_use` is the SQL condition over
    /// `workflow_routes` that references the old name as `$2`.
    async fn rename_catalog_entry(
        &self,
        table: &str,
        kind: &'static str,
        in_use: &str,
        id: Uuid,
        name: &str,
    ) -> Result<Option<CatalogRow>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let Some(current) = sqlx::query_as::<_, CatalogRow>(&format!(
            "SELECT {CATALOG_COLUMNS} FROM {table} WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        else {
            return Ok(None);
        };

        if current.name == name {
            return Ok(Some(current));
        }
        if Self::catalog_name_taken(&mut *tx, table, current.workflow_id, name).await? {
            return Err(StoreError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
        let referenced = sqlx::query_scalar::<_, bool>(&format!(
            "SELECT EXISTS(SELECT 1 FROM workflow_routes WHERE workflow_id = $1 AND ({in_use}))"
        ))
        .bind(current.workflow_id)
        .bind(&current.name)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        if referenced {
            return Err(StoreError::InUse(format!(
                "{kind} '{}' is referenced by routes",
                current.name
            )));
        }

        let row = sqlx::query_as::<_, CatalogRow>(&format!(
            "UPDATE {table} SET name = $2 WHERE id = $1 RETURNING {CATALOG_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => StoreError::Duplicate {
                kind,
                name: name.to_string(),
            },
            None => db_error(e),
        })?;

        tx.commit().await.map_err(db_error)?;
        Ok(Some(row))
    }

    async fn delete_catalog_entry(
        &self,
        table: &str,
        kind: &'static str,
        in_use: &str,
        id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let Some(current) = sqlx::query_as::<_, CatalogRow>(&format!(
            "SELECT {CATALOG_COLUMNS} FROM {table} WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        else {
            return Ok(false);
        };

        let referenced = sqlx::query_scalar::<_, bool>(&format!(
            "SELECT EXISTS(SELECT 1 FROM workflow_routes WHERE workflow_id = $1 AND ({in_use}))"
        ))
        .bind(current.workflow_id)
        .bind(&current.name)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        if referenced {
            return Err(StoreError::InUse(format!(
                "{kind} '{}' is referenced by routes",
                current.name
            )));
        }

        sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }
}

const VIEW_IN_USE: &str = "view = $2 OR next_view = $2";
const STATE_IN_USE: &str = "state = $2";

fn route_write_error(e: sqlx::Error, view: &str, state: &str) -> StoreError {
    match unique_violation(&e).as_deref() {
        Some("workflow_routes_unique_edge") => StoreError::DuplicateRoute {
            view: view.to_string(),
            state: state.to_string(),
        },
        // Start-route index: only reachable when two writers race on the flag
        Some(_) => StoreError::Database(format!("start route changed concurrently: {e}")),
        None => db_error(e),
    }
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    // ============================================
    // Workflows
    // ============================================

    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn create_workflow(&self, input: NewWorkflow) -> Result<Workflow, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            INSERT INTO workflows (id, name, description, subject_kind)
            VALUES ($1, $2, $3, $4)
            RETURNING {WORKFLOW_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.subject_kind)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => StoreError::Duplicate {
                kind: "workflow",
                name: input.name.clone(),
            },
            None => db_error(e),
        })?;

        debug!(workflow_id = %row.id, "created workflow");
        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn delete_workflow(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let exists =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM workflows WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;
        if exists.is_none() {
            return Ok(false);
        }

        let has_instances = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM workflow_instances WHERE workflow_id = $1)",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        if has_instances {
            return Err(StoreError::InUse(format!(
                "workflow {id} still has instances"
            )));
        }

        // Views, states and routes go with it (ON DELETE CASCADE)
        sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        debug!(workflow_id = %id, "deleted workflow");
        Ok(true)
    }

    // ============================================
    // Views
    // ============================================

    #[instrument(skip(self))]
    async fn create_view(
        &self,
        workflow_id: Uuid,
        name: &str,
    ) -> Result<WorkflowView, StoreError> {
        self.create_catalog_entry("workflow_views", "view", workflow_id, name)
            .await
            .map(Into::into)
    }

    #[instrument(skip(self))]
    async fn get_view(&self, id: Uuid) -> Result<Option<WorkflowView>, StoreError> {
        Ok(self
            .get_catalog_entry("workflow_views", id)
            .await?
            .map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_views(&self, workflow_id: Uuid) -> Result<Vec<WorkflowView>, StoreError> {
        let rows = self.list_catalog_entries("workflow_views", workflow_id).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn rename_view(&self, id: Uuid, name: &str) -> Result<Option<WorkflowView>, StoreError> {
        Ok(self
            .rename_catalog_entry("workflow_views", "view", VIEW_IN_USE, id, name)
            .await?
            .map(Into::into))
    }

    #[instrument(skip(self))]
    async fn delete_view(&self, id: Uuid) -> Result<bool, StoreError> {
        self.delete_catalog_entry("workflow_views", "view", VIEW_IN_USE, id)
            .await
    }

    // ============================================
    // States
    // ============================================

    #[instrument(skip(self))]
    async fn create_state(
        &self,
        workflow_id: Uuid,
        name: &str,
    ) -> Result<WorkflowState, StoreError> {
        self.create_catalog_entry("workflow_states", "state", workflow_id, name)
            .await
            .map(Into::into)
    }

    #[instrument(skip(self))]
    async fn get_state(&self, id: Uuid) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self
            .get_catalog_entry("workflow_states", id)
            .await?
            .map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_states(&self, workflow_id: Uuid) -> Result<Vec<WorkflowState>, StoreError> {
        let rows = self.list_catalog_entries("workflow_states", workflow_id).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn rename_state(
        &self,
        id: Uuid,
        name: &str,
    ) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self
            .rename_catalog_entry("workflow_states", "state", STATE_IN_USE, id, name)
            .await?
            .map(Into::into))
    }

    #[instrument(skip(self))]
    async fn delete_state(&self, id: Uuid) -> Result<bool, StoreError> {
        self.delete_catalog_entry("workflow_states", "state", STATE_IN_USE, id)
            .await
    }

    // ============================================
    // Routes
    // ============================================

    #[instrument(skip(self, input), fields(view = %input.view, state = %input.state))]
    async fn create_route(
        &self,
        workflow_id: Uuid,
        input: &NewRoute,
    ) -> Result<Route, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM workflows WHERE id = $1")
            .bind(workflow_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;
        if exists.is_none() {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }

        if input.start_sign {
            sqlx::query(
                "UPDATE workflow_routes SET start_sign = FALSE, updated_at = NOW() \
                 WHERE workflow_id = $1 AND start_sign",
            )
            .bind(workflow_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        let row = sqlx::query_as::<_, RouteRow>(&format!(
            r#"
            INSERT INTO workflow_routes (id, workflow_id, view, state, next_view, next_role_id, start_sign)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ROUTE_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(workflow_id)
        .bind(&input.view)
        .bind(&input.state)
        .bind(&input.next_view)
        .bind(&input.next_role_id)
        .bind(input.start_sign)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| route_write_error(e, &input.view, &input.state))?;

        tx.commit().await.map_err(db_error)?;
        debug!(route_id = %row.id, %workflow_id, "created route");
        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn get_route(&self, id: Uuid) -> Result<Option<Route>, StoreError> {
        let row = sqlx::query_as::<_, RouteRow>(&format!(
            "SELECT {ROUTE_COLUMNS} FROM workflow_routes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_route(
        &self,
        workflow_id: Uuid,
        view: &str,
        state: &str,
    ) -> Result<Option<Route>, StoreError> {
        let row = sqlx::query_as::<_, RouteRow>(&format!(
            "SELECT {ROUTE_COLUMNS} FROM workflow_routes \
             WHERE workflow_id = $1 AND view = $2 AND state = $3"
        ))
        .bind(workflow_id)
        .bind(view)
        .bind(state)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_start_route(&self, workflow_id: Uuid) -> Result<Option<Route>, StoreError> {
        let row = sqlx::query_as::<_, RouteRow>(&format!(
            "SELECT {ROUTE_COLUMNS} FROM workflow_routes WHERE workflow_id = $1 AND start_sign"
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_routes(&self, workflow_id: Uuid) -> Result<Vec<Route>, StoreError> {
        let rows = sqlx::query_as::<_, RouteRow>(&format!(
            "SELECT {ROUTE_COLUMNS} FROM workflow_routes WHERE workflow_id = $1 ORDER BY created_at, id"
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, update))]
    async fn update_route(
        &self,
        id: Uuid,
        update: &RouteUpdate,
    ) -> Result<Option<Route>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let Some(row) = sqlx::query_as::<_, RouteRow>(&format!(
            "SELECT {ROUTE_COLUMNS} FROM workflow_routes WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        else {
            return Ok(None);
        };

        let mut route: Route = row.into();
        update.apply_to(&mut route);

        if update.start_sign == Some(true) {
            sqlx::query(
                "UPDATE workflow_routes SET start_sign = FALSE, updated_at = NOW() \
                 WHERE workflow_id = $1 AND start_sign AND id <> $2",
            )
            .bind(route.workflow_id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        let row = sqlx::query_as::<_, RouteRow>(&format!(
            r#"
            UPDATE workflow_routes
            SET view = $2, state = $3, next_view = $4, next_role_id = $5, start_sign = $6, updated_at = NOW()
            WHERE id = $1
            RETURNING {ROUTE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&route.view)
        .bind(&route.state)
        .bind(&route.next_view)
        .bind(&route.next_role_id)
        .bind(route.start_sign)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| route_write_error(e, &route.view, &route.state))?;

        tx.commit().await.map_err(db_error)?;
        debug!(route_id = %id, "updated route");
        Ok(Some(row.into()))
    }

    #[instrument(skip(self))]
    async fn delete_route(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM workflow_routes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Instances
    // ============================================

    #[instrument(skip(self, record), fields(workflow_id = %record.workflow_id, subject_id = %record.subject_id))]
    async fn start_instance(&self, record: StartRecord) -> Result<Instance, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            INSERT INTO workflow_instances
                (id, workflow_id, subject_id, state, next_view, next_role_id, processed_by_user_ids, payload)
            SELECT $1, id, $3, $4, $5, $6, ARRAY[$7::text], $8 FROM workflows WHERE id = $2
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(record.workflow_id)
        .bind(&record.subject_id)
        .bind(&record.route.state)
        .bind(&record.route.next_view)
        .bind(&record.route.next_role_id)
        .bind(&record.actor_id)
        .bind(payload_json(record.payload.as_ref()))
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or(StoreError::WorkflowNotFound(record.workflow_id))?;

        insert_trail(&mut *tx, row.id, &record.route, &record.actor_id, None, &[]).await?;

        tx.commit().await.map_err(db_error)?;
        debug!(instance_id = %row.id, "started instance");
        Ok(row.into())
    }

    #[instrument(skip(self, record), fields(instance_id = %record.instance_id))]
    async fn apply_transition(
        &self,
        record: TransitionRecord,
    ) -> Result<(Instance, TrailEntry), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let mut instance = lock_instance(&mut *tx, record.instance_id).await?;
        if let Some(expected) = record.expected_version {
            if instance.version != expected {
                return Err(StoreError::VersionConflict {
                    instance_id: record.instance_id,
                    expected,
                    actual: instance.version,
                });
            }
        }
        if let Some(view) = record.expected_view {
            if instance.next_view != view {
                return Err(StoreError::ViewMismatch {
                    instance_id: record.instance_id,
                    expected: instance.next_view,
                    submitted: view,
                });
            }
        }

        instance.record_actor(&record.actor_id);
        let payload = merge_payload(instance.payload.take(), record.payload_patch.as_ref());

        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            UPDATE workflow_instances
            SET state = $2, next_view = $3, next_role_id = $4, processed_by_user_ids = $5,
                payload = $6, version = version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(record.instance_id)
        .bind(&record.route.state)
        .bind(&record.route.next_view)
        .bind(&record.route.next_role_id)
        .bind(&instance.processed_by_user_ids)
        .bind(payload_json(payload.as_ref()))
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        let entry = insert_trail(
            &mut *tx,
            record.instance_id,
            &record.route,
            &record.actor_id,
            record.comment.as_deref(),
            &record.files,
        )
        .await?;

        tx.commit().await.map_err(db_error)?;
        debug!(instance_id = %record.instance_id, version = row.version, "applied transition");
        Ok((row.into(), entry))
    }

    #[instrument(skip(self))]
    async fn get_instance(&self, id: Uuid) -> Result<Option<Instance>, StoreError> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, predicate))]
    async fn list_instances(
        &self,
        predicate: &InstancePredicate,
    ) -> Result<Vec<Instance>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE "
        ));
        push_predicate(&mut qb, predicate);
        qb.push(" ORDER BY created_at DESC, id DESC");

        let rows: Vec<InstanceRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        let instances = rows.into_iter().map(Instance::from);
        if predicate.has_custom() {
            Ok(instances.filter(|i| predicate.matches(i)).collect())
        } else {
            Ok(instances.collect())
        }
    }

    #[instrument(skip(self))]
    async fn delete_instance(&self, id: Uuid) -> Result<bool, StoreError> {
        // Trail goes with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM workflow_instances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn list_trail(&self, instance_id: Uuid) -> Result<Vec<TrailEntry>, StoreError> {
        let rows = sqlx::query_as::<_, TrailRow>(&format!(
            "SELECT {TRAIL_COLUMNS} FROM workflow_trail WHERE instance_id = $1 ORDER BY created_at, seq"
        ))
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ============================================
    // Advisory lock
    // ============================================

    #[instrument(skip(self))]
    async fn acquire_lock(
        &self,
        instance_id: Uuid,
        actor_id: &str,
    ) -> Result<LockOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let instance = lock_instance(&mut *tx, instance_id).await?;

        let outcome = match instance.being_held_by_user_id {
            None => {
                set_holder(&mut *tx, instance_id, Some(actor_id)).await?;
                LockOutcome::Acquired
            }
            Some(holder) if holder == actor_id => LockOutcome::AlreadyMine,
            Some(holder) => LockOutcome::HeldByOther { holder },
        };

        tx.commit().await.map_err(db_error)?;
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn release_lock(&self, instance_id: Uuid, actor_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let instance = lock_instance(&mut *tx, instance_id).await?;

        if !instance.is_held_by(actor_id) {
            return Ok(false);
        }
        set_holder(&mut *tx, instance_id, None).await?;

        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn force_release_lock(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<ActorId>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let instance = lock_instance(&mut *tx, instance_id).await?;

        if instance.being_held_by_user_id.is_some() {
            set_holder(&mut *tx, instance_id, None).await?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(instance.being_held_by_user_id)
    }

    #[instrument(skip(self))]
    async fn get_lock(&self, instance_id: Uuid) -> Result<Option<ActorId>, StoreError> {
        sqlx::query_scalar::<_, Option<String>>(
            "SELECT being_held_by_user_id FROM workflow_instances WHERE id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or(StoreError::InstanceNotFound(instance_id))
    }
}
