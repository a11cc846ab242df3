use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use gcloud_gax::grpc::{Code, Status};
use gcloud_gax::retry::TryAs;
use gcloud_googleapis::spanner::admin::database::v1::{
    CreateDatabaseRequest, DatabaseDialect, GetDatabaseDdlRequest, GetDatabaseRequest,
    UpdateDatabaseDdlRequest,
};
use gcloud_googleapis::spanner::admin::instance::v1::{
    CreateInstanceRequest, GetInstanceRequest, Instance,
};
use gcloud_spanner::admin::client::Client as AdminClient;
use gcloud_spanner::admin::AdminClientConfig;
use gcloud_spanner::client::{Client, ClientConfig, Error as SpannerError};
use gcloud_spanner::row::Row as SpannerRow;
use gcloud_spanner::session::SessionError;
use gcloud_spanner::statement::Statement;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

use crate::config::SpannerConfig;
use crate::store::{Filter, OrderBy, Row, Store, Table};

/// Column holding every field that has no dedicated column
const ATTRIBUTES: &str = "attributes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int64,
    Bool,
    /// STRING column holding a JSON-encoded string or number, so `7` and `"7"` stay distinct
    JsonText,
}

/// Mapping from an API field to a typed Spanner column
#[derive(Debug)]
struct Column {
    field: &'static str,
    name: &'static str,
    kind: ColumnKind,
}

const USER_COLUMNS: &[Column] = &[
    Column { field: "id", name: "id", kind: ColumnKind::Int64 },
    Column { field: "order", name: "sort_order", kind: ColumnKind::Int64 },
    Column { field: "checked", name: "checked", kind: ColumnKind::Bool },
];

const ATTENDANCE_COLUMNS: &[Column] = &[
    Column { field: "id", name: "id", kind: ColumnKind::Int64 },
    Column { field: "date", name: "session_date", kind: ColumnKind::JsonText },
    Column { field: "group", name: "group_name", kind: ColumnKind::JsonText },
    Column { field: "day", name: "session_day", kind: ColumnKind::JsonText },
];

fn columns(table: Table) -> &'static [Column] {
    match table {
        Table::Users => USER_COLUMNS,
        Table::AttendanceHistory => ATTENDANCE_COLUMNS,
    }
}

fn column(table: Table, field: &str) -> Result<&'static Column> {
    columns(table)
        .iter()
        .find(|c| c.field == field)
        .ok_or_else(|| anyhow!("Field '{}' is not queryable on table {}", field, table))
}

/// Projection shared by every query and `THEN RETURN` clause
fn projection(table: Table) -> String {
    let mut parts: Vec<String> = columns(table).iter().map(|c| c.name.to_string()).collect();
    parts.push(format!("TO_JSON_STRING({0}) AS {0}", ATTRIBUTES));
    parts.join(", ")
}

/// Owned statement parameter, so statements can be rebuilt on transaction retries
#[derive(Debug, Clone, PartialEq)]
enum Param {
    Int(Option<i64>),
    Bool(Option<bool>),
    Str(Option<String>),
}

impl Param {
    fn bind(column: &Column, value: &JsonValue) -> Result<Self> {
        let param = match (column.kind, value) {
            (ColumnKind::Int64, JsonValue::Null) => Param::Int(None),
            (ColumnKind::Int64, JsonValue::Number(n)) => Param::Int(Some(
                n.as_i64()
                    .with_context(|| format!("{} must be an integer, got {}", column.field, n))?,
            )),
            // let Spanner reject non-numeric identifiers itself
            (ColumnKind::Int64, JsonValue::String(s)) => Param::Str(Some(s.clone())),
            (ColumnKind::Bool, JsonValue::Null) => Param::Bool(None),
            (ColumnKind::Bool, JsonValue::Bool(b)) => Param::Bool(Some(*b)),
            (ColumnKind::JsonText, JsonValue::Null) => Param::Str(None),
            (ColumnKind::JsonText, JsonValue::String(_) | JsonValue::Number(_)) => {
                Param::Str(Some(value.to_string()))
            }
            (kind, other) => bail!(
                "Cannot store {} in {:?} column {}",
                other,
                kind,
                column.name
            ),
        };
        Ok(param)
    }
}

/// SQL text plus its named parameters
#[derive(Debug, Clone, Default)]
struct Query {
    sql: String,
    params: Vec<(String, Param)>,
}

impl Query {
    fn param(&mut self, value: Param) -> String {
        let name = format!("p{}", self.params.len());
        self.params.push((name.clone(), value));
        format!("@{}", name)
    }

    fn statement(&self) -> Statement {
        let mut statement = Statement::new(&self.sql);
        for (name, param) in &self.params {
            match param {
                Param::Int(v) => statement.add_param(name, v),
                Param::Bool(v) => statement.add_param(name, v),
                Param::Str(v) => statement.add_param(name, v),
            }
        }
        statement
    }

    fn where_clause(&mut self, table: Table, filter: &Filter) -> Result<String> {
        if filter.is_empty() {
            // Spanner DML requires a WHERE clause
            return Ok("WHERE true".to_string());
        }

        let mut predicates = Vec::with_capacity(filter.conditions().len());
        for (field, value) in filter.conditions() {
            let column = column(table, field)?;
            if value.is_null() {
                predicates.push(format!("{} IS NULL", column.name));
            } else {
                let param = self.param(Param::bind(column, value)?);
                predicates.push(format!("{} = {}", column.name, param));
            }
        }
        Ok(format!("WHERE {}", predicates.join(" AND ")))
    }
}

/// Split an API row into typed column values and the remaining attribute map.
///
/// `id` is never written; it comes from the table's sequence.
fn split_row(table: Table, row: &Row) -> Result<(Vec<(&'static Column, Param)>, Map<String, JsonValue>)> {
    let mut values = Vec::new();
    let mut attributes = Map::new();

    for (field, value) in row {
        match columns(table).iter().find(|c| c.field == field.as_str()) {
            Some(column) if column.field == "id" => {}
            Some(column) => values.push((column, Param::bind(column, value)?)),
            None => {
                attributes.insert(field.clone(), value.clone());
            }
        }
    }

    Ok((values, attributes))
}

fn select_query(
    table: Table,
    filter: &Filter,
    order: Option<&OrderBy>,
    limit: Option<usize>,
) -> Result<Query> {
    let mut query = Query::default();
    let where_clause = query.where_clause(table, filter)?;

    let mut sql = format!("SELECT {} FROM {}", projection(table), table.name());
    if !filter.is_empty() {
        sql.push(' ');
        sql.push_str(&where_clause);
    }
    if let Some(order) = order {
        let column = column(table, &order.field)?;
        let direction = if order.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY {} {}", column.name, direction));
    }
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    query.sql = sql;
    Ok(query)
}

fn insert_query(table: Table, row: &Row) -> Result<Query> {
    let (values, attributes) = split_row(table, row)?;
    let mut query = Query::default();

    let mut names = Vec::new();
    let mut placeholders = Vec::new();
    for (column, param) in values {
        names.push(column.name.to_string());
        placeholders.push(query.param(param));
    }
    names.push(ATTRIBUTES.to_string());
    let attributes = serde_json::to_string(&attributes).context("Failed to serialize attributes")?;
    placeholders.push(format!("PARSE_JSON({})", query.param(Param::Str(Some(attributes)))));

    query.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) THEN RETURN {}",
        table.name(),
        names.join(", "),
        placeholders.join(", "),
        projection(table)
    );
    Ok(query)
}

/// Overwrite every column of the row identified by `id` with the values in `row`
fn update_query(table: Table, id: i64, row: &Row) -> Result<Query> {
    let (values, attributes) = split_row(table, row)?;
    let mut query = Query::default();

    let mut assignments = Vec::new();
    for (column, param) in values {
        assignments.push(format!("{} = {}", column.name, query.param(param)));
    }
    let attributes = serde_json::to_string(&attributes).context("Failed to serialize attributes")?;
    assignments.push(format!(
        "{} = PARSE_JSON({})",
        ATTRIBUTES,
        query.param(Param::Str(Some(attributes)))
    ));
    let id_param = query.param(Param::Int(Some(id)));

    query.sql = format!(
        "UPDATE {} SET {} WHERE id = {} THEN RETURN {}",
        table.name(),
        assignments.join(", "),
        id_param,
        projection(table)
    );
    Ok(query)
}

fn delete_query(table: Table, filter: &Filter) -> Result<Query> {
    let mut query = Query::default();
    let where_clause = query.where_clause(table, filter)?;
    query.sql = format!("DELETE FROM {} {}", table.name(), where_clause);
    Ok(query)
}

/// Convert a Spanner result row back into an API row
fn decode_row(table: Table, row: &SpannerRow) -> Result<Row> {
    let mut decoded = Row::new();

    let attributes: Option<String> = row.column_by_name(ATTRIBUTES)?;
    if let Some(attributes) = attributes {
        if let JsonValue::Object(map) = serde_json::from_str(&attributes)
            .context("Failed to deserialize attributes")?
        {
            decoded.extend(map);
        }
    }

    for column in columns(table) {
        let value = match column.kind {
            ColumnKind::Int64 => row
                .column_by_name::<Option<i64>>(column.name)?
                .map_or(JsonValue::Null, JsonValue::from),
            ColumnKind::Bool => row
                .column_by_name::<Option<bool>>(column.name)?
                .map_or(JsonValue::Null, JsonValue::from),
            ColumnKind::JsonText => match row.column_by_name::<Option<String>>(column.name)? {
                Some(text) => serde_json::from_str(&text)
                    .with_context(|| format!("Column {} does not hold JSON", column.name))?,
                None => JsonValue::Null,
            },
        };
        decoded.insert(column.field.to_string(), value);
    }

    Ok(decoded)
}

/// Failure inside a read-write transaction body.
///
/// gRPC statuses stay visible through `TryAs` so aborted transactions are retried.
#[derive(Debug, thiserror::Error)]
enum TxError {
    #[error(transparent)]
    Spanner(#[from] SpannerError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TryAs<Status> for TxError {
    fn try_as(&self) -> Option<&Status> {
        match self {
            TxError::Spanner(SpannerError::GRPC(status)) => Some(status),
            _ => None,
        }
    }
}

impl From<Status> for TxError {
    fn from(status: Status) -> Self {
        TxError::Spanner(SpannerError::GRPC(status))
    }
}

impl From<SessionError> for TxError {
    fn from(error: SessionError) -> Self {
        TxError::Spanner(SpannerError::InvalidSession(error))
    }
}

/// Shareable Spanner-backed store for use across async handlers
#[derive(Clone)]
pub struct SpannerStore {
    inner: Arc<Client>,
}

impl SpannerStore {
    /// Create a new Spanner client from configuration
    ///
    /// The gcloud-spanner library automatically detects the
    /// SPANNER_EMULATOR_HOST environment variable and connects to
    /// the emulator when set, or production Spanner otherwise.
    ///
    /// Instance, database and tables are created first if missing.
    pub async fn from_config(config: &SpannerConfig) -> Result<Self> {
        auto_provision(config).await?;

        let database_path = config.database_path();

        match &config.emulator_host {
            Some(host) => tracing::info!("Connecting to Spanner emulator at: {}", host),
            None => tracing::info!("Connecting to production Spanner"),
        }

        let client = Client::new(&database_path, ClientConfig::default())
            .await
            .context("Failed to create Spanner client")?;

        tracing::info!(
            "Successfully connected to Spanner database: {}",
            database_path
        );

        Ok(Self {
            inner: Arc::new(client),
        })
    }

    /// Run a read-only query in a single-use transaction
    async fn read(&self, query: &Query) -> Result<Vec<SpannerRow>> {
        let mut tx = self.inner
            .single()
            .await
            .context("Failed to create read transaction")?;

        let mut result_set = tx
            .query(query.statement())
            .await
            .context("Failed to query Spanner")?;

        let mut rows = Vec::new();
        while let Some(row) = result_set.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Run a `THEN RETURN` DML statement in a read-write transaction
    async fn write_returning(&self, query: &Query) -> Result<Vec<SpannerRow>> {
        let (_, rows) = self
            .inner
            .read_write_transaction(|tx| {
                let query = query.clone();
                Box::pin(async move {
                    let mut result_set = tx.query(query.statement()).await?;
                    let mut rows = Vec::new();
                    while let Some(row) = result_set.next().await? {
                        rows.push(row);
                    }
                    Ok::<_, SpannerError>(rows)
                })
            })
            .await
            .context("Failed to write to Spanner")?;
        Ok(rows)
    }
}

#[async_trait]
impl Store for SpannerStore {
    async fn select(
        &self,
        table: Table,
        filter: &Filter,
        order: Option<&OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<Row>> {
        let query = select_query(table, filter, order, limit)?;
        let rows = self.read(&query).await?;

        let decoded = rows
            .iter()
            .map(|row| decode_row(table, row))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!("Selected {} {} row(s)", decoded.len(), table);
        Ok(decoded)
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row> {
        let query = insert_query(table, &row)?;
        let rows = self.write_returning(&query).await?;

        let inserted = rows
            .first()
            .with_context(|| format!("Insert into {} returned no row", table))?;
        let inserted = decode_row(table, inserted)?;

        tracing::debug!("Inserted {} row with id: {}", table, inserted["id"]);
        Ok(inserted)
    }

    /// Reads, merges and rewrites the row inside one read-write transaction,
    /// so a write committed by another request in between is never overwritten.
    async fn update(&self, table: Table, row: Row, filter: &Filter) -> Result<Row> {
        // fail on unbindable values before opening a transaction
        split_row(table, &row)?;
        let select = select_query(table, filter, None, Some(2))?;

        let (_, updated) = self
            .inner
            .read_write_transaction(|tx| {
                let select = select.clone();
                let changes = row.clone();
                Box::pin(async move {
                    let mut matching = Vec::new();
                    {
                        let mut result_set = tx.query(select.statement()).await?;
                        while let Some(found) = result_set.next().await? {
                            matching.push(decode_row(table, &found)?);
                        }
                    }

                    if matching.len() > 1 {
                        return Err(TxError::Other(anyhow!(
                            "Multiple {} rows matched a single-row update",
                            table
                        )));
                    }
                    let Some(mut merged) = matching.pop() else {
                        return Err(TxError::Other(anyhow!("No {} row returned for update", table)));
                    };

                    let id = merged
                        .get("id")
                        .and_then(JsonValue::as_i64)
                        .with_context(|| format!("{} row has no integer id", table))?;
                    merged.extend(changes);

                    let update = update_query(table, id, &merged)?;
                    let mut result_set = tx.query(update.statement()).await?;
                    let updated = result_set
                        .next()
                        .await?
                        .with_context(|| format!("No {} row returned for update", table))?;
                    Ok::<_, TxError>(decode_row(table, &updated)?)
                })
            })
            .await
            .with_context(|| format!("Failed to update {} in Spanner", table))?;

        tracing::debug!("Updated {} row with id: {}", table, updated["id"]);
        Ok(updated)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize> {
        let query = delete_query(table, filter)?;

        let (_, count) = self
            .inner
            .read_write_transaction(|tx| {
                let query = query.clone();
                Box::pin(async move { Ok::<_, SpannerError>(tx.update(query.statement()).await?) })
            })
            .await
            .context("Failed to delete from Spanner")?;

        if count <= 0 {
            bail!("No {} row returned for delete", table);
        }
        tracing::debug!("Deleted {} {} row(s)", count, table);
        Ok(count as usize)
    }

    /// Executes `SELECT 1`
    async fn ping(&self) -> Result<()> {
        let query = Query {
            sql: "SELECT 1".to_string(),
            params: Vec::new(),
        };

        if self.read(&query).await.context("Failed to execute health check query")?.is_empty() {
            bail!("Health check query returned no results");
        }
        tracing::debug!("Health check query succeeded");
        Ok(())
    }
}

/// DDL for the sequences, tables and indexes the service needs, keyed by object name
const SCHEMA: &[(&str, &str)] = &[
    (
        "SEQUENCE users_id_seq",
        "CREATE SEQUENCE users_id_seq OPTIONS (sequence_kind = 'bit_reversed_positive')",
    ),
    (
        "TABLE users",
        r#"
CREATE TABLE users (
    id INT64 NOT NULL DEFAULT (GET_NEXT_SEQUENCE_VALUE(SEQUENCE users_id_seq)),
    sort_order INT64 NOT NULL,
    checked BOOL NOT NULL DEFAULT (false),
    attributes JSON,
) PRIMARY KEY (id)
"#,
    ),
    (
        "SEQUENCE attendance_history_id_seq",
        "CREATE SEQUENCE attendance_history_id_seq OPTIONS (sequence_kind = 'bit_reversed_positive')",
    ),
    (
        "TABLE attendance_history",
        r#"
CREATE TABLE attendance_history (
    id INT64 NOT NULL DEFAULT (GET_NEXT_SEQUENCE_VALUE(SEQUENCE attendance_history_id_seq)),
    session_date STRING(MAX) NOT NULL,
    group_name STRING(MAX) NOT NULL,
    session_day STRING(MAX) NOT NULL,
    attributes JSON,
) PRIMARY KEY (id)
"#,
    ),
    (
        "INDEX attendance_history_by_session",
        "CREATE INDEX attendance_history_by_session ON attendance_history (session_date, group_name, session_day)",
    ),
];

/// Schema objects from `SCHEMA` that are absent from the existing DDL
fn missing_ddl(existing: &[String]) -> Vec<String> {
    SCHEMA
        .iter()
        .filter(|&&(object, _)| {
            let (kind, name) = object.split_once(' ').unwrap_or(("", object));
            !existing.iter().any(|stmt| {
                stmt.contains(&format!("CREATE {} {}", kind, name))
                    || stmt.contains(&format!("CREATE {} `{}`", kind, name))
            })
        })
        .map(|&(_, ddl)| ddl.trim().to_string())
        .collect()
}

/// Create whatever the configured database needs and does not have yet:
/// instance, database, then the objects in `SCHEMA`.
async fn auto_provision(config: &SpannerConfig) -> Result<()> {
    tracing::info!("Starting auto-provisioning checks...");

    let admin_client = AdminClient::new(AdminClientConfig::default())
        .await
        .context("Failed to create Spanner admin client")?;

    let instance_path = format!("projects/{}/instances/{}", config.project, config.instance);
    let database_path = config.database_path();

    let lookup = admin_client
        .instance()
        .get_instance(GetInstanceRequest { name: instance_path.clone(), field_mask: None }, None)
        .await;
    if !resource_exists(lookup, &instance_path)? {
        create_instance(&admin_client, config).await?;
    }

    let lookup = admin_client
        .database()
        .get_database(GetDatabaseRequest { name: database_path.clone() }, None)
        .await;
    if !resource_exists(lookup, &database_path)? {
        create_database(&admin_client, config).await?;
    }

    ensure_schema_exists(&admin_client, &database_path).await?;

    tracing::info!("Auto-provisioning complete");
    Ok(())
}

/// Interpret an admin `get_*` call: found, missing (NotFound), or a real failure
fn resource_exists<T>(lookup: Result<T, Status>, path: &str) -> Result<bool> {
    match lookup {
        Ok(_) => {
            tracing::info!("Found {}", path);
            Ok(true)
        }
        Err(status) if status.code() == Code::NotFound => {
            tracing::info!("Not found, creating: {}", path);
            Ok(false)
        }
        Err(status) => bail!("Failed to check {}: {}", path, status.message()),
    }
}

/// Instance config to create instances with; the emulator only knows its own
fn instance_config_path(config: &SpannerConfig) -> String {
    let name = if config.emulator_host.is_some() {
        "emulator-config"
    } else {
        "regional-us-central1"
    };
    format!("projects/{}/instanceConfigs/{}", config.project, name)
}

async fn create_instance(admin_client: &AdminClient, config: &SpannerConfig) -> Result<()> {
    let parent = format!("projects/{}", config.project);
    let request = CreateInstanceRequest {
        instance: Some(Instance {
            name: format!("{}/instances/{}", parent, config.instance),
            config: instance_config_path(config),
            display_name: format!("{} instance", config.instance),
            node_count: 1,
            ..Default::default()
        }),
        instance_id: config.instance.clone(),
        parent,
    };

    admin_client
        .instance()
        .create_instance(request, None)
        .await
        .context("Failed to start instance creation")?
        .wait(None)
        .await
        .context("Failed to create instance")?;

    tracing::info!("Instance created: {}", config.instance);
    Ok(())
}

async fn create_database(admin_client: &AdminClient, config: &SpannerConfig) -> Result<()> {
    let request = CreateDatabaseRequest {
        parent: format!("projects/{}/instances/{}", config.project, config.instance),
        create_statement: format!("CREATE DATABASE `{}`", config.database),
        extra_statements: vec![],
        encryption_config: None,
        database_dialect: DatabaseDialect::GoogleStandardSql as i32,
        proto_descriptors: vec![],
    };

    admin_client
        .database()
        .create_database(request, None)
        .await
        .context("Failed to start database creation")?
        .wait(None)
        .await
        .context("Failed to create database")?;

    tracing::info!("Database created: {}", config.database);
    Ok(())
}

/// Ensure the users and attendance_history schema exists, creating what is missing
async fn ensure_schema_exists(admin_client: &AdminClient, database_path: &str) -> Result<()> {
    let get_ddl_request = GetDatabaseDdlRequest {
        database: database_path.to_string(),
    };

    let ddl_response = admin_client
        .database()
        .get_database_ddl(get_ddl_request, None)
        .await
        .context("Failed to get database DDL")?;

    let statements = missing_ddl(&ddl_response.into_inner().statements);
    if statements.is_empty() {
        tracing::info!("Schema already exists");
        return Ok(());
    }

    tracing::info!("Creating {} missing schema object(s)...", statements.len());

    let update_request = UpdateDatabaseDdlRequest {
        database: database_path.to_string(),
        statements,
        operation_id: String::new(),
        proto_descriptors: vec![],
        throughput_mode: false,
    };

    let mut operation = admin_client
        .database()
        .update_database_ddl(update_request, None)
        .await
        .context("Failed to start schema creation")?;

    operation
        .wait(None)
        .await
        .context("Failed to create schema")?;

    tracing::info!("Schema created successfully");
    Ok(())
}
