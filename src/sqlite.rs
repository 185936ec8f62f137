use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::lock::Mutex;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Statement, ToSql, Transaction};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::filter::{qualify, quote_ident, Filter, ROOT_ALIAS};
use crate::service::Service;

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl Value {
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Integer(value) => *value == 0,
            Value::Real(value) => *value == 0.0,
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(value) => Value::Integer(value),
            ValueRef::Real(value) => Value::Real(value),
            // Invalid UTF-8 is kept byte for byte; text accessors then reject it.
            ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => Value::Text(text.to_string()),
                Err(_) => Value::Blob(bytes.to_vec()),
            },
            ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(value) => ToSqlOutput::Owned(SqlValue::Integer(*value)),
            Value::Real(value) => ToSqlOutput::Owned(SqlValue::Real(*value)),
            Value::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Value::Blob(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
            Value::Boolean(value) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*value))),
        })
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Real(value) => serializer.serialize_f64(*value),
            Value::Text(value) => serializer.serialize_str(value),
            Value::Blob(value) => value.serialize(serializer),
            Value::Boolean(value) => serializer.serialize_bool(*value),
        }
    }
}

/// Named parameter bindings for raw SQL statements
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub values: HashMap<String, Value>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }
    /// Add a named value; the leading `:` is optional
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        let name = if name.starts_with(':') {
            name.to_string()
        } else {
            format!(":{name}")
        };
        self.values.insert(name, value.into());
        self
    }
}

/// Raw SQL statement with named parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Params,
}

impl SqlQuery {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            params: Params::new(),
        }
    }
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// One result row, columns kept in statement order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|index| self.values.get(index))
    }

    fn require(&self, column: &str) -> Result<&Value> {
        self.get(column).ok_or_else(|| StoreError::Decode {
            column: column.to_string(),
            reason: "column missing from row".to_string(),
        })
    }

    pub fn text(&self, column: &str) -> Result<String> {
        self.opt_text(column)?.ok_or_else(|| decode_error(column, "unexpected NULL"))
    }

    pub fn opt_text(&self, column: &str) -> Result<Option<String>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Text(value) => Ok(Some(value.clone())),
            other => Err(decode_error(column, &format!("expected text, found {other:?}"))),
        }
    }

    pub fn opt_integer(&self, column: &str) -> Result<Option<i64>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Integer(value) => Ok(Some(*value)),
            other => Err(decode_error(
                column,
                &format!("expected integer, found {other:?}"),
            )),
        }
    }

    /// SQLite stores booleans as 0/1 integers.
    pub fn boolean(&self, column: &str) -> Result<bool> {
        match self.require(column)? {
            Value::Boolean(value) => Ok(*value),
            Value::Integer(value) => Ok(*value != 0),
            other => Err(decode_error(
                column,
                &format!("expected boolean, found {other:?}"),
            )),
        }
    }
}

fn decode_error(column: &str, reason: &str) -> StoreError {
    StoreError::Decode {
        column: column.to_string(),
        reason: reason.to_string(),
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Column write applied by an update
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Set(Value),
    Increment(Value),
    Decrement(Value),
    Multiply(Value),
    Divide(Value),
}

/// CRUD operation types
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOperation {
    pub table: String,
    pub rows: Vec<Vec<(String, Value)>>,
    /// Insert with `OR IGNORE`, skipping rows that hit a unique constraint.
    pub skip_duplicates: bool,
}

impl CreateOperation {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            rows: Vec::new(),
            skip_duplicates: false,
        }
    }
    pub fn with_row(mut self, row: Vec<(&str, Value)>) -> Self {
        self.rows.push(
            row.into_iter()
                .map(|(column, value)| (column.to_string(), value))
                .collect(),
        );
        self
    }
    pub fn skip_duplicates(mut self, skip: bool) -> Self {
        self.skip_duplicates = skip;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadOperation {
    pub table: String,
    pub filter: Filter,
    pub fields: Option<Vec<String>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub order_by: Vec<(String, SortOrder)>,
    /// Deduplicate on these columns, keeping the first row; pagination
    /// applies after deduplication.
    pub distinct: Vec<String>,
}

impl ReadOperation {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|field| field.to_string()).collect());
        self
    }
    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }
    pub fn with_offset(mut self, offset: Option<u32>) -> Self {
        self.offset = offset;
        self
    }
    pub fn order_by(mut self, column: &str, order: SortOrder) -> Self {
        self.order_by.push((column.to_string(), order));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    pub table: String,
    pub filter: Filter,
    pub assignments: Vec<(String, Assignment)>,
}

impl UpdateOperation {
    pub fn new(table: &str, filter: Filter) -> Self {
        Self {
            table: table.to_string(),
            filter,
            assignments: Vec::new(),
        }
    }
    pub fn assign(mut self, column: &str, assignment: Assignment) -> Self {
        self.assignments.push((column.to_string(), assignment));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOperation {
    pub table: String,
    pub filter: Filter,
}

impl DeleteOperation {
    pub fn new(table: &str, filter: Filter) -> Self {
        Self {
            table: table.to_string(),
            filter,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrudOperation {
    Create(CreateOperation),
    Read(ReadOperation),
    Update(UpdateOperation),
    Delete(DeleteOperation),
}

impl CrudOperation {
    pub fn table(&self) -> &str {
        match self {
            CrudOperation::Create(op) => &op.table,
            CrudOperation::Read(op) => &op.table,
            CrudOperation::Update(op) => &op.table,
            CrudOperation::Delete(op) => &op.table,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrudResult {
    Rows(Vec<Row>),
    Affected(usize),
}

impl CrudResult {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            CrudResult::Rows(rows) => rows,
            CrudResult::Affected(_) => Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            CrudResult::Rows(rows) => rows.len(),
            CrudResult::Affected(count) => *count,
        }
    }
}

/// Schema definition for the SQLite database
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub tables: Vec<TableDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }
    pub fn add_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }

    /// DDL for every table followed by its indexes.
    pub fn create_sql(&self) -> String {
        let mut statements = Vec::new();
        for table in &self.tables {
            statements.push(table.create_sql());
            for index in &table.indexes {
                statements.push(index.create_sql(&table.name));
            }
        }
        statements
            .into_iter()
            .map(|statement| format!("{statement};\n"))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }
    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|column| column.to_string()).collect();
        self
    }
    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }
    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ColumnDefinition::sql).collect();
        if !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", quote_list(&self.primary_key)));
        }
        for foreign_key in &self.foreign_keys {
            parts.push(foreign_key.sql());
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_ident(&self.name),
            parts.join(",\n    ")
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub constraints: Vec<ColumnConstraint>,
    pub default_value: Option<DefaultValue>,
}

impl ColumnDefinition {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            constraints: Vec::new(),
            default_value: None,
        }
    }
    pub fn constraint(mut self, constraint: ColumnConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default_value = Some(default);
        self
    }

    fn sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.data_type.sql());
        for constraint in &self.constraints {
            sql.push(' ');
            sql.push_str(&constraint.sql(&self.name));
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.sql());
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataType {
    Integer,
    Text,
    Real,
    Blob,
    Boolean,
}

impl DataType {
    fn sql(self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Text => "TEXT",
            DataType::Real => "REAL",
            DataType::Blob => "BLOB",
            DataType::Boolean => "BOOLEAN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnConstraint {
    PrimaryKey,
    NotNull,
    Unique,
    /// Rejects any stored value that is not an integer or NULL, such as the
    /// REAL SQLite produces when integer arithmetic overflows.
    IntegerOnly,
}

impl ColumnConstraint {
    fn sql(self, column: &str) -> String {
        match self {
            ColumnConstraint::PrimaryKey => "PRIMARY KEY".to_string(),
            ColumnConstraint::NotNull => "NOT NULL".to_string(),
            ColumnConstraint::Unique => "UNIQUE".to_string(),
            ColumnConstraint::IntegerOnly => format!(
                "CHECK (typeof({}) IN ('integer', 'null'))",
                quote_ident(column)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Text(String),
    Real(f64),
    Boolean(bool),
    Null,
    CurrentTimestamp,
}

impl DefaultValue {
    fn sql(&self) -> String {
        match self {
            DefaultValue::Integer(value) => value.to_string(),
            DefaultValue::Text(value) => format!("'{}'", value.replace('\'', "''")),
            DefaultValue::Real(value) => value.to_string(),
            DefaultValue::Boolean(value) => i64::from(*value).to_string(),
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    pub foreign_table: String,
    pub foreign_column: String,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

impl ForeignKey {
    fn sql(&self) -> String {
        format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            quote_ident(&self.column),
            quote_ident(&self.foreign_table),
            quote_ident(&self.foreign_column),
            self.on_delete.sql(),
            self.on_update.sql(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForeignKeyAction {
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

impl ForeignKeyAction {
    fn sql(self) -> &'static str {
        match self {
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::SetDefault => "SET DEFAULT",
            ForeignKeyAction::Restrict => "RESTRICT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(name: &str, columns: &[&str], unique: bool) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|column| column.to_string()).collect(),
            unique,
        }
    }

    pub fn create_sql(&self, table: &str) -> String {
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            quote_ident(&self.name),
            quote_ident(table),
            quote_list(&self.columns)
        )
    }
}

fn quote_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Path that opens a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// SQLite Service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
    /// Schema definition for the database
    pub schema: Schema,
    /// How long a statement waits on a locked database
    pub busy_timeout: Duration,
}

impl SqliteConfig {
    /// Create a new SQLite config with path and schema
    pub fn new(db_path: impl Into<String>, schema: Schema) -> Self {
        Self {
            db_path: db_path.into(),
            schema,
            busy_timeout: Duration::from_millis(5000),
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// Owns the single SQLite connection. Calls are serialised through an async
/// mutex; the connection exists between `start` and `stop`.
pub struct SqliteService {
    config: SqliteConfig,
    connection: Mutex<Option<Connection>>,
}

impl SqliteService {
    /// Create a new SQLite service with the given config
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.config.db_path
    }

    pub async fn is_open(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Runs `f` against the open connection.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
        T: Send,
    {
        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or(StoreError::NotStarted)?;
        f(connection)
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling back on `Err`.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send,
        T: Send,
    {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(StoreError::NotStarted)?;
        let tx = connection.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "rolling back transaction");
                tx.rollback()?;
                Err(err)
            }
        }
    }

    pub async fn execute_sql(&self, query: SqlQuery) -> Result<Vec<Row>> {
        self.with_connection(move |conn| {
            debug!(sql = %query.statement, params = query.params.values.len(), "executing raw statement");
            let mut stmt = conn.prepare(&query.statement)?;
            let named: Vec<(&str, &dyn ToSql)> = query
                .params
                .values
                .iter()
                .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                .collect();
            collect_rows(&mut stmt, named.as_slice())
        })
        .await
    }

    /// Perform a CRUD operation (type-safe API)
    pub async fn execute_crud(&self, op: CrudOperation) -> Result<CrudResult> {
        self.with_connection(move |conn| run_crud(conn, &op)).await
    }
}

#[async_trait]
impl Service for SqliteService {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn start(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        info!(path = %self.config.db_path, "starting sqlite service");
        let connection = if self.config.db_path == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            Connection::open(&self.config.db_path)?
        };
        connection.busy_timeout(self.config.busy_timeout)?;
        connection.pragma_update(None, "foreign_keys", true)?;
        initialize_schema(&connection, &self.config.schema)?;
        *guard = Some(connection);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.take() {
            connection.close().map_err(|(_, err)| StoreError::from(err))?;
            info!(path = %self.config.db_path, "sqlite service stopped");
        }
        Ok(())
    }
}

pub fn initialize_schema(conn: &Connection, schema: &Schema) -> Result<()> {
    let sql = schema.create_sql();
    debug!(tables = schema.tables.len(), "applying schema");
    conn.execute_batch(&sql)?;
    Ok(())
}

/// Executes one CRUD operation against any connection, including an open
/// transaction.
pub fn run_crud(conn: &Connection, op: &CrudOperation) -> Result<CrudResult> {
    match op {
        CrudOperation::Create(create) => run_create(conn, create),
        CrudOperation::Read(read) => run_read(conn, read).map(CrudResult::Rows),
        CrudOperation::Update(update) => run_update(conn, update),
        CrudOperation::Delete(delete) => run_delete(conn, delete),
    }
}

fn run_create(conn: &Connection, op: &CreateOperation) -> Result<CrudResult> {
    conn.execute_batch("SAVEPOINT crud_create")?;
    match insert_rows(conn, op) {
        Ok(rows) => {
            conn.execute_batch("RELEASE crud_create")?;
            Ok(CrudResult::Rows(rows))
        }
        Err(err) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK TO crud_create; RELEASE crud_create")
            {
                warn!(error = %rollback, "failed to roll back create");
            }
            Err(err)
        }
    }
}

fn insert_rows(conn: &Connection, op: &CreateOperation) -> Result<Vec<Row>> {
    let verb = if op.skip_duplicates {
        "INSERT OR IGNORE"
    } else {
        "INSERT"
    };
    let select_sql = format!("SELECT * FROM {} WHERE rowid = ?", quote_ident(&op.table));
    let mut inserted = Vec::with_capacity(op.rows.len());
    for row in &op.rows {
        let sql = if row.is_empty() {
            format!("{verb} INTO {} DEFAULT VALUES", quote_ident(&op.table))
        } else {
            let columns: Vec<String> = row.iter().map(|(column, _)| quote_ident(column)).collect();
            let slots = vec!["?"; row.len()].join(", ");
            format!(
                "{verb} INTO {} ({}) VALUES ({slots})",
                quote_ident(&op.table),
                columns.join(", ")
            )
        };
        debug!(table = %op.table, sql = %sql, params = row.len(), "executing insert");
        let changed = conn.execute(&sql, params_from_iter(row.iter().map(|(_, value)| value)))?;
        if changed == 0 {
            continue;
        }
        let mut stmt = conn.prepare_cached(&select_sql)?;
        inserted.extend(collect_rows(&mut stmt, [conn.last_insert_rowid()])?);
    }
    Ok(inserted)
}

fn run_read(conn: &Connection, op: &ReadOperation) -> Result<Vec<Row>> {
    let projection = match &op.fields {
        None => format!("{ROOT_ALIAS}.*"),
        Some(fields) => {
            if let Some(missing) = op.distinct.iter().find(|column| !fields.contains(column)) {
                return Err(StoreError::invalid(format!(
                    "distinct column `{missing}` is not among the selected fields"
                )));
            }
            fields
                .iter()
                .map(|field| format!("{} AS {}", qualify(ROOT_ALIAS, field), quote_ident(field)))
                .collect::<Vec<_>>()
                .join(", ")
        }
    };
    let (where_sql, mut params) = op.filter.to_sql();
    let mut sql = format!(
        "SELECT {projection} FROM {} AS {ROOT_ALIAS} WHERE {where_sql} ORDER BY ",
        quote_ident(&op.table)
    );
    for (column, order) in &op.order_by {
        sql.push_str(&format!("{} {}, ", qualify(ROOT_ALIAS, column), order.sql()));
    }
    sql.push_str(&format!("{ROOT_ALIAS}.rowid ASC"));

    let paginate_in_sql = op.distinct.is_empty();
    if paginate_in_sql && (op.limit.is_some() || op.offset.is_some()) {
        sql.push_str(" LIMIT ? OFFSET ?");
        params.push(Value::Integer(op.limit.map_or(-1, i64::from)));
        params.push(Value::Integer(op.offset.map_or(0, i64::from)));
    }

    debug!(table = %op.table, sql = %sql, params = params.len(), "executing read");
    let mut stmt = conn.prepare(&sql)?;
    let rows = collect_rows(&mut stmt, params_from_iter(params.iter()))?;
    if paginate_in_sql {
        return Ok(rows);
    }

    let mut seen: Vec<Vec<Value>> = Vec::new();
    let mut unique = Vec::new();
    for row in rows {
        let key: Vec<Value> = op
            .distinct
            .iter()
            .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
            .collect();
        if !seen.contains(&key) {
            seen.push(key);
            unique.push(row);
        }
    }
    let offset = op.offset.unwrap_or(0) as usize;
    let limit = op.limit.map_or(usize::MAX, |limit| limit as usize);
    Ok(unique.into_iter().skip(offset).take(limit).collect())
}

fn run_update(conn: &Connection, op: &UpdateOperation) -> Result<CrudResult> {
    if op.assignments.is_empty() {
        return Ok(CrudResult::Affected(0));
    }
    let mut params = Vec::with_capacity(op.assignments.len());
    let mut sets = Vec::with_capacity(op.assignments.len());
    for (column, assignment) in &op.assignments {
        let target = quote_ident(column);
        let (expression, value) = match assignment {
            Assignment::Set(value) => ("?".to_string(), value),
            Assignment::Increment(value) => (format!("{target} + ?"), value),
            Assignment::Decrement(value) => (format!("{target} - ?"), value),
            Assignment::Multiply(value) => (format!("{target} * ?"), value),
            Assignment::Divide(value) => {
                if value.is_zero() {
                    return Err(StoreError::invalid(format!(
                        "division by zero on column `{column}`"
                    )));
                }
                (format!("{target} / ?"), value)
            }
        };
        sets.push(format!("{target} = {expression}"));
        params.push(value.clone());
    }
    let (where_sql, where_params) = op.filter.to_sql();
    params.extend(where_params);
    let sql = format!(
        "UPDATE {table} SET {} WHERE rowid IN (SELECT {ROOT_ALIAS}.rowid FROM {table} AS {ROOT_ALIAS} WHERE {where_sql})",
        sets.join(", "),
        table = quote_ident(&op.table),
    );
    debug!(table = %op.table, sql = %sql, params = params.len(), "executing update");
    let affected = conn.execute(&sql, params_from_iter(params.iter()))?;
    Ok(CrudResult::Affected(affected))
}

fn run_delete(conn: &Connection, op: &DeleteOperation) -> Result<CrudResult> {
    let (where_sql, params) = op.filter.to_sql();
    let sql = format!(
        "DELETE FROM {table} WHERE rowid IN (SELECT {ROOT_ALIAS}.rowid FROM {table} AS {ROOT_ALIAS} WHERE {where_sql})",
        table = quote_ident(&op.table),
    );
    debug!(table = %op.table, sql = %sql, params = params.len(), "executing delete");
    let affected = conn.execute(&sql, params_from_iter(params.iter()))?;
    Ok(CrudResult::Affected(affected))
}

fn collect_rows<P: rusqlite::Params>(stmt: &mut Statement<'_>, params: P) -> Result<Vec<Row>> {
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let mut rows = stmt.query(params)?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|index| row.get_ref(index).map(Value::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        result.push(Row::new(columns.clone(), values));
    }
    Ok(result)
}
