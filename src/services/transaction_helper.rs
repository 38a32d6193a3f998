//! services/transaction_helper.rs
//! Acceso al store compartido (SQLite) con conexiones de vida corta:
//! abrir, una sentencia, commit, cerrar. Los errores de contención
//! (BUSY / LOCKED) se reintentan con una única política de backoff.

use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{query::Query, ConnectOptions, Connection, Sqlite};
use thiserror::Error;

use crate::services::retry::{retry_classified, RetryPolicy};

/// Códigos primarios de SQLite para contención.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database busy after retries: {0}")]
    Contention(#[source] sqlx::Error),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    fn classify(err: sqlx::Error) -> Self {
        if is_contention(&err) {
            StoreError::Contention(err)
        } else {
            StoreError::Database(err)
        }
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::Contention(_))
    }

    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Database(err) | StoreError::Contention(err) => err
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false),
        }
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED (y extendidos), o los mensajes
/// `database is locked` / `database table is locked`.
pub fn is_contention(err: &sqlx::Error) -> bool {
    let Some(db_err) = err.as_database_error() else {
        return false;
    };
    if let Some(code) = db_err.code().and_then(|c| c.parse::<i32>().ok()) {
        // Los códigos extendidos llevan el primario en el byte bajo
        let primary = code & 0xff;
        if primary == SQLITE_BUSY || primary == SQLITE_LOCKED {
            return true;
        }
    }
    is_lock_message(db_err.message())
}

fn is_lock_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked") || message.contains("database table is locked")
}

/// Valor ligado a una sentencia. Las sentencias se reconstruyen en cada
/// intento, por eso se guardan los valores y no la query de sqlx.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Integer(i64),
    Text(String),
    Null,
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Una sentencia SQL con sus parámetros posicionales.
#[derive(Debug, Clone)]
pub struct Statement {
    sql: Cow<'static, str>,
    params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<Cow<'static, str>>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    fn query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        let mut query = sqlx::query(&self.sql);
        for param in &self.params {
            query = match param {
                SqlValue::Integer(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.as_str()),
                SqlValue::Null => query.bind(None::<String>),
            };
        }
        query
    }
}

/// Política única de contención: 5 intentos, 100ms·2ⁿ (+ jitter), tope 2s.
pub fn contention_policy() -> RetryPolicy {
    RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(2))
}

#[derive(Debug, Clone)]
pub struct Store {
    options: SqliteConnectOptions,
    policy: RetryPolicy,
}

impl Store {
    pub fn open(path: &Path, busy_timeout: Duration) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(busy_timeout);
        Self {
            options,
            policy: contention_policy(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Corre migraciones con sqlx
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        let mut conn = self.connect().await?;
        sqlx::migrate!("./migrations").run(&mut conn).await?;
        conn.close().await?;
        Ok(())
    }

    pub async fn connect(&self) -> Result<SqliteConnection, sqlx::Error> {
        self.options.connect().await
    }

    /// Ejecuta una sentencia y devuelve las filas afectadas.
    pub async fn execute(&self, stmt: &Statement) -> Result<u64, StoreError> {
        self.with_connection(move |mut conn| async move {
            let result = stmt.query().execute(&mut conn).await;
            finish(conn, result).await.map(|r| r.rows_affected())
        })
        .await
    }

    /// Ejecuta un INSERT y devuelve el rowid generado.
    pub async fn insert(&self, stmt: &Statement) -> Result<i64, StoreError> {
        self.with_connection(move |mut conn| async move {
            let result = stmt.query().execute(&mut conn).await;
            finish(conn, result).await.map(|r| r.last_insert_rowid())
        })
        .await
    }

    pub async fn fetch_optional<T, M>(&self, stmt: &Statement, map: M) -> Result<Option<T>, StoreError>
    where
        M: Fn(&SqliteRow) -> Result<T, sqlx::Error>,
    {
        let map = &map;
        self.with_connection(move |mut conn| async move {
            let result = stmt.query().fetch_optional(&mut conn).await;
            let row = finish(conn, result).await?;
            row.as_ref().map(map).transpose()
        })
        .await
    }

    pub async fn fetch_all<T, M>(&self, stmt: &Statement, map: M) -> Result<Vec<T>, StoreError>
    where
        M: Fn(&SqliteRow) -> Result<T, sqlx::Error>,
    {
        let map = &map;
        self.with_connection(move |mut conn| async move {
            let result = stmt.query().fetch_all(&mut conn).await;
            let rows = finish(conn, result).await?;
            rows.iter().map(map).collect()
        })
        .await
    }

    /// Abre una conexión nueva por intento; nunca se retiene entre intentos.
    async fn with_connection<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn(SqliteConnection) -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let op = &op;
        retry_classified(
            &self.policy,
            move || async move {
                let conn = self.connect().await?;
                op(conn).await
            },
            is_contention,
        )
        .await
        .map_err(StoreError::classify)
    }
}

/// Cierra la conexión tras la sentencia, conservando el error de la sentencia si lo hubo.
async fn finish<T>(conn: SqliteConnection, result: Result<T, sqlx::Error>) -> Result<T, sqlx::Error> {
    let closed = conn.close().await;
    let value = result?;
    closed?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lock_messages_count_as_contention() {
        assert!(is_lock_message("database is locked"));
        assert!(is_lock_message("Database table is locked: email_campaigns"));
        assert!(!is_lock_message("UNIQUE constraint failed: busy_hours.id"));
        assert!(!is_lock_message("no such column: busy"));
    }

    #[test]
    fn errors_without_a_database_error_are_not_contention() {
        assert!(!is_contention(&sqlx::Error::RowNotFound));
        assert!(!StoreError::classify(sqlx::Error::RowNotFound).is_contention());
    }
}
