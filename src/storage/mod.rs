//! 持久化存储模块
//!
//! 引擎打开的逻辑数据库句柄，底层为 libsql 本地连接。
//! 句柄可廉价克隆，所有克隆共享同一连接；关闭后任何操作返回 [`StorageError::Closed`]。

pub mod authors;
pub mod migrate;

use std::path::Path;
use std::sync::Arc;

use libsql::{params::IntoParams, Builder, Connection, Value};
use thiserror::Error;
use tokio::sync::Mutex;

pub use authors::{Author, AuthorInput, AuthorRepository};
pub use migrate::migrate;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("libsql error: {0}")]
    Libsql(#[from] libsql::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database '{0}' is closed")]
    Closed(String),

    #[error("unexpected value in column {column}: {reason}")]
    Decode { column: usize, reason: String },
}

/// 一行查询结果（按列顺序）
pub type Row = Vec<Value>;

/// 逻辑数据库句柄
#[derive(Clone)]
pub struct Database {
    name: Arc<str>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Database {
    /// 打开（必要时创建）本地数据库文件
    pub async fn open_local(name: &str, path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Builder::new_local(path).build().await?.connect()?;
        log::debug!("Opened database '{}' at {}", name, path.display());
        Ok(Self::from_connection(name, conn))
    }

    /// 内存数据库（测试与单机模式）
    pub async fn open_in_memory(name: &str) -> Result<Self, StorageError> {
        let conn = Builder::new_local(":memory:").build().await?.connect()?;
        Ok(Self::from_connection(name, conn))
    }

    fn from_connection(name: &str, conn: Connection) -> Self {
        Self {
            name: Arc::from(name),
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 执行单条语句，返回受影响行数
    pub async fn execute(&self, sql: &str, params: impl IntoParams) -> Result<u64, StorageError> {
        let guard = self.conn.lock().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| StorageError::Closed(self.name.to_string()))?;
        Ok(conn.execute(sql, params).await?)
    }

    /// 执行多条以分号分隔的语句（无参数）
    pub async fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        let guard = self.conn.lock().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| StorageError::Closed(self.name.to_string()))?;
        conn.execute_batch(sql).await?;
        Ok(())
    }

    /// 查询并在持锁期间取完所有行
    pub async fn query(&self, sql: &str, params: impl IntoParams) -> Result<Vec<Row>, StorageError> {
        let guard = self.conn.lock().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| StorageError::Closed(self.name.to_string()))?;

        let mut rows = conn.query(sql, params).await?;
        let columns = rows.column_count();
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut values = Vec::with_capacity(columns as usize);
            for i in 0..columns {
                values.push(row.get_value(i)?);
            }
            out.push(values);
        }
        Ok(out)
    }

    /// 连通性检查：`SELECT 1`
    pub async fn ping(&self) -> Result<(), StorageError> {
        let rows = self.query("SELECT 1", ()).await?;
        match rows.first().and_then(|r| r.first()) {
            Some(Value::Integer(1)) => Ok(()),
            other => Err(StorageError::Decode {
                column: 0,
                reason: format!("ping returned {:?}", other),
            }),
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.conn.lock().await.is_none()
    }

    /// 关闭连接；所有克隆随之失效，重复关闭无副作用
    pub async fn close(&self) {
        if self.conn.lock().await.take().is_some() {
            log::debug!("Closed database '{}'", self.name);
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 列解码
// ═══════════════════════════════════════════════════════════════════════════

pub(crate) fn column_i64(row: &[Value], column: usize) -> Result<i64, StorageError> {
    match row.get(column) {
        Some(Value::Integer(v)) => Ok(*v),
        other => Err(StorageError::Decode {
            column,
            reason: format!("expected integer, got {:?}", other),
        }),
    }
}

pub(crate) fn column_text(row: &[Value], column: usize) -> Result<String, StorageError> {
    match row.get(column) {
        Some(Value::Text(v)) => Ok(v.clone()),
        other => Err(StorageError::Decode {
            column,
            reason: format!("expected text, got {:?}", other),
        }),
    }
}

pub(crate) fn column_opt_text(row: &[Value], column: usize) -> Result<Option<String>, StorageError> {
    match row.get(column) {
        Some(Value::Null) => Ok(None),
        Some(Value::Text(v)) => Ok(Some(v.clone())),
        other => Err(StorageError::Decode {
            column,
            reason: format!("expected text or null, got {:?}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_execute_and_query() {
        let db = Database::open_in_memory("test").await.unwrap();
        db.execute("CREATE TABLE users (id INTEGER, email TEXT)", ())
            .await
            .unwrap();

        let affected = db
            .execute(
                "INSERT INTO users (id, email) VALUES (?1, ?2)",
                vec![Value::Integer(1), Value::Text("alice@example.com".into())],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = db.query("SELECT id, email FROM users", ()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(column_i64(&rows[0], 0).unwrap(), 1);
        assert_eq!(column_text(&rows[0], 1).unwrap(), "alice@example.com");
    }

    #[tokio::test]
    async fn test_ping() {
        let db = Database::open_in_memory("test").await.unwrap();
        assert!(db.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_database_rejects_operations() {
        let db = Database::open_in_memory("test").await.unwrap();
        let clone = db.clone();

        db.close().await;
        db.close().await;

        assert!(clone.is_closed().await);
        assert!(matches!(clone.ping().await, Err(StorageError::Closed(name)) if name == "test"));
        assert!(matches!(
            clone.execute("SELECT 1", ()).await,
            Err(StorageError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_open_local_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("app.db");

        let db = Database::open_local("app", &path).await.unwrap();
        db.execute("CREATE TABLE kv (k TEXT, v TEXT)", ()).await.unwrap();
        db.execute(
            "INSERT INTO kv (k, v) VALUES (?1, NULL)",
            vec![Value::Text("a".into())],
        )
        .await
        .unwrap();
        db.close().await;

        let reopened = Database::open_local("app", &path).await.unwrap();
        let rows = reopened.query("SELECT k, v FROM kv", ()).await.unwrap();
        assert_eq!(column_text(&rows[0], 0).unwrap(), "a");
        assert_eq!(column_opt_text(&rows[0], 1).unwrap(), None);
    }

    #[tokio::test]
    async fn test_decode_mismatch() {
        let db = Database::open_in_memory("test").await.unwrap();
        let rows = db.query("SELECT 'x'", ()).await.unwrap();
        assert!(matches!(
            column_i64(&rows[0], 0),
            Err(StorageError::Decode { column: 0, .. })
        ));
    }
}
