//! Schema 迁移
//!
//! 只由种子节点执行；语句全部幂等，重复执行不改变已有数据。

use super::{Database, StorageError};

/// 当前 schema
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS authors (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    bio  TEXT
);
";

/// 应用 schema
pub async fn migrate(db: &Database) -> Result<(), StorageError> {
    log::info!("Applying schema to database '{}'", db.name());
    db.execute_batch(SCHEMA).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Value;

    #[tokio::test]
    async fn test_migrate_creates_authors_table() {
        let db = Database::open_in_memory("app").await.unwrap();
        migrate(&db).await.unwrap();

        let rows = db
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'authors'",
                (),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open_in_memory("app").await.unwrap();
        migrate(&db).await.unwrap();
        db.execute(
            "INSERT INTO authors (name, bio) VALUES (?1, ?2)",
            vec![Value::Text("Ada".into()), Value::Null],
        )
        .await
        .unwrap();

        migrate(&db).await.unwrap();

        let rows = db.query("SELECT COUNT(*) FROM authors", ()).await.unwrap();
        assert!(matches!(rows[0][0], Value::Integer(1)));
    }
}
