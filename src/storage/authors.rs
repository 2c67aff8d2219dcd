//! authors 表访问

use libsql::Value;
use serde::{Deserialize, Serialize};

use super::{column_i64, column_opt_text, column_text, Database, StorageError};

/// 作者记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
}

/// 创建/更新请求体
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
}

impl AuthorInput {
    pub fn new(name: impl Into<String>, bio: Option<&str>) -> Self {
        Self {
            name: name.into(),
            bio: bio.map(str::to_string),
        }
    }

    /// 名称去掉首尾空白后不能为空
    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

fn bio_value(bio: &Option<String>) -> Value {
    match bio {
        Some(text) => Value::Text(text.clone()),
        None => Value::Null,
    }
}

fn decode_author(row: &[Value]) -> Result<Author, StorageError> {
    Ok(Author {
        id: column_i64(row, 0)?,
        name: column_text(row, 1)?,
        bio: column_opt_text(row, 2)?,
    })
}

/// authors 仓储
#[derive(Debug, Clone)]
pub struct AuthorRepository {
    db: Database,
}

impl AuthorRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 插入并返回新记录
    pub async fn create(&self, input: &AuthorInput) -> Result<Author, StorageError> {
        let rows = self
            .db
            .query(
                "INSERT INTO authors (name, bio) VALUES (?1, ?2) RETURNING id, name, bio",
                vec![Value::Text(input.name.clone()), bio_value(&input.bio)],
            )
            .await?;

        let row = rows.first().ok_or_else(|| StorageError::Decode {
            column: 0,
            reason: "insert returned no row".to_string(),
        })?;
        decode_author(row)
    }

    /// 按 id 升序列出全部作者
    pub async fn list(&self) -> Result<Vec<Author>, StorageError> {
        let rows = self
            .db
            .query("SELECT id, name, bio FROM authors ORDER BY id", ())
            .await?;
        rows.iter().map(|row| decode_author(row)).collect()
    }

    /// 更新名称与简介，返回记录是否存在
    pub async fn update(&self, id: i64, input: &AuthorInput) -> Result<bool, StorageError> {
        let affected = self
            .db
            .execute(
                "UPDATE authors SET name = ?1, bio = ?2 WHERE id = ?3",
                vec![
                    Value::Text(input.name.clone()),
                    bio_value(&input.bio),
                    Value::Integer(id),
                ],
            )
            .await?;
        Ok(affected > 0)
    }

    /// 删除，返回记录是否存在
    pub async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let affected = self
            .db
            .execute("DELETE FROM authors WHERE id = ?1", vec![Value::Integer(id)])
            .await?;
        Ok(affected > 0)
    }
}
