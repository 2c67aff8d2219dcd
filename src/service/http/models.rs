//! HTTP API 请求/响应模型

use serde::{Deserialize, Serialize};

pub use crate::storage::{Author, AuthorInput};

/// 存活探针响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub instance: String,
    pub alive: bool,
}

/// 就绪探针响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub instance: String,
    pub ready: bool,
}

/// 错误响应：`{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
