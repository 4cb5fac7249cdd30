//! Errors - エラー型と分類
//!
//! サービス層はすべて `Result<_, CourierError>` を返し、
//! log して続行するか呼び出し元に返すかは呼び出し側が決める。

use thiserror::Error;

/// StoreError は永続化層の失敗
///
/// 1 回の store 呼び出しに閉じたエラー。呼び出し側はその操作だけを
/// rollback 済みとして扱う。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("corrupt row in store: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// CourierError はドメインエラー
#[derive(Debug, Error)]
pub enum CourierError {
    /// Unknown recipient, class or source.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Malformed input: window times, empty id lists, unserializable payloads.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Sink unreachable or non-2xx callback response.
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CourierError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CourierError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CourierError::Validation(message.into())
    }

    /// Client errors are reported back to the caller as-is; everything else
    /// degrades to a generic failure at the consumer-facing surface.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CourierError::Validation(_) | CourierError::NotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_converts_into_courier_error() {
        let err: CourierError = StoreError::Backend("disk full".into()).into();
        assert!(matches!(err, CourierError::Store(_)));
        assert_eq!(err.to_string(), "store backend failure: disk full");
        assert!(!err.is_client_error());
    }

    #[test]
    fn not_found_mentions_kind_and_id() {
        let err = CourierError::not_found("daily quote", 9);
        assert_eq!(err.to_string(), "daily quote not found: 9");
        assert!(err.is_client_error());
    }
}
