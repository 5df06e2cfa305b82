use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// # NDOC
/// component: `subsystems::mail_trace::errors`
/// purpose: Error taxonomy shared by every boundary operation. Kinds map
///   directly to the externally visible `{error:{type,message,details?}}`
///   shape; callers should match on `kind`, not on `Display` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailTraceErrorKind {
    BadRequest,
    Unauthorized,
    NotFound,
    Conflict,
    ValidationError,
    Internal,
}

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct MailTraceError {
    pub kind: MailTraceErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl MailTraceError {
    pub fn new(kind: MailTraceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field_paths: None,
            context: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(MailTraceErrorKind::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(MailTraceErrorKind::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(MailTraceErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(MailTraceErrorKind::Conflict, message)
    }

    pub fn validation(message: impl Into<String>, field_paths: Vec<String>) -> Self {
        Self {
            kind: MailTraceErrorKind::ValidationError,
            message: message.into(),
            field_paths: Some(field_paths),
            context: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(MailTraceErrorKind::Internal, message)
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// The externally-visible `{error:{type,message,details?}}` envelope
    /// required by the sync boundary (§7 "User-visible behavior").
    pub fn to_envelope(&self) -> Value {
        serde_json::json!({
            "error": {
                "type": self.kind,
                "message": self.message,
                "details": self.context,
            }
        })
    }
}
