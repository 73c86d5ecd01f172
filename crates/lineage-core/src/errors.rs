use lineage_core_types::RequestId;
use thiserror::Error;

/// Result type alias for pure core code
pub type Result<T> = std::result::Result<T, LineageError>;

/// Result type alias for store, engine and service operations
pub type ExResult<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that callers can match on
/// without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExErrorKind {
    // Lookup
    NotFound,
    Deleted,
    Conflict,

    // Lineage misuse
    InvalidParent,
    CycleDetected,

    // Storage
    StorageFailure,
    /// Stored bytes no longer match their content address
    Corrupted,

    // Non-fatal: the legacy mirror is stale, the primary write succeeded
    DualWriteWarning,

    // Retention
    /// Deletion of a protected version; never overridable
    RetentionViolation,

    // Input / collaborators
    InvalidInput,
    TransformationFailed,

    // Integration/IO
    Persistence,
    Io,
    Serialization,
    Config,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::Deleted => "ERR_DELETED",
            ExErrorKind::Conflict => "ERR_CONFLICT",
            ExErrorKind::InvalidParent => "ERR_INVALID_PARENT",
            ExErrorKind::CycleDetected => "ERR_CYCLE_DETECTED",
            ExErrorKind::StorageFailure => "ERR_STORAGE_FAILURE",
            ExErrorKind::Corrupted => "ERR_CORRUPTED",
            ExErrorKind::DualWriteWarning => "ERR_DUAL_WRITE_WARNING",
            ExErrorKind::RetentionViolation => "ERR_RETENTION_VIOLATION",
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::TransformationFailed => "ERR_TRANSFORMATION_FAILED",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Config => "ERR_CONFIG",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries a classification for programmatic handling plus optional
/// context (operation, entity, correlation ids) for debugging.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity_id: Option<String>,
    request_id: Option<RequestId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity_id: None,
            request_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add entity ID context (version, edge or model id)
    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// Add request ID context
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }

    /// Whether the storage adapter may retry the failed call
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ExErrorKind::StorageFailure | ExErrorKind::Io)
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(entity_id) = &self.entity_id {
            write!(f, " (entity_id: {})", entity_id)?;
        }
        if let Some(source) = &self.source {
            write!(f, " <- {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Domain failures raised by pure core code
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LineageError {
    /// Raw table bytes are not UTF-8
    #[error("Table content is not valid UTF-8")]
    InvalidEncoding,

    /// A quoted field was never closed
    #[error("Unterminated quoted field starting on line {line}")]
    UnterminatedQuote { line: usize },

    /// Row width differs from the header width
    #[error("Row {row} has {found} fields, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// Table has no header row
    #[error("Table has no columns")]
    EmptyTable,

    /// A transformation step list failed validation
    #[error("Invalid transformation step: {reason}")]
    InvalidStep { reason: String },

    /// A retention policy failed validation
    #[error("Invalid retention policy: {reason}")]
    InvalidPolicy { reason: String },

    /// Retention input references a parent twice or forms a loop
    #[error("Retention input is not a forest at version {version_id}")]
    MalformedForest { version_id: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl From<LineageError> for ExError {
    fn from(err: LineageError) -> Self {
        match err {
            LineageError::InvalidEncoding
            | LineageError::UnterminatedQuote { .. }
            | LineageError::RaggedRow { .. }
            | LineageError::EmptyTable => ExError::new(ExErrorKind::InvalidInput)
                .with_op("canonicalize")
                .with_message(err.to_string()),

            LineageError::InvalidStep { .. } => ExError::new(ExErrorKind::InvalidInput)
                .with_op("validate_steps")
                .with_message(err.to_string()),

            LineageError::InvalidPolicy { .. } => ExError::new(ExErrorKind::InvalidInput)
                .with_op("plan_retention")
                .with_message(err.to_string()),

            LineageError::MalformedForest { ref version_id } => {
                ExError::new(ExErrorKind::Internal)
                    .with_op("plan_retention")
                    .with_entity_id(version_id.clone())
                    .with_message(err.to_string())
            }

            LineageError::Serialization { message } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }
        }
    }
}

impl From<serde_json::Error> for LineageError {
    fn from(err: serde_json::Error) -> Self {
        LineageError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ExError {
    fn from(err: serde_json::Error) -> Self {
        ExError::new(ExErrorKind::Serialization).with_message(err.to_string())
    }
}
