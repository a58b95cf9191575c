use crate::model::EntityKind;
use thiserror::Error;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that can be used for programmatic
/// error handling, tests, and the status text handed to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Validation
    InvalidInput,
    NotFound,

    // Warehouse semantics
    /// A second open version was about to be created, or a derived table
    /// would break one of its structural guarantees
    InvariantViolation,
    /// A child row references a parent business key with no open version
    UnresolvedReference,

    // Integration/IO
    /// Storage was busy, locked or timed out; the whole batch may be retried
    TransientIo,
    Persistence,
    Serialization,
    Io,
    Config,
    ExternalService,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::InvariantViolation => "ERR_INVARIANT_VIOLATION",
            ExErrorKind::UnresolvedReference => "ERR_UNRESOLVED_REFERENCE",
            ExErrorKind::TransientIo => "ERR_TRANSIENT_IO",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Config => "ERR_CONFIG",
            ExErrorKind::ExternalService => "ERR_EXTERNAL_SERVICE",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries a classification kind plus the load context (operation, entity
/// type, business key, batch id) that was active when the error happened.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity: Option<String>,
    business_key: Option<String>,
    batch_id: Option<i64>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity: None,
            business_key: None,
            batch_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add entity type context
    pub fn with_entity(mut self, entity: EntityKind) -> Self {
        self.entity = Some(entity.name().to_string());
        self
    }

    /// Add business key context
    pub fn with_business_key(mut self, key: impl Into<String>) -> Self {
        self.business_key = Some(key.into());
        self
    }

    /// Add batch id context
    pub fn with_batch_id(mut self, batch_id: i64) -> Self {
        self.batch_id = Some(batch_id);
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

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the entity type context, if any
    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref()
    }

    /// Get the business key context, if any
    pub fn business_key(&self) -> Option<&str> {
        self.business_key.as_deref()
    }

    /// Get the batch id context, if any
    pub fn batch_id(&self) -> Option<i64> {
        self.batch_id
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }

    /// Whether retrying the whole batch may succeed
    pub fn is_transient(&self) -> bool {
        self.kind == ExErrorKind::TransientIo
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
        if let Some(entity) = &self.entity {
            write!(f, " (entity: {})", entity)?;
        }
        if let Some(key) = &self.business_key {
            write!(f, " (business_key: {})", key)?;
        }
        if let Some(batch_id) = self.batch_id {
            write!(f, " (batch_id: {})", batch_id)?;
        }
        if let Some(source) = &self.source {
            write!(f, " caused by {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Typed failures of the warehouse load
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WarehouseError {
    /// `open_new_version` was called for a key that already has an open version
    #[error("{entity} {business_key} already has an open version")]
    OpenVersionExists {
        entity: EntityKind,
        business_key: String,
    },

    /// `close_version` found nothing to close
    #[error("{entity} {business_key} has no open version")]
    NoOpenVersion {
        entity: EntityKind,
        business_key: String,
    },

    /// A parent business key has no open version
    #[error("{entity} {business_key} has no active version to reference")]
    UnresolvedReference {
        entity: EntityKind,
        business_key: String,
    },

    /// The warehouse already holds two open versions for a key
    #[error("{entity} {business_key} has more than one open version")]
    DuplicateActiveVersion {
        entity: EntityKind,
        business_key: String,
    },

    /// The source delivered the same business key twice
    #[error("source delivered {entity} {business_key} more than once")]
    DuplicateSourceKey {
        entity: EntityKind,
        business_key: String,
    },

    /// A batch id that cannot be applied in the requested mode
    #[error("invalid batch id {batch_id}: {reason}")]
    InvalidBatchId { batch_id: i64, reason: String },

    /// A fact row points at a date the calendar does not cover
    #[error("sale date {date} is outside the calendar dimension")]
    CalendarGap { date: chrono::NaiveDate },
}

/// Conversion from WarehouseError to ExError
impl From<WarehouseError> for ExError {
    fn from(err: WarehouseError) -> Self {
        let message = err.to_string();
        match err {
            WarehouseError::OpenVersionExists {
                entity,
                business_key,
            }
            | WarehouseError::DuplicateActiveVersion {
                entity,
                business_key,
            } => ExError::new(ExErrorKind::InvariantViolation)
                .with_entity(entity)
                .with_business_key(business_key)
                .with_message(message),

            WarehouseError::NoOpenVersion {
                entity,
                business_key,
            } => ExError::new(ExErrorKind::NotFound)
                .with_entity(entity)
                .with_business_key(business_key)
                .with_message(message),

            WarehouseError::UnresolvedReference {
                entity,
                business_key,
            } => ExError::new(ExErrorKind::UnresolvedReference)
                .with_entity(entity)
                .with_business_key(business_key)
                .with_message(message),

            WarehouseError::DuplicateSourceKey {
                entity,
                business_key,
            } => ExError::new(ExErrorKind::InvalidInput)
                .with_entity(entity)
                .with_business_key(business_key)
                .with_message(message),

            WarehouseError::InvalidBatchId { batch_id, .. } => {
                ExError::new(ExErrorKind::InvalidInput)
                    .with_batch_id(batch_id)
                    .with_message(message)
            }

            WarehouseError::CalendarGap { .. } => {
                ExError::new(ExErrorKind::InvariantViolation).with_message(message)
            }
        }
    }
}
