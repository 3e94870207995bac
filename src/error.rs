use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum BatchError {
    DatabaseError(String),
    ObjectStoreError(String),
    RegistryError(String),
    InitializationError(String),
    ProcessorError(String),
    ConfigurationError(String),
    ValidationError(String),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            BatchError::ObjectStoreError(msg) => write!(f, "Object store error: {msg}"),
            BatchError::RegistryError(msg) => write!(f, "Registry error: {msg}"),
            BatchError::InitializationError(msg) => write!(f, "Initialization error: {msg}"),
            BatchError::ProcessorError(msg) => write!(f, "Processor error: {msg}"),
            BatchError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
            BatchError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
        }
    }
}

impl std::error::Error for BatchError {}

impl From<serde_json::Error> for BatchError {
    fn from(error: serde_json::Error) -> Self {
        BatchError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for BatchError {
    fn from(error: sqlx::Error) -> Self {
        BatchError::DatabaseError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;

/// Specific dispatch error types for row-level error handling
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// An initializer or processor is already registered under this key
    AlreadyRegistered { app: String, op: Option<String> },
    /// Registration attempted after the dispatcher loop started
    RegistryFrozen,
    /// No initializer registered for the row's app
    NoInitializerRegistered { app: String },
    /// The registered initializer returned an error
    InitializerFailed { app: String, reason: String },
    /// No processor registered under (app, op) in any table
    NoProcessorRegistered { app: String, op: String },
    /// A processor is registered under (app, op), but not for the row's kind
    ProcessorKindMismatch { app: String, op: String, line: i32 },
    /// The processor invocation returned an error
    ProcessorFailed {
        app: String,
        op: String,
        reason: String,
    },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::AlreadyRegistered { app, op: Some(op) } => {
                write!(f, "Processor for app {app} and op {op} already registered")
            }
            DispatchError::AlreadyRegistered { app, op: None } => {
                write!(f, "Initializer for app {app} already registered")
            }
            DispatchError::RegistryFrozen => {
                write!(
                    f,
                    "Registry is frozen; registration is a startup-time operation"
                )
            }
            DispatchError::NoInitializerRegistered { app } => {
                write!(f, "No initializer registered for app {app}")
            }
            DispatchError::InitializerFailed { app, reason } => {
                write!(f, "Initializer for app {app} failed: {reason}")
            }
            DispatchError::NoProcessorRegistered { app, op } => {
                write!(f, "No processor registered for app {app} and op {op}")
            }
            DispatchError::ProcessorKindMismatch { app, op, line } => {
                write!(
                    f,
                    "Processor registered for app {app} and op {op} does not handle line {line}"
                )
            }
            DispatchError::ProcessorFailed { app, op, reason } => {
                write!(f, "Processor for app {app} and op {op} failed: {reason}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<DispatchError> for BatchError {
    fn from(error: DispatchError) -> Self {
        match &error {
            DispatchError::AlreadyRegistered { .. } | DispatchError::RegistryFrozen => {
                BatchError::RegistryError(error.to_string())
            }
            DispatchError::NoInitializerRegistered { .. }
            | DispatchError::InitializerFailed { .. } => {
                BatchError::InitializationError(error.to_string())
            }
            _ => BatchError::ProcessorError(error.to_string()),
        }
    }
}

/// Result type for row-level dispatch operations
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
