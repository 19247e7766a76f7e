use std::fmt;

/// Storage error type for payment intents, subscriptions and config documents
#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Connection pool is exhausted
    PoolExhausted,
    /// Connection timeout
    ConnectionTimeout,
    /// Record not found
    NotFound {
        entity: String,
        id: String,
    },
    /// Unique constraint violation (e.g., duplicate provider reference)
    UniqueConstraintViolation {
        column: String,
        value: String,
    },
    /// Query execution error
    QueryError {
        message: String,
    },
    /// Database connection error
    ConnectionError {
        message: String,
    },
    /// A stored JSON column could not be decoded
    Serialization {
        message: String,
    },
    /// Configuration error
    ConfigError {
        message: String,
    },
    /// Unknown error
    Unknown {
        message: String,
    },
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub context: Option<String>,
    pub is_retryable: bool,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        let is_retryable = matches!(
            kind,
            DatabaseErrorKind::ConnectionTimeout
                | DatabaseErrorKind::PoolExhausted
                | DatabaseErrorKind::ConnectionError { .. }
        );

        Self {
            kind,
            context: None,
            is_retryable,
        }
    }

    pub fn not_found<E: Into<String>, I: Into<String>>(entity: E, id: I) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    pub fn serialization<S: fmt::Display>(err: S) -> Self {
        Self::new(DatabaseErrorKind::Serialization {
            message: err.to_string(),
        })
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.is_retryable
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueConstraintViolation { .. })
    }

    /// Map SQLx error to our custom error type
    #[cfg(feature = "database")]
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::not_found("Record", "unknown"),
            sqlx::Error::PoolTimedOut => Self::new(DatabaseErrorKind::PoolExhausted),
            sqlx::Error::PoolClosed => Self::new(DatabaseErrorKind::ConnectionError {
                message: "Connection pool is closed".to_string(),
            }),
            sqlx::Error::Configuration(msg) => Self::new(DatabaseErrorKind::ConfigError {
                message: msg.to_string(),
            }),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::new(DatabaseErrorKind::Serialization {
                    message: format!("column {}: {}", index, source),
                })
            }
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // Postgres unique_violation
                Some("23505") => Self::new(DatabaseErrorKind::UniqueConstraintViolation {
                    column: db_err.constraint().unwrap_or("unknown").to_string(),
                    value: "provided value".to_string(),
                }),
                _ => Self::new(DatabaseErrorKind::QueryError {
                    message: db_err.message().to_string(),
                }),
            },
            sqlx::Error::Io(io_err) => Self::new(DatabaseErrorKind::ConnectionError {
                message: io_err.to_string(),
            }),
            _ => Self::new(DatabaseErrorKind::Unknown {
                message: error.to_string(),
            }),
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match &self.kind {
            DatabaseErrorKind::PoolExhausted => {
                "Database connection pool exhausted. Please try again.".to_string()
            }
            DatabaseErrorKind::ConnectionTimeout => {
                "Database connection timed out. Please try again.".to_string()
            }
            DatabaseErrorKind::NotFound { entity, id } => {
                format!("{} with ID '{}' not found", entity, id)
            }
            DatabaseErrorKind::UniqueConstraintViolation { column, value } => {
                format!("A record with {} '{}' already exists", column, value)
            }
            DatabaseErrorKind::QueryError { message } => {
                format!("Database query failed: {}", message)
            }
            DatabaseErrorKind::ConnectionError { message } => {
                format!("Database connection error: {}", message)
            }
            DatabaseErrorKind::Serialization { message } => {
                format!("Stored value could not be decoded: {}", message)
            }
            DatabaseErrorKind::ConfigError { message } => {
                format!("Database configuration error: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => {
                format!("Unknown database error: {}", message)
            }
        };

        if let Some(context) = &self.context {
            write!(f, "{} ({})", message, context)
        } else {
            write!(f, "{}", message)
        }
    }
}

impl std::error::Error for DatabaseError {}
