use serde::Serialize;

/// Failures raised by the node RPC transport or reported by the node itself.
///
/// Kept `Clone` so a single failed computation can be handed to every
/// request coalesced behind it in the response cache.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("node returned error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    #[error("missing JSON-RPC batch item id={id}")]
    MissingBatchItem { id: u64 },
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// The kind of indexed entity a lookup was about. Drives the wording of the
/// not-found envelope so callers see the same message the explorer always
/// produced (`"address not found."`, `"tx not found."`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Address,
    Tx,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address => write!(f, "address"),
            Self::Tx => write!(f, "tx"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// Malformed identifier or parameter. Raised before any cache or store
    /// access. `field` is the key echoed back in the error envelope.
    #[error("{reason}")]
    InvalidInput {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    /// Node unreachable or timed out. Never retried at this layer.
    #[error("upstream node unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("node is not ready")]
    NotReady,

    /// The node refused a submitted transaction; `reason` is the node's own
    /// message, unmodified.
    #[error("transaction rejected by node: {reason}")]
    BroadcastRejected { code: i64, reason: String },

    #[error("node RPC error: {0}")]
    Rpc(RpcError),

    #[error("index store error: {0}")]
    Store(String),

    #[error("index snapshot parse error at line {line}: {message}")]
    SnapshotParse { line: usize, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RpcError> for CoreError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Transport(message) => Self::UpstreamUnavailable(message),
            other => Self::Rpc(other),
        }
    }
}

impl CoreError {
    pub fn invalid(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidInput {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Render the uniform `{error, <echoed field>}` object.
    pub fn envelope(&self) -> ErrorEnvelope {
        match self {
            Self::InvalidInput {
                field,
                value,
                reason,
            } => ErrorEnvelope::new(reason.clone()).echo(field, value.clone()),
            Self::NotFound { entity, id } => {
                ErrorEnvelope::new(format!("{entity} not found.")).echo("hash", id.clone())
            }
            Self::BroadcastRejected { code, reason } => {
                ErrorEnvelope::new(reason.clone()).echo("code", *code)
            }
            other => ErrorEnvelope::new(other.to_string()),
        }
    }
}

// ==============================================================================
// Error Envelope
// ==============================================================================

/// `{ "error": "...", <field>: <value> }` as rendered to API consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(flatten)]
    pub echo: serde_json::Map<String, serde_json::Value>,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            echo: serde_json::Map::new(),
        }
    }

    pub fn echo(mut self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.echo.insert(field.to_owned(), value.into());
        self
    }
}
