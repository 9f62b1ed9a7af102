/// Top-level pyshift error type.
#[derive(thiserror::Error, Debug)]
pub enum PyshiftError {
    #[error("CST error: {0}")]
    Cst(#[from] pyshift_cst::CstError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("Project root not found: {0}")]
    RootNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid exclude pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

#[derive(thiserror::Error, Debug)]
pub enum KnowledgeError {
    #[error("Source fetch failed for {library}: {message}")]
    Fetch { library: String, message: String },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Cache IO error: {0}")]
    CacheIo(#[from] std::io::Error),

    #[error("Cache entry has unsupported schema version {found} (expected {expected})")]
    CacheSchema { found: u32, expected: u32 },

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum OracleError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Oracle call timed out after {0} s")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Access denied: {0}")]
    Denied(String),
}

impl OracleError {
    /// Resource errors are retried with backoff; the rest are not.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session file has unsupported schema version {found} (expected {expected})")]
    Schema { found: u32, expected: u32 },

    #[error("No pending session in {0}")]
    NoSession(String),
}

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Unknown library: {0}")]
    UnknownLibrary(String),

    #[error("Invalid version string '{0}'")]
    BadVersion(String),

    #[error("Session was cancelled")]
    Cancelled,

    #[error("Apply failed for {path}: {message}")]
    ApplyFailed { path: String, message: String },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Cannot parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, PyshiftError>;
