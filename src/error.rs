use thiserror::Error;

/// Error surfaced by the public facade operations.
///
/// Callers only ever need to tell the two kinds apart; the wrapped
/// [`InsightError`] carries the precise reason for logs.
#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("dataset not found: {0:?}")]
    NotFound(String),

    #[error(transparent)]
    Insight(#[from] InsightError),
}

impl FacadeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<QueryError> for FacadeError {
    fn from(err: QueryError) -> Self {
        Self::Insight(err.into())
    }
}

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("invalid dataset id {0:?}")]
    InvalidId(String),

    #[error("dataset {0:?} already exists")]
    DuplicateId(String),

    #[error("content is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("content is not a readable archive: {0}")]
    Archive(#[source] std::io::Error),

    #[error("archive contains no valid records")]
    NoValidRecords,

    #[error("unsupported dataset kind {0:?}")]
    UnsupportedKind(String),

    #[error("invalid query: {0}")]
    Query(#[from] QueryError),

    #[error("query produced {rows} rows, more than the limit of {limit}")]
    ResultTooLarge { rows: usize, limit: usize },

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Why a query was rejected by the validator.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("{0} must be an object")]
    NotAnObject(&'static str),

    #[error("{0} must be an array")]
    NotAnArray(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("missing {key} in {section}")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },

    #[error("unexpected key {key:?} in {section}")]
    UnexpectedKey { section: &'static str, key: String },

    #[error("{0} must have exactly one member")]
    NotSingleMember(&'static str),

    #[error("unknown filter operator {0:?}")]
    UnknownOperator(String),

    #[error("{op} expects a {expected} value")]
    WrongValueType {
        op: &'static str,
        expected: &'static str,
    },

    #[error("{op} cannot be applied to {key}")]
    FieldTypeMismatch { op: String, key: String },

    #[error("wildcard may only lead or trail the pattern {0:?}")]
    InteriorWildcard(String),

    #[error("invalid key {0:?}")]
    InvalidKey(String),

    #[error("dataset {0:?} is not registered")]
    UnknownDataset(String),

    #[error("query references both {first:?} and {second:?}")]
    MixedDatasets { first: String, second: String },

    #[error("query does not reference any dataset")]
    NoDataset,

    #[error("column {0:?} is neither a group key nor an apply key")]
    UngroupedColumn(String),

    #[error("order key {0:?} is not one of the columns")]
    OrderKeyNotInColumns(String),

    #[error("invalid order direction {0:?}")]
    InvalidDirection(String),

    #[error("invalid apply key {0:?}")]
    InvalidApplyKey(String),

    #[error("duplicate apply key {0:?}")]
    DuplicateApplyKey(String),

    #[error("unknown apply token {0:?}")]
    UnknownApplyToken(String),
}
