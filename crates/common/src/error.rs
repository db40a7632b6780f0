use thiserror::Error;

/// Canonical TFQ error taxonomy used across crates.
///
/// Classification guidance:
/// - [`TfqError::Planning`]: query shape/name/type issues discovered before execution
/// - [`TfqError::Query`]: structured compile/coverage/runtime reasons surfaced to clients
/// - [`TfqError::Execution`]: runtime decode/encode or data-shape failures
/// - [`TfqError::InvalidConfig`]: catalog/config/environment contract violations
/// - [`TfqError::Unsupported`]: syntactically valid but intentionally unimplemented behavior
/// - [`TfqError::Io`]: raw filesystem/network IO failures from std APIs
#[derive(Debug, Error)]
pub enum TfqError {
    /// Invalid or inconsistent configuration/catalog state.
    ///
    /// Examples:
    /// - DDL with no quantum component or a quantum outside the trailing slot
    /// - local key that does not cover the partition key's direct fields
    /// - invalid catalog file extension or payload
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// SQL lowering failures before the compiler runs.
    ///
    /// Examples:
    /// - parse errors from the SQL frontend
    /// - statement kinds or expression shapes outside the supported subset
    #[error("planning error: {0}")]
    Planning(String),

    /// Structured query error carrying a closed, wire-numbered reason.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Runtime execution failures after compilation succeeded.
    ///
    /// Examples:
    /// - chunk/value decode failures
    /// - worker channel teardown mid-query
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature/shape not implemented in current version.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard TFQ result alias.
pub type Result<T> = std::result::Result<T, TfqError>;

/// Closed set of structured reasons a query can fail with.
///
/// Every variant surfaced to a client maps onto one member of the closed
/// wire code set via [`QueryError::code`]. Compiler reasons keep the exact
/// shape the compiler produced them with (field names, offending operators,
/// sub-query counts) so callers can react without string matching.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// Compile was called on an already-executable query.
    #[error("query is already compiled")]
    AlreadyCompiled,

    /// The projection list is empty; full table scans are not served.
    #[error("full table scans are not supported")]
    FullTableScanUnsupported,

    /// The WHERE clause has no lower bound on the quantum field.
    #[error("where clause has no lower bound on the time column")]
    NoLowerBound,

    /// The WHERE clause has no upper bound on the quantum field.
    #[error("where clause has no upper bound on the time column")]
    NoUpperBound,

    /// More than one lower bound was given for the quantum field.
    #[error("duplicate lower bound on the time column")]
    DuplicateLowerBound,

    /// More than one upper bound was given for the quantum field.
    #[error("duplicate upper bound on the time column")]
    DuplicateUpperBound,

    /// The lower bound is greater than the upper bound.
    #[error("lower time bound is greater than the upper bound")]
    LowerBoundGtUpper,

    /// Equal bounds under strict comparison operators select nothing.
    #[error("time range is degenerate; bounds are equal and exclusive")]
    DegenerateRange,

    /// The quantum field appeared under an OR; time bounds must be AND-joined.
    #[error("time bounds must be joined with AND")]
    TimeBoundsMustUseAnd,

    /// A local-key field has no equality binding in the WHERE clause.
    #[error("key field '{0}' is missing from the where clause")]
    MissingKeyField(String),

    /// A local-key field was bound with an operator other than `=`.
    #[error("key field '{field}' must use '=' (found '{op}')")]
    KeyFieldMustUseEquals {
        /// Offending key field name.
        field: String,
        /// Operator the query used instead of `=`.
        op: String,
    },

    /// Quantum expansion would produce more sub-queries than permitted.
    #[error("query spans {0} quanta, exceeding the configured maximum")]
    TooManySubQueries(usize),

    /// No primary owner is currently available for a sub-query's hash.
    #[error("no primaries available for sub-query coverage")]
    NoPrimariesAvailable,

    /// A sub-query exceeded its per-request storage deadline.
    #[error("sub-query timed out")]
    SubQueryTimeout,

    /// The storage backend timed out serving a range scan.
    #[error("storage backend timed out")]
    BackendTimeout,

    /// The query is malformed in a way the DDL cannot satisfy.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The table exists but has not finished activating.
    #[error("table '{0}' is not active")]
    TableInactive(String),

    /// The table's helper module is not loaded.
    #[error("helper module for table '{0}' is missing")]
    MissingHelperModule(String),

    /// Internal invariant violation; the worker was driven out of order.
    #[error("query worker mismanagement: {0}")]
    Mismanagement(String),

    /// A record, table, or registry row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An insert row does not match the declared key length.
    #[error("bad key length: expected {expected} key cells, got {got}")]
    BadKeyLength {
        /// Number of key cells the DDL requires.
        expected: usize,
        /// Number of key cells the request carried.
        got: usize,
    },

    /// A storage-level failure surfaced by a range scan or put.
    #[error("storage error: {0}")]
    Storage(String),
}

impl QueryError {
    /// Wire error code this reason is reported under.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AlreadyCompiled
            | Self::FullTableScanUnsupported
            | Self::NoLowerBound
            | Self::NoUpperBound
            | Self::DuplicateLowerBound
            | Self::DuplicateUpperBound
            | Self::LowerBoundGtUpper
            | Self::DegenerateRange
            | Self::TimeBoundsMustUseAnd
            | Self::MissingKeyField(_)
            | Self::KeyFieldMustUseEquals { .. }
            | Self::TooManySubQueries(_)
            | Self::InvalidQuery(_) => ErrorCode::BadQuery,
            Self::NoPrimariesAvailable | Self::Storage(_) => ErrorCode::Fetch,
            Self::SubQueryTimeout | Self::BackendTimeout => ErrorCode::Timeout,
            Self::TableInactive(_) => ErrorCode::TableInactive,
            Self::MissingHelperModule(_) => ErrorCode::MissingHelperModule,
            Self::Mismanagement(_) => ErrorCode::Submit,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::BadKeyLength { .. } => ErrorCode::BadKeyLength,
        }
    }
}

/// Closed wire error code set, preserved for protocol compatibility.
///
/// The numbering is fixed; codes not produced by this layer belong to
/// adjacent system layers (create/activate/put/get/delete) and are listed so
/// the set stays closed in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Query submission failed.
    Submit = 1001,
    /// Fetching query results failed.
    Fetch = 1002,
    /// Returned data did not decode to rows.
    IrregularData = 1003,
    /// Record put failed.
    Put = 1004,
    /// Bucket type is not a time-series type.
    NotTsType = 1006,
    /// Bucket type is missing.
    MissingType = 1007,
    /// Table helper module is missing.
    MissingHelperModule = 1008,
    /// Record delete failed.
    Delete = 1009,
    /// Record get failed.
    Get = 1010,
    /// Key cell count does not match the DDL.
    BadKeyLength = 1011,
    /// List-keys request failed.
    ListKeys = 1012,
    /// Request exceeded its deadline.
    Timeout = 1013,
    /// Table creation failed.
    Create = 1014,
    /// Table activation failed.
    Activate = 1017,
    /// Query failed validation or compilation.
    BadQuery = 1018,
    /// Table exists but is not active.
    TableInactive = 1019,
    /// SQL text failed to parse.
    ParseError = 1020,
    /// Named table or record does not exist.
    NotFound = 1021,
}

impl ErrorCode {
    /// Numeric code sent on the wire.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}
