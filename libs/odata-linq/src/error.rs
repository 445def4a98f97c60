use thiserror::Error;

/// Errors raised while building, rewriting or executing a projected query.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A type name is not registered
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// A path segment names a member the type does not have
    #[error("Member '{member}' cannot be resolved on type '{type_name}'")]
    UnresolvedMember { type_name: String, member: String },

    /// Expansion options do not line up with the projection they are spliced into
    #[error("Malformed expansion: {0}")]
    MalformedExpansion(String),

    /// A query feature this engine does not translate
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// `$filter` could not be bound against the element type
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// A type is its own (transitive) base type
    #[error("Cyclic base type chain at '{0}'")]
    CyclicBase(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// The mapper could not translate an expression or build a projection
    #[error("Mapping failed: {0}")]
    Mapping(String),

    /// The in-memory interpreter hit an invalid operation
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    /// The cancellation token fired
    #[error("Operation was cancelled")]
    Cancelled,

    /// Backing store failure, passed through unchanged
    #[error("Query provider error: {0}")]
    Provider(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Query(#[from] odata_query::Error),

    #[error("Invalid query settings: {0}")]
    Config(#[from] figment::Error),
}

impl Error {
    pub(crate) fn unresolved(type_name: &str, member: &str) -> Self {
        Self::UnresolvedMember {
            type_name: type_name.to_owned(),
            member: member.to_owned(),
        }
    }

    /// True for [`Error::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
