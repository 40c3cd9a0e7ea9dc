use crate::ber::BerError;
use crate::proto::ResultCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at the engine boundary.
///
/// Three families matter to callers: BER encoding errors (fatal to the
/// connection), protocol errors (structural LDAP violations, recoverable on
/// the server), and non-success result codes (typed operation failures).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Ber(#[from] BerError),

    #[error(transparent)]
    FilterSyntax(#[from] crate::filter::FilterSyntaxError),

    /// Structural LDAP-level violation: wrong child count, wrong tag, wrong
    /// protocol version.
    #[error("ldap: protocol error: {0}")]
    Protocol(String),

    /// Request carried an application tag the server does not dispatch.
    #[error("ldap: unsupported request tag {0}")]
    UnsupportedTag(u32),

    /// A response arrived with a result code other than success.
    #[error("ldap: {}: {message}", .code.name())]
    Result {
        code: ResultCode,
        matched_dn: String,
        message: String,
    },

    /// StartTLS was requested on a connection already using TLS.
    #[error("ldap: connection already using TLS")]
    AlreadyTls,

    /// The client connection terminated while an operation was in flight.
    #[error("ldap: connection closed")]
    ConnectionClosed,

    #[error("ldap: invalid server name for TLS: {0}")]
    InvalidServerName(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Result code carried by this error, if it is a typed result failure.
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            Error::Result { code, .. } => Some(*code),
            _ => None,
        }
    }
}
