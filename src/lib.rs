//! # ldapmux
//!
//! An asynchronous LDAP client engine that multiplexes many concurrent
//! operations over a single connection.
//!
//! ## Architecture
//!
//! The crate is organized into the following layers:
//!
//! - **Codec Layer**: BER element reading/writing and stream framing
//! - **Protocol Layer**: LDAP requests, responses, filters and controls
//! - **Transport Layer**: TCP/TLS socket ownership, StartTLS upgrade
//! - **Connection Layer**: message ids, pending operations, the Bind/StartTLS gate
//! - **Factory Layer**: initial liveness probe, heartbeats, shared scheduler
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ldapmux::{LdapConnectionFactory, LdapOptions};
//! use ldapmux::protocol::{Filter, SearchRequest, SearchScope};
//!
//! #[tokio::main]
//! async fn main() -> ldapmux::Result<()> {
//!     let factory = LdapConnectionFactory::new("127.0.0.1:389", LdapOptions::default());
//!     let connection = factory.get_connection().await?;
//!
//!     let request = SearchRequest::new("dc=example,dc=com", SearchScope::WholeSubtree, Filter::present("objectClass"));
//!     let results = connection.search(request).await?;
//!     println!("{} entries", results.entries.len());
//!
//!     connection.close();
//!     factory.close();
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod protocol;
pub mod transport;
pub mod connection;
pub mod scheduler;
pub mod factory;
pub mod util;
pub mod logger;

// Re-export commonly used types
pub use codec::{Buffer, Reader};
pub use protocol::{LdapMessage, ProtocolOp, ResultCode, LdapResult};
pub use transport::{LdapTransport, LdapOptions, Transport, Connector, TcpConnector};
pub use connection::{LdapConnection, LdapFuture, ConnectionEventListener, ConnectionStatus};
pub use scheduler::Scheduler;
pub use factory::LdapConnectionFactory;
pub use util::config::LdapClientConfig;
pub use logger::LogLevel;

/// Error types for the LDAP client
pub mod error {
    use std::sync::Arc;
    use thiserror::Error;
    use crate::protocol::{LdapResult, ResultCode};

    /// Uniform error value carried by every failed operation.
    ///
    /// Server-returned failures keep the full `LdapResult`; client-side
    /// failures carry one of the `CLIENT_SIDE_*` result codes.
    #[derive(Error, Debug, Clone)]
    #[error("{code}: {message}")]
    pub struct LdapError {
        code: ResultCode,
        message: String,
        result: Option<Box<LdapResult>>,
        #[source]
        cause: Option<Arc<std::io::Error>>,
    }

    impl LdapError {
        pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
            Self {
                code,
                message: message.into(),
                result: None,
                cause: None,
            }
        }

        /// Wrap a non-successful result returned by the server
        pub fn from_result(result: LdapResult) -> Self {
            Self {
                code: result.result_code,
                message: result.diagnostic_message.clone(),
                result: Some(Box::new(result)),
                cause: None,
            }
        }

        pub fn with_cause(mut self, cause: std::io::Error) -> Self {
            self.cause = Some(Arc::new(cause));
            self
        }

        pub fn with_result(mut self, result: LdapResult) -> Self {
            self.result = Some(Box::new(result));
            self
        }

        pub fn encoding(message: impl Into<String>) -> Self {
            Self::new(ResultCode::CLIENT_SIDE_ENCODING_ERROR, message)
        }

        pub fn decoding(message: impl Into<String>) -> Self {
            Self::new(ResultCode::CLIENT_SIDE_DECODING_ERROR, message)
        }

        pub fn server_down(message: impl Into<String>) -> Self {
            Self::new(ResultCode::CLIENT_SIDE_SERVER_DOWN, message)
        }

        pub fn timeout(message: impl Into<String>) -> Self {
            Self::new(ResultCode::CLIENT_SIDE_TIMEOUT, message)
        }

        pub fn cancelled(message: impl Into<String>) -> Self {
            Self::new(ResultCode::CLIENT_SIDE_USER_CANCELLED, message)
        }

        pub fn param(message: impl Into<String>) -> Self {
            Self::new(ResultCode::CLIENT_SIDE_PARAM_ERROR, message)
        }

        pub fn connect(message: impl Into<String>) -> Self {
            Self::new(ResultCode::CLIENT_SIDE_CONNECT_ERROR, message)
        }

        pub fn operations(message: impl Into<String>) -> Self {
            Self::new(ResultCode::OPERATIONS_ERROR, message)
        }

        pub fn code(&self) -> ResultCode {
            self.code
        }

        pub fn message(&self) -> &str {
            &self.message
        }

        /// Result returned by the server, if this error came from one
        pub fn result(&self) -> Option<&LdapResult> {
            self.result.as_deref()
        }

        pub fn is_cancelled(&self) -> bool {
            self.code == ResultCode::CLIENT_SIDE_USER_CANCELLED || self.code == ResultCode::CANCELLED
        }

        pub fn is_connection_error(&self) -> bool {
            self.code == ResultCode::CLIENT_SIDE_SERVER_DOWN
                || self.code == ResultCode::CLIENT_SIDE_CONNECT_ERROR
        }

        pub fn is_timeout(&self) -> bool {
            self.code == ResultCode::CLIENT_SIDE_TIMEOUT
        }
    }

    impl From<std::io::Error> for LdapError {
        fn from(err: std::io::Error) -> Self {
            LdapError::server_down(err.to_string()).with_cause(err)
        }
    }

    pub type Result<T> = std::result::Result<T, LdapError>;
}

pub use error::{LdapError, Result};

/// Constants used throughout the client
pub mod consts {
    /// Default timeouts (milliseconds)
    pub const DEFAULT_CONNECT_TIMEOUT: u64 = 3000;
    pub const DEFAULT_REQUEST_TIMEOUT: u64 = 0;
    pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 0;

    /// Default LDAP ports
    pub const LDAP_PORT: u16 = 389;
    pub const LDAPS_PORT: u16 = 636;

    /// Max package length
    pub const MAX_PACKAGE_LENGTH: usize = 16 * 1024 * 1024; // 16MB

    /// Read buffer size for the transport task
    pub const READ_BUFFER_SIZE: usize = 64 * 1024;
}
