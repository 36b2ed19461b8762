//! Connection multiplexer and DIS wire codec for the batch server core.
//!
//! [`core::Core`] owns the connection table, the readiness primitive, and
//! the security provider, and drives the single-threaded cooperative event
//! loop described by `run_one`. The [`dis`] module is the standalone wire
//! codec every batch request is encoded with; it has no dependency on the
//! rest of the crate and can be used on its own.

pub mod conn;
pub mod config;
pub mod core;
pub mod dis;
pub mod error;
pub mod logging;
pub mod peer;
pub mod readiness;
pub mod security;
pub mod sock;

pub use conn::{AuthFlags, Connection, ConnectionKind, ConnectionTable};
pub use config::CoreConfig;
pub use core::{Core, ConnectionHandler};
pub use error::{CoreError, DisError, PeerError, TableError};
pub use readiness::{Interest, MioReadiness, Readiness};
pub use security::{AuthOutcome, CheckPortAuthenticator, SecurityProvider};
pub use sock::SocketDescriptor;
