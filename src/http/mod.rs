//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, HTTP/1.1 + HTTP/2, drain)
//!     → middleware/ (recovery → metrics → logging)
//!     → application router
//!     → response.rs (harness-generated responses)
//!     → Send to client
//! ```

pub mod client_ip;
pub mod headers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
pub mod skip;

pub use client_ip::{IpNetwork, NetworkParseError, TrustedProxy};
pub use middleware::{Instrumentation, PanicEvent, PanicKind, RecoveryPolicy};
pub use request::{RequestDump, RequestErrors};
pub use server::{HttpServer, Listen, RunningServer, ShutdownError};
pub use skip::StringSet;
