//! HTTP request handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accumulated header bytes
//!     → request.rs (parse request line + headers)
//!     → headers.rs (strip hop-by-hop headers)
//!     → destination.rs (host/port from Host header)
//!     → request.rs (normalize target, serialize for upstream)
//!
//! On failure before forwarding:
//!     → response.rs (400 / 408 / 502 / 504 to the client)
//! ```

pub mod destination;
pub mod headers;
pub mod request;
pub mod response;

pub use destination::{destination, Destination, ResolutionError};
pub use headers::strip_proxy_headers;
pub use request::{find_header_end, normalize_target, Headers, Method, ParseError, Request, Version};
pub use response::ErrorResponse;
