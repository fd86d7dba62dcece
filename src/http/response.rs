//! Error responses synthesized by the proxy itself.
//!
//! # Responsibilities
//! - Map session failures to an HTTP status line
//! - Render a minimal `Connection: close` response
//!
//! # Design Decisions
//! - Only sent before anything has been forwarded upstream
//! - Plain-text body, HTTP/1.0 status line (no keep-alive promises)

/// Status codes the proxy can answer with on its own behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorResponse {
    BadRequest,
    RequestTimeout,
    BadGateway,
    GatewayTimeout,
}

impl ErrorResponse {
    pub fn status(&self) -> u16 {
        match self {
            ErrorResponse::BadRequest => 400,
            ErrorResponse::RequestTimeout => 408,
            ErrorResponse::BadGateway => 502,
            ErrorResponse::GatewayTimeout => 504,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ErrorResponse::BadRequest => "Bad Request",
            ErrorResponse::RequestTimeout => "Request Timeout",
            ErrorResponse::BadGateway => "Bad Gateway",
            ErrorResponse::GatewayTimeout => "Gateway Timeout",
        }
    }

    /// Render the full response, head and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = format!("{} {}\n", self.status(), self.reason());
        format!(
            "HTTP/1.0 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status(),
            self.reason(),
            body.len(),
            body
        )
        .into_bytes()
    }
}
