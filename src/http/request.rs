//! HTTP request model: parsing and serialization of the request head.
//!
//! # Responsibilities
//! - Parse the request line (method, target, version) and header block
//! - Serialize a request head for forwarding upstream
//! - Convert absolute-form targets to origin-form
//! - Detect the end of a header block in a partially filled read buffer
//!
//! # Design Decisions
//! - Header parsing stops at the first line without a colon; the rest is ignored
//! - Duplicate header names: the first occurrence wins
//! - Headers keep insertion order, but equality ignores order
//! - An unknown method or version is a parse error, never a stored value

use std::fmt;
use thiserror::Error;

/// Request methods understood by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Head,
    /// Spelled `OPTION` on the wire.
    Option,
    Delete,
    Trace,
    Connect,
}

const METHODS: [(&str, Method); 8] = [
    ("GET", Method::Get),
    ("POST", Method::Post),
    ("PUT", Method::Put),
    ("HEAD", Method::Head),
    ("OPTION", Method::Option),
    ("DELETE", Method::Delete),
    ("TRACE", Method::Trace),
    ("CONNECT", Method::Connect),
];

impl Method {
    /// Look up a request-line token in the method table.
    pub fn from_token(token: &str) -> Option<Self> {
        METHODS
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, method)| *method)
    }

    pub fn as_str(&self) -> &'static str {
        METHODS
            .iter()
            .find(|(_, method)| method == self)
            .map(|(name, _)| *name)
            .unwrap_or_default()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol versions understood by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Http11,
    Http10,
    /// Inferred when the request line carries no version token.
    Http09,
}

impl Version {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.1" => Some(Version::Http11),
            "HTTP/1.0" => Some(Version::Http10),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http11 => "HTTP/1.1",
            Version::Http10 => "HTTP/1.0",
            Version::Http09 => "HTTP/0.9",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while reading or parsing a request head.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The request line has no method token.
    #[error("empty request line")]
    MissingMethod,

    /// The method token is not in the method table.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// The request line has no target token.
    #[error("missing request target")]
    MissingTarget,

    /// A version token is present but not HTTP/1.1 or HTTP/1.0.
    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),

    /// The header block did not terminate within the configured limit.
    #[error("header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },
}

/// Header collection with first-occurrence-wins semantics.
///
/// Names are compared exactly as written.
#[derive(Debug, Clone, Default, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header unless the name is already present.
    ///
    /// Returns `false` when the header was dropped as a duplicate.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.entries.push((name, value.into()));
        true
    }

    /// Insert a header, replacing the value of an existing one.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.into(),
            None => self.entries.push((name.to_string(), value.into())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(pos).1)
    }

    /// Remove every header whose name matches `pred`. Returns how many were removed.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&str) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !pred(n));
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Names are unique, so equal length plus containment is set equality.
impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(n, v)| other.get(n) == Some(v))
    }
}

/// A successfully parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Request target exactly as received (origin-form or absolute-form).
    pub target: String,
    pub version: Version,
    pub headers: Headers,
}

impl Request {
    pub fn new(method: Method, target: impl Into<String>, version: Version) -> Self {
        Self {
            method,
            target: target.into(),
            version,
            headers: Headers::new(),
        }
    }

    /// Parse a request head from raw bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let text = String::from_utf8_lossy(raw);
        let mut lines = text.split("\r\n");

        let mut request = parse_request_line(lines.next().unwrap_or_default())?;

        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                break;
            };
            request.headers.insert(name, trim_spaces(value));
        }

        Ok(request)
    }

    /// Serialize the request line and headers.
    ///
    /// The blank line that ends a header block is not included.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.target, self.version);
        for (name, value) in self.headers.iter() {
            out.push_str(name);
            out.push(':');
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.into_bytes()
    }
}

/// Request-line tokens. Only spaces separate them; tabs belong to a token.
fn request_line_tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split(' ').filter(|token| !token.is_empty())
}

fn parse_request_line(line: &str) -> Result<Request, ParseError> {
    let mut tokens = request_line_tokens(line);

    let method_token = tokens.next().ok_or(ParseError::MissingMethod)?;
    let method = Method::from_token(method_token)
        .ok_or_else(|| ParseError::UnknownMethod(method_token.to_string()))?;

    let target = tokens.next().ok_or(ParseError::MissingTarget)?;

    let version = match tokens.next() {
        None => Version::Http09,
        Some(token) => Version::from_token(token)
            .ok_or_else(|| ParseError::UnsupportedVersion(token.to_string()))?,
    };

    Ok(Request::new(method, target, version))
}

/// Trim leading and trailing spaces. Tabs are kept.
fn trim_spaces(value: &str) -> &str {
    value.trim_matches(' ')
}

/// Rewrite an absolute-form target (`http://host/path`) to origin-form (`/path`).
///
/// Targets without an `http://` or `https://` prefix are returned unchanged.
pub fn normalize_target(target: &str) -> &str {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = target.strip_prefix(scheme) {
            return rest.find('/').map_or("/", |pos| &rest[pos..]);
        }
    }
    target
}

/// Length of a complete request head at the start of `buf`, if one has arrived.
///
/// A head ends at the first blank line. A request line without a version token
/// (HTTP/0.9) is complete on its own.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    if let Some(pos) = find(buf, b"\r\n\r\n") {
        return Some(pos + 4);
    }

    let line_end = find(buf, b"\r\n")?;
    let line = String::from_utf8_lossy(&buf[..line_end]);
    if request_line_tokens(&line).count() == 2 {
        return Some(line_end + 2);
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
