#![allow(rustdoc::bare_urls)]

//! Core HTTP protocol types consumed from the connector layer

use crate::errors::Error;
use memchr::{memchr, memchr2, memrchr};
use std::fmt;

// METHOD

/// HTTP request methods
///
/// # References
///
/// - [RFC 7231, Section 4](https://datatracker.ietf.org/doc/html/rfc7231#section-4)
/// - [RFC 5789](https://datatracker.ietf.org/doc/html/rfc5789) (PATCH method)
///
/// Methods outside the registered set are kept verbatim in [Method::Other],
/// so that deployments can declare their own form-bearing methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// [[RFC7231, Section 4.3.1](https://tools.ietf.org/html/rfc7231#section-4.3.1)]
    Get,
    /// [[RFC7231, Section 4.3.4](https://tools.ietf.org/html/rfc7231#section-4.3.4)]
    Put,
    /// [[RFC7231, Section 4.3.3](https://tools.ietf.org/html/rfc7231#section-4.3.3)]
    Post,
    /// [[RFC7231, Section 4.3.2](https://tools.ietf.org/html/rfc7231#section-4.3.2)]
    Head,
    /// [[RFC5789, Section 2](https://tools.ietf.org/html/rfc5789#section-2)]
    Patch,
    /// [[RFC7231, Section 4.3.5](https://tools.ietf.org/html/rfc7231#section-4.3.5)]
    Delete,
    /// [[RFC7231, Section 4.3.7](https://tools.ietf.org/html/rfc7231#section-4.3.7)]
    Options,
    /// Any other token, as received.
    Other(Box<str>),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Other(other) => &**other,
        }
    }
}

impl From<&str> for Method {
    fn from(src: &str) -> Self {
        match src {
            "GET" => Method::Get,
            "PUT" => Method::Put,
            "POST" => Method::Post,
            "HEAD" => Method::Head,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.into()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// VERSION

/// HTTP protocol version
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,
    /// [RFC 7230](https://tools.ietf.org/html/rfc7230) and related
    Http11,
    /// [RFC 7540](https://tools.ietf.org/html/rfc7540)
    Http2,
}

impl Version {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
            Version::Http2 => "HTTP/2.0",
        }
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])+
        $name:ident = ($num:expr, $str:expr);
    )+) => {
        /// HTTP status codes surfaced by decoding failures
        ///
        /// Represents valid HTTP status codes as defined in
        /// [RFC 7231](https://tools.ietf.org/html/rfc7231#section-6).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $(#[$docs])+
            $name = $num,
        )+ }

        impl StatusCode {
            #[inline]
            pub const fn as_u16(&self) -> u16 {
                *self as u16
            }
        }
    }
}

set_status_codes! {
    /// [[RFC9110, Section 15.5.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.1)]
    BadRequest = (400, "Bad Request");
    /// [[RFC9110, Section 15.5.16](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.16)]
    UnsupportedMediaType = (415, "Unsupported Media Type");

    /// [[RFC9110, Section 15.6.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.1)]
    InternalServerError = (500, "Internal Server Error");
    /// [[RFC9110, Section 15.6.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.2)]
    NotImplemented = (501, "Not Implemented");
}

// Url

/// A request target as delivered by the connector.
///
/// Accepts origin-form (`/path?query`) and absolute-form
/// (`http://host:port/path?query`). The query string is kept verbatim, even
/// when it holds malformed percent-escapes, so it stays retrievable after a
/// parameter decode failure.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Url {
    target: String,
    scheme: Option<String>,
    authority: Option<String>,
    path: String,
    query: Option<String>,
}

impl Url {
    pub fn parse(target: &str) -> Self {
        let bytes = target.as_bytes();
        let mut scheme = None;
        let mut authority = None;
        let mut rest = target;

        if !matches!(bytes.first(), Some(b'/') | Some(b'*')) {
            if let Some(pos) = target.find("://") {
                scheme = Some(target[..pos].to_ascii_lowercase());

                let after = &target[pos + 3..];
                let end = memchr2(b'/', b'?', after.as_bytes()).unwrap_or(after.len());
                authority = Some(after[..end].to_string());
                rest = &after[end..];
            }
        }

        // Fragments never reach a server, but tolerate them anyway
        let rest = match memchr(b'#', rest.as_bytes()) {
            Some(pos) => &rest[..pos],
            None => rest,
        };

        let (path, query) = match memchr(b'?', rest.as_bytes()) {
            Some(pos) => (&rest[..pos], Some(rest[pos + 1..].to_string())),
            None => (rest, None),
        };

        Url {
            target: target.to_string(),
            scheme,
            authority,
            path: match path.is_empty() {
                true => "/".to_string(),
                false => path.to_string(),
            },
            query,
        }
    }

    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Scheme of an absolute-form target, lower-cased.
    #[inline]
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Authority of an absolute-form target.
    #[inline]
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string: `Some("")` for a bare `?`, `None` when absent.
    #[inline]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

// HEADER MAP

/// Header fields exactly as received.
///
/// Lookup ignores ASCII case, repeated fields keep their arrival order and
/// iteration can be repeated any number of times.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderMap {
    headers: Vec<Header>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field after all existing ones, even if the name repeats.
    pub fn append<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Returns the first value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Returns every value for `name`, in arrival order.
    #[inline]
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Splits every occurrence of `name` on commas, trimming whitespace and
    /// dropping empty elements.
    pub fn values_csv<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.append(name, value);
        }
        map
    }
}

// HEADER

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Header {
    name: String,
    value: String,
}

impl Header {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }
}

// HOST PORT

/// A `host[:port]` pair as found in `Host`, `X-Forwarded-Host` or a URI
/// authority. IPv6 literals keep their brackets (`[::1]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    host: String,
    port: Option<u16>,
}

impl HostPort {
    pub fn new<H: Into<String>>(host: H, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn parse(src: &str) -> Result<Self, Error> {
        let src = src.trim();
        let bytes = src.as_bytes();
        let invalid = || Error::InvalidHost(src.to_string());

        if bytes.is_empty() {
            return Err(invalid());
        }

        let (host, port) = if bytes[0] == b'[' {
            let close = memchr(b']', bytes).ok_or_else(invalid)?;
            match &src[close + 1..] {
                "" => (&src[..=close], None),
                rest => match rest.strip_prefix(':') {
                    Some(port) => (&src[..=close], Some(port)),
                    None => return Err(invalid()),
                },
            }
        } else {
            match memrchr(b':', bytes) {
                // Bare IPv6 without brackets: no port can be expressed
                Some(_) if memchr(b':', bytes) != memrchr(b':', bytes) => (src, None),
                Some(colon) => (&src[..colon], Some(&src[colon + 1..])),
                None => (src, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }

        let port = match port {
            Some(port) => Some(port.parse::<u16>().map_err(|_| invalid())?),
            None => None,
        };

        Ok(HostPort {
            host: host.to_string(),
            port,
        })
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}
