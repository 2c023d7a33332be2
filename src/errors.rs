use crate::StatusCode;
use std::{fmt, io, sync::Arc};

/// Everything that can go wrong while decoding a request.
///
/// Each variant maps to an HTTP status ([Error::status]) and a stable machine
/// code ([Error::code]). Errors are cheap to clone so that a failed decode can
/// be memoized and handed back unchanged on every later access.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A percent-escape or charset decode failed in the query or the body.
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    /// A key-count or byte-size quota was hit while decoding.
    #[error("{what} limit exceeded: limit={limit}")]
    QuotaExceeded { what: &'static str, limit: i64 },

    /// A multipart part carried no `name` in its `Content-Disposition`.
    #[error("multipart part has no name")]
    MissingPartName,

    /// The `Host` header or URI authority could not be parsed.
    #[error("invalid host: {0}")]
    InvalidHost(String),

    /// A charset was requested that this crate cannot decode.
    #[error("unsupported character encoding: {0}")]
    UnsupportedEncoding(String),

    /// Multipart framing the strict compliance mode refuses to guess about,
    /// or a body that ends before its closing delimiter.
    #[error("multipart protocol violation: {0}")]
    MultipartProtocolViolation(String),

    /// Parts were requested but no multipart configuration was attached.
    #[error("no multipart config for request")]
    MultipartNotConfigured,

    /// The body stream failed or ended before its declared length.
    #[error("request aborted: {0}")]
    Aborted(IoError),

    /// A form body arrived with a `Content-Encoding` other than `identity`.
    #[error("unsupported content encoding: {0}")]
    UnsupportedContentEncoding(String),
}

macro_rules! http_errors {
    ($($name:ident: $status:ident => $code:literal;)*) => {
        impl Error {
            /// HTTP status the dispatch layer should answer with.
            pub const fn status(&self) -> StatusCode {
                match self { $(
                    Self::$name { .. } => StatusCode::$status,
                )* }
            }

            /// Stable, upper-case machine code for this failure.
            pub const fn code(&self) -> &'static str {
                match self { $(
                    Self::$name { .. } => $code,
                )* }
            }
        }
    };
}

http_errors! {
    MalformedEncoding: BadRequest => "MALFORMED_ENCODING";
    QuotaExceeded: BadRequest => "QUOTA_EXCEEDED";
    MissingPartName: BadRequest => "MISSING_PART_NAME";
    InvalidHost: BadRequest => "INVALID_HOST";

    UnsupportedEncoding: UnsupportedMediaType => "UNSUPPORTED_ENCODING";

    MultipartProtocolViolation: InternalServerError => "MULTIPART_VIOLATION";
    MultipartNotConfigured: InternalServerError => "MULTIPART_NOT_CONFIGURED";
    Aborted: InternalServerError => "REQUEST_ABORTED";

    UnsupportedContentEncoding: NotImplemented => "UNSUPPORTED_CONTENT_ENCODING";
}

impl Error {
    #[inline]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status().as_u16())
    }

    #[inline]
    pub fn is_server_error(&self) -> bool {
        self.status().as_u16() >= 500
    }

    /// Renders the error as a compact JSON body, e.g.
    /// `{"error":"no multipart config for request","code":"MULTIPART_NOT_CONFIGURED"}`.
    pub fn to_json(&self) -> String {
        let message = self.to_string();
        let mut out = String::with_capacity(message.len() + self.code().len() + 22);

        out.push_str(r#"{"error":""#);
        for c in message.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        }
        out.push_str(r#"","code":""#);
        out.push_str(self.code());
        out.push_str(r#""}"#);
        out
    }

    pub(crate) fn malformed<D: fmt::Display>(detail: D) -> Self {
        Error::MalformedEncoding(detail.to_string())
    }

    pub(crate) fn violation<D: fmt::Display>(detail: D) -> Self {
        Error::MultipartProtocolViolation(detail.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Aborted(IoError(Arc::new(err)))
    }
}

/// Shared, comparable wrapper around [io::Error].
///
/// Two values compare equal when their [io::ErrorKind] matches.
#[derive(Debug, Clone)]
pub struct IoError(pub(crate) Arc<io::Error>);

impl IoError {
    #[inline]
    pub fn kind(&self) -> io::ErrorKind {
        self.0.kind()
    }
}

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        #[rustfmt::skip]
        let cases = [
            (Error::malformed("bad %ZZ"),                                  400, true),
            (Error::QuotaExceeded { what: "form keys", limit: 1000 },      400, true),
            (Error::MissingPartName,                                       400, true),
            (Error::InvalidHost("whatever.com:xxxx".into()),               400, true),
            (Error::UnsupportedEncoding("doesNotExist".into()),            415, true),
            (Error::violation("CR line termination"),                      500, false),
            (Error::MultipartNotConfigured,                                500, false),
            (Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)),   500, false),
            (Error::UnsupportedContentEncoding("gzip".into()),             501, false),
        ];

        for (err, status, client) in cases {
            assert_eq!(err.status().as_u16(), status, "{err}");
            assert_eq!(err.is_client_error(), client, "{err}");
            assert_eq!(err.is_server_error(), !client, "{err}");
        }
    }

    #[test]
    fn quota_message() {
        let err = Error::QuotaExceeded { what: "form keys", limit: 1000 };
        assert_eq!(err.to_string(), "form keys limit exceeded: limit=1000");
        assert_eq!(err.code(), "QUOTA_EXCEEDED");
    }

    #[test]
    fn json_body_is_escaped() {
        let err = Error::malformed("bad \"escape\"");
        assert_eq!(
            err.to_json(),
            r#"{"error":"malformed encoding: bad \"escape\"","code":"MALFORMED_ENCODING"}"#
        );
    }

    #[test]
    fn io_errors_compare_by_kind() {
        let a = Error::from(io::Error::new(io::ErrorKind::UnexpectedEof, "early EOF"));
        let b = Error::from(io::Error::new(io::ErrorKind::UnexpectedEof, "other text"));
        let c = Error::from(io::Error::from(io::ErrorKind::TimedOut));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
