//! form_gate - lazy, quota-enforcing HTTP request decoding
//!
//! The request-side core of an HTTP server: given the parsed request line,
//! the headers and a body stream, it decodes what a handler asks for, only
//! when it asks for it, and never twice.
//!
//! # What gets decoded
//!
//! - **Query and form parameters** - `application/x-www-form-urlencoded`,
//!   streamed, with key-count and byte-size quotas checked during the scan
//! - **Multipart parts** - `multipart/form-data` ([RFC 7578]), large parts
//!   spilled to temp files that are deleted when the request completes
//! - **Cookies** - `Cookie` headers, tolerant of legacy and quoted forms
//! - **Content type and charset** - with alias normalization
//! - **Locales** - `Accept-Language`, by quality
//! - **Server authority** - absolute target, `Host`, or a proxy's
//!   `X-Forwarded-*` / `Forwarded` headers ([ForwardedCustomizer])
//!
//! # Failure model
//!
//! Every failure is an [Error] carrying the HTTP status the dispatch layer
//! should answer with. Failed decodes are memoized: asking again returns
//! the same error without touching the stream.
//!
//! # Examples
//!
//! Form parameters:
//! ```
//! use form_gate::Request;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut request = Request::builder()
//!         .method("POST".into())
//!         .target("/login?next=%2Fhome")
//!         .header("Content-Type", "application/x-www-form-urlencoded")
//!         .header("Content-Length", "22")
//!         .body_bytes("user=ann&password=s3cr")
//!         .build();
//!
//!     let params = request.parameters().await.unwrap();
//!     assert_eq!(params.get("next"), Some("/home"));
//!     assert_eq!(params.get("user"), Some("ann"));
//!
//!     request.complete();
//! }
//! ```
//! Multipart uploads, behind a proxy:
//! ```
//! use form_gate::{limits::{MultipartConfig, RequestConfig}, ForwardedCustomizer, Request};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut config = RequestConfig::default();
//!     config.add_customizer(ForwardedCustomizer::default());
//!
//!     let body = "--xyz\r\n\
//!                 Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
//!                 \r\n\
//!                 hello\r\n\
//!                 --xyz--\r\n";
//!
//!     let mut request = Request::builder()
//!         .method("POST".into())
//!         .target("/upload")
//!         .header("Host", "internal:8080")
//!         .header("X-Forwarded-Proto", "https")
//!         .header("Content-Type", "multipart/form-data; boundary=xyz")
//!         .header("Content-Length", body.len().to_string())
//!         .body_bytes(body)
//!         .config(Arc::new(config))
//!         .build();
//!
//!     request.prepare().unwrap();
//!     assert_eq!(request.request_url(), "https://internal/upload");
//!
//!     request.set_multipart_config(MultipartConfig::default());
//!     let doc = request.part("doc").await.unwrap().unwrap();
//!     assert_eq!(doc.filename(), Some("a.txt"));
//!     assert_eq!(doc.text().await.unwrap(), "hello");
//!
//!     request.complete();
//! }
//! ```
//!
//! [RFC 7578]: https://tools.ietf.org/html/rfc7578

pub(crate) mod http {
    pub mod attributes;
    pub(crate) mod body;
    pub(crate) mod cleanup;
    pub(crate) mod content_type;
    pub mod cookie;
    pub(crate) mod form;
    pub(crate) mod locale;
    pub(crate) mod multipart;
    pub(crate) mod params;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod builder;
    pub(crate) mod customizer;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{Error, IoError},
    http::{
        attributes::{self, Attributes},
        body::BodyState,
        content_type::{Charset, ContentType},
        cookie::{self, Cookie, CookieCutter},
        locale::Locale,
        multipart::{MultipartCompliance, Part, Violation},
        params::Params,
        query,
        request::{BodyDecoder, Request},
        types::{Header, HeaderMap, HostPort, Method, StatusCode, Url, Version},
    },
    server::{
        builder::RequestBuilder,
        customizer::{Customizer, ForwardedCustomizer},
    },
};
