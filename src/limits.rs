//! Decoding limits and per-connection configuration
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Hash flooding through huge numbers of form keys
//! - Memory exhaustion through oversized form bodies
//! - Disk exhaustion through unbounded multipart uploads
//!
//! All quotas are purely local to one request, no counters are shared across
//! requests.
//!
//! # Examples
//!
//! ```
//! use form_gate::limits::{FormLimits, RequestConfig};
//! use form_gate::Method;
//!
//! let mut config = RequestConfig {
//!     form: FormLimits {
//!         max_form_keys: 200,             // Tighter key quota
//!         max_form_content_size: 64_000,  // 64KB of form data
//!     },
//!     ..RequestConfig::default()
//! };
//! config.add_form_encoded_method(Method::Put);
//!
//! assert!(config.is_form_encoded_method(&Method::Post));
//! assert!(config.is_form_encoded_method(&Method::Put));
//! assert!(!config.is_form_encoded_method(&Method::Get));
//! ```

use crate::{
    http::{content_type::Charset, multipart::MultipartCompliance},
    server::customizer::Customizer,
    Method,
};
use std::{fmt, path::PathBuf, sync::Arc};

/// Upper bound on bytes read for any form body. A larger
/// [FormLimits::max_form_content_size] is clamped to it.
pub const MAX_FORM_BYTES_HARD_CAP: u64 = 16 * 1024 * 1024;

/// Quotas applied while decoding `application/x-www-form-urlencoded` bodies.
///
/// Both limits are checked *during* the scan: the key quota on every key
/// insertion, the size quota on every chunk read from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormLimits {
    /// Maximum number of distinct parameter names (default: `1000`).
    ///
    /// Also bounds the number of parts in a multipart body. `-1` disables.
    pub max_form_keys: i32,

    /// Maximum size of a form body in bytes (default: `200_000`).
    ///
    /// A declared `Content-Length` above this value is rejected before a
    /// single byte is read. `-1` disables.
    pub max_form_content_size: i64,
}

impl Default for FormLimits {
    fn default() -> Self {
        Self {
            max_form_keys: 1000,
            max_form_content_size: 200_000,
        }
    }
}

impl FormLimits {
    #[inline]
    pub(crate) fn max_keys(&self) -> Option<usize> {
        usize::try_from(self.max_form_keys).ok()
    }

    #[inline]
    pub(crate) fn max_bytes(&self) -> Option<u64> {
        u64::try_from(self.max_form_content_size).ok()
    }
}

/// Multipart configuration attached to a single request by the dispatch
/// layer (see [Request::set_multipart_config](crate::Request::set_multipart_config)).
///
/// Without it, `multipart/form-data` bodies are never decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartConfig {
    /// Directory receiving spilled parts. Temp files use OS-unique names, so
    /// concurrent requests may share it.
    pub temp_dir: PathBuf,

    /// Maximum size of a single part in bytes (default: `-1`, unlimited).
    pub max_file_size: i64,

    /// Maximum size of the whole multipart body in bytes (default: `-1`, unlimited).
    pub max_request_size: i64,

    /// Parts larger than this many bytes are spilled to a temp file
    /// (default: `0`, never spill).
    pub file_size_threshold: usize,
}

impl MultipartConfig {
    pub fn new<P: Into<PathBuf>>(temp_dir: P) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            max_file_size: -1,
            max_request_size: -1,
            file_size_threshold: 0,
        }
    }

    #[inline]
    pub(crate) fn max_part(&self) -> Option<u64> {
        u64::try_from(self.max_file_size).ok()
    }

    #[inline]
    pub(crate) fn max_total(&self) -> Option<u64> {
        u64::try_from(self.max_request_size).ok()
    }
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

/// Connection- or server-scoped decoding configuration.
///
/// Shared between requests through an [Arc]; never mutated while a request
/// is being decoded.
#[derive(Clone)]
pub struct RequestConfig {
    /// Form quotas, see [FormLimits].
    pub form: FormLimits,

    /// Methods whose `application/x-www-form-urlencoded` bodies are decoded
    /// into parameters (default: `[POST]`). Matching ignores ASCII case.
    pub form_encoded_methods: Vec<Method>,

    /// How strictly multipart framing is checked (default: [MultipartCompliance::Rfc7578]).
    pub multipart_compliance: MultipartCompliance,

    /// Maximum bytes of headers in a single multipart part (default: `8192`).
    pub max_part_headers_size: usize,

    /// Charset used when neither the request nor the part names one
    /// (default: UTF-8).
    pub default_charset: Charset,

    /// Customizers run once, in order, by [Request::prepare](crate::Request::prepare).
    pub customizers: Vec<Arc<dyn Customizer>>,
}

impl RequestConfig {
    pub fn add_form_encoded_method(&mut self, method: Method) {
        if !self.is_form_encoded_method(&method) {
            self.form_encoded_methods.push(method);
        }
    }

    #[inline]
    pub fn is_form_encoded_method(&self, method: &Method) -> bool {
        self.form_encoded_methods
            .iter()
            .any(|m| m.as_str().eq_ignore_ascii_case(method.as_str()))
    }

    pub fn add_customizer<C: Customizer + 'static>(&mut self, customizer: C) {
        self.customizers.push(Arc::new(customizer));
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            form: FormLimits::default(),
            form_encoded_methods: vec![Method::Post],
            multipart_compliance: MultipartCompliance::Rfc7578,
            max_part_headers_size: 8 * 1024,
            default_charset: Charset::Utf8,
            customizers: Vec::new(),
        }
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("form", &self.form)
            .field("form_encoded_methods", &self.form_encoded_methods)
            .field("multipart_compliance", &self.multipart_compliance)
            .field("max_part_headers_size", &self.max_part_headers_size)
            .field("default_charset", &self.default_charset)
            .field("customizers", &self.customizers.len())
            .finish()
    }
}
