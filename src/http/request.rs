use crate::{
    errors::Error,
    http::{
        attributes::{Attributes, MULTIPART_CONFIG, VIOLATIONS},
        body::{check_length, Body, BodyState},
        cleanup::TempResources,
        content_type::{Charset, ContentType},
        cookie::{self, Cookie, CookieCutter},
        form::FormDecoder,
        locale::{parse_accept_language, Locale},
        multipart::{boundary, MultipartDecoder, Part},
        params::Params,
    },
    limits::{MultipartConfig, RequestConfig},
    query::Query,
    server::builder::RequestBuilder,
    HeaderMap, HostPort, Method, Url, Version,
};
use std::{fmt, net::SocketAddr, sync::Arc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

type Callback = Box<dyn FnOnce(&Request) + Send>;

/// The body decoder a request calls for.
///
/// Chosen by [BodyDecoder::select] from the method, the content type and
/// whether a [MultipartConfig] is attached; nothing else influences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyDecoder {
    /// Body parameters are empty, the body stays readable as a stream.
    None,
    /// `application/x-www-form-urlencoded` on a form-encoded method.
    UrlEncoded,
    /// `multipart/form-data` with a [MultipartConfig] attached, any method.
    Multipart,
}

impl BodyDecoder {
    pub fn select(
        method: &Method,
        content_type: Option<&ContentType>,
        multipart_configured: bool,
        config: &RequestConfig,
    ) -> Self {
        match content_type {
            Some(ct) if ct.is("multipart/form-data") && multipart_configured => BodyDecoder::Multipart,
            Some(ct) if ct.is("application/x-www-form-urlencoded") && config.is_form_encoded_method(method) => {
                BodyDecoder::UrlEncoded
            }
            _ => BodyDecoder::None,
        }
    }
}

/// One in-flight request and the views decoded from it.
///
/// Every view is computed on first access and memoized, errors included: a
/// failed decode hands back the same error on every later call and never
/// touches the stream again.
///
/// # Body ownership
///
/// The body can be consumed once, either as a raw stream or as decoded
/// parameters. Whichever happens first wins:
///
/// | First access | [BodyState] | Later effect |
/// |---|---|---|
/// | [Request::body_reader] | `Streamed` | [Request::parameters] holds query parameters only |
/// | [Request::parameters] / [Request::parts] | `Decoded` | the stream yields no bytes |
/// | [Request::parameters] with [BodyDecoder::None] | `Unread` | the stream is untouched |
///
/// Query parameters only depend on the URI and stay available whatever
/// happened to the body.
///
/// # Lifecycle
///
/// [Request::prepare] resolves the server authority and runs the configured
/// customizers, once. [Request::complete] runs completion callbacks, deletes
/// temp files of spilled parts and clears attributes, once. Dropping a
/// request that was never completed still deletes its temp files.
///
/// # Examples
/// ```
/// use form_gate::Request;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut request = Request::builder()
///     .method("POST".into())
///     .target("/search?q=rust")
///     .header("Host", "example.com")
///     .header("Content-Type", "application/x-www-form-urlencoded")
///     .body_bytes("page=2&q=async")
///     .build();
///
/// request.prepare().unwrap();
/// let params = request.parameters().await.unwrap();
///
/// assert_eq!(params.get_all("q"), ["rust", "async"]);
/// assert_eq!(params.get("page"), Some("2"));
/// assert_eq!(request.request_url(), "http://example.com/search");
/// # }
/// ```
pub struct Request {
    pub(crate) config: Arc<RequestConfig>,

    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) content_type: Option<ContentType>,
    pub(crate) body: Body,

    pub(crate) scheme: String,
    pub(crate) server: HostPort,
    pub(crate) local_addr: Option<SocketAddr>,
    pub(crate) remote_addr: Option<HostPort>,

    pub(crate) attributes: Attributes,
    pub(crate) temp: TempResources,
    pub(crate) callbacks: Vec<Callback>,
    pub(crate) cookie_cutter: Option<CookieCutter>,

    pub(crate) charset_override: Option<Charset>,
    pub(crate) query_params: Option<Result<Params, Error>>,
    pub(crate) params: Option<Result<Params, Error>>,
    pub(crate) parts: Option<Result<Vec<Part>, Error>>,
    pub(crate) cookies: Option<Vec<Cookie>>,

    pub(crate) prepared: bool,
    pub(crate) completed: bool,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of the header `name`, ignoring ASCII case.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The raw query string, unaffected by any decode failure.
    #[inline]
    pub fn query_string(&self) -> Option<&str> {
        self.url.query()
    }

    /// Declared `Content-Length`.
    #[inline]
    pub fn content_length(&self) -> Option<u64> {
        self.body.declared()
    }

    #[inline]
    pub fn body_state(&self) -> BodyState {
        self.body.state()
    }
}

// Authority
impl Request {
    /// Resolves the server authority and runs the configured customizers.
    ///
    /// The authority comes from an absolute-form target, else from `Host`,
    /// else from the local address. A second call does nothing.
    pub fn prepare(&mut self) -> Result<(), Error> {
        if self.prepared {
            return Ok(());
        }
        self.prepared = true;

        let authority = match self.url.authority() {
            Some(authority) if !authority.is_empty() => Some(authority),
            _ => self.headers.get("host").filter(|host| !host.trim().is_empty()),
        };
        if let Some(authority) = authority {
            self.server = HostPort::parse(authority)?;
        }

        let config = Arc::clone(&self.config);
        for customizer in config.customizers.iter() {
            customizer.customize(self)?;
        }

        trace!(
            method = %self.method,
            url = %self.request_url(),
            customizers = config.customizers.len(),
            "request prepared"
        );
        Ok(())
    }

    /// `http` or `https`, possibly rewritten by a customizer.
    #[inline]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn set_scheme(&mut self, scheme: &str) {
        self.scheme = scheme.to_ascii_lowercase();
    }

    #[inline]
    pub fn is_secure(&self) -> bool {
        matches!(self.scheme.as_str(), "https" | "wss")
    }

    #[inline]
    pub fn server_name(&self) -> &str {
        self.server.host()
    }

    /// Explicit port of the authority, else the default port of the scheme.
    #[inline]
    pub fn server_port(&self) -> u16 {
        self.server.port().unwrap_or_else(|| self.default_port())
    }

    pub fn set_server(&mut self, server: HostPort) {
        self.server = server;
    }

    /// `None` makes the port follow the scheme.
    pub fn set_server_port(&mut self, port: Option<u16>) {
        self.server = HostPort::new(self.server.host(), port);
    }

    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    #[inline]
    pub fn remote_addr(&self) -> Option<&HostPort> {
        self.remote_addr.as_ref()
    }

    pub fn set_remote_addr(&mut self, remote: HostPort) {
        self.remote_addr = Some(remote);
    }

    /// `scheme://host[:port]path`, the port omitted when it is the default
    /// of the scheme.
    pub fn request_url(&self) -> String {
        let port = self.server_port();
        match port == self.default_port() {
            true => format!("{}://{}{}", self.scheme, self.server_name(), self.url.path()),
            false => format!("{}://{}:{}{}", self.scheme, self.server_name(), port, self.url.path()),
        }
    }

    #[inline]
    fn default_port(&self) -> u16 {
        match self.is_secure() {
            true => 443,
            false => 80,
        }
    }
}

// Content type & charset
impl Request {
    #[inline]
    pub fn content_type(&self) -> Option<&ContentType> {
        self.content_type.as_ref()
    }

    /// Charset name from [Request::set_character_encoding], else from the
    /// `Content-Type` (aliases normalized).
    pub fn character_encoding(&self) -> Option<&str> {
        match self.charset_override {
            Some(charset) => Some(charset.name()),
            None => self.content_type.as_ref().and_then(ContentType::charset),
        }
    }

    /// Overrides the charset used by later decodes.
    ///
    /// An unknown name fails right away with [Error::UnsupportedEncoding].
    pub fn set_character_encoding(&mut self, name: &str) -> Result<(), Error> {
        self.charset_override = Some(Charset::for_name(name)?);
        Ok(())
    }

    /// The charset body decodes use.
    ///
    /// An unsupported `Content-Type` charset fails here, not when the header
    /// is parsed.
    pub fn charset(&self) -> Result<Charset, Error> {
        match self.character_encoding() {
            Some(name) => Charset::for_name(name),
            None => Ok(self.config.default_charset),
        }
    }

    pub fn decoder(&self) -> BodyDecoder {
        BodyDecoder::select(
            &self.method,
            self.content_type.as_ref(),
            self.multipart_config().is_some(),
            &self.config,
        )
    }
}

// Parameters
impl Request {
    /// Parameters of the query string, decoded with the configured default
    /// charset.
    pub fn query_parameters(&mut self) -> Result<&Params, Error> {
        let result = match self.query_params.take() {
            Some(result) => result,
            None => self.decode_query(),
        };
        self.query_params.insert(result).as_ref().map_err(Clone::clone)
    }

    /// Query parameters followed by body parameters, per name in that order.
    ///
    /// A query decode failure is returned before the body is touched. A body
    /// decode failure leaves [Request::query_parameters] usable.
    pub async fn parameters(&mut self) -> Result<&Params, Error> {
        let result = match self.params.take() {
            Some(result) => result,
            None => self.merge_parameters().await,
        };
        self.params.insert(result).as_ref().map_err(Clone::clone)
    }

    /// First value of `name` in [Request::parameters].
    pub async fn parameter(&mut self, name: &str) -> Result<Option<&str>, Error> {
        Ok(self.parameters().await?.get(name))
    }

    fn decode_query(&self) -> Result<Params, Error> {
        let mut params = Params::new();
        if let Some(query) = self.url.query() {
            Query::parse_into(
                &mut params,
                query.as_bytes(),
                self.config.default_charset,
                self.config.form.max_keys(),
            )?;
        }
        Ok(params)
    }

    async fn merge_parameters(&mut self) -> Result<Params, Error> {
        let mut params = self.query_parameters()?.clone();
        let body = self.body_parameters().await?;
        params.merge(&body);
        Ok(params)
    }

    async fn body_parameters(&mut self) -> Result<Params, Error> {
        let decoder = self.decoder();
        debug!(?decoder, method = %self.method, state = ?self.body.state(), "body decoder selected");

        match decoder {
            BodyDecoder::None => Ok(Params::new()),
            BodyDecoder::UrlEncoded => {
                if self.body.state() != BodyState::Unread {
                    return Ok(Params::new());
                }

                let encoding = self
                    .headers
                    .values_csv("content-encoding")
                    .find(|enc| !enc.eq_ignore_ascii_case("identity"));
                if let Some(encoding) = encoding {
                    return Err(Error::UnsupportedContentEncoding(encoding.to_string()));
                }

                let charset = self.charset()?;
                let declared = self.body.declared();
                let Some(mut reader) = self.body.take_for_decode() else {
                    return Ok(Params::new());
                };

                FormDecoder::new(self.config.form, charset)
                    .decode(&mut reader, declared)
                    .await
            }
            BodyDecoder::Multipart => {
                let mut params = Params::new();
                for part in self.parts().await? {
                    if !part.is_file() {
                        params.add(part.name(), part.text().await?);
                    }
                }
                Ok(params)
            }
        }
    }
}

// Multipart
impl Request {
    /// Attaches the multipart configuration, enabling [Request::parts].
    pub fn set_multipart_config(&mut self, config: MultipartConfig) {
        self.attributes.insert(MULTIPART_CONFIG, config);
    }

    pub fn multipart_config(&self) -> Option<&MultipartConfig> {
        self.attributes.get(MULTIPART_CONFIG)
    }

    /// Every part of a `multipart/form-data` body.
    ///
    /// Fails with [Error::MultipartNotConfigured] while no [MultipartConfig]
    /// is attached; that failure is not memoized and consumes nothing.
    /// Other content types have no parts.
    pub async fn parts(&mut self) -> Result<&[Part], Error> {
        let result = match self.parts.take() {
            Some(result) => result,
            None => {
                let config = self
                    .multipart_config()
                    .cloned()
                    .ok_or(Error::MultipartNotConfigured)?;
                self.decode_parts(&config).await
            }
        };
        self.parts.insert(result).as_deref().map_err(Clone::clone)
    }

    /// First part named `name`.
    pub async fn part(&mut self, name: &str) -> Result<Option<&Part>, Error> {
        Ok(self.parts().await?.iter().find(|part| part.name() == name))
    }

    async fn decode_parts(&mut self, config: &MultipartConfig) -> Result<Vec<Part>, Error> {
        let Some(content_type) = self
            .content_type
            .as_ref()
            .filter(|ct| ct.is("multipart/form-data"))
        else {
            return Ok(Vec::new());
        };

        let charset = self.charset()?;
        let mut decoder = MultipartDecoder::new(boundary(content_type)?, config, &self.config, charset);

        let declared = self.body.declared();
        let Some(mut reader) = self.body.take_for_decode() else {
            return Ok(Vec::new());
        };

        let result = decoder.decode(&mut reader, declared, &mut self.temp).await;

        if !decoder.violations().is_empty() {
            let codes = decoder.violations().iter().map(|v| v.as_str().to_string());
            match self.attributes.get_mut::<Vec<String>>(VIOLATIONS) {
                Some(list) => list.extend(codes),
                None => {
                    self.attributes.insert(VIOLATIONS, codes.collect::<Vec<_>>());
                }
            }
        }

        result
    }

    /// Violation codes tolerated while decoding this request.
    pub fn violations(&self) -> &[String] {
        self.attributes
            .get::<Vec<String>>(VIOLATIONS)
            .map_or(&[], Vec::as_slice)
    }
}

// Cookies & locales
impl Request {
    /// Cookies of every `Cookie` header, in order.
    ///
    /// With a [CookieCutter] attached, identical headers on consecutive
    /// requests of a connection share their cookies.
    pub fn cookies(&mut self) -> &[Cookie] {
        if self.cookies.is_none() {
            let values = self.headers.get_all("cookie");
            let cookies = match &mut self.cookie_cutter {
                Some(cutter) => cutter.cut(values).to_vec(),
                None => cookie::parse(values),
            };
            self.cookies = Some(cookies);
        }
        self.cookies.as_deref().unwrap_or_default()
    }

    /// Hands the cookie cache back to the connection for its next request.
    pub fn take_cookie_cutter(&mut self) -> Option<CookieCutter> {
        self.cookie_cutter.take()
    }

    /// Preferred locales from `Accept-Language`, best first.
    pub fn locales(&self) -> Vec<Locale> {
        parse_accept_language(self.headers.values_csv("accept-language"))
    }

    #[inline]
    pub fn locale(&self) -> Option<Locale> {
        self.locales().into_iter().next()
    }
}

// Body stream
impl Request {
    /// The raw body.
    ///
    /// Taking it before any parameter access moves the request to
    /// [BodyState::Streamed]; after a decode it yields nothing.
    pub fn body_reader(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        self.body.stream().as_mut()
    }

    /// Reads the rest of the body.
    ///
    /// Fails with [Error::Aborted] when an unread body ends before its
    /// declared length.
    pub async fn read_body_to_end(&mut self) -> Result<Vec<u8>, Error> {
        let unread = self.body.state() == BodyState::Unread;
        let declared = self.body.declared();

        let mut out = Vec::new();
        self.body.stream().read_to_end(&mut out).await?;

        if unread {
            check_length(out.len() as u64, declared)?;
        }
        Ok(out)
    }
}

// Attributes & completion
impl Request {
    #[inline]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    #[inline]
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Registers `callback` to run once in [Request::complete].
    pub fn on_complete<F: FnOnce(&Request) + Send + 'static>(&mut self, callback: F) {
        self.callbacks.push(Box::new(callback));
    }

    /// Finishes the request: runs completion callbacks, deletes temp files,
    /// clears attributes. Runs once.
    pub fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;

        for callback in std::mem::take(&mut self.callbacks) {
            callback(self);
        }

        let deleted = self.temp.release();
        self.attributes.clear();
        self.body.finish();

        debug!(method = %self.method, path = self.url.path(), deleted, "request completed");
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if !self.completed {
            let deleted = self.temp.release();
            trace!(deleted, "request dropped before completion");
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("scheme", &self.scheme)
            .field("server", &self.server)
            .field("remote_addr", &self.remote_addr)
            .field("body", &self.body.state())
            .field("attributes", &self.attributes)
            .field("completed", &self.completed)
            .finish()
    }
}
