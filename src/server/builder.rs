use crate::{
    http::{
        attributes::Attributes,
        body::{Body, BoxedReader},
        cleanup::TempResources,
        content_type::ContentType,
        cookie::CookieCutter,
    },
    limits::RequestConfig,
    HeaderMap, HostPort, Method, Request, Url, Version,
};
use std::{io::Cursor, net::SocketAddr, sync::Arc};
use tokio::io::AsyncRead;
use tracing::trace;

/// Builder assembling a [Request] from what the connection layer parsed.
///
/// Every component is optional: by default the request is
/// `GET / HTTP/1.1` without headers or body, served over `http` from
/// `localhost`.
///
/// # Examples
///
/// ```
/// use form_gate::{limits::RequestConfig, Method, Request};
/// use std::sync::Arc;
///
/// let request = Request::builder()
///     .method(Method::Put)
///     .target("/upload?id=7")
///     .header("Content-Length", "5")
///     .body_bytes("hello")
///     .local_addr("127.0.0.1:8443".parse().unwrap())
///     .secure(true)
///     .config(Arc::new(RequestConfig::default()))
///     .build();
///
/// assert_eq!(request.scheme(), "https");
/// assert_eq!(request.content_length(), Some(5));
/// assert_eq!(request.query_string(), Some("id=7"));
/// ```
pub struct RequestBuilder {
    method: Method,
    target: String,
    version: Version,
    headers: HeaderMap,
    body: Option<BoxedReader>,

    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    secure: bool,

    config: Option<Arc<RequestConfig>>,
    cookie_cutter: Option<CookieCutter>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            method: Method::Get,
            target: "/".to_string(),
            version: Version::Http11,
            headers: HeaderMap::new(),
            body: None,
            local_addr: None,
            remote_addr: None,
            secure: false,
            config: None,
            cookie_cutter: None,
        }
    }
}

impl RequestBuilder {
    #[inline(always)]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the request target: origin form (`/path?query`) or absolute
    /// form (`http://host:port/path?query`).
    #[inline(always)]
    pub fn target<T: Into<String>>(mut self, target: T) -> Self {
        self.target = target.into();
        self
    }

    #[inline(always)]
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Appends a header. Repeated names keep every value, in order.
    #[inline(always)]
    pub fn header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.append(name, value);
        self
    }

    #[inline(always)]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the body stream.
    ///
    /// When a `Content-Length` header is present the stream is never read
    /// past it.
    #[inline(always)]
    pub fn body<R: AsyncRead + Send + Unpin + 'static>(mut self, reader: R) -> Self {
        self.body = Some(Box::new(reader));
        self
    }

    /// Sets an in-memory body.
    #[inline(always)]
    pub fn body_bytes<B: Into<Vec<u8>>>(self, bytes: B) -> Self {
        self.body(Cursor::new(bytes.into()))
    }

    /// Address the connection was accepted on. Used as the server authority
    /// when neither the target nor `Host` names one.
    #[inline(always)]
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    #[inline(always)]
    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Marks the connection as TLS: the scheme becomes `https` unless the
    /// target names one.
    #[inline(always)]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Shares the decoding configuration of the connection.
    ///
    /// Defaults to [RequestConfig::default].
    #[inline(always)]
    pub fn config(mut self, config: Arc<RequestConfig>) -> Self {
        self.config = Some(config);
        self
    }

    /// Hands over the cookie cache of the previous request on the same
    /// connection (see [Request::take_cookie_cutter]).
    #[inline(always)]
    pub fn cookie_cutter(mut self, cutter: CookieCutter) -> Self {
        self.cookie_cutter = Some(cutter);
        self
    }

    pub fn build(self) -> Request {
        let url = Url::parse(&self.target);

        let scheme = match url.scheme() {
            Some(scheme) => scheme.to_string(),
            None if self.secure => "https".to_string(),
            None => "http".to_string(),
        };

        let declared = self.headers.get("content-length").and_then(|value| {
            let len = value.trim().parse::<u64>().ok();
            if len.is_none() {
                trace!(value, "ignoring unparsable content-length");
            }
            len
        });

        let body = match self.body {
            Some(reader) => Body::new(reader, declared),
            None => Body::empty(),
        };

        let content_type = self.headers.get("content-type").map(ContentType::parse);

        let server = match self.local_addr {
            Some(addr) => host_port(addr),
            None => HostPort::new("localhost", None),
        };

        Request {
            config: self.config.unwrap_or_default(),

            method: self.method,
            url,
            version: self.version,
            headers: self.headers,
            content_type,
            body,

            scheme,
            server,
            local_addr: self.local_addr,
            remote_addr: self.remote_addr.map(host_port),

            attributes: Attributes::new(),
            temp: TempResources::default(),
            callbacks: Vec::new(),
            cookie_cutter: self.cookie_cutter,

            charset_override: None,
            query_params: None,
            params: None,
            parts: None,
            cookies: None,

            prepared: false,
            completed: false,
        }
    }
}

fn host_port(addr: SocketAddr) -> HostPort {
    match addr {
        SocketAddr::V4(v4) => HostPort::new(v4.ip().to_string(), Some(v4.port())),
        SocketAddr::V6(v6) => HostPort::new(format!("[{}]", v6.ip()), Some(v6.port())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BodyState;
    use tokio::io::AsyncReadExt;

    #[test]
    fn defaults() {
        let request = Request::builder().build();

        assert_eq!(request.method(), &Method::Get);
        assert_eq!(request.url().path(), "/");
        assert_eq!(request.version(), Version::Http11);
        assert_eq!(request.scheme(), "http");
        assert_eq!(request.server_name(), "localhost");
        assert_eq!(request.server_port(), 80);
        assert_eq!(request.content_length(), None);
        assert_eq!(request.body_state(), BodyState::Unread);
    }

    #[test]
    fn addresses() {
        #[rustfmt::skip]
        let cases = [
            ("10.1.2.3:8080",     "10.1.2.3",  8080),
            ("[::1]:9000",        "[::1]",     9000),
        ];

        for (addr, host, port) in cases {
            let addr: SocketAddr = addr.parse().unwrap();
            let request = Request::builder().local_addr(addr).remote_addr(addr).build();

            assert_eq!(request.server_name(), host);
            assert_eq!(request.server_port(), port);
            assert_eq!(request.remote_addr(), Some(&HostPort::new(host, Some(port))));
        }
    }

    #[tokio::test]
    async fn content_length_bounds_body() {
        let mut request = Request::builder()
            .header("Content-Length", "3")
            .body_bytes("abcdef")
            .build();
        assert_eq!(request.read_body_to_end().await.unwrap(), b"abc");

        let mut request = Request::builder()
            .header("Content-Length", "lots")
            .body_bytes("abcdef")
            .build();
        assert_eq!(request.content_length(), None);

        let mut body = String::new();
        request.body_reader().read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "abcdef");
    }
}
