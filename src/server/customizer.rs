//! Request customizers run during dispatch setup.

use crate::{errors::Error, HostPort, Request};
use tracing::debug;

/// A step rewriting the apparent metadata of a request (scheme, server
/// authority, remote address) before any part of it is decoded.
///
/// Customizers are registered on [RequestConfig](crate::limits::RequestConfig)
/// and run once per request, in registration order, by [Request::prepare].
///
/// # Examples
/// ```
/// use form_gate::{Customizer, Error, Request};
///
/// struct AlwaysSecure;
///
/// impl Customizer for AlwaysSecure {
///     fn customize(&self, request: &mut Request) -> Result<(), Error> {
///         request.set_scheme("https");
///         Ok(())
///     }
/// }
/// ```
pub trait Customizer: Send + Sync {
    fn customize(&self, request: &mut Request) -> Result<(), Error>;
}

/// Trusts the forwarding headers set by a reverse proxy.
///
/// | Header | Effect |
/// |---|---|
/// | `X-Forwarded-For` | first entry becomes the remote address |
/// | `X-Forwarded-Proto` | scheme; the port follows its default unless set explicitly |
/// | `X-Forwarded-Host` | server name and, if present, port |
/// | `X-Forwarded-Port` | server port |
/// | `Forwarded` ([RFC 7239](https://tools.ietf.org/html/rfc7239)) | `for`, `proto` and `host` of the first element |
///
/// `Forwarded` is applied after the `X-Forwarded-*` family and wins over it.
/// Only install it behind a proxy that overwrites these headers.
#[derive(Debug, Clone)]
pub struct ForwardedCustomizer {
    pub for_header: String,
    pub proto_header: String,
    pub host_header: String,
    pub port_header: String,
    pub forwarded_header: String,
}

impl Default for ForwardedCustomizer {
    fn default() -> Self {
        Self {
            for_header: "X-Forwarded-For".into(),
            proto_header: "X-Forwarded-Proto".into(),
            host_header: "X-Forwarded-Host".into(),
            port_header: "X-Forwarded-Port".into(),
            forwarded_header: "Forwarded".into(),
        }
    }
}

/// What the headers of one request claim.
#[derive(Debug, Default)]
struct Forwarded {
    remote: Option<HostPort>,
    proto: Option<String>,
    host: Option<HostPort>,
    port: Option<u16>,
}

impl ForwardedCustomizer {
    fn collect(&self, request: &Request) -> Result<Forwarded, Error> {
        let headers = request.headers();
        let mut fwd = Forwarded::default();

        if let Some(value) = headers.values_csv(&self.for_header).next() {
            fwd.remote = node(value);
        }
        if let Some(value) = headers.values_csv(&self.proto_header).next() {
            fwd.proto = Some(value.to_ascii_lowercase());
        }
        if let Some(value) = headers.values_csv(&self.host_header).next() {
            fwd.host = Some(HostPort::parse(value)?);
        }
        if let Some(value) = headers.values_csv(&self.port_header).next() {
            let port = value
                .parse()
                .map_err(|_| Error::InvalidHost(value.to_string()))?;
            fwd.port = Some(port);
        }

        // RFC 7239: the first element was added by the proxy facing the client
        if let Some(element) = headers.values_csv(&self.forwarded_header).next() {
            for pair in element.split(';') {
                let Some((key, value)) = pair.split_once('=') else {
                    continue;
                };
                let value = value.trim().trim_matches('"');

                match key.trim().to_ascii_lowercase().as_str() {
                    "for" => fwd.remote = node(value).or(fwd.remote),
                    "proto" => fwd.proto = Some(value.to_ascii_lowercase()),
                    "host" => fwd.host = Some(HostPort::parse(value)?),
                    _ => {}
                }
            }
        }

        Ok(fwd)
    }
}

impl Customizer for ForwardedCustomizer {
    fn customize(&self, request: &mut Request) -> Result<(), Error> {
        let fwd = self.collect(request)?;

        if let Some(remote) = fwd.remote {
            request.set_remote_addr(remote);
        }

        let mut explicit_port = fwd.port;
        if let Some(host) = fwd.host {
            explicit_port = explicit_port.or(host.port());
            request.set_server(HostPort::new(host.host(), explicit_port));
        }

        if let Some(proto) = &fwd.proto {
            request.set_scheme(proto);
            if explicit_port.is_none() {
                request.set_server_port(None);
            }
        }

        if let Some(port) = fwd.port {
            request.set_server_port(Some(port));
        }

        debug!(
            scheme = request.scheme(),
            server = %request.server_name(),
            port = request.server_port(),
            "forwarding headers applied"
        );
        Ok(())
    }
}

/// A `for` node: an address, `unknown` or an obfuscated `_identifier`.
fn node(value: &str) -> Option<HostPort> {
    if value.eq_ignore_ascii_case("unknown") || value.starts_with('_') {
        return None;
    }
    HostPort::parse(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{limits::RequestConfig, tools};
    use std::sync::Arc;

    fn forwarded(raw: &str) -> Result<Request, Error> {
        let mut config = RequestConfig::default();
        config.add_customizer(ForwardedCustomizer::default());

        let mut request = tools::request(raw).config(Arc::new(config)).build();
        request.prepare()?;
        Ok(request)
    }

    #[test]
    fn forwarded_headers() {
        #[rustfmt::skip]
        let cases = [
            (
                "GET / HTTP/1.1\r\nHost: myhost\r\nX-Forwarded-Proto: https\r\n\r\n",
                ("https", "myhost", 443, "https://myhost/"),
            ),
            (
                "GET / HTTP/1.1\r\nHost: myhost:8080\r\nX-Forwarded-Proto: https\r\n\r\n",
                ("https", "myhost", 443, "https://myhost/"),
            ),
            (
                "GET /p HTTP/1.1\r\nHost: myhost\r\nX-Forwarded-Host: example.com:8443\r\nX-Forwarded-Proto: https\r\n\r\n",
                ("https", "example.com", 8443, "https://example.com:8443/p"),
            ),
            (
                "GET / HTTP/1.1\r\nHost: myhost\r\nX-Forwarded-Host: example.com\r\nX-Forwarded-Port: 8888\r\n\r\n",
                ("http", "example.com", 8888, "http://example.com:8888/"),
            ),
            (
                "GET / HTTP/1.1\r\nHost: myhost\r\nX-Forwarded-Proto: http\r\nForwarded: for=192.0.2.60;proto=https;host=\"[::1]:4443\", for=10.0.0.1\r\n\r\n",
                ("https", "[::1]", 4443, "https://[::1]:4443/"),
            ),
        ];

        for (raw, (scheme, name, port, url)) in cases {
            let request = forwarded(raw).unwrap();
            assert_eq!(request.scheme(), scheme, "{raw}");
            assert_eq!(request.server_name(), name, "{raw}");
            assert_eq!(request.server_port(), port, "{raw}");
            assert_eq!(request.request_url(), url, "{raw}");
        }
    }

    #[test]
    fn remote_address() {
        #[rustfmt::skip]
        let cases = [
            ("X-Forwarded-For: 10.20.30.40, 10.0.0.1",  Some("10.20.30.40")),
            ("X-Forwarded-For: unknown",                None),
            ("Forwarded: for=\"[2001:db8::1]:4711\"",   Some("[2001:db8::1]")),
            ("Forwarded: for=_hidden",                  None),
        ];

        for (header, expected) in cases {
            let raw = format!("GET / HTTP/1.1\r\nHost: h\r\n{header}\r\n\r\n");
            let request = forwarded(&raw).unwrap();
            assert_eq!(request.remote_addr().map(HostPort::host), expected, "{header}");
        }
    }

    #[test]
    fn bad_forwarded_port() {
        let err = forwarded("GET / HTTP/1.1\r\nHost: h\r\nX-Forwarded-Port: nope\r\n\r\n").unwrap_err();
        assert_eq!(err, Error::InvalidHost("nope".into()));
    }
}
