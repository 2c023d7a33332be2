//! Lenient `Cookie` header decoding.
//!
//! The grammar is the legacy, forgiving one browsers actually send, not strict
//! RFC 6265:
//! - pairs are separated by `;`, name and value by the first `=`;
//! - a value that *starts* with `"` runs to the matching closing quote and may
//!   contain `;` and `=`; the surrounding quotes are stripped, the inside is
//!   kept untouched (backslash escapes included);
//! - any other value runs to the next `;`, taken literally;
//! - segments without `=` are dropped;
//! - `$Version`, `$Path` and `$Domain` are legacy attributes of the preceding
//!   cookie, never cookies themselves;
//! - reserved attribute names (`Path`, `Domain`, ...) and names that are not
//!   tokens are dropped instead of being reported as data.

use std::{
    hash::{Hash, Hasher},
    sync::Arc,
};
use tracing::trace;

const RESERVED_NAMES: [&str; 9] = [
    "Comment", "Discard", "Domain", "Expires", "Max-Age", "Path", "Secure", "Version", "HttpOnly",
];

/// An immutable cookie received from the client.
///
/// Equality and hashing consider the name and the value only. Clones share
/// their storage.
#[derive(Debug, Clone)]
pub struct Cookie {
    name: Arc<str>,
    value: Arc<str>,
    path: Option<Arc<str>>,
    domain: Option<Arc<str>>,
    version: u32,
}

impl Cookie {
    pub fn new<N: AsRef<str>, V: AsRef<str>>(name: N, value: V) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            value: Arc::from(value.as_ref()),
            path: None,
            domain: None,
            version: 0,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Legacy `$Path` attribute.
    #[inline]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Legacy `$Domain` attribute.
    #[inline]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Legacy `$Version` attribute, `0` when absent.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[cfg(test)]
    pub(crate) fn same_storage(&self, other: &Cookie) -> bool {
        Arc::ptr_eq(&self.name, &other.name) && Arc::ptr_eq(&self.value, &other.value)
    }
}

impl PartialEq for Cookie {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value
    }
}

impl Eq for Cookie {}

impl Hash for Cookie {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.value.hash(state);
    }
}

/// Parses every `Cookie` header value, in order. Never fails.
///
/// ```
/// use form_gate::cookie::parse;
///
/// let cookies = parse(["Path=value", "name=value; other=\"quoted=;value\""]);
/// assert_eq!(cookies.len(), 2);
/// assert_eq!(cookies[0].name(), "name");
/// assert_eq!(cookies[1].value(), "quoted=;value");
/// ```
pub fn parse<'a, I: IntoIterator<Item = &'a str>>(values: I) -> Vec<Cookie> {
    let mut cookies = Vec::new();
    let mut version = 0;

    for value in values {
        for (name, value) in Segments::new(value) {
            match name.strip_prefix('$') {
                Some(attr) => apply_attribute(&mut cookies, &mut version, attr, value),
                None if !is_token(name) => trace!(name, "dropping cookie with invalid name"),
                None if is_reserved(name) => trace!(name, "dropping reserved cookie name"),
                None => {
                    let mut cookie = Cookie::new(name, value);
                    cookie.version = version;
                    cookies.push(cookie);
                }
            }
        }
    }

    cookies
}

fn apply_attribute(cookies: &mut [Cookie], version: &mut u32, attr: &str, value: &str) {
    if attr.eq_ignore_ascii_case("Version") {
        *version = value.parse().unwrap_or(0);
        return;
    }

    let Some(cookie) = cookies.last_mut() else {
        return;
    };

    if attr.eq_ignore_ascii_case("Path") {
        cookie.path = Some(Arc::from(value));
    } else if attr.eq_ignore_ascii_case("Domain") {
        cookie.domain = Some(Arc::from(value));
    }
}

#[inline]
fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name))
}

#[inline]
fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
        })
}

/// Iterator over the `(name, value)` pairs of one header value.
struct Segments<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Segments<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.src.as_bytes();

        while self.pos < bytes.len() {
            let start = self.pos;
            let mut eq = None;
            let mut i = start;

            // Name, up to the first `=` of the segment
            while i < bytes.len() && bytes[i] != b';' {
                if bytes[i] == b'=' {
                    eq = Some(i);
                    break;
                }
                i += 1;
            }

            let Some(eq) = eq else {
                // No `=`: drop the whole segment
                self.pos = i + 1;
                continue;
            };

            let name = self.src[start..eq].trim();
            let mut v = eq + 1;
            while v < bytes.len() && (bytes[v] == b' ' || bytes[v] == b'\t') {
                v += 1;
            }

            let value = if bytes.get(v) == Some(&b'"') {
                let open = v + 1;
                let mut close = open;
                let mut escaped = false;
                while close < bytes.len() {
                    match bytes[close] {
                        _ if escaped => escaped = false,
                        b'\\' => escaped = true,
                        b'"' => break,
                        _ => {}
                    }
                    close += 1;
                }

                let value = &self.src[open..close];
                // Skip whatever trails the closing quote
                let end = memchr::memchr(b';', &bytes[close.min(bytes.len())..])
                    .map(|p| close + p)
                    .unwrap_or(bytes.len());
                self.pos = end + 1;
                value
            } else {
                let end = memchr::memchr(b';', &bytes[v..])
                    .map(|p| v + p)
                    .unwrap_or(bytes.len());
                self.pos = end + 1;
                self.src[v..end].trim_end()
            };

            return Some((name, value));
        }

        None
    }
}

/// Connection-scoped cookie cache.
///
/// Browsers resend identical `Cookie` headers on every request of a
/// connection; when the raw values match the previous request, the previous
/// cookies are handed back (sharing their storage) instead of parsed again.
#[derive(Debug, Default)]
pub struct CookieCutter {
    fields: Vec<String>,
    cookies: Vec<Cookie>,
}

impl CookieCutter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cut<'a, I: IntoIterator<Item = &'a str>>(&mut self, values: I) -> &[Cookie] {
        let values: Vec<&str> = values.into_iter().collect();

        if !self.fields.iter().map(String::as_str).eq(values.iter().copied()) {
            self.cookies = parse(values.iter().copied());
            self.fields = values.iter().map(|v| v.to_string()).collect();
        }

        &self.cookies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(values: &[&str]) -> Vec<(String, String)> {
        parse(values.iter().copied())
            .into_iter()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect()
    }

    #[test]
    fn cookies() {
        #[rustfmt::skip]
        let cases: [(&[&str], &[(&str, &str)]); 8] = [
            (&[],                                          &[]),
            (&[""],                                        &[]),
            (&["name=quoted=\"\\\"badly\\\"\""],            &[("name", "quoted=\"\\\"badly\\\"\"")]),
            (&["name=value; other=\"quoted=;value\""],     &[("name", "value"), ("other", "quoted=;value")]),
            (
                &["__utmz=14316.133020.1.1.utr=gna.de|ucn=(real)|utd=reral|utct=/games/hen-one,gnt-50-ba-keys:key,2072262.html"],
                &[("__utmz", "14316.133020.1.1.utr=gna.de|ucn=(real)|utd=reral|utct=/games/hen-one,gnt-50-ba-keys:key,2072262.html")],
            ),
            (&["Path=value", "name=value"],                &[("name", "value")]),
            (&["novalue; a = 1 ;b=\"x\" trailing; c="],    &[("a", "1"), ("b", "x"), ("c", "")]),
            (&["bad name=1; ok=2; domain=x"],              &[("ok", "2")]),
        ];

        for (values, expected) in cases {
            let expected: Vec<(String, String)> = expected
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect();
            assert_eq!(pairs(values), expected, "{values:?}");
        }
    }

    #[test]
    fn legacy_attributes() {
        let cookies = parse(["$Version=1; name=value; $Path=/foo; $Domain=example.com; other=x"]);

        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].version(), 1);
        assert_eq!(cookies[0].path(), Some("/foo"));
        assert_eq!(cookies[0].domain(), Some("example.com"));
        assert_eq!(cookies[1].path(), None);
    }

    #[test]
    fn unterminated_quote() {
        let cookies = parse(["a=\"never closed; b=2"]);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value(), "never closed; b=2");
    }

    #[test]
    fn cutter_reuses_identical_headers() {
        let mut cutter = CookieCutter::new();
        let header = "name=value; other=\"quoted=;value\"";

        let first = cutter.cut([header]).to_vec();
        let second = cutter.cut([header]).to_vec();
        assert_eq!(first, second);
        assert!(first[0].same_storage(&second[0]));
        assert!(first[1].same_storage(&second[1]));

        let third = cutter.cut(["name=value; other=\"othervalue\""]).to_vec();
        assert_eq!(first[0], third[0]);
        assert!(!first[0].same_storage(&third[0]));
        assert_ne!(first[1], third[1]);
    }
}
