//! `application/x-www-form-urlencoded` decoding, shared by query strings and
//! form bodies.

use crate::{errors::Error, http::content_type::Charset};
use memchr::{memchr, memchr2};

/// URL-encoded parameter decoder.
///
/// Splits `key=value` pairs on `&`, percent-decodes both sides (`+` becomes a
/// space) and decodes the resulting bytes with the given [Charset]. Unlike a
/// lenient decoder, a malformed escape (`%ZZ`, a truncated `%E`) or bytes that
/// are invalid in the charset fail with [Error::MalformedEncoding].
///
/// # Examples
/// ```rust
/// use form_gate::query::Query;
/// use form_gate::{Charset, Params};
///
/// let mut params = Params::new();
/// Query::parse_into(&mut params, b"name=john+doe&age=25&flag", Charset::Utf8, Some(10)).unwrap();
///
/// assert_eq!(params.get("name"), Some("john doe"));
/// assert_eq!(params.get("flag"), Some(""));
///
/// // Malformed escapes are errors, not pass-through
/// let mut params = Params::new();
/// assert!(Query::parse_into(&mut params, b"param=aaa%ZZbbb", Charset::Utf8, None).is_err());
/// ```
/// All possible formats:
/// ```rust
/// use form_gate::query::Query;
/// use form_gate::Charset;
///
/// let mut pairs: Vec<(String, String)> = Vec::new();
/// Query::parse_into(&mut pairs, b"debug&name=&=Qwe&key=sda&&", Charset::Utf8, None).unwrap();
///
/// assert_eq!(pairs.len(), 4);
/// assert_eq!(pairs[0], ("debug".into(), "".into()));
/// assert_eq!(pairs[1], ("name".into(), "".into()));
/// assert_eq!(pairs[2], ("".into(), "Qwe".into()));
/// assert_eq!(pairs[3], ("key".into(), "sda".into()));
/// ```
pub struct Query;

impl Query {
    /// Decodes every pair of `data` into `result`.
    ///
    /// `max_keys` bounds [QueryCollector::length] and is checked after every
    /// insertion, so a flood of keys is rejected as soon as the quota is
    /// crossed instead of after the whole input was materialized.
    pub fn parse_into<C: QueryCollector>(
        result: &mut C,
        data: &[u8],
        charset: Charset,
        max_keys: Option<usize>,
    ) -> Result<(), Error> {
        let data = match data.first() {
            Some(b'?') => &data[1..],
            _ => data,
        };

        let mut start = 0;
        while start < data.len() {
            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            Self::parse_pair(result, &data[start..end], charset, max_keys)?;
            start = end + 1;
        }

        Ok(())
    }

    /// Decodes a single `key[=value]` segment. Empty segments are skipped.
    pub(crate) fn parse_pair<C: QueryCollector>(
        result: &mut C,
        pair: &[u8],
        charset: Charset,
        max_keys: Option<usize>,
    ) -> Result<(), Error> {
        if pair.is_empty() {
            return Ok(());
        }

        let (key, value) = match memchr(b'=', pair) {
            Some(index) => (&pair[..index], &pair[index + 1..]),
            None => (pair, &b""[..]),
        };

        result.add_param(decode(key, charset)?, decode(value, charset)?);

        if let Some(limit) = max_keys {
            if result.length() > limit {
                return Err(Error::QuotaExceeded {
                    what: "form keys",
                    limit: limit as i64,
                });
            }
        }

        Ok(())
    }
}

/// Percent-decodes one component and decodes the bytes with `charset`.
pub fn decode(src: &[u8], charset: Charset) -> Result<String, Error> {
    if memchr2(b'%', b'+', src).is_none() {
        return charset.decode(src);
    }

    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        match src[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hi = src.get(i + 1).copied().and_then(hex);
                let lo = src.get(i + 2).copied().and_then(hex);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                    _ => {
                        let end = (i + 3).min(src.len());
                        return Err(Error::malformed(format!(
                            "invalid escape {}",
                            String::from_utf8_lossy(&src[i..end])
                        )));
                    }
                }
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }

    charset.decode(&out)
}

#[inline(always)]
const fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// A trait for types that can collect decoded parameters.
///
/// # Examples
/// ```rust
/// use form_gate::query::QueryCollector;
///
/// struct Names(Vec<String>);
///
/// impl QueryCollector for Names {
///     fn add_param(&mut self, key: String, _value: String) {
///         self.0.push(key);
///     }
///
///     fn length(&self) -> usize {
///         self.0.len()
///     }
/// }
/// ```
pub trait QueryCollector {
    /// Adds a decoded parameter to the collection.
    fn add_param(&mut self, key: String, value: String);

    /// Returns the number of entries counted against the key quota.
    // For `length` instead of `len`, thanks to `clippy` for the tip
    // about adding the `is_empty` method, although it's not needed here
    fn length(&self) -> usize;
}

// Implementation for Vec - preserves every pair, duplicates included
impl QueryCollector for Vec<(String, String)> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.push((key, value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Params;

    fn pairs(line: &str) -> Result<Vec<(String, String)>, Error> {
        let mut result = Vec::new();
        Query::parse_into(&mut result, line.as_bytes(), Charset::Utf8, None)?;
        Ok(result)
    }

    #[test]
    fn basic() {
        let cases = ["a=1&b=2", "?a=1&b=2"];

        for line in cases {
            let params = pairs(line).unwrap();

            assert_eq!(params.len(), 2);
            assert_eq!(params[0], ("a".into(), "1".into()));
            assert_eq!(params[1], ("b".into(), "2".into()));
        }
    }

    #[test]
    fn decoding() {
        #[rustfmt::skip]
        let cases = [
            ("name2=test%C3%A4",        Charset::Utf8,      "name2", "test\u{e4}"),
            ("name2=test%E4",           Charset::Iso8859_1, "name2", "test\u{e4}"),
            ("a+b=c+d",                 Charset::Utf8,      "a b",   "c d"),
            ("k%3Dx=v%26w",             Charset::Utf8,      "k=x",   "v&w"),
            ("email=user%40example.com",Charset::Utf8,      "email", "user@example.com"),
        ];

        for (line, charset, key, value) in cases {
            let mut params = Params::new();
            Query::parse_into(&mut params, line.as_bytes(), charset, None).unwrap();
            assert_eq!(params.get(key), Some(value), "{line}");
        }
    }

    #[test]
    fn malformed() {
        #[rustfmt::skip]
        let cases = [
            "param=aaa%ZZbbb&other=value",
            "test_%e0%x8%81=missing",
            "param=aaa%E7bbb",
            "trailing=%E",
            "trailing=%",
        ];

        for line in cases {
            let err = pairs(line).unwrap_err();
            assert!(matches!(err, Error::MalformedEncoding(_)), "{line}: {err}");
        }
    }

    #[test]
    fn limit_error() {
        let mut params = Params::new();
        assert_eq!(
            Query::parse_into(&mut params, b"a&b&c", Charset::Utf8, Some(2)),
            Err(Error::QuotaExceeded {
                what: "form keys",
                limit: 2
            })
        );

        // Repeated names count once
        let mut params = Params::new();
        assert!(Query::parse_into(&mut params, b"a=1&a=2&a=3&b", Charset::Utf8, Some(2)).is_ok());
    }

    #[test]
    fn empty() {
        assert!(pairs("").unwrap().is_empty());
        assert!(pairs("?").unwrap().is_empty());
        assert!(pairs("&&").unwrap().is_empty());
    }
}
