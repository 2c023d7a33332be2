//! `Content-Type` decoding and the charsets this crate can decode.

use crate::errors::Error;
use std::fmt;

/// Character sets available for decoding parameters and part text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Charset {
    Utf8,
    Iso8859_1,
    UsAscii,
}

impl Charset {
    /// Looks a charset up by name, ignoring ASCII case and surrounding
    /// whitespace.
    pub fn for_name(name: &str) -> Result<Self, Error> {
        let lower = name.trim().to_ascii_lowercase();
        match lower.as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "iso_8859_1" | "latin1" | "l1" => {
                Ok(Charset::Iso8859_1)
            }
            "us-ascii" | "ascii" | "iso646-us" => Ok(Charset::UsAscii),
            _ => Err(Error::UnsupportedEncoding(name.to_string())),
        }
    }

    /// Canonical lower-case name, e.g. `"utf-8"`.
    pub const fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "utf-8",
            Charset::Iso8859_1 => "iso-8859-1",
            Charset::UsAscii => "us-ascii",
        }
    }

    /// Replaces known aliases by their canonical name; unknown names are
    /// returned untouched so the failure surfaces only when they are used.
    pub fn normalize(name: &str) -> String {
        match Charset::for_name(name) {
            Ok(charset) => charset.name().to_string(),
            Err(_) => name.to_string(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String, Error> {
        match self {
            Charset::Utf8 => simdutf8::basic::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|_| Error::malformed("invalid UTF-8 sequence")),
            Charset::Iso8859_1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            Charset::UsAscii => match bytes.is_ascii() {
                true => Ok(bytes.iter().map(|&b| b as char).collect()),
                false => Err(Error::malformed("non US-ASCII byte")),
            },
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded `Content-Type` header.
///
/// ```
/// use form_gate::ContentType;
///
/// let ct = ContentType::parse("text/html; charset=\"utf8\"");
/// assert_eq!(ct.raw(), "text/html; charset=\"utf8\"");
/// assert_eq!(ct.mime_type(), "text/html");
/// assert_eq!(ct.charset(), Some("utf-8"));
///
/// let ct = ContentType::parse("");
/// assert_eq!(ct.mime_type(), "");
/// assert_eq!(ct.charset(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    raw: String,
    mime_type: String,
    params: Vec<(String, String)>,
    charset: Option<String>,
}

impl ContentType {
    /// Never fails: whatever cannot be understood is simply absent.
    pub fn parse(value: &str) -> Self {
        let (mime_type, params) = split_params(value);
        let charset = params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("charset"))
            .map(|(_, v)| Charset::normalize(v));

        ContentType {
            raw: value.to_string(),
            mime_type: mime_type.to_ascii_lowercase(),
            params,
            charset,
        }
    }

    /// The header value exactly as received.
    #[inline]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Lower-cased `type/subtype`, empty when the header was empty.
    #[inline]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Charset parameter with known aliases normalized (`utf8` -> `utf-8`).
    #[inline]
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// Parameter lookup, ignoring ASCII case in the key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// All parameters in header order.
    #[inline]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    #[inline]
    pub fn is(&self, mime_type: &str) -> bool {
        self.mime_type.eq_ignore_ascii_case(mime_type)
    }
}

/// Splits `first; key=value; key="quoted;value"` into the trimmed first token
/// and its parameters.
///
/// Quoted values are taken literally up to the closing quote (`\"` and `\\`
/// are unescaped, any other backslash is kept), so they may contain `;` and
/// `=`. Segments without `=` keep an empty value. Used for `Content-Type` and
/// for the `Content-Disposition` of multipart parts.
pub(crate) fn split_params(value: &str) -> (String, Vec<(String, String)>) {
    let mut first: Option<String> = None;
    let mut params = Vec::new();

    let mut key = String::new();
    let mut val = String::new();
    let mut in_value = false;
    let mut in_quotes = false;
    let mut quoted = false;

    let mut finish = |key: &mut String, val: &mut String, quoted: bool, first: &mut Option<String>| {
        match first {
            None => *first = Some(key.trim().to_string()),
            Some(_) => {
                let k = key.trim();
                if !k.is_empty() {
                    let v = match quoted {
                        true => val.clone(),
                        false => val.trim().to_string(),
                    };
                    params.push((k.to_string(), v));
                }
            }
        }
        key.clear();
        val.clear();
    };

    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '\\' if matches!(chars.peek(), Some('"') | Some('\\')) => {
                    if let Some(next) = chars.next() {
                        val.push(next);
                    }
                }
                '"' => {
                    in_quotes = false;
                    quoted = true;
                }
                c => val.push(c),
            }
            continue;
        }

        match c {
            ';' => {
                finish(&mut key, &mut val, quoted, &mut first);
                in_value = false;
                quoted = false;
            }
            // The first segment is a bare token, `=` only starts values after it
            '=' if !in_value && first.is_some() => in_value = true,
            '"' if in_value && !quoted && val.trim().is_empty() => {
                val.clear();
                in_quotes = true;
            }
            c if in_value => {
                if !quoted {
                    val.push(c);
                }
            }
            c => key.push(c),
        }
    }
    finish(&mut key, &mut val, quoted, &mut first);

    (first.unwrap_or_default(), params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_encoding() {
        #[rustfmt::skip]
        let cases = [
            ("text/test",                       "text/test",   None),
            ("text/html;charset=utf8",          "text/html",   Some("utf-8")),
            ("text/html; charset=\"utf8\"",     "text/html",   Some("utf-8")),
            ("text/html; CHARSET=ISO-8859-1",   "text/html",   Some("iso-8859-1")),
            ("Text/HTML; charset=koi8-r",       "text/html",   Some("koi8-r")),
            ("",                                "",            None),
            (
                "text/html; other=foo ; blah=\"charset=wrong;\" ; charset =   \" x=z; \"   ; more=values ",
                "text/html",
                Some(" x=z; "),
            ),
        ];

        for (raw, mime, charset) in cases {
            let ct = ContentType::parse(raw);
            assert_eq!(ct.raw(), raw);
            assert_eq!(ct.mime_type(), mime, "{raw}");
            assert_eq!(ct.charset(), charset, "{raw}");
        }
    }

    #[test]
    fn quoted_params_keep_separators() {
        let ct = ContentType::parse("multipart/form-data; boundary=\"Aa;B=03x\"; x");
        assert!(ct.is("multipart/form-data"));
        assert_eq!(ct.param("BOUNDARY"), Some("Aa;B=03x"));
        assert_eq!(ct.params().len(), 2);
        assert_eq!(ct.param("x"), Some(""));
    }

    #[test]
    fn disposition_params() {
        let (kind, params) =
            split_params(r#"form-data; name="stuff"; filename="C:\dir\foo \"v2\".upload""#);

        assert_eq!(kind, "form-data");
        assert_eq!(params[0], ("name".to_string(), "stuff".to_string()));
        assert_eq!(
            params[1],
            ("filename".to_string(), r#"C:\dir\foo "v2".upload"#.to_string())
        );
    }

    #[test]
    fn charsets() {
        assert_eq!(Charset::for_name(" UTF8 "), Ok(Charset::Utf8));
        assert_eq!(Charset::for_name("Latin1"), Ok(Charset::Iso8859_1));
        assert_eq!(
            Charset::for_name("doesNotExist"),
            Err(Error::UnsupportedEncoding("doesNotExist".into()))
        );

        assert_eq!(Charset::Iso8859_1.decode(b"test\xE4").unwrap(), "test\u{e4}");
        assert_eq!(Charset::Utf8.decode(b"test\xC3\xA4").unwrap(), "test\u{e4}");
        assert!(Charset::Utf8.decode(b"aaa\xE7bbb").is_err());
        assert!(Charset::UsAscii.decode(b"\xE4").is_err());
    }
}
