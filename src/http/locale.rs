//! `Accept-Language` decoding.

use std::fmt;

/// A language preference from `Accept-Language`, e.g. `en-AU`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale {
    language: String,
    country: String,
}

impl Locale {
    pub fn new(language: &str, country: &str) -> Self {
        Self {
            language: language.to_ascii_lowercase(),
            country: country.to_ascii_uppercase(),
        }
    }

    /// Lower-cased primary tag.
    #[inline]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Upper-cased region, empty when absent.
    #[inline]
    pub fn country(&self) -> &str {
        &self.country
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.country.is_empty() {
            true => f.write_str(&self.language),
            false => write!(f, "{}-{}", self.language, self.country),
        }
    }
}

/// Orders the comma-separated elements of every `Accept-Language`
/// occurrence by descending quality.
///
/// Elements with `q=0`, an unparsable quality or the `*` wildcard are
/// dropped. Equal qualities keep their arrival order.
pub(crate) fn parse_accept_language<'a, I: IntoIterator<Item = &'a str>>(elements: I) -> Vec<Locale> {
    let mut weighted: Vec<(f32, Locale)> = Vec::new();

    for element in elements {
        let mut parts = element.split(';');
        let tag = parts.next().unwrap_or_default().trim();

        let mut quality: f32 = 1.0;
        for param in parts {
            if let Some((key, value)) = param.split_once('=') {
                if key.trim().eq_ignore_ascii_case("q") {
                    quality = value.trim().parse().unwrap_or(0.0);
                }
            }
        }

        if tag.is_empty() || tag == "*" || quality.is_nan() || quality <= 0.0 {
            continue;
        }

        let mut subtags = tag.split('-');
        let language = subtags.next().unwrap_or_default();
        // Region: two letters or three digits, script subtags are skipped
        let country = subtags
            .find(|s| {
                (s.len() == 2 && s.bytes().all(|b| b.is_ascii_alphabetic()))
                    || (s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit()))
            })
            .unwrap_or_default();
        weighted.push((quality, Locale::new(language, country)));
    }

    // `sort_by` is stable
    weighted.sort_by(|a, b| b.0.total_cmp(&a.0));
    weighted.into_iter().map(|(_, locale)| locale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeaderMap;

    #[test]
    fn accept_language() {
        let headers: HeaderMap = [
            ("Accept-Language", "da, en-gb;q=0.8, en;q=0.7"),
            ("Accept-Language", "XX;q=0, en-au;q=0.9"),
        ]
        .into_iter()
        .collect();

        let locales = parse_accept_language(headers.values_csv("accept-language"));

        #[rustfmt::skip]
        let expected = [
            ("da", ""),
            ("en", "AU"),
            ("en", "GB"),
            ("en", ""),
        ];

        assert_eq!(locales.len(), expected.len());
        for (locale, (language, country)) in locales.iter().zip(expected) {
            assert_eq!(locale.language(), language);
            assert_eq!(locale.country(), country);
        }
        assert_eq!(locales[1].to_string(), "en-AU");
    }

    #[test]
    fn ignored_elements() {
        #[rustfmt::skip]
        let cases = [
            ("",                0),
            ("*",               0),
            ("fr;q=bogus",      0),
            ("zh-Hant-TW",      1),
            ("de;q=0.000, it",  1),
        ];

        for (value, count) in cases {
            let locales = parse_accept_language(value.split(',').map(str::trim));
            assert_eq!(locales.len(), count, "{value}");
        }

        let locales = parse_accept_language(["zh-Hant-TW"]);
        assert_eq!(locales[0].language(), "zh");
        assert_eq!(locales[0].country(), "TW");
    }
}
