//! `application/x-www-form-urlencoded` body decoding.

use crate::{
    errors::Error,
    http::{body::check_length, content_type::Charset, params::Params},
    limits::{FormLimits, MAX_FORM_BYTES_HARD_CAP},
    query::Query,
};
use memchr::memchr;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

const CHUNK: usize = 4096;

/// Streams a form body into [Params].
///
/// Pairs are decoded as soon as their terminating `&` arrives, so the key
/// quota trips on the first key past the limit and the size quota on the
/// first chunk past it. Neither waits for the rest of the body.
pub(crate) struct FormDecoder {
    limits: FormLimits,
    charset: Charset,
}

impl FormDecoder {
    pub(crate) fn new(limits: FormLimits, charset: Charset) -> Self {
        Self { limits, charset }
    }

    pub(crate) async fn decode<R: AsyncRead + Unpin + ?Sized>(
        &self,
        reader: &mut R,
        declared: Option<u64>,
    ) -> Result<Params, Error> {
        // The hard cap bounds every body, configured quota or not
        let limit = self
            .limits
            .max_bytes()
            .map_or(MAX_FORM_BYTES_HARD_CAP, |max| max.min(MAX_FORM_BYTES_HARD_CAP));

        if declared.is_some_and(|declared| declared > limit) {
            return Err(self.too_large(limit));
        }

        let mut params = Params::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0u8; CHUNK];
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;

            if total > limit {
                return Err(self.too_large(limit));
            }

            let mut chunk = &buf[..n];
            while let Some(pos) = memchr(b'&', chunk) {
                pending.extend_from_slice(&chunk[..pos]);
                self.pair(&mut params, &pending)?;
                pending.clear();
                chunk = &chunk[pos + 1..];
            }
            pending.extend_from_slice(chunk);
        }

        self.pair(&mut params, &pending)?;
        check_length(total, declared)?;

        debug!(bytes = total, keys = params.len(), charset = %self.charset, "form body decoded");
        Ok(params)
    }

    #[inline]
    fn pair(&self, params: &mut Params, pair: &[u8]) -> Result<(), Error> {
        Query::parse_pair(params, pair, self.charset, self.limits.max_keys()).map_err(|err| {
            if let Error::QuotaExceeded { .. } = err {
                warn!(error = %err, "form key quota exceeded");
            }
            err
        })
    }

    fn too_large(&self, limit: u64) -> Error {
        let err = Error::QuotaExceeded {
            what: "form content size",
            limit: limit as i64,
        };
        warn!(error = %err, "form size quota exceeded");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Trickle;

    async fn decode(body: &[u8], declared: Option<u64>, limits: FormLimits) -> Result<Params, Error> {
        FormDecoder::new(limits, Charset::Utf8)
            .decode(&mut Trickle::new(body, 7), declared)
            .await
    }

    #[tokio::test]
    async fn pairs_across_chunks() {
        let body = b"name1=test%20value&name2=caf%C3%A9&name1=second&flag";
        let params = decode(body, Some(body.len() as u64), FormLimits::default())
            .await
            .unwrap();

        assert_eq!(params.get_all("name1"), ["test value", "second"]);
        assert_eq!(params.get("name2"), Some("caf\u{e9}"));
        assert_eq!(params.get("flag"), Some(""));
    }

    #[tokio::test]
    async fn quotas() {
        let many: Vec<u8> = (0..2000)
            .map(|i| format!("key{i}=v"))
            .collect::<Vec<_>>()
            .join("&")
            .into_bytes();

        #[rustfmt::skip]
        let cases: [(&[u8], Option<u64>, FormLimits, Option<&str>); 5] = [
            (&many[..],         None,        FormLimits { max_form_content_size: -1, ..Default::default() }, Some("form keys")),
            (&many[..],         None,        FormLimits { max_form_keys: -1, max_form_content_size: -1 },     None),
            (&b"a=1&b=2"[..],  Some(7),     FormLimits { max_form_content_size: 6, ..Default::default() },   Some("form content size")),
            (&b"a=1&b=2"[..],  None,        FormLimits { max_form_content_size: 6, ..Default::default() },   Some("form content size")),
            (&b"a=1&b=2"[..],  Some(7),     FormLimits { max_form_keys: 2, ..Default::default() },           None),
        ];

        for (body, declared, limits, expected) in cases {
            let result = decode(body, declared, limits).await;
            match expected {
                Some(what) => assert!(
                    matches!(result, Err(Error::QuotaExceeded { what: w, .. }) if w == what),
                    "{limits:?}"
                ),
                None => assert!(result.is_ok(), "{limits:?}"),
            }
        }
    }

    #[tokio::test]
    async fn hard_cap_bounds_declared_length() {
        let over = Some(MAX_FORM_BYTES_HARD_CAP + 1);

        #[rustfmt::skip]
        let cases = [
            (over,                          FormLimits { max_form_content_size: -1, ..Default::default() }),
            (over,                          FormLimits { max_form_content_size: i64::MAX, ..Default::default() }),
            (Some(MAX_FORM_BYTES_HARD_CAP), FormLimits { max_form_content_size: 1024, ..Default::default() }),
        ];

        for (declared, limits) in cases {
            let expected = limits
                .max_bytes()
                .map_or(MAX_FORM_BYTES_HARD_CAP, |max| max.min(MAX_FORM_BYTES_HARD_CAP));
            // Rejected before the body is read
            let result = decode(b"a=1", declared, limits).await;
            assert!(
                matches!(
                    result,
                    Err(Error::QuotaExceeded { what: "form content size", limit }) if limit as u64 == expected
                ),
                "{limits:?}"
            );
        }

        // Within the cap the declared length is checked after reading
        let limits = FormLimits {
            max_form_content_size: -1,
            ..Default::default()
        };
        let err = decode(b"a=1", Some(MAX_FORM_BYTES_HARD_CAP), limits)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "REQUEST_ABORTED");
    }

    #[tokio::test]
    async fn malformed_and_short_bodies() {
        let err = decode(b"param=aaa%ZZbbb", None, FormLimits::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MALFORMED_ENCODING");

        // The stream ends 10 bytes early
        let err = decode(b"a=1", Some(13), FormLimits::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "REQUEST_ABORTED");
    }
}
