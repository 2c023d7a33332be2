//! `multipart/form-data` decoding.
//!
//! The body is scanned as a small state machine:
//!
//! ```text
//! PREAMBLE --delimiter--> HEADERS --blank line--> CONTENT --delimiter--> HEADERS ...
//!                                                         \--close delimiter--> DONE
//! ```
//!
//! Content is streamed into an in-memory buffer and moved to a temp file as
//! soon as it would exceed [MultipartConfig::file_size_threshold]. Every temp
//! file is registered with the request before it is written to.

use crate::{
    errors::Error,
    http::{
        body::check_length,
        cleanup::TempResources,
        content_type::{split_params, Charset, ContentType},
    },
    limits::{MultipartConfig, RequestConfig},
    HeaderMap,
};
use memchr::{memchr2, memmem::Finder};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

const CHUNK: usize = 8192;

/// How strictly multipart framing is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MultipartCompliance {
    /// [RFC 7578](https://tools.ietf.org/html/rfc7578): CRLF line endings
    /// only, the first delimiter must start its line. Deviations are fatal.
    #[default]
    Rfc7578,
    /// Tolerates bare CR or LF line endings and whitespace before the first
    /// delimiter, recording each as a [Violation].
    Legacy,
}

/// A framing deviation tolerated by [MultipartCompliance::Legacy].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Violation {
    CrLineTermination,
    LfLineTermination,
    NoCrlfAfterPreamble,
}

impl Violation {
    /// Stable code, as stored in the request's violation list.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Violation::CrLineTermination => "CR_LINE_TERMINATION",
            Violation::LfLineTermination => "LF_LINE_TERMINATION",
            Violation::NoCrlfAfterPreamble => "NO_CRLF_AFTER_PREAMBLE",
        }
    }

    const fn description(&self) -> &'static str {
        match self {
            Violation::CrLineTermination => "bare CR line termination",
            Violation::LfLineTermination => "bare LF line termination",
            Violation::NoCrlfAfterPreamble => "boundary does not start its line",
        }
    }
}

// PART

/// One section of a multipart body.
#[derive(Debug, Clone)]
pub struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<ContentType>,
    headers: HeaderMap,
    size: u64,
    body: PartBody,
    charset: Charset,
}

#[derive(Debug, Clone)]
enum PartBody {
    Memory(Vec<u8>),
    File(PathBuf),
}

impl Part {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `filename` of the `Content-Disposition`, as sent.
    #[inline]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// A part with a filename is a file upload, anything else a field.
    #[inline]
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_ref().map(ContentType::raw)
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Content size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Location of the content when it was spilled to a temp file.
    ///
    /// The file is deleted when the request completes.
    #[inline]
    pub fn path(&self) -> Option<&Path> {
        match &self.body {
            PartBody::File(path) => Some(path.as_path()),
            PartBody::Memory(_) => None,
        }
    }

    /// Raw content, read back from disk for spilled parts.
    pub async fn bytes(&self) -> Result<Vec<u8>, Error> {
        match &self.body {
            PartBody::Memory(bytes) => Ok(bytes.clone()),
            PartBody::File(path) => Ok(tokio::fs::read(path).await?),
        }
    }

    /// Content decoded with the part's own charset, else the charset of the
    /// request at decode time.
    pub async fn text(&self) -> Result<String, Error> {
        let charset = match self.content_type.as_ref().and_then(ContentType::charset) {
            Some(name) => Charset::for_name(name)?,
            None => self.charset,
        };

        match &self.body {
            PartBody::Memory(bytes) => charset.decode(bytes),
            PartBody::File(path) => charset.decode(&tokio::fs::read(path).await?),
        }
    }
}

// DECODER

/// Extracts the `boundary` parameter of a `multipart/form-data` type.
pub(crate) fn boundary(content_type: &ContentType) -> Result<&str, Error> {
    match content_type.param("boundary") {
        Some(boundary) if !boundary.is_empty() => Ok(boundary),
        _ => Err(Error::malformed("multipart/form-data without boundary")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eol {
    CrLf,
    Cr,
    Lf,
    Eof,
}

enum Boundary {
    Next,
    Close,
    Incomplete,
}

pub(crate) struct MultipartDecoder<'c> {
    delimiter: Vec<u8>,
    finder: Finder<'static>,
    config: &'c MultipartConfig,
    compliance: MultipartCompliance,
    max_parts: Option<usize>,
    max_headers: usize,
    charset: Charset,
    violations: Vec<Violation>,
}

impl<'c> MultipartDecoder<'c> {
    pub(crate) fn new(
        boundary: &str,
        config: &'c MultipartConfig,
        settings: &RequestConfig,
        charset: Charset,
    ) -> Self {
        let delimiter = [&b"--"[..], boundary.as_bytes()].concat();
        let finder = Finder::new(&delimiter).into_owned();

        Self {
            delimiter,
            finder,
            config,
            compliance: settings.multipart_compliance,
            max_parts: settings.form.max_keys(),
            max_headers: settings.max_part_headers_size,
            charset,
            violations: Vec::new(),
        }
    }

    /// Deviations tolerated so far, in the order they were first seen.
    #[inline]
    pub(crate) fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Decodes every part of the body.
    ///
    /// Temp files created before a failure stay registered in `temp`.
    pub(crate) async fn decode<R: AsyncRead + Unpin + ?Sized>(
        &mut self,
        reader: &mut R,
        declared: Option<u64>,
        temp: &mut TempResources,
    ) -> Result<Vec<Part>, Error> {
        let mut input = Input {
            reader,
            buf: Vec::with_capacity(CHUNK),
            pos: 0,
            eof: false,
            total: 0,
            declared,
            max_total: self.config.max_total(),
        };
        let mut parts = Vec::new();

        if !self.preamble(&mut input).await? {
            return Ok(parts);
        }

        loop {
            if let Some(max) = self.max_parts {
                if parts.len() >= max {
                    return Err(Error::QuotaExceeded {
                        what: "multipart parts",
                        limit: max as i64,
                    });
                }
            }

            let headers = self.headers(&mut input).await?;
            let (name, filename) = disposition(&headers)?;
            let content_type = headers.get("content-type").map(ContentType::parse);

            let mut sink = Sink {
                memory: Vec::new(),
                file: None,
                size: 0,
                threshold: self.config.file_size_threshold,
                max: self.config.max_part(),
                dir: &self.config.temp_dir,
            };
            let last = self.content(&mut input, &mut sink, temp).await?;
            let (body, size) = sink.finish().await?;

            trace!(name = %name, ?filename, size, spilled = matches!(body, PartBody::File(_)), "multipart part decoded");
            parts.push(Part {
                name,
                filename,
                content_type,
                headers,
                size,
                body,
                charset: self.charset,
            });

            if last {
                break;
            }
        }

        debug!(parts = parts.len(), bytes = input.total, "multipart body decoded");
        Ok(parts)
    }

    /// Skips to the first delimiter. `false` when the body holds no part.
    async fn preamble<R: AsyncRead + Unpin + ?Sized>(
        &mut self,
        input: &mut Input<'_, R>,
    ) -> Result<bool, Error> {
        loop {
            // Too long to be a delimiter line: preamble text
            let Some((line, eol)) = input.read_line(self.max_headers).await? else {
                if input.skip_line().await? == Eol::Eof {
                    return Err(input.unexpected_eof("missing initial boundary"));
                }
                continue;
            };

            if eol == Eol::Eof && line.is_empty() && input.total == 0 {
                check_length(0, input.declared)?;
                return Ok(false);
            }

            let line = trim_end(&line);
            if line == self.delimiter {
                self.line_end(eol)?;
                return Ok(true);
            }

            let trimmed = trim_start(line);
            if trimmed == self.delimiter {
                self.tolerate(Violation::NoCrlfAfterPreamble)?;
                self.line_end(eol)?;
                return Ok(true);
            }
            if trimmed.len() == self.delimiter.len() + 2
                && trimmed.starts_with(&self.delimiter)
                && trimmed.ends_with(b"--")
            {
                return Ok(false);
            }

            if eol == Eol::Eof {
                return Err(input.unexpected_eof("missing initial boundary"));
            }
        }
    }

    async fn headers<R: AsyncRead + Unpin + ?Sized>(
        &mut self,
        input: &mut Input<'_, R>,
    ) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        let mut used = 0;

        loop {
            let (line, eol) = input
                .read_line(self.max_headers - used)
                .await?
                .ok_or_else(|| self.headers_too_large())?;

            if eol == Eol::Eof {
                return Err(input.unexpected_eof("unterminated part headers"));
            }
            self.line_end(eol)?;

            used += line.len();
            if used >= self.max_headers {
                return Err(self.headers_too_large());
            }
            if line.is_empty() {
                return Ok(headers);
            }

            let line = match simdutf8::basic::from_utf8(&line) {
                Ok(line) => line.to_string(),
                Err(_) => Charset::Iso8859_1.decode(&line)?,
            };
            match line.split_once(':') {
                Some((name, value)) => headers.append(name.trim(), value.trim()),
                None if self.compliance == MultipartCompliance::Legacy => {
                    trace!(line = %line, "ignoring malformed part header")
                }
                None => return Err(Error::violation(format!("malformed part header: {line}"))),
            }
        }
    }

    /// Streams content into `sink` up to the next delimiter. Returns `true`
    /// after the close delimiter.
    async fn content<R: AsyncRead + Unpin + ?Sized>(
        &mut self,
        input: &mut Input<'_, R>,
        sink: &mut Sink<'_>,
        temp: &mut TempResources,
    ) -> Result<bool, Error> {
        let delim_len = self.delimiter.len();
        // Longest tail that may hold a split "\r\n--boundary"
        let keep = delim_len + 2;

        loop {
            let data = input.data();
            let mut search = 0;
            let mut found = None;

            while let Some(hit) = self.finder.find(&data[search..]).map(|i| search + i) {
                search = hit + 1;

                let legacy = self.compliance == MultipartCompliance::Legacy;
                let (end, eol) = match hit {
                    h if h >= 2 && &data[h - 2..h] == b"\r\n" => (h - 2, Eol::CrLf),
                    h if legacy && h >= 1 && data[h - 1] == b'\n' => (h - 1, Eol::Lf),
                    h if legacy && h >= 1 && data[h - 1] == b'\r' => (h - 1, Eol::Cr),
                    // Not after CRLF (or a bare CR/LF in legacy mode): content
                    _ => continue,
                };

                let after = &data[hit + delim_len..];
                let kind = match (after.first(), after.get(1)) {
                    (Some(b'-'), Some(b'-')) => Boundary::Close,
                    (Some(b' ' | b'\t' | b'\r' | b'\n'), _) => Boundary::Next,
                    (None, _) | (Some(b'-'), None) if !input.eof => Boundary::Incomplete,
                    (None, _) | (Some(b'-'), None) => {
                        return Err(input.unexpected_eof("unterminated multipart body"))
                    }
                    // `--boundaryX` is content
                    _ => continue,
                };

                found = Some((end, hit + delim_len, eol, kind));
                break;
            }

            match found {
                Some((end, _, _, Boundary::Incomplete)) => {
                    sink.write(&data[..end], temp).await?;
                    input.consume(end);
                    input.fill().await?;
                }
                Some((end, delim_end, eol, kind)) => {
                    sink.write(&data[..end], temp).await?;
                    input.consume(delim_end);
                    self.line_end(eol)?;

                    if let Boundary::Close = kind {
                        return Ok(true);
                    }

                    // Transport padding up to the end of the delimiter line
                    let (_, eol) = input
                        .read_line(self.max_headers)
                        .await?
                        .ok_or_else(|| self.headers_too_large())?;
                    if eol == Eol::Eof {
                        return Err(input.unexpected_eof("unterminated multipart body"));
                    }
                    self.line_end(eol)?;
                    return Ok(false);
                }
                None if input.eof => {
                    return Err(input.unexpected_eof("unterminated multipart body"));
                }
                None => {
                    let safe = data.len().saturating_sub(keep);
                    sink.write(&data[..safe], temp).await?;
                    input.consume(safe);
                    input.fill().await?;
                }
            }
        }
    }

    fn line_end(&mut self, eol: Eol) -> Result<(), Error> {
        match eol {
            Eol::CrLf | Eol::Eof => Ok(()),
            Eol::Cr => self.tolerate(Violation::CrLineTermination),
            Eol::Lf => self.tolerate(Violation::LfLineTermination),
        }
    }

    fn tolerate(&mut self, violation: Violation) -> Result<(), Error> {
        match self.compliance {
            MultipartCompliance::Rfc7578 => Err(Error::violation(violation.description())),
            MultipartCompliance::Legacy => {
                if !self.violations.contains(&violation) {
                    debug!(violation = violation.as_str(), "tolerating multipart violation");
                    self.violations.push(violation);
                }
                Ok(())
            }
        }
    }

    fn headers_too_large(&self) -> Error {
        Error::QuotaExceeded {
            what: "multipart headers",
            limit: self.max_headers as i64,
        }
    }
}

fn disposition(headers: &HeaderMap) -> Result<(String, Option<String>), Error> {
    let value = headers
        .get("content-disposition")
        .ok_or(Error::MissingPartName)?;
    let (_, params) = split_params(value);

    let param = |key: &str| {
        params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
    };

    let name = param("name").ok_or(Error::MissingPartName)?;
    Ok((name, param("filename")))
}

#[inline]
fn trim_end(mut bytes: &[u8]) -> &[u8] {
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

#[inline]
fn trim_start(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    bytes
}

// INPUT

/// Line terminator starting at `data[i]`, with its length. `None` for a CR
/// whose next byte has not arrived yet.
#[inline]
fn terminator(data: &[u8], i: usize, eof: bool) -> Option<(Eol, usize)> {
    match (data[i], data.get(i + 1)) {
        (b'\n', _) => Some((Eol::Lf, 1)),
        (_, Some(b'\n')) => Some((Eol::CrLf, 2)),
        (_, Some(_)) => Some((Eol::Cr, 1)),
        (_, None) if eof => Some((Eol::Cr, 1)),
        (_, None) => None,
    }
}

/// Buffered view of the body stream.
struct Input<'r, R: ?Sized> {
    reader: &'r mut R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    total: u64,
    declared: Option<u64>,
    max_total: Option<u64>,
}

impl<R: AsyncRead + Unpin + ?Sized> Input<'_, R> {
    #[inline]
    fn data(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    #[inline]
    fn consume(&mut self, n: usize) {
        self.pos += n;
    }

    /// Appends the next chunk of the stream. `false` at end of stream.
    async fn fill(&mut self) -> Result<bool, Error> {
        if self.eof {
            return Ok(false);
        }

        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }

        let mut chunk = [0u8; CHUNK];
        let n = self.reader.read(&mut chunk).await?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }

        self.total += n as u64;
        if let Some(max) = self.max_total {
            if self.total > max {
                return Err(Error::QuotaExceeded {
                    what: "multipart request size",
                    limit: max as i64,
                });
            }
        }

        self.buf.extend_from_slice(&chunk[..n]);
        Ok(true)
    }

    /// Next line and its terminator. `None` when the line is longer than
    /// `limit`.
    async fn read_line(&mut self, limit: usize) -> Result<Option<(Vec<u8>, Eol)>, Error> {
        let mut from = 0;

        loop {
            let eof = self.eof;
            let data = self.data();

            match memchr2(b'\r', b'\n', &data[from..]).map(|i| from + i) {
                Some(i) if i > limit => return Ok(None),
                Some(i) => {
                    if let Some((eol, len)) = terminator(data, i, eof) {
                        let line = data[..i].to_vec();
                        self.consume(i + len);
                        return Ok(Some((line, eol)));
                    }
                    from = i;
                }
                None if data.len() > limit => return Ok(None),
                None if eof => {
                    let line = data.to_vec();
                    self.consume(line.len());
                    return Ok(Some((line, Eol::Eof)));
                }
                None => from = data.len(),
            }

            self.fill().await?;
        }
    }

    /// Discards the rest of the current line without buffering it.
    async fn skip_line(&mut self) -> Result<Eol, Error> {
        loop {
            let eof = self.eof;
            let data = self.data();
            let len = data.len();

            match memchr2(b'\r', b'\n', data) {
                Some(i) => match terminator(data, i, eof) {
                    Some((eol, n)) => {
                        self.consume(i + n);
                        return Ok(eol);
                    }
                    // A CR at the end of the buffer: wait for the next byte
                    None => self.consume(i),
                },
                None if eof => {
                    self.consume(len);
                    return Ok(Eol::Eof);
                }
                None => self.consume(len),
            }

            self.fill().await?;
        }
    }

    /// End of stream where more was expected.
    fn unexpected_eof(&self, what: &str) -> Error {
        match check_length(self.total, self.declared) {
            Err(err) => err,
            Ok(()) => Error::violation(what),
        }
    }
}

// SINK

/// Content of the part being decoded.
struct Sink<'d> {
    memory: Vec<u8>,
    file: Option<(tokio::fs::File, PathBuf)>,
    size: u64,
    threshold: usize,
    max: Option<u64>,
    dir: &'d Path,
}

impl Sink<'_> {
    async fn write(&mut self, bytes: &[u8], temp: &mut TempResources) -> Result<(), Error> {
        if bytes.is_empty() {
            return Ok(());
        }

        self.size += bytes.len() as u64;
        if let Some(max) = self.max {
            if self.size > max {
                return Err(Error::QuotaExceeded {
                    what: "multipart file size",
                    limit: max as i64,
                });
            }
        }

        if self.file.is_none() && self.threshold > 0 && self.memory.len() + bytes.len() > self.threshold {
            let (file, path) = tempfile::Builder::new()
                .prefix("MultiPart")
                .tempfile_in(self.dir)?
                .into_parts();
            let kept = path.to_path_buf();
            temp.register(path);

            let mut file = tokio::fs::File::from_std(file);
            file.write_all(&self.memory).await?;
            self.memory = Vec::new();
            self.file = Some((file, kept));
        }

        match &mut self.file {
            Some((file, _)) => file.write_all(bytes).await?,
            None => self.memory.extend_from_slice(bytes),
        }
        Ok(())
    }

    async fn finish(self) -> Result<(PartBody, u64), Error> {
        match self.file {
            Some((mut file, path)) => {
                file.flush().await?;
                Ok((PartBody::File(path), self.size))
            }
            None => Ok((PartBody::Memory(self.memory), self.size)),
        }
    }
}
