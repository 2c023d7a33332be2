//! Request body stream and the state deciding who may consume it.

use crate::errors::{Error, IoError};
use std::{io, sync::Arc};
use tokio::io::{AsyncRead, AsyncReadExt};

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Who consumed the request body.
///
/// ```text
/// Unread --body_reader()--> Streamed --complete()--> Complete
///    \--parameters()/parts()--> Decoded --complete()--/
/// ```
/// A request whose content needs no decoder stays `Unread` after
/// parameter access, so its body remains readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    Unread,
    Streamed,
    Decoded,
    Complete,
}

pub(crate) struct Body {
    reader: BoxedReader,
    declared: Option<u64>,
    state: BodyState,
}

impl Body {
    /// Wraps `reader`, never yielding more than `declared` bytes.
    pub(crate) fn new<R: AsyncRead + Send + Unpin + 'static>(reader: R, declared: Option<u64>) -> Self {
        let reader: BoxedReader = match declared {
            Some(len) => Box::new(reader.take(len)),
            None => Box::new(reader),
        };

        Self {
            reader,
            declared,
            state: BodyState::Unread,
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(tokio::io::empty(), None)
    }

    #[inline]
    pub(crate) fn state(&self) -> BodyState {
        self.state
    }

    /// Declared `Content-Length`.
    #[inline]
    pub(crate) fn declared(&self) -> Option<u64> {
        self.declared
    }

    /// Hands the stream to the handler. After a decode the stream is
    /// already empty.
    pub(crate) fn stream(&mut self) -> &mut BoxedReader {
        if self.state == BodyState::Unread {
            self.state = BodyState::Streamed;
        }
        &mut self.reader
    }

    /// Takes the stream for a decoder, leaving an empty one behind.
    ///
    /// `None` when the handler streamed the body or it was decoded already.
    pub(crate) fn take_for_decode(&mut self) -> Option<BoxedReader> {
        match self.state {
            BodyState::Unread => {
                self.state = BodyState::Decoded;
                Some(std::mem::replace(&mut self.reader, Box::new(tokio::io::empty())))
            }
            _ => None,
        }
    }

    pub(crate) fn finish(&mut self) {
        self.state = BodyState::Complete;
        self.reader = Box::new(tokio::io::empty());
    }
}

/// Fails with [Error::Aborted] when fewer bytes arrived than declared.
pub(crate) fn check_length(read: u64, declared: Option<u64>) -> Result<(), Error> {
    match declared {
        Some(declared) if read < declared => Err(Error::Aborted(IoError(Arc::new(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("early EOF: {read} of {declared} bytes"),
        ))))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn declared_length_bounds_reads() {
        let mut body = Body::new(&b"abcdefgh"[..], Some(3));
        let mut out = Vec::new();
        body.stream().read_to_end(&mut out).await.unwrap();

        assert_eq!(out, b"abc");
        assert_eq!(body.state(), BodyState::Streamed);
        assert!(body.take_for_decode().is_none());
    }

    #[tokio::test]
    async fn decode_leaves_empty_stream() {
        let mut body = Body::new(&b"a=1"[..], Some(3));

        let mut reader = body.take_for_decode().unwrap();
        assert_eq!(body.state(), BodyState::Decoded);
        assert!(body.take_for_decode().is_none());

        let mut out = Vec::new();
        body.stream().read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(body.state(), BodyState::Decoded);

        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"a=1");

        body.finish();
        assert_eq!(body.state(), BodyState::Complete);
    }

    #[test]
    fn early_eof() {
        assert!(check_length(3, None).is_ok());
        assert!(check_length(3, Some(3)).is_ok());

        let err = check_length(2, Some(3)).unwrap_err();
        assert_eq!(err.code(), "REQUEST_ABORTED");
        assert!(err.to_string().contains("early EOF"));
    }
}
