//! Response channels the handlers write into.
//!
//! `Responder` is the per-request entry point: a handler either sends one
//! complete response or switches to chunked mode and receives a
//! `ChunkedTransport`. The HTTP implementations live in `crate::http`; the
//! in-memory ones here back the snapshot CLI path and the tests.

use crate::encode::ChunkSink;
use crate::error::TransportError;

// ----------------------------------------------------------------------------
// ResponseHead
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

// ----------------------------------------------------------------------------
// Traits
// ----------------------------------------------------------------------------

/// A response body delivered as a sequence of independently flushed chunks.
pub trait ChunkedTransport {
    /// Deliver one chunk. An empty chunk is a no-op; use `send_final` to end
    /// the body.
    fn send_chunk(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Terminate the body with the zero-length chunk.
    fn send_final(&mut self) -> Result<(), TransportError>;
}

impl<T: ChunkedTransport + ?Sized> ChunkedTransport for &mut T {
    fn send_chunk(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send_chunk(bytes)
    }

    fn send_final(&mut self) -> Result<(), TransportError> {
        (**self).send_final()
    }
}

/// One request's response channel.
pub trait Responder {
    type Body: ChunkedTransport;

    /// Send a complete response with a fixed `Content-Length`.
    fn respond(self, head: ResponseHead, body: &[u8]) -> Result<(), TransportError>;

    /// Send the head and continue with a chunked body.
    fn respond_chunked(self, head: ResponseHead) -> Result<Self::Body, TransportError>;
}

/// Feeds push-style encoder output straight into a transport.
pub struct TransportSink<'t, T: ChunkedTransport + ?Sized> {
    transport: &'t mut T,
    sent: usize,
    error: Option<TransportError>,
}

impl<'t, T: ChunkedTransport + ?Sized> TransportSink<'t, T> {
    pub fn new(transport: &'t mut T) -> Self {
        Self {
            transport,
            sent: 0,
            error: None,
        }
    }

    pub fn bytes_sent(&self) -> usize {
        self.sent
    }

    /// The transport failure that stopped the sink, if any.
    pub fn into_error(self) -> Option<TransportError> {
        self.error
    }
}

impl<T: ChunkedTransport + ?Sized> ChunkSink for TransportSink<'_, T> {
    fn write_chunk(&mut self, _offset: usize, data: &[u8]) -> usize {
        if self.error.is_some() {
            return 0;
        }
        match self.transport.send_chunk(data) {
            Ok(()) => {
                self.sent += data.len();
                data.len()
            }
            Err(err) => {
                self.error = Some(err);
                0
            }
        }
    }
}

// ----------------------------------------------------------------------------
// In-memory implementations
// ----------------------------------------------------------------------------

/// Records chunks in memory. Can be told to fail at a given chunk index.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    chunks: Vec<Vec<u8>>,
    attempts: usize,
    fail_at: Option<usize>,
    failed: bool,
    finished: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the send attempt with zero-based index `attempt` and every send after it.
    pub fn failing_at(attempt: usize) -> Self {
        Self {
            fail_at: Some(attempt),
            ..Self::default()
        }
    }

    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    /// All delivered chunks concatenated.
    pub fn body(&self) -> Vec<u8> {
        self.chunks.concat()
    }

    /// Number of `send_chunk` calls made, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl ChunkedTransport for MemoryTransport {
    fn send_chunk(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let attempt = self.attempts;
        self.attempts += 1;
        if self.failed || self.finished {
            return Err(TransportError::Closed);
        }
        if self.fail_at == Some(attempt) {
            self.failed = true;
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "client went away",
            )));
        }
        self.chunks.push(bytes.to_vec());
        Ok(())
    }

    fn send_final(&mut self) -> Result<(), TransportError> {
        if self.failed || self.finished {
            return Err(TransportError::Closed);
        }
        self.finished = true;
        Ok(())
    }
}

/// Captured response for in-process use.
#[derive(Debug, Default)]
pub struct MemoryResponse {
    pub head: Option<ResponseHead>,
    pub body: Vec<u8>,
    pub chunked: bool,
    pub transport: MemoryTransport,
    /// Make `respond` fail as if the client had disconnected.
    pub refuse_body: bool,
}

impl MemoryResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(transport: MemoryTransport) -> Self {
        Self {
            transport,
            ..Self::default()
        }
    }

    pub fn responder(&mut self) -> MemoryResponder<'_> {
        MemoryResponder { response: self }
    }

    pub fn status(&self) -> Option<u16> {
        self.head.as_ref().map(|head| head.status)
    }

    /// Body bytes regardless of whether the response was chunked.
    pub fn full_body(&self) -> Vec<u8> {
        if self.chunked {
            self.transport.body()
        } else {
            self.body.clone()
        }
    }
}

pub struct MemoryResponder<'a> {
    response: &'a mut MemoryResponse,
}

impl<'a> Responder for MemoryResponder<'a> {
    type Body = &'a mut MemoryTransport;

    fn respond(self, head: ResponseHead, body: &[u8]) -> Result<(), TransportError> {
        let response = self.response;
        response.head = Some(head);
        if response.refuse_body {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )));
        }
        response.body = body.to_vec();
        Ok(())
    }

    fn respond_chunked(self, head: ResponseHead) -> Result<Self::Body, TransportError> {
        let response = self.response;
        response.head = Some(head);
        response.chunked = true;
        Ok(&mut response.transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_transport_fails_from_index_on() {
        let mut transport = MemoryTransport::failing_at(1);
        assert!(transport.send_chunk(b"a").is_ok());
        assert!(transport.send_chunk(b"b").is_err());
        assert!(matches!(
            transport.send_chunk(b"c"),
            Err(TransportError::Closed)
        ));
        assert_eq!(transport.chunks(), &[b"a".to_vec()]);
        assert_eq!(transport.attempts(), 3);
        assert!(transport.send_final().is_err());
    }

    #[test]
    fn empty_chunk_is_noop() {
        let mut transport = MemoryTransport::new();
        transport.send_chunk(&[]).unwrap();
        assert_eq!(transport.attempts(), 0);
        transport.send_final().unwrap();
        assert!(transport.is_finished());
    }

    #[test]
    fn sink_stops_after_transport_error() {
        let mut transport = MemoryTransport::failing_at(1);
        let mut sink = TransportSink::new(&mut transport);
        assert_eq!(sink.write_chunk(0, b"abc"), 3);
        assert_eq!(sink.write_chunk(3, b"def"), 0);
        assert_eq!(sink.write_chunk(3, b"ghi"), 0);
        assert_eq!(sink.bytes_sent(), 3);
        assert!(sink.into_error().is_some());
        assert_eq!(transport.attempts(), 2);
    }

    #[test]
    fn response_head_lookup_ignores_case() {
        let head = ResponseHead::ok().header("Content-Type", "image/jpeg");
        assert_eq!(head.get("content-type"), Some("image/jpeg"));
        assert_eq!(head.get("x-missing"), None);
    }
}
