//! HTTP/1.1 response writing over any `Write`.

use std::io::{self, BufWriter, Write};

use crate::error::TransportError;
use crate::transport::{reason_phrase, ChunkedTransport, Responder, ResponseHead};

const CHUNK_BUFFER_BYTES: usize = 1024;

enum Framing {
    Length(usize),
    Chunked,
}

fn write_head<W: Write>(writer: &mut W, head: &ResponseHead, framing: Framing) -> io::Result<()> {
    write!(
        writer,
        "HTTP/1.1 {} {}\r\n",
        head.status,
        reason_phrase(head.status)
    )?;
    for (name, value) in &head.headers {
        write!(writer, "{}: {}\r\n", name, value)?;
    }
    match framing {
        Framing::Length(len) => write!(writer, "Content-Length: {}\r\n", len)?,
        Framing::Chunked => writer.write_all(b"Transfer-Encoding: chunked\r\n")?,
    }
    writer.write_all(b"Cache-Control: no-store\r\nConnection: close\r\n\r\n")
}

/// Responder over a connected socket (or any writer).
pub struct HttpResponder<W: Write> {
    writer: W,
}

impl<W: Write> HttpResponder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Responder for HttpResponder<W> {
    type Body = ChunkedBody<W>;

    fn respond(mut self, head: ResponseHead, body: &[u8]) -> Result<(), TransportError> {
        let mut buffered = Vec::with_capacity(256);
        write_head(&mut buffered, &head, Framing::Length(body.len()))?;
        self.writer.write_all(&buffered)?;
        self.writer.write_all(body)?;
        self.writer.flush()?;
        Ok(())
    }

    fn respond_chunked(mut self, head: ResponseHead) -> Result<ChunkedBody<W>, TransportError> {
        let mut buffered = Vec::with_capacity(256);
        write_head(&mut buffered, &head, Framing::Chunked)?;
        self.writer.write_all(&buffered)?;
        self.writer.flush()?;
        Ok(ChunkedBody {
            writer: BufWriter::with_capacity(CHUNK_BUFFER_BYTES, self.writer),
            finished: false,
        })
    }
}

/// `Transfer-Encoding: chunked` body. Every chunk is flushed on its own.
pub struct ChunkedBody<W: Write> {
    writer: BufWriter<W>,
    finished: bool,
}

impl<W: Write> ChunkedBody<W> {
    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<W: Write> ChunkedTransport for ChunkedBody<W> {
    fn send_chunk(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.finished {
            return Err(TransportError::Closed);
        }
        if bytes.is_empty() {
            return Ok(());
        }
        write!(self.writer, "{:X}\r\n", bytes.len())?;
        self.writer.write_all(bytes)?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn send_final(&mut self) -> Result<(), TransportError> {
        if self.finished {
            return Err(TransportError::Closed);
        }
        self.finished = true;
        self.writer.write_all(b"0\r\n\r\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
