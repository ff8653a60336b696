//! `multipart/x-mixed-replace` framing for the live feed.
//!
//! Each frame goes out as
//!
//! ```text
//! \r\n--<boundary>\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <len>\r\n
//! X-Timestamp: <sec>.<usec>\r\n
//! \r\n
//! <jpeg bytes>
//! ```
//!
//! with no terminator other than the next boundary. `MultipartReader` parses
//! the same format back, for relaying upstream cameras and for tests.

use std::io::{self, Read, Write};

use crate::frame::CaptureTimestamp;

/// Boundary token. Long run of digits that does not occur in JPEG entropy data
/// framed by the preceding CRLF.
pub const PART_BOUNDARY: &str = "123456789000000000000987654321";

pub const STREAM_CONTENT_TYPE: &str =
    "multipart/x-mixed-replace; boundary=123456789000000000000987654321";

/// Bytes sent ahead of every part.
pub const STREAM_BOUNDARY: &[u8] = b"\r\n--123456789000000000000987654321\r\n";

pub const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Largest part `MultipartReader` will buffer.
pub const MAX_PART_BYTES: usize = 5 * 1024 * 1024;

const MAX_HEADER_BYTES: usize = 4096;
const READ_CHUNK: usize = 8192;

// ----------------------------------------------------------------------------
// PartHeader
// ----------------------------------------------------------------------------

/// Per-part header block, rebuilt for every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartHeader {
    pub content_length: usize,
    pub timestamp: CaptureTimestamp,
}

impl PartHeader {
    pub fn new(content_length: usize, timestamp: CaptureTimestamp) -> Self {
        Self {
            content_length,
            timestamp,
        }
    }

    /// Append the header block, including the blank line, to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> io::Result<()> {
        write!(
            out,
            "Content-Type: {}\r\nContent-Length: {}\r\nX-Timestamp: {}\r\n\r\n",
            PART_CONTENT_TYPE, self.content_length, self.timestamp
        )
    }
}

// ----------------------------------------------------------------------------
// MultipartReader
// ----------------------------------------------------------------------------

/// One parsed part.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Part {
    /// Header names are lower-cased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Part {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")?.parse().ok()
    }

    pub fn timestamp(&self) -> Option<CaptureTimestamp> {
        parse_timestamp(self.header("x-timestamp")?)
    }
}

/// Incremental parser over a multipart byte stream.
pub struct MultipartReader<R> {
    reader: R,
    delimiter: Vec<u8>,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: Read> MultipartReader<R> {
    pub fn new(reader: R, boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            reader,
            delimiter,
            buf: Vec::with_capacity(64 * 1024),
            eof: false,
        }
    }

    /// Read the next part. `Ok(None)` at a clean end of stream.
    pub fn next_part(&mut self) -> io::Result<Option<Part>> {
        // boundary line
        let start = loop {
            if let Some(pos) = find(&self.buf, &self.delimiter) {
                break pos;
            }
            if self.buf.len() > MAX_PART_BYTES {
                return Err(invalid("no boundary within part size limit"));
            }
            if self.fill()? == 0 {
                return Ok(None);
            }
        };
        let after = start + self.delimiter.len();
        while self.buf.len() < after + 2 {
            if self.fill()? == 0 {
                return Ok(None);
            }
        }
        if &self.buf[after..after + 2] == b"--" {
            self.buf.clear();
            return Ok(None);
        }
        let line_end = loop {
            if let Some(pos) = find(&self.buf[after..], b"\r\n") {
                break after + pos + 2;
            }
            if self.fill()? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        };
        self.buf.drain(..line_end);

        // header block
        let header_end = loop {
            if self.buf.starts_with(b"\r\n") {
                break 0;
            }
            if let Some(pos) = find(&self.buf, b"\r\n\r\n") {
                break pos + 2;
            }
            if self.buf.len() > MAX_HEADER_BYTES {
                return Err(invalid("part header too large"));
            }
            if self.fill()? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        };
        let headers = parse_headers(&self.buf[..header_end]);
        self.buf.drain(..header_end + 2);

        let mut part = Part {
            headers,
            body: Vec::new(),
        };

        // body
        match part.content_length() {
            Some(len) if len > MAX_PART_BYTES => {
                return Err(invalid("part exceeds size limit"));
            }
            Some(len) => {
                while self.buf.len() < len {
                    if self.fill()? == 0 {
                        return Err(io::ErrorKind::UnexpectedEof.into());
                    }
                }
                part.body = self.buf.drain(..len).collect();
            }
            None => {
                // bytes before `scanned` cannot start a delimiter
                let mut scanned = 0;
                let body_end = loop {
                    if let Some(pos) = find(&self.buf[scanned..], &self.delimiter) {
                        break scanned + pos;
                    }
                    scanned = self.buf.len().saturating_sub(self.delimiter.len());
                    if self.buf.len() > MAX_PART_BYTES {
                        return Err(invalid("part exceeds size limit"));
                    }
                    if self.fill()? == 0 {
                        break self.buf.len();
                    }
                };
                let mut body: Vec<u8> = self.buf.drain(..body_end).collect();
                if body.ends_with(b"\r\n") {
                    body.truncate(body.len() - 2);
                }
                part.body = body;
            }
        }
        Ok(Some(part))
    }

    fn fill(&mut self) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let mut chunk = [0u8; READ_CHUNK];
        let read = loop {
            match self.reader.read(&mut chunk) {
                Ok(n) => break n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        };
        if read == 0 {
            self.eof = true;
        }
        self.buf.extend_from_slice(&chunk[..read]);
        Ok(read)
    }
}

impl<R: Read> Iterator for MultipartReader<R> {
    type Item = io::Result<Part>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_part().transpose()
    }
}

/// Extract the `boundary` parameter from a multipart content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

/// Parse an `X-Timestamp` value of the form `<sec>.<usec>`.
pub fn parse_timestamp(value: &str) -> Option<CaptureTimestamp> {
    let value = value.trim();
    let (secs, frac) = value.split_once('.').unwrap_or((value, "0"));
    let secs: u64 = secs.parse().ok()?;
    if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let scale = 10u32.pow(6 - frac.len() as u32);
    let micros: u32 = frac.parse::<u32>().ok()? * scale;
    Some(CaptureTimestamp::new(secs, micros))
}

fn parse_headers(block: &[u8]) -> Vec<(String, String)> {
    String::from_utf8_lossy(block)
        .split("\r\n")
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_lowercase(), value.trim().to_string()))
        })
        .collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
