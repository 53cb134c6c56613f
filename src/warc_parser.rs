use std::{
    fmt::Debug,
    io::{BufRead, Read},
};

use compact_str::CompactString;
use memchr::memmem;
use tracing::instrument;

// WARC/1.0 and WARC/1.1 share the same framing:
//   WARC/1.1\r\n
//   Name: value\r\n ... \r\n
//   \r\n
//   <Content-Length bytes of block>\r\n\r\n
const VERSION_PREFIX: &[u8] = b"WARC/";

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum RecordType {
    WarcInfo,
    Response,
    Resource,
    Request,
    Metadata,
    Revisit,
    Conversion,
    Continuation,
    Other(CompactString),
}

impl RecordType {
    fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "warcinfo" => RecordType::WarcInfo,
            "response" => RecordType::Response,
            "resource" => RecordType::Resource,
            "request" => RecordType::Request,
            "metadata" => RecordType::Metadata,
            "revisit" => RecordType::Revisit,
            "conversion" => RecordType::Conversion,
            "continuation" => RecordType::Continuation,
            other => RecordType::Other(CompactString::from(other)),
        }
    }
}

impl Debug for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordType::WarcInfo => write!(f, "warcinfo"),
            RecordType::Response => write!(f, "response"),
            RecordType::Resource => write!(f, "resource"),
            RecordType::Request => write!(f, "request"),
            RecordType::Metadata => write!(f, "metadata"),
            RecordType::Revisit => write!(f, "revisit"),
            RecordType::Conversion => write!(f, "conversion"),
            RecordType::Continuation => write!(f, "continuation"),
            RecordType::Other(name) => write!(f, "<other: {}>", name),
        }
    }
}

/// A record exactly as framed in the archive, before any HTTP interpretation.
#[derive(Clone)]
pub struct RawRecord {
    /// Byte offset of the version line within the (decompressed) archive stream.
    pub offset: u64,
    /// Position of the record among all well-formed records of the archive.
    pub ordinal: usize,
    pub version: CompactString,
    pub headers: Vec<(CompactString, String)>,
    pub block: Vec<u8>,
}

impl RawRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn record_type(&self) -> Option<RecordType> {
        self.header("WARC-Type").map(RecordType::from_header)
    }

    pub fn target_uri(&self) -> Option<&str> {
        self.header("WARC-Target-URI")
    }

    pub fn record_id(&self) -> Option<&str> {
        self.header("WARC-Record-ID")
    }

    pub fn date(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let raw = self.header("WARC-Date")?;
        chrono::DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .ok()
    }
}

impl Debug for RawRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRecord")
            .field("offset", &self.offset)
            .field("ordinal", &self.ordinal)
            .field("version", &self.version)
            .field("headers", &self.headers)
            // the block can be megabytes, only print its length
            .field("block.len", &self.block.len())
            .finish()
    }
}

fn find_header<'a>(headers: &'a [(CompactString, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRecord {
    #[error("expected a WARC version line")]
    MissingVersion,
    #[error("header line without `:` separator")]
    BadHeaderLine,
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length `{0}`")]
    InvalidContentLength(String),
    #[error("record block truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },
    #[error("record has no HTTP status line")]
    MissingStatusLine,
    #[error("invalid HTTP status line `{0}`")]
    InvalidStatusLine(String),
    #[error("archive stream unreadable: {0}")]
    Unreadable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ParsingError {
    #[error("I/O error while reading the archive")]
    Io(#[from] std::io::Error),
    #[error("malformed record at offset {offset}")]
    Malformed {
        offset: u64,
        #[source]
        reason: MalformedRecord,
    },
}

#[derive(Debug)]
struct MalformedReporter {
    num_records: usize,
}

impl MalformedReporter {
    fn new() -> Self {
        Self { num_records: 0 }
    }

    fn register(&mut self, offset: u64, reason: &MalformedRecord) {
        self.num_records += 1;

        if self.num_records == 1 {
            tracing::warn!(message = "Malformed WARC record detected. The record is skipped and scanning continues. Further malformed records are only reported at debug level.", offset, reason = %reason);
        } else {
            tracing::debug!(message = "skipping malformed WARC record", offset, reason = %reason);
        }
    }
}

enum RecordFailure {
    Malformed(MalformedRecord),
    Io(std::io::Error),
}

impl From<std::io::Error> for RecordFailure {
    fn from(e: std::io::Error) -> Self {
        RecordFailure::Io(e)
    }
}

pub struct WarcParser<R: BufRead> {
    reader: R,
    // number of bytes consumed from `reader` so far
    position: u64,
    ordinal: usize,
    line: Vec<u8>,
    reporter: MalformedReporter,
}

impl<R: BufRead> Debug for WarcParser<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarcParser")
            .field("position", &self.position)
            .field("ordinal", &self.ordinal)
            .field("line.capacity", &self.line.capacity())
            .field("reporter", &self.reporter)
            .finish()
    }
}

impl<R: BufRead> WarcParser<R> {
    pub fn new(reader: R) -> Self {
        Self::with_start_position(reader, 0)
    }

    /// Create a parser for a reader that has already been advanced to `position`,
    /// so that reported offsets stay relative to the start of the archive.
    pub fn with_start_position(reader: R, position: u64) -> Self {
        Self {
            reader,
            position,
            ordinal: 0,
            line: Vec::with_capacity(256),
            reporter: MalformedReporter::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of malformed records skipped so far.
    pub fn malformed_records(&self) -> usize {
        self.reporter.num_records
    }

    fn read_line(&mut self) -> std::io::Result<usize> {
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line)?;
        self.position += n as u64;
        Ok(n)
    }

    fn fail<T>(&mut self, offset: u64, reason: MalformedRecord) -> Result<Option<T>, ParsingError> {
        self.reporter.register(offset, &reason);
        if cfg!(feature = "strict") {
            tracing::error!("Aborting archive scan due to malformed record");
            Err(ParsingError::Malformed { offset, reason })
        } else {
            Ok(None)
        }
    }

    /// Give up on the rest of the stream after a read error, counting it as one malformed record.
    ///
    /// Only the `strict` feature turns this into an error.
    pub fn abandon(&mut self, error: std::io::Error) -> Result<(), ParsingError> {
        let offset = self.position;
        tracing::warn!(message = "archive stream unreadable, keeping the records before it", offset, error = %error);
        self.fail::<()>(offset, MalformedRecord::Unreadable(error.to_string()))?;
        Ok(())
    }

    // skips blank lines and garbage until the next version line
    fn find_version_line(&mut self) -> Result<Option<(u64, CompactString)>, ParsingError> {
        let mut garbage_start = None;

        loop {
            let offset = self.position;
            if self.read_line()? == 0 {
                if let Some(garbage_start) = garbage_start {
                    self.fail::<()>(garbage_start, MalformedRecord::MissingVersion)?;
                }
                return Ok(None);
            }

            let line = trim_line_end(&self.line);
            if line.is_empty() {
                continue;
            }

            if line.starts_with(VERSION_PREFIX) {
                let version = CompactString::from(String::from_utf8_lossy(line).as_ref());
                if let Some(garbage_start) = garbage_start {
                    // count the run of garbage once, then continue with the record we found
                    self.fail::<()>(garbage_start, MalformedRecord::MissingVersion)?;
                }
                return Ok(Some((offset, version)));
            }

            if garbage_start.is_none() {
                garbage_start = Some(offset);
            }
        }
    }

    fn read_headers(&mut self) -> Result<(Vec<(CompactString, String)>, bool), RecordFailure> {
        let mut headers: Vec<(CompactString, String)> = Vec::new();
        let mut bad_line = false;

        loop {
            if self.read_line()? == 0 {
                // eof inside the header section, the block is missing entirely
                return Err(RecordFailure::Malformed(MalformedRecord::Truncated {
                    expected: 1,
                    actual: 0,
                }));
            }

            let line = trim_line_end(&self.line);
            if line.is_empty() {
                break;
            }

            // folded continuation of the previous header value
            if matches!(line[0], b' ' | b'\t') {
                if let Some((_, value)) = headers.last_mut() {
                    value.push(' ');
                    value.push_str(String::from_utf8_lossy(line).trim());
                    continue;
                }
            }

            let line = String::from_utf8_lossy(line);
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.push((CompactString::from(name.trim()), value.trim().to_string()));
                }
                None => bad_line = true,
            }
        }

        Ok((headers, bad_line))
    }

    fn read_block(&mut self, length: u64) -> Result<Vec<u8>, RecordFailure> {
        // cap the preallocation, Content-Length comes from untrusted input
        let mut block = Vec::with_capacity(length.min(16 * 1024 * 1024) as usize);
        let read = (&mut self.reader).take(length).read_to_end(&mut block)? as u64;
        self.position += read;

        if read < length {
            return Err(RecordFailure::Malformed(MalformedRecord::Truncated {
                expected: length,
                actual: read,
            }));
        }
        Ok(block)
    }

    fn read_record(
        &mut self,
        offset: u64,
        version: CompactString,
    ) -> Result<RawRecord, RecordFailure> {
        let (headers, bad_line) = self.read_headers()?;

        let length = match find_header(&headers, "Content-Length") {
            Some(value) => value.trim().parse::<u64>().map_err(|_| {
                RecordFailure::Malformed(MalformedRecord::InvalidContentLength(value.to_string()))
            })?,
            None => return Err(RecordFailure::Malformed(MalformedRecord::MissingContentLength)),
        };

        // read the block even if a header line was broken so the stream stays in sync
        let block = self.read_block(length)?;
        if bad_line {
            return Err(RecordFailure::Malformed(MalformedRecord::BadHeaderLine));
        }

        let ordinal = self.ordinal;
        self.ordinal += 1;

        Ok(RawRecord {
            offset,
            ordinal,
            version,
            headers,
            block,
        })
    }

    /// Returns the next well-formed record, skipping (and counting) malformed ones.
    ///
    /// With the `strict` feature the first malformed record aborts the scan instead.
    #[instrument(level = "trace", skip(self), fields(position = self.position))]
    pub fn next_record(&mut self) -> Result<Option<RawRecord>, ParsingError> {
        loop {
            let Some((offset, version)) = self.find_version_line()? else {
                return Ok(None);
            };

            match self.read_record(offset, version) {
                Ok(record) => return Ok(Some(record)),
                Err(RecordFailure::Io(e)) => return Err(ParsingError::Io(e)),
                Err(RecordFailure::Malformed(reason)) => {
                    self.fail::<()>(offset, reason)?;
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for WarcParser<R> {
    type Item = Result<RawRecord, ParsingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

/// Status line and headers of an HTTP message, without touching the body.
#[derive(Debug, Clone)]
pub struct HttpHead {
    pub status: u16,
    pub headers: Vec<(CompactString, String)>,
    /// Offset of the first body byte within the block.
    pub body_offset: usize,
}

impl HttpHead {
    pub fn parse(block: &[u8]) -> Result<Self, MalformedRecord> {
        static CRLF_CRLF: std::sync::LazyLock<memmem::Finder<'static>> =
            std::sync::LazyLock::new(|| memmem::Finder::new(b"\r\n\r\n"));
        static LF_LF: std::sync::LazyLock<memmem::Finder<'static>> =
            std::sync::LazyLock::new(|| memmem::Finder::new(b"\n\n"));

        let (head, body_offset) = if let Some(end) = CRLF_CRLF.find(block) {
            (&block[..end], end + 4)
        } else if let Some(end) = LF_LF.find(block) {
            (&block[..end], end + 2)
        } else {
            // head without body
            (block, block.len())
        };

        let head = String::from_utf8_lossy(head);
        let mut lines = head.lines();

        let status_line = lines
            .next()
            .filter(|line| line.starts_with("HTTP/"))
            .ok_or(MalformedRecord::MissingStatusLine)?;
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|code| (100..1000).contains(code))
            .ok_or_else(|| MalformedRecord::InvalidStatusLine(status_line.to_string()))?;

        let mut headers: Vec<(CompactString, String)> = Vec::new();
        for line in lines {
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = headers.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((CompactString::from(name.trim()), value.trim().to_string()));
            }
        }

        Ok(HttpHead {
            status,
            headers,
            body_offset,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// HTTP response carried in the block of a `response` record.
#[derive(Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(CompactString, String)>,
    pub body: Vec<u8>,
}

impl Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body.len", &self.body.len())
            .finish()
    }
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the HTTP head of a record block and decode the transfer and content encodings of the body.
    pub fn parse(block: &[u8]) -> Result<Self, MalformedRecord> {
        let head = HttpHead::parse(block)?;
        let mut response = HttpResponse {
            status: head.status,
            headers: head.headers,
            body: block[head.body_offset..].to_vec(),
        };
        response.decode_body();
        Ok(response)
    }

    fn decode_body(&mut self) {
        let chunked = self
            .header("Transfer-Encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
        if chunked {
            match dechunk(&self.body) {
                Some(body) => self.body = body,
                None => tracing::debug!(
                    message = "chunked body could not be decoded, keeping raw bytes",
                    len = self.body.len()
                ),
            }
        }

        if let Some(encoding) = self.header("Content-Encoding").map(str::to_ascii_lowercase) {
            match decompress(&self.body, &encoding) {
                Some(body) => self.body = body,
                None => tracing::debug!(
                    message = "content encoding not decoded, keeping raw bytes",
                    encoding = encoding.as_str()
                ),
            }
        }
    }
}

fn dechunk(body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut rest = body;

    loop {
        let line_end = memchr::memchr(b'\n', rest)?;
        let size_line = std::str::from_utf8(&rest[..line_end]).ok()?;
        // chunk extensions after `;` are ignored
        let size_hex = size_line.split(';').next()?.trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;
        rest = &rest[line_end + 1..];

        if size == 0 {
            return Some(out);
        }
        if rest.len() < size {
            return None;
        }
        out.extend_from_slice(&rest[..size]);
        rest = &rest[size..];

        // CRLF after the chunk data
        if rest.starts_with(b"\r\n") {
            rest = &rest[2..];
        } else if rest.starts_with(b"\n") {
            rest = &rest[1..];
        }
    }
}

fn decompress(body: &[u8], encoding: &str) -> Option<Vec<u8>> {
    use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};

    let mut out = Vec::new();
    if encoding.contains("gzip") {
        MultiGzDecoder::new(body).read_to_end(&mut out).ok()?;
        Some(out)
    } else if encoding.contains("deflate") {
        // servers disagree on whether "deflate" means raw deflate or zlib-wrapped
        if DeflateDecoder::new(body).read_to_end(&mut out).is_ok() {
            return Some(out);
        }
        out.clear();
        ZlibDecoder::new(body).read_to_end(&mut out).ok()?;
        Some(out)
    } else if encoding.trim() == "identity" {
        Some(body.to_vec())
    } else {
        // br, zstd and friends are kept as they are
        None
    }
}
