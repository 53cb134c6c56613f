use std::{
    fmt::Debug,
    fs::File,
    io::{BufRead, BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::warc_parser::{
    HttpHead, HttpResponse, MalformedRecord, ParsingError, RawRecord, RecordType, WarcParser,
};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("could not open archive {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("error while scanning the archive")]
    Parsing(#[from] ParsingError),
    #[error("no record found at offset {offset}")]
    RecordMissing { offset: u64 },
    #[error("record at offset {offset} is not a usable HTTP response")]
    NotAResponse {
        offset: u64,
        #[source]
        reason: MalformedRecord,
    },
}

impl From<std::io::Error> for ArchiveError {
    fn from(e: std::io::Error) -> Self {
        ArchiveError::Parsing(ParsingError::Io(e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    fn sniff(magic: &[u8]) -> Self {
        match magic {
            [0x1f, 0x8b, ..] => Compression::Gzip,
            [0x28, 0xb5, 0x2f, 0xfd, ..] => Compression::Zstd,
            _ => Compression::None,
        }
    }
}

/// Start of one gzip member or zstd frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Member {
    /// Offset within the archive file.
    compressed: u64,
    /// Offset of its first byte within the decompressed stream.
    decompressed: u64,
}

/// Counts the bytes taken from the wrapped reader.
struct Counted<R> {
    inner: R,
    consumed: u64,
}

impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for Counted<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.consumed += amt as u64;
        self.inner.consume(amt);
    }
}

/// A decoder that stops at the end of one member and hands its input back.
trait MemberDecoder<R: BufRead>: Read + Sized {
    fn open(input: R) -> std::io::Result<Self>;
    fn close(self) -> R;
}

impl<R: BufRead> MemberDecoder<R> for flate2::bufread::GzDecoder<R> {
    fn open(input: R) -> std::io::Result<Self> {
        Ok(Self::new(input))
    }

    fn close(self) -> R {
        self.into_inner()
    }
}

impl<R: BufRead> MemberDecoder<R> for zstd::stream::read::Decoder<'static, R> {
    fn open(input: R) -> std::io::Result<Self> {
        Ok(Self::with_buffer(input)?.single_frame())
    }

    fn close(self) -> R {
        self.finish()
    }
}

enum MemberState<R, D> {
    Between(R),
    Inside(D),
    Failed,
}

/// Decompresses concatenated members one after the other and records where each one starts.
struct MemberReader<R: BufRead, D: MemberDecoder<Counted<R>>> {
    state: MemberState<Counted<R>, D>,
    decompressed: u64,
    members: Vec<Member>,
}

type GzipMembers<R> = MemberReader<R, flate2::bufread::GzDecoder<Counted<R>>>;
type ZstdMembers<R> = MemberReader<R, zstd::stream::read::Decoder<'static, Counted<R>>>;

impl<R: BufRead, D: MemberDecoder<Counted<R>>> MemberReader<R, D> {
    fn new(input: R) -> Self {
        Self {
            state: MemberState::Between(Counted { inner: input, consumed: 0 }),
            decompressed: 0,
            members: Vec::new(),
        }
    }

    fn into_members(self) -> Vec<Member> {
        self.members
    }
}

impl<R: BufRead, D: MemberDecoder<Counted<R>>> Read for MemberReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            // an error leaves the reader in `Failed`
            match std::mem::replace(&mut self.state, MemberState::Failed) {
                MemberState::Inside(mut decoder) => {
                    let n = decoder.read(buf)?;
                    if n > 0 {
                        self.decompressed += n as u64;
                        self.state = MemberState::Inside(decoder);
                        return Ok(n);
                    }
                    let input = decoder.close();
                    let started = self.members.last().map_or(0, |member| member.compressed);
                    if input.consumed == started {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "compressed member made no progress",
                        ));
                    }
                    self.state = MemberState::Between(input);
                }
                MemberState::Between(mut input) => {
                    if input.fill_buf()?.is_empty() {
                        self.state = MemberState::Between(input);
                        return Ok(0);
                    }
                    self.members.push(Member {
                        compressed: input.consumed,
                        decompressed: self.decompressed,
                    });
                    self.state = MemberState::Inside(D::open(input)?);
                }
                MemberState::Failed => return Ok(0),
            }
        }
    }
}

/// Where a record lives within the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocator {
    /// Byte offset of the record within the decompressed archive stream.
    pub offset: u64,
    pub ordinal: usize,
    pub status: u16,
}

impl RecordLocator {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub records: usize,
    pub responses: usize,
    pub indexed_urls: usize,
    pub malformed: usize,
    /// Responses ignored because an earlier 2xx response for the URL was already indexed.
    pub shadowed: usize,
}

/// One archived HTTP response, decoded down to its payload bytes.
#[derive(Clone)]
pub struct ArchiveRecord {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub charset: Option<String>,
    pub body: Vec<u8>,
    pub record_id: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    pub digest: blake3::Hash,
}

impl Debug for ArchiveRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveRecord")
            .field("url", &self.url)
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("charset", &self.charset)
            .field("body.len", &self.body.len())
            .field("record_id", &self.record_id)
            .field("captured_at", &self.captured_at)
            .field("digest", &self.digest.to_hex().as_str())
            .finish()
    }
}

/// Split a `Content-Type` header into its lowercased media type and `charset` parameter.
pub fn parse_content_type(value: &str) -> (String, Option<String>) {
    let mut parts = value.split(';');
    let media_type = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let charset = parts
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches(['"', '\'']).to_ascii_lowercase())
        .filter(|charset| !charset.is_empty());
    (media_type, charset)
}

/// Canonical form of a URL used as the key of the index and of the resolver cache.
///
/// Scheme and host are lowercased, default ports and fragments dropped, and a trailing slash
/// removed from every path but the root. Angle brackets as written in WARC/1.0 headers are
/// stripped, and a missing scheme is read as `http`.
pub fn normalize_url(raw: &str) -> Result<String, url::ParseError> {
    let raw = raw.trim().trim_start_matches('<').trim_end_matches('>').trim();

    let mut url = match url::Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) if !raw.contains("://") => {
            url::Url::parse(&format!("http://{raw}"))?
        }
        Err(e) => return Err(e),
    };

    url.set_fragment(None);
    if !url.cannot_be_a_base() {
        let path = url.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/').to_string();
            url.set_path(if trimmed.is_empty() { "/" } else { &trimmed });
        }
    }

    Ok(url.to_string())
}

/// Index of the HTTP responses in one WARC archive, keyed by normalized target URL.
///
/// The archive file stays open for the lifetime of the index and is closed when it is dropped.
pub struct ArchiveIndex {
    path: PathBuf,
    file: File,
    compression: Compression,
    entries: FxHashMap<String, RecordLocator>,
    // empty for uncompressed archives
    members: Vec<Member>,
    // URLs in the order their first response appears in the archive
    order: Vec<String>,
    stats: IndexStats,
}

impl Debug for ArchiveIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveIndex")
            .field("path", &self.path)
            .field("compression", &self.compression)
            .field("entries.len", &self.entries.len())
            .field("members.len", &self.members.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ArchiveIndex {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|source| ArchiveError::Open {
            path: path.clone(),
            source,
        })?;

        let mut magic = [0u8; 4];
        let magic_len = read_up_to(&mut file, &mut magic)?;
        let compression = Compression::sniff(&magic[..magic_len]);
        file.seek(SeekFrom::Start(0))?;

        let mut index = ArchiveIndex {
            path,
            file,
            compression,
            entries: FxHashMap::default(),
            members: Vec::new(),
            order: Vec::new(),
            stats: IndexStats::default(),
        };
        index.build()?;

        tracing::info!(
            message = "archive indexed",
            compression = ?index.compression,
            records = index.stats.records,
            responses = index.stats.responses,
            urls = index.stats.indexed_urls,
            malformed = index.stats.malformed
        );
        Ok(index)
    }

    fn build(&mut self) -> Result<(), ArchiveError> {
        let mut entries = std::mem::take(&mut self.entries);
        let mut order = std::mem::take(&mut self.order);
        let mut stats = IndexStats::default();

        let mut visit = |record: RawRecord, stats: &mut IndexStats| -> Result<(), ArchiveError> {
            stats.records += 1;
            if record.record_type() != Some(RecordType::Response) {
                return Ok(());
            }
            let Some(target) = record.target_uri() else {
                return Ok(());
            };
            let head = match HttpHead::parse(&record.block) {
                Ok(head) => head,
                Err(reason) => {
                    stats.malformed += 1;
                    tracing::debug!(message = "response record without a valid HTTP head", offset = record.offset, reason = %reason);
                    if cfg!(feature = "strict") {
                        return Err(ParsingError::Malformed {
                            offset: record.offset,
                            reason,
                        }
                        .into());
                    }
                    return Ok(());
                }
            };
            stats.responses += 1;

            let url = match normalize_url(target) {
                Ok(url) => url,
                Err(e) => {
                    tracing::debug!(message = "skipping response with unparseable target URI", uri = target, error = %e);
                    return Ok(());
                }
            };

            let locator = RecordLocator {
                offset: record.offset,
                ordinal: record.ordinal,
                status: head.status,
            };
            match entries.get_mut(&url) {
                None => {
                    order.push(url.clone());
                    entries.insert(url, locator);
                }
                // a later success replaces an error response, never the other way round
                Some(existing) if !existing.is_success() && locator.is_success() => {
                    *existing = locator;
                }
                Some(_) => stats.shadowed += 1,
            }
            Ok(())
        };

        let (malformed, members) = match self.compression {
            Compression::None => {
                let reader = BufReader::new(&mut self.file);
                (scan(reader, |record| visit(record, &mut stats))?, Vec::new())
            }
            Compression::Gzip => {
                let mut decoder = GzipMembers::new(BufReader::new(&mut self.file));
                let malformed = scan(BufReader::new(&mut decoder), |record| visit(record, &mut stats))?;
                (malformed, decoder.into_members())
            }
            Compression::Zstd => {
                let mut decoder = ZstdMembers::new(BufReader::new(&mut self.file));
                let malformed = scan(BufReader::new(&mut decoder), |record| visit(record, &mut stats))?;
                (malformed, decoder.into_members())
            }
        };

        stats.malformed += malformed;
        self.members = members;
        stats.indexed_urls = entries.len();
        self.entries = entries;
        self.order = order;
        self.stats = stats;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalized URLs in archive order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// `None` means the URL is not in the archive (or cannot be parsed at all).
    pub fn lookup(&self, url: &str) -> Option<RecordLocator> {
        let url = normalize_url(url).ok()?;
        self.entries.get(&url).copied()
    }

    // last member starting at or before `offset`
    fn member_at(&self, offset: u64) -> Member {
        let after = self.members.partition_point(|member| member.decompressed <= offset);
        after
            .checked_sub(1)
            .and_then(|i| self.members.get(i).copied())
            .unwrap_or_default()
    }

    #[instrument(level = "debug", skip(self))]
    pub fn read(&mut self, locator: RecordLocator) -> Result<ArchiveRecord, ArchiveError> {
        let offset = locator.offset;
        // decoding starts at the member holding the record, not at the start of the file
        let member = self.member_at(offset);
        let skip = offset - member.decompressed;
        let raw = match self.compression {
            Compression::None => {
                self.file.seek(SeekFrom::Start(offset))?;
                record_at(BufReader::new(&mut self.file), offset)?
            }
            Compression::Gzip => {
                self.file.seek(SeekFrom::Start(member.compressed))?;
                let decoder = flate2::read::MultiGzDecoder::new(BufReader::new(&mut self.file));
                record_at(skip_bytes(BufReader::new(decoder), skip)?, offset)?
            }
            Compression::Zstd => {
                self.file.seek(SeekFrom::Start(member.compressed))?;
                let decoder = zstd::stream::read::Decoder::new(&mut self.file)?;
                record_at(skip_bytes(BufReader::new(decoder), skip)?, offset)?
            }
        };

        let url = raw
            .target_uri()
            .and_then(|target| normalize_url(target).ok())
            .ok_or(ArchiveError::RecordMissing { offset })?;
        let response = HttpResponse::parse(&raw.block)
            .map_err(|reason| ArchiveError::NotAResponse { offset, reason })?;

        let (content_type, charset) = match response.header("Content-Type") {
            Some(value) => {
                let (media_type, charset) = parse_content_type(value);
                (Some(media_type).filter(|m| !m.is_empty()), charset)
            }
            None => (None, None),
        };

        Ok(ArchiveRecord {
            url,
            status: response.status,
            content_type,
            charset,
            digest: blake3::hash(&response.body),
            body: response.body,
            record_id: raw.record_id().map(str::to_string),
            captured_at: raw.date(),
        })
    }
}

fn scan<R: BufRead>(
    reader: R,
    mut visit: impl FnMut(RawRecord) -> Result<(), ArchiveError>,
) -> Result<usize, ArchiveError> {
    let mut parser = WarcParser::new(reader);
    loop {
        match parser.next_record() {
            Ok(Some(record)) => visit(record)?,
            Ok(None) => break,
            // a damaged compressed member ends the readable part of the archive
            Err(ParsingError::Io(e)) => {
                parser.abandon(e)?;
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(parser.malformed_records())
}

fn skip_bytes<R: BufRead>(mut reader: R, count: u64) -> std::io::Result<R> {
    let skipped = std::io::copy(&mut (&mut reader).take(count), &mut std::io::sink())?;
    if skipped < count {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    Ok(reader)
}

fn record_at<R: BufRead>(reader: R, offset: u64) -> Result<RawRecord, ArchiveError> {
    let mut parser = WarcParser::with_start_position(reader, offset);
    match parser.next_record()? {
        Some(record) if record.offset == offset => Ok(record),
        _ => Err(ArchiveError::RecordMissing { offset }),
    }
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
