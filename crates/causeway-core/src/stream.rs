//! Streaming Chunk Parser
//!
//! Reads an interchange document incrementally, reconstructing one record object at a
//! time from the raw bytes. Record boundaries are found by tracking brace/bracket depth
//! (string literals and escapes are respected), so the full document is never held in
//! memory.
//!
//! Between records the scanner tolerates whitespace, blank lines and trailing commas.
//! A record that fails to parse is skipped with a [`ParseWarning`]; the stream continues.
//! When the skipped bytes are not even well-formed JSON (an unbalanced quote, say) the
//! depth tracker may have run past the end of the broken record, so the scanner
//! resynchronises at the next top-level record boundary inside those bytes and scans
//! the remainder again.
//!
//! Each accepted record also yields the byte [`RecordSpan`] it was read from, so a single
//! record can later be re-read with [`read_span`] without rescanning the file.

use crate::interchange::{parse_record, ParseWarning};
use crate::record::AssertionRecord;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Default records per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Read buffer size for file-backed parsers
const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Errors that abort a stream
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Source file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream cancelled after {records} records")]
    Cancelled { records: usize },

    #[error("Record at byte {offset} could not be parsed: {reason}")]
    InvalidRecord { offset: u64, reason: String },
}

/// Cooperative cancellation flag shared between a caller and a running load
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Byte range of one record object within its source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecordSpan {
    pub offset: u64,
    pub len: u64,
}

/// One batch of parsed records
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub records: Vec<AssertionRecord>,
    /// Spans parallel to `records`
    pub spans: Vec<RecordSpan>,
    pub warnings: Vec<ParseWarning>,
    /// False once the underlying document is exhausted. A full chunk may still be
    /// followed by an empty final chunk.
    pub has_more: bool,
}

/// Cumulative position handed to `process` callbacks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamProgress {
    pub chunk_index: usize,
    pub records_so_far: usize,
    pub skipped_so_far: usize,
    pub bytes_read: u64,
}

/// Totals for a completed stream
#[derive(Debug, Clone, Default)]
pub struct StreamSummary {
    pub chunks: usize,
    pub records: usize,
    pub bytes_read: u64,
    pub warnings: Vec<ParseWarning>,
}

impl StreamSummary {
    pub fn skipped(&self) -> usize {
        self.warnings.len()
    }
}

/// Everything a full stream produced
#[derive(Debug, Clone, Default)]
pub struct StreamOutput {
    pub records: Vec<AssertionRecord>,
    pub spans: Vec<RecordSpan>,
    pub summary: StreamSummary,
}

/// What the scanner found at top level
enum Scanned {
    Object { offset: u64, bytes: Vec<u8> },
    /// Non-record content between records
    Junk { offset: u64 },
    /// Document ended inside a record
    Truncated { offset: u64, bytes: Vec<u8> },
}

enum Step {
    Continue,
    Object,
    Junk,
    End,
}

/// Outcome of feeding one byte
enum Fed {
    Continue,
    Found(Scanned),
    End,
}

/// Byte-level depth tracker
#[derive(Default)]
struct Scanner {
    depth: usize,
    in_string: bool,
    escaped: bool,
    started: bool,
    ended: bool,
    junk: Option<u64>,
    start: u64,
    current: Vec<u8>,
}

impl Scanner {
    fn feed(&mut self, byte: u8, offset: u64) -> Fed {
        match self.push(byte, offset) {
            Step::Continue => Fed::Continue,
            Step::Object => Fed::Found(Scanned::Object {
                offset: self.start,
                bytes: std::mem::take(&mut self.current),
            }),
            Step::Junk => match self.junk.take() {
                Some(offset) => Fed::Found(Scanned::Junk { offset }),
                None => Fed::Continue,
            },
            Step::End => Fed::End,
        }
    }

    /// Whatever was pending when input ran out
    fn finish(&mut self) -> Option<Scanned> {
        if self.depth > 0 {
            self.depth = 0;
            self.in_string = false;
            self.escaped = false;
            return Some(Scanned::Truncated {
                offset: self.start,
                bytes: std::mem::take(&mut self.current),
            });
        }
        self.junk.take().map(|offset| Scanned::Junk { offset })
    }

    fn push(&mut self, byte: u8, offset: u64) -> Step {
        if self.depth > 0 {
            self.current.push(byte);
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                return Step::Continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Step::Object;
                    }
                }
                _ => {}
            }
            return Step::Continue;
        }

        if self.ended {
            return Step::Continue;
        }

        match byte {
            b'{' => {
                self.started = true;
                self.start = offset;
                self.current.clear();
                self.current.push(byte);
                self.depth = 1;
                self.in_string = false;
                self.escaped = false;
                if self.junk.is_some() {
                    return Step::Junk;
                }
                Step::Continue
            }
            b'[' if !self.started => {
                self.started = true;
                Step::Continue
            }
            b']' => {
                self.ended = true;
                if self.junk.is_some() {
                    Step::Junk
                } else {
                    Step::End
                }
            }
            b',' => {
                if self.junk.is_some() {
                    Step::Junk
                } else {
                    Step::Continue
                }
            }
            b if b.is_ascii_whitespace() => Step::Continue,
            _ => {
                self.started = true;
                if self.junk.is_none() {
                    self.junk = Some(offset);
                }
                Step::Continue
            }
        }
    }
}

/// Incremental parser over any buffered reader.
///
/// The reader is released as soon as the document is exhausted, on error, on
/// cancellation, or when the parser is dropped.
pub struct ChunkParser<R: BufRead> {
    reader: Option<R>,
    chunk_size: usize,
    scanner: Scanner,
    /// Bytes handed back for rescanning after a resync
    replay: VecDeque<u8>,
    replay_offset: u64,
    bytes_read: u64,
    ordinal: usize,
    records_so_far: usize,
    skipped_so_far: usize,
    chunks_emitted: usize,
}

impl ChunkParser<BufReader<File>> {
    /// Open a file-backed parser
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, StreamError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StreamError::NotFound(path.to_path_buf()),
            _ => StreamError::Io(e),
        })?;
        debug!("Streaming {:?} in chunks of {}", path, chunk_size);
        Ok(Self::new(
            BufReader::with_capacity(READ_BUFFER_SIZE, file),
            chunk_size,
        ))
    }
}

impl<R: BufRead> ChunkParser<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader: Some(reader),
            chunk_size: chunk_size.max(1),
            scanner: Scanner::default(),
            replay: VecDeque::new(),
            replay_offset: 0,
            bytes_read: 0,
            ordinal: 0,
            records_so_far: 0,
            skipped_so_far: 0,
            chunks_emitted: 0,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Whether the underlying reader has been released
    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    /// Release the underlying reader
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("Stream closed after {} bytes", self.bytes_read);
        }
    }

    pub fn progress(&self) -> StreamProgress {
        StreamProgress {
            chunk_index: self.chunks_emitted,
            records_so_far: self.records_so_far,
            skipped_so_far: self.skipped_so_far,
            bytes_read: self.bytes_read,
        }
    }

    fn scan_next(&mut self) -> Result<Option<Scanned>, StreamError> {
        while let Some(byte) = self.replay.pop_front() {
            let offset = self.replay_offset;
            self.replay_offset += 1;
            match self.scanner.feed(byte, offset) {
                Fed::Continue => {}
                Fed::Found(scanned) => return Ok(Some(scanned)),
                Fed::End => {
                    self.replay.clear();
                    self.close();
                    return Ok(None);
                }
            }
        }

        loop {
            if self.scanner.ended && self.scanner.depth == 0 {
                self.close();
                return Ok(None);
            }
            let Some(reader) = self.reader.as_mut() else {
                return Ok(self.scanner.finish());
            };
            let available = reader.fill_buf()?;

            if available.is_empty() {
                self.close();
                return Ok(self.scanner.finish());
            }

            let mut consumed = 0;
            let mut fed = Fed::Continue;
            for &byte in available {
                let offset = self.bytes_read;
                consumed += 1;
                self.bytes_read += 1;
                fed = self.scanner.feed(byte, offset);
                if !matches!(fed, Fed::Continue) {
                    break;
                }
            }
            reader.consume(consumed);

            match fed {
                Fed::Continue => {}
                Fed::Found(scanned) => return Ok(Some(scanned)),
                Fed::End => {
                    self.close();
                    return Ok(None);
                }
            }
        }
    }

    /// Hand the bytes after the first record boundary in `bytes` back to the scanner.
    ///
    /// Only applies to bytes that are not well-formed JSON; a well-formed object that
    /// merely is not a valid record was delimited correctly.
    fn resync(&mut self, offset: u64, bytes: &[u8]) {
        if serde_json::from_slice::<serde::de::IgnoredAny>(bytes).is_ok() {
            return;
        }
        let Some(boundary) = next_record_boundary(bytes) else {
            return;
        };

        debug!(
            "Resynchronising at byte {} after malformed record at byte {}",
            offset + boundary as u64,
            offset
        );
        let tail = &bytes[boundary..];
        let mut replay = VecDeque::with_capacity(tail.len() + self.replay.len());
        replay.extend(tail.iter().copied());
        replay.extend(self.replay.drain(..));
        self.replay = replay;
        self.replay_offset = offset + boundary as u64;
    }

    fn record_warning(&mut self, chunk: &mut StreamChunk, offset: u64, reason: String) {
        warn!(
            "Skipping record {} at byte {}: {}",
            self.ordinal, offset, reason
        );
        chunk.warnings.push(ParseWarning {
            position: self.ordinal,
            reason,
        });
        self.skipped_so_far += 1;
        self.ordinal += 1;
    }

    /// Parse up to `chunk_size` records
    pub fn next_chunk(&mut self) -> Result<StreamChunk, StreamError> {
        let mut chunk = StreamChunk::default();

        while chunk.records.len() < self.chunk_size {
            let scanned = match self.scan_next() {
                Ok(Some(scanned)) => scanned,
                Ok(None) => break,
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            };

            match scanned {
                Scanned::Object { offset, bytes } => match parse_record(&bytes) {
                    Ok(record) => {
                        chunk.records.push(record);
                        chunk.spans.push(RecordSpan {
                            offset,
                            len: bytes.len() as u64,
                        });
                        self.records_so_far += 1;
                        self.ordinal += 1;
                    }
                    Err(rejection) => {
                        self.resync(offset, &bytes);
                        self.record_warning(&mut chunk, offset, rejection.to_string())
                    }
                },
                Scanned::Junk { offset } => self.record_warning(
                    &mut chunk,
                    offset,
                    "unexpected content between records".to_string(),
                ),
                Scanned::Truncated { offset, bytes } => {
                    self.resync(offset, &bytes);
                    self.record_warning(
                        &mut chunk,
                        offset,
                        "document ended inside a record".to_string(),
                    )
                }
            }
        }

        chunk.has_more = !self.is_closed() || !self.replay.is_empty();
        self.chunks_emitted += 1;
        Ok(chunk)
    }

    /// Drive the stream to completion, handing each chunk to `callback`.
    ///
    /// `cancel` is checked before every chunk.
    pub fn process<F>(
        &mut self,
        cancel: Option<&CancelToken>,
        mut callback: F,
    ) -> Result<StreamSummary, StreamError>
    where
        F: FnMut(StreamChunk, StreamProgress),
    {
        let mut summary = StreamSummary::default();

        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                self.close();
                return Err(StreamError::Cancelled {
                    records: self.records_so_far,
                });
            }

            let chunk = self.next_chunk()?;
            let has_more = chunk.has_more;
            summary.chunks += 1;
            summary.records += chunk.records.len();
            summary.warnings.extend(chunk.warnings.iter().cloned());
            callback(chunk, self.progress());

            if !has_more {
                break;
            }
        }

        summary.bytes_read = self.bytes_read;
        debug!(
            "Stream finished: {} records, {} skipped, {} chunks",
            summary.records,
            summary.skipped(),
            summary.chunks
        );
        Ok(summary)
    }

    /// Collect every record and span
    pub fn collect(
        &mut self,
        cancel: Option<&CancelToken>,
    ) -> Result<StreamOutput, StreamError> {
        let mut records = Vec::new();
        let mut spans = Vec::new();
        let summary = self.process(cancel, |chunk, _| {
            records.extend(chunk.records);
            spans.extend(chunk.spans);
        })?;
        Ok(StreamOutput {
            records,
            spans,
            summary,
        })
    }
}

/// Index of the first `{` in `bytes` (after the first byte) that opens a new top-level
/// record: preceded by `}` and a separator of commas and whitespace containing at least
/// one comma or newline.
fn next_record_boundary(bytes: &[u8]) -> Option<usize> {
    (1..bytes.len()).find(|&i| {
        if bytes[i] != b'{' {
            return false;
        }
        let mut j = i;
        let mut separated = false;
        while j > 0 {
            match bytes[j - 1] {
                b',' | b'\n' => separated = true,
                b if b.is_ascii_whitespace() => {}
                b'}' => return separated && j > 1,
                _ => return false,
            }
            j -= 1;
        }
        false
    })
}

/// Stream a whole file
pub fn stream_file(
    path: &Path,
    chunk_size: usize,
    cancel: Option<&CancelToken>,
) -> Result<StreamOutput, StreamError> {
    ChunkParser::open(path, chunk_size)?.collect(cancel)
}

/// Re-read a single record from its span
pub fn read_span(path: &Path, span: RecordSpan) -> Result<AssertionRecord, StreamError> {
    let mut file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StreamError::NotFound(path.to_path_buf()),
        _ => StreamError::Io(e),
    })?;
    file.seek(SeekFrom::Start(span.offset))?;

    let mut bytes = Vec::with_capacity(span.len as usize);
    file.take(span.len).read_to_end(&mut bytes)?;

    parse_record(&bytes).map_err(|e| StreamError::InvalidRecord {
        offset: span.offset,
        reason: e.to_string(),
    })
}
