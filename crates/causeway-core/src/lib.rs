//! Causeway Core - Loading, encoding and caching of causal assertion record sets
//!
//! This crate provides:
//! - The assertion record model and its metadata projection
//! - Interchange-format (JSON) parsing and a tolerant streaming chunk parser
//! - A checksummed binary snapshot codec with optional zstd compression
//! - Compact and ultra-compact deduplicated record set forms
//! - An O(1) edge index with data-driven synonym expansion
//! - A two-tier (memory LRU + disk) fingerprinted cache
//! - The record loader that picks a loading strategy per source

pub mod cache;
pub mod codec;
pub mod compact;
pub mod fingerprint;
pub mod index;
pub mod interchange;
pub mod loader;
pub mod record;
pub mod stream;
pub mod synonyms;

// Record model re-exports
pub use record::{
    project_metadata, AssertionRecord, EdgeSource, RecordMetadata, RelationshipDegree,
    DEFAULT_PREDICATE,
};

// Interchange re-exports
pub use interchange::{
    parse_records, read_records, write_records, InterchangeError, ParseReport, ParseWarning,
};

// Codec re-exports
pub use codec::{
    decode, encode, inspect_snapshot, read_snapshot, snapshot_path_for, write_snapshot,
    CodecError, Compression, PayloadKind, Snapshot, SnapshotHeader,
};

// Compact form re-exports
pub use compact::{
    compact, expand, ultra_compact, CompactError, CompactRecordSet, CompactStats, Expansion,
    UltraCompactRecordSet,
};

// Streaming re-exports
pub use stream::{
    stream_file, CancelToken, ChunkParser, RecordSpan, StreamChunk, StreamError,
    StreamProgress, StreamSummary,
};

// Index re-exports
pub use index::{
    normalize_name, EdgeIndex, EdgeIndexEntry, EdgeIndexProvider, IndexError, IndexStats,
    SynonymIndexProvider,
};
pub use synonyms::{SynonymError, SynonymTable};

// Cache re-exports
pub use cache::{CacheManager, CacheSettings, CacheStats, Cacheable};
pub use fingerprint::{CacheFingerprint, FingerprintParams, SourceStamp};

// Loader re-exports
pub use loader::{
    DetailLoader, LoadError, LoadErrorKind, LoadParams, LoadResult, LoadStrategy, LoadTarget,
    LoadedData, LoaderSettings, RecordLoader, SourceResolver,
};
