//! Record Loader
//!
//! Entry point for loading a record set. A request names a source (path or identity),
//! the loader fingerprints it and asks the cache first. On a miss it picks a strategy:
//!
//! | Strategy       | When                                           | Returns                      |
//! |----------------|------------------------------------------------|------------------------------|
//! | `Snapshot`     | a binary snapshot exists and is not older      | records + metadata           |
//! | `FullEager`    | source size ≤ lazy threshold (50 MB)           | records + metadata           |
//! | `LazyMetadata` | source size ≤ stream threshold (100 MB)        | metadata + detail loader     |
//! | `Streaming`    | anything larger                                | metadata + span detail loader|
//!
//! Every successful load goes through the cache before it is returned. Failures are
//! reported as a [`LoadResult`] with `success == false`; [`RecordLoader::try_load`]
//! exposes the typed error instead.

use crate::cache::{CacheManager, CacheOrigin, Cacheable};
use crate::codec::{read_snapshot, snapshot_path_for, CodecError};
use crate::compact::LOSSY_FIELDS;
use crate::fingerprint::{system_time_nanos, CacheFingerprint, FingerprintParams, SourceStamp};
use crate::index::{edge_key_for, EdgeIndex, EdgeIndexEntry, EdgeIndexProvider, IndexError};
use crate::interchange::{read_records, InterchangeError};
use crate::record::{project_metadata, AssertionRecord, RecordMetadata, RelationshipDegree};
use crate::stream::{read_span, CancelToken, ChunkParser, RecordSpan, StreamError, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default lazy threshold (50 MB)
pub const DEFAULT_LAZY_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024;

/// Default stream threshold (100 MB)
pub const DEFAULT_STREAM_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

/// Default identity → file name template
pub const DEFAULT_FILE_TEMPLATE: &str = "{name}.json";

/// Errors that end a load attempt
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Source not found: {path:?}")]
    NotFound { path: PathBuf },

    #[error("No usable records in {path:?} ({skipped} skipped)")]
    EmptyOrInvalid { path: PathBuf, skipped: usize },

    #[error("Snapshot error: {0}")]
    Corrupt(#[from] CodecError),

    #[error("Source {path:?} changed since it was loaded")]
    SourceChanged { path: PathBuf },

    #[error("No record at position {position} (record set has {len})")]
    RecordNotFound { position: usize, len: usize },

    #[error(transparent)]
    Edge(#[from] IndexError),

    #[error("Load cancelled after {records} records")]
    Cancelled { records: usize },

    #[error("Stream error: {0}")]
    Stream(StreamError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StreamError> for LoadError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::NotFound(path) => Self::NotFound { path },
            StreamError::Cancelled { records } => Self::Cancelled { records },
            StreamError::Io(e) => Self::Io(e),
            other => Self::Stream(other),
        }
    }
}

impl LoadError {
    pub fn kind(&self) -> LoadErrorKind {
        match self {
            Self::NotFound { .. } | Self::RecordNotFound { .. } | Self::Edge(_) => {
                LoadErrorKind::NotFound
            }
            Self::EmptyOrInvalid { .. } => LoadErrorKind::EmptyOrInvalid,
            Self::Corrupt(_) => LoadErrorKind::CorruptSnapshot,
            Self::SourceChanged { .. } => LoadErrorKind::SourceChanged,
            Self::Cancelled { .. } => LoadErrorKind::Cancelled,
            Self::Stream(_) | Self::Io(_) => LoadErrorKind::Io,
        }
    }

    fn not_found(path: &Path) -> Self {
        Self::NotFound {
            path: path.to_path_buf(),
        }
    }

    fn from_stat(path: &Path, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::not_found(path)
        } else {
            Self::Io(e)
        }
    }
}

/// Failure category reported in a [`LoadResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadErrorKind {
    NotFound,
    EmptyOrInvalid,
    CorruptSnapshot,
    SourceChanged,
    Cancelled,
    Io,
}

/// How a record set was loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadStrategy {
    Snapshot,
    FullEager,
    LazyMetadata,
    Streaming,
}

impl LoadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::FullEager => "full-eager",
            Self::LazyMetadata => "lazy-metadata",
            Self::Streaming => "streaming",
        }
    }

    /// Whether results carry full records rather than metadata only
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Snapshot | Self::FullEager)
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size thresholds for strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyThresholds {
    pub lazy_bytes: u64,
    pub stream_bytes: u64,
}

impl Default for StrategyThresholds {
    fn default() -> Self {
        Self {
            lazy_bytes: DEFAULT_LAZY_THRESHOLD_BYTES,
            stream_bytes: DEFAULT_STREAM_THRESHOLD_BYTES,
        }
    }
}

/// Pick a strategy from the source size and snapshot freshness
pub fn select_strategy(
    source_bytes: u64,
    snapshot_fresh: bool,
    thresholds: StrategyThresholds,
) -> LoadStrategy {
    if snapshot_fresh {
        LoadStrategy::Snapshot
    } else if source_bytes <= thresholds.lazy_bytes {
        LoadStrategy::FullEager
    } else if source_bytes <= thresholds.stream_bytes {
        LoadStrategy::LazyMetadata
    } else {
        LoadStrategy::Streaming
    }
}

/// Whether `snapshot` exists and was modified no earlier than `source`
pub fn snapshot_is_fresh(source: &SourceStamp, snapshot: &Path) -> bool {
    match std::fs::metadata(snapshot).and_then(|m| m.modified()) {
        Ok(modified) => system_time_nanos(modified) >= source.mtime_nanos,
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub thresholds: StrategyThresholds,
    /// Records per chunk for the streaming strategy
    pub chunk_size: usize,
    /// Use a fresh binary snapshot when one sits next to the source
    pub prefer_snapshot: bool,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            thresholds: StrategyThresholds::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            prefer_snapshot: true,
        }
    }
}

impl LoaderSettings {
    pub fn with_thresholds(mut self, lazy_bytes: u64, stream_bytes: u64) -> Self {
        self.thresholds = StrategyThresholds {
            lazy_bytes,
            stream_bytes,
        };
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_prefer_snapshot(mut self, prefer: bool) -> Self {
        self.prefer_snapshot = prefer;
        self
    }
}

/// Maps identities to source files.
///
/// Named entries win; otherwise `data_dir` joined with `file_template`, where `{name}`
/// is replaced by the identity and `{degree}` by the requested degree.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    pub data_dir: PathBuf,
    pub file_template: String,
    pub named: BTreeMap<String, PathBuf>,
}

impl Default for SourceResolver {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            file_template: DEFAULT_FILE_TEMPLATE.to_string(),
            named: BTreeMap::new(),
        }
    }
}

impl SourceResolver {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.file_template = template.into();
        self
    }

    pub fn with_named(mut self, identity: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.named.insert(identity.into(), path.into());
        self
    }

    pub fn resolve(&self, identity: &str, degree: Option<RelationshipDegree>) -> PathBuf {
        if let Some(path) = self.named.get(identity) {
            return if path.is_absolute() {
                path.clone()
            } else {
                self.data_dir.join(path)
            };
        }

        let degree = degree.unwrap_or_default();
        let file = self
            .file_template
            .replace("{name}", identity)
            .replace("{degree}", degree.as_str());
        self.data_dir.join(file)
    }
}

/// What to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadTarget {
    Path(PathBuf),
    Identity(String),
}

impl From<&Path> for LoadTarget {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for LoadTarget {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl fmt::Display for LoadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Identity(name) => write!(f, "{}", name),
        }
    }
}

/// Per-request loading parameters
#[derive(Debug, Clone, Default)]
pub struct LoadParams {
    /// Degree substituted into identity templates
    pub degree: Option<RelationshipDegree>,
    /// Size used for strategy selection instead of the file's own size
    pub size_hint: Option<u64>,
    /// Extra parameters folded into the cache fingerprint
    pub extra: FingerprintParams,
    pub cancel: Option<CancelToken>,
}

impl LoadParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_degree(mut self, degree: RelationshipDegree) -> Self {
        self.degree = Some(degree);
        self
    }

    pub fn with_size_hint(mut self, bytes: u64) -> Self {
        self.size_hint = Some(bytes);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra = self.extra.with(key, value);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Where full records come from for metadata-only results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DetailSource {
    /// Parsed records kept alongside the metadata
    Records(Vec<AssertionRecord>),
    /// Byte spans into the source file, re-read on demand
    Spans {
        path: PathBuf,
        size: u64,
        mtime_nanos: i128,
        spans: Vec<RecordSpan>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LoadedContent {
    Full {
        records: Vec<AssertionRecord>,
        metadata: Vec<RecordMetadata>,
    },
    Lazy {
        metadata: Vec<RecordMetadata>,
        detail: DetailSource,
    },
}

/// A loaded record set as held by the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedData {
    pub strategy: LoadStrategy,
    pub content: LoadedContent,
    /// Records skipped while parsing the source
    pub skipped: usize,
    /// Predicate and degree were reset by a compact snapshot
    pub lossy: bool,
}

impl LoadedData {
    pub fn records(&self) -> Option<&[AssertionRecord]> {
        match &self.content {
            LoadedContent::Full { records, .. } => Some(records),
            LoadedContent::Lazy { .. } => None,
        }
    }

    pub fn metadata(&self) -> &[RecordMetadata] {
        match &self.content {
            LoadedContent::Full { metadata, .. } | LoadedContent::Lazy { metadata, .. } => {
                metadata
            }
        }
    }

    pub fn len(&self) -> usize {
        self.metadata().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata().is_empty()
    }

    fn full(strategy: LoadStrategy, records: Vec<AssertionRecord>, skipped: usize) -> Self {
        let metadata = project_metadata(&records);
        Self {
            strategy,
            content: LoadedContent::Full { records, metadata },
            skipped,
            lossy: false,
        }
    }
}

impl Cacheable for LoadedData {
    fn estimated_bytes(&self) -> usize {
        let metadata: usize = self.metadata().iter().map(RecordMetadata::estimated_bytes).sum();
        let records: usize = match &self.content {
            LoadedContent::Full { records, .. }
            | LoadedContent::Lazy {
                detail: DetailSource::Records(records),
                ..
            } => records.iter().map(AssertionRecord::estimated_bytes).sum(),
            LoadedContent::Lazy {
                detail: DetailSource::Spans { spans, .. },
                ..
            } => spans.len() * std::mem::size_of::<RecordSpan>(),
        };
        metadata + records
    }
}

/// Fetches full records behind a metadata-only result
#[derive(Clone)]
pub struct DetailLoader {
    data: Arc<LoadedData>,
    index: Option<Arc<EdgeIndex>>,
}

impl fmt::Debug for DetailLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetailLoader")
            .field("records", &self.data.len())
            .field("indexed", &self.index.is_some())
            .finish()
    }
}

impl DetailLoader {
    /// Full record at `position`
    pub fn fetch(&self, position: usize) -> Result<AssertionRecord, LoadError> {
        let len = self.data.len();
        let missing = LoadError::RecordNotFound { position, len };

        match &self.data.content {
            LoadedContent::Full { records, .. }
            | LoadedContent::Lazy {
                detail: DetailSource::Records(records),
                ..
            } => records.get(position).cloned().ok_or(missing),
            LoadedContent::Lazy {
                detail:
                    DetailSource::Spans {
                        path,
                        size,
                        mtime_nanos,
                        spans,
                    },
                ..
            } => {
                let span = *spans.get(position).ok_or(missing)?;
                let current = SourceStamp::of(path).map_err(|e| LoadError::from_stat(path, e))?;
                if current.size != *size || current.mtime_nanos != *mtime_nanos {
                    return Err(LoadError::SourceChanged { path: path.clone() });
                }
                Ok(read_span(path, span)?)
            }
        }
    }

    /// Full record for a (subject, object) pair
    pub fn fetch_edge(&self, subject: &str, object: &str) -> Result<AssertionRecord, LoadError> {
        let position = match &self.index {
            Some(index) => index.lookup_edge(subject, object)?.position,
            None => {
                let key = edge_key_for(subject, object);
                self.data
                    .metadata()
                    .iter()
                    .position(|m| edge_key_for(&m.subject_name, &m.object_name) == key)
                    .ok_or_else(|| IndexError::EdgeNotFound {
                        subject: subject.to_string(),
                        object: object.to_string(),
                    })?
            }
        };
        self.fetch(position)
    }
}

/// Wall-clock timings of a load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadTiming {
    pub total: Duration,
    /// Time spent reading the source; `None` when served from cache
    pub source: Option<Duration>,
}

/// Non-fatal conditions encountered during a load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadWarnings {
    pub skipped_records: usize,
    /// Fields reset by a compact snapshot
    pub lossy_fields: Vec<&'static str>,
    /// Disk-cache failures during this load
    pub cache_io_warnings: u64,
}

impl LoadWarnings {
    pub fn is_empty(&self) -> bool {
        self.skipped_records == 0 && self.lossy_fields.is_empty() && self.cache_io_warnings == 0
    }
}

/// Uniform result of a load
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub success: bool,
    pub message: String,
    pub error: Option<LoadErrorKind>,
    pub strategy: Option<LoadStrategy>,
    pub source: Option<PathBuf>,
    pub data: Option<Arc<LoadedData>>,
    /// Present for metadata-only strategies
    pub detail: Option<DetailLoader>,
    pub index: Option<Arc<EdgeIndex>>,
    /// `None` when the source was read for this call
    pub from_cache: Option<CacheOrigin>,
    pub timing: LoadTiming,
    pub warnings: LoadWarnings,
}

impl LoadResult {
    fn failure(target: &LoadTarget, error: &LoadError, elapsed: Duration) -> Self {
        Self {
            success: false,
            message: format!("Failed to load {}: {}", target, error),
            error: Some(error.kind()),
            strategy: None,
            source: None,
            data: None,
            detail: None,
            index: None,
            from_cache: None,
            timing: LoadTiming {
                total: elapsed,
                source: None,
            },
            warnings: LoadWarnings::default(),
        }
    }

    pub fn records(&self) -> Option<&[AssertionRecord]> {
        self.data.as_deref().and_then(LoadedData::records)
    }

    pub fn metadata(&self) -> &[RecordMetadata] {
        self.data.as_deref().map(LoadedData::metadata).unwrap_or(&[])
    }

    pub fn record_count(&self) -> usize {
        self.metadata().len()
    }

    pub fn is_cache_hit(&self) -> bool {
        self.from_cache.is_some()
    }

    /// Find the edge `subject → object`.
    ///
    /// Uses the edge index when one was built, otherwise scans the loaded metadata.
    pub fn lookup_edge(&self, subject: &str, object: &str) -> Result<EdgeIndexEntry, IndexError> {
        if let Some(index) = &self.index {
            return index.lookup_edge(subject, object).cloned();
        }
        let key = edge_key_for(subject, object);
        self.metadata()
            .iter()
            .enumerate()
            .find(|(_, m)| edge_key_for(&m.subject_name, &m.object_name) == key)
            .map(|(position, m)| EdgeIndexEntry::from_source(position, m))
            .ok_or_else(|| IndexError::EdgeNotFound {
                subject: subject.to_string(),
                object: object.to_string(),
            })
    }
}

/// Loads record sets, with an optional cache and edge index provider
pub struct RecordLoader {
    settings: LoaderSettings,
    resolver: SourceResolver,
    cache: Option<Arc<CacheManager<LoadedData>>>,
    index_provider: Option<Arc<dyn EdgeIndexProvider>>,
    source_loads: AtomicU64,
}

impl RecordLoader {
    pub fn new(settings: LoaderSettings) -> Self {
        Self {
            settings,
            resolver: SourceResolver::default(),
            cache: None,
            index_provider: None,
            source_loads: AtomicU64::new(0),
        }
    }

    pub fn with_resolver(mut self, resolver: SourceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_cache(mut self, cache: Arc<CacheManager<LoadedData>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_index_provider(mut self, provider: Arc<dyn EdgeIndexProvider>) -> Self {
        self.index_provider = Some(provider);
        self
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    pub fn cache(&self) -> Option<&Arc<CacheManager<LoadedData>>> {
        self.cache.as_ref()
    }

    /// Number of times a source (or snapshot) was actually read
    pub fn source_loads(&self) -> u64 {
        self.source_loads.load(Ordering::SeqCst)
    }

    pub fn resolve(&self, target: &LoadTarget, params: &LoadParams) -> PathBuf {
        match target {
            LoadTarget::Path(path) => path.clone(),
            LoadTarget::Identity(name) => self.resolver.resolve(name, params.degree),
        }
    }

    /// Strategy a load of `path` would use right now
    pub fn plan(&self, path: &Path, params: &LoadParams) -> Result<LoadStrategy, LoadError> {
        let stamp = SourceStamp::of(path).map_err(|e| LoadError::from_stat(path, e))?;
        Ok(self.plan_for(&stamp, params))
    }

    fn plan_for(&self, stamp: &SourceStamp, params: &LoadParams) -> LoadStrategy {
        let fresh = self.settings.prefer_snapshot
            && snapshot_is_fresh(stamp, &snapshot_path_for(&stamp.path));
        select_strategy(
            params.size_hint.unwrap_or(stamp.size),
            fresh,
            self.settings.thresholds,
        )
    }

    /// Load, reporting failures in the result instead of as an error
    pub fn load(&self, target: impl Into<LoadTarget>, params: &LoadParams) -> LoadResult {
        let target = target.into();
        let started = Instant::now();
        match self.try_load(target.clone(), params) {
            Ok(result) => result,
            Err(e) => {
                warn!("Load of {} failed: {}", target, e);
                LoadResult::failure(&target, &e, started.elapsed())
            }
        }
    }

    pub fn try_load(
        &self,
        target: impl Into<LoadTarget>,
        params: &LoadParams,
    ) -> Result<LoadResult, LoadError> {
        let target = target.into();
        let started = Instant::now();
        if params.is_cancelled() {
            return Err(LoadError::Cancelled { records: 0 });
        }

        let path = self.resolve(&target, params);
        let stamp = SourceStamp::of(&path).map_err(|e| LoadError::from_stat(&path, e))?;
        let strategy = self.plan_for(&stamp, params);
        debug!("Selected {} strategy for {:?}", strategy, stamp.path);

        let mut fp_params = params.extra.clone().with("strategy", strategy.as_str());
        if let Some(degree) = params.degree {
            fp_params = fp_params.with("degree", degree.as_str());
        }
        if strategy == LoadStrategy::Snapshot {
            // A rebuilt snapshot must not be served from entries keyed on the old one
            let snapshot = snapshot_path_for(&stamp.path);
            let meta =
                std::fs::metadata(&snapshot).map_err(|e| LoadError::from_stat(&snapshot, e))?;
            let modified = meta
                .modified()
                .map_err(|e| LoadError::from_stat(&snapshot, e))?;
            fp_params = fp_params
                .with("snapshot_size", meta.len())
                .with("snapshot_mtime", system_time_nanos(modified));
        }
        let fingerprint = CacheFingerprint::from_stamp(stamp, &fp_params);

        let io_before = self.cache_io_warnings();
        let mut source_time = None;
        let mut load_source = || {
            let load_started = Instant::now();
            let data = self.load_source(fingerprint.stamp(), strategy, params);
            source_time = Some(load_started.elapsed());
            data
        };

        let (data, from_cache) = match &self.cache {
            Some(cache) => {
                let cached = cache.get_or_load(&fingerprint, load_source)?;
                let origin = match cached.origin {
                    CacheOrigin::Loaded => None,
                    hit => Some(hit),
                };
                (cached.payload, origin)
            }
            None => (Arc::new(load_source()?), None),
        };

        let index = self.index_provider.as_ref().map(|provider| {
            Arc::new(match data.records() {
                Some(records) => provider.index_records(records),
                None => provider.index_metadata(data.metadata()),
            })
        });

        let detail = (!data.strategy.is_full()).then(|| DetailLoader {
            data: Arc::clone(&data),
            index: index.clone(),
        });

        let warnings = LoadWarnings {
            skipped_records: data.skipped,
            lossy_fields: if data.lossy {
                LOSSY_FIELDS.to_vec()
            } else {
                Vec::new()
            },
            cache_io_warnings: self.cache_io_warnings().saturating_sub(io_before),
        };
        if data.lossy {
            warn!(
                "Snapshot for {:?} is compact; {} were reset to defaults",
                fingerprint.source_path(),
                LOSSY_FIELDS.join(", ")
            );
        }

        let message = format!(
            "Loaded {} records from {} ({}{})",
            data.len(),
            fingerprint.source_path().display(),
            data.strategy,
            match from_cache {
                Some(CacheOrigin::Memory) => ", memory cache",
                Some(CacheOrigin::Disk) => ", disk cache",
                _ => "",
            }
        );
        info!("{}", message);

        Ok(LoadResult {
            success: true,
            message,
            error: None,
            strategy: Some(data.strategy),
            source: Some(fingerprint.source_path().to_path_buf()),
            detail,
            index,
            from_cache,
            timing: LoadTiming {
                total: started.elapsed(),
                source: source_time,
            },
            warnings,
            data: Some(data),
        })
    }

    fn cache_io_warnings(&self) -> u64 {
        self.cache
            .as_ref()
            .map(|cache| cache.io_warnings())
            .unwrap_or(0)
    }

    /// Read the source with the chosen strategy
    fn load_source(
        &self,
        stamp: &SourceStamp,
        strategy: LoadStrategy,
        params: &LoadParams,
    ) -> Result<LoadedData, LoadError> {
        self.source_loads.fetch_add(1, Ordering::SeqCst);
        let path = stamp.path.as_path();

        let data = match strategy {
            LoadStrategy::Snapshot => {
                let snapshot = snapshot_path_for(path);
                let (records, lossy) = read_snapshot(&snapshot)?.into_records()?;
                LoadedData {
                    lossy,
                    ..LoadedData::full(strategy, records, 0)
                }
            }
            LoadStrategy::FullEager => {
                let (records, skipped) = self.parse_whole(path, params)?;
                LoadedData::full(strategy, records, skipped)
            }
            LoadStrategy::LazyMetadata => {
                let (records, skipped) = self.parse_whole(path, params)?;
                LoadedData {
                    strategy,
                    content: LoadedContent::Lazy {
                        metadata: project_metadata(&records),
                        detail: DetailSource::Records(records),
                    },
                    skipped,
                    lossy: false,
                }
            }
            LoadStrategy::Streaming => self.stream_metadata(stamp, params)?,
        };

        if data.is_empty() {
            return Err(LoadError::EmptyOrInvalid {
                path: path.to_path_buf(),
                skipped: data.skipped,
            });
        }
        if data.skipped > 0 {
            warn!("Skipped {} malformed records in {:?}", data.skipped, path);
        }
        Ok(data)
    }

    /// Parse a whole document, falling back to the tolerant scanner when the document
    /// itself is not valid JSON
    fn parse_whole(
        &self,
        path: &Path,
        params: &LoadParams,
    ) -> Result<(Vec<AssertionRecord>, usize), LoadError> {
        match read_records(path) {
            Ok(report) => {
                let skipped = report.skipped();
                Ok((report.records, skipped))
            }
            Err(InterchangeError::NotFound(path)) => Err(LoadError::NotFound { path }),
            Err(InterchangeError::Io(e)) => Err(LoadError::Io(e)),
            Err(e) => {
                warn!(
                    "{:?} is not a well-formed document ({}); recovering records by scanning",
                    path, e
                );
                let output = ChunkParser::open(path, self.settings.chunk_size)?
                    .collect(params.cancel.as_ref())?;
                let skipped = output.summary.skipped();
                Ok((output.records, skipped))
            }
        }
    }

    /// Stream the source, keeping only metadata and record spans
    fn stream_metadata(
        &self,
        stamp: &SourceStamp,
        params: &LoadParams,
    ) -> Result<LoadedData, LoadError> {
        let mut metadata = Vec::new();
        let mut spans = Vec::new();

        let mut parser = ChunkParser::open(&stamp.path, self.settings.chunk_size)?;
        let summary = parser.process(params.cancel.as_ref(), |chunk, progress| {
            for record in &chunk.records {
                metadata.push(RecordMetadata::from_record(metadata.len(), record));
            }
            spans.extend(chunk.spans);
            debug!(
                "Chunk {}: {} records so far ({} bytes)",
                progress.chunk_index, progress.records_so_far, progress.bytes_read
            );
        })?;

        Ok(LoadedData {
            strategy: LoadStrategy::Streaming,
            content: LoadedContent::Lazy {
                metadata,
                detail: DetailSource::Spans {
                    path: stamp.path.clone(),
                    size: stamp.size,
                    mtime_nanos: stamp.mtime_nanos,
                    spans,
                },
            },
            skipped: summary.skipped(),
            lossy: false,
        })
    }
}

impl Default for RecordLoader {
    fn default() -> Self {
        Self::new(LoaderSettings::default())
    }
}
