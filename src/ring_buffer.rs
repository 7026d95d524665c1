// src/ring_buffer.rs
//! Bounded in-memory sink of recent diagnostic records.
//!
//! Keeps the last N handled faults for operator inspection (admin endpoints,
//! test assertions, crash dumps) without letting a burst of failing requests
//! grow memory without limit.
//!
//! # Design Principles
//!
//! - **Bounded memory**: Fixed maximum size regardless of error volume
//! - **FIFO eviction**: Oldest entries dropped first
//! - **Per-entry size caps**: No single error can dominate the buffer
//! - **RwLock-based**: Concurrent readers, exclusive writers
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use wellsense_errors::{ErrorResponsePolicy, RaisedError, RequestContext, RingBufferSink, RuntimeMode};
//!
//! // Max 1000 entries, 2KB per entry = 2MB total
//! let recent = RingBufferSink::new(1000, 2048);
//! let policy = ErrorResponsePolicy::new(RuntimeMode::Production, Arc::new(recent.clone()));
//!
//! policy.handle(&RaisedError::new("db timeout"), &RequestContext::new("GET", "/api/posts"));
//!
//! let last = &recent.get_recent(1)[0];
//! assert_eq!(last.message.as_ref(), "db timeout");
//! ```

use crate::{DiagnosticRecord, DiagnosticSink, ErrorKind, SinkError};
use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// A single retained record with bounded size.
///
/// Uses Arc<str> so `get_recent()` clones are refcount increments.
#[derive(Clone, Debug)]
pub struct RecentEntry {
    /// Unix timestamp when the record was stored
    pub timestamp: u64,
    /// Resolved response status
    pub status: u16,
    /// Classified kind
    pub kind: ErrorKind,
    /// Request method
    pub method: Arc<str>,
    /// Request path
    pub path: Arc<str>,
    /// Fault message
    pub message: Arc<str>,
    /// Authenticated caller, if any
    pub user_id: Option<Arc<str>>,
    /// Optional fields (code, name, stack, body) that fit in the entry budget
    pub fields: Arc<[(&'static str, Arc<str>)]>,
    /// Approximate size in bytes
    pub size_bytes: usize,
}

/// Fixed-size ring buffer with exact allocation (no growth).
struct RingBuffer {
    entries: Box<[Option<RecentEntry>]>,
    tail: usize,
    head: usize,
    len: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: std::iter::repeat_with(|| None)
                .take(capacity)
                .collect::<Box<[Option<RecentEntry>]>>(),
            tail: 0,
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, entry: RecentEntry) -> Option<RecentEntry> {
        let evicted = self.entries[self.tail].replace(entry);
        self.tail = (self.tail + 1) % self.entries.len();

        if self.len < self.entries.len() {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % self.entries.len();
        }

        evicted
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    fn iter(&self) -> impl DoubleEndedIterator<Item = &RecentEntry> {
        let head = self.head;
        let len = self.len;
        let cap = self.entries.len();

        (0..len).filter_map(move |i| {
            let idx = (head + i) % cap;
            self.entries[idx].as_ref()
        })
    }

    fn clear(&mut self) {
        for entry in self.entries.iter_mut() {
            *entry = None;
        }
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }
}

/// Ring buffer sink with bounded memory usage.
///
/// Clones share the same buffer, so one handle can be given to the policy
/// and another kept for reading.
#[derive(Clone)]
pub struct RingBufferSink {
    buffer: Arc<RwLock<RingBuffer>>,
    max_entries: usize,
    max_entry_bytes: usize,
    eviction_count: Arc<AtomicU64>,
}

impl RingBufferSink {
    /// Create a sink holding at most `max_entries` records of at most
    /// `max_entry_bytes` payload each. A zero capacity is raised to one.
    pub fn new(max_entries: usize, max_entry_bytes: usize) -> Self {
        let bounded_entries = max_entries.max(1);
        Self {
            buffer: Arc::new(RwLock::new(RingBuffer::new(bounded_entries))),
            max_entries: bounded_entries,
            max_entry_bytes,
            eviction_count: Arc::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    fn read_buffer(&self) -> RwLockReadGuard<'_, RingBuffer> {
        match self.buffer.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[inline]
    fn write_buffer(&self) -> RwLockWriteGuard<'_, RingBuffer> {
        match self.buffer.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Build a bounded entry. Budget goes to the message first, then path,
    /// then the optional fields in order until it runs out.
    fn create_entry(&self, record: &DiagnosticRecord<'_>) -> RecentEntry {
        let mut size = 0usize;
        let mut remaining = self.max_entry_bytes;

        let message = truncate_to_bytes(record.message(), remaining.min(512));
        size += message.len();
        remaining = remaining.saturating_sub(message.len());

        let path = truncate_to_bytes(record.path(), remaining.min(256));
        size += path.len();
        remaining = remaining.saturating_sub(path.len());

        let body = if record.body().is_null() {
            None
        } else {
            Some(record.body().to_string())
        };

        let candidates: [(&'static str, Option<&str>); 4] = [
            ("code", record.code()),
            ("name", record.name()),
            ("stack", record.stack_trace()),
            ("body", body.as_deref()),
        ];

        let mut fields: SmallVec<[(&'static str, Arc<str>); 4]> = SmallVec::new();
        for (key, value) in candidates {
            let Some(value) = value else { continue };
            if remaining == 0 {
                break;
            }
            let value = truncate_to_bytes(value, remaining.min(256));
            size += value.len();
            remaining = remaining.saturating_sub(value.len());
            fields.push((key, Arc::from(value.as_ref())));
        }

        RecentEntry {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
            status: record.status().as_u16(),
            kind: record.kind(),
            method: Arc::from(truncate_to_bytes(record.method(), 16).as_ref()),
            path: Arc::from(path.as_ref()),
            message: Arc::from(message.as_ref()),
            user_id: record
                .user_id()
                .map(|id| Arc::from(truncate_to_bytes(id, 64).as_ref())),
            fields: fields.into_vec().into_boxed_slice().into(),
            size_bytes: size,
        }
    }

    /// Get the N most recent entries, newest first.
    pub fn get_recent(&self, count: usize) -> Vec<RecentEntry> {
        let buffer = self.read_buffer();
        buffer.iter().rev().take(count).cloned().collect()
    }

    /// Get all entries, newest first.
    pub fn get_all(&self) -> Vec<RecentEntry> {
        let buffer = self.read_buffer();
        buffer.iter().rev().cloned().collect()
    }

    /// Get entries matching a predicate, oldest first.
    ///
    /// ```rust
    /// # use wellsense_errors::{ErrorKind, RingBufferSink};
    /// # let recent = RingBufferSink::new(100, 1024);
    /// let auth_failures = recent.get_filtered(|e| {
    ///     matches!(e.kind, ErrorKind::AuthTokenInvalid | ErrorKind::AuthTokenExpired)
    /// });
    /// # assert!(auth_failures.is_empty());
    /// ```
    pub fn get_filtered<F>(&self, predicate: F) -> Vec<RecentEntry>
    where
        F: Fn(&RecentEntry) -> bool,
    {
        let buffer = self.read_buffer();
        buffer.iter().filter(|e| predicate(e)).cloned().collect()
    }

    /// Number of stored entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.read_buffer().len()
    }

    /// True when nothing is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes (lower-bound estimate).
    pub fn payload_bytes(&self) -> usize {
        let buffer = self.read_buffer();
        buffer.iter().map(|e| e.size_bytes).sum()
    }

    /// Number of entries evicted since creation.
    #[inline]
    pub fn eviction_count(&self) -> u64 {
        self.eviction_count.load(Ordering::Relaxed)
    }

    /// Drop every entry. The eviction count is kept.
    pub fn clear(&self) {
        self.write_buffer().clear();
    }

    /// Maximum number of entries.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_entries
    }
}

impl DiagnosticSink for RingBufferSink {
    fn record(&self, record: &DiagnosticRecord<'_>) -> Result<(), SinkError> {
        let entry = self.create_entry(record);

        let mut buffer = self.write_buffer();
        if buffer.push(entry).is_some() {
            self.eviction_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Truncate string to maximum byte length, respecting UTF-8 boundaries.
fn truncate_to_bytes(s: &str, max_bytes: usize) -> Cow<'_, str> {
    if max_bytes == 0 {
        return Cow::Borrowed("");
    }
    if s.len() <= max_bytes {
        return Cow::Borrowed(s);
    }

    let indicator = "...[TRUNC]";
    if max_bytes <= indicator.len() {
        return Cow::Borrowed(&indicator[..max_bytes]);
    }
    let max_content = max_bytes - indicator.len();

    let mut idx = max_content;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }

    if idx == 0 {
        return Cow::Borrowed(indicator);
    }

    let mut out = String::with_capacity(idx + indicator.len());
    out.push_str(&s[..idx]);
    out.push_str(indicator);
    Cow::Owned(out)
}
