use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_indexed: AtomicU64,
    documents_empty: AtomicU64,
    documents_failed: AtomicU64,
    chunks_indexed: AtomicU64,
    chunks_degraded: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an indexed document, its chunk count, and how many chunks carry placeholder vectors.
    pub fn record_indexed(&self, chunk_count: u64, degraded: u64) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
        self.chunks_degraded.fetch_add(degraded, Ordering::Relaxed);
    }

    /// Record a document that produced nothing to index.
    pub fn record_empty(&self) {
        self.documents_empty.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document whose pipeline run failed.
    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            documents_empty: self.documents_empty.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            chunks_degraded: self.chunks_degraded.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents written to the index.
    pub documents_indexed: u64,
    /// Documents that produced no pages or no chunks.
    pub documents_empty: u64,
    /// Documents whose pipeline run failed.
    pub documents_failed: u64,
    /// Chunks written across all indexed documents.
    pub chunks_indexed: u64,
    /// Chunks written with a zero-vector placeholder.
    pub chunks_degraded: u64,
}
