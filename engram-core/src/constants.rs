//! Global constants, grounded on `memory-core::constants`'s `defaults` module
//! pattern of centralizing magic numbers.

use std::time::Duration;

/// Episode/chunk/search tuning knobs.
pub mod retrieval {
    /// Hybrid score weighting: vector component.
    pub const VECTOR_WEIGHT: f32 = 0.7;
    /// Hybrid score weighting: normalized-BM25 component.
    pub const BM25_WEIGHT: f32 = 0.3;
    /// Half-life, in days, of the temporal-decay curve.
    pub const DECAY_HALF_LIFE_DAYS: f64 = 30.0;
    /// Default MMR diversity trade-off (relevance vs. novelty).
    pub const MMR_LAMBDA: f32 = 0.7;
    /// Similarity above which an episode merge is performed instead of insert.
    pub const MERGE_SIMILARITY_THRESHOLD: f32 = 0.92;
    /// Reciprocal-rank-fusion smoothing constant.
    pub const RRF_K: f64 = 60.0;
    /// RRF weight for the BM25 rank list.
    pub const RRF_WEIGHT_BM25: f64 = 0.4;
    /// RRF weight for the vector-similarity rank list.
    pub const RRF_WEIGHT_VECTOR: f64 = 1.0;
    /// RRF weight for the recency rank list.
    pub const RRF_WEIGHT_RECENCY: f64 = 0.6;
    /// RRF weight for the access-frequency rank list.
    pub const RRF_WEIGHT_ACCESS: f64 = 0.4;
    /// Additive fused-score bonus for high-importance candidates, expressed
    /// as an equivalent number of rank positions.
    pub const HIGH_IMPORTANCE_RANK_BONUS_POSITIONS: f64 = 10.0;
    /// Recollector vector-similarity floor below which a fused candidate is
    /// dropped even if its rank fusion score would otherwise qualify.
    pub const RECOLLECTOR_MIN_VECTOR_SIMILARITY: f32 = 0.25;
    /// Recollector topic-gate cosine threshold.
    pub const DEFAULT_TOPIC_THRESHOLD: f32 = 0.85;
    /// Episode-retrieval relevance floor for high-importance episodes.
    pub const HIGH_IMPORTANCE_RELEVANCE_FLOOR: f32 = 0.3;
    /// Maximum FTS query terms after stop-word removal.
    pub const MAX_QUERY_TERMS: usize = 20;
    /// Size of the recently-accessed-episode candidate pool.
    pub const RECENT_EPISODE_POOL_SIZE: usize = 200;
    /// Maximum BM25 hits pulled per recollection pass.
    pub const MAX_BM25_HITS: usize = 50;
    /// Number of bites written per recollection.
    pub const RECOLLECTION_TOP_K: usize = 3;
}

/// Episode lifecycle thresholds.
pub mod lifecycle {
    /// Episode summary length cap (chars).
    pub const MAX_SUMMARY_LEN: usize = 500;
    /// Episode full-content length cap (chars).
    pub const MAX_FULL_CONTENT_LEN: usize = 4000;
    /// Max entities per episode.
    pub const MAX_ENTITIES: usize = 20;
    /// Days of zero access after which a normal-importance episode is
    /// compressed (full_content nulled).
    pub const COMPRESSION_AGE_DAYS: i64 = 30;
    /// Minimum access count for graduation eligibility.
    pub const GRADUATION_MIN_ACCESS_COUNT: i64 = 3;
    /// Minimum age, in days, for graduation eligibility.
    pub const GRADUATION_MIN_AGE_DAYS: i64 = 14;
    /// Maximum graduations written per consolidation cycle.
    pub const MAX_GRADUATIONS_PER_CYCLE: usize = 10;
}

/// Tailer/extraction timing knobs.
pub mod tailer {
    use super::Duration;

    /// Max bytes read per tailer drain iteration.
    pub const MAX_READ_CHUNK_BYTES: usize = 4 * 1024 * 1024;
    /// Max drain iterations serviced per watch event.
    pub const MAX_DRAIN_ITERATIONS: usize = 10;
    /// Filesystem-watch debounce.
    pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(200);
    /// Ring buffer of recently-seen messages kept for context.
    pub const RING_BUFFER_SIZE: usize = 50;
    /// Hard cap on the extraction buffer; oldest entries are shifted out.
    pub const EXTRACTION_BUFFER_CAP: usize = 100;
    /// Messages-since-extraction threshold before the first extraction.
    pub const INITIAL_EXTRACTION_THRESHOLD: usize = 5;
    /// Messages-since-extraction threshold after the first extraction.
    pub const STEADY_STATE_EXTRACTION_THRESHOLD: usize = 15;
    /// Time-based extraction trigger.
    pub const EXTRACTION_TIME_TRIGGER: Duration = Duration::from_secs(20 * 60);
    /// Warm-timer tick interval.
    pub const WARM_TIMER_INTERVAL: Duration = Duration::from_secs(60);
    /// Extraction backoff schedule after consecutive failures (seconds).
    pub const BACKOFF_SCHEDULE_SECS: &[u64] = &[15, 30, 60, 120];
    /// Max concurrent extractions across all sessions.
    pub const MAX_CONCURRENT_EXTRACTIONS: usize = 3;
    /// Bound on awaiting an in-flight extraction during stop.
    pub const STOP_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Coordination-fabric timing knobs.
pub mod coordination {
    use super::Duration;

    /// `FileLock` retry interval.
    pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);
    /// `FileLock` acquisition deadline before checking liveness of the
    /// existing holder.
    pub const LOCK_DEADLINE: Duration = Duration::from_secs(15);
    /// `PidGuard` max age before a PID file is considered stale enough to
    /// reclaim even if creation raced.
    pub const PID_MAX_AGE_DAYS: i64 = 30;
    /// `PidGuard` reclaim attempts.
    pub const PID_RECLAIM_ATTEMPTS: usize = 3;
    /// `StateStore` debounce window for `save_soon`.
    pub const STATE_SAVE_DEBOUNCE: Duration = Duration::from_secs(5);
    /// `StateStore` periodic flush interval.
    pub const STATE_PERIODIC_SAVE: Duration = Duration::from_secs(30);
    /// Busy-timeout used when opening the store connection.
    pub const DB_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
    /// Sleep before re-checking `schema_version` after a busy/locked
    /// migration attempt.
    pub const MIGRATION_RETRY_SLEEP: Duration = Duration::from_secs(6);
}

/// Daemon-level timing and resource knobs.
pub mod daemon {
    use super::Duration;

    /// Maintenance pass interval.
    pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
    /// Consolidation pass interval.
    pub const CONSOLIDATION_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);
    /// Tailers spawned per staggered batch at startup.
    pub const STARTUP_BATCH_SIZE: usize = 3;
    /// Delay between staggered startup batches.
    pub const STARTUP_BATCH_DELAY: Duration = Duration::from_secs(3);
    /// Max age of a transcript file before its tailer is evicted.
    pub const MAX_FILE_AGE_DAYS: i64 = 30;
    /// Bound applied to tailer-stop during shutdown.
    pub const SHUTDOWN_TAILER_TIMEOUT: Duration = Duration::from_secs(10);
    /// RSS, in bytes, at which the daemon logs a soft-memory warning.
    pub const MEMORY_WARN_BYTES: u64 = 300 * 1024 * 1024;
    /// RSS, in bytes, at which the daemon initiates a restart.
    pub const MEMORY_RESTART_BYTES: u64 = 400 * 1024 * 1024;
    /// Discovery walk depth for project roots.
    pub const PROJECT_DISCOVERY_DEPTH: usize = 4;
    /// Process exit code used when the soft-memory guard trips, signaling
    /// the surrounding supervisor to restart the daemon.
    pub const RESTART_EXIT_CODE: i32 = 75;
}
