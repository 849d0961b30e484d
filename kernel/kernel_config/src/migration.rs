//! Pass limits and batching sizes used by the migration engine.

/// The number of passes the serial migration path makes over its list
/// before it gives up on pages that keep failing with a retryable error.
pub const NR_MIGRATE_PASSES: usize = 10;

/// The number of passes the concurrent (batched) migration path makes.
/// Pass 0 never blocks on a page lock; later passes may.
pub const NR_CONCUR_PASSES: usize = 3;

/// The serial path starts taking page locks in blocking mode
/// once the pass number exceeds this value.
pub const FORCE_AFTER_PASS: usize = 2;

/// Query-mode `move_pages` looks up addresses in chunks of this many entries.
pub const DO_PAGES_STAT_CHUNK_NR: usize = 16;

/// The default number of worker threads used by the multi-threaded copy backend.
pub const DEFAULT_COPY_THREADS: usize = 4;

/// The number of request slots in the DMA offload channel's submission ring.
pub const DMA_RING_SLOTS: usize = 16;

const_assert!(NR_CONCUR_PASSES >= 1);
const_assert!(FORCE_AFTER_PASS < NR_MIGRATE_PASSES);
const_assert!(DO_PAGES_STAT_CHUNK_NR > 0);
const_assert!(DEFAULT_COPY_THREADS > 0);
