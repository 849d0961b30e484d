use kernel_config::migration::{DEFAULT_COPY_THREADS, NR_CONCUR_PASSES, NR_MIGRATE_PASSES};

/// Runtime tunables of a [`Migrator`](crate::Migrator).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationSettings {
    /// Copy with the multi-threaded backend even when the caller did not ask for it.
    pub accel_page_copy: bool,
    /// When copying into a persistent-memory node, run the copy workers on the
    /// compute node nearest to it instead of next to the source.
    pub avoid_remote_pmem_write: bool,
    /// Worker threads per multi-threaded copy pool. Only read when the migrator is created.
    pub copy_threads: usize,
    /// Passes of the concurrent path before leftovers go to the serial path.
    pub concur_passes: usize,
    /// Passes of the serial path before retryable frames count as failed.
    pub serial_passes: usize,
}

impl Default for MigrationSettings {
    fn default() -> MigrationSettings {
        MigrationSettings {
            accel_page_copy: true,
            avoid_remote_pmem_write: false,
            copy_threads: DEFAULT_COPY_THREADS,
            concur_passes: NR_CONCUR_PASSES,
            serial_passes: NR_MIGRATE_PASSES,
        }
    }
}

impl MigrationSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.copy_threads == 0 {
            return Err("copy_threads must be at least 1");
        }
        if self.concur_passes == 0 || self.serial_passes == 0 {
            return Err("migration needs at least one pass");
        }
        Ok(())
    }
}
