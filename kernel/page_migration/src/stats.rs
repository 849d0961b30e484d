use core::sync::atomic::{AtomicUsize, Ordering};

/// Totals of frames migrated and frames that could not be migrated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrationEvents {
    pub pgmigrate_success: usize,
    pub pgmigrate_fail: usize,
}

/// How many items went through each stage of the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrationBreakdown {
    /// Items whose slots were replaced with migration placeholders.
    pub unmapped: usize,
    /// Items whose owner and page-cache slots were switched to the destination.
    pub mappings_changed: usize,
    /// Items whose content and state were copied.
    pub units_copied: usize,
    /// Items whose placeholders were replaced with slots to the destination.
    pub remapped: usize,
    /// Isolated frames returned to their LRU lists without being migrated.
    pub put_back: usize,
    /// Items the concurrent path handed to the serial path.
    pub delegated: usize,
}

impl MigrationBreakdown {
    /// The counts accumulated since `earlier` was taken.
    pub fn since(&self, earlier: &MigrationBreakdown) -> MigrationBreakdown {
        MigrationBreakdown {
            unmapped: self.unmapped - earlier.unmapped,
            mappings_changed: self.mappings_changed - earlier.mappings_changed,
            units_copied: self.units_copied - earlier.units_copied,
            remapped: self.remapped - earlier.remapped,
            put_back: self.put_back - earlier.put_back,
            delegated: self.delegated - earlier.delegated,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Stage {
    Unmapped,
    MappingChanged,
    Copied,
    Remapped,
    PutBack,
    Delegated,
}

#[derive(Default)]
pub(crate) struct Counters {
    success: AtomicUsize,
    fail: AtomicUsize,
    stages: [AtomicUsize; 6],
}

impl Counters {
    pub(crate) fn count_events(&self, succeeded: usize, failed: usize) {
        self.success.fetch_add(succeeded, Ordering::Relaxed);
        self.fail.fetch_add(failed, Ordering::Relaxed);
    }

    pub(crate) fn bump(&self, stage: Stage, count: usize) {
        self.stages[stage as usize].fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn events(&self) -> MigrationEvents {
        MigrationEvents {
            pgmigrate_success: self.success.load(Ordering::Relaxed),
            pgmigrate_fail: self.fail.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn breakdown(&self) -> MigrationBreakdown {
        let stage = |s: Stage| self.stages[s as usize].load(Ordering::Relaxed);
        MigrationBreakdown {
            unmapped: stage(Stage::Unmapped),
            mappings_changed: stage(Stage::MappingChanged),
            units_copied: stage(Stage::Copied),
            remapped: stage(Stage::Remapped),
            put_back: stage(Stage::PutBack),
            delegated: stage(Stage::Delegated),
        }
    }
}
