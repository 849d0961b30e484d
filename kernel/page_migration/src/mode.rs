use bitflags::bitflags;
use page_copy::CopyMode;

/// How long a migration may wait for a busy frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncLevel {
    /// Never block: contended frames are retried, frames under writeback fail as busy.
    Async,
    /// Block on the page lock in later passes, but fail frames under writeback as busy.
    SyncLight,
    /// Block on the page lock in later passes and wait for writeback to finish.
    Sync,
}

bitflags! {
    /// Copy-related modifiers of a [`MigrateMode`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MigrateModeFlags: u8 {
        /// Copy with the multi-threaded backend.
        const MT           = 1 << 0;
        /// Copy with the DMA offload channel.
        const DMA          = 1 << 1;
        /// Move the mappings and state, but leave the content copy to the caller.
        const SYNC_NO_COPY = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MigrateMode {
    pub sync: SyncLevel,
    pub flags: MigrateModeFlags,
}

impl MigrateMode {
    pub const ASYNC: MigrateMode = MigrateMode::new(SyncLevel::Async);
    pub const SYNC_LIGHT: MigrateMode = MigrateMode::new(SyncLevel::SyncLight);
    pub const SYNC: MigrateMode = MigrateMode::new(SyncLevel::Sync);

    pub const fn new(sync: SyncLevel) -> MigrateMode {
        MigrateMode { sync, flags: MigrateModeFlags::empty() }
    }

    pub const fn with(self, flags: MigrateModeFlags) -> MigrateMode {
        MigrateMode { sync: self.sync, flags: self.flags.union(flags) }
    }

    pub fn contains(&self, flags: MigrateModeFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Whether the caller may wait for a page lock, given that `force` is set
    /// for passes after the first few.
    pub(crate) fn may_block_on_lock(&self, force: bool, reason: MigrateReason) -> bool {
        // compaction may run while the lock holder waits on an allocation
        force && self.sync != SyncLevel::Async && reason != MigrateReason::Compaction
    }

    /// The copy backend this mode asks for, before the migrator's settings are applied.
    pub(crate) fn copy_mode(&self) -> CopyMode {
        let mut copy = CopyMode::empty();
        if self.contains(MigrateModeFlags::MT) {
            copy |= CopyMode::MT;
        }
        if self.contains(MigrateModeFlags::DMA) {
            copy |= CopyMode::DMA;
        }
        copy
    }
}

impl Default for MigrateMode {
    fn default() -> MigrateMode {
        MigrateMode::SYNC
    }
}

/// Why frames are being migrated. Recorded on each destination frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MigrateReason {
    Compaction = 0,
    Syscall = 3,
    NumaMisplaced = 5,
}

impl MigrateReason {
    pub fn code(self) -> u8 {
        self as u8
    }
}
