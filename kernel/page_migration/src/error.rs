use derive_more::Display;
use memory::RelocateError;

/// Why migrating a frame (or a whole request) failed.
///
/// Each kind corresponds to the errno reported for it in a `move_pages` status array.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum MigrateError {
    /// Transient contention: a lock was held, or an unexpected reference was found.
    #[display(fmt = "try again")]
    Again,
    /// The frame is busy and the current mode does not allow waiting for it.
    #[display(fmt = "frame is busy")]
    Busy,
    /// No destination frame could be allocated.
    #[display(fmt = "out of memory")]
    NoMem,
    /// The node cannot hold memory, or the frame must take another path.
    #[display(fmt = "no such device")]
    NoDev,
    /// The node is not allowed, or the frame is shared and the caller may not move it.
    #[display(fmt = "permission denied")]
    Access,
    /// The caller lacks the privilege for this request.
    #[display(fmt = "operation not permitted")]
    Perm,
    /// Nothing is mapped at the address.
    #[display(fmt = "no such page")]
    NoEnt,
    /// The address is outside any migratable area.
    #[display(fmt = "bad address")]
    Fault,
    /// The request itself is malformed.
    #[display(fmt = "invalid argument")]
    Inval,
    /// There is no such process.
    #[display(fmt = "no such process")]
    Srch,
    /// The frame's type cannot be migrated.
    #[display(fmt = "not supported")]
    NoSys,
}

impl MigrateError {
    /// Returns `true` for errors that a later pass may not hit again.
    pub fn is_retryable(self) -> bool {
        matches!(self, MigrateError::Again)
    }

    /// The positive errno value for this error.
    pub fn errno(self) -> i32 {
        match self {
            MigrateError::Perm   => 1,
            MigrateError::NoEnt  => 2,
            MigrateError::Srch   => 3,
            MigrateError::Again  => 11,
            MigrateError::NoMem  => 12,
            MigrateError::Access => 13,
            MigrateError::Fault  => 14,
            MigrateError::Busy   => 16,
            MigrateError::NoDev  => 19,
            MigrateError::Inval  => 22,
            MigrateError::NoSys  => 38,
        }
    }

    /// The negative errno value stored in status arrays and returned for failed requests.
    pub fn as_status(self) -> i32 {
        -self.errno()
    }
}

impl From<RelocateError> for MigrateError {
    fn from(e: RelocateError) -> MigrateError {
        match e {
            RelocateError::Again => MigrateError::Again,
            RelocateError::Busy => MigrateError::Busy,
        }
    }
}
