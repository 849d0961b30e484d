use std::{collections::BTreeMap, fmt, sync::Arc};
use bitflags::bitflags;
use derive_more::{Display, From, Into};
use memory::AddressSpace;
use numa_topology::NodeMask;
use spin::RwLock;

/// A task identifier. [`Pid::SELF`] names the calling task.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct Pid(i32);

impl Pid {
    pub const SELF: Pid = Pid(0);

    pub const fn new(pid: i32) -> Pid {
        Pid(pid)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// May move pages that other processes also map.
        const SYS_NICE   = 1 << 0;
        /// May inspect and modify any other task.
        const SYS_PTRACE = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub caps: Capabilities,
}

/// The parts of a task that page placement cares about.
pub struct Task {
    pid: Pid,
    creds: Credentials,
    /// The nodes this task may allocate memory on.
    mems_allowed: NodeMask,
    /// `None` for kernel threads.
    mm: Option<Arc<AddressSpace>>,
}

impl Task {
    pub fn new(pid: Pid, creds: Credentials, mems_allowed: NodeMask, mm: Option<Arc<AddressSpace>>) -> Task {
        Task { pid, creds, mems_allowed, mm }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn credentials(&self) -> Credentials {
        self.creds
    }

    pub fn mems_allowed(&self) -> NodeMask {
        self.mems_allowed
    }

    pub fn address_space(&self) -> Option<&Arc<AddressSpace>> {
        self.mm.as_ref()
    }

    /// Whether this task may read the state of `target`:
    /// always for itself, for tasks of the same user, or with [`Capabilities::SYS_PTRACE`].
    pub fn ptrace_may_access(&self, target: &Task) -> bool {
        self.pid == target.pid
            || self.creds.uid == target.creds.uid
            || self.creds.caps.contains(Capabilities::SYS_PTRACE)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Task")
            .field("pid", &self.pid)
            .field("uid", &self.creds.uid)
            .field("mems_allowed", &self.mems_allowed)
            .field("mm", &self.mm.as_ref().map(|mm| mm.id()))
            .finish()
    }
}

/// All tasks, by pid.
#[derive(Default)]
pub struct TaskTable {
    tasks: RwLock<BTreeMap<Pid, Arc<Task>>>,
}

impl TaskTable {
    pub fn insert(&self, task: Task) -> Result<Arc<Task>, &'static str> {
        if task.pid == Pid::SELF {
            return Err("pid 0 is reserved for the calling task");
        }
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&task.pid) {
            return Err("a task with that pid already exists");
        }
        let task = Arc::new(task);
        tasks.insert(task.pid, task.clone());
        Ok(task)
    }

    pub fn remove(&self, pid: Pid) -> Option<Arc<Task>> {
        self.tasks.write().remove(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Task>> {
        self.tasks.read().get(&pid).cloned()
    }
}
