#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    /// Start (or keep polling) an acquire.
    Checkout,
    Release,
    Insert,
    Select,
    Commit,
    Rollback,
    /// `execute_script`; commits any open transaction first.
    Ddl,
    /// A statement that must fail without poisoning the connection.
    Fail,
    Clear,
    Sleep(u64),
}

/// What the simulator believes about one logical task.
#[derive(Debug, Clone)]
pub(crate) struct TaskState {
    pub(crate) id: usize,
    pub(crate) conn_id: Option<u64>,
    pub(crate) waiting: bool,
    pub(crate) in_tx: bool,
}

impl TaskState {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            conn_id: None,
            waiting: false,
            in_tx: false,
        }
    }

    pub(crate) fn forget_connection(&mut self) {
        self.conn_id = None;
        self.in_tx = false;
    }
}
