use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::connection::Connection;
use crate::driver::Driver;

/// Bookkeeping shared by every pool operation; only touched under the state lock.
pub(crate) struct PoolState<D: Driver> {
    pub(crate) free: VecDeque<Connection<D>>,
    pub(crate) used: HashMap<u64, Connection<D>>,
    /// Ids force-closed by `terminate`; releasing one is a no-op.
    pub(crate) terminated: HashSet<u64>,
    /// Connections currently being opened.
    pub(crate) acquiring: usize,
    pub(crate) closing: bool,
    pub(crate) closed: bool,
}

impl<D: Driver> PoolState<D> {
    pub(crate) fn new() -> Self {
        Self {
            free: VecDeque::new(),
            used: HashMap::new(),
            terminated: HashSet::new(),
            acquiring: 0,
            closing: false,
            closed: false,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.free.len() + self.used.len() + self.acquiring
    }

    pub(crate) fn status(&self, minsize: usize, maxsize: usize) -> PoolStatus {
        PoolStatus {
            size: self.size(),
            freesize: self.free.len(),
            used: self.used.len(),
            acquiring: self.acquiring,
            minsize,
            maxsize,
            closing: self.closing,
            closed: self.closed,
        }
    }
}

/// Point-in-time view of a pool's counters.
///
/// `freesize + used + acquiring == size` holds for every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub size: usize,
    pub freesize: usize,
    pub used: usize,
    pub acquiring: usize,
    pub minsize: usize,
    pub maxsize: usize,
    pub closing: bool,
    pub closed: bool,
}
