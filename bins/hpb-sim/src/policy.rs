//! Device-side activation policy model.
//!
//! Real HPB devices decide which sub-regions the host should cache and
//! announce the decisions in completion status blocks. This model keeps a
//! read counter per sub-region: a sub-region crossing the activation
//! threshold gets an activate entry, and when the device-side active set is
//! full the coldest member is inactivated to make room.

use std::collections::HashMap;
use ufshpb_core::report::{ReportBuilder, REPORT_LEN};

pub struct DevicePolicy {
    lun: u8,
    threshold: u64,
    set_limit: usize,
    reads: HashMap<u32, u64>,
    active: HashMap<u32, u64>,
}

impl DevicePolicy {
    pub fn new(lun: u8, threshold: u64, set_limit: usize) -> Self {
        Self {
            lun,
            threshold,
            set_limit,
            reads: HashMap::new(),
            active: HashMap::new(),
        }
    }

    /// Record a read of `id` and, if it tips the policy, produce the status
    /// block to piggyback on this completion.
    pub fn on_read(&mut self, id: u32) -> Option<[u8; REPORT_LEN]> {
        let count = self.reads.entry(id).or_insert(0);
        *count += 1;
        let count = *count;
        if let Some(hotness) = self.active.get_mut(&id) {
            *hotness = count;
            return None;
        }
        if count < self.threshold {
            return None;
        }

        let mut report = ReportBuilder::new(self.lun);
        if self.active.len() >= self.set_limit {
            let coldest = self
                .active
                .iter()
                .min_by_key(|&(_, &hotness)| hotness)
                .map(|(&victim, _)| victim)?;
            self.active.remove(&coldest);
            self.reads.remove(&coldest);
            report = report.inactivate(coldest as u16);
        }
        self.active.insert(id, count);
        Some(report.activate(id as u16, 0).build())
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}
