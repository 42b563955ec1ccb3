//! # ufshpb
//!
//! Host-side sub-region cache for UFS Host Performance Booster devices.
//!
//! This is the workspace root crate that re-exports core functionality.
//! For direct usage, depend on individual sub-crates:
//!
//! - [`ufshpb-core`] - The cache, report parser, command composer, and
//!   refill worker
//! - `hpb-sim` - Workload simulator binary
//!
//! [`ufshpb-core`]: ufshpb_core

pub use ufshpb_core::{
    cache, command, device, geometry, report, Activation, ActivationReport, DescriptorId,
    DirectRead, Error, HpbConfig, HpbController, HpbGeometry, HpbIo, HpbStats, NodeStatus,
    Occupancy, ReportOp, Result, Vendor, CDB_LEN,
};
