//! External device interface.
//!
//! Everything beyond this trait — the SCSI/UFS transport, the query
//! pipeline, the hardware — is someone else's problem. The cache only
//! needs descriptor reads at probe time, the reset-flag pair for the
//! initialization handshake, and a synchronous READ BUFFER execution for
//! the refill worker.

use crate::command::CDB_LEN;
use crate::Result;

/// Descriptor selector for [`HpbIo::read_descriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorId {
    /// Device descriptor (feature support, HPB version, control mode).
    Device,
    /// Geometry descriptor (region/sub-region sizes, device limits).
    Geometry,
    /// Unit descriptor of one logical unit (enablement, per-LU limits).
    Unit {
        /// Logical unit to query.
        lun: u8,
    },
}

/// Transport seam to the UFS device.
///
/// Implementations may block in [`read_buffer`](HpbIo::read_buffer); the
/// refill worker is the only caller and runs on its own thread. Descriptor
/// and flag queries are probe-time only.
pub trait HpbIo: Send + Sync {
    /// Read a raw descriptor. The returned buffer is decoded by
    /// [`HpbGeometry::from_descriptors`](crate::geometry::HpbGeometry::from_descriptors).
    fn read_descriptor(&self, id: DescriptorId) -> Result<Vec<u8>>;

    /// Set the HPB reset flag, asking the device to drop to a known
    /// baseline state.
    fn set_reset_flag(&self) -> Result<()>;

    /// Poll the HPB reset flag; `false` means the reset has completed.
    fn read_reset_flag(&self) -> Result<bool>;

    /// Execute a composed READ BUFFER command, filling `out` with one
    /// sub-region table. Errors are treated as retryable by the worker.
    fn read_buffer(&self, cdb: &[u8; CDB_LEN], out: &mut [u8]) -> Result<()>;
}
