//! Host Performance Booster sub-region table cache.
//!
//! UFS devices with HPB let the host cache pieces of the device-internal
//! logical-to-physical translation table and attach the resolved physical
//! address (PPN) to ordinary reads, skipping a translation step on the
//! device. This crate implements the host side of that contract as an
//! explicit controller object: a fixed pool of table nodes, an activation
//! report processor fed from command completions, a background refill
//! worker, and a synchronous read-path lookup.
//!
//! The SCSI/UFS transport is out of scope; callers supply it through the
//! [`HpbIo`] trait.
//!
//! # Example
//!
//! ```
//! use ufshpb_core::report::{ActivationReport, ReportBuilder};
//!
//! let raw = ReportBuilder::new(0).activate(10, 0).build();
//! let report = ActivationReport::parse(&raw).expect("well-formed report");
//! assert_eq!(report.activations(), &[(10, 0)]);
//! ```

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod cache;
pub mod command;
pub mod device;
mod error;
pub mod geometry;
pub mod report;
mod worker;

pub use cache::{Activation, NodeStatus, Occupancy};
pub use command::{DirectRead, Vendor, CDB_LEN};
pub use device::{DescriptorId, HpbIo};
pub use error::{Error, Result};
pub use geometry::HpbGeometry;
pub use report::{ActivationReport, ReportOp};

use cache::SubregionCache;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use worker::WorkSignal;

/// Polls of the reset flag before probe gives up.
const RESET_POLL_LIMIT: u32 = 10;

/// Controller configuration, fixed at probe time.
#[derive(Debug, Clone)]
pub struct HpbConfig {
    /// Vendor family selecting command encodings and quirks.
    pub vendor: Vendor,
    /// Logical unit this controller serves.
    pub lun: u8,
    /// Override for the node pool capacity; defaults to the limit the
    /// unit descriptor reports.
    pub capacity_override: Option<usize>,
    /// Run the refill worker on its own thread. Disable to drain refills
    /// manually with [`HpbController::run_refills`] (deterministic tests,
    /// single-threaded embedding).
    pub background_refill: bool,
}

impl Default for HpbConfig {
    fn default() -> Self {
        Self {
            vendor: Vendor::default(),
            lun: 0,
            capacity_override: None,
            background_refill: true,
        }
    }
}

#[derive(Default)]
struct Counters {
    reads_total: AtomicU64,
    read_hits: AtomicU64,
    read_buffer_ok: AtomicU64,
    read_buffer_failed: AtomicU64,
    activated: AtomicU64,
    inactivated: AtomicU64,
    dropped_activations: AtomicU64,
    malformed_reports: AtomicU64,
    stale_refills: AtomicU64,
}

/// Snapshot of the controller counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HpbStats {
    /// Hint-eligible reads seen by the read path.
    pub reads_total: u64,
    /// Reads that got a PPN attached.
    pub read_hits: u64,
    /// Successful refill reads.
    pub read_buffer_ok: u64,
    /// Failed refill reads (retried later).
    pub read_buffer_failed: u64,
    /// Activation entries that claimed a node.
    pub activated: u64,
    /// Inactivation entries that evicted a node.
    pub inactivated: u64,
    /// Activations dropped because the pool was exhausted.
    pub dropped_activations: u64,
    /// Status blocks that failed validation.
    pub malformed_reports: u64,
    /// Refill results dropped because the node was recycled mid-read.
    pub stale_refills: u64,
}

impl HpbStats {
    /// Hit rate over hint-eligible reads, in percent.
    #[must_use]
    pub fn hit_percent(&self) -> f64 {
        if self.reads_total == 0 {
            0.0
        } else {
            self.read_hits as f64 / self.reads_total as f64 * 100.0
        }
    }
}

/// Shared controller internals: everything the worker thread needs.
pub(crate) struct Engine {
    geometry: HpbGeometry,
    vendor: Vendor,
    lun: u8,
    io: Arc<dyn HpbIo>,
    cache: Mutex<SubregionCache>,
    pub(crate) signal: WorkSignal,
    enabled: AtomicBool,
    counters: Counters,
}

impl Engine {
    /// Drain the refill queue: one blocking READ BUFFER per queued node,
    /// lock dropped around the I/O. The pass is bounded by the queue
    /// length observed at entry, so nodes re-queued after a failed read
    /// wait for the next pass instead of spinning this one.
    pub(crate) fn drain_refills(&self) {
        let budget = self.cache.lock().refill_len();
        let table_size = self.geometry.table_size();
        let mut scratch = vec![0u8; table_size];
        for _ in 0..budget {
            if self.signal.is_shutdown() || self.signal.is_suspended() {
                break;
            }
            let Some(ticket) = self.cache.lock().pop_refill() else {
                break;
            };
            let cdb = self.vendor.read_buffer_cdb(ticket.subregion_id, 0, table_size as u32);
            match self.io.read_buffer(&cdb, &mut scratch) {
                Ok(()) => {
                    self.counters.read_buffer_ok.fetch_add(1, Ordering::Relaxed);
                    if self.cache.lock().complete_refill(&ticket, &scratch) {
                        trace!(id = ticket.subregion_id, "sub-region table refilled");
                    } else {
                        self.counters.stale_refills.fetch_add(1, Ordering::Relaxed);
                        debug!(id = ticket.subregion_id, "dropping refill result for recycled node");
                    }
                }
                Err(e) => {
                    self.counters.read_buffer_failed.fetch_add(1, Ordering::Relaxed);
                    error!(id = ticket.subregion_id, error = %e, "read buffer failed, will retry");
                    self.cache.lock().requeue(&ticket);
                }
            }
        }
    }
}

/// Per-unit HPB controller: node pool, activation processing, refill
/// scheduling, and read-path lookup behind one short-held lock.
pub struct HpbController {
    inner: Arc<Engine>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl core::fmt::Debug for HpbController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HpbController").finish_non_exhaustive()
    }
}

fn reset_handshake(io: &dyn HpbIo) -> Result<()> {
    io.set_reset_flag()?;
    for _ in 0..RESET_POLL_LIMIT {
        if !io.read_reset_flag()? {
            info!("HPB reset handshake complete");
            return Ok(());
        }
    }
    Err(Error::ResetTimeout { retries: RESET_POLL_LIMIT })
}

impl HpbController {
    /// Probe the device and bring up a controller for one logical unit.
    ///
    /// Reads the device, geometry, and unit descriptors, verifies HPB
    /// support and per-LU enablement, runs the reset handshake where the
    /// vendor requires it, allocates the node pool, and (by default)
    /// spawns the refill worker.
    ///
    /// # Errors
    ///
    /// Any failure here means the unit runs without HPB: descriptor or
    /// flag I/O errors, [`Error::Unsupported`] when the device or unit
    /// lacks HPB, [`Error::ResetTimeout`], or [`Error::AllocationFailed`]
    /// for the pool. None of these are fatal to the storage path itself.
    pub fn probe(io: Arc<dyn HpbIo>, config: HpbConfig) -> Result<Self> {
        let device = io.read_descriptor(DescriptorId::Device)?;
        let geo = io.read_descriptor(DescriptorId::Geometry)?;
        let unit = io.read_descriptor(DescriptorId::Unit { lun: config.lun })?;
        let geometry = HpbGeometry::from_descriptors(&device, &geo, &unit)?;

        if !geometry.hpb_supported() {
            return Err(Error::Unsupported("device does not advertise HPB".to_string()));
        }
        if !geometry.lu_hpb_enabled() {
            return Err(Error::Unsupported(format!("HPB not enabled on lun {}", config.lun)));
        }
        if config.vendor.needs_reset_handshake() {
            reset_handshake(io.as_ref())?;
        }

        let capacity = config.capacity_override.unwrap_or_else(|| geometry.node_capacity());
        let cache = SubregionCache::new(capacity, geometry.table_size())?;
        info!(
            lun = config.lun,
            vendor = ?config.vendor,
            hpb_version = geometry.hpb_version,
            subregion_bytes = geometry.subregion_bytes,
            table_size = geometry.table_size(),
            capacity,
            "HPB controller up"
        );

        let inner = Arc::new(Engine {
            geometry,
            vendor: config.vendor,
            lun: config.lun,
            io,
            cache: Mutex::new(cache),
            signal: WorkSignal::new(),
            enabled: AtomicBool::new(true),
            counters: Counters::default(),
        });
        let handle = config
            .background_refill
            .then(|| worker::spawn_refill_thread(Arc::clone(&inner)));
        Ok(Self { inner, worker: Mutex::new(handle) })
    }

    /// Feed a completion's status block to the response processor.
    ///
    /// Runs in the completion path: it never blocks on I/O, takes the
    /// controller lock once for at most four membership edits, and kicks
    /// the worker only when something was queued. Malformed blocks are
    /// counted and dropped; the enclosing I/O is unaffected either way.
    pub fn process_completion(&self, lun: u8, sense: &[u8]) {
        let engine = &self.inner;
        if sense.is_empty() || lun != engine.lun {
            return;
        }
        if !engine.enabled.load(Ordering::Relaxed)
            || engine.signal.is_suspended()
            || engine.signal.is_shutdown()
        {
            return;
        }
        let Some(report) = ActivationReport::parse(sense) else {
            engine.counters.malformed_reports.fetch_add(1, Ordering::Relaxed);
            debug!(len = sense.len(), "dropping malformed activation report");
            return;
        };
        if report.op == ReportOp::Reset {
            // Device-side reset notice; carries no membership change.
            trace!("activation report: device reset notice");
            return;
        }

        let mut queued = false;
        {
            let mut cache = engine.cache.lock();
            for &id in report.inactivations() {
                if cache.inactivate(u32::from(id)) {
                    engine.counters.inactivated.fetch_add(1, Ordering::Relaxed);
                    trace!(id, "sub-region inactivated");
                }
            }
            for &(region, subregion) in report.activations() {
                match cache.activate(u32::from(region)) {
                    Activation::Queued => {
                        queued = true;
                        engine.counters.activated.fetch_add(1, Ordering::Relaxed);
                        trace!(id = region, subregion, "sub-region queued for refill");
                    }
                    Activation::Dropped => {
                        engine.counters.dropped_activations.fetch_add(1, Ordering::Relaxed);
                        debug!(id = region, "node pool exhausted, activation dropped");
                    }
                    Activation::AlreadyPending | Activation::AlreadyFilled => {}
                }
            }
        }
        if queued {
            engine.signal.kick();
        }
    }

    /// Read-path hook: try to upgrade an outgoing read to a direct-PPN
    /// command.
    ///
    /// `lba_block` is the starting logical block, `transfer_bytes` the
    /// transfer size. Synchronous and non-blocking: one short-held lock
    /// for a pointer-sized table read. Never schedules a refill. Returns
    /// `None` — keep the plain logical read — on a miss, an ineligible
    /// transfer size, or a disabled controller.
    #[must_use]
    pub fn prepare_read(&self, lba_block: u64, transfer_bytes: u32) -> Option<DirectRead> {
        let engine = &self.inner;
        if !engine.enabled.load(Ordering::Relaxed) {
            return None;
        }
        let (min, max) = engine.vendor.read_window();
        if transfer_bytes < min || transfer_bytes > max {
            return None;
        }
        // The direct-read CDB carries a 32-bit LBA. Larger addresses stay
        // on the logical path; truncating here would alias their
        // sub-region onto a low one and could hit a table that was never
        // fetched for them.
        if lba_block > u64::from(u32::MAX) {
            return None;
        }
        engine.counters.reads_total.fetch_add(1, Ordering::Relaxed);
        let (id, entry) = engine.geometry.locate(lba_block);
        let ppn = engine.cache.lock().lookup(id, entry)?;
        engine.counters.read_hits.fetch_add(1, Ordering::Relaxed);
        let transfer_blocks = (u64::from(transfer_bytes) / geometry::BLOCK_SIZE) as u8;
        Some(engine.vendor.direct_read_cdb(lba_block as u32, ppn, transfer_blocks))
    }

    /// Drain pending refills on the caller's thread. This is what the
    /// background worker runs; with `background_refill` off it is the only
    /// way tables get filled.
    pub fn run_refills(&self) {
        self.inner.drain_refills();
    }

    /// Stop issuing refill I/O until [`resume`](Self::resume). In-flight
    /// reads finish normally; the queue is preserved.
    pub fn suspend(&self) {
        self.inner.signal.set_suspended(true);
    }

    /// Leave the suspended state and reschedule the worker.
    pub fn resume(&self) {
        self.inner.signal.set_suspended(false);
        self.inner.signal.kick();
    }

    /// Shut the controller down and join the worker thread. Idempotent;
    /// also runs on drop.
    pub fn shutdown(&self) {
        self.inner.signal.request_shutdown();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("refill worker panicked");
            }
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> HpbStats {
        let c = &self.inner.counters;
        HpbStats {
            reads_total: c.reads_total.load(Ordering::Relaxed),
            read_hits: c.read_hits.load(Ordering::Relaxed),
            read_buffer_ok: c.read_buffer_ok.load(Ordering::Relaxed),
            read_buffer_failed: c.read_buffer_failed.load(Ordering::Relaxed),
            activated: c.activated.load(Ordering::Relaxed),
            inactivated: c.inactivated.load(Ordering::Relaxed),
            dropped_activations: c.dropped_activations.load(Ordering::Relaxed),
            malformed_reports: c.malformed_reports.load(Ordering::Relaxed),
            stale_refills: c.stale_refills.load(Ordering::Relaxed),
        }
    }

    /// Current free/active/queued node counts.
    #[must_use]
    pub fn occupancy(&self) -> Occupancy {
        self.inner.cache.lock().occupancy()
    }

    /// Geometry decoded at probe time.
    #[must_use]
    pub fn geometry(&self) -> &HpbGeometry {
        &self.inner.geometry
    }

    /// Whether the subsystem is currently enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Debug/inspection text: enablement, hit counters, pool occupancy.
    #[must_use]
    pub fn debug_status(&self) -> String {
        let stats = self.stats();
        let occ = self.occupancy();
        let mut out = String::new();
        let state = if self.is_enabled() { "hpb_on" } else { "hpb_off" };
        let _ = writeln!(out, "{state}");
        let _ = writeln!(
            out,
            "hit/total={}/{} ({:.1}%)",
            stats.read_hits,
            stats.reads_total,
            stats.hit_percent()
        );
        let _ = writeln!(
            out,
            "read_buffer ok/fail={}/{} stale={}",
            stats.read_buffer_ok, stats.read_buffer_failed, stats.stale_refills
        );
        let _ = writeln!(
            out,
            "activated={} inactivated={} dropped={} malformed={}",
            stats.activated, stats.inactivated, stats.dropped_activations, stats.malformed_reports
        );
        let _ = writeln!(
            out,
            "nodes free/active/queued={}/{}/{}",
            occ.free, occ.active, occ.queued
        );
        out
    }

    /// Control-text handler for the debug surface: `"hpb_on"` enables the
    /// subsystem, `"hpb_off"` disables it (lookups miss, reports are
    /// ignored).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for anything else.
    pub fn set_control(&self, text: &str) -> Result<()> {
        match text.trim() {
            "hpb_on" => {
                self.inner.enabled.store(true, Ordering::Relaxed);
                Ok(())
            }
            "hpb_off" => {
                self.inner.enabled.store(false, Ordering::Relaxed);
                Ok(())
            }
            other => Err(Error::InvalidInput(format!("unknown control value: {other:?}"))),
        }
    }
}

impl Drop for HpbController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
