//! Completion-embedded activation reports.
//!
//! The device piggybacks a small sense-data-like status block on ordinary
//! read completions to tell the host which sub-regions are worth caching
//! (activate) and which it has evicted on its side (inactivate). The block
//! is fixed-size and big-endian throughout:
//!
//! ```text
//! offset  field
//! 0..2    total length (be16, always 18)
//! 2       descriptor type tag (0x80)
//! 3       additional length (0x10)
//! 4       operation (0 none / 1 update / 2 reset)
//! 5       logical unit id
//! 6       activate count (0..=2)
//! 7       inactivate count (0..=2)
//! 8..16   two activate (region, sub-region) be16 pairs
//! 16..20  two inactivate region ids (be16)
//! ```
//!
//! Malformed blocks are rejected by [`ActivationReport::parse`] and dropped
//! by the caller; they ride on completions of I/O that succeeded, so they
//! must never fail that I/O.

/// Total size of the status block in bytes.
pub const REPORT_LEN: usize = 20;

/// Maximum activate entries in one report, fixed by the wire format.
pub const MAX_ACTIVATE_ENTRIES: usize = 2;

/// Maximum inactivate entries in one report, fixed by the wire format.
pub const MAX_INACTIVATE_ENTRIES: usize = 2;

/// Expected value of the total-length field (bytes after the field itself).
const SENSE_DATA_LEN: u16 = 18;

/// Expected descriptor type tag.
const DESC_TYPE: u8 = 0x80;

/// Expected additional-length byte (payload after offset 4).
const ADDITIONAL_LEN: u8 = 0x10;

/// Highest addressable general-purpose logical unit.
const MAX_GENERAL_LUN: u8 = 8;

/// Operation requested by a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOp {
    /// Apply the activate/inactivate entries.
    Update,
    /// Device-side HPB state was reset; entries carry no membership change.
    Reset,
}

/// A validated activation report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    /// Operation code.
    pub op: ReportOp,
    /// Logical unit the report applies to.
    pub lun: u8,
    activations: [(u16, u16); MAX_ACTIVATE_ENTRIES],
    activate_count: u8,
    inactivations: [u16; MAX_INACTIVATE_ENTRIES],
    inactivate_count: u8,
}

impl ActivationReport {
    /// Parse and validate a raw status block.
    ///
    /// Returns `None` for anything structurally off: wrong length, wrong
    /// tag, out-of-bounds counts, an empty update, an out-of-range LUN, or
    /// an unknown operation code.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() != REPORT_LEN {
            return None;
        }
        if u16::from_be_bytes([raw[0], raw[1]]) != SENSE_DATA_LEN {
            return None;
        }
        if raw[2] != DESC_TYPE || raw[3] != ADDITIONAL_LEN {
            return None;
        }
        let op = match raw[4] {
            1 => ReportOp::Update,
            2 => ReportOp::Reset,
            _ => return None,
        };
        let lun = raw[5];
        if lun > MAX_GENERAL_LUN {
            return None;
        }
        let activate_count = raw[6];
        let inactivate_count = raw[7];
        if activate_count as usize > MAX_ACTIVATE_ENTRIES
            || inactivate_count as usize > MAX_INACTIVATE_ENTRIES
            || (activate_count == 0 && inactivate_count == 0)
        {
            return None;
        }

        let pair = |off: usize| {
            (
                u16::from_be_bytes([raw[off], raw[off + 1]]),
                u16::from_be_bytes([raw[off + 2], raw[off + 3]]),
            )
        };
        Some(Self {
            op,
            lun,
            activations: [pair(8), pair(12)],
            activate_count,
            inactivations: [
                u16::from_be_bytes([raw[16], raw[17]]),
                u16::from_be_bytes([raw[18], raw[19]]),
            ],
            inactivate_count,
        })
    }

    /// The (region, sub-region) pairs requested for activation.
    #[must_use]
    pub fn activations(&self) -> &[(u16, u16)] {
        &self.activations[..self.activate_count as usize]
    }

    /// The region ids requested for inactivation.
    #[must_use]
    pub fn inactivations(&self) -> &[u16] {
        &self.inactivations[..self.inactivate_count as usize]
    }
}

/// Builder for status blocks, used by simulators and tests to fabricate
/// reports in the exact wire format the parser accepts.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    lun: u8,
    reset: bool,
    activations: Vec<(u16, u16)>,
    inactivations: Vec<u16>,
}

impl ReportBuilder {
    /// Start a new `update` report for the given unit.
    #[must_use]
    pub fn new(lun: u8) -> Self {
        Self { lun, ..Self::default() }
    }

    /// Mark the report as a device-side `reset` notification.
    #[must_use]
    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }

    /// Append an activation entry. Panics in debug builds past two entries.
    #[must_use]
    pub fn activate(mut self, region: u16, subregion: u16) -> Self {
        debug_assert!(self.activations.len() < MAX_ACTIVATE_ENTRIES);
        self.activations.push((region, subregion));
        self
    }

    /// Append an inactivation entry.
    #[must_use]
    pub fn inactivate(mut self, region: u16) -> Self {
        debug_assert!(self.inactivations.len() < MAX_INACTIVATE_ENTRIES);
        self.inactivations.push(region);
        self
    }

    /// Encode the wire form.
    #[must_use]
    pub fn build(self) -> [u8; REPORT_LEN] {
        let mut raw = [0u8; REPORT_LEN];
        raw[0..2].copy_from_slice(&SENSE_DATA_LEN.to_be_bytes());
        raw[2] = DESC_TYPE;
        raw[3] = ADDITIONAL_LEN;
        raw[4] = if self.reset { 2 } else { 1 };
        raw[5] = self.lun;
        raw[6] = self.activations.len().min(MAX_ACTIVATE_ENTRIES) as u8;
        raw[7] = self.inactivations.len().min(MAX_INACTIVATE_ENTRIES) as u8;
        for (i, (region, subregion)) in self.activations.iter().take(MAX_ACTIVATE_ENTRIES).enumerate() {
            raw[8 + i * 4..10 + i * 4].copy_from_slice(&region.to_be_bytes());
            raw[10 + i * 4..12 + i * 4].copy_from_slice(&subregion.to_be_bytes());
        }
        for (i, region) in self.inactivations.iter().take(MAX_INACTIVATE_ENTRIES).enumerate() {
            raw[16 + i * 2..18 + i * 2].copy_from_slice(&region.to_be_bytes());
        }
        raw
    }
}
