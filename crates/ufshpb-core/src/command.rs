//! Vendor CDB composition for HPB commands.
//!
//! Two command forms leave this module: the READ BUFFER variant the refill
//! worker uses to fetch a sub-region table, and the READ(16) variant the
//! read path substitutes for an ordinary READ(10) when it holds the target
//! PPN. The JEDEC layout is the baseline; the Samsung pre-standard devices
//! move the transfer length into the control byte and stamp their buffer id
//! where the transfer length normally sits.

use crate::geometry::BLOCK_SIZE;

/// CDB length for all HPB vendor commands.
pub const CDB_LEN: usize = 16;

/// HPB READ BUFFER opcode.
const HPB_READ_BUFFER_OPCODE: u8 = 0xF9;

/// Buffer id carried by HPB READ BUFFER.
const HPB_READ_BUFFER_ID: u8 = 0x01;

/// READ(16) opcode used for direct-PPN reads.
const READ16_OPCODE: u8 = 0x88;

/// Buffer id byte the Samsung variant stores at the transfer-length offset.
const SAMSUNG_BUFFER_ID: u8 = 0x11;

/// Smallest transfer eligible for a PPN hint, both vendors.
const READ_SIZE_MIN: u32 = BLOCK_SIZE as u32;

/// Largest hint-eligible transfer, JEDEC devices.
const READ_SIZE_MAX: u32 = 32 * 1024;

/// Largest hint-eligible transfer, Samsung devices.
const READ_SIZE_MAX_SAMSUNG: u32 = 512 * 1024;

/// Vendor family selecting the command encodings, fixed at probe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Vendor {
    /// JEDEC HPB 1.0/2.0 layout.
    #[default]
    Jedec,
    /// Samsung pre-standard layout.
    Samsung,
}

/// A composed direct-PPN READ(16) replacing an ordinary logical read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectRead {
    /// The full 16-byte CDB to submit in place of the READ(10).
    pub cdb: [u8; CDB_LEN],
}

impl Vendor {
    /// Transfer-length window (bytes, inclusive) eligible for PPN hints.
    /// Transfers outside it keep the plain logical-address path.
    #[must_use]
    pub fn read_window(self) -> (u32, u32) {
        match self {
            Vendor::Jedec => (READ_SIZE_MIN, READ_SIZE_MAX),
            Vendor::Samsung => (READ_SIZE_MIN, READ_SIZE_MAX_SAMSUNG),
        }
    }

    /// Whether probe must run the reset-flag handshake before first use.
    /// Samsung devices come up in a usable state without it.
    #[must_use]
    pub fn needs_reset_handshake(self) -> bool {
        matches!(self, Vendor::Jedec)
    }

    /// Compose the READ BUFFER CDB fetching one sub-region table.
    ///
    /// `region`/`subregion` address the table; `table_size` is the 24-bit
    /// allocation length.
    #[must_use]
    pub fn read_buffer_cdb(self, region: u32, subregion: u16, table_size: u32) -> [u8; CDB_LEN] {
        let mut cdb = [0u8; CDB_LEN];
        cdb[0] = HPB_READ_BUFFER_OPCODE;
        cdb[1] = HPB_READ_BUFFER_ID;
        cdb[2] = (region >> 8) as u8;
        cdb[3] = region as u8;
        cdb[4..6].copy_from_slice(&subregion.to_be_bytes());
        cdb[6] = (table_size >> 16) as u8;
        cdb[7] = (table_size >> 8) as u8;
        cdb[8] = table_size as u8;
        cdb[9] = 0; // control
        cdb
    }

    /// Compose the direct-PPN READ(16) for a hit on the read path.
    ///
    /// `lba` is the original logical block address, `ppn` the cached
    /// physical address, `transfer_blocks` the transfer length in logical
    /// blocks (fits in one byte within the hint-eligible window).
    ///
    /// Byte 1 (protection/flag bits) is composed as zero for both
    /// vendors; a caller replacing a read that carried flags there must
    /// stamp them onto the returned CDB itself.
    #[must_use]
    pub fn direct_read_cdb(self, lba: u32, ppn: u64, transfer_blocks: u8) -> DirectRead {
        let mut cdb = [0u8; CDB_LEN];
        cdb[0] = READ16_OPCODE;
        cdb[2..6].copy_from_slice(&lba.to_be_bytes());
        cdb[6..14].copy_from_slice(&ppn.to_be_bytes());
        match self {
            Vendor::Jedec => {
                cdb[14] = transfer_blocks;
                cdb[15] = 0; // control
            }
            Vendor::Samsung => {
                cdb[14] = SAMSUNG_BUFFER_ID;
                cdb[15] = transfer_blocks;
            }
        }
        DirectRead { cdb }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_buffer_cdb_layout() {
        let cdb = Vendor::Jedec.read_buffer_cdb(0x1234, 0, 0x0002_0100);
        assert_eq!(cdb[0], 0xF9);
        assert_eq!(cdb[1], 0x01);
        assert_eq!(&cdb[2..4], &[0x12, 0x34]);
        assert_eq!(&cdb[4..6], &[0x00, 0x00]);
        assert_eq!(&cdb[6..9], &[0x02, 0x01, 0x00]);
        assert_eq!(cdb[9], 0);
    }

    #[test]
    fn test_read_buffer_cdb_same_for_both_vendors() {
        assert_eq!(
            Vendor::Jedec.read_buffer_cdb(7, 0, 4096),
            Vendor::Samsung.read_buffer_cdb(7, 0, 4096)
        );
    }

    #[test]
    fn test_direct_read_cdb_jedec() {
        let read = Vendor::Jedec.direct_read_cdb(0x0001_0203, 0x1122_3344_5566_7788, 8);
        assert_eq!(read.cdb[0], 0x88);
        assert_eq!(&read.cdb[2..6], &[0x00, 0x01, 0x02, 0x03]);
        assert_eq!(&read.cdb[6..14], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
        assert_eq!(read.cdb[14], 8);
        assert_eq!(read.cdb[15], 0);
    }

    #[test]
    fn test_direct_read_cdb_samsung_swaps_tail() {
        let read = Vendor::Samsung.direct_read_cdb(0, 0xAA, 8);
        assert_eq!(read.cdb[14], SAMSUNG_BUFFER_ID);
        assert_eq!(read.cdb[15], 8);
    }

    #[test]
    fn test_direct_read_flag_byte_composed_zero() {
        // Byte 1 is left to the caller; the composer never sets it.
        for vendor in [Vendor::Jedec, Vendor::Samsung] {
            let read = vendor.direct_read_cdb(0x100, 0xBEEF, 4);
            assert_eq!(read.cdb[1], 0);
        }
    }

    #[test]
    fn test_read_window_vendor_difference() {
        let (jmin, jmax) = Vendor::Jedec.read_window();
        let (smin, smax) = Vendor::Samsung.read_window();
        assert_eq!(jmin, 4096);
        assert_eq!(smin, 4096);
        assert!(smax > jmax);
    }

    #[test]
    fn test_reset_handshake_only_for_jedec() {
        assert!(Vendor::Jedec.needs_reset_handshake());
        assert!(!Vendor::Samsung.needs_reset_handshake());
    }
}
