//! Device descriptor decoding and HPB geometry.
//!
//! The device reports its HPB layout through three descriptors read once at
//! probe time: the geometry descriptor (region/sub-region sizes, device-wide
//! active-region budget), the unit descriptor (per-LU enablement and limits),
//! and the device descriptor (feature support word, HPB version). Offsets
//! follow the UFS 3.1 descriptor layouts. All multi-byte fields are
//! big-endian.

use crate::{Error, Result};

/// 512-byte sector, the unit of the descriptor size encodings.
pub const SECTOR_SIZE: u64 = 512;

/// UFS logical block size in bytes.
pub const BLOCK_SIZE: u64 = 4096;

/// Size of one cached translation entry (PPN) in bytes.
pub const ENTRY_SIZE: usize = 8;

// Geometry descriptor offsets.
const GEO_HPB_REGION_SIZE: usize = 0x48;
const GEO_HPB_LU_COUNT: usize = 0x49;
const GEO_HPB_SUBREGION_SIZE: usize = 0x4A;
const GEO_HPB_DEVICE_MAX_ACTIVE: usize = 0x4B;

// Unit descriptor offsets.
const UNIT_LU_ENABLE: usize = 0x03;
const UNIT_LOGICAL_BLOCK_SIZE: usize = 0x0A;
const UNIT_LOGICAL_BLOCK_COUNT: usize = 0x0B;
const UNIT_MAX_ACTIVE_REGIONS: usize = 0x23;
const UNIT_PINNED_REGION_START: usize = 0x25;
const UNIT_PINNED_REGION_COUNT: usize = 0x27;

// Device descriptor offsets.
const DEV_HPB_VERSION: usize = 0x40;
const DEV_HPB_CONTROL: usize = 0x42;
const DEV_EXT_FEATURE_SUPPORT: usize = 0x4F;

/// HPB bit in the extended UFS feature support word.
const HPB_SUPPORT_BIT: u32 = 1 << 7;

/// Unit descriptor bLUEnable value meaning "HPB enabled on this LU".
const LU_HPB_ENABLED: u8 = 0x02;

fn read_u8(buf: &[u8], offset: usize, what: &str) -> Result<u8> {
    buf.get(offset)
        .copied()
        .ok_or_else(|| Error::InvalidDescriptor(format!("{what}: descriptor too short for offset {offset:#x}")))
}

fn read_be16(buf: &[u8], offset: usize, what: &str) -> Result<u16> {
    let bytes = buf
        .get(offset..offset + 2)
        .ok_or_else(|| Error::InvalidDescriptor(format!("{what}: descriptor too short for offset {offset:#x}")))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_be32(buf: &[u8], offset: usize, what: &str) -> Result<u32> {
    let bytes = buf
        .get(offset..offset + 4)
        .ok_or_else(|| Error::InvalidDescriptor(format!("{what}: descriptor too short for offset {offset:#x}")))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_be64(buf: &[u8], offset: usize, what: &str) -> Result<u64> {
    let bytes = buf
        .get(offset..offset + 8)
        .ok_or_else(|| Error::InvalidDescriptor(format!("{what}: descriptor too short for offset {offset:#x}")))?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(raw))
}

/// Sector count `1 << shift` scaled to bytes, rejecting shifts the device
/// has no business reporting.
fn size_from_sector_shift(shift: u8, what: &str) -> Result<u64> {
    1u64.checked_shl(u32::from(shift))
        .and_then(|sectors| sectors.checked_mul(SECTOR_SIZE))
        .ok_or_else(|| Error::InvalidDescriptor(format!("{what}: size shift {shift} out of range")))
}

/// HPB layout parameters assembled from the three probe-time descriptors.
#[derive(Debug, Clone)]
pub struct HpbGeometry {
    /// Region size in bytes.
    pub region_bytes: u64,
    /// Sub-region size in bytes; one cache node covers one sub-region.
    pub subregion_bytes: u64,
    /// Number of HPB-capable logical units on the device.
    pub hpb_lu_count: u8,
    /// Device-wide maximum number of active regions.
    pub device_max_active: u16,
    /// Unit descriptor bLUEnable byte.
    pub lu_enable: u8,
    /// Logical block size of the unit in bytes.
    pub logical_block_size: u64,
    /// Logical block count of the unit.
    pub logical_block_count: u64,
    /// Maximum active regions configured for this unit.
    pub lu_max_active: u16,
    /// First pinned region index.
    pub pinned_start: u16,
    /// Number of pinned regions.
    pub pinned_count: u16,
    /// HPB specification version reported by the device.
    pub hpb_version: u16,
    /// Extended UFS feature support word.
    pub ext_feature_support: u32,
    /// HPB control mode (host vs. device control).
    pub control_mode: u8,
}

impl HpbGeometry {
    /// Decode geometry from raw device, geometry, and unit descriptor buffers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] if any buffer is too short, a
    /// size shift is outside the representable range, or the decoded
    /// sub-region size is smaller than one logical block.
    pub fn from_descriptors(device: &[u8], geometry: &[u8], unit: &[u8]) -> Result<Self> {
        let region_shift = read_u8(geometry, GEO_HPB_REGION_SIZE, "geometry")?;
        let subregion_shift = read_u8(geometry, GEO_HPB_SUBREGION_SIZE, "geometry")?;
        let block_shift = read_u8(unit, UNIT_LOGICAL_BLOCK_SIZE, "unit")?;

        let parsed = Self {
            region_bytes: size_from_sector_shift(region_shift, "geometry")?,
            subregion_bytes: size_from_sector_shift(subregion_shift, "geometry")?,
            hpb_lu_count: read_u8(geometry, GEO_HPB_LU_COUNT, "geometry")?,
            device_max_active: read_be16(geometry, GEO_HPB_DEVICE_MAX_ACTIVE, "geometry")?,
            lu_enable: read_u8(unit, UNIT_LU_ENABLE, "unit")?,
            logical_block_size: 1u64.checked_shl(u32::from(block_shift)).ok_or_else(|| {
                Error::InvalidDescriptor(format!("unit: block size shift {block_shift} out of range"))
            })?,
            logical_block_count: read_be64(unit, UNIT_LOGICAL_BLOCK_COUNT, "unit")?,
            lu_max_active: read_be16(unit, UNIT_MAX_ACTIVE_REGIONS, "unit")?,
            pinned_start: read_be16(unit, UNIT_PINNED_REGION_START, "unit")?,
            pinned_count: read_be16(unit, UNIT_PINNED_REGION_COUNT, "unit")?,
            hpb_version: read_be16(device, DEV_HPB_VERSION, "device")?,
            ext_feature_support: read_be32(device, DEV_EXT_FEATURE_SUPPORT, "device")?,
            control_mode: read_u8(device, DEV_HPB_CONTROL, "device")?,
        };

        if parsed.subregion_bytes < BLOCK_SIZE {
            return Err(Error::InvalidDescriptor(format!(
                "sub-region size {} below logical block size",
                parsed.subregion_bytes
            )));
        }
        if parsed.subregion_bytes > parsed.region_bytes {
            return Err(Error::InvalidDescriptor(format!(
                "sub-region size {} exceeds region size {}",
                parsed.subregion_bytes, parsed.region_bytes
            )));
        }
        Ok(parsed)
    }

    /// Translation entries held by one sub-region table.
    #[must_use]
    pub fn entries_per_subregion(&self) -> u64 {
        self.subregion_bytes / BLOCK_SIZE
    }

    /// Byte size of one sub-region table (`entries × entry size`).
    #[must_use]
    pub fn table_size(&self) -> usize {
        self.entries_per_subregion() as usize * ENTRY_SIZE
    }

    /// Whether the device advertises HPB at all.
    #[must_use]
    pub fn hpb_supported(&self) -> bool {
        self.ext_feature_support & HPB_SUPPORT_BIT != 0
    }

    /// Whether the probed unit has HPB enabled.
    #[must_use]
    pub fn lu_hpb_enabled(&self) -> bool {
        self.lu_enable == LU_HPB_ENABLED
    }

    /// Node pool capacity for the unit: the per-LU limit when configured,
    /// the device-wide limit otherwise.
    #[must_use]
    pub fn node_capacity(&self) -> usize {
        if self.lu_max_active > 0 {
            self.lu_max_active as usize
        } else {
            self.device_max_active as usize
        }
    }

    /// Map a logical block address to (sub-region id, entry offset).
    ///
    /// `lba_block` must fit the 32-bit command address range; the read
    /// path rejects larger addresses before calling this.
    #[must_use]
    pub fn locate(&self, lba_block: u64) -> (u32, usize) {
        let entries = self.entries_per_subregion();
        ((lba_block / entries) as u32, (lba_block % entries) as usize)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Descriptor fabrication shared by the unit tests.

    /// Build a device descriptor advertising HPB 2.0 support.
    pub fn device_descriptor() -> Vec<u8> {
        let mut buf = vec![0u8; 0x60];
        buf[super::DEV_HPB_VERSION..super::DEV_HPB_VERSION + 2].copy_from_slice(&0x0200u16.to_be_bytes());
        buf[super::DEV_HPB_CONTROL] = 0x00;
        buf[super::DEV_EXT_FEATURE_SUPPORT..super::DEV_EXT_FEATURE_SUPPORT + 4]
            .copy_from_slice(&(1u32 << 7).to_be_bytes());
        buf
    }

    /// Build a geometry descriptor: 16 MiB regions, 32 KiB sub-regions.
    pub fn geometry_descriptor() -> Vec<u8> {
        let mut buf = vec![0u8; 0x60];
        buf[super::GEO_HPB_REGION_SIZE] = 15; // (1 << 15) * 512 = 16 MiB
        buf[super::GEO_HPB_LU_COUNT] = 1;
        buf[super::GEO_HPB_SUBREGION_SIZE] = 6; // (1 << 6) * 512 = 32 KiB
        buf[super::GEO_HPB_DEVICE_MAX_ACTIVE..super::GEO_HPB_DEVICE_MAX_ACTIVE + 2]
            .copy_from_slice(&1024u16.to_be_bytes());
        buf
    }

    /// Build a unit descriptor with HPB enabled and the given active-region cap.
    pub fn unit_descriptor(max_active: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 0x30];
        buf[super::UNIT_LU_ENABLE] = 0x02;
        buf[super::UNIT_LOGICAL_BLOCK_SIZE] = 12; // 4096
        buf[super::UNIT_LOGICAL_BLOCK_COUNT..super::UNIT_LOGICAL_BLOCK_COUNT + 8]
            .copy_from_slice(&(1u64 << 21).to_be_bytes());
        buf[super::UNIT_MAX_ACTIVE_REGIONS..super::UNIT_MAX_ACTIVE_REGIONS + 2]
            .copy_from_slice(&max_active.to_be_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{device_descriptor, geometry_descriptor, unit_descriptor};
    use super::*;

    fn parse_default() -> HpbGeometry {
        HpbGeometry::from_descriptors(&device_descriptor(), &geometry_descriptor(), &unit_descriptor(64)).unwrap()
    }

    #[test]
    fn test_geometry_sizes() {
        let geo = parse_default();
        assert_eq!(geo.region_bytes, 16 * 1024 * 1024);
        assert_eq!(geo.subregion_bytes, 32 * 1024);
        assert_eq!(geo.entries_per_subregion(), 8);
        assert_eq!(geo.table_size(), 64);
    }

    #[test]
    fn test_geometry_support_flags() {
        let geo = parse_default();
        assert!(geo.hpb_supported());
        assert!(geo.lu_hpb_enabled());
        assert_eq!(geo.hpb_version, 0x0200);
    }

    #[test]
    fn test_geometry_node_capacity_prefers_unit() {
        let geo = parse_default();
        assert_eq!(geo.node_capacity(), 64);

        let geo = HpbGeometry::from_descriptors(
            &device_descriptor(),
            &geometry_descriptor(),
            &unit_descriptor(0),
        )
        .unwrap();
        assert_eq!(geo.node_capacity(), 1024);
    }

    #[test]
    fn test_geometry_locate() {
        let geo = parse_default();
        // 8 entries per sub-region.
        assert_eq!(geo.locate(0), (0, 0));
        assert_eq!(geo.locate(7), (0, 7));
        assert_eq!(geo.locate(8), (1, 0));
        assert_eq!(geo.locate(8 * 100 + 3), (100, 3));
    }

    #[test]
    fn test_geometry_short_descriptor_rejected() {
        let err = HpbGeometry::from_descriptors(&device_descriptor(), &[0u8; 16], &unit_descriptor(4));
        assert!(matches!(err, Err(Error::InvalidDescriptor(_))));

        let err = HpbGeometry::from_descriptors(&[0u8; 8], &geometry_descriptor(), &unit_descriptor(4));
        assert!(matches!(err, Err(Error::InvalidDescriptor(_))));
    }

    #[test]
    fn test_geometry_subregion_below_block_rejected() {
        let mut geo_buf = geometry_descriptor();
        geo_buf[GEO_HPB_SUBREGION_SIZE] = 1; // 1 KiB, below the 4 KiB block
        let err = HpbGeometry::from_descriptors(&device_descriptor(), &geo_buf, &unit_descriptor(4));
        assert!(matches!(err, Err(Error::InvalidDescriptor(_))));
    }

    #[test]
    fn test_geometry_oversized_shifts_rejected() {
        // Shift straight off the wire; 64 would overflow the shift itself
        // and 60 the sector-to-byte scaling. Both are descriptor errors,
        // not panics.
        for bad_shift in [64u8, 60, 0xFF] {
            let mut geo_buf = geometry_descriptor();
            geo_buf[GEO_HPB_REGION_SIZE] = bad_shift;
            let err = HpbGeometry::from_descriptors(&device_descriptor(), &geo_buf, &unit_descriptor(4));
            assert!(matches!(err, Err(Error::InvalidDescriptor(_))), "region shift {bad_shift}");

            let mut geo_buf = geometry_descriptor();
            geo_buf[GEO_HPB_SUBREGION_SIZE] = bad_shift;
            let err = HpbGeometry::from_descriptors(&device_descriptor(), &geo_buf, &unit_descriptor(4));
            assert!(matches!(err, Err(Error::InvalidDescriptor(_))), "sub-region shift {bad_shift}");
        }

        let mut unit_buf = unit_descriptor(4);
        unit_buf[UNIT_LOGICAL_BLOCK_SIZE] = 64;
        let err = HpbGeometry::from_descriptors(&device_descriptor(), &geometry_descriptor(), &unit_buf);
        assert!(matches!(err, Err(Error::InvalidDescriptor(_))));
    }

    #[test]
    fn test_geometry_subregion_larger_than_region_rejected() {
        let mut geo_buf = geometry_descriptor();
        geo_buf[GEO_HPB_SUBREGION_SIZE] = 20;
        let err = HpbGeometry::from_descriptors(&device_descriptor(), &geo_buf, &unit_descriptor(4));
        assert!(matches!(err, Err(Error::InvalidDescriptor(_))));
    }

    #[test]
    fn test_geometry_unsupported_device() {
        let mut dev = device_descriptor();
        dev[DEV_EXT_FEATURE_SUPPORT..DEV_EXT_FEATURE_SUPPORT + 4].copy_from_slice(&0u32.to_be_bytes());
        let geo = HpbGeometry::from_descriptors(&dev, &geometry_descriptor(), &unit_descriptor(4)).unwrap();
        assert!(!geo.hpb_supported());
    }
}
