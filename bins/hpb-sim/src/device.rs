//! Simulated UFS device.
//!
//! Answers the probe-time descriptor reads with a fabricated UFS 3.1
//! layout and serves synthetic sub-region tables where every entry encodes
//! its own address, `ppn = (id << 32) | entry`. Read failures are injected
//! pseudo-randomly at a configurable rate.

use std::sync::atomic::{AtomicU64, Ordering};
use ufshpb_core::{DescriptorId, Error, HpbIo, Result, CDB_LEN};

const DEV_HPB_VERSION: usize = 0x40;
const DEV_EXT_FEATURE_SUPPORT: usize = 0x4F;
const GEO_HPB_REGION_SIZE: usize = 0x48;
const GEO_HPB_LU_COUNT: usize = 0x49;
const GEO_HPB_SUBREGION_SIZE: usize = 0x4A;
const GEO_HPB_DEVICE_MAX_ACTIVE: usize = 0x4B;
const UNIT_LU_ENABLE: usize = 0x03;
const UNIT_LOGICAL_BLOCK_SIZE: usize = 0x0A;
const UNIT_MAX_ACTIVE_REGIONS: usize = 0x23;

pub struct SimDevice {
    max_active: u16,
    /// Per-mille probability that a table read fails.
    fail_per_mille: u64,
    rng: AtomicU64,
    pub table_reads: AtomicU64,
    pub failed_reads: AtomicU64,
}

impl SimDevice {
    pub fn new(max_active: u16, fail_per_mille: u64, seed: u64) -> Self {
        Self {
            max_active,
            fail_per_mille,
            rng: AtomicU64::new(seed | 1),
            table_reads: AtomicU64::new(0),
            failed_reads: AtomicU64::new(0),
        }
    }

    fn roll(&self) -> u64 {
        // xorshift64, good enough for failure injection.
        let mut x = self.rng.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng.store(x, Ordering::Relaxed);
        x
    }
}

impl HpbIo for SimDevice {
    fn read_descriptor(&self, id: DescriptorId) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 0x60];
        match id {
            DescriptorId::Device => {
                buf[DEV_HPB_VERSION..DEV_HPB_VERSION + 2].copy_from_slice(&0x0200u16.to_be_bytes());
                buf[DEV_EXT_FEATURE_SUPPORT..DEV_EXT_FEATURE_SUPPORT + 4]
                    .copy_from_slice(&(1u32 << 7).to_be_bytes());
            }
            DescriptorId::Geometry => {
                buf[GEO_HPB_REGION_SIZE] = 15; // 16 MiB regions
                buf[GEO_HPB_LU_COUNT] = 1;
                buf[GEO_HPB_SUBREGION_SIZE] = 6; // 32 KiB sub-regions
                buf[GEO_HPB_DEVICE_MAX_ACTIVE..GEO_HPB_DEVICE_MAX_ACTIVE + 2]
                    .copy_from_slice(&1024u16.to_be_bytes());
            }
            DescriptorId::Unit { .. } => {
                buf[UNIT_LU_ENABLE] = 0x02;
                buf[UNIT_LOGICAL_BLOCK_SIZE] = 12;
                buf[UNIT_MAX_ACTIVE_REGIONS..UNIT_MAX_ACTIVE_REGIONS + 2]
                    .copy_from_slice(&self.max_active.to_be_bytes());
            }
        }
        Ok(buf)
    }

    fn set_reset_flag(&self) -> Result<()> {
        Ok(())
    }

    fn read_reset_flag(&self) -> Result<bool> {
        Ok(false)
    }

    fn read_buffer(&self, cdb: &[u8; CDB_LEN], out: &mut [u8]) -> Result<()> {
        self.table_reads.fetch_add(1, Ordering::Relaxed);
        if self.fail_per_mille > 0 && self.roll() % 1000 < self.fail_per_mille {
            self.failed_reads.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Device("simulated medium error".to_string()));
        }
        let id = u32::from(u16::from_be_bytes([cdb[2], cdb[3]]));
        for (entry, chunk) in out.chunks_exact_mut(8).enumerate() {
            chunk.copy_from_slice(&((u64::from(id) << 32) | entry as u64).to_be_bytes());
        }
        Ok(())
    }
}
