//! Property-based tests for invariants

use ufshpb::cache::SubregionCache;
use ufshpb::report::{ActivationReport, ReportBuilder, REPORT_LEN};
use ufshpb::{Activation, Vendor};

const TABLE_SIZE: usize = 64; // 8 entries of 8 bytes

fn xorshift(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

#[test]
fn test_report_roundtrip_invariant() {
    // Builder output must always survive the parser with the same entries.
    let mut seed = 0xDEAD_BEEFu64;
    for _ in 0..500 {
        let lun = (xorshift(&mut seed) % 9) as u8;
        let mut builder = ReportBuilder::new(lun);
        let mut activations = Vec::new();
        let mut inactivations = Vec::new();
        for _ in 0..xorshift(&mut seed) % 3 {
            let pair = ((xorshift(&mut seed) % 1024) as u16, (xorshift(&mut seed) % 4) as u16);
            builder = builder.activate(pair.0, pair.1);
            activations.push(pair);
        }
        for _ in 0..xorshift(&mut seed) % 3 {
            let id = (xorshift(&mut seed) % 1024) as u16;
            builder = builder.inactivate(id);
            inactivations.push(id);
        }
        if activations.is_empty() && inactivations.is_empty() {
            continue; // empty updates are invalid by construction
        }
        let report = ActivationReport::parse(&builder.build()).expect("builder output parses");
        assert_eq!(report.lun, lun);
        assert_eq!(report.activations(), activations.as_slice());
        assert_eq!(report.inactivations(), inactivations.as_slice());
    }
}

#[test]
fn test_parser_never_overreads_counts() {
    // Whatever the raw bytes say, the parser exposes at most two entries
    // of each kind or rejects the block outright.
    let mut seed = 0x1234_5678u64;
    for _ in 0..2000 {
        let mut raw = [0u8; REPORT_LEN];
        for byte in &mut raw {
            *byte = (xorshift(&mut seed) & 0xFF) as u8;
        }
        if let Some(report) = ActivationReport::parse(&raw) {
            assert!(report.activations().len() <= 2);
            assert!(report.inactivations().len() <= 2);
            assert!(report.lun <= 8);
        }
    }
}

#[test]
fn test_truncated_reports_always_rejected() {
    let raw = ReportBuilder::new(0).activate(1, 0).build();
    for len in 0..REPORT_LEN {
        assert!(ActivationReport::parse(&raw[..len]).is_none());
    }
}

#[test]
fn test_direct_read_preserves_ppn_verbatim() {
    // The cached PPN must land in CDB bytes 6..14 untouched, both vendors.
    let mut seed = 0xABCDu64;
    for vendor in [Vendor::Jedec, Vendor::Samsung] {
        for _ in 0..200 {
            let ppn = xorshift(&mut seed);
            let lba = (xorshift(&mut seed) & 0xFFFF_FFFF) as u32;
            let read = vendor.direct_read_cdb(lba, ppn, 1);
            assert_eq!(&read.cdb[6..14], &ppn.to_be_bytes());
            assert_eq!(&read.cdb[2..6], &lba.to_be_bytes());
        }
    }
}

#[test]
fn test_capacity_and_membership_invariants() {
    // |free| + |active| equals capacity for any activate/inactivate
    // sequence, and an active id is never simultaneously free (an
    // activate for it must not claim a second node).
    let mut cache = SubregionCache::new(6, TABLE_SIZE).unwrap();
    let mut seed = 0xFEED_F00Du64;
    for _ in 0..3000 {
        let id = (xorshift(&mut seed) % 20) as u32;
        match xorshift(&mut seed) % 4 {
            0 | 1 => {
                let before = cache.occupancy();
                let outcome = cache.activate(id);
                if outcome != Activation::Queued {
                    assert_eq!(cache.occupancy(), before, "non-claiming activate must not move nodes");
                }
            }
            2 => {
                cache.inactivate(id);
            }
            _ => {
                if let Some(ticket) = cache.pop_refill() {
                    let table = vec![0u8; TABLE_SIZE];
                    cache.complete_refill(&ticket, &table);
                }
            }
        }
        let occ = cache.occupancy();
        assert_eq!(occ.free + occ.active, 6);
        assert!(occ.queued <= occ.active);
    }
}

#[test]
fn test_exhaustion_drops_then_misses() {
    // Scenario: four activations fill a 4-node pool; the fifth is
    // dropped and its id keeps missing.
    let mut cache = SubregionCache::new(4, TABLE_SIZE).unwrap();
    for id in 10..14 {
        assert_eq!(cache.activate(id), Activation::Queued);
    }
    assert_eq!(cache.activate(14), Activation::Dropped);
    assert!(cache.lookup(14, 0).is_none());
    assert_eq!(cache.occupancy().free, 0);
}

#[test]
fn test_miss_before_fill() {
    let mut cache = SubregionCache::new(2, TABLE_SIZE).unwrap();
    cache.activate(5);
    assert!(cache.lookup(5, 0).is_none(), "refilling node must miss");
    let ticket = cache.pop_refill().unwrap();
    assert!(cache.complete_refill(&ticket, &vec![0x11u8; TABLE_SIZE]));
    assert!(cache.lookup(5, 0).is_some());
}

#[test]
fn test_stale_refill_never_fills_recycled_node() {
    // Scenario: inactivate while the refill read is in flight; the
    // worker's late result must not land in the recycled node.
    let mut cache = SubregionCache::new(1, TABLE_SIZE).unwrap();
    cache.activate(5);
    let ticket = cache.pop_refill().unwrap();
    cache.inactivate(5);
    cache.activate(9);
    assert!(!cache.complete_refill(&ticket, &vec![0xFFu8; TABLE_SIZE]));
    assert!(cache.lookup(5, 0).is_none());
    assert!(cache.lookup(9, 0).is_none(), "id 9 is still refilling");
}

#[test]
fn test_double_activate_is_idempotent() {
    let mut cache = SubregionCache::new(4, TABLE_SIZE).unwrap();
    assert_eq!(cache.activate(7), Activation::Queued);
    assert_eq!(cache.activate(7), Activation::AlreadyPending);
    assert_eq!(cache.occupancy().free, 3, "one node claimed, not two");
    let ticket = cache.pop_refill().unwrap();
    cache.complete_refill(&ticket, &vec![0u8; TABLE_SIZE]);
    assert!(cache.pop_refill().is_none(), "exactly one refill for two activates");
}

#[test]
fn test_read_windows_are_block_aligned() {
    for vendor in [Vendor::Jedec, Vendor::Samsung] {
        let (min, max) = vendor.read_window();
        assert_eq!(min % 4096, 0);
        assert_eq!(max % 4096, 0);
        assert!(min <= max);
        // The block count of any in-window transfer fits the one-byte field.
        assert!(max / 4096 <= 255);
    }
}
