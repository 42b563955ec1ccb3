//! hpb-sim - workload simulator for the ufshpb sub-region cache
//!
//! Drives an [`HpbController`] against a simulated UFS device with a
//! skewed read workload and a modeled device-side activation policy, then
//! prints the controller's debug status.
//!
//! # Usage
//!
//! ```bash
//! # 100k reads over 256 sub-regions, default pool
//! hpb-sim --reads 100000
//!
//! # Small pool, flaky device
//! hpb-sim --capacity 8 --fail-per-mille 50
//! ```

mod device;
mod policy;

use clap::Parser;
use device::SimDevice;
use policy::DevicePolicy;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use ufshpb_core::{HpbConfig, HpbController, Vendor};

#[derive(Parser)]
#[command(name = "hpb-sim", about = "HPB sub-region cache workload simulator")]
struct Args {
    /// Number of reads to simulate
    #[arg(long, default_value_t = 100_000)]
    reads: u64,

    /// Sub-regions in the simulated address space
    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u64).range(1..))]
    subregions: u64,

    /// Node pool capacity (default: the unit descriptor limit)
    #[arg(long)]
    capacity: Option<usize>,

    /// Reads of a sub-region before the device activates it
    #[arg(long, default_value_t = 4)]
    threshold: u64,

    /// Table read failure rate, per mille
    #[arg(long, default_value_t = 0)]
    fail_per_mille: u64,

    /// Use the Samsung pre-standard command layout
    #[arg(long)]
    samsung: bool,

    /// Workload RNG seed
    #[arg(long, default_value_t = 0x5EED)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let vendor = if args.samsung { Vendor::Samsung } else { Vendor::Jedec };

    let device = Arc::new(SimDevice::new(64, args.fail_per_mille, args.seed));
    let config = HpbConfig {
        vendor,
        capacity_override: args.capacity,
        ..HpbConfig::default()
    };
    let ctrl = HpbController::probe(Arc::clone(&device) as Arc<dyn ufshpb_core::HpbIo>, config)?;
    let entries = ctrl.geometry().entries_per_subregion();
    tracing::info!(
        reads = args.reads,
        subregions = args.subregions,
        threshold = args.threshold,
        fail_per_mille = args.fail_per_mille,
        "starting workload"
    );

    // Device policy sized to the host pool so announcements are honest.
    let pool = args.capacity.unwrap_or_else(|| ctrl.geometry().node_capacity());
    let mut policy = DevicePolicy::new(0, args.threshold, pool);

    // Skewed workload: 80% of reads land on the first 20% of sub-regions.
    let hot = (args.subregions / 5).max(1);
    let mut rng = args.seed | 1;
    for _ in 0..args.reads {
        rng ^= rng << 13;
        rng ^= rng >> 7;
        rng ^= rng << 17;
        let id = if rng % 10 < 8 { rng % hot } else { hot + rng % (args.subregions - hot).max(1) };
        let id = id.min(args.subregions - 1);
        let lba = id * entries + (rng >> 32) % entries;

        let _ = ctrl.prepare_read(lba, 4096);
        if let Some(report) = policy.on_read(id as u32) {
            ctrl.process_completion(0, &report);
        }
    }

    // Let the worker finish whatever the last reports queued. Bounded:
    // a device failing every read would otherwise keep the queue nonempty.
    for _ in 0..200 {
        if ctrl.occupancy().queued == 0 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    ctrl.shutdown();

    print!("{}", ctrl.debug_status());
    println!(
        "device: table_reads={} failed={} policy_active={}",
        device.table_reads.load(Ordering::Relaxed),
        device.failed_reads.load(Ordering::Relaxed),
        policy.active_len()
    );
    Ok(())
}
