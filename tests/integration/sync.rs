use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use sdrio::peripherals::{DacControl, DacError, REG_DAC_SYNC_CTRL, REG_DAC_SYNC_TIME_LO};
use sdrio::regs::{RF_CORE_BASE, SLOT_WINDOW_SIZE};
use sdrio::sync::{SyncError, SyncStep};
use sdrio::{Direction, ErrorClass, SdrConfig, StreamArgs, StreamError};

use crate::Sim;

/// Vendor DAC whose divider never locks.
struct StuckDac {
    arms: AtomicUsize,
}

impl DacControl for StuckDac {
    fn reset_sync(&self) -> Result<(), DacError> {
        Ok(())
    }

    fn arm_sync(&self, _sync_tick: u64) -> Result<(), DacError> {
        self.arms.fetch_add(1, Ordering::Relaxed);
        Err(DacError::Vendor("divider did not lock".into()))
    }

    fn verify_sync(&self, _sync_tick: u64) -> Result<(), DacError> {
        Ok(())
    }
}

fn rf_core(slot: u32, offset: u32) -> u32 {
    RF_CORE_BASE + slot * SLOT_WINDOW_SIZE + offset
}

#[test]
fn failed_sync_discards_the_streamer() {
    let stuck = Arc::new(StuckDac {
        arms: AtomicUsize::new(0),
    });
    let dac = stuck.clone();
    let sim = Sim::build(1, SdrConfig::default(), move |_, parts| {
        parts.with_dac(1, dac.clone())
    });

    let err = sim
        .device
        .create_tx_streamer(&StreamArgs::new([0, 1]))
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Synchronization);
    assert!(err.to_string().starts_with("failed to sync DACs"), "{err}");
    match err {
        StreamError::Sync(SyncError::Step { step, block, .. }) => {
            assert_eq!(step, SyncStep::Arm);
            assert_eq!(block.to_string(), "0/Radio_1");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(stuck.arms.load(Ordering::Relaxed), 1);
    assert_eq!(sim.device.live_streamers(Direction::Tx), 0);

    // The healthy slot alone still syncs.
    let tx = sim.device.create_tx_streamer(&StreamArgs::new([0]));
    assert!(tx.is_ok());
}

#[test]
fn streamer_across_boards_syncs_to_one_tick() -> Result<()> {
    let sim = Sim::new(2);
    // Channel 1 is board 0 radio B, channel 2 is board 1 radio A.
    let _tx = sim.device.create_tx_streamer(&StreamArgs::new([1, 2]))?;

    let armed = |board: usize, slot: u32| sim.regs[board].value(rf_core(slot, REG_DAC_SYNC_CTRL));
    let tick = |board: usize, slot: u32| sim.regs[board].value(rf_core(slot, REG_DAC_SYNC_TIME_LO));
    assert_eq!(armed(0, 1), Some(1));
    assert_eq!(armed(1, 0), Some(1));
    assert_eq!(tick(0, 1), tick(1, 0));
    // Radios the streamer does not drive are left alone.
    assert_eq!(armed(0, 0), None);
    Ok(())
}

#[test]
fn boards_on_different_clocks_cannot_sync() -> Result<()> {
    let sim = Sim::new(2);
    sim.device.set_tick_rate(1, 100e6)?;
    let err = sim
        .device
        .create_tx_streamer(&StreamArgs::new([0, 2]))
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::Sync(SyncError::TickRateMismatch { board: 1, .. })
    ));
    Ok(())
}

/// Overlapping multi-board transmit streamers built from several threads
/// at once. Boards are always locked in ascending order, so every
/// construction completes.
#[test]
fn concurrent_overlapping_construction_completes() {
    let sim = Sim::new(2);
    let device = &sim.device;
    let groups: [&[usize]; 4] = [&[0, 2], &[3, 1], &[2, 3], &[1, 0, 3]];

    thread::scope(|s| {
        for channels in groups {
            s.spawn(move || {
                for _ in 0..50 {
                    device
                        .create_tx_streamer(&StreamArgs::new(channels))
                        .expect("tx streamer");
                }
            });
        }
    });
    assert_eq!(device.live_streamers(Direction::Tx), 0);
}

/// Vendor DAC that only counts how often it was armed.
#[derive(Default)]
struct CountingDac {
    arms: AtomicUsize,
}

impl DacControl for CountingDac {
    fn reset_sync(&self) -> Result<(), DacError> {
        Ok(())
    }

    fn arm_sync(&self, _sync_tick: u64) -> Result<(), DacError> {
        self.arms.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn verify_sync(&self, _sync_tick: u64) -> Result<(), DacError> {
        Ok(())
    }
}

#[test]
fn new_tx_streamer_resyncs_live_ones() -> Result<()> {
    let first_dac = Arc::new(CountingDac::default());
    let dac = first_dac.clone();
    let sim = Sim::build(1, SdrConfig::default(), move |_, parts| {
        parts.with_dac(0, dac.clone())
    });

    let first = sim.device.create_tx_streamer(&StreamArgs::new([0]))?;
    assert_eq!(first_dac.arms.load(Ordering::Relaxed), 1);

    let second = sim.device.create_tx_streamer(&StreamArgs::new([1]))?;
    assert_eq!(first_dac.arms.load(Ordering::Relaxed), 2);

    drop(first);
    drop(second);
    let _third = sim.device.create_tx_streamer(&StreamArgs::new([1]))?;
    assert_eq!(first_dac.arms.load(Ordering::Relaxed), 2);
    Ok(())
}
