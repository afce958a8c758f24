use std::thread;

use anyhow::{Context, Result};
use sdrio::streamer::StreamerCore;
use sdrio::{Direction, StreamArgs};
use sdrio_core::sample::from_sc16;

use crate::{Sim, WAIT};

/// A rate change made while streaming is picked up by the next receive:
/// timestamps advance at the new rate and samples use the new scale.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rx_rate_change_applies_mid_stream() -> Result<()> {
    let sim = Sim::new(1);
    let rx = sim.device.create_rx_streamer(&StreamArgs::new([0]))?;
    let mut end = sim.device_end(0, 0, Direction::Rx);

    let actual = sim.device.set_rx_rate(0, 0, 10e6)?;
    assert_eq!(actual, 10e6);
    let rates = rx.core().rates(0).context("channel 0 rates")?.clone();
    assert_eq!(rates.samp_rate(), 10e6);

    let word = 0x1000_0000;
    end.emit(vec![word; 8], Some(0)).await?;
    end.emit(vec![word; 8], None).await?;

    let mut buffs = vec![Vec::new()];
    rx.recv(&mut buffs, WAIT).await?;
    let (_, md) = rx.recv(&mut buffs, WAIT).await?;
    // 8 samples at 20 ticks per sample.
    assert_eq!(md.timestamp, Some(160));
    assert_eq!(buffs[0][0], from_sc16(word, rates.scale_factor()));
    Ok(())
}

#[test]
fn repeated_rate_update_is_idempotent() -> Result<()> {
    let sim = Sim::new(1);
    let tx = sim.device.create_tx_streamer(&StreamArgs::new([1]))?;
    sim.device.set_tx_rate(0, 1, 2e6)?;
    let rates = tx.core().rates(0).context("channel 0 rates")?.clone();
    let once = (rates.samp_rate(), rates.scale_factor());
    sim.device.update_tx_samp_rate(0, 1, 2e6);
    sim.device.update_tx_samp_rate(0, 1, 2e6);
    assert_eq!((rates.samp_rate(), rates.scale_factor()), once);
    Ok(())
}

/// (tick rate, sample rate, scale) of every channel.
fn rate_cells(core: &StreamerCore) -> Vec<(f64, f64, f64)> {
    (0..core.num_channels())
        .filter_map(|i| core.rates(i))
        .map(|r| (r.tick_rate(), r.samp_rate(), r.scale_factor()))
        .collect()
}

#[test]
fn repeated_tick_rate_update_is_idempotent() -> Result<()> {
    let sim = Sim::new(1);
    let rx = sim.device.create_rx_streamer(&StreamArgs::new([0, 1]))?;
    let tx = sim.device.create_tx_streamer(&StreamArgs::new([0, 1]))?;
    sim.device.set_rx_rate(0, 1, 4e6)?;
    sim.device.set_tx_rate(0, 0, 2e6)?;

    sim.device.update_tick_rate(0, 200e6);
    let once = (rate_cells(rx.core()), rate_cells(tx.core()));
    sim.device.update_tick_rate(0, 200e6);
    let twice = (rate_cells(rx.core()), rate_cells(tx.core()));

    assert_eq!(once, twice);
    assert_eq!(once.0.len(), 2);
    assert_eq!(once.0[1].1, 4e6);
    assert_eq!(once.1[0].1, 2e6);
    Ok(())
}

/// Board-event threads pushing rate updates race application threads that
/// create and drop streamers. Nothing may panic and the registry must end
/// up empty.
#[test]
fn rate_updates_race_streamer_teardown() {
    let sim = Sim::new(2);
    let device = &sim.device;

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..200 {
                let channel = i % 4;
                let rx = device
                    .create_rx_streamer(&StreamArgs::new([channel]))
                    .expect("rx streamer");
                drop(rx);
            }
        });
        s.spawn(|| {
            for i in 0..500 {
                device.update_rx_samp_rate(i % 2, (i / 2) % 2, 1e6);
                device.update_tick_rate(i % 2, 200e6);
            }
        });
    });

    assert_eq!(device.live_streamers(Direction::Rx), 0);
}

#[test]
fn tick_rate_change_replans_every_dsp() -> Result<()> {
    let sim = Sim::new(1);
    let rx = sim.device.create_rx_streamer(&StreamArgs::new([0, 1]))?;
    sim.device.set_rx_rate(0, 1, 4e6)?;
    sim.device.set_tick_rate(0, 100e6)?;

    assert_eq!(sim.device.rx_rate(0, 0)?, 1e6);
    assert_eq!(sim.device.rx_rate(0, 1)?, 4e6);
    for i in 0..2 {
        let rates = rx.core().rates(i).context("rates")?;
        assert_eq!(rates.tick_rate(), 100e6);
    }
    assert_eq!(rx.core().rates(1).context("rates")?.samp_rate(), 4e6);
    Ok(())
}
