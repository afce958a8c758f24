use std::time::Duration;

use anyhow::Result;
use sdrio::{AsyncEventKind, Direction, Iq, SdrConfig, StreamArgs, TxMetadata};

use crate::Sim;

const SMALL_FRAMES: &str = r#"
[streaming]
samples_per_frame = 10

[events]
capacity = 2
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn configured_frame_size_splits_bursts() -> Result<()> {
    let sim = Sim::with_config(1, SdrConfig::from_toml(SMALL_FRAMES)?);
    let tx = sim.device.create_tx_streamer(&StreamArgs::new([0]))?;
    let mut end = sim.device_end(0, 0, Direction::Tx);

    let burst = vec![Iq::new(0.25, 0.25); 25];
    let md = TxMetadata {
        time_spec: None,
        end_of_burst: true,
    };
    tx.send(&[burst.as_slice()], &md, tx.default_timeout()).await?;

    let mut sizes = Vec::new();
    let mut eob = Vec::new();
    for _ in 0..3 {
        let frame = end.next_frame().await?;
        sizes.push(frame.payload.len());
        eob.push(frame.end_of_burst);
    }
    assert_eq!(sizes, vec![10, 10, 5]);
    assert_eq!(eob, vec![false, false, true]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stream_args_override_frame_size() -> Result<()> {
    let sim = Sim::with_config(1, SdrConfig::from_toml(SMALL_FRAMES)?);
    let tx = sim
        .device
        .create_tx_streamer(&StreamArgs::new([1]).with_samples_per_frame(4))?;
    let mut end = sim.device_end(0, 1, Direction::Tx);

    let burst = vec![Iq::default(); 6];
    tx.send(&[burst.as_slice()], &TxMetadata::default(), Duration::from_secs(1))
        .await?;
    assert_eq!(end.next_frame().await?.payload.len(), 4);
    assert_eq!(end.next_frame().await?.payload.len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn event_queue_keeps_newest_within_capacity() -> Result<()> {
    let sim = Sim::with_config(1, SdrConfig::from_toml(SMALL_FRAMES)?);
    let tx = sim.device.create_tx_streamer(&StreamArgs::new([0]))?;
    let _end = sim.device_end(0, 0, Direction::Tx);
    sim.device.timekeeper(0)?.set_time_now(1_000_000);

    let md = TxMetadata {
        time_spec: Some(1),
        end_of_burst: true,
    };
    let burst = [Iq::default()];
    for _ in 0..3 {
        tx.send(&[burst.as_slice()], &md, Duration::from_secs(1)).await?;
    }

    let events = sim.device.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events.dropped(), 1);
    let event = events.try_pop().map(|e| e.kind);
    assert_eq!(event, Some(AsyncEventKind::LateCommand));
    Ok(())
}
