use std::time::Duration;

use anyhow::{Context, Result};
use sdrio::{AsyncEventKind, Direction, ErrorClass, Iq, StreamArgs, StreamError, TxMetadata};
use sdrio_core::sample::{from_sc16, to_sc16};

use crate::{Sim, WAIT};

fn ramp(n: usize) -> Vec<Iq> {
    (0..n)
        .map(|i| Iq::new(i as f32 / (2 * n) as f32, -(i as f32) / (2 * n) as f32))
        .collect()
}

/// One buffer broadcast to two channels arrives on both links, converted
/// with each channel's scale factor.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tx_broadcast_reaches_every_channel() -> Result<()> {
    let sim = Sim::new(1);
    let tx = sim.device.create_tx_streamer(&StreamArgs::new([0, 1]))?;
    let mut ends = [
        sim.device_end(0, 0, Direction::Tx),
        sim.device_end(0, 1, Direction::Tx),
    ];

    let samples = ramp(100);
    let md = TxMetadata {
        time_spec: None,
        end_of_burst: true,
    };
    let sent = tx.send(&[samples.as_slice()], &md, WAIT).await?;
    assert_eq!(sent, 100);

    let scale = tx.core().rates(0).context("channel 0 rates")?.scale_factor();
    assert!((scale - 32767.0).abs() < 1.0, "tx scale {scale}");
    for end in &mut ends {
        let frame = end.next_frame().await?;
        assert!(frame.end_of_burst);
        assert!(!frame.has_timestamp);
        assert_eq!(frame.payload.len(), 100);
        assert_eq!(frame.payload[50], to_sc16(samples[50], scale));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tx_per_channel_buffers_must_match_channel_count() -> Result<()> {
    let sim = Sim::new(1);
    let tx = sim.device.create_tx_streamer(&StreamArgs::new([0, 1]))?;
    let a = ramp(4);
    let err = tx
        .send(&[a.as_slice(), &a, &a], &TxMetadata::default(), WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::BufferCount { expected: 2, got: 3 }));
    assert_eq!(err.class(), ErrorClass::Configuration);
    Ok(())
}

/// A stale frame on one channel is re-pulled until both channels start at
/// the same device time.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rx_channels_come_back_aligned() -> Result<()> {
    let sim = Sim::new(1);
    let rx = sim.device.create_rx_streamer(&StreamArgs::new([0, 1]))?;
    let mut a = sim.device_end(0, 0, Direction::Rx);
    let mut b = sim.device_end(0, 1, Direction::Rx);

    let word = 0x4000_c000;
    a.emit(vec![word; 16], Some(10_000)).await?;
    b.emit(vec![0; 16], Some(9_000)).await?;
    b.emit(vec![word; 16], Some(10_000)).await?;

    let mut buffs = vec![Vec::new(), Vec::new()];
    let (n, md) = rx.recv(&mut buffs, WAIT).await?;
    assert_eq!(n, 16);
    assert_eq!(md.timestamp, Some(10_000));
    assert!(!md.out_of_sequence);

    let scale = rx.core().rates(1).context("channel 1 rates")?.scale_factor();
    assert_eq!(buffs[1][0], from_sc16(word, scale));
    assert!((buffs[0][0].i - 0.5).abs() < 1e-3);
    Ok(())
}

/// One silent channel fails the whole call and leaves every buffer as it
/// was.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rx_timeout_returns_no_partial_data() -> Result<()> {
    let sim = Sim::new(1);
    let rx = sim.device.create_rx_streamer(&StreamArgs::new([0, 1]))?;
    let mut a = sim.device_end(0, 0, Direction::Rx);
    let _b = sim.device_end(0, 1, Direction::Rx);
    a.emit(vec![1; 8], Some(100)).await?;

    let marker = vec![Iq::new(7.0, 7.0)];
    let mut buffs = vec![marker.clone(), marker.clone()];
    assert_eq!(rx.default_timeout(), sim.device.config().streaming.recv_timeout());
    let err = rx.recv(&mut buffs, rx.default_timeout()).await.unwrap_err();
    assert!(matches!(err, StreamError::Timeout));
    assert_eq!(err.class(), ErrorClass::Timeout);
    assert_eq!(buffs, vec![marker.clone(), marker]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_unblocks_in_flight_recv() -> Result<()> {
    let sim = Sim::new(1);
    let rx = sim.device.create_rx_streamer(&StreamArgs::new([0]))?;
    let _end = sim.device_end(0, 0, Direction::Rx);

    let waiter = rx.clone();
    let pending = tokio::spawn(async move {
        let mut buffs = vec![Vec::new()];
        waiter.recv(&mut buffs, Duration::from_secs(30)).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    rx.close();

    let result = tokio::time::timeout(WAIT, pending)
        .await
        .context("recv still blocked after close")??;
    assert!(matches!(result, Err(StreamError::TransportClosed { channel: 0 })));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_burst_is_dropped_and_reported() -> Result<()> {
    let sim = Sim::new(1);
    let tx = sim.device.create_tx_streamer(&StreamArgs::new([1]))?;
    let mut end = sim.device_end(0, 1, Direction::Tx);
    sim.device.timekeeper(0)?.set_time_now(1_000_000);

    let md = TxMetadata {
        time_spec: Some(5),
        end_of_burst: true,
    };
    let sent = tx.send(&[ramp(10).as_slice()], &md, WAIT).await?;
    assert_eq!(sent, 0);

    let event = sim
        .device
        .recv_async_event(WAIT)
        .await
        .context("no late-command event")?;
    assert_eq!(event.kind, AsyncEventKind::LateCommand);
    assert_eq!(event.channel, 1);
    assert!(end.is_silent(Duration::from_millis(50)).await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_burst_carries_its_timestamp() -> Result<()> {
    let sim = Sim::new(1);
    let tx = sim.device.create_tx_streamer(&StreamArgs::new([0]))?;
    let mut end = sim.device_end(0, 0, Direction::Tx);
    let at = sim.device.timekeeper(0)?.now_ticks() + 200_000_000;

    let md = TxMetadata {
        time_spec: Some(at),
        end_of_burst: false,
    };
    tx.send(&[ramp(10).as_slice()], &md, WAIT).await?;
    let frame = end.next_frame().await?;
    assert!(frame.has_timestamp);
    assert_eq!(frame.timestamp, at);
    Ok(())
}

/// A lost frame raises a sequence-error event but the stream keeps going.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sequence_gap_is_reported_and_survived() -> Result<()> {
    let sim = Sim::new(1);
    let rx = sim.device.create_rx_streamer(&StreamArgs::new([0]))?;
    let mut end = sim.device_end(0, 0, Direction::Rx);

    end.emit(vec![1; 4], Some(1_000)).await?;
    end.codec.next_frame(vec![], None, false)?; // lost in transit
    end.emit(vec![2; 4], None).await?;

    let mut buffs = vec![Vec::new()];
    let (_, first) = rx.recv(&mut buffs, WAIT).await?;
    assert!(!first.out_of_sequence);
    let (n, second) = rx.recv(&mut buffs, WAIT).await?;
    assert_eq!(n, 4);
    assert!(second.out_of_sequence);
    // 4 samples at 200 ticks per sample after the first frame.
    assert_eq!(second.timestamp, Some(1_800));

    let event = sim
        .device
        .recv_async_event(WAIT)
        .await
        .context("no sequence-error event")?;
    assert_eq!(event.kind, AsyncEventKind::SequenceError);
    assert_eq!(event.channel, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn device_overflow_becomes_async_event() -> Result<()> {
    let sim = Sim::new(2);
    // Global channel 3 is board 1, radio B.
    let rx = sim.device.create_rx_streamer(&StreamArgs::new([3]))?;
    let mut end = sim.device_end(1, 1, Direction::Rx);

    let mut frame = end.codec.next_frame(vec![0; 4], Some(77), false)?;
    frame.error_code = sdrio_core::ErrorCode::Overflow;
    end.emit_frame(frame).await?;

    let mut buffs = vec![Vec::new()];
    rx.recv(&mut buffs, WAIT).await?;
    let event = sim
        .device
        .recv_async_event(WAIT)
        .await
        .context("no overflow event")?;
    assert_eq!(event.kind, AsyncEventKind::Overflow);
    assert_eq!(event.channel, 3);
    assert_eq!(event.timestamp, Some(77));
    Ok(())
}

#[tokio::test]
async fn event_wait_times_out_quietly() {
    let sim = Sim::new(1);
    assert!(sim
        .device
        .recv_async_event(Duration::from_millis(20))
        .await
        .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn closed_device_link_fails_send() -> Result<()> {
    let sim = Sim::new(1);
    let tx = sim.device.create_tx_streamer(&StreamArgs::new([0]))?;
    drop(sim.device_end(0, 0, Direction::Tx));

    let err = tx
        .send(&[ramp(4).as_slice()], &TxMetadata::default(), WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::TransportClosed { channel: 0 }));
    assert_eq!(err.class(), ErrorClass::Transport);
    Ok(())
}

/// One dead link fails the call, but the sibling channel still transmits.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dead_link_does_not_stop_sibling_channels() -> Result<()> {
    let sim = Sim::new(1);
    let tx = sim.device.create_tx_streamer(&StreamArgs::new([0, 1]))?;
    drop(sim.device_end(0, 0, Direction::Tx));
    let mut alive = sim.device_end(0, 1, Direction::Tx);

    let md = TxMetadata {
        time_spec: None,
        end_of_burst: true,
    };
    let err = tx
        .send(&[ramp(8).as_slice()], &md, WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::TransportClosed { channel: 0 }));

    let frame = alive.next_frame().await?;
    assert_eq!(frame.payload.len(), 8);
    assert!(frame.end_of_burst);
    Ok(())
}

/// A receive abandoned by its caller and a call that timed out on one
/// channel both leave already-received blocks queued.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interrupted_recv_loses_no_window() -> Result<()> {
    let sim = Sim::new(1);
    let rx = sim.device.create_rx_streamer(&StreamArgs::new([0, 1]))?;
    let mut a = sim.device_end(0, 0, Direction::Rx);
    let mut b = sim.device_end(0, 1, Direction::Rx);
    let mut buffs = vec![Vec::new(), Vec::new()];

    let pending = rx.recv(&mut buffs, Duration::from_secs(1));
    assert!(tokio::time::timeout(Duration::from_millis(20), pending)
        .await
        .is_err());

    a.emit(vec![1; 4], Some(1_000)).await?;
    a.emit(vec![1; 4], Some(2_000)).await?;
    let err = rx
        .recv(&mut buffs, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::Timeout));

    b.emit(vec![2; 4], Some(1_000)).await?;
    b.emit(vec![2; 4], Some(2_000)).await?;
    let (_, first) = rx.recv(&mut buffs, WAIT).await?;
    let (_, second) = rx.recv(&mut buffs, WAIT).await?;
    assert_eq!(first.timestamp, Some(1_000));
    assert_eq!(second.timestamp, Some(2_000));
    Ok(())
}
