//! End-to-end pipeline tests.
//!
//! These drive the full chain: config text → compiled formulas → tick
//! evaluation → dirty batching, plus the wire protocol against a real
//! subprocess.

use std::time::Duration;

use sysguard_daemon::{
    DaemonEvent, DaemonSpec, DaemonTask, DaemonValue, DaemonVarSpec, Decoder, Frame, VarKind,
    WriteBuffer,
};
use sysguard_tests::TestHarness;
use tokio::sync::{mpsc, watch};

/// A config of pure formulas evaluates and batches on the first tick,
/// then stays quiet while nothing changes.
#[test]
fn test_formula_pipeline_flushes_once() {
    let mut harness = TestHarness::from_config(
        "interval 1.0\n\
         var sum   num 5 3 ADD\n\
         var label str \"cpu: \" STRUP\n",
    );

    harness.run_ticks(1);
    assert_eq!(
        harness.take_flushed(),
        vec![
            ("sum".to_string(), "8".to_string()),
            ("label".to_string(), "CPU: ".to_string()),
        ]
    );

    harness.run_ticks(5);
    assert!(harness.take_flushed().is_empty());
}

/// Heap slots persist across ticks, so latch formulas accumulate.
#[test]
fn test_latch_formula_accumulates_across_ticks() {
    let mut harness = TestHarness::from_config(
        "var counter num 1 LOAD 0 0 MAX 1 ADD STORE 0 LOAD 0\n",
    );
    harness.run_ticks(3);
    assert_eq!(harness.num("counter"), Some(3.0));
}

/// Daemon values arrive asynchronously, mark their vars dirty, and are
/// flushed with the next tick's batch.
#[test]
fn test_daemon_values_flow_into_vars() {
    let mut harness = TestHarness::from_config(
        "daemon stats /bin/true\n\
         var cpu  num daemon:stats:num:cpu/user 100 MUL ROUND\n\
         var root str daemon:stats:str:disk/root\n",
    );

    // Before any daemon traffic the numeric var is NaN and the string
    // var is empty; the first tick flushes the NaN once.
    harness.run_ticks(1);
    let first = harness.take_flushed();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].0, "cpu");

    harness.apply(DaemonEvent::Value {
        daemon: 0,
        id: 0,
        value: DaemonValue::Num(0.4242),
    });
    harness.apply(DaemonEvent::Value {
        daemon: 0,
        id: 1,
        value: DaemonValue::Str("/dev/sda1 47%".to_string()),
    });

    harness.run_ticks(1);
    assert_eq!(
        harness.take_flushed(),
        vec![
            ("cpu".to_string(), "42".to_string()),
            ("root".to_string(), "/dev/sda1 47%".to_string()),
        ]
    );

    // A respawn resets the daemon's vars; consumers see NaN again
    // rather than the dead incarnation's values.
    harness.apply(DaemonEvent::Reset { daemon: 0 });
    harness.run_ticks(1);
    let after_reset = harness.take_flushed();
    assert_eq!(after_reset.len(), 2);
    assert!(harness.num("cpu").unwrap().is_nan());
    assert_eq!(harness.text("root").unwrap(), "");
}

/// Writer output decodes back to the exact frames, at any chunking.
#[test]
fn test_wire_round_trip_through_write_buffer() {
    let mut wbuf = WriteBuffer::new();
    wbuf.queue_bytes(sysguard_daemon::protocol::MAGIC);
    wbuf.queue_num(1, f64::from_bits(0x400921FB54442D18));
    wbuf.queue_str(0, b"7 days");
    wbuf.queue_log(2, b"collector lagging");
    wbuf.flush().unwrap();

    let stream = wbuf.pending().to_vec();
    let kinds = [VarKind::Str, VarKind::Num];
    let mut decoder = Decoder::new(1024);
    let mut frames = Vec::new();
    for &b in &stream {
        decoder.feed(&[b], &kinds, &mut frames).unwrap();
    }
    assert_eq!(
        frames,
        vec![
            Frame::Num {
                id: 1,
                value: f64::from_bits(0x400921FB54442D18)
            },
            Frame::Str {
                id: 0,
                bytes: b"7 days".to_vec()
            },
            Frame::Log {
                level: 2,
                message: b"collector lagging".to_vec()
            },
        ]
    );
}

fn spec_with_command(command: &str) -> DaemonSpec {
    DaemonSpec {
        name: "probe".to_string(),
        command: command.to_string(),
        interval_ms: 100,
        log_level: 2,
        timeout_ticks: 2,
        max_log_len: 256,
        vars: vec![DaemonVarSpec {
            id: 0,
            kind: VarKind::Num,
            divisor: 1,
            config: "cpu/user".to_string(),
        }],
    }
}

/// A real child that speaks the protocol: after the magic it sends one
/// numeric frame for id 0 carrying 8.0, whose big-endian IEEE-754 bytes
/// are 40 20 00 00 00 00 00 00.
#[tokio::test]
async fn test_supervised_child_delivers_values() {
    let command = "printf '\\nxsysguardd_init_version_1\\n\
                   \\000\\000\\000\\000\\100\\040\\000\\000\\000\\000\\000\\000'; sleep 5";
    let (tick_tx, tick_rx) = watch::channel(0u64);
    let (event_tx, mut event_rx) = mpsc::channel(16);

    let task = DaemonTask::new(0, spec_with_command(command), tick_rx, event_tx);
    let runner = tokio::spawn(task.run());

    // First tick spawns the child (after resetting its vars).
    tick_tx.send(1).unwrap();
    let reset = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("reset event in time")
        .expect("channel open");
    assert_eq!(reset, DaemonEvent::Reset { daemon: 0 });

    let value = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("value event in time")
        .expect("channel open");
    assert_eq!(
        value,
        DaemonEvent::Value {
            daemon: 0,
            id: 0,
            value: DaemonValue::Num(8.0),
        }
    );

    drop(tick_tx);
    let _ = runner.await;
}

/// A child that never speaks is condemned and respawned: the second
/// Reset event marks the new incarnation.
#[tokio::test]
async fn test_silent_child_is_respawned() {
    let (tick_tx, tick_rx) = watch::channel(0u64);
    let (event_tx, mut event_rx) = mpsc::channel(64);

    let task = DaemonTask::new(0, spec_with_command("sleep 30"), tick_rx, event_tx);
    let runner = tokio::spawn(task.run());

    let mut resets = 0;
    let mut tick = 0u64;
    while resets < 2 && tick < 100 {
        tick += 1;
        tick_tx.send(tick).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, DaemonEvent::Reset { .. }) {
                resets += 1;
            }
        }
    }
    assert_eq!(resets, 2, "silent child was not respawned");

    drop(tick_tx);
    let _ = runner.await;
}
