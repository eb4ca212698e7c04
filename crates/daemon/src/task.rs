//! Per-daemon supervision task.
//!
//! One tokio task per configured daemon. It owns the child process and
//! its three pipes, the decoder, the write buffer and the lifecycle
//! state machine, and reacts to engine ticks broadcast over a watch
//! channel. Decoded values flow back to the engine over an mpsc channel.
//!
//! Nothing here blocks and nothing here aborts the process: every I/O
//! failure is downgraded to a warning and routed through the
//! kill → respawn path.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::decoder::{Decoder, Frame};
use crate::lifecycle::{Action, Lifecycle, LifecycleState};
use crate::protocol::{self, VarKind};
use crate::writer::WriteBuffer;

/// One variable served by a daemon. `id` is daemon-local and dense.
#[derive(Debug, Clone)]
pub struct DaemonVarSpec {
    pub id: u32,
    pub kind: VarKind,
    /// Update divisor forwarded in the descriptor: the child samples
    /// this value every `divisor` ticks.
    pub divisor: u64,
    /// Opaque config string interpreted by the child.
    pub config: String,
}

/// Static description of one supervised daemon.
#[derive(Debug, Clone)]
pub struct DaemonSpec {
    pub name: String,
    /// Command line, run via `sh -c`.
    pub command: String,
    pub interval_ms: u64,
    pub log_level: u8,
    pub timeout_ticks: u64,
    pub max_log_len: usize,
    pub vars: Vec<DaemonVarSpec>,
}

/// A decoded daemon value.
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonValue {
    Num(f64),
    Str(String),
}

/// What a daemon task reports back to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonEvent {
    /// A fresh value for daemon-local var `id`.
    Value {
        daemon: usize,
        id: u32,
        value: DaemonValue,
    },
    /// A new incarnation is about to start; all owned vars go back to
    /// NaN / empty so stale values never survive a respawn.
    Reset { daemon: usize },
}

/// Supervision task state for one daemon.
pub struct DaemonTask {
    index: usize,
    spec: DaemonSpec,
    kinds: Vec<VarKind>,
    /// Handshake plus descriptors, serialized once.
    greeting: Vec<u8>,
    lifecycle: Lifecycle,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<Lines<BufReader<ChildStderr>>>,
    decoder: Decoder,
    wbuf: WriteBuffer,
    tick_rx: watch::Receiver<u64>,
    events: mpsc::Sender<DaemonEvent>,
}

impl DaemonTask {
    pub fn new(
        index: usize,
        spec: DaemonSpec,
        tick_rx: watch::Receiver<u64>,
        events: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let kinds: Vec<VarKind> = spec.vars.iter().map(|v| v.kind).collect();

        let mut greeting = Vec::new();
        protocol::encode_handshake(
            &mut greeting,
            spec.interval_ms,
            spec.log_level,
            spec.timeout_ticks,
        );
        for var in &spec.vars {
            protocol::encode_descriptor(
                &mut greeting,
                var.kind,
                var.id,
                var.divisor.max(1),
                var.config.as_bytes(),
            );
        }
        protocol::encode_descriptor_end(&mut greeting);

        let lifecycle = Lifecycle::new(spec.timeout_ticks);
        let decoder = Decoder::new(spec.max_log_len);
        DaemonTask {
            index,
            spec,
            kinds,
            greeting,
            lifecycle,
            child: None,
            stdin: None,
            stdout: None,
            stderr: None,
            decoder,
            wbuf: WriteBuffer::new(),
            tick_rx,
            events,
        }
    }

    /// Run until the engine drops the tick channel.
    pub async fn run(mut self) {
        let mut buf = [0u8; 4096];
        let mut frames: Vec<Frame> = Vec::new();
        loop {
            tokio::select! {
                changed = self.tick_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.on_tick().await;
                }
                read = read_some(&mut self.stdout, &mut buf) => {
                    self.on_stdout(read, &buf, &mut frames).await;
                }
                line = next_stderr(&mut self.stderr) => {
                    self.on_stderr(line);
                }
                written = write_some(&mut self.stdin, self.wbuf.pending()) => {
                    match written {
                        Ok(0) | Err(_) => {
                            warn!(daemon = %self.spec.name, "stdin write failed");
                            self.condemn();
                        }
                        Ok(n) => self.wbuf.advance(n),
                    }
                }
            }
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }

    async fn on_tick(&mut self) {
        match self.lifecycle.on_tick() {
            Some(Action::Spawn) => self.spawn().await,
            Some(Action::Close) => {
                warn!(daemon = %self.spec.name, "liveness timeout, condemning child");
                self.close_pipes();
            }
            Some(Action::Sigterm) => {
                debug!(daemon = %self.spec.name, "sending SIGTERM");
                self.signal(libc::SIGTERM);
            }
            Some(Action::Sigkill) => {
                debug!(daemon = %self.spec.name, "sending SIGKILL");
                if let Some(child) = self.child.as_mut() {
                    let _ = child.start_kill();
                }
            }
            Some(Action::Reap) => self.reap(),
            None => {
                // Healthy running tick: liveness byte out, batch swap if
                // the previous one drained.
                self.wbuf.queue_alive();
                if self.wbuf.ready() {
                    let _ = self.wbuf.flush();
                } else {
                    trace!(daemon = %self.spec.name, "write buffer busy, deferring flush");
                }
            }
        }
    }

    async fn spawn(&mut self) {
        // The new incarnation must never show the old one's values.
        let _ = self
            .events
            .send(DaemonEvent::Reset {
                daemon: self.index,
            })
            .await;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.spec.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match cmd.spawn() {
            Ok(mut child) => {
                self.stdin = child.stdin.take();
                self.stdout = child.stdout.take();
                self.stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
                self.child = Some(child);
                self.decoder.reset();
                self.wbuf.clear();
                self.wbuf.queue_bytes(&self.greeting);
                let _ = self.wbuf.flush();
                self.lifecycle.spawned();
                info!(daemon = %self.spec.name, command = %self.spec.command, "spawned");
            }
            Err(e) => {
                warn!(daemon = %self.spec.name, error = %e, "spawn failed");
            }
        }
    }

    async fn on_stdout(&mut self, read: std::io::Result<usize>, buf: &[u8], frames: &mut Vec<Frame>) {
        match read {
            Err(e) => {
                warn!(daemon = %self.spec.name, error = %e, "stdout read failed");
                self.condemn();
            }
            Ok(0) => {
                if self.lifecycle.state() == LifecycleState::Running {
                    warn!(daemon = %self.spec.name, "child closed its stdout");
                    self.condemn();
                } else {
                    self.stdout = None;
                }
            }
            Ok(n) => {
                self.lifecycle.note_data();
                frames.clear();
                if let Err(e) = self.decoder.feed(&buf[..n], &self.kinds, frames) {
                    warn!(daemon = %self.spec.name, error = %e, "protocol error");
                    self.condemn();
                    return;
                }
                for frame in frames.drain(..) {
                    self.dispatch(frame).await;
                }
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) {
        match frame {
            Frame::Num { id, value } => {
                let _ = self
                    .events
                    .send(DaemonEvent::Value {
                        daemon: self.index,
                        id,
                        value: DaemonValue::Num(value),
                    })
                    .await;
            }
            Frame::Str { id, bytes } => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                let _ = self
                    .events
                    .send(DaemonEvent::Value {
                        daemon: self.index,
                        id,
                        value: DaemonValue::Str(text),
                    })
                    .await;
            }
            Frame::Log { level, message } => {
                let message = String::from_utf8_lossy(&message);
                let name = &self.spec.name;
                match level {
                    1 => error!(daemon = %name, "{message}"),
                    2 => warn!(daemon = %name, "{message}"),
                    3 | 4 => info!(daemon = %name, "{message}"),
                    _ => debug!(daemon = %name, "{message}"),
                }
            }
        }
    }

    fn on_stderr(&mut self, line: std::io::Result<Option<String>>) {
        match line {
            Ok(Some(line)) => warn!(daemon = %self.spec.name, "{line}"),
            Ok(None) | Err(_) => self.stderr = None,
        }
    }

    /// Condemn the connection: pipes close and deregister now, the kill
    /// escalation starts next tick.
    fn condemn(&mut self) {
        self.lifecycle.fail();
        self.close_pipes();
    }

    fn close_pipes(&mut self) {
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
        self.wbuf.clear();
        self.decoder.reset();
    }

    fn signal(&mut self, sig: i32) {
        if let Some(pid) = self.child.as_ref().and_then(Child::id) {
            // SAFETY: plain kill(2) on a pid we own; no memory involved.
            unsafe {
                libc::kill(pid as i32, sig);
            }
        }
    }

    fn reap(&mut self) {
        let Some(child) = self.child.as_mut() else {
            self.lifecycle.reaped();
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                info!(daemon = %self.spec.name, %status, "child reaped");
                self.child = None;
                self.lifecycle.reaped();
            }
            Ok(None) => {}
            Err(e) => {
                warn!(daemon = %self.spec.name, error = %e, "waitpid failed");
                self.child = None;
                self.lifecycle.reaped();
            }
        }
    }
}

async fn read_some(
    stdout: &mut Option<ChildStdout>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match stdout {
        Some(pipe) => pipe.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn next_stderr(
    stderr: &mut Option<Lines<BufReader<ChildStderr>>>,
) -> std::io::Result<Option<String>> {
    match stderr {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

async fn write_some(stdin: &mut Option<ChildStdin>, chunk: &[u8]) -> std::io::Result<usize> {
    match stdin {
        Some(pipe) if !chunk.is_empty() => pipe.write(chunk).await,
        _ => std::future::pending().await,
    }
}
