//! Daemon lifecycle state machine.
//!
//! Pure and tick-driven: [`Lifecycle::on_tick`] advances the state and
//! issues at most one action per tick, so SIGTERM and SIGKILL can never
//! land in the same tick. Liveness is tick-counted, not wall-clock: a
//! child that produces no output for the configured number of ticks is
//! presumed hung and escalated through the kill path.

use tracing::debug;

/// Where one supervised child currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No child; the next tick spawns one.
    NotRunning,
    /// Child alive, pipes open.
    Running,
    /// Condemned this tick; pipes already closed, SIGTERM goes out next
    /// tick.
    Kill,
    /// SIGTERM sent; SIGKILL goes out next tick.
    SendSigterm,
    /// SIGKILL sent; reap on every following tick until waitpid
    /// succeeds.
    SendSigkill,
}

/// What the supervisor should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start a fresh child (resetting its vars first).
    Spawn,
    /// Close the pipes; the child is condemned.
    Close,
    /// Deliver SIGTERM.
    Sigterm,
    /// Deliver SIGKILL.
    Sigkill,
    /// Try a non-blocking reap.
    Reap,
}

#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
    /// Consecutive ticks without any received data.
    quiet_ticks: u64,
    /// Quiet ticks tolerated before escalation; 0 disables the check.
    timeout_ticks: u64,
}

impl Lifecycle {
    pub fn new(timeout_ticks: u64) -> Self {
        Lifecycle {
            state: LifecycleState::NotRunning,
            quiet_ticks: 0,
            timeout_ticks,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Data arrived from the child; the liveness clock restarts.
    pub fn note_data(&mut self) {
        self.quiet_ticks = 0;
    }

    /// An I/O or protocol error condemned the connection. The caller
    /// closes the pipes itself; escalation starts next tick.
    pub fn fail(&mut self) {
        if self.state == LifecycleState::Running {
            debug!("connection condemned");
            self.state = LifecycleState::Kill;
        }
    }

    /// A fresh child is up with all three pipes attached.
    pub fn spawned(&mut self) {
        self.state = LifecycleState::Running;
        self.quiet_ticks = 0;
    }

    /// waitpid succeeded; the pid is gone.
    pub fn reaped(&mut self) {
        self.state = LifecycleState::NotRunning;
    }

    /// Advance one scheduler tick, returning at most one action.
    pub fn on_tick(&mut self) -> Option<Action> {
        match self.state {
            LifecycleState::NotRunning => Some(Action::Spawn),
            LifecycleState::Running => {
                self.quiet_ticks += 1;
                if self.timeout_ticks > 0 && self.quiet_ticks >= self.timeout_ticks {
                    debug!(quiet = self.quiet_ticks, "liveness timeout");
                    self.state = LifecycleState::Kill;
                    Some(Action::Close)
                } else {
                    None
                }
            }
            LifecycleState::Kill => {
                self.state = LifecycleState::SendSigterm;
                Some(Action::Sigterm)
            }
            LifecycleState::SendSigterm => {
                self.state = LifecycleState::SendSigkill;
                Some(Action::Sigkill)
            }
            LifecycleState::SendSigkill => Some(Action::Reap),
        }
    }
}
