//! Tick engine.
//!
//! Glues the pieces together: compiles the configured formulas against
//! the provider/daemon resolver, spawns one supervision task per
//! daemon, and drives the per-tick cycle: broadcast the tick, apply
//! arrived daemon values, re-evaluate eligible vars, flush one batch of
//! dirty notifications.
//!
//! Everything var-related runs on the calling task; daemon tasks only
//! touch their own child process and report back over a channel.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use sysguard_daemon::{DaemonEvent, DaemonSpec, DaemonTask, DaemonValue, DaemonVarSpec};
use sysguard_formula::{Value, compile};

use crate::config::Config;
use crate::error::EngineError;
use crate::providers::PipelineResolver;
use crate::store::DaemonVarStore;
use crate::vars::{VarId, VarRegistry};

/// Change consumer invoked once per dirty var per flush.
pub type Consumer<'a> = dyn FnMut(&str, Value<'_>) + 'a;

#[derive(Debug)]
pub struct Engine {
    registry: VarRegistry,
    store: Rc<RefCell<DaemonVarStore>>,
    /// Daemon specs waiting to be spawned by [`Engine::run`].
    daemons: Vec<DaemonSpec>,
    /// (daemon, local id) → vars whose formulas read that value.
    dependents: HashMap<(usize, u32), Vec<VarId>>,
    interval: Duration,
}

impl Engine {
    /// Compile a parsed config into a ready-to-run engine.
    pub fn build(config: Config) -> Result<Engine, EngineError> {
        let store = Rc::new(RefCell::new(DaemonVarStore::new()));

        let mut daemons: Vec<DaemonSpec> = Vec::with_capacity(config.daemons.len());
        for decl in &config.daemons {
            if store.borrow().daemon_index(&decl.name).is_some() {
                return Err(EngineError::DuplicateDaemon {
                    name: decl.name.clone(),
                    line: decl.line,
                });
            }
            store.borrow_mut().add_daemon(&decl.name);
            daemons.push(DaemonSpec {
                name: decl.name.clone(),
                command: decl.command.clone(),
                interval_ms: (config.interval * 1000.0) as u64,
                log_level: 2,
                timeout_ticks: config.timeout_ticks,
                max_log_len: config.max_log_len,
                vars: Vec::new(),
            });
        }

        let resolver = PipelineResolver::new(Rc::clone(&store));
        let mut registry = VarRegistry::new();
        let mut dependents: HashMap<(usize, u32), Vec<VarId>> = HashMap::new();

        for decl in &config.vars {
            if registry.contains(&decl.name) {
                return Err(EngineError::DuplicateVar {
                    name: decl.name.clone(),
                    line: decl.line,
                });
            }
            let program =
                compile(&decl.formula, decl.kind, &resolver).map_err(|source| {
                    EngineError::Formula {
                        name: decl.name.clone(),
                        line: decl.line,
                        source,
                    }
                })?;
            let id = registry.add(&decl.name, program, decl.divisor);
            for daemon_ref in resolver.drain_pending() {
                daemons[daemon_ref.daemon].vars.push(DaemonVarSpec {
                    id: daemon_ref.id,
                    kind: daemon_ref.kind,
                    divisor: decl.divisor,
                    config: daemon_ref.config,
                });
                dependents
                    .entry((daemon_ref.daemon, daemon_ref.id))
                    .or_default()
                    .push(id);
            }
        }

        info!(
            vars = registry.len(),
            daemons = daemons.len(),
            "engine built"
        );
        Ok(Engine {
            registry,
            store,
            daemons,
            dependents,
            interval: Duration::from_secs_f64(config.interval),
        })
    }

    pub fn registry(&self) -> &VarRegistry {
        &self.registry
    }

    /// One synchronous tick: re-evaluate eligible vars, flush dirty.
    /// Daemon values that already arrived were applied on receipt.
    pub fn tick_once(&mut self, tick: u64, consumer: &mut Consumer<'_>) {
        self.registry.update_eligible(tick);
        self.registry.flush_dirty(consumer);
    }

    /// Apply one daemon event: write the store, then immediately
    /// re-evaluate the vars reading that value so they are dirty for
    /// the tick's flush.
    pub fn apply_event(&mut self, event: DaemonEvent) {
        match event {
            DaemonEvent::Value { daemon, id, value } => {
                match value {
                    DaemonValue::Num(n) => self.store.borrow_mut().set_num(daemon, id, n),
                    DaemonValue::Str(s) => self.store.borrow_mut().set_str(daemon, id, &s),
                }
                if let Some(vars) = self.dependents.get(&(daemon, id)) {
                    for &var in vars {
                        self.registry.update(var);
                    }
                }
            }
            DaemonEvent::Reset { daemon } => {
                debug!(daemon, "daemon vars reset");
                self.store.borrow_mut().reset_daemon(daemon);
                for ((d, _), vars) in &self.dependents {
                    if *d == daemon {
                        for &var in vars {
                            self.registry.update(var);
                        }
                    }
                }
            }
        }
    }

    /// Run the engine until `max_ticks` ticks have elapsed (0 = run
    /// forever). Spawns one supervision task per configured daemon.
    pub async fn run(mut self, max_ticks: u64, consumer: &mut Consumer<'_>) {
        let (tick_tx, _tick_rx) = watch::channel(0u64);
        let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(256);

        for (index, spec) in self.daemons.drain(..).enumerate() {
            let task = DaemonTask::new(index, spec, tick_tx.subscribe(), event_tx.clone());
            tokio::spawn(task.run());
        }
        drop(event_tx);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; skip it so tick 1
        // happens one interval after startup, like every later one.
        ticker.tick().await;

        let mut tick: u64 = 0;
        let mut events_open = true;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick += 1;
                    let _ = tick_tx.send(tick);
                    self.tick_once(tick, consumer);
                    if max_ticks > 0 && tick >= max_ticks {
                        break;
                    }
                }
                event = event_rx.recv(), if events_open => {
                    match event {
                        Some(event) => self.apply_event(event),
                        None => events_open = false,
                    }
                }
            }
        }
    }
}
