//! Test harness for end-to-end pipeline runs.
//!
//! Drives an [`Engine`] tick by tick without timers or real daemons;
//! daemon traffic is injected as events.

use sysguard_daemon::DaemonEvent;
use sysguard_formula::Value;
use sysguard_runtime::{Config, Engine};

/// A synchronously driven engine plus everything it flushed.
pub struct TestHarness {
    engine: Engine,
    tick: u64,
    flushed: Vec<(String, String)>,
}

impl TestHarness {
    /// Parse and build; panics on config errors (tests want the
    /// diagnostic).
    pub fn from_config(source: &str) -> Self {
        let config = Config::parse(source).expect("config parses");
        let engine = Engine::build(config).expect("engine builds");
        TestHarness {
            engine,
            tick: 0,
            flushed: Vec::new(),
        }
    }

    /// Run `n` ticks, collecting every flushed notification.
    pub fn run_ticks(&mut self, n: u64) {
        for _ in 0..n {
            self.tick += 1;
            let flushed = &mut self.flushed;
            self.engine.tick_once(self.tick, &mut |name, value| {
                let rendered = match value {
                    Value::Num(v) => v.to_string(),
                    Value::Str(s) => s.to_string(),
                };
                flushed.push((name.to_string(), rendered));
            });
        }
    }

    /// Inject a daemon event, as if its supervision task reported it.
    pub fn apply(&mut self, event: DaemonEvent) {
        self.engine.apply_event(event);
    }

    /// Take everything flushed so far.
    pub fn take_flushed(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.flushed)
    }

    pub fn num(&self, name: &str) -> Option<f64> {
        self.engine.registry().cached(name)?.as_num()
    }

    pub fn text(&self, name: &str) -> Option<String> {
        Some(self.engine.registry().cached(name)?.as_str()?.to_string())
    }
}
