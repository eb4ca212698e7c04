//! Value providers.
//!
//! Formula identifiers the compiler does not recognize resolve here.
//! Two layers:
//!
//! - a link-time registry of in-process providers collected with
//!   [`linkme::distributed_slice`]; providers register themselves
//!   anywhere in the build and become visible to every config
//! - `daemon:<name>:<num|str>:<config>` references, which allocate a
//!   slot in the [`DaemonVarStore`] and read it at evaluation time

use std::cell::RefCell;
use std::rc::Rc;

use linkme::distributed_slice;

use sysguard_daemon::VarKind;
use sysguard_formula::{Source, SourceResolver};

use crate::store::DaemonVarStore;

/// A registered in-process provider.
pub struct ProviderDescriptor {
    /// Formula name (the part before the first `:`).
    pub name: &'static str,
    /// One-line description.
    pub doc: &'static str,
    /// Build a source for the given argument; `None` rejects the
    /// reference at compile time.
    pub make: fn(&str) -> Option<Source>,
}

/// All providers linked into this binary.
#[distributed_slice]
pub static PROVIDERS: [ProviderDescriptor];

/// Look up a provider by formula name.
pub fn lookup(name: &str) -> Option<&'static ProviderDescriptor> {
    PROVIDERS.iter().find(|p| p.name == name)
}

#[distributed_slice(PROVIDERS)]
static ENV: ProviderDescriptor = ProviderDescriptor {
    name: "env",
    doc: "environment variable, read at evaluation time",
    make: make_env,
};

fn make_env(arg: &str) -> Option<Source> {
    if arg.is_empty() {
        return None;
    }
    let name = arg.to_string();
    Some(Source::from_str_fn(move || {
        std::env::var(&name).unwrap_or_default()
    }))
}

#[distributed_slice(PROVIDERS)]
static UPTIME: ProviderDescriptor = ProviderDescriptor {
    name: "uptime",
    doc: "seconds since boot, from /proc/uptime",
    make: make_uptime,
};

fn make_uptime(_arg: &str) -> Option<Source> {
    Some(Source::from_num(|| {
        std::fs::read_to_string("/proc/uptime")
            .ok()
            .and_then(|s| s.split_whitespace().next()?.parse().ok())
            .unwrap_or(f64::NAN)
    }))
}

/// A daemon var allocated while compiling a formula.
#[derive(Debug, Clone)]
pub struct DaemonRef {
    pub daemon: usize,
    pub id: u32,
    pub kind: VarKind,
    pub config: String,
}

/// Resolver handed to the formula compiler: static providers plus
/// daemon references against a shared store.
pub struct PipelineResolver {
    store: Rc<RefCell<DaemonVarStore>>,
    /// Daemon vars allocated since the last drain; the config loader
    /// attributes them to the var whose formula is being compiled.
    pending: RefCell<Vec<DaemonRef>>,
}

impl PipelineResolver {
    pub fn new(store: Rc<RefCell<DaemonVarStore>>) -> Self {
        PipelineResolver {
            store,
            pending: RefCell::new(Vec::new()),
        }
    }

    /// Take the daemon references allocated by the formula compiled
    /// since the previous drain.
    pub fn drain_pending(&self) -> Vec<DaemonRef> {
        std::mem::take(&mut self.pending.borrow_mut())
    }

    fn resolve_daemon(&self, arg: &str) -> Option<Source> {
        let mut parts = arg.splitn(3, ':');
        let daemon_name = parts.next()?;
        let kind = match parts.next()? {
            "num" => VarKind::Num,
            "str" => VarKind::Str,
            _ => return None,
        };
        let config = parts.next().unwrap_or("");
        if config.is_empty() {
            return None;
        }

        let daemon = self.store.borrow().daemon_index(daemon_name)?;
        let id = self.store.borrow_mut().add_var(daemon, kind);
        self.pending.borrow_mut().push(DaemonRef {
            daemon,
            id,
            kind,
            config: config.to_string(),
        });

        let store = Rc::clone(&self.store);
        Some(match kind {
            VarKind::Num => Source::from_num(move || store.borrow().num(daemon, id)),
            VarKind::Str => Source::from_str_fn(move || store.borrow().text(daemon, id)),
        })
    }
}

impl SourceResolver for PipelineResolver {
    fn resolve(&self, name: &str, arg: &str) -> Option<Source> {
        if name == "daemon" {
            self.resolve_daemon(arg)
        } else {
            lookup(name).and_then(|p| (p.make)(arg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysguard_formula::{EvalStack, ValueKind, compile};

    #[test]
    fn test_env_provider_reads_at_eval_time() {
        let store = Rc::new(RefCell::new(DaemonVarStore::new()));
        let resolver = PipelineResolver::new(store);
        // SAFETY: tests in this module do not race over the environment.
        unsafe { std::env::set_var("SYSGUARD_PROVIDER_TEST", "abc") };
        let mut program = compile("env:SYSGUARD_PROVIDER_TEST STRLEN", ValueKind::Num, &resolver)
            .unwrap();
        let mut stack = EvalStack::new();
        assert_eq!(program.eval(&mut stack).as_num().unwrap(), 3.0);
    }

    #[test]
    fn test_daemon_reference_allocates_and_reads() {
        let store = Rc::new(RefCell::new(DaemonVarStore::new()));
        store.borrow_mut().add_daemon("stats");
        let resolver = PipelineResolver::new(Rc::clone(&store));

        let mut program =
            compile("daemon:stats:num:cpu/user 100 MUL", ValueKind::Num, &resolver).unwrap();
        let refs = resolver.drain_pending();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].config, "cpu/user");
        assert_eq!(store.borrow().var_count(0), 1);

        let mut stack = EvalStack::new();
        assert!(program.eval(&mut stack).as_num().unwrap().is_nan());

        store.borrow_mut().set_num(0, 0, 0.5);
        assert_eq!(program.eval(&mut stack).as_num().unwrap(), 50.0);
    }

    #[test]
    fn test_unknown_daemon_is_rejected() {
        let store = Rc::new(RefCell::new(DaemonVarStore::new()));
        let resolver = PipelineResolver::new(store);
        assert!(compile("daemon:ghost:num:x", ValueKind::Num, &resolver).is_err());
    }
}
