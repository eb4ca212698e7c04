//! Daemon value store.
//!
//! Dense per-daemon tables holding the most recent value each daemon
//! var produced. The engine writes on frame arrival; formula sources
//! read at evaluation time through a shared handle. Ids are assigned
//! sequentially at config-parse time, so lookup is a plain index.

use sysguard_daemon::VarKind;

/// Last received value of one daemon var.
#[derive(Debug)]
pub struct StoredValue {
    kind: VarKind,
    num: f64,
    text: String,
}

impl StoredValue {
    fn new(kind: VarKind) -> Self {
        StoredValue {
            kind,
            num: f64::NAN,
            text: String::new(),
        }
    }
}

#[derive(Debug, Default)]
struct DaemonTable {
    name: String,
    values: Vec<StoredValue>,
}

/// All daemon values, indexed by (daemon index, local id).
#[derive(Debug, Default)]
pub struct DaemonVarStore {
    daemons: Vec<DaemonTable>,
}

impl DaemonVarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a daemon, returning its index.
    pub fn add_daemon(&mut self, name: &str) -> usize {
        self.daemons.push(DaemonTable {
            name: name.to_string(),
            values: Vec::new(),
        });
        self.daemons.len() - 1
    }

    pub fn daemon_index(&self, name: &str) -> Option<usize> {
        self.daemons.iter().position(|d| d.name == name)
    }

    /// Allocate the next local id for `daemon`.
    pub fn add_var(&mut self, daemon: usize, kind: VarKind) -> u32 {
        let values = &mut self.daemons[daemon].values;
        values.push(StoredValue::new(kind));
        (values.len() - 1) as u32
    }

    pub fn var_count(&self, daemon: usize) -> usize {
        self.daemons[daemon].values.len()
    }

    pub fn set_num(&mut self, daemon: usize, id: u32, value: f64) {
        if let Some(v) = self.daemons[daemon].values.get_mut(id as usize)
            && v.kind == VarKind::Num
        {
            v.num = value;
        }
    }

    pub fn set_str(&mut self, daemon: usize, id: u32, value: &str) {
        if let Some(v) = self.daemons[daemon].values.get_mut(id as usize)
            && v.kind == VarKind::Str
        {
            v.text.clear();
            v.text.push_str(value);
        }
    }

    /// Forget everything a daemon ever produced (respawn).
    pub fn reset_daemon(&mut self, daemon: usize) {
        for v in &mut self.daemons[daemon].values {
            v.num = f64::NAN;
            v.text.clear();
        }
    }

    pub fn num(&self, daemon: usize, id: u32) -> f64 {
        self.daemons[daemon]
            .values
            .get(id as usize)
            .map_or(f64::NAN, |v| v.num)
    }

    pub fn text(&self, daemon: usize, id: u32) -> String {
        self.daemons[daemon]
            .values
            .get(id as usize)
            .map_or_else(String::new, |v| v.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_start_unset() {
        let mut store = DaemonVarStore::new();
        let d = store.add_daemon("stats");
        let id = store.add_var(d, VarKind::Num);
        assert!(store.num(d, id).is_nan());
    }

    #[test]
    fn test_set_and_reset() {
        let mut store = DaemonVarStore::new();
        let d = store.add_daemon("stats");
        let n = store.add_var(d, VarKind::Num);
        let s = store.add_var(d, VarKind::Str);

        store.set_num(d, n, 0.25);
        store.set_str(d, s, "ok");
        assert_eq!(store.num(d, n), 0.25);
        assert_eq!(store.text(d, s), "ok");

        store.reset_daemon(d);
        assert!(store.num(d, n).is_nan());
        assert_eq!(store.text(d, s), "");
    }

    #[test]
    fn test_kind_mismatch_is_ignored() {
        let mut store = DaemonVarStore::new();
        let d = store.add_daemon("stats");
        let s = store.add_var(d, VarKind::Str);
        store.set_num(d, s, 1.0);
        assert!(store.num(d, s).is_nan());
    }
}
