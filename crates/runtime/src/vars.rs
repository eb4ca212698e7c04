//! Var registry and dirty tracking.
//!
//! A var owns one compiled program, the last value it produced, and a
//! dirty flag. Re-evaluation happens on the var's tick schedule (and
//! immediately when a daemon value it depends on arrives); consumers
//! only ever see one batched notification per tick via `flush_dirty`.

use indexmap::IndexMap;
use tracing::trace;

use sysguard_formula::{EvalStack, Program, Value, ValueKind};

/// Dense var handle (insertion order).
pub type VarId = usize;

#[derive(Debug)]
struct Var {
    program: Program,
    cached_num: f64,
    cached_text: String,
    dirty: bool,
    /// Re-evaluate every `divisor` ticks; 0 and 1 mean every tick.
    divisor: u64,
}

/// All configured vars plus the shared evaluation stack, sized to the
/// deepest program ever registered.
#[derive(Debug, Default)]
pub struct VarRegistry {
    vars: IndexMap<String, Var>,
    stack: EvalStack,
    dirty: bool,
}

impl VarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Register a var. The shared stack grows to cover the program.
    pub fn add(&mut self, name: &str, program: Program, divisor: u64) -> VarId {
        self.stack.grow_to(program.max_depth());
        let (id, _) = self.vars.insert_full(
            name.to_string(),
            Var {
                program,
                cached_num: f64::NAN,
                cached_text: String::new(),
                dirty: false,
                divisor,
            },
        );
        id
    }

    /// Whether any var changed since the last flush.
    pub fn any_dirty(&self) -> bool {
        self.dirty
    }

    /// Re-evaluate one var and compare against its cache. Numbers
    /// compare by value, so a NaN result never equals the cache and the
    /// var stays dirty for as long as the source is unavailable.
    pub fn update(&mut self, id: VarId) {
        let Self {
            vars, stack, dirty, ..
        } = self;
        let Some((name, var)) = vars.get_index_mut(id) else {
            return;
        };
        match var.program.eval(stack) {
            Value::Num(n) => {
                if n != var.cached_num {
                    trace!(var = %name, value = n, "var changed");
                    var.cached_num = n;
                    var.dirty = true;
                    *dirty = true;
                }
            }
            Value::Str(s) => {
                if s != var.cached_text {
                    trace!(var = %name, value = %s, "var changed");
                    var.cached_text.clear();
                    var.cached_text.push_str(s);
                    var.dirty = true;
                    *dirty = true;
                }
            }
        }
    }

    /// Re-evaluate every var whose divisor admits this tick.
    pub fn update_eligible(&mut self, tick: u64) {
        for id in 0..self.vars.len() {
            let divisor = self.vars[id].divisor;
            if divisor <= 1 || tick % divisor == 0 {
                self.update(id);
            }
        }
    }

    /// Invoke `consumer` once for every dirty var, clearing each flag,
    /// then clear the global flag. One batch per tick.
    pub fn flush_dirty(&mut self, consumer: &mut dyn FnMut(&str, Value<'_>)) {
        for id in 0..self.vars.len() {
            let (name, var) = self.vars.get_index_mut(id).expect("var index in range");
            if !var.dirty {
                continue;
            }
            var.dirty = false;
            let value = match var.program.kind() {
                ValueKind::Str => Value::Str(&var.cached_text),
                ValueKind::Num | ValueKind::Any => Value::Num(var.cached_num),
            };
            consumer(name, value);
        }
        self.dirty = false;
    }

    /// Last cached value, for inspection.
    pub fn cached(&self, name: &str) -> Option<Value<'_>> {
        let var = self.vars.get(name)?;
        Some(match var.program.kind() {
            ValueKind::Str => Value::Str(&var.cached_text),
            ValueKind::Num | ValueKind::Any => Value::Num(var.cached_num),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysguard_formula::{NoSources, compile};

    fn registry_with(formulas: &[(&str, &str)]) -> VarRegistry {
        let mut registry = VarRegistry::new();
        for (name, src) in formulas {
            let program = compile(src, ValueKind::Num, &NoSources).unwrap();
            registry.add(name, program, 0);
        }
        registry
    }

    fn flush_names(registry: &mut VarRegistry) -> Vec<String> {
        let mut names = Vec::new();
        registry.flush_dirty(&mut |name, _| names.push(name.to_string()));
        names
    }

    #[test]
    fn test_first_update_marks_dirty() {
        let mut registry = registry_with(&[("a", "5 3 ADD")]);
        registry.update(0);
        assert!(registry.any_dirty());
        assert_eq!(flush_names(&mut registry), vec!["a"]);
        assert!(!registry.any_dirty());
        assert_eq!(registry.cached("a").unwrap().as_num(), Some(8.0));
    }

    #[test]
    fn test_unchanged_value_stays_clean() {
        let mut registry = registry_with(&[("a", "1 2 ADD")]);
        registry.update(0);
        flush_names(&mut registry);
        registry.update(0);
        assert!(!registry.any_dirty());
        assert!(flush_names(&mut registry).is_empty());
    }

    #[test]
    fn test_nan_is_dirty_on_every_evaluation() {
        let mut registry = registry_with(&[("a", "NAN")]);
        registry.update(0);
        assert_eq!(flush_names(&mut registry), vec!["a"]);
        // NaN never equals the cached NaN, so the var is dirty again.
        registry.update(0);
        assert_eq!(flush_names(&mut registry), vec!["a"]);
    }

    #[test]
    fn test_flush_batches_all_dirty_vars() {
        let mut registry = registry_with(&[("a", "1"), ("b", "2"), ("c", "3")]);
        registry.update_eligible(1);
        assert_eq!(flush_names(&mut registry), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_divisor_gates_updates() {
        let mut registry = VarRegistry::new();
        let program = compile("1 LOAD 0 0 MAX 1 ADD STORE 0 LOAD 0", ValueKind::Num, &NoSources)
            .unwrap();
        registry.add("counter", program, 3);

        for tick in 1..=6 {
            registry.update_eligible(tick);
        }
        // Only ticks 3 and 6 were eligible.
        assert_eq!(registry.cached("counter").unwrap().as_num(), Some(2.0));
    }

    #[test]
    fn test_string_vars_compare_by_content() {
        let mut registry = VarRegistry::new();
        let program = compile("\"up\"", ValueKind::Str, &NoSources).unwrap();
        registry.add("state", program, 0);
        registry.update(0);
        assert_eq!(flush_names(&mut registry), vec!["state"]);
        registry.update(0);
        assert!(flush_names(&mut registry).is_empty());
        assert_eq!(registry.cached("state").unwrap().as_str(), Some("up"));
    }
}
