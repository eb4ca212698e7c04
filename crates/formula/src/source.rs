//! External value sources.
//!
//! The compiler delegates every identifier it does not recognize to a
//! [`SourceResolver`]. A resolved [`Source`] carries up to two getters;
//! which ones are present decides the slot kind the reference pushes.

use std::fmt;
use std::rc::Rc;

use crate::ops::ValueKind;

/// Numeric getter, invoked on every evaluation.
pub type NumGetter = Rc<dyn Fn() -> f64>;

/// String getter, invoked on every evaluation.
pub type StrGetter = Rc<dyn Fn() -> String>;

/// A bound external source: a numeric getter, a string getter, or both.
#[derive(Clone, Default)]
pub struct Source {
    pub num: Option<NumGetter>,
    pub text: Option<StrGetter>,
}

impl Source {
    pub fn from_num(f: impl Fn() -> f64 + 'static) -> Self {
        Source {
            num: Some(Rc::new(f)),
            text: None,
        }
    }

    pub fn from_str_fn(f: impl Fn() -> String + 'static) -> Self {
        Source {
            num: None,
            text: Some(Rc::new(f)),
        }
    }

    /// The stack kind a reference to this source pushes, or `None` when
    /// the source carries no getter at all.
    pub fn kind(&self) -> Option<ValueKind> {
        match (self.num.is_some(), self.text.is_some()) {
            (true, true) => Some(ValueKind::Any),
            (true, false) => Some(ValueKind::Num),
            (false, true) => Some(ValueKind::Str),
            (false, false) => None,
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("num", &self.num.is_some())
            .field("text", &self.text.is_some())
            .finish()
    }
}

/// Maps an unmatched identifier (`name`, with an opaque `arg` after the
/// first `:`) to a source binding.
pub trait SourceResolver {
    fn resolve(&self, name: &str, arg: &str) -> Option<Source>;
}

/// Resolver that knows no sources; every unmatched identifier becomes a
/// compile error.
pub struct NoSources;

impl SourceResolver for NoSources {
    fn resolve(&self, _name: &str, _arg: &str) -> Option<Source> {
        None
    }
}
