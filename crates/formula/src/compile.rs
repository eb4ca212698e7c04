//! Formula compiler.
//!
//! Single pass over the token stream, maintaining a symbolic stack of
//! slot kinds. Every operator declares its stack effect; a handful of
//! stack-polymorphic operators (IF, DUP, POP, EXC, STORE, STRTOx) are
//! checked explicitly. An accepted formula leaves exactly one slot whose
//! kind satisfies the caller's requirement.

use logos::Logos;
use thiserror::Error;

use crate::lexer::Token;
use crate::ops::{Builtin, HeapSlot, Op, Program, SlotId, SourceOp, StackEffect, ValueKind};
use crate::source::SourceResolver;

/// Compile-time formula error.
///
/// Columns are 1-based byte offsets into the formula text; the config
/// loader prefixes the owning line.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("column {col}: unrecognized input")]
    Lex { col: usize },

    #[error("column {col}: unknown operation or source '{name}'")]
    UnknownName { name: String, col: usize },

    #[error("column {col}: {op} expects {expected} but the stack holds {found}")]
    StackMismatch {
        op: String,
        expected: String,
        found: String,
        col: usize,
    },

    #[error("column {col}: {op} requires an integer slot index")]
    MissingSlot { op: String, col: usize },

    #[error("formula is empty")]
    Empty,

    #[error("formula leaves {count} values on the stack, expected exactly one")]
    Leftover { count: usize },

    #[error("formula produces a {found} value where {expected} is required")]
    ResultKind { found: String, expected: String },
}

/// Compile `source` into a program whose result satisfies `want`.
///
/// Identifiers that are not operators are split at the first `:` into a
/// source name and an opaque argument and handed to `resolver`.
pub fn compile(
    source: &str,
    want: ValueKind,
    resolver: &dyn SourceResolver,
) -> Result<Program, CompileError> {
    let mut ops: Vec<Op> = Vec::new();
    let mut sym: Vec<ValueKind> = Vec::new();
    let mut max_depth = 0usize;
    let mut heap_len = 0usize;

    let mut tokens = Token::lexer(source).spanned();
    while let Some((token, span)) = tokens.next() {
        let col = span.start + 1;
        let token = token.map_err(|()| CompileError::Lex { col })?;
        match token {
            Token::Number(n) => {
                ops.push(Op::LitNum(n));
                push(&mut sym, &mut max_depth, ValueKind::Num);
            }
            Token::Str(s) | Token::Env(s) => {
                ops.push(Op::LitStr(s));
                push(&mut sym, &mut max_depth, ValueKind::Str);
            }
            Token::Ident("LOAD") => {
                let slot = expect_slot(&mut tokens, "LOAD", col)?;
                heap_len = heap_len.max(slot as usize + 1);
                ops.push(Op::Load(slot));
                push(&mut sym, &mut max_depth, ValueKind::Any);
            }
            Token::Ident("STORE") => {
                let slot = expect_slot(&mut tokens, "STORE", col)?;
                heap_len = heap_len.max(slot as usize + 1);
                let n = sym.len();
                if n < 2 || !sym[n - 2].satisfies(ValueKind::Num) {
                    return Err(mismatch("STORE", &[ValueKind::Num, ValueKind::Any], &sym, col));
                }
                // The stored halves follow the value slot's concrete kind.
                let kind = sym[n - 1];
                sym.truncate(n - 2);
                ops.push(Op::Store(slot, kind));
            }
            Token::Ident(name) => {
                if let Some(builtin) = Builtin::lookup(name) {
                    apply_builtin(builtin, name, &mut sym, &mut max_depth, col)?;
                    ops.push(Op::Builtin(builtin));
                } else {
                    let (base, arg) = match name.split_once(':') {
                        Some((base, arg)) => (base, arg),
                        None => (name, ""),
                    };
                    let source = resolver
                        .resolve(base, arg)
                        .ok_or_else(|| CompileError::UnknownName {
                            name: name.to_string(),
                            col,
                        })?;
                    let kind = source.kind().ok_or_else(|| CompileError::UnknownName {
                        name: name.to_string(),
                        col,
                    })?;
                    ops.push(Op::Source(SourceOp {
                        name: name.to_string(),
                        source,
                    }));
                    push(&mut sym, &mut max_depth, kind);
                }
            }
        }
    }

    match sym.len() {
        0 => Err(CompileError::Empty),
        1 => {
            if !sym[0].satisfies(want) {
                return Err(CompileError::ResultKind {
                    found: sym[0].label().to_string(),
                    expected: want.label().to_string(),
                });
            }
            let kind = if want == ValueKind::Any { sym[0] } else { want };
            Ok(Program {
                ops,
                heap: vec![HeapSlot::default(); heap_len],
                max_depth,
                kind,
            })
        }
        count => Err(CompileError::Leftover { count }),
    }
}

fn push(sym: &mut Vec<ValueKind>, max_depth: &mut usize, kind: ValueKind) {
    sym.push(kind);
    *max_depth = (*max_depth).max(sym.len());
}

fn apply_builtin(
    builtin: Builtin,
    name: &str,
    sym: &mut Vec<ValueKind>,
    max_depth: &mut usize,
    col: usize,
) -> Result<(), CompileError> {
    match builtin.effect() {
        StackEffect::Fixed { pops, push: pushed } => {
            check_pops(sym, name, pops, col)?;
            if let Some(kind) = pushed {
                push(sym, max_depth, kind);
            }
            Ok(())
        }
        StackEffect::Special => {
            let n = sym.len();
            match builtin {
                Builtin::If => {
                    if n < 3 || !sym[n - 3].satisfies(ValueKind::Num) {
                        return Err(mismatch(
                            name,
                            &[ValueKind::Num, ValueKind::Any, ValueKind::Any],
                            sym,
                            col,
                        ));
                    }
                    let (a, b) = (sym[n - 2], sym[n - 1]);
                    let result = if a == b { a } else { ValueKind::Any };
                    sym.truncate(n - 3);
                    push(sym, max_depth, result);
                }
                Builtin::Dup => {
                    if n < 1 {
                        return Err(mismatch(name, &[ValueKind::Any], sym, col));
                    }
                    let top = sym[n - 1];
                    push(sym, max_depth, top);
                }
                Builtin::Pop => {
                    if n < 1 {
                        return Err(mismatch(name, &[ValueKind::Any], sym, col));
                    }
                    sym.pop();
                }
                Builtin::Exc => {
                    if n < 2 {
                        return Err(mismatch(name, &[ValueKind::Any, ValueKind::Any], sym, col));
                    }
                    sym.swap(n - 1, n - 2);
                }
                Builtin::Strtod | Builtin::Strtol => {
                    if n < 1 || !sym[n - 1].satisfies(ValueKind::Str) {
                        return Err(mismatch(name, &[ValueKind::Str], sym, col));
                    }
                    // The slot keeps its advanced string and gains the
                    // parsed number, so chained parses may continue.
                    sym[n - 1] = ValueKind::Any;
                }
                _ => unreachable!("operator {name} has a fixed stack effect"),
            }
            Ok(())
        }
    }
}

fn check_pops(
    sym: &mut Vec<ValueKind>,
    op: &str,
    pops: &[ValueKind],
    col: usize,
) -> Result<(), CompileError> {
    if sym.len() < pops.len() {
        return Err(mismatch(op, pops, sym, col));
    }
    let base = sym.len() - pops.len();
    for (have, need) in sym[base..].iter().zip(pops) {
        if !have.satisfies(*need) {
            return Err(mismatch(op, pops, sym, col));
        }
    }
    sym.truncate(base);
    Ok(())
}

fn mismatch(op: &str, expected: &[ValueKind], found: &[ValueKind], col: usize) -> CompileError {
    CompileError::StackMismatch {
        op: op.to_string(),
        expected: kinds_desc(expected),
        found: kinds_desc(found),
        col,
    }
}

fn kinds_desc(kinds: &[ValueKind]) -> String {
    let mut out = String::from("[");
    for (i, kind) in kinds.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(kind.label());
    }
    out.push(']');
    out
}

type SpannedTokens<'src> = logos::SpannedIter<'src, Token<'src>>;

fn expect_slot(
    tokens: &mut SpannedTokens<'_>,
    op: &str,
    col: usize,
) -> Result<SlotId, CompileError> {
    match tokens.next() {
        Some((Ok(Token::Number(n)), _)) if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => {
            Ok(n as SlotId)
        }
        _ => Err(CompileError::MissingSlot {
            op: op.to_string(),
            col,
        }),
    }
}
