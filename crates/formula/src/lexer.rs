//! Lexical analysis for the postfix formula surface.
//!
//! Tokens are separated by whitespace or commas (both accepted). The
//! surface is deliberately flat: numbers, quoted strings, `${NAME}`
//! environment interpolation, and bare identifiers that the compiler
//! resolves to operators or module sources.

use logos::Logos;

/// Formula token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n,]+")]
pub enum Token<'src> {
    /// Numeric literal, including an optional leading sign and exponent.
    #[regex(r"-?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    /// Double-quoted string literal with `\n \t \r \0 \\ \"` escapes.
    #[regex(r#""(?:[^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    /// `${NAME}`, resolved against the environment at compile time.
    /// An unset variable interpolates as the empty string.
    #[regex(r"\$\{[A-Za-z_][A-Za-z0-9_]*\}", |lex| {
        let slice = lex.slice();
        std::env::var(&slice[2..slice.len() - 1]).unwrap_or_default()
    })]
    Env(String),

    /// Operator name, `LOAD`/`STORE`, or a module source reference
    /// (`name` or `name:arg`).
    #[regex(r"[A-Za-z_][A-Za-z0-9_:./+-]*")]
    Ident(&'src str),
}

fn unescape(quoted: &str) -> Option<String> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            other => out.push(other),
        }
    }
    Some(out)
}
