//! Config file parsing.
//!
//! Line-oriented: one declaration per line, `#` starts a comment.
//!
//! ```text
//! interval 1.0
//! timeout 5
//! log_limit 1024
//!
//! daemon stats  /usr/libexec/sysguardd
//! var cpu   num            daemon:stats:num:cpu/user 100 MUL
//! var disk  str  every 10  daemon:stats:str:disk/root
//! var host  str            env:HOSTNAME
//! ```
//!
//! Formulas are the remainder of their `var` line; they are compiled
//! later, when the engine is built, so their errors carry both the line
//! number recorded here and the formula column.

use sysguard_formula::ValueKind;

use crate::error::ConfigError;

/// One `daemon` declaration.
#[derive(Debug, Clone)]
pub struct DaemonDecl {
    pub name: String,
    pub command: String,
    pub line: usize,
}

/// One `var` declaration.
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub kind: ValueKind,
    /// Re-evaluate every `divisor` ticks (`every` clause); 0 = every tick.
    pub divisor: u64,
    pub formula: String,
    pub line: usize,
}

/// Parsed configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Tick interval in seconds.
    pub interval: f64,
    /// Daemon liveness timeout in ticks.
    pub timeout_ticks: u64,
    /// Longest buffered daemon log message, in bytes.
    pub max_log_len: usize,
    pub daemons: Vec<DaemonDecl>,
    pub vars: Vec<VarDecl>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interval: 1.0,
            timeout_ticks: 5,
            max_log_len: 1024,
            daemons: Vec::new(),
            vars: Vec::new(),
        }
    }
}

impl Config {
    /// Parse a config file. Any error is fatal to startup; there is no
    /// partial-config recovery.
    pub fn parse(source: &str) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        for (idx, raw) in source.lines().enumerate() {
            let line = idx + 1;
            let mut scanner = LineScanner::new(raw, line);
            let Some((directive, col)) = scanner.next_token() else {
                continue; // blank or comment
            };
            match directive {
                "interval" => {
                    config.interval = scanner.number("interval in seconds")?;
                    if !(config.interval > 0.0) {
                        return Err(scanner.error(col, "interval must be positive"));
                    }
                }
                "timeout" => {
                    config.timeout_ticks = scanner.integer("timeout in ticks")?;
                }
                "log_limit" => {
                    config.max_log_len = scanner.integer("log limit in bytes")? as usize;
                }
                "daemon" => {
                    let (name, _) = scanner.token("daemon name")?;
                    let name = name.to_string();
                    let (command, _) = scanner.rest("daemon command")?;
                    config.daemons.push(DaemonDecl {
                        name,
                        command: command.to_string(),
                        line,
                    });
                }
                "var" => {
                    let (name, _) = scanner.token("var name")?;
                    let name = name.to_string();
                    let (kind_tok, kind_col) = scanner.token("var kind (num or str)")?;
                    let kind = match kind_tok {
                        "num" => ValueKind::Num,
                        "str" => ValueKind::Str,
                        other => {
                            let message = format!("expected 'num' or 'str', found '{other}'");
                            return Err(scanner.error(kind_col, &message));
                        }
                    };
                    let mut divisor = 0;
                    if scanner.peek() == Some("every") {
                        scanner.next_token();
                        divisor = scanner.integer("tick divisor after 'every'")?;
                    }
                    let (formula, _) = scanner.rest("formula")?;
                    config.vars.push(VarDecl {
                        name,
                        kind,
                        divisor,
                        formula: formula.to_string(),
                        line,
                    });
                }
                other => {
                    let message = format!("unknown directive '{other}'");
                    return Err(scanner.error(col, &message));
                }
            }
        }

        Ok(config)
    }
}

/// Whitespace tokenizer over one config line, tracking columns for
/// diagnostics.
struct LineScanner<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> LineScanner<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        // Strip the comment tail up front so `rest()` never includes it.
        let text = match text.find('#') {
            Some(i) => &text[..i],
            None => text,
        };
        LineScanner { text, pos: 0, line }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.text.len()
            && self.text.as_bytes()[self.pos].is_ascii_whitespace()
        {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Option<(&'a str, usize)> {
        self.skip_ws();
        if self.pos >= self.text.len() {
            return None;
        }
        let start = self.pos;
        while self.pos < self.text.len()
            && !self.text.as_bytes()[self.pos].is_ascii_whitespace()
        {
            self.pos += 1;
        }
        Some((&self.text[start..self.pos], start + 1))
    }

    fn peek(&mut self) -> Option<&'a str> {
        let saved = self.pos;
        let token = self.next_token().map(|(t, _)| t);
        self.pos = saved;
        token
    }

    /// Everything from the next non-space byte to the end of the line.
    fn rest(&mut self, what: &str) -> Result<(&'a str, usize), ConfigError> {
        self.skip_ws();
        let tail = self.text[self.pos..].trim_end();
        if tail.is_empty() {
            return Err(self.missing(what));
        }
        Ok((tail, self.pos + 1))
    }

    fn token(&mut self, what: &str) -> Result<(&'a str, usize), ConfigError> {
        self.next_token().ok_or_else(|| self.missing(what))
    }

    fn number(&mut self, what: &str) -> Result<f64, ConfigError> {
        let (tok, col) = self.token(what)?;
        tok.parse().map_err(|_| {
            let message = format!("expected {what}, found '{tok}'");
            self.error(col, &message)
        })
    }

    fn integer(&mut self, what: &str) -> Result<u64, ConfigError> {
        let (tok, col) = self.token(what)?;
        tok.parse().map_err(|_| {
            let message = format!("expected {what}, found '{tok}'");
            self.error(col, &message)
        })
    }

    fn missing(&self, what: &str) -> ConfigError {
        ConfigError::Syntax {
            line: self.line,
            col: self.pos + 1,
            message: format!("missing {what}"),
        }
    }

    fn error(&self, col: usize, message: &str) -> ConfigError {
        ConfigError::Syntax {
            line: self.line,
            col,
            message: message.to_string(),
        }
    }
}
