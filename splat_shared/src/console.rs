//! Console system.
//!
//! Operator-facing console: typed console variables (cvars), a small set of
//! built-in commands and quote-aware line parsing. Game-specific commands
//! (`status`, `reset`, ...) are handled by the server before it falls back
//! to [`Console::exec`].
//!
//! # Usage
//! ```ignore
//! let mut console = Console::new();
//! console.register_cvar("sv_debug_global", CvarValue::Bool(true), "...", CvarFlags::SERVER_ONLY);
//! console.exec("sv_debug_global 0")?;
//! ```

use std::collections::BTreeMap;

use anyhow::{bail, Context};

/// Console variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum CvarValue {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
}

impl CvarValue {
    /// Parses operator input: int, then float, then bool, then string.
    pub fn parse(s: &str) -> Self {
        if let Ok(v) = s.parse::<i64>() {
            CvarValue::Int(v)
        } else if let Ok(v) = s.parse::<f64>() {
            CvarValue::Float(v)
        } else if s == "true" {
            CvarValue::Bool(true)
        } else if s == "false" {
            CvarValue::Bool(false)
        } else {
            CvarValue::String(s.trim_matches('"').to_string())
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CvarValue::Int(v) => Some(*v),
            CvarValue::Float(v) => Some(*v as i64),
            CvarValue::Bool(v) => Some(i64::from(*v)),
            CvarValue::String(s) => s.parse().ok(),
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CvarValue::Float(v) => Some(*v),
            CvarValue::Int(v) => Some(*v as f64),
            CvarValue::String(s) => s.parse().ok(),
            CvarValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            CvarValue::Bool(v) => *v,
            CvarValue::Int(v) => *v != 0,
            CvarValue::Float(v) => *v != 0.0,
            CvarValue::String(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
        }
    }
}

impl std::fmt::Display for CvarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CvarValue::Int(v) => write!(f, "{}", v),
            CvarValue::Float(v) => write!(f, "{}", v),
            CvarValue::String(v) => write!(f, "\"{}\"", v),
            CvarValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

bitflags::bitflags! {
    /// Cvar flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CvarFlags: u32 {
        const NONE = 0;
        const SERVER_ONLY = 1 << 0;
        /// Set at startup; `set` refuses to change it.
        const READ_ONLY = 1 << 1;
    }
}

/// Console variable metadata.
#[derive(Debug, Clone)]
pub struct Cvar {
    pub value: CvarValue,
    pub default: CvarValue,
    pub description: String,
    pub flags: CvarFlags,
}

/// Command handler function type.
pub type CommandHandler =
    Box<dyn Fn(&[&str], &mut ConsoleContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Context passed to command handlers.
pub struct ConsoleContext<'a> {
    /// Lines printed back to the operator.
    pub output: Vec<String>,
    cvars: &'a mut BTreeMap<String, Cvar>,
}

impl ConsoleContext<'_> {
    pub fn print(&mut self, msg: impl Into<String>) {
        self.output.push(msg.into());
    }

    pub fn get_cvar(&self, name: &str) -> Option<&CvarValue> {
        self.cvars.get(name).map(|c| &c.value)
    }

    pub fn set_cvar(&mut self, name: &str, value: CvarValue) -> anyhow::Result<()> {
        set_cvar(self.cvars, name, value)
    }
}

fn set_cvar(cvars: &mut BTreeMap<String, Cvar>, name: &str, value: CvarValue) -> anyhow::Result<()> {
    let Some(cvar) = cvars.get_mut(name) else {
        bail!("unknown cvar: {}", name);
    };
    if cvar.flags.contains(CvarFlags::READ_ONLY) {
        bail!("{} is read-only", name);
    }
    cvar.value = value;
    Ok(())
}

/// The console.
pub struct Console {
    cvars: BTreeMap<String, Cvar>,
    commands: BTreeMap<String, CommandHandler>,
    history: Vec<String>,
    max_history: usize,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        let mut console = Self {
            cvars: BTreeMap::new(),
            commands: BTreeMap::new(),
            history: Vec::new(),
            max_history: 100,
        };
        console.register_builtin_commands();
        console
    }

    fn register_builtin_commands(&mut self) {
        self.register_command("echo", |args, ctx| {
            ctx.print(args.join(" "));
            Ok(())
        });

        self.register_command("cvarlist", |_args, ctx| {
            let lines: Vec<String> = ctx
                .cvars
                .iter()
                .map(|(name, cvar)| {
                    format!(
                        "  {} = {} (default: {}) {}",
                        name, cvar.value, cvar.default, cvar.description
                    )
                })
                .collect();
            ctx.output.extend(lines);
            Ok(())
        });

        // set <cvar> <value>
        self.register_command("set", |args, ctx| {
            if args.len() < 2 {
                bail!("usage: set <cvar> <value>");
            }
            let name = args[0];
            let value = CvarValue::parse(&args[1..].join(" "));
            let shown = value.to_string();
            ctx.set_cvar(name, value)?;
            ctx.print(format!("{} = {}", name, shown));
            Ok(())
        });
    }

    /// Registers a console variable.
    pub fn register_cvar(
        &mut self,
        name: &str,
        default: CvarValue,
        description: &str,
        flags: CvarFlags,
    ) {
        self.cvars.insert(
            name.to_string(),
            Cvar {
                value: default.clone(),
                default,
                description: description.to_string(),
                flags,
            },
        );
    }

    /// Registers a command.
    pub fn register_command<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&[&str], &mut ConsoleContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.commands.insert(name.to_string(), Box::new(handler));
    }

    /// Names of every registered command.
    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Executes a console command line and returns what it printed.
    ///
    /// Typing a cvar name alone prints it; a name followed by a value sets it.
    pub fn exec(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            return Ok(Vec::new());
        }

        self.history.push(line.to_string());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        let tokens = parse_command_line(line);
        let Some((cmd_name, rest)) = tokens.split_first() else {
            return Ok(Vec::new());
        };
        let mut args: Vec<&str> = rest.iter().map(String::as_str).collect();

        let handler_name = if self.commands.contains_key(cmd_name) {
            cmd_name.as_str()
        } else if let Some(cvar) = self.cvars.get(cmd_name) {
            if args.is_empty() {
                return Ok(vec![format!(
                    "{} = {} (default: {})",
                    cmd_name, cvar.value, cvar.default
                )]);
            }
            args.insert(0, cmd_name.as_str());
            "set"
        } else {
            return Ok(vec![format!("Unknown command: {}", cmd_name)]);
        };

        let mut ctx = ConsoleContext {
            output: Vec::new(),
            cvars: &mut self.cvars,
        };
        if let Some(handler) = self.commands.get(handler_name) {
            handler(&args, &mut ctx).with_context(|| format!("command '{}'", cmd_name))?;
        }
        Ok(ctx.output)
    }

    /// Gets a cvar value.
    pub fn get_cvar(&self, name: &str) -> Option<&CvarValue> {
        self.cvars.get(name).map(|c| &c.value)
    }

    /// Sets a cvar value, honoring [`CvarFlags::READ_ONLY`].
    pub fn set_cvar(&mut self, name: &str, value: CvarValue) -> anyhow::Result<()> {
        set_cvar(&mut self.cvars, name, value)
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }
}

/// Parses a command line into tokens, respecting quotes.
pub fn parse_command_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_a_cvar_name_sets_and_queries_it() {
        let mut console = Console::new();
        console.register_cvar(
            "sv_debug_global",
            CvarValue::Bool(true),
            "debug toggles every collider",
            CvarFlags::SERVER_ONLY,
        );

        console.exec("sv_debug_global 0").unwrap();
        assert_eq!(console.get_cvar("sv_debug_global"), Some(&CvarValue::Int(0)));
        assert!(!console.get_cvar("sv_debug_global").unwrap().as_bool());

        let out = console.exec("sv_debug_global").unwrap();
        assert_eq!(out, vec!["sv_debug_global = 0 (default: true)".to_string()]);
    }

    #[test]
    fn read_only_cvars_refuse_set() {
        let mut console = Console::new();
        console.register_cvar("sv_tickrate", CvarValue::Int(30), "", CvarFlags::READ_ONLY);
        assert!(console.exec("set sv_tickrate 60").is_err());
        assert_eq!(console.get_cvar("sv_tickrate"), Some(&CvarValue::Int(30)));
    }

    #[test]
    fn unknown_command_is_reported_not_failed() {
        let mut console = Console::new();
        let out = console.exec("frobnicate").unwrap();
        assert_eq!(out, vec!["Unknown command: frobnicate".to_string()]);
        assert_eq!(console.history(), ["frobnicate".to_string()]);
    }

    #[test]
    fn parse_quoted_args() {
        let tokens = parse_command_line(r#"echo "hello world" test"#);
        assert_eq!(tokens, vec!["echo", "hello world", "test"]);
    }
}
