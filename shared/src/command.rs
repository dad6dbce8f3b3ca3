//! Command model
//!
//! A [`Command`] is an action name plus an insertion-ordered set of arguments.
//! Commands are built with the typed constructors (one per action) or through
//! [`Command::from_positional`], the by-name entry point that takes loosely
//! typed positional parameters and validates them against the per-action
//! schema.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Actions understood by NorthStar agents
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Link,
    Unlink,
    Origin,
    Arm,
    Disarm,
    Takeoff,
    Move,
    Land,
    Home,
    Kill,
    Delay,
    Launch,
    Status,
    Shutdown,
    /// Action outside the known vocabulary, forwarded verbatim
    Other(String),
}

impl CommandKind {
    /// Wire name sent in the `action` field
    pub fn as_str(&self) -> &str {
        match self {
            CommandKind::Link => "link",
            CommandKind::Unlink => "unlink",
            CommandKind::Origin => "origin",
            CommandKind::Arm => "arm",
            CommandKind::Disarm => "disarm",
            CommandKind::Takeoff => "takeoff",
            CommandKind::Move => "move",
            CommandKind::Land => "land",
            CommandKind::Home => "home",
            CommandKind::Kill => "kill",
            CommandKind::Delay => "delay",
            CommandKind::Launch => "launch",
            CommandKind::Status => "status",
            CommandKind::Shutdown => "shutdown",
            CommandKind::Other(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, CommandKind::Other(_))
    }
}

impl FromStr for CommandKind {
    type Err = CommandError;

    /// Case-insensitive lookup of a known action. Never yields `Other`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "link" => CommandKind::Link,
            "unlink" => CommandKind::Unlink,
            "origin" => CommandKind::Origin,
            "arm" => CommandKind::Arm,
            "disarm" => CommandKind::Disarm,
            "takeoff" => CommandKind::Takeoff,
            "move" => CommandKind::Move,
            "land" => CommandKind::Land,
            "home" => CommandKind::Home,
            "kill" => CommandKind::Kill,
            "delay" => CommandKind::Delay,
            "launch" => CommandKind::Launch,
            "status" => CommandKind::Status,
            "shutdown" => CommandKind::Shutdown,
            _ => return Err(CommandError::UnknownCommand(s.to_string())),
        };
        Ok(kind)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single argument value. Only flat scalars and one-dimensional arrays
/// exist on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Float(f32),
    Double(f64),
    Str(String),
    FloatArray(Vec<f32>),
    StrArray(Vec<String>),
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<f32> for ArgValue {
    fn from(v: f32) -> Self {
        ArgValue::Float(v)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Double(v)
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Str(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Str(v.to_string())
    }
}

impl From<[f32; 3]> for ArgValue {
    fn from(v: [f32; 3]) -> Self {
        ArgValue::FloatArray(v.to_vec())
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(v: Vec<String>) -> Self {
        ArgValue::StrArray(v)
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Null => f.write_str("null"),
            ArgValue::Bool(b) => write!(f, "{}", b),
            ArgValue::Float(v) => write!(f, "{}", v),
            ArgValue::Double(v) => write!(f, "{}", v),
            ArgValue::Str(s) => f.write_str(s),
            ArgValue::FloatArray(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
            ArgValue::StrArray(values) => write!(f, "[{}]", values.join(",")),
        }
    }
}

/// What to do with a by-name command whose action is not recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownCommandPolicy {
    /// Refuse to build the command
    #[default]
    Reject,
    /// Build it with no arguments and send the name as given
    Passthrough,
}

/// Errors raised while building a command, before anything is queued
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command}: expected {expected} parameters, got {got}")]
    Arity {
        command: String,
        expected: String,
        got: usize,
    },

    #[error("{command}: parameter {index} ({name}) is not a valid {expected}: {value}")]
    InvalidParameter {
        command: String,
        index: usize,
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Loosely typed positional parameter for by-name dispatch
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Param {
    fn to_text(&self) -> String {
        match self {
            Param::Str(s) => s.clone(),
            Param::Int(i) => i.to_string(),
            Param::Float(v) => v.to_string(),
            Param::Bool(b) => b.to_string(),
        }
    }

    fn to_f64(&self) -> Option<f64> {
        let value = match self {
            Param::Str(s) => s.trim().parse::<f64>().ok()?,
            Param::Int(i) => *i as f64,
            Param::Float(v) => *v,
            Param::Bool(b) => f64::from(u8::from(*b)),
        };
        value.is_finite().then_some(value)
    }

    fn to_bool(&self) -> Option<bool> {
        match self {
            Param::Bool(b) => Some(*b),
            Param::Int(i) => Some(*i != 0),
            Param::Float(v) => Some(*v != 0.0),
            Param::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
        }
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Str(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Str(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Int(v.into())
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<u32> for Param {
    fn from(v: u32) -> Self {
        Param::Int(v.into())
    }
}

impl From<f32> for Param {
    fn from(v: f32) -> Self {
        Param::Float(v.into())
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

/// Positional parameter reader bound to one action
struct Positional<'a> {
    command: &'a str,
    params: &'a [Param],
}

impl<'a> Positional<'a> {
    fn new(command: &'a str, params: &'a [Param]) -> Self {
        Self { command, params }
    }

    fn arity(&self, min: usize, max: usize) -> Result<(), CommandError> {
        let got = self.params.len();
        if got < min || got > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{}..={}", min, max)
            };
            return Err(CommandError::Arity {
                command: self.command.to_string(),
                expected,
                got,
            });
        }
        Ok(())
    }

    fn invalid(&self, index: usize, name: &'static str, expected: &'static str) -> CommandError {
        CommandError::InvalidParameter {
            command: self.command.to_string(),
            index,
            name,
            expected,
            value: self.params[index].to_text(),
        }
    }

    fn f64_at(&self, index: usize, name: &'static str) -> Result<Option<f64>, CommandError> {
        match self.params.get(index) {
            None => Ok(None),
            Some(p) => p
                .to_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(index, name, "float64")),
        }
    }

    fn f32_at(&self, index: usize, name: &'static str) -> Result<Option<f32>, CommandError> {
        match self.params.get(index) {
            None => Ok(None),
            Some(p) => p
                .to_f64()
                .map(|v| v as f32)
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| self.invalid(index, name, "float32")),
        }
    }

    fn bool_at(&self, index: usize, name: &'static str) -> Result<Option<bool>, CommandError> {
        match self.params.get(index) {
            None => Ok(None),
            Some(p) => p
                .to_bool()
                .map(Some)
                .ok_or_else(|| self.invalid(index, name, "bool")),
        }
    }

    fn text_at(&self, index: usize) -> Option<String> {
        self.params.get(index).map(Param::to_text)
    }

    fn texts(&self) -> Vec<String> {
        self.params.iter().map(Param::to_text).collect()
    }
}

/// A command ready to be sent. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    args: Vec<(String, ArgValue)>,
}

fn agent_ids<I, T>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = T>,
    T: ToString,
{
    ids.into_iter().map(|id| id.to_string()).collect()
}

impl Command {
    /// Create a command with no arguments
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            args: Vec::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<ArgValue>) -> Self {
        let value = value.into();
        match self.args.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.args.push((key.to_string(), value)),
        }
        self
    }

    fn with_opt<V: Into<ArgValue>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// Wire name of the action
    pub fn action(&self) -> &str {
        self.kind.as_str()
    }

    /// Look up an argument by name
    pub fn arg(&self, key: &str) -> Option<&ArgValue> {
        self.args.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Arguments in insertion order
    pub fn args(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of arguments (excluding `action`)
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn link<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        Self::new(CommandKind::Link).with("ids", agent_ids(ids))
    }

    pub fn unlink<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        Self::new(CommandKind::Unlink)
            .with("ids", agent_ids(ids))
            .with("all", false)
    }

    pub fn unlink_all() -> Self {
        Self::new(CommandKind::Unlink)
            .with("all", true)
            .with("ids", Vec::<String>::new())
    }

    /// Set the GPS origin of an agent
    pub fn origin(lat: f64, lon: f64, id: impl ToString, setcmd: bool) -> Self {
        Self::new(CommandKind::Origin)
            .with("lat", lat)
            .with("lon", lon)
            .with("id", id.to_string())
            .with("setcmd", setcmd)
    }

    pub fn arm(id: impl ToString, setcmd: bool) -> Self {
        Self::agent_action(CommandKind::Arm, id, setcmd)
    }

    pub fn disarm(id: impl ToString, setcmd: bool) -> Self {
        Self::agent_action(CommandKind::Disarm, id, setcmd)
    }

    pub fn land(id: impl ToString, setcmd: bool) -> Self {
        Self::agent_action(CommandKind::Land, id, setcmd)
    }

    pub fn home(id: impl ToString, setcmd: bool) -> Self {
        Self::agent_action(CommandKind::Home, id, setcmd)
    }

    fn agent_action(kind: CommandKind, id: impl ToString, setcmd: bool) -> Self {
        Self::new(kind)
            .with("id", id.to_string())
            .with("setcmd", setcmd)
    }

    /// Climb to `altitude` metres over `time` seconds
    pub fn takeoff(altitude: f32, time: f32, id: impl ToString, setcmd: bool) -> Self {
        Self::new(CommandKind::Takeoff)
            .with("altitude", altitude)
            .with("time", time)
            .with("id", id.to_string())
            .with("setcmd", setcmd)
    }

    /// Fly to a local `[x, y, z]` position over `time` seconds
    pub fn move_to(position: [f32; 3], time: f32, id: impl ToString, setcmd: bool) -> Self {
        Self::new(CommandKind::Move)
            .with("position", position)
            .with("time", time)
            .with("id", id.to_string())
            .with("setcmd", setcmd)
    }

    pub fn kill(id: impl ToString) -> Self {
        Self::new(CommandKind::Kill).with("id", id.to_string())
    }

    /// Pause an agent. Delays are normally queued, hence `setcmd` is
    /// usually `true`.
    pub fn delay(seconds: f32, id: impl ToString, setcmd: bool) -> Self {
        Self::new(CommandKind::Delay)
            .with("seconds", seconds)
            .with("id", id.to_string())
            .with("setcmd", setcmd)
    }

    /// Execute the queued commands of the given agents
    pub fn launch<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        Self::new(CommandKind::Launch).with("ids", agent_ids(ids))
    }

    /// Query agent status. An empty id list asks for every linked agent.
    pub fn status<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        let ids = agent_ids(ids);
        let command = Self::new(CommandKind::Status);
        if ids.is_empty() {
            command
        } else {
            command.with("ids", ids)
        }
    }

    pub fn shutdown() -> Self {
        Self::new(CommandKind::Shutdown)
    }

    /// Build a command from its name and positional parameters.
    ///
    /// Names are case-insensitive. Missing trailing parameters leave the
    /// corresponding argument absent, except `delay`'s `setcmd` which
    /// defaults to `true`. Unknown names always log a warning and are then
    /// handled according to `policy`.
    pub fn from_positional(
        name: &str,
        params: &[Param],
        policy: UnknownCommandPolicy,
    ) -> Result<Self, CommandError> {
        let kind = match name.parse::<CommandKind>() {
            Ok(kind) => kind,
            Err(err) => {
                warn!("Unknown command: {}", name);
                return match policy {
                    UnknownCommandPolicy::Reject => Err(err),
                    UnknownCommandPolicy::Passthrough => {
                        Ok(Self::new(CommandKind::Other(name.to_string())))
                    }
                };
            }
        };

        let p = Positional::new(kind.as_str(), params);

        let command = match kind {
            CommandKind::Link | CommandKind::Launch => Self::new(kind.clone()).with("ids", p.texts()),

            CommandKind::Unlink => match p.text_at(0) {
                Some(first) if first.eq_ignore_ascii_case("all") => {
                    p.arity(1, 1)?;
                    Self::unlink_all()
                }
                _ => Self::new(CommandKind::Unlink)
                    .with("ids", p.texts())
                    .with("all", false),
            },

            CommandKind::Origin => {
                p.arity(2, 4)?;
                Self::new(CommandKind::Origin)
                    .with_opt("lat", p.f64_at(0, "lat")?)
                    .with_opt("lon", p.f64_at(1, "lon")?)
                    .with_opt("id", p.text_at(2))
                    .with_opt("setcmd", p.bool_at(3, "setcmd")?)
            }

            CommandKind::Arm | CommandKind::Disarm | CommandKind::Land | CommandKind::Home => {
                p.arity(0, 2)?;
                Self::new(kind.clone())
                    .with_opt("id", p.text_at(0))
                    .with_opt("setcmd", p.bool_at(1, "setcmd")?)
            }

            CommandKind::Takeoff => {
                p.arity(0, 4)?;
                Self::new(CommandKind::Takeoff)
                    .with_opt("altitude", p.f32_at(0, "altitude")?)
                    .with_opt("time", p.f32_at(1, "time")?)
                    .with_opt("id", p.text_at(2))
                    .with_opt("setcmd", p.bool_at(3, "setcmd")?)
            }

            CommandKind::Move => {
                p.arity(4, 6)?;
                let x = p.f32_at(0, "x")?.unwrap_or_default();
                let y = p.f32_at(1, "y")?.unwrap_or_default();
                let z = p.f32_at(2, "z")?.unwrap_or_default();
                Self::new(CommandKind::Move)
                    .with("position", [x, y, z])
                    .with_opt("time", p.f32_at(3, "time")?)
                    .with_opt("id", p.text_at(4))
                    .with_opt("setcmd", p.bool_at(5, "setcmd")?)
            }

            CommandKind::Kill => {
                p.arity(0, 1)?;
                Self::new(CommandKind::Kill).with_opt("id", p.text_at(0))
            }

            CommandKind::Delay => {
                p.arity(0, 3)?;
                Self::new(CommandKind::Delay)
                    .with_opt("seconds", p.f32_at(0, "seconds")?)
                    .with_opt("id", p.text_at(1))
                    .with("setcmd", p.bool_at(2, "setcmd")?.unwrap_or(true))
            }

            CommandKind::Status => {
                if params.is_empty() {
                    Self::new(CommandKind::Status)
                } else {
                    Self::new(CommandKind::Status).with("ids", p.texts())
                }
            }

            CommandKind::Shutdown => {
                p.arity(0, 0)?;
                Self::shutdown()
            }

            CommandKind::Other(_) => Self::new(kind.clone()),
        };

        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind)?;
        for (i, (key, value)) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        f.write_str(")")
    }
}
