//! Typed commands decoded from request frames.

use crate::protocol::Frame;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// A request the server knows how to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// PING [message]
    Ping(Option<Bytes>),
    /// ECHO message
    Echo(Bytes),
    /// SET key value [PX milliseconds | EX seconds]
    Set {
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
    },
    /// GET key
    Get(Bytes),
    /// CONFIG GET parameter
    ConfigGet(String),
    /// KEYS pattern
    Keys(Bytes),
}

/// Reasons a frame is not a valid command.
///
/// The display text is the error reply sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("ERR empty command")]
    Empty,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR invalid expire time in 'SET' command")]
    InvalidExpireTime,

    #[error("ERR unknown subcommand '{0}'. Try CONFIG GET.")]
    UnknownSubcommand(String),
}

impl Command {
    /// Builds a command from a decoded frame. Verbs and option names are
    /// case-insensitive; arguments are kept as raw bytes.
    pub fn from_frame(frame: Frame) -> Result<Self, CommandError> {
        let (verb, args) = frame.split_first().ok_or(CommandError::Empty)?;

        match verb.to_ascii_uppercase().as_slice() {
            b"PING" => match args {
                [] => Ok(Command::Ping(None)),
                [message] => Ok(Command::Ping(Some(message.clone()))),
                _ => Err(CommandError::WrongArity("PING")),
            },
            b"ECHO" => match args {
                [message] => Ok(Command::Echo(message.clone())),
                _ => Err(CommandError::WrongArity("ECHO")),
            },
            b"SET" => parse_set(args),
            b"GET" => match args {
                [key] => Ok(Command::Get(key.clone())),
                _ => Err(CommandError::WrongArity("GET")),
            },
            b"CONFIG" => parse_config(args),
            b"KEYS" => match args {
                [pattern] => Ok(Command::Keys(pattern.clone())),
                _ => Err(CommandError::WrongArity("KEYS")),
            },
            _ => Err(CommandError::UnknownCommand(reply_safe(verb))),
        }
    }

    /// Upper-case verb, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping(_) => "PING",
            Command::Echo(_) => "ECHO",
            Command::Set { .. } => "SET",
            Command::Get(_) => "GET",
            Command::ConfigGet(_) => "CONFIG",
            Command::Keys(_) => "KEYS",
        }
    }
}

fn parse_set(args: &[Bytes]) -> Result<Command, CommandError> {
    let (key, value, mut options) = match args {
        [key, value, options @ ..] => (key, value, options),
        _ => return Err(CommandError::WrongArity("SET")),
    };

    let mut ttl = None;
    while let [option, rest @ ..] = options {
        let unit_ms: u64 = match option.to_ascii_uppercase().as_slice() {
            b"PX" => 1,
            b"EX" => 1000,
            _ => return Err(CommandError::Syntax),
        };
        let (amount, rest) = rest.split_first().ok_or(CommandError::Syntax)?;

        let millis = parse_ttl_amount(amount)?
            .checked_mul(unit_ms)
            .ok_or(CommandError::InvalidExpireTime)?;
        ttl = Some(Duration::from_millis(millis));
        options = rest;
    }

    Ok(Command::Set {
        key: key.clone(),
        value: value.clone(),
        ttl,
    })
}

/// Zero is accepted and expires the key immediately.
fn parse_ttl_amount(raw: &[u8]) -> Result<u64, CommandError> {
    let amount: i64 = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)?;

    u64::try_from(amount).map_err(|_| CommandError::InvalidExpireTime)
}

fn parse_config(args: &[Bytes]) -> Result<Command, CommandError> {
    let (subcommand, rest) = args
        .split_first()
        .ok_or(CommandError::WrongArity("CONFIG"))?;

    match subcommand.to_ascii_uppercase().as_slice() {
        b"GET" => match rest {
            [parameter] => Ok(Command::ConfigGet(
                String::from_utf8_lossy(parameter).to_ascii_lowercase(),
            )),
            _ => Err(CommandError::WrongArity("CONFIG|GET")),
        },
        _ => Err(CommandError::UnknownSubcommand(reply_safe(subcommand))),
    }
}

/// Renders client bytes for an error reply, which must stay on one line.
fn reply_safe(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).replace(['\r', '\n'], " ")
}
