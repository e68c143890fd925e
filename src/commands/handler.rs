//! Command Handler Implementation
//!
//! Turns a decoded request frame into a reply by way of the typed
//! [`Command`] enum.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌──────────────┐    ┌─────────────┐    ┌─────────────┐    │
//! │  │ from_frame() │───>│   apply()   │───>│  RespValue  │    │
//! │  └──────────────┘    └─────────────┘    └─────────────┘    │
//! │         │                   │                               │
//! │         ▼                   ▼                               │
//! │   CommandError        StorageEngine                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::commands::Command;
use crate::protocol::{Frame, RespValue};
use crate::storage::StorageEngine;
use std::sync::Arc;
use tracing::debug;

/// Executes commands against a shared storage engine.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Executes one request frame and returns the reply.
    ///
    /// Invalid commands produce an error reply; they never fail the
    /// connection.
    pub fn execute(&self, frame: Frame) -> RespValue {
        match Command::from_frame(frame) {
            Ok(command) => self.apply(command),
            Err(e) => {
                debug!(error = %e, "Rejected command");
                RespValue::error(e.to_string())
            }
        }
    }

    /// Runs a typed command.
    pub fn apply(&self, command: Command) -> RespValue {
        match command {
            Command::Ping(None) => RespValue::pong(),
            Command::Ping(Some(message)) => RespValue::bulk_string(message),
            Command::Echo(message) => RespValue::bulk_string(message),
            Command::Set { key, value, ttl } => {
                match ttl {
                    Some(ttl) => self.storage.set_with_ttl(key, value, ttl),
                    None => self.storage.set(key, value),
                };
                RespValue::ok()
            }
            Command::Get(key) => match self.storage.get(&key) {
                Some(value) => RespValue::bulk_string(value),
                None => RespValue::null(),
            },
            Command::ConfigGet(parameter) => match self.storage.config_get(&parameter) {
                Some(value) => RespValue::bulk_array([parameter, value]),
                None => RespValue::null(),
            },
            Command::Keys(pattern) => RespValue::bulk_array(self.storage.keys_matching(&pattern)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn create_handler() -> CommandHandler {
        let storage = Arc::new(StorageEngine::new());
        CommandHandler::new(storage)
    }

    fn make_command(args: &[&str]) -> Frame {
        args.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    fn sorted_keys(response: RespValue) -> Vec<Bytes> {
        let mut keys: Vec<Bytes> = match response {
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::BulkString(b) => b,
                    other => panic!("expected bulk string, got {:?}", other),
                })
                .collect(),
            other => panic!("expected array, got {:?}", other),
        };
        keys.sort();
        keys
    }

    #[test]
    fn test_ping() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["PING"]));
        assert_eq!(response, RespValue::simple_string("PONG"));

        let response = handler.execute(make_command(&["ping", "hi"]));
        assert_eq!(response, RespValue::bulk_string(Bytes::from("hi")));
    }

    #[test]
    fn test_echo() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["ECHO", "hello world"]));
        assert_eq!(response.serialize(), b"$11\r\nhello world\r\n");
    }

    #[test]
    fn test_set_get() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["SET", "name", "Ariz"]));
        assert_eq!(response, RespValue::ok());

        let response = handler.execute(make_command(&["GET", "name"]));
        assert_eq!(response, RespValue::bulk_string(Bytes::from("Ariz")));
    }

    #[test]
    fn test_get_nonexistent() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["GET", "nonexistent"]));
        assert_eq!(response, RespValue::null());
        assert_eq!(response.serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_set_with_px() {
        let handler = create_handler();

        handler.execute(make_command(&["SET", "temp", "v", "PX", "50"]));
        assert_eq!(
            handler.execute(make_command(&["GET", "temp"])),
            RespValue::bulk_string(Bytes::from("v"))
        );

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(
            handler.execute(make_command(&["GET", "temp"])),
            RespValue::null()
        );
    }

    #[test]
    fn test_set_px_zero_expires_immediately() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["SET", "k", "v", "px", "0"]));
        assert_eq!(response, RespValue::ok());
        assert_eq!(handler.execute(make_command(&["GET", "k"])), RespValue::null());
    }

    #[test]
    fn test_plain_set_clears_ttl() {
        let handler = create_handler();

        handler.execute(make_command(&["SET", "k", "v1", "PX", "50"]));
        handler.execute(make_command(&["SET", "k", "v2"]));
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(
            handler.execute(make_command(&["GET", "k"])),
            RespValue::bulk_string(Bytes::from("v2"))
        );
    }

    #[test]
    fn test_invalid_ttl_leaves_key_untouched() {
        let handler = create_handler();

        handler.execute(make_command(&["SET", "k", "old"]));
        let response = handler.execute(make_command(&["SET", "k", "new", "PX", "-1"]));
        assert!(response.is_error());

        assert_eq!(
            handler.execute(make_command(&["GET", "k"])),
            RespValue::bulk_string(Bytes::from("old"))
        );
    }

    #[test]
    fn test_config_get() {
        let storage = Arc::new(StorageEngine::new());
        storage.config_set("dir", "/tmp/redis-files");
        let handler = CommandHandler::new(storage);

        let response = handler.execute(make_command(&["CONFIG", "GET", "dir"]));
        assert_eq!(response.serialize(), b"*2\r\n$3\r\ndir\r\n$16\r\n/tmp/redis-files\r\n");

        let response = handler.execute(make_command(&["CONFIG", "GET", "dbfilename"]));
        assert_eq!(response, RespValue::null());
    }

    #[test]
    fn test_keys() {
        let handler = create_handler();

        handler.execute(make_command(&["SET", "user:1", "a"]));
        handler.execute(make_command(&["SET", "user:2", "b"]));
        handler.execute(make_command(&["SET", "session", "c"]));
        handler.execute(make_command(&["SET", "gone", "d", "PX", "0"]));

        let all = sorted_keys(handler.execute(make_command(&["KEYS", "*"])));
        assert_eq!(
            all,
            vec![
                Bytes::from("session"),
                Bytes::from("user:1"),
                Bytes::from("user:2")
            ]
        );

        let users = sorted_keys(handler.execute(make_command(&["KEYS", "user:*"])));
        assert_eq!(users, vec![Bytes::from("user:1"), Bytes::from("user:2")]);

        let response = handler.execute(make_command(&["KEYS", "nothing*"]));
        assert_eq!(response.serialize(), b"*0\r\n");
    }

    #[test]
    fn test_wrong_arity() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["GET"]));
        assert_eq!(
            response,
            RespValue::error("ERR wrong number of arguments for 'GET' command")
        );
    }

    #[test]
    fn test_unknown_command_with_crlf_is_one_reply() {
        let handler = create_handler();

        let reply = handler
            .execute(vec![Bytes::from_static(b"X\r\n+OK")])
            .serialize();
        assert_eq!(reply.windows(2).filter(|w| *w == b"\r\n").count(), 1);
        assert!(reply.starts_with(b"-ERR unknown command"));
        assert!(reply.ends_with(b"\r\n"));
    }

    #[test]
    fn test_unknown_command() {
        let handler = create_handler();

        let response = handler.execute(make_command(&["UNKNOWN"]));
        assert!(matches!(response, RespValue::Error(_)));
        assert_eq!(response.serialize(), b"-ERR unknown command 'UNKNOWN'\r\n");
    }
}
