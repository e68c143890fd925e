//! RESP Protocol Implementation
//!
//! The subset of the Redis Serialization Protocol spoken by snapkv.
//!
//! ## Modules
//!
//! - `parser`: incremental decoder for client requests (arrays of bulk strings)
//! - `types`: the `RespValue` reply enum and its serializer
//!
//! ## Example
//!
//! ```
//! use snapkv::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (args, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(args.len(), 2);
//! assert_eq!(consumed, data.len());
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, Frame, ParseError, ParseResult, RespParser};
pub use types::RespValue;
