// Message module: relayed text payloads and the name-addressed protocol

pub mod parser;
pub mod types;

pub use parser::{append_received, can_write_to, parse_send, ParseError, SendCommand};
pub use types::Message;
