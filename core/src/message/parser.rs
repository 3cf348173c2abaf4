// Name-addressed message protocol
//
// Endpoints without a programmatic interface send and receive text through
// their display name:
//   sent:     "Name[.[grid:block:content].]"
//   received: "Name<.<grid:block:content>.>"
// The content part may itself contain ':'.

use super::types::Message;
use thiserror::Error;

const START_OF_SEND: &str = "[.[";
const END_OF_SEND: &str = "].]";
const START_OF_RECEIVE: &str = "<.<";
const END_OF_RECEIVE: &str = ">.>";
const SEPARATOR: char = ':';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Name carries no send command")]
    NoCommand,

    #[error("Send command needs grid, block and content, got {0} field(s)")]
    MissingFields(usize),
}

/// A send command extracted from a display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendCommand {
    /// The display name with the command removed
    pub clean_name: String,
    /// Loose match against destination grid names
    pub grid: String,
    /// Loose match against destination block names
    pub block: String,
    pub content: String,
}

/// Extract the send command from `name`.
pub fn parse_send(name: &str) -> Result<SendCommand, ParseError> {
    let open = name.find(START_OF_SEND).ok_or(ParseError::NoCommand)?;
    let body_start = open + START_OF_SEND.len();
    let close = name
        .rfind(END_OF_SEND)
        .filter(|&close| close > body_start)
        .ok_or(ParseError::NoCommand)?;

    let mut fields = name[body_start..close].splitn(3, SEPARATOR);
    let grid = fields.next().unwrap_or_default();
    let block = fields.next();
    let content = fields.next();

    match (block, content) {
        (Some(block), Some(content)) => Ok(SendCommand {
            clean_name: name[..open].to_string(),
            grid: grid.to_string(),
            block: block.to_string(),
            content: content.to_string(),
        }),
        (Some(_), None) => Err(ParseError::MissingFields(2)),
        _ => Err(ParseError::MissingFields(1)),
    }
}

/// False when `name` already carries protocol markers; writing a received
/// message into it would make it ambiguous.
pub fn can_write_to(name: &str) -> bool {
    ![START_OF_SEND, END_OF_SEND, START_OF_RECEIVE, END_OF_RECEIVE]
        .iter()
        .any(|marker| name.contains(marker))
}

/// Append a received message to `name`.
pub fn append_received(name: &str, message: &Message) -> String {
    format!(
        "{name}{START_OF_RECEIVE}{}{SEPARATOR}{}{SEPARATOR}{}{END_OF_RECEIVE}",
        message.source_grid_name(),
        message.source_block_name(),
        message.content()
    )
}
