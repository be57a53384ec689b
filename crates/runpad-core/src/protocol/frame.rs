//! Tag-prefixed line frames written by the child on standard output.
//!
//! Frame format: `<tag>:<payload>` terminated by `\n` (a trailing `\r` is
//! tolerated). Tags:
//!
//! - `i` input request, payload ignored
//! - `o` dumped [`ResultObject`] as JSON
//! - `e` [`ExceptionResult`] as JSON
//! - `p` [`ProgressResult`] as JSON

use crate::error::{Error, Result};

use super::result::{ExceptionResult, ProgressResult, ResultObject};

pub const TAG_INPUT: u8 = b'i';
pub const TAG_DUMP: u8 = b'o';
pub const TAG_EXCEPTION: u8 = b'e';
pub const TAG_PROGRESS: u8 = b'p';

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    InputRequest,
    Dumped(ResultObject),
    Exception(ExceptionResult),
    Progress(ProgressResult),
}

impl Frame {
    fn tag(&self) -> u8 {
        match self {
            Frame::InputRequest => TAG_INPUT,
            Frame::Dumped(_) => TAG_DUMP,
            Frame::Exception(_) => TAG_EXCEPTION,
            Frame::Progress(_) => TAG_PROGRESS,
        }
    }
}

/// Encode a frame as a single line, including the trailing `\n`.
pub fn encode_frame(frame: &Frame) -> Result<String> {
    let payload = match frame {
        Frame::InputRequest => String::new(),
        Frame::Dumped(obj) => serde_json::to_string(obj)?,
        Frame::Exception(exc) => serde_json::to_string(exc)?,
        Frame::Progress(p) => serde_json::to_string(p)?,
    };

    let mut line = String::with_capacity(payload.len() + 3);
    line.push(frame.tag() as char);
    line.push(':');
    line.push_str(&payload);
    line.push('\n');
    Ok(line)
}

/// Decode one line (without its `\n`) into a frame.
pub fn decode_frame(line: &[u8]) -> Result<Frame> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let (tag, payload) = match line {
        [tag, b':', rest @ ..] => (*tag, rest),
        _ => {
            return Err(Error::Protocol(format!(
                "frame without tag prefix: {:?}",
                preview(line)
            )));
        }
    };

    let payload = std::str::from_utf8(payload)
        .map_err(|e| Error::Protocol(format!("frame payload is not UTF-8: {e}")))?;

    let frame = match tag {
        TAG_INPUT => Frame::InputRequest,
        TAG_DUMP => Frame::Dumped(parse_payload(tag, payload)?),
        TAG_EXCEPTION => Frame::Exception(parse_payload(tag, payload)?),
        TAG_PROGRESS => Frame::Progress(parse_payload(tag, payload)?),
        other => {
            return Err(Error::Protocol(format!(
                "unknown frame tag '{}'",
                (other as char).escape_default()
            )));
        }
    };

    Ok(frame)
}

fn parse_payload<T: serde::de::DeserializeOwned>(tag: u8, payload: &str) -> Result<T> {
    serde_json::from_str(payload).map_err(|e| {
        Error::Protocol(format!(
            "invalid '{}' payload: {e} (payload: {:?})",
            tag as char,
            preview(payload.as_bytes())
        ))
    })
}

fn preview(bytes: &[u8]) -> String {
    let end = bytes.len().min(80);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
