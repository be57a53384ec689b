//! Child process output protocol.
//!
//! Standard output carries tag-prefixed frames (see [`frame`]); standard
//! error is plain text where every line is surfaced as a dumped value.

pub mod frame;
pub mod reader;
pub mod result;

pub use frame::{Frame, decode_frame, encode_frame};
pub use reader::{FrameReader, FrameWriter};
pub use result::{ExceptionResult, ProgressResult, ResultObject};
