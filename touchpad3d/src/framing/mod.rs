//! Message framing for the two supported transport kinds.
//!
//! Both extractors take raw transport input and produce complete messages.
//! Neither one ever fails: malformed input is reported through
//! [`Diagnostics`](crate::diagnostics::Diagnostics) and the extractor
//! resynchronizes on the next well-formed frame.

pub mod packet;
pub mod stream;

pub use packet::{ChunkedMessage, PacketExtractor};
pub use stream::StreamExtractor;
