//! Protocol module - option envelope, headers, and value framing.
//!
//! Wire sequence per connection:
//!
//! ```text
//! [Options JSON line] [Header][Body] [Header][Body] ...
//! ```
//!
//! The option envelope is sent once by the initiator. After it, headers and
//! bodies flow in both directions in the negotiated codec.

mod header;
mod message_buffer;
mod options;

pub use header::Header;
pub use message_buffer::{MessageBuffer, DEFAULT_MAX_MESSAGE_SIZE};
pub use options::{Options, DEFAULT_CONNECT_TIMEOUT, MAGIC_NUMBER};
