//! The wire protocol: commands, message shapes, inventory, and the framed
//! codec.

pub mod codec;
pub mod command;
pub mod inv;
pub mod message;

pub use codec::Codec;
pub use command::Command;
pub use inv::{InvKind, Inventory};
pub use message::Message;
