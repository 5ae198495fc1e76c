pub mod messages;
pub mod raw;

pub use messages::MessagesBuffer;
pub use raw::RawMessagesBuffer;
