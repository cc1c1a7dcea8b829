// 宛先付きメッセージ
pub mod envelope;

// プロセス内メッセージバス
pub mod bus;

pub use bus::{ChannelError, InMemoryChannel};
pub use envelope::{Envelope, Message, MessageKind};
