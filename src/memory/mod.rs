//! 记忆层：对话历史、记忆协作方、持久化协作方

pub mod context;
pub mod conversation;
pub mod persistence;

pub use context::{MemoryContext, MemoryProvider, NoopMemory, StaticMemory, MEMORY_LAYERS};
pub use conversation::{without_dangling_user, HistoryMessage, Sender};
pub use persistence::{InMemoryStore, MessageStore, NoopStore};
