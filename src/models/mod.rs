pub mod chat;
pub mod commerce;
