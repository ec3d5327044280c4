pub mod chat_message;
pub mod position;
pub mod room;
pub mod user;
