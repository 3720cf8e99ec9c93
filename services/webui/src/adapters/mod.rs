pub mod chat_llm;
pub mod db;

pub use chat_llm::OpenAiChatAdapter;
pub use db::DbAdapter;
