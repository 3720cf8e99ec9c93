pub mod domain;
pub mod history;
pub mod ports;

pub use domain::{
    BatchOperation, Conversation, Message, MessageRole, NewMessage, NewUser,
    SessionUser, SystemStats, ToolCall, User, UserCredentials, UserDetails, UserRole,
};
pub use ports::{AssistantService, DatabaseService, PortError, PortResult};
