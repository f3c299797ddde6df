pub mod conversation;
pub mod message;
pub mod token;
pub mod user;

pub use conversation::Conversation;
pub use message::{Message, NewMessage};
pub use token::AccessToken;
pub use user::User;
