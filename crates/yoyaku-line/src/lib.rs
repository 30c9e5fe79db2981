pub mod client;
pub mod messages;
pub mod signature;
pub mod webhook;

pub use client::{LineClient, PushSender};
pub use messages::Message;
