pub mod appointment;
pub mod client;
pub mod conversation;
pub mod message;
