pub mod client;
pub mod payload;
pub mod publisher;
pub mod reply;
