pub mod bench;
pub mod chat;
pub mod onboard;
pub mod serve;
