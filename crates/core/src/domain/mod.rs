pub mod memory;
pub mod message;
pub mod thread;
pub mod turn;
