pub mod cli;
pub mod clock;
pub mod daemon;
pub mod errors;
pub mod models;
pub mod remote;
pub mod server;
pub mod storage;
