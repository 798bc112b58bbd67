// Public API for the terminal client and integration tests

pub mod api;
pub mod config;
pub mod poller;
pub mod presenter;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod status;
pub mod types;
pub mod vote;
