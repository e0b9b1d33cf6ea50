pub mod api;
pub mod config_io;
pub mod socket;
pub mod sse;
pub mod token;
