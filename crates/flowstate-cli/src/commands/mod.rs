pub mod config;
pub mod daemon;
pub mod helpers;
pub mod history;
pub mod session;
