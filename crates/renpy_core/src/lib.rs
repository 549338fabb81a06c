pub mod archive;
pub mod config;
pub mod core_api;
pub mod layout;
pub mod patch;
pub mod pickle;
pub mod signing;
pub mod store;
