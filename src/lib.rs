pub mod config;
pub mod device;
pub mod filter;
pub mod gateway;
pub mod ip_limit;
pub mod prompts;
pub mod store;
pub mod upstream;
