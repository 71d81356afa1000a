pub mod client;
pub mod credentials;
pub mod http_client;
pub mod json_parser;
pub mod prompts;

pub use client::*;
pub use credentials::*;
