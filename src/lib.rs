pub mod catalog;
pub mod cli;
pub mod config;
pub mod executor;
pub mod extract;
pub mod history;
pub mod hooks;
pub mod lang;
pub mod logger;
pub mod message;
pub mod node;
pub mod nodes;
pub mod pipeline;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod secret;
