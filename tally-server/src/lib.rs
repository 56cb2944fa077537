//! tally-server: HTTP service for the Tally conversational expense tracker

pub mod categorize;
pub mod config;
pub mod container;
pub mod http;
pub mod insight;
pub mod llm;
pub mod store;
