pub mod app;
pub mod archives;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod output;
pub mod reference;
pub mod request;
pub mod store;
pub mod tui;
pub mod weeks;
