pub mod api;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod provisioning;
pub mod storage;
pub mod sync;
pub mod token_broker;
