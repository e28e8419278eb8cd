pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod lock;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod store;
pub mod vagrantfile;
