pub mod cli;
pub mod config;
pub mod graph;
pub mod history;
pub mod plan;
pub mod registry;
pub mod runner;
pub mod suite;
