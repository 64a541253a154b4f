pub mod aggregate;
pub mod breaker;
pub mod context;
pub mod display;
pub mod orchestrator;
pub mod outcome;
pub mod phase;
pub mod report;
pub mod result;
pub mod setup;
pub mod surface;
