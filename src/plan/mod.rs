pub mod selector;
pub mod types;
