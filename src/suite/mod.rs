//! Suites described by a YAML manifest: the units, their checks, and the
//! setup steps that bring up the system under test.

pub mod build;
pub mod manifest;
pub mod units;
