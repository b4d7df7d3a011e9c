//! Shared support for the `engramd` and `engram-hook` binaries.

pub mod config;
