//! Object store backends.

pub mod filesystem;
