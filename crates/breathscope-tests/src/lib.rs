//! Integration test crate for Breathscope.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! GPU tests return early when no compute adapter is present.

#[cfg(test)]
mod fixtures;

#[cfg(test)]
mod magnify;

#[cfg(test)]
mod gpu;
