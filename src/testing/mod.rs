//! Test doubles for running the core without a live broker

pub mod mocks;

pub use mocks::*;
