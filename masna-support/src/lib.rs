//! # Masna Support
//!
//! Shared utilities for the Masna container crates.
//!
//! This crate provides:
//! - Text rendering for error messages
//! - Identifier normalization used for init-method lookup

pub mod rendering;
