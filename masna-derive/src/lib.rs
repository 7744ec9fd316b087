//! Derive macros for Masna.

pub use masna_macros::Component;
