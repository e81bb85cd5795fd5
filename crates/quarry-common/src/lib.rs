//! Common types for quarry
//!
//! This crate provides the error taxonomy shared by every quarry crate.

pub mod error;

pub use error::{DbError, Result};
