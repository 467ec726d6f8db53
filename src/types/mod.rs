//! Shared types for GrainHero

pub mod error;

pub use error::{GrainError, Result};
