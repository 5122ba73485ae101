//! # civet-core
//!
//! Core storage primitives and types for the civet layer-graph engine.
//!
//! This crate provides:
//! - [`Buffer`] — named value/gradient storage with shared ownership
//! - [`BufferTable`] — ordered name→buffer registry used by graph builders
//! - [`Shape`] — n-dimensional extents
//! - [`Filler`] — parameter and data initialization patterns
//! - [`Error`] / [`Result`] — the workspace-wide error type

pub mod buffer;
pub mod error;
pub mod filler;
pub mod shape;

pub use buffer::{Buffer, BufferTable};
pub use error::{Error, Result};
pub use filler::{compute_fans, Filler};
pub use shape::Shape;
