//! # civet-nn
//!
//! The layer catalog for Civet: computation nodes that plug into the
//! graph engine in the `civet` crate.
//!
//! Every node implements the [`Layer`] trait:
//!
//! 1. **setup** — validate input shapes, size outputs, create parameters
//! 2. **forward** — read input data, write output data
//! 3. **backward** — read output gradients, accumulate input and
//!    parameter gradients
//!
//! Layers never allocate their own inputs or outputs; the engine wires
//! shared [`Buffer`](civet_core::Buffer) handles into every call. That
//! keeps the catalog open: anything implementing [`Layer`] can sit in a
//! graph next to the built-in nodes.
//!
//! The built-ins cover the classic supervised pipeline: data sources
//! ([`Input`], [`Data`]), learnable transforms ([`Linear`], [`Conv2d`]),
//! spatial reduction ([`MaxPool2d`]), pointwise activations ([`Relu`],
//! [`Sigmoid`], [`Tanh`], [`Softmax`]), and losses ([`CrossEntropy`],
//! [`MseLoss`]).

pub mod activation;
pub mod conv;
pub mod data;
pub mod layer;
pub mod linear;
pub mod loss;
pub mod pool;
pub mod softmax;

pub use civet_core::{Buffer, Error, Result};

pub use activation::{Relu, Sigmoid, Tanh};
pub use conv::{Conv2d, Conv2dConfig};
pub use data::{Data, DataConfig, Input, InputConfig};
pub use layer::Layer;
pub use linear::{Linear, LinearConfig};
pub use loss::{CrossEntropy, MseLoss};
pub use pool::{MaxPool2d, MaxPool2dConfig};
pub use softmax::Softmax;
