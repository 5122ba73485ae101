//! # Civet
//!
//! A layer-graph execution engine: describe a network as named layers
//! wired through named buffers, build it once, then drive forward and
//! backward passes over the whole graph or any contiguous slice of it.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use civet::prelude::*;
//!
//! let mut net = Net::from_text(
//!     r#"
//!     @net { name: "tiny"; seed: 7; }
//!
//!     layer data: Data {
//!         output x: [4, 3] = gaussian(0.0, 1.0);
//!         output labels: [4] = constant(0.0);
//!     }
//!
//!     layer fc: Linear {
//!         input x;
//!         output scores;
//!         out_features: 2;
//!         weight_filler: xavier();
//!     }
//!
//!     layer loss: CrossEntropy {
//!         input scores;
//!         input labels;
//!         output loss;
//!     }
//!     "#,
//! )?;
//!
//! let result = net.forward()?;
//! net.backward()?;
//! println!("loss = {}", result.loss);
//! # civet::Result::Ok(())
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `civet-core` | Buffer (value + gradient storage), Shape, Filler, errors |
//! | `civet-nn` | The layer catalog: Linear, Conv2d, MaxPool2d, activations, losses |
//! | `civet` | NetConfig, topology text format, graph builder, execution engine |
//!
//! ## Modules
//!
//! - [`net`] — the built graph: forward/backward/reshape plus inspection
//! - [`config`] — declarative net descriptions, JSON encoding
//! - [`topo`] — the topology text format parser

/// Re-export core types.
pub use civet_core::{Buffer, Error, Filler, Result, Shape};

/// Re-export the layer catalog.
pub mod nn {
    pub use civet_nn::*;
}

/// Net configuration — layer definitions, fillers, param specs.
pub mod config;

/// Net — build, run, and inspect layer graphs.
pub mod net;

/// Topology text format parser.
pub mod topo;

pub use config::{FillerDef, GradPolicy, LayerDef, LayerKind, NetConfig, ParamSpec, SourceDef};
pub use net::{ForwardResult, LayerInfo, Net, ParamInfo};

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::config::{
        FillerDef, GradPolicy, LayerDef, LayerKind, NetConfig, ParamSpec, SourceDef,
    };
    pub use crate::net::{ForwardResult, LayerInfo, Net, ParamInfo};
    pub use crate::nn::Layer;
    pub use crate::{Buffer, Error, Filler, Result, Shape};
}
