// Data sources — Layers that originate values instead of transforming them
//
// Input declares externally-fed buffers: the graph allocates them with the
// given shapes and the caller writes values before running forward. Data
// synthesizes values from fillers, the standard way to drive a topology in
// tests and benchmarks without a real pipeline.
//
// REFILL RULE (Data): deterministic fillers (constants) are written at
// setup and left alone afterwards; stochastic fillers draw fresh values on
// every forward pass, like a source that yields a new batch per step.
// Re-running setup never redraws stochastic values, so a graph reshape
// with unchanged shapes leaves all outputs byte-identical.

use civet_core::{Buffer, Error, Filler, Result, Shape};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::layer::{check_input_arity, Layer};

/// Configuration for an [`Input`] layer: one shape per declared output.
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub shapes: Vec<Shape>,
}

/// Declares externally-fed buffers; forward and backward are no-ops.
pub struct Input {
    cfg: InputConfig,
}

impl Input {
    pub fn new(cfg: InputConfig) -> Self {
        Input { cfg }
    }
}

impl Layer for Input {
    fn kind(&self) -> &'static str {
        "Input"
    }

    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        check_input_arity(self.kind(), inputs, 0)?;
        if outputs.len() != self.cfg.shapes.len() {
            return Err(Error::topology(format!(
                "Input declares {} shape(s) but has {} output(s)",
                self.cfg.shapes.len(),
                outputs.len()
            )));
        }
        for (out, shape) in outputs.iter().zip(self.cfg.shapes.iter()) {
            out.reshape(shape.clone());
        }
        Ok(())
    }

    fn forward(&mut self, _inputs: &[Buffer], _outputs: &[Buffer]) -> Result<()> {
        Ok(())
    }

    fn backward(
        &mut self,
        _outputs: &[Buffer],
        _propagate_down: &[bool],
        _inputs: &[Buffer],
    ) -> Result<()> {
        Ok(())
    }
}

/// Configuration for a [`Data`] layer: shape and filler per output.
#[derive(Debug, Clone)]
pub struct DataConfig {
    pub outputs: Vec<(Shape, Filler)>,
}

/// Synthetic data source driven by fillers.
pub struct Data {
    cfg: DataConfig,
    rng: StdRng,
    set_up: bool,
}

impl Data {
    /// Create a source drawing from a fresh entropy seed.
    pub fn new(cfg: DataConfig) -> Self {
        Self::seeded(cfg, rand::random())
    }

    /// Create a source drawing from a fixed seed.
    pub fn seeded(cfg: DataConfig, seed: u64) -> Self {
        Data {
            cfg,
            rng: StdRng::seed_from_u64(seed),
            set_up: false,
        }
    }
}

impl Layer for Data {
    fn kind(&self) -> &'static str {
        "Data"
    }

    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        check_input_arity(self.kind(), inputs, 0)?;
        if outputs.len() != self.cfg.outputs.len() {
            return Err(Error::topology(format!(
                "Data declares {} output spec(s) but has {} output(s)",
                self.cfg.outputs.len(),
                outputs.len()
            )));
        }
        for (out, (shape, filler)) in outputs.iter().zip(self.cfg.outputs.iter()) {
            out.reshape(shape.clone());
            // First setup seeds everything; afterwards only constants get
            // rewritten (idempotent), so re-setup preserves drawn values.
            if !self.set_up || filler.is_deterministic() {
                filler.fill(out, &mut self.rng)?;
            }
        }
        self.set_up = true;
        Ok(())
    }

    fn forward(&mut self, _inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        for (out, (_, filler)) in outputs.iter().zip(self.cfg.outputs.iter()) {
            if !filler.is_deterministic() {
                filler.fill(out, &mut self.rng)?;
            }
        }
        Ok(())
    }

    fn backward(
        &mut self,
        _outputs: &[Buffer],
        _propagate_down: &[bool],
        _inputs: &[Buffer],
    ) -> Result<()> {
        Ok(())
    }
}
