// Linear — Fully-connected (dense) layer
//
// The most fundamental learnable layer: y = x·W^T + b.
//
// The input's trailing dimensions are flattened, so an input of shape
// [batch, d1, d2, ...] is treated as [batch, K] with K = d1·d2·...  The
// output is always [batch, out_features].
//
// PARAMETER SHAPES:
//
//   weight: [out_features, K]  — stored transposed for row-wise dot products
//   bias:   [out_features]     — optional, added per output feature
//
// The in-feature count K is discovered at setup from the first input
// shape; re-running setup with a different K is a shape error, because the
// existing weights would no longer fit.

use civet_core::{Buffer, Error, Filler, Result, Shape};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::layer::{check_input_arity, check_output_arity, Layer};

/// Configuration for a [`Linear`] layer.
#[derive(Debug, Clone)]
pub struct LinearConfig {
    /// Number of output features.
    pub out_features: usize,
    /// Whether to add a learnable bias.
    pub bias: bool,
    /// Initialization for the weight matrix.
    pub weight_filler: Filler,
    /// Initialization for the bias vector.
    pub bias_filler: Filler,
}

impl LinearConfig {
    /// Xavier weights, zero bias.
    pub fn new(out_features: usize) -> Self {
        LinearConfig {
            out_features,
            bias: true,
            weight_filler: Filler::Xavier,
            bias_filler: Filler::Constant(0.0),
        }
    }
}

/// A fully-connected layer: y = x·W^T + b over flattened trailing dims.
pub struct Linear {
    cfg: LinearConfig,
    /// Flattened input feature count, fixed by the first setup.
    in_features: usize,
    weight: Option<Buffer>,
    bias: Option<Buffer>,
    grad_flags: Vec<bool>,
    rng: StdRng,
}

impl Linear {
    /// Create an unbuilt layer; parameters materialize at setup.
    pub fn new(cfg: LinearConfig) -> Self {
        Self::seeded(cfg, rand::random())
    }

    /// Create an unbuilt layer whose fillers draw from a fixed seed.
    pub fn seeded(cfg: LinearConfig, seed: u64) -> Self {
        Linear {
            cfg,
            in_features: 0,
            weight: None,
            bias: None,
            grad_flags: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The weight buffer, if setup has run.
    pub fn weight(&self) -> Option<&Buffer> {
        self.weight.as_ref()
    }

    /// The bias buffer, if setup has run and bias is enabled.
    pub fn bias(&self) -> Option<&Buffer> {
        self.bias.as_ref()
    }

    fn weight_buf(&self) -> Result<&Buffer> {
        self.weight
            .as_ref()
            .ok_or_else(|| Error::msg("Linear used before setup"))
    }
}

impl Layer for Linear {
    fn kind(&self) -> &'static str {
        "Linear"
    }

    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        check_input_arity(self.kind(), inputs, 1)?;
        check_output_arity(self.kind(), outputs, 1)?;

        let in_shape = inputs[0].shape();
        if in_shape.rank() < 1 {
            return Err(Error::topology("Linear input must have a batch dimension"));
        }
        let batch = in_shape.dims()[0];
        let k = in_shape.elem_count() / batch.max(1);

        match &self.weight {
            None => {
                let weight = Buffer::new("weight", (self.cfg.out_features, k));
                self.cfg.weight_filler.fill(&weight, &mut self.rng)?;
                self.weight = Some(weight);
                if self.cfg.bias {
                    let bias = Buffer::new("bias", self.cfg.out_features);
                    self.cfg.bias_filler.fill(&bias, &mut self.rng)?;
                    self.bias = Some(bias);
                }
                self.in_features = k;
                self.grad_flags = vec![true; if self.cfg.bias { 2 } else { 1 }];
            }
            Some(weight) => {
                // Re-setup keeps learned values; the flattened feature
                // count must still match the stored weights.
                if k != self.in_features {
                    return Err(Error::ShapeMismatch {
                        expected: weight.shape(),
                        got: Shape::from((self.cfg.out_features, k)),
                    });
                }
            }
        }

        outputs[0].reshape((batch, self.cfg.out_features));
        Ok(())
    }

    fn forward(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        let weight = self.weight_buf()?.clone();
        let batch = inputs[0].shape().dims()[0];
        let (out_f, k) = (self.cfg.out_features, self.in_features);

        let x = inputs[0].data();
        let w = weight.data();
        let bias = self.bias.as_ref().map(|b| b.data_vec());
        let mut y = outputs[0].data_mut();

        for n in 0..batch {
            for o in 0..out_f {
                let mut acc = bias.as_ref().map_or(0.0, |b| b[o]);
                let wrow = &w[o * k..(o + 1) * k];
                let xrow = &x[n * k..(n + 1) * k];
                for (wv, xv) in wrow.iter().zip(xrow.iter()) {
                    acc += wv * xv;
                }
                y[n * out_f + o] = acc;
            }
        }
        Ok(())
    }

    fn backward(
        &mut self,
        outputs: &[Buffer],
        propagate_down: &[bool],
        inputs: &[Buffer],
    ) -> Result<()> {
        let weight = self.weight_buf()?.clone();
        let batch = inputs[0].shape().dims()[0];
        let (out_f, k) = (self.cfg.out_features, self.in_features);

        let dy = outputs[0].grad();
        let x = inputs[0].data();

        if self.grad_flags[0] {
            let mut dw = weight.grad_mut();
            for n in 0..batch {
                for o in 0..out_f {
                    let g = dy[n * out_f + o];
                    if g == 0.0 {
                        continue;
                    }
                    let dwrow = &mut dw[o * k..(o + 1) * k];
                    let xrow = &x[n * k..(n + 1) * k];
                    for (dwv, xv) in dwrow.iter_mut().zip(xrow.iter()) {
                        *dwv += g * xv;
                    }
                }
            }
        }

        if let Some(bias) = &self.bias {
            if self.grad_flags[1] {
                let mut db = bias.grad_mut();
                for n in 0..batch {
                    for o in 0..out_f {
                        db[o] += dy[n * out_f + o];
                    }
                }
            }
        }

        if propagate_down[0] {
            let w = weight.data();
            let mut dx = inputs[0].grad_mut();
            for n in 0..batch {
                for o in 0..out_f {
                    let g = dy[n * out_f + o];
                    if g == 0.0 {
                        continue;
                    }
                    let wrow = &w[o * k..(o + 1) * k];
                    let dxrow = &mut dx[n * k..(n + 1) * k];
                    for (dxv, wv) in dxrow.iter_mut().zip(wrow.iter()) {
                        *dxv += g * wv;
                    }
                }
            }
        }
        Ok(())
    }

    fn params(&self) -> Vec<Buffer> {
        let mut params = Vec::new();
        if let Some(w) = &self.weight {
            params.push(w.clone());
        }
        if let Some(b) = &self.bias {
            params.push(b.clone());
        }
        params
    }

    fn named_params(&self) -> Vec<(String, Buffer)> {
        let mut named = Vec::new();
        if let Some(w) = &self.weight {
            named.push(("weight".to_string(), w.clone()));
        }
        if let Some(b) = &self.bias {
            named.push(("bias".to_string(), b.clone()));
        }
        named
    }

    fn set_param_gradients(&mut self, flags: &[bool]) {
        for (slot, &f) in self.grad_flags.iter_mut().zip(flags.iter()) {
            *slot = f;
        }
    }
}
