// Softmax — Normalized exponentials along one axis
//
// Treats the input as outer × channels × inner slices (channels = the
// softmax axis, axis 1 by default, matching NCHW class scores) and maps
// each channel slice to a probability distribution:
//
//   y_c = exp(x_c - max_c x_c) / Σ_j exp(x_j - max_j x_j)
//
// The max subtraction keeps exp() in range for large scores. Output shape
// equals input shape, and in-place wiring is supported: forward copies
// the input into the output first (a no-op when aliased) and then
// normalizes in place, and backward only needs the output values.

use civet_core::{Buffer, Error, Result};

use crate::layer::{check_input_arity, check_output_arity, Layer};

/// Softmax over a fixed axis of the input shape.
pub struct Softmax {
    axis: usize,
}

impl Softmax {
    /// Softmax along `axis` (1 for channel-major score layouts).
    pub fn new(axis: usize) -> Self {
        Softmax { axis }
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Softmax::new(1)
    }
}

impl Layer for Softmax {
    fn kind(&self) -> &'static str {
        "Softmax"
    }

    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        check_input_arity(self.kind(), inputs, 1)?;
        check_output_arity(self.kind(), outputs, 1)?;
        let shape = inputs[0].shape();
        if self.axis >= shape.rank() {
            return Err(Error::topology(format!(
                "Softmax axis {} out of range for input shape {}",
                self.axis, shape
            )));
        }
        outputs[0].reshape(shape);
        Ok(())
    }

    fn forward(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        let shape = inputs[0].shape();
        let channels = shape.dims()[self.axis];
        let outer = shape.outer_count(self.axis);
        let inner = shape.inner_count(self.axis);

        if !Buffer::ptr_eq(&inputs[0], &outputs[0]) {
            let x = inputs[0].data();
            outputs[0].data_mut().copy_from_slice(&x);
        }
        let mut y = outputs[0].data_mut();

        for o in 0..outer {
            for i in 0..inner {
                let at = |c: usize| (o * channels + c) * inner + i;
                let mut max = f32::NEG_INFINITY;
                for c in 0..channels {
                    max = max.max(y[at(c)]);
                }
                let mut sum = 0.0;
                for c in 0..channels {
                    let e = (y[at(c)] - max).exp();
                    y[at(c)] = e;
                    sum += e;
                }
                for c in 0..channels {
                    y[at(c)] /= sum;
                }
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
        if !propagate_down[0] {
            return Ok(());
        }
        let shape = outputs[0].shape();
        let channels = shape.dims()[self.axis];
        let outer = shape.outer_count(self.axis);
        let inner = shape.inner_count(self.axis);
        let aliased = Buffer::ptr_eq(&inputs[0], &outputs[0]);

        let y = outputs[0].data();
        if aliased {
            let mut g = outputs[0].grad_mut();
            for o in 0..outer {
                for i in 0..inner {
                    let at = |c: usize| (o * channels + c) * inner + i;
                    let mut dot = 0.0;
                    for c in 0..channels {
                        dot += g[at(c)] * y[at(c)];
                    }
                    for c in 0..channels {
                        g[at(c)] = y[at(c)] * (g[at(c)] - dot);
                    }
                }
            }
        } else {
            let dy = outputs[0].grad();
            let mut dx = inputs[0].grad_mut();
            for o in 0..outer {
                for i in 0..inner {
                    let at = |c: usize| (o * channels + c) * inner + i;
                    let mut dot = 0.0;
                    for c in 0..channels {
                        dot += dy[at(c)] * y[at(c)];
                    }
                    for c in 0..channels {
                        dx[at(c)] += y[at(c)] * (dy[at(c)] - dot);
                    }
                }
            }
        }
        Ok(())
    }
}
