// Activations — Elementwise nonlinearities
//
// Relu, Sigmoid, and Tanh transform each element independently, so the
// output shape always equals the input shape.
//
// IN-PLACE WIRING:
//
//   These layers may be wired with output == input (the same buffer), the
//   usual way to avoid an extra activation buffer per nonlinearity. The
//   alias changes backward semantics: a distinct output means this layer
//   is one of possibly several consumers and must ADD its gradient term,
//   while an aliased chain has exactly one consumer, so the layer rewrites
//   the shared grad array (grad = grad · local derivative) instead.
//
//   Derivatives are taken from what survives the forward pass: Relu masks
//   on the (possibly overwritten) input values, Sigmoid and Tanh use the
//   output values, which aliasing preserves by construction.

use civet_core::{Buffer, Result};

use crate::layer::{check_input_arity, check_output_arity, Layer};

fn elementwise_forward(input: &Buffer, output: &Buffer, f: impl Fn(f32) -> f32) {
    if Buffer::ptr_eq(input, output) {
        for v in output.data_mut().iter_mut() {
            *v = f(*v);
        }
    } else {
        let x = input.data();
        let mut y = output.data_mut();
        for (yv, &xv) in y.iter_mut().zip(x.iter()) {
            *yv = f(xv);
        }
    }
}

/// Chain the output gradient through a local derivative `local(x, y)`.
///
/// Aliased wiring rewrites the shared grad; distinct buffers accumulate.
fn elementwise_backward(output: &Buffer, input: &Buffer, local: impl Fn(f32, f32) -> f32) {
    if Buffer::ptr_eq(input, output) {
        let data = output.data();
        let mut grad = output.grad_mut();
        for (g, &v) in grad.iter_mut().zip(data.iter()) {
            *g *= local(v, v);
        }
    } else {
        let y = output.data();
        let dy = output.grad();
        let x = input.data();
        let mut dx = input.grad_mut();
        for i in 0..dx.len() {
            dx[i] += dy[i] * local(x[i], y[i]);
        }
    }
}

fn elementwise_setup(kind: &str, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
    check_input_arity(kind, inputs, 1)?;
    check_output_arity(kind, outputs, 1)?;
    // No-op for in-place wiring (same buffer, same shape).
    outputs[0].reshape(inputs[0].shape());
    Ok(())
}

/// Rectified linear unit: y = max(0, x), optionally leaky below zero.
pub struct Relu {
    negative_slope: f32,
}

impl Relu {
    /// Standard Relu (slope 0) or the leaky variant (e.g. slope 0.01).
    pub fn new(negative_slope: f32) -> Self {
        Relu { negative_slope }
    }
}

impl Default for Relu {
    fn default() -> Self {
        Relu::new(0.0)
    }
}

impl Layer for Relu {
    fn kind(&self) -> &'static str {
        "Relu"
    }

    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        elementwise_setup(self.kind(), inputs, outputs)
    }

    fn forward(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        let slope = self.negative_slope;
        elementwise_forward(&inputs[0], &outputs[0], |x| {
            if x > 0.0 {
                x
            } else {
                slope * x
            }
        });
        Ok(())
    }

    fn backward(
        &mut self,
        outputs: &[Buffer],
        propagate_down: &[bool],
        inputs: &[Buffer],
    ) -> Result<()> {
        if propagate_down[0] {
            let slope = self.negative_slope;
            elementwise_backward(&outputs[0], &inputs[0], |x, _| {
                if x > 0.0 {
                    1.0
                } else {
                    slope
                }
            });
        }
        Ok(())
    }
}

/// Logistic sigmoid: y = 1 / (1 + e^-x).
#[derive(Default)]
pub struct Sigmoid;

impl Layer for Sigmoid {
    fn kind(&self) -> &'static str {
        "Sigmoid"
    }

    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        elementwise_setup(self.kind(), inputs, outputs)
    }

    fn forward(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        elementwise_forward(&inputs[0], &outputs[0], |x| 1.0 / (1.0 + (-x).exp()));
        Ok(())
    }

    fn backward(
        &mut self,
        outputs: &[Buffer],
        propagate_down: &[bool],
        inputs: &[Buffer],
    ) -> Result<()> {
        if propagate_down[0] {
            // d/dx sigmoid = y(1 - y)
            elementwise_backward(&outputs[0], &inputs[0], |_, y| y * (1.0 - y));
        }
        Ok(())
    }
}

/// Hyperbolic tangent: y = tanh(x).
#[derive(Default)]
pub struct Tanh;

impl Layer for Tanh {
    fn kind(&self) -> &'static str {
        "Tanh"
    }

    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        elementwise_setup(self.kind(), inputs, outputs)
    }

    fn forward(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        elementwise_forward(&inputs[0], &outputs[0], |x| x.tanh());
        Ok(())
    }

    fn backward(
        &mut self,
        outputs: &[Buffer],
        propagate_down: &[bool],
        inputs: &[Buffer],
    ) -> Result<()> {
        if propagate_down[0] {
            // d/dx tanh = 1 - y²
            elementwise_backward(&outputs[0], &inputs[0], |_, y| 1.0 - y * y);
        }
        Ok(())
    }
}
