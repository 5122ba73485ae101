// Layer trait — The interface every graph node implements
//
// A Layer is one computational node in a network graph. It reads value
// arrays from its input buffers, writes value arrays into its output
// buffers, and on the way back turns output gradients into input and
// parameter gradients.
//
// CALLING CONVENTION:
//
//   setup(inputs, outputs)    — validate arity and shapes for this layer
//                               type, reshape the output buffers, create
//                               parameter buffers on the first call.
//                               Re-runnable: later calls re-derive shapes
//                               but never re-initialize parameter values.
//   forward(inputs, outputs)  — pure function of input data and parameter
//                               data. Never reads gradient arrays.
//   backward(outputs, propagate_down, inputs)
//                             — reads output grads plus forward values and
//                               ADDS into input grads and parameter grads.
//
// WHY ACCUMULATE INSTEAD OF OVERWRITE?
//
//   A buffer may feed several downstream layers. Each consumer contributes
//   one additive term of the total gradient (the multivariate chain rule),
//   so backward must add. The engine decides when gradients get cleared;
//   layers never zero anything they did not write.
//
// IN-PLACE LAYERS:
//
//   Elementwise layers may be wired with output == input (same buffer).
//   Such a layer must detect the alias via Buffer::ptr_eq and rewrite the
//   shared grad array in place of accumulating, because the aliased chain
//   has exactly one consumer.

use civet_core::{Buffer, Error, Result};

/// One computational node in a layer graph.
///
/// Implementations are plain structs constructed from their typed
/// configuration; the graph builder boxes them once at build time and
/// drives them by index afterwards.
pub trait Layer {
    /// The layer's type tag (e.g. `"Linear"`, `"Relu"`).
    fn kind(&self) -> &'static str;

    /// Validate input arity/shapes and reshape the output buffers.
    ///
    /// Called once at build time and again on every graph reshape. Creates
    /// parameter buffers on the first call; later calls must preserve
    /// parameter values and fail with `ShapeMismatch` if the new input
    /// shapes are incompatible with the existing parameters.
    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()>;

    /// Compute output values from input and parameter values.
    fn forward(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()>;

    /// Accumulate gradients.
    ///
    /// For each input position `i` with `propagate_down[i]` true, add that
    /// input's gradient term into its grad array. Parameter gradients are
    /// accumulated unless disabled via `set_param_gradients`. A layer may
    /// skip work for inputs whose flag is false but must leave their grad
    /// arrays untouched.
    fn backward(
        &mut self,
        outputs: &[Buffer],
        propagate_down: &[bool],
        inputs: &[Buffer],
    ) -> Result<()>;

    /// Parameter buffer handles, in a fixed order (empty by default).
    fn params(&self) -> Vec<Buffer> {
        Vec::new()
    }

    /// Parameter handles with human-readable names (`"weight"`, `"bias"`).
    ///
    /// The default uses positional indices (`param_0`, `param_1`, …).
    fn named_params(&self) -> Vec<(String, Buffer)> {
        self.params()
            .into_iter()
            .enumerate()
            .map(|(i, p)| (format!("param_{i}"), p))
            .collect()
    }

    /// Enable or disable gradient accumulation per parameter position.
    ///
    /// The builder calls this with one flag per parameter; a false flag
    /// (from a zero learning-rate multiplier) tells the layer to skip that
    /// parameter's gradient in `backward`. Default: no parameters, no-op.
    fn set_param_gradients(&mut self, _flags: &[bool]) {}

    /// Whether a global force-backward request may enable gradient
    /// propagation into input `input_index`.
    ///
    /// Loss layers return false for label/target inputs that have no
    /// meaningful gradient. Default: true for every input.
    fn allow_force_backward(&self, _input_index: usize) -> bool {
        true
    }

    /// Total number of scalar parameter elements.
    fn param_count(&self) -> usize {
        self.params().iter().map(|p| p.elem_count()).sum()
    }
}

/// Check that a layer received the expected number of input buffers.
pub fn check_input_arity(kind: &str, inputs: &[Buffer], expected: usize) -> Result<()> {
    if inputs.len() != expected {
        return Err(Error::InvalidTopology {
            reason: format!(
                "{} expects {} input(s), got {}",
                kind,
                expected,
                inputs.len()
            ),
        });
    }
    Ok(())
}

/// Check that a layer received the expected number of output buffers.
pub fn check_output_arity(kind: &str, outputs: &[Buffer], expected: usize) -> Result<()> {
    if outputs.len() != expected {
        return Err(Error::InvalidTopology {
            reason: format!(
                "{} expects {} output(s), got {}",
                kind,
                expected,
                outputs.len()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl Layer for Passthrough {
        fn kind(&self) -> &'static str {
            "Passthrough"
        }

        fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
            check_input_arity(self.kind(), inputs, 1)?;
            check_output_arity(self.kind(), outputs, 1)?;
            outputs[0].reshape(inputs[0].shape());
            Ok(())
        }

        fn forward(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
            let v = inputs[0].data_vec();
            outputs[0].set_data(&v)
        }

        fn backward(
            &mut self,
            outputs: &[Buffer],
            propagate_down: &[bool],
            inputs: &[Buffer],
        ) -> Result<()> {
            if propagate_down[0] {
                let out_grad = outputs[0].grad();
                let mut in_grad = inputs[0].grad_mut();
                for (g, &og) in in_grad.iter_mut().zip(out_grad.iter()) {
                    *g += og;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_default_trait_methods() {
        let layer = Passthrough;
        assert!(layer.params().is_empty());
        assert!(layer.named_params().is_empty());
        assert_eq!(layer.param_count(), 0);
        assert!(layer.allow_force_backward(0));
    }

    #[test]
    fn test_arity_checks() {
        let x = Buffer::new("x", 3);
        assert!(check_input_arity("T", std::slice::from_ref(&x), 1).is_ok());
        let err = check_input_arity("T", std::slice::from_ref(&x), 2).unwrap_err();
        assert!(matches!(err, Error::InvalidTopology { .. }));
    }

    #[test]
    fn test_backward_accumulates() {
        let mut layer = Passthrough;
        let x = Buffer::new("x", 3);
        let y = Buffer::new("y", 3);
        layer
            .setup(std::slice::from_ref(&x), std::slice::from_ref(&y))
            .unwrap();
        y.set_grad(&[1.0, 2.0, 3.0]).unwrap();
        for _ in 0..2 {
            layer
                .backward(std::slice::from_ref(&y), &[true], std::slice::from_ref(&x))
                .unwrap();
        }
        // Two passes, each adding the same term.
        assert_eq!(x.grad_vec(), vec![2.0, 4.0, 6.0]);
    }
}
