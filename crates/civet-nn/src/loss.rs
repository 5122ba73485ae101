// Loss Layers
//
// Loss layers sit at the bottom of a graph and reduce their inputs to a
// single scalar. The engine seeds the scalar's gradient slot with the
// layer's loss weight before backward runs, so both layers here scale
// every input gradient by `outputs[0].grad()[0]`. That keeps weighted
// and multi-loss nets working without any special casing in the layers.
//
// 1. CrossEntropy: softmax over class scores fused with the negative
//    log-likelihood of integer labels. The fused form has the famously
//    simple gradient (p - onehot)/batch and avoids log(softmax) blowup.
//
// 2. MseLoss: mean((a - b)²) over every element. Regression targets,
//    or matching two arbitrary activations against each other.

use civet_core::{bail, Buffer, Error, Result, Shape};

use crate::layer::{check_input_arity, check_output_arity, Layer};

/// Softmax + negative log-likelihood over integer class labels.
///
/// Inputs: `[scores, labels]` where scores are `[batch, classes]` and
/// labels hold one class index per batch row (stored as f32). Output is
/// a scalar loss averaged over the batch.
pub struct CrossEntropy {
    // Softmax of the scores, kept from forward for the backward pass.
    probs: Vec<f32>,
    batch: usize,
    classes: usize,
}

impl CrossEntropy {
    pub fn new() -> Self {
        CrossEntropy {
            probs: Vec::new(),
            batch: 0,
            classes: 0,
        }
    }
}

impl Default for CrossEntropy {
    fn default() -> Self {
        CrossEntropy::new()
    }
}

impl Layer for CrossEntropy {
    fn kind(&self) -> &'static str {
        "CrossEntropy"
    }

    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        check_input_arity(self.kind(), inputs, 2)?;
        check_output_arity(self.kind(), outputs, 1)?;
        let scores = inputs[0].shape();
        if scores.rank() != 2 {
            return Err(Error::topology(format!(
                "CrossEntropy expects [batch, classes] scores, got {}",
                scores
            )));
        }
        self.batch = scores.dims()[0];
        self.classes = scores.dims()[1];
        if inputs[1].elem_count() != self.batch {
            return Err(Error::topology(format!(
                "CrossEntropy expects one label per row: {} scores rows, {} labels",
                self.batch,
                inputs[1].elem_count()
            )));
        }
        self.probs.resize(self.batch * self.classes, 0.0);
        outputs[0].reshape(Shape::scalar());
        Ok(())
    }

    fn forward(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        let scores = inputs[0].data();
        let labels = inputs[1].data();
        let mut loss = 0.0f32;
        for n in 0..self.batch {
            let row = &scores[n * self.classes..(n + 1) * self.classes];
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for c in 0..self.classes {
                let e = (row[c] - max).exp();
                self.probs[n * self.classes + c] = e;
                sum += e;
            }
            for c in 0..self.classes {
                self.probs[n * self.classes + c] /= sum;
            }
            let label = labels[n] as usize;
            if label >= self.classes {
                bail!(
                    "CrossEntropy: label {} out of range for {} classes",
                    label,
                    self.classes
                );
            }
            let p = self.probs[n * self.classes + label].max(f32::MIN_POSITIVE);
            loss -= p.ln();
        }
        outputs[0].data_mut()[0] = loss / self.batch as f32;
        Ok(())
    }

    fn backward(
        &mut self,
        outputs: &[Buffer],
        propagate_down: &[bool],
        inputs: &[Buffer],
    ) -> Result<()> {
        if propagate_down[1] {
            bail!("CrossEntropy cannot backpropagate to label inputs");
        }
        if !propagate_down[0] {
            return Ok(());
        }
        let seed = outputs[0].grad()[0];
        let scale = seed / self.batch as f32;
        let labels = inputs[1].data();
        let mut dx = inputs[0].grad_mut();
        for n in 0..self.batch {
            let label = labels[n] as usize;
            for c in 0..self.classes {
                let p = self.probs[n * self.classes + c];
                let target = if c == label { 1.0 } else { 0.0 };
                dx[n * self.classes + c] += (p - target) * scale;
            }
        }
        Ok(())
    }

    fn allow_force_backward(&self, input_index: usize) -> bool {
        // Labels are not differentiable even under force_backward.
        input_index != 1
    }
}

/// Mean squared error: mean((a - b)²) over every element.
///
/// Both inputs must share a shape. Output is a scalar. Gradients flow to
/// either input when requested, with opposite signs.
pub struct MseLoss;

impl Layer for MseLoss {
    fn kind(&self) -> &'static str {
        "MseLoss"
    }

    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        check_input_arity(self.kind(), inputs, 2)?;
        check_output_arity(self.kind(), outputs, 1)?;
        let a = inputs[0].shape();
        let b = inputs[1].shape();
        if a != b {
            return Err(Error::ShapeMismatch {
                expected: a,
                got: b,
            });
        }
        outputs[0].reshape(Shape::scalar());
        Ok(())
    }

    fn forward(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        let a = inputs[0].data();
        let b = inputs[1].data();
        let count = a.len() as f32;
        let mut sum = 0.0f32;
        for (&av, &bv) in a.iter().zip(b.iter()) {
            let d = av - bv;
            sum += d * d;
        }
        outputs[0].data_mut()[0] = sum / count;
        Ok(())
    }

    fn backward(
        &mut self,
        outputs: &[Buffer],
        propagate_down: &[bool],
        inputs: &[Buffer],
    ) -> Result<()> {
        let seed = outputs[0].grad()[0];
        let a = inputs[0].data();
        let b = inputs[1].data();
        let scale = 2.0 * seed / a.len() as f32;
        if propagate_down[0] {
            let mut da = inputs[0].grad_mut();
            for i in 0..a.len() {
                da[i] += (a[i] - b[i]) * scale;
            }
        }
        if propagate_down[1] {
            let mut db = inputs[1].grad_mut();
            for i in 0..b.len() {
                db[i] -= (a[i] - b[i]) * scale;
            }
        }
        Ok(())
    }
}
