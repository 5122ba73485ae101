// MaxPool2d — Spatial max pooling over NCHW inputs
//
// Slides a window over each channel plane and keeps the maximum, producing
// [N, C, H_out, W_out] with the same floor-division geometry as Conv2d.
// Padding contributes nothing (out-of-bounds positions are skipped), and
// setup requires pad < kernel so every window sees at least one real
// element.
//
// The forward pass records the flat input index of each window's winner;
// backward routes the output gradient through exactly those indices. Ties
// go to the first position scanned, so repeated values route all gradient
// to one element rather than splitting it.

use civet_core::{Buffer, Error, Result};

use crate::conv::conv_out_dim;
use crate::layer::{check_input_arity, check_output_arity, Layer};

/// Configuration for a [`MaxPool2d`] layer.
#[derive(Debug, Clone)]
pub struct MaxPool2dConfig {
    /// Window size [kH, kW].
    pub kernel: [usize; 2],
    /// Stride [sH, sW]; defaults to the kernel (non-overlapping windows).
    pub stride: [usize; 2],
    /// Zero padding [pH, pW]; must stay below the kernel size.
    pub pad: [usize; 2],
}

impl MaxPool2dConfig {
    /// Square non-overlapping windows of the given size.
    pub fn new(kernel: usize) -> Self {
        MaxPool2dConfig {
            kernel: [kernel, kernel],
            stride: [kernel, kernel],
            pad: [0, 0],
        }
    }
}

/// Max pooling over [N, C, H, W] buffers with winner-index bookkeeping.
pub struct MaxPool2d {
    cfg: MaxPool2dConfig,
    out_dims: [usize; 2],
    /// Flat input index of the max per output element, filled by forward.
    mask: Vec<usize>,
}

impl MaxPool2d {
    pub fn new(cfg: MaxPool2dConfig) -> Self {
        MaxPool2d {
            cfg,
            out_dims: [0, 0],
            mask: Vec::new(),
        }
    }
}

impl Layer for MaxPool2d {
    fn kind(&self) -> &'static str {
        "MaxPool2d"
    }

    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        check_input_arity(self.kind(), inputs, 1)?;
        check_output_arity(self.kind(), outputs, 1)?;

        let in_shape = inputs[0].shape();
        if in_shape.rank() != 4 {
            return Err(Error::topology(format!(
                "MaxPool2d input must be [N, C, H, W], got {}",
                in_shape
            )));
        }
        if self.cfg.pad[0] >= self.cfg.kernel[0] || self.cfg.pad[1] >= self.cfg.kernel[1] {
            return Err(Error::topology(format!(
                "MaxPool2d pad {:?} must be smaller than kernel {:?}",
                self.cfg.pad, self.cfg.kernel
            )));
        }
        let d = in_shape.dims();
        let out_h = conv_out_dim(d[2], self.cfg.kernel[0], self.cfg.stride[0], self.cfg.pad[0])?;
        let out_w = conv_out_dim(d[3], self.cfg.kernel[1], self.cfg.stride[1], self.cfg.pad[1])?;
        self.out_dims = [out_h, out_w];
        self.mask.resize(d[0] * d[1] * out_h * out_w, 0);
        outputs[0].reshape((d[0], d[1], out_h, out_w));
        Ok(())
    }

    fn forward(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        let d = inputs[0].shape();
        let dims = d.dims();
        let (h, w) = (dims[2], dims[3]);
        let [out_h, out_w] = self.out_dims;
        let planes = dims[0] * dims[1];

        let x = inputs[0].data();
        let mut y = outputs[0].data_mut();

        for p in 0..planes {
            let plane = &x[p * h * w..(p + 1) * h * w];
            let out_base = p * out_h * out_w;
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut best = f32::NEG_INFINITY;
                    let mut best_idx = usize::MAX;
                    for ky in 0..self.cfg.kernel[0] {
                        let iy = (oy * self.cfg.stride[0] + ky) as isize - self.cfg.pad[0] as isize;
                        if iy < 0 || iy >= h as isize {
                            continue;
                        }
                        for kx in 0..self.cfg.kernel[1] {
                            let ix =
                                (ox * self.cfg.stride[1] + kx) as isize - self.cfg.pad[1] as isize;
                            if ix < 0 || ix >= w as isize {
                                continue;
                            }
                            let idx = iy as usize * w + ix as usize;
                            if plane[idx] > best {
                                best = plane[idx];
                                best_idx = p * h * w + idx;
                            }
                        }
                    }
                    debug_assert_ne!(best_idx, usize::MAX);
                    let o = out_base + oy * out_w + ox;
                    y[o] = best;
                    self.mask[o] = best_idx;
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
        let dy = outputs[0].grad();
        let mut dx = inputs[0].grad_mut();
        for (o, &idx) in self.mask.iter().enumerate() {
            dx[idx] += dy[o];
        }
        Ok(())
    }
}
