// Conv2d — 2D convolution over NCHW inputs
//
// Applies learnable filters to an input of shape [N, C_in, H, W],
// producing [N, C_out, H_out, W_out].
//
// PARAMETER SHAPES:
//
//   weight: [C_out, C_in, kH, kW]
//   bias:   [C_out]                 (optional)
//
// OUTPUT SIZE FORMULA:
//
//   H_out = floor((H + 2*pad_h - kernel_h) / stride_h) + 1
//   W_out = floor((W + 2*pad_w - kernel_w) / stride_w) + 1
//
// IMPLEMENTATION:
//
//   The classic im2col lowering: each input image is unrolled into a
//   [C_in*kH*kW, H_out*W_out] column matrix, turning the convolution into
//   one matrix product per image. Backward runs the same lowering in
//   reverse: filter gradients contract the output gradient against the
//   columns, and input gradients fold the transposed product back through
//   col2im, which adds overlapping window contributions.

use civet_core::{Buffer, Error, Filler, Result, Shape};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::layer::{check_input_arity, check_output_arity, Layer};

/// Configuration for a [`Conv2d`] layer.
#[derive(Debug, Clone)]
pub struct Conv2dConfig {
    /// Number of filters (C_out).
    pub out_channels: usize,
    /// Spatial kernel size [kH, kW].
    pub kernel: [usize; 2],
    /// Stride [sH, sW].
    pub stride: [usize; 2],
    /// Zero padding [pH, pW] added on both sides.
    pub pad: [usize; 2],
    /// Whether to add a learnable per-channel bias.
    pub bias: bool,
    /// Initialization for the filters.
    pub weight_filler: Filler,
    /// Initialization for the bias.
    pub bias_filler: Filler,
}

impl Conv2dConfig {
    /// Square kernel, stride 1, no padding, Xavier weights, zero bias.
    pub fn new(out_channels: usize, kernel: usize) -> Self {
        Conv2dConfig {
            out_channels,
            kernel: [kernel, kernel],
            stride: [1, 1],
            pad: [0, 0],
            bias: true,
            weight_filler: Filler::Xavier,
            bias_filler: Filler::Constant(0.0),
        }
    }
}

/// Input/output geometry, fixed by setup for the current input shape.
#[derive(Debug, Clone, Copy, Default)]
struct Geometry {
    batch: usize,
    in_c: usize,
    in_h: usize,
    in_w: usize,
    out_h: usize,
    out_w: usize,
}

/// 2D convolutional layer over [N, C, H, W] buffers.
pub struct Conv2d {
    cfg: Conv2dConfig,
    geom: Geometry,
    weight: Option<Buffer>,
    bias: Option<Buffer>,
    grad_flags: Vec<bool>,
    rng: StdRng,
    /// im2col scratch, reused across images and passes.
    col: Vec<f32>,
    dcol: Vec<f32>,
}

impl Conv2d {
    /// Create an unbuilt layer; parameters materialize at setup.
    pub fn new(cfg: Conv2dConfig) -> Self {
        Self::seeded(cfg, rand::random())
    }

    /// Create an unbuilt layer whose fillers draw from a fixed seed.
    pub fn seeded(cfg: Conv2dConfig, seed: u64) -> Self {
        Conv2d {
            cfg,
            geom: Geometry::default(),
            weight: None,
            bias: None,
            grad_flags: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            col: Vec::new(),
            dcol: Vec::new(),
        }
    }

    /// The filter buffer, if setup has run.
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
            .ok_or_else(|| Error::msg("Conv2d used before setup"))
    }

    /// Rows of the column matrix: C_in · kH · kW.
    fn col_rows(&self) -> usize {
        self.geom.in_c * self.cfg.kernel[0] * self.cfg.kernel[1]
    }

    /// Columns of the column matrix: H_out · W_out.
    fn col_cols(&self) -> usize {
        self.geom.out_h * self.geom.out_w
    }
}

/// Output extent of a strided window sweep: floor((in + 2·pad - k)/stride) + 1.
pub(crate) fn conv_out_dim(input: usize, kernel: usize, stride: usize, pad: usize) -> Result<usize> {
    let padded = input + 2 * pad;
    if padded < kernel {
        return Err(Error::topology(format!(
            "kernel {} does not fit input extent {} (padded {})",
            kernel, input, padded
        )));
    }
    Ok((padded - kernel) / stride + 1)
}

/// Unroll one [C, H, W] image into a [C·kH·kW, out_h·out_w] column matrix.
#[allow(clippy::too_many_arguments)]
fn im2col(
    img: &[f32],
    geom: &Geometry,
    kernel: [usize; 2],
    stride: [usize; 2],
    pad: [usize; 2],
    col: &mut [f32],
) {
    let (h, w) = (geom.in_h, geom.in_w);
    let (out_h, out_w) = (geom.out_h, geom.out_w);
    let spatial = out_h * out_w;
    let mut row = 0;
    for c in 0..geom.in_c {
        let plane = &img[c * h * w..(c + 1) * h * w];
        for ky in 0..kernel[0] {
            for kx in 0..kernel[1] {
                let dst = &mut col[row * spatial..(row + 1) * spatial];
                for oy in 0..out_h {
                    let iy = (oy * stride[0] + ky) as isize - pad[0] as isize;
                    for ox in 0..out_w {
                        let ix = (ox * stride[1] + kx) as isize - pad[1] as isize;
                        dst[oy * out_w + ox] =
                            if iy >= 0 && iy < h as isize && ix >= 0 && ix < w as isize {
                                plane[iy as usize * w + ix as usize]
                            } else {
                                0.0
                            };
                    }
                }
                row += 1;
            }
        }
    }
}

/// Fold a column-matrix gradient back onto one image gradient, adding
/// overlapping window contributions.
#[allow(clippy::too_many_arguments)]
fn col2im_add(
    col: &[f32],
    geom: &Geometry,
    kernel: [usize; 2],
    stride: [usize; 2],
    pad: [usize; 2],
    img_grad: &mut [f32],
) {
    let (h, w) = (geom.in_h, geom.in_w);
    let (out_h, out_w) = (geom.out_h, geom.out_w);
    let spatial = out_h * out_w;
    let mut row = 0;
    for c in 0..geom.in_c {
        let plane = &mut img_grad[c * h * w..(c + 1) * h * w];
        for ky in 0..kernel[0] {
            for kx in 0..kernel[1] {
                let src = &col[row * spatial..(row + 1) * spatial];
                for oy in 0..out_h {
                    let iy = (oy * stride[0] + ky) as isize - pad[0] as isize;
                    if iy < 0 || iy >= h as isize {
                        continue;
                    }
                    for ox in 0..out_w {
                        let ix = (ox * stride[1] + kx) as isize - pad[1] as isize;
                        if ix >= 0 && ix < w as isize {
                            plane[iy as usize * w + ix as usize] += src[oy * out_w + ox];
                        }
                    }
                }
                row += 1;
            }
        }
    }
}

impl Layer for Conv2d {
    fn kind(&self) -> &'static str {
        "Conv2d"
    }

    fn setup(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        check_input_arity(self.kind(), inputs, 1)?;
        check_output_arity(self.kind(), outputs, 1)?;

        let in_shape = inputs[0].shape();
        if in_shape.rank() != 4 {
            return Err(Error::topology(format!(
                "Conv2d input must be [N, C, H, W], got {}",
                in_shape
            )));
        }
        let d = in_shape.dims();
        let geom = Geometry {
            batch: d[0],
            in_c: d[1],
            in_h: d[2],
            in_w: d[3],
            out_h: conv_out_dim(d[2], self.cfg.kernel[0], self.cfg.stride[0], self.cfg.pad[0])?,
            out_w: conv_out_dim(d[3], self.cfg.kernel[1], self.cfg.stride[1], self.cfg.pad[1])?,
        };

        let weight_shape = Shape::from((
            self.cfg.out_channels,
            geom.in_c,
            self.cfg.kernel[0],
            self.cfg.kernel[1],
        ));
        match &self.weight {
            None => {
                let weight = Buffer::new("weight", weight_shape);
                self.cfg.weight_filler.fill(&weight, &mut self.rng)?;
                self.weight = Some(weight);
                if self.cfg.bias {
                    let bias = Buffer::new("bias", self.cfg.out_channels);
                    self.cfg.bias_filler.fill(&bias, &mut self.rng)?;
                    self.bias = Some(bias);
                }
                self.grad_flags = vec![true; if self.cfg.bias { 2 } else { 1 }];
            }
            Some(weight) => {
                // Spatial extents may change across setups, the channel
                // count may not: the stored filters fix C_in.
                if weight.shape() != weight_shape {
                    return Err(Error::ShapeMismatch {
                        expected: weight.shape(),
                        got: weight_shape,
                    });
                }
            }
        }

        self.geom = geom;
        self.col.resize(self.col_rows() * self.col_cols(), 0.0);
        self.dcol.resize(self.col_rows() * self.col_cols(), 0.0);
        outputs[0].reshape((geom.batch, self.cfg.out_channels, geom.out_h, geom.out_w));
        Ok(())
    }

    fn forward(&mut self, inputs: &[Buffer], outputs: &[Buffer]) -> Result<()> {
        let weight = self.weight_buf()?.clone();
        let geom = self.geom;
        let (rows, spatial) = (self.col_rows(), self.col_cols());
        let filters = self.cfg.out_channels;
        let img_len = geom.in_c * geom.in_h * geom.in_w;
        let out_len = filters * spatial;

        let x = inputs[0].data();
        let w = weight.data();
        let bias = self.bias.as_ref().map(|b| b.data_vec());
        let mut y = outputs[0].data_mut();

        for n in 0..geom.batch {
            im2col(
                &x[n * img_len..(n + 1) * img_len],
                &geom,
                self.cfg.kernel,
                self.cfg.stride,
                self.cfg.pad,
                &mut self.col,
            );
            let out = &mut y[n * out_len..(n + 1) * out_len];
            for f in 0..filters {
                let wrow = &w[f * rows..(f + 1) * rows];
                let base = bias.as_ref().map_or(0.0, |b| b[f]);
                let dst = &mut out[f * spatial..(f + 1) * spatial];
                dst.iter_mut().for_each(|v| *v = base);
                for (r, &wv) in wrow.iter().enumerate() {
                    if wv == 0.0 {
                        continue;
                    }
                    let crow = &self.col[r * spatial..(r + 1) * spatial];
                    for (dv, &cv) in dst.iter_mut().zip(crow.iter()) {
                        *dv += wv * cv;
                    }
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
        let weight = self.weight_buf()?.clone();
        let geom = self.geom;
        let (rows, spatial) = (self.col_rows(), self.col_cols());
        let filters = self.cfg.out_channels;
        let img_len = geom.in_c * geom.in_h * geom.in_w;
        let out_len = filters * spatial;

        let dy = outputs[0].grad();
        let x = inputs[0].data();

        for n in 0..geom.batch {
            let dout = &dy[n * out_len..(n + 1) * out_len];
            im2col(
                &x[n * img_len..(n + 1) * img_len],
                &geom,
                self.cfg.kernel,
                self.cfg.stride,
                self.cfg.pad,
                &mut self.col,
            );

            if self.grad_flags[0] {
                let mut dw = weight.grad_mut();
                for f in 0..filters {
                    let df = &dout[f * spatial..(f + 1) * spatial];
                    let dwrow = &mut dw[f * rows..(f + 1) * rows];
                    for (r, dwv) in dwrow.iter_mut().enumerate() {
                        let crow = &self.col[r * spatial..(r + 1) * spatial];
                        let mut acc = 0.0;
                        for (&g, &cv) in df.iter().zip(crow.iter()) {
                            acc += g * cv;
                        }
                        *dwv += acc;
                    }
                }
            }

            if let Some(bias) = &self.bias {
                if self.grad_flags[1] {
                    let mut db = bias.grad_mut();
                    for f in 0..filters {
                        db[f] += dout[f * spatial..(f + 1) * spatial].iter().sum::<f32>();
                    }
                }
            }

            if propagate_down[0] {
                let w = weight.data();
                self.dcol.iter_mut().for_each(|v| *v = 0.0);
                for f in 0..filters {
                    let df = &dout[f * spatial..(f + 1) * spatial];
                    let wrow = &w[f * rows..(f + 1) * rows];
                    for (r, &wv) in wrow.iter().enumerate() {
                        if wv == 0.0 {
                            continue;
                        }
                        let drow = &mut self.dcol[r * spatial..(r + 1) * spatial];
                        for (dv, &g) in drow.iter_mut().zip(df.iter()) {
                            *dv += wv * g;
                        }
                    }
                }
                let mut dx = inputs[0].grad_mut();
                col2im_add(
                    &self.dcol,
                    &geom,
                    self.cfg.kernel,
                    self.cfg.stride,
                    self.cfg.pad,
                    &mut dx[n * img_len..(n + 1) * img_len],
                );
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

#[cfg(test)]
mod tests {
    use super::*;

    fn built(cfg: Conv2dConfig, in_shape: impl Into<Shape>) -> (Conv2d, Buffer, Buffer) {
        let mut layer = Conv2d::seeded(cfg, 1);
        let x = Buffer::new("x", in_shape);
        let y = Buffer::new("y", ());
        layer
            .setup(std::slice::from_ref(&x), std::slice::from_ref(&y))
            .unwrap();
        (layer, x, y)
    }

    #[test]
    fn test_output_geometry() {
        let mut cfg = Conv2dConfig::new(11, 2);
        cfg.pad = [3, 3];
        let (layer, _x, y) = built(cfg, (5, 2, 6, 4));
        // (6 + 6 - 2)/1 + 1 = 11, (4 + 6 - 2)/1 + 1 = 9
        assert_eq!(y.shape(), Shape::from((5, 11, 11, 9)));
        assert_eq!(layer.weight().unwrap().shape(), Shape::from((11, 2, 2, 2)));
        assert_eq!(layer.bias().unwrap().shape(), Shape::from(11));
    }

    #[test]
    fn test_kernel_larger_than_input() {
        let mut layer = Conv2d::seeded(Conv2dConfig::new(1, 5), 1);
        let x = Buffer::new("x", (1, 1, 3, 3));
        let y = Buffer::new("y", ());
        let err = layer
            .setup(std::slice::from_ref(&x), std::slice::from_ref(&y))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTopology { .. }));
    }

    #[test]
    fn test_forward_identity_corner_filter() {
        let mut cfg = Conv2dConfig::new(1, 2);
        cfg.bias_filler = Filler::Constant(0.0);
        let (mut layer, x, y) = built(cfg, (1, 1, 3, 3));
        layer
            .weight()
            .unwrap()
            .set_data(&[1.0, 0.0, 0.0, 1.0])
            .unwrap();
        layer.bias().unwrap().zero_data();
        x.set_data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0])
            .unwrap();
        layer
            .forward(std::slice::from_ref(&x), std::slice::from_ref(&y))
            .unwrap();
        // Window top-left + bottom-right sums.
        assert_eq!(y.data_vec(), vec![6.0, 8.0, 12.0, 14.0]);
    }

    #[test]
    fn test_forward_with_padding() {
        let mut cfg = Conv2dConfig::new(1, 2);
        cfg.pad = [1, 1];
        let (mut layer, x, y) = built(cfg, (1, 1, 1, 1));
        layer
            .weight()
            .unwrap()
            .set_data(&[1.0, 2.0, 3.0, 4.0])
            .unwrap();
        layer.bias().unwrap().zero_data();
        x.set_data(&[5.0]).unwrap();
        layer
            .forward(std::slice::from_ref(&x), std::slice::from_ref(&y))
            .unwrap();
        // The single input value meets each kernel tap once.
        assert_eq!(y.shape(), Shape::from((1, 1, 2, 2)));
        assert_eq!(y.data_vec(), vec![20.0, 15.0, 10.0, 5.0]);
    }

    #[test]
    fn test_backward_grads() {
        let mut cfg = Conv2dConfig::new(1, 2);
        cfg.bias_filler = Filler::Constant(0.0);
        let (mut layer, x, y) = built(cfg, (1, 1, 3, 3));
        layer
            .weight()
            .unwrap()
            .set_data(&[1.0, 0.0, 0.0, 1.0])
            .unwrap();
        x.set_data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0])
            .unwrap();
        layer
            .forward(std::slice::from_ref(&x), std::slice::from_ref(&y))
            .unwrap();
        y.fill_grad(1.0);
        layer
            .backward(std::slice::from_ref(&y), &[true], std::slice::from_ref(&x))
            .unwrap();

        // dW[tap] = sum of the input values that tap touched.
        assert_eq!(
            layer.weight().unwrap().grad_vec(),
            vec![12.0, 16.0, 24.0, 28.0]
        );
        assert_eq!(layer.bias().unwrap().grad_vec(), vec![4.0]);
        // dx folds the filter back over each window.
        assert_eq!(
            x.grad_vec(),
            vec![1.0, 1.0, 0.0, 1.0, 2.0, 1.0, 0.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_resetup_new_spatial_extent_keeps_filters() {
        let (mut layer, _x, y) = built(Conv2dConfig::new(2, 2), (1, 3, 4, 4));
        let before = layer.weight().unwrap().data_vec();
        let bigger = Buffer::new("x2", (2, 3, 8, 8));
        layer
            .setup(std::slice::from_ref(&bigger), std::slice::from_ref(&y))
            .unwrap();
        assert_eq!(y.shape(), Shape::from((2, 2, 7, 7)));
        assert_eq!(layer.weight().unwrap().data_vec(), before);
    }

    #[test]
    fn test_resetup_rejects_channel_change() {
        let (mut layer, _x, y) = built(Conv2dConfig::new(2, 2), (1, 3, 4, 4));
        let different = Buffer::new("x2", (1, 4, 4, 4));
        let err = layer
            .setup(std::slice::from_ref(&different), std::slice::from_ref(&y))
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }
}
