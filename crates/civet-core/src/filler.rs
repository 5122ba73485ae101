use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::shape::Shape;

// Filler — Value initialization for parameters and data sources
//
// A Filler writes an initial value pattern into a buffer's data array:
// constants for biases, uniform or gaussian noise for weights and synthetic
// inputs, and Xavier scaling for depth-friendly weight magnitudes.
//
// Fillers take the RNG explicitly so a graph built from a fixed seed is
// reproducible end to end. Constant fills ignore the RNG.

/// How to initialize a buffer's values.
#[derive(Debug, Clone, PartialEq)]
pub enum Filler {
    /// Every element set to the given value.
    Constant(f32),
    /// Independent draws from U(lo, hi).
    Uniform { lo: f32, hi: f32 },
    /// Independent draws from N(mean, std).
    Gaussian { mean: f32, std: f32 },
    /// Uniform draws from ±sqrt(3 / fan_in), scaled to the buffer's shape.
    Xavier,
}

impl Filler {
    /// Write this filler's pattern into the buffer's data array.
    pub fn fill(&self, buffer: &Buffer, rng: &mut StdRng) -> Result<()> {
        match *self {
            Filler::Constant(v) => {
                buffer.fill_data(v);
            }
            Filler::Uniform { lo, hi } => {
                if lo >= hi {
                    return Err(Error::msg(format!(
                        "uniform filler needs lo < hi, got [{}, {})",
                        lo, hi
                    )));
                }
                for x in buffer.data_mut().iter_mut() {
                    *x = rng.gen_range(lo..hi);
                }
            }
            Filler::Gaussian { mean, std } => {
                for x in buffer.data_mut().iter_mut() {
                    let z: f32 = rng.sample(StandardNormal);
                    *x = mean + std * z;
                }
            }
            Filler::Xavier => {
                let (fan_in, _) = compute_fans(&buffer.shape());
                let bound = (3.0 / fan_in).sqrt() as f32;
                for x in buffer.data_mut().iter_mut() {
                    *x = rng.gen_range(-bound..bound);
                }
            }
        }
        Ok(())
    }

    /// Whether this filler always produces the same values.
    ///
    /// Data-source layers fill deterministic outputs once at setup and
    /// refill stochastic ones on every forward pass.
    pub fn is_deterministic(&self) -> bool {
        matches!(self, Filler::Constant(_))
    }
}

/// Compute (fan_in, fan_out) from a parameter shape.
///
/// - 0-D: both 1
/// - 1-D: fan_in = fan_out = dims[0]
/// - 2-D: fan_in = dims[1], fan_out = dims[0]
/// - 3-D+: fan_in = dims[1] * product(dims[2..]),
///   fan_out = dims[0] * product(dims[2..])
///   (convolution-style: dims[0]=out_channels, dims[1]=in_channels, rest=kernel)
pub fn compute_fans(shape: &Shape) -> (f64, f64) {
    let dims = shape.dims();
    match dims.len() {
        0 => (1.0, 1.0),
        1 => (dims[0] as f64, dims[0] as f64),
        2 => (dims[1] as f64, dims[0] as f64),
        _ => {
            let receptive_field: usize = dims[2..].iter().product();
            let fan_in = dims[1] as f64 * receptive_field as f64;
            let fan_out = dims[0] as f64 * receptive_field as f64;
            (fan_in, fan_out)
        }
    }
}
