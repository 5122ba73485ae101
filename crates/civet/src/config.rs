// Net configuration — The declarative description a Net is built from
//
// A NetConfig is plain data: a name, a few net-wide switches, and an
// ordered list of layer definitions. Order matters; it is the execution
// order, and every buffer a layer reads must have been produced by an
// earlier layer in the list.
//
// Configs come from three places and all converge here:
//   1. the topology text format (see `topo`),
//   2. JSON via serde (`from_json` / `to_json`),
//   3. Rust code building the structs directly.
//
// The JSON encoding tags each layer with a `"type"` field, so a Linear
// layer reads as `{"name":"fc1","type":"Linear","out_features":10,...}`.

use civet_core::{Error, Filler, Result};
use serde::{Deserialize, Serialize};

/// When gradient slots are cleared, relative to backward passes.
///
/// Backward always adds into gradient arrays; this policy only decides
/// who zeroes them between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradPolicy {
    /// Never clear automatically. Callers invoke `zero_grads` between
    /// steps; repeated backwards sum their contributions.
    #[default]
    Accumulate,
    /// Clear and re-seed every gradient slot at the start of each full
    /// `backward` call.
    ZeroFirst,
}

/// Weight initialization strategy in config form.
///
/// Mirrors [`Filler`](civet_core::Filler), with serde attached so configs
/// round-trip through JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FillerDef {
    /// Every element set to `value`.
    Constant { value: f32 },
    /// Uniform over `[lo, hi)`.
    Uniform { lo: f32, hi: f32 },
    /// Normal with the given mean and standard deviation.
    Gaussian { mean: f32, std: f32 },
    /// Fan-in scaled uniform.
    Xavier,
}

impl FillerDef {
    /// Convert to the runtime filler.
    pub fn to_filler(&self) -> Filler {
        match *self {
            FillerDef::Constant { value } => Filler::Constant(value),
            FillerDef::Uniform { lo, hi } => Filler::Uniform { lo, hi },
            FillerDef::Gaussian { mean, std } => Filler::Gaussian { mean, std },
            FillerDef::Xavier => Filler::Xavier,
        }
    }
}

/// Shape and filler for one synthetic source of a `Data` layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDef {
    pub shape: Vec<usize>,
    pub filler: FillerDef,
}

/// Per-parameter training multipliers.
///
/// `lr_mult: 0.0` freezes the parameter: the layer skips its gradient
/// entirely. `decay_mult` scales weight decay and is carried for
/// optimizers to read; the engine itself does not apply it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(default = "default_mult")]
    pub lr_mult: f32,
    #[serde(default = "default_mult")]
    pub decay_mult: f32,
}

impl Default for ParamSpec {
    fn default() -> Self {
        ParamSpec {
            lr_mult: 1.0,
            decay_mult: 1.0,
        }
    }
}

/// Layer type plus its type-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerKind {
    /// Declares externally-fed buffers. One shape per output; callers
    /// write data into the buffers before running forward.
    Input { shapes: Vec<Vec<usize>> },
    /// Produces synthetic data from fillers, one source spec per
    /// output. (The field is not called `outputs` because that name
    /// belongs to the buffer list every layer carries.)
    Data { sources: Vec<SourceDef> },
    /// Fully connected transform with optional bias.
    Linear {
        out_features: usize,
        #[serde(default = "default_true")]
        bias: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight_filler: Option<FillerDef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bias_filler: Option<FillerDef>,
    },
    /// 2-D convolution over NCHW input. Square kernel, stride, and pad.
    Conv2d {
        out_channels: usize,
        kernel: usize,
        #[serde(default = "default_one")]
        stride: usize,
        #[serde(default)]
        pad: usize,
        #[serde(default = "default_true")]
        bias: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight_filler: Option<FillerDef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bias_filler: Option<FillerDef>,
    },
    /// 2-D max pooling. Stride defaults to the kernel size.
    MaxPool2d {
        kernel: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stride: Option<usize>,
        #[serde(default)]
        pad: usize,
    },
    /// Rectifier, optionally leaky.
    Relu {
        #[serde(default)]
        negative_slope: f32,
    },
    Sigmoid,
    Tanh,
    /// Normalized exponentials along an axis (default 1).
    Softmax {
        #[serde(default = "default_one")]
        axis: usize,
    },
    /// Softmax + negative log-likelihood over integer labels.
    CrossEntropy,
    /// Mean squared error between two equally-shaped inputs.
    MseLoss,
}

impl LayerKind {
    /// The type tag as it appears in configs.
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Input { .. } => "Input",
            LayerKind::Data { .. } => "Data",
            LayerKind::Linear { .. } => "Linear",
            LayerKind::Conv2d { .. } => "Conv2d",
            LayerKind::MaxPool2d { .. } => "MaxPool2d",
            LayerKind::Relu { .. } => "Relu",
            LayerKind::Sigmoid => "Sigmoid",
            LayerKind::Tanh => "Tanh",
            LayerKind::Softmax { .. } => "Softmax",
            LayerKind::CrossEntropy => "CrossEntropy",
            LayerKind::MseLoss => "MseLoss",
        }
    }

    /// Whether this kind produces a loss by default (loss weight 1
    /// unless the definition overrides it).
    pub fn is_loss(&self) -> bool {
        matches!(self, LayerKind::CrossEntropy | LayerKind::MseLoss)
    }
}

/// One layer in a net definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDef {
    /// Unique layer name within the net.
    pub name: String,
    /// Type tag and settings, flattened into the same JSON object.
    #[serde(flatten)]
    pub kind: LayerKind,
    /// Names of the buffers this layer reads, in layer input order.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Names of the buffers this layer writes. Reusing one of this
    /// layer's own input names runs the layer in place.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Multipliers for this layer's parameters, in parameter order.
    /// Missing entries default to `lr_mult: 1, decay_mult: 1`.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Weight of this layer's first output in the net loss. Defaults to
    /// 1 for loss kinds and 0 for everything else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_weight: Option<f32>,
}

impl LayerDef {
    /// Definition with no inputs, outputs, or param overrides.
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        LayerDef {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Vec::new(),
            loss_weight: None,
        }
    }

    /// Append an input buffer name.
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    /// Append an output buffer name.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Append a param spec.
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Set the loss weight.
    pub fn with_loss_weight(mut self, w: f32) -> Self {
        self.loss_weight = Some(w);
        self
    }

    /// The resolved loss weight of this layer's outputs.
    pub fn resolved_loss_weight(&self) -> f32 {
        self.loss_weight
            .unwrap_or(if self.kind.is_loss() { 1.0 } else { 0.0 })
    }
}

/// A complete net definition: net-wide switches plus layers in
/// execution order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetConfig {
    #[serde(default)]
    pub name: String,
    /// Compute gradients for every differentiable path, not just the
    /// paths that reach learnable parameters.
    #[serde(default)]
    pub force_backward: bool,
    /// Seed for all stochastic fillers. Unseeded nets draw from entropy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default)]
    pub grad_policy: GradPolicy,
    #[serde(default)]
    pub layers: Vec<LayerDef>,
}

impl NetConfig {
    /// Empty config with a name.
    pub fn new(name: impl Into<String>) -> Self {
        NetConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a layer definition.
    pub fn layer(mut self, def: LayerDef) -> Self {
        self.layers.push(def);
        self
    }

    /// Parse a config from its JSON encoding.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::msg(format!("net config JSON: {e}")))
    }

    /// Encode the config as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::msg(format!("net config JSON: {e}")))
    }

    /// Parse a config from the topology text format.
    pub fn from_text(src: &str) -> Result<Self> {
        crate::topo::parse(src)
    }
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_mult() -> f32 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let cfg = NetConfig::new("tiny")
            .layer(
                LayerDef::new(
                    "data",
                    LayerKind::Data {
                        sources: vec![SourceDef {
                            shape: vec![2, 3],
                            filler: FillerDef::Gaussian {
                                mean: 0.0,
                                std: 1.0,
                            },
                        }],
                    },
                )
                .output("x"),
            )
            .layer(
                LayerDef::new(
                    "fc1",
                    LayerKind::Linear {
                        out_features: 4,
                        bias: true,
                        weight_filler: Some(FillerDef::Xavier),
                        bias_filler: None,
                    },
                )
                .input("x")
                .output("h")
                .param(ParamSpec {
                    lr_mult: 1.0,
                    decay_mult: 1.0,
                }),
            );
        let json = cfg.to_json().unwrap();
        let back = NetConfig::from_json(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_json_type_tag() {
        let json = r#"{
            "name": "t",
            "layers": [
                {"name": "fc", "type": "Linear", "out_features": 8,
                 "inputs": ["x"], "outputs": ["y"]}
            ]
        }"#;
        let cfg = NetConfig::from_json(json).unwrap();
        assert_eq!(cfg.layers.len(), 1);
        match &cfg.layers[0].kind {
            LayerKind::Linear {
                out_features, bias, ..
            } => {
                assert_eq!(*out_features, 8);
                // Defaults applied for absent fields.
                assert!(*bias);
            }
            other => panic!("wrong kind: {}", other.name()),
        }
    }

    #[test]
    fn test_json_rejects_unknown_type() {
        let json = r#"{"layers": [{"name": "x", "type": "Warp"}]}"#;
        assert!(NetConfig::from_json(json).is_err());
    }

    #[test]
    fn test_grad_policy_encoding() {
        let cfg = NetConfig {
            grad_policy: GradPolicy::ZeroFirst,
            ..Default::default()
        };
        let json = cfg.to_json().unwrap();
        assert!(json.contains("zero_first"));
        assert_eq!(
            NetConfig::from_json(&json).unwrap().grad_policy,
            GradPolicy::ZeroFirst
        );
    }

    #[test]
    fn test_loss_weight_resolution() {
        let ce = LayerDef::new("loss", LayerKind::CrossEntropy);
        assert_eq!(ce.resolved_loss_weight(), 1.0);
        let fc = LayerDef::new(
            "fc",
            LayerKind::Linear {
                out_features: 2,
                bias: true,
                weight_filler: None,
                bias_filler: None,
            },
        );
        assert_eq!(fc.resolved_loss_weight(), 0.0);
        assert_eq!(fc.with_loss_weight(0.5).resolved_loss_weight(), 0.5);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(LayerKind::Sigmoid.name(), "Sigmoid");
        assert!(LayerKind::MseLoss.is_loss());
        assert!(!LayerKind::Tanh.is_loss());
    }
}
