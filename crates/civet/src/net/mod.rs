// Net — Layer-graph execution engine
//
// A Net is a built, ready-to-run layer graph. Building (see `builder`)
// resolves every buffer name to a table index, boxes every layer once,
// and precomputes the backward-need flags; execution after that is a
// plain loop over layer positions with no name lookups or dispatch
// decisions left.
//
// Forward runs layers in declaration order; backward runs them in
// reverse, layers with nothing to compute skipped. Both take optional
// layer-name bounds so parts of a graph can be re-run, which is how
// weight updates are interleaved with data already loaded further up.
//
// Gradients ACCUMULATE: every backward pass adds into the grad arrays.
// The `GradPolicy` chosen at build decides whether full backward calls
// clear first or leave accumulation to the caller (see `zero_grads`).

use std::collections::HashMap;

use civet_core::{bail, Buffer, BufferTable, Error, Result};
use civet_nn::Layer;

use crate::config::{GradPolicy, NetConfig};

mod builder;

/// One built node: the boxed layer plus its resolved buffer wiring.
pub(crate) struct LayerNode {
    pub(crate) name: String,
    pub(crate) layer: Box<dyn Layer>,
    pub(crate) inputs: Vec<Buffer>,
    pub(crate) outputs: Vec<Buffer>,
    pub(crate) input_names: Vec<String>,
    pub(crate) output_names: Vec<String>,
    /// Per input: whether backward should push a gradient into it.
    pub(crate) propagate_down: Vec<bool>,
    /// Whether backward visits this layer at all.
    pub(crate) needs_backward: bool,
    pub(crate) lr_mults: Vec<f32>,
    pub(crate) decay_mults: Vec<f32>,
}

/// The result of a forward pass.
///
/// Buffers are shared handles into the net's storage; they stay valid
/// and keep their contents even if the net is dropped.
#[derive(Debug)]
pub struct ForwardResult {
    /// Output buffers, keyed by buffer name.
    pub outputs: HashMap<String, Buffer>,
    /// Weighted sum of all loss outputs after this pass.
    pub loss: f32,
}

impl ForwardResult {
    /// The first (or only) output buffer.
    pub fn output(&self) -> Option<&Buffer> {
        self.outputs.values().next()
    }

    /// An output by buffer name.
    pub fn get(&self, name: &str) -> Option<&Buffer> {
        self.outputs.get(name)
    }
}

/// A layer's place in the graph, for inspection.
#[derive(Debug, Clone, Copy)]
pub struct LayerInfo<'a> {
    pub name: &'a str,
    pub kind: &'static str,
    pub inputs: &'a [String],
    pub outputs: &'a [String],
    pub needs_backward: bool,
}

/// One learnable parameter with its training multipliers.
#[derive(Debug, Clone)]
pub struct ParamInfo {
    /// Owning layer's name.
    pub layer: String,
    /// Parameter name within the layer (`"weight"`, `"bias"`).
    pub name: String,
    pub lr_mult: f32,
    pub decay_mult: f32,
    /// Shared handle to the parameter's storage.
    pub buffer: Buffer,
}

/// A built layer graph: executable, inspectable, reshapeable.
pub struct Net {
    name: String,
    grad_policy: GradPolicy,
    nodes: Vec<LayerNode>,
    layer_index: HashMap<String, usize>,
    buffers: BufferTable,
    /// Table indices of buffers produced but never consumed, in
    /// declaration order. These are the net's outputs.
    net_outputs: Vec<usize>,
    /// (table index, weight) per loss output; the weight is written
    /// into the whole grad array to seed backward.
    loss_seeds: Vec<(usize, f32)>,
}

impl Net {
    /// Build a net from a config. Validates the topology, constructs
    /// and sets up every layer, and resolves all wiring.
    pub fn from_config(cfg: NetConfig) -> Result<Net> {
        builder::build(cfg)
    }

    /// Build a net from topology text (see the `topo` module).
    pub fn from_text(src: &str) -> Result<Net> {
        Net::from_config(NetConfig::from_text(src)?)
    }

    /// Build a net from a JSON config.
    pub fn from_json(json: &str) -> Result<Net> {
        Net::from_config(NetConfig::from_json(json)?)
    }

    // Execution

    /// Run every layer in order. Returns the net outputs keyed by
    /// buffer name, plus the loss.
    pub fn forward(&mut self) -> Result<ForwardResult> {
        self.forward_range(None, None)
    }

    /// Run the layers from `start` through `end` inclusive (layer
    /// names; `None` means the first and last layer respectively).
    ///
    /// Buffers computed by earlier runs keep their values, so a range
    /// starting mid-net reuses whatever its input buffers already hold.
    /// With an explicit `end`, the result holds that layer's outputs
    /// instead of the net outputs.
    pub fn forward_range(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<ForwardResult> {
        if self.nodes.is_empty() {
            return Ok(ForwardResult {
                outputs: HashMap::new(),
                loss: 0.0,
            });
        }
        let lo = match start {
            Some(name) => self.layer_pos(name)?,
            None => 0,
        };
        let hi = match end {
            Some(name) => self.layer_pos(name)?,
            None => self.nodes.len() - 1,
        };
        if lo > hi {
            bail!(
                "forward range start '{}' comes after end '{}'",
                self.nodes[lo].name,
                self.nodes[hi].name
            );
        }
        for node in &mut self.nodes[lo..=hi] {
            log::trace!("forward {} ({})", node.name, node.layer.kind());
            node.layer.forward(&node.inputs, &node.outputs)?;
        }

        let outputs: HashMap<String, Buffer> = match end {
            Some(_) => {
                let node = &self.nodes[hi];
                node.output_names
                    .iter()
                    .cloned()
                    .zip(node.outputs.iter().cloned())
                    .collect()
            }
            None => self
                .net_outputs
                .iter()
                .map(|&i| {
                    let b = self.buffers.at(i);
                    (b.name().to_string(), b.clone())
                })
                .collect(),
        };
        Ok(ForwardResult {
            outputs,
            loss: self.loss(),
        })
    }

    /// Run backward through every layer, in reverse order.
    ///
    /// Under `GradPolicy::ZeroFirst` all gradient slots are cleared and
    /// the loss seeds rewritten before the pass; under `Accumulate` the
    /// pass adds onto whatever the slots already hold.
    pub fn backward(&mut self) -> Result<()> {
        if self.grad_policy == GradPolicy::ZeroFirst {
            self.zero_grads();
        }
        self.backward_range(None, None)
    }

    /// Run backward from layer `start` down through layer `end`
    /// (`None` means the last and first layer respectively). `start`
    /// must not come before `end` in declaration order.
    ///
    /// Ranges never clear gradients, regardless of policy.
    pub fn backward_range(&mut self, start: Option<&str>, end: Option<&str>) -> Result<()> {
        if self.nodes.is_empty() {
            return Ok(());
        }
        let hi = match start {
            Some(name) => self.layer_pos(name)?,
            None => self.nodes.len() - 1,
        };
        let lo = match end {
            Some(name) => self.layer_pos(name)?,
            None => 0,
        };
        if hi < lo {
            bail!(
                "backward range start '{}' comes before end '{}'",
                self.nodes[hi].name,
                self.nodes[lo].name
            );
        }
        for node in self.nodes[lo..=hi].iter_mut().rev() {
            if !node.needs_backward {
                continue;
            }
            log::trace!("backward {} ({})", node.name, node.layer.kind());
            node.layer
                .backward(&node.outputs, &node.propagate_down, &node.inputs)?;
        }
        Ok(())
    }

    /// Re-derive every buffer shape from the current input shapes by
    /// re-running each layer's setup, in order.
    ///
    /// Parameters keep their values; layers whose parameters no longer
    /// fit the new shapes fail with `ShapeMismatch`. Call after
    /// resizing an input buffer (e.g. a new batch size) and before the
    /// next forward.
    pub fn reshape(&mut self) -> Result<()> {
        for node in &mut self.nodes {
            node.layer.setup(&node.inputs, &node.outputs)?;
        }
        self.seed_loss_grads();
        Ok(())
    }

    /// Zero every gradient slot (buffers and parameters), then rewrite
    /// the loss seeds so the next backward starts fresh.
    pub fn zero_grads(&mut self) {
        for b in self.buffers.buffers() {
            b.zero_grad();
        }
        for node in &self.nodes {
            for p in node.layer.params() {
                p.zero_grad();
            }
        }
        self.seed_loss_grads();
    }

    /// Write each loss weight into its output's whole grad array.
    fn seed_loss_grads(&self) {
        for &(i, w) in &self.loss_seeds {
            self.buffers.at(i).fill_grad(w);
        }
    }

    /// The weighted sum of all loss outputs, from their current values.
    pub fn loss(&self) -> f32 {
        self.loss_seeds
            .iter()
            .map(|&(i, w)| w * self.buffers.at(i).data().iter().sum::<f32>())
            .sum()
    }

    // Inspection

    /// The net's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The gradient-clearing policy chosen at build.
    pub fn grad_policy(&self) -> GradPolicy {
        self.grad_policy
    }

    /// Layer names in execution order.
    pub fn layer_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// All layers in execution order.
    pub fn layers(&self) -> Vec<LayerInfo<'_>> {
        self.nodes.iter().map(node_info).collect()
    }

    /// A single layer by name.
    pub fn layer_info(&self, name: &str) -> Result<LayerInfo<'_>> {
        Ok(node_info(&self.nodes[self.layer_pos(name)?]))
    }

    /// A buffer handle by name. The handle shares the net's storage.
    pub fn buffer(&self, name: &str) -> Result<Buffer> {
        self.buffers.get(name)
    }

    /// All buffer names in declaration order.
    pub fn buffer_names(&self) -> Vec<&str> {
        self.buffers.names().collect()
    }

    /// Names of the net inputs: buffers originated by layers that consume
    /// nothing (data sources).
    pub fn input_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.inputs.is_empty())
            .flat_map(|n| n.output_names.iter().map(String::as_str))
            .collect()
    }

    /// Names of the net outputs: buffers no layer consumes.
    pub fn output_names(&self) -> Vec<&str> {
        self.net_outputs
            .iter()
            .map(|&i| self.buffers.at(i).name())
            .collect()
    }

    /// Every learnable parameter, grouped by layer in execution order.
    pub fn params(&self) -> Vec<ParamInfo> {
        let mut out = Vec::new();
        for node in &self.nodes {
            for (i, (name, buffer)) in node.layer.named_params().into_iter().enumerate() {
                out.push(ParamInfo {
                    layer: node.name.clone(),
                    name,
                    lr_mult: node.lr_mults.get(i).copied().unwrap_or(1.0),
                    decay_mult: node.decay_mults.get(i).copied().unwrap_or(1.0),
                    buffer,
                });
            }
        }
        out
    }

    fn layer_pos(&self, name: &str) -> Result<usize> {
        self.layer_index
            .get(name)
            .copied()
            .ok_or(Error::UnknownLayer {
                name: name.to_string(),
            })
    }
}

fn node_info(node: &LayerNode) -> LayerInfo<'_> {
    LayerInfo {
        name: &node.name,
        kind: node.layer.kind(),
        inputs: &node.input_names,
        outputs: &node.output_names,
        needs_backward: node.needs_backward,
    }
}
