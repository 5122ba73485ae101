// Builder — Turns a NetConfig into a runnable Net
//
// Walks the layer definitions once, in declaration order, and does all
// the work execution should never repeat:
//
//   1. resolve buffer names to shared handles (creating each buffer the
//      first time a layer produces it),
//   2. construct and set up each layer, seeding its filler RNG from the
//      net seed,
//   3. decide, per layer and per input, whether backward has anything
//      to compute there,
//   4. seed the loss-output gradients with their loss weights.
//
// TOPOLOGY RULES:
//
//   A buffer must be produced before it is consumed, and only one layer
//   may produce it. The single exception is in-place wiring: a layer
//   may name one of its own inputs as an output, sharing the storage.
//   Layer names are unique. Violations fail the build with
//   InvalidTopology / UnknownBuffer; nothing is partially constructed.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use civet_core::{bail_topology, BufferTable, Error, Result, Shape};
use civet_nn::{
    Conv2d, Conv2dConfig, CrossEntropy, Data, DataConfig, Input, InputConfig, Layer, Linear,
    LinearConfig, MaxPool2d, MaxPool2dConfig, MseLoss, Relu, Sigmoid, Softmax, Tanh,
};

use crate::config::{LayerKind, NetConfig};

use super::{LayerNode, Net};

pub(crate) fn build(cfg: NetConfig) -> Result<Net> {
    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut buffers = BufferTable::new();
    let mut nodes: Vec<LayerNode> = Vec::new();
    let mut layer_index: HashMap<String, usize> = HashMap::new();
    // Buffers produced and not (yet) consumed; what survives the walk
    // is a net output.
    let mut available: HashSet<String> = HashSet::new();
    let mut loss_seeds: Vec<(usize, f32)> = Vec::new();

    for def in &cfg.layers {
        if layer_index.contains_key(&def.name) {
            bail_topology!("duplicate layer name '{}'", def.name);
        }

        let mut inputs = Vec::new();
        for in_name in &def.inputs {
            let buf = buffers.get(in_name)?;
            available.remove(in_name.as_str());
            inputs.push(buf);
        }

        let mut outputs = Vec::new();
        for out_name in &def.outputs {
            let in_place = def.inputs.iter().any(|i| i == out_name);
            let buf = if in_place {
                buffers.get(out_name)?
            } else {
                if buffers.contains(out_name) {
                    bail_topology!(
                        "buffer '{}' is produced by two layers ('{}' is the second)",
                        out_name,
                        def.name
                    );
                }
                // Placeholder shape; setup resizes it below.
                buffers.declare(out_name, &Shape::scalar())?
            };
            available.insert(out_name.clone());
            outputs.push(buf);
        }

        // Every layer draws a seed so insertion or removal of one layer
        // does not reshuffle the streams of unrelated kinds.
        let layer_seed = rng.gen::<u64>();
        let mut layer = instantiate(&def.kind, layer_seed);
        layer.setup(&inputs, &outputs)?;

        let n_params = layer.params().len();
        if def.params.len() > n_params {
            bail_topology!(
                "layer '{}' declares {} param block(s) but has {} parameter(s)",
                def.name,
                def.params.len(),
                n_params
            );
        }
        let mut lr_mults = vec![1.0f32; n_params];
        let mut decay_mults = vec![1.0f32; n_params];
        for (i, spec) in def.params.iter().enumerate() {
            lr_mults[i] = spec.lr_mult;
            decay_mults[i] = spec.decay_mult;
        }
        let grad_flags: Vec<bool> = lr_mults.iter().map(|&m| m != 0.0).collect();
        layer.set_param_gradients(&grad_flags);

        let weight = def.resolved_loss_weight();
        if weight != 0.0 {
            let out_name = def.outputs.first().ok_or_else(|| {
                Error::topology(format!(
                    "layer '{}' has a loss weight but no outputs",
                    def.name
                ))
            })?;
            loss_seeds.push((buffers.index_of(out_name)?, weight));
        }

        log::debug!(
            "layer {}/{} '{}' ({}): inputs {:?}, outputs {:?}",
            nodes.len() + 1,
            cfg.layers.len(),
            def.name,
            layer.kind(),
            def.inputs,
            def.outputs
        );

        layer_index.insert(def.name.clone(), nodes.len());
        nodes.push(LayerNode {
            name: def.name.clone(),
            layer,
            inputs,
            outputs,
            input_names: def.inputs.clone(),
            output_names: def.outputs.clone(),
            propagate_down: vec![false; def.inputs.len()],
            needs_backward: false,
            lr_mults,
            decay_mults,
        });
    }

    // Backward-need sweep, in forward order. A layer computes backward
    // if it owns a live parameter or any input wants a gradient; its
    // outputs then want gradients in turn. force_backward turns on
    // every input the layer permits (loss layers veto their labels), so
    // gradients reach even parameterless paths.
    let mut grad_wanted: HashSet<String> = HashSet::new();
    for node in &mut nodes {
        let mut needs = node.lr_mults.iter().any(|&m| m != 0.0);
        for (j, in_name) in node.input_names.iter().enumerate() {
            let down = grad_wanted.contains(in_name.as_str())
                || (cfg.force_backward && node.layer.allow_force_backward(j));
            node.propagate_down[j] = down;
            needs |= down;
        }
        node.needs_backward = needs;
        if needs {
            for out_name in &node.output_names {
                grad_wanted.insert(out_name.clone());
            }
        }
    }

    let net_outputs: Vec<usize> = buffers
        .names()
        .enumerate()
        .filter(|(_, name)| available.contains(*name))
        .map(|(i, _)| i)
        .collect();

    log::debug!(
        "net '{}' built: {} layers, {} buffers, outputs {:?}, {} loss output(s)",
        cfg.name,
        nodes.len(),
        buffers.len(),
        net_outputs
            .iter()
            .map(|&i| buffers.at(i).name())
            .collect::<Vec<_>>(),
        loss_seeds.len()
    );

    let net = Net {
        name: cfg.name,
        grad_policy: cfg.grad_policy,
        nodes,
        layer_index,
        buffers,
        net_outputs,
        loss_seeds,
    };
    net.seed_loss_grads();
    Ok(net)
}

/// Construct the concrete layer for a config kind. Stochastic layers
/// get their own RNG stream from `seed`.
fn instantiate(kind: &LayerKind, seed: u64) -> Box<dyn Layer> {
    match kind {
        LayerKind::Input { shapes } => Box::new(Input::new(InputConfig {
            shapes: shapes.iter().map(|d| Shape::new(d.clone())).collect(),
        })),
        LayerKind::Data { sources } => Box::new(Data::seeded(
            DataConfig {
                outputs: sources
                    .iter()
                    .map(|s| (Shape::new(s.shape.clone()), s.filler.to_filler()))
                    .collect(),
            },
            seed,
        )),
        LayerKind::Linear {
            out_features,
            bias,
            weight_filler,
            bias_filler,
        } => {
            let mut c = LinearConfig::new(*out_features);
            c.bias = *bias;
            if let Some(f) = weight_filler {
                c.weight_filler = f.to_filler();
            }
            if let Some(f) = bias_filler {
                c.bias_filler = f.to_filler();
            }
            Box::new(Linear::seeded(c, seed))
        }
        LayerKind::Conv2d {
            out_channels,
            kernel,
            stride,
            pad,
            bias,
            weight_filler,
            bias_filler,
        } => {
            let mut c = Conv2dConfig::new(*out_channels, *kernel);
            c.stride = [*stride; 2];
            c.pad = [*pad; 2];
            c.bias = *bias;
            if let Some(f) = weight_filler {
                c.weight_filler = f.to_filler();
            }
            if let Some(f) = bias_filler {
                c.bias_filler = f.to_filler();
            }
            Box::new(Conv2d::seeded(c, seed))
        }
        LayerKind::MaxPool2d {
            kernel,
            stride,
            pad,
        } => {
            let mut c = MaxPool2dConfig::new(*kernel);
            if let Some(s) = stride {
                c.stride = [*s; 2];
            }
            c.pad = [*pad; 2];
            Box::new(MaxPool2d::new(c))
        }
        LayerKind::Relu { negative_slope } => Box::new(Relu::new(*negative_slope)),
        LayerKind::Sigmoid => Box::new(Sigmoid),
        LayerKind::Tanh => Box::new(Tanh),
        LayerKind::Softmax { axis } => Box::new(Softmax::new(*axis)),
        LayerKind::CrossEntropy => Box::new(CrossEntropy::new()),
        LayerKind::MseLoss => Box::new(MseLoss),
    }
}
