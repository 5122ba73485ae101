// Net tests — Builds nets from topology text and verifies forward and
// backward semantics end-to-end

use civet::prelude::*;

fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() < tol
}

fn assert_vec_approx(got: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(
        got.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        got.len(),
        expected.len()
    );
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            approx_eq(*g, *e, tol),
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

// Helper: build a net from topology text

fn make_net(src: &str) -> Net {
    Net::from_text(src).expect("failed to build net")
}

// Shared fixtures. The regression net bottoms out in an MSE loss with
// every filler constant, so each quantity below is checkable by hand.

const REGRESSION: &str = r#"
@net { name: "reg"; seed: 3; }

layer data: Data {
    output x: [1, 2] = constant(1.0);
    output target: [1, 1] = constant(0.0);
}

layer fc: Linear {
    input x;
    output y;
    out_features: 1;
    weight_filler: constant(0.5);
    bias_filler: constant(0.0);
}

layer loss: MseLoss {
    input y;
    input target;
    output l;
}
"#;

const CLASSIFIER: &str = r#"
@net { name: "clf"; seed: 5; }

layer data: Data {
    output x: [2, 2] = constant(1.0);
    output labels: [2] = constant(0.0);
}

layer fc: Linear {
    input x;
    output scores;
    out_features: 2;
    weight_filler: constant(0.0);
    bias_filler: constant(0.0);
}

layer loss: CrossEntropy {
    input scores;
    input labels;
    output l;
}
"#;

// Forward execution

#[test]
fn test_forward_linear() -> civet::Result<()> {
    let mut net = make_net(
        r#"
layer src: Input { output x: [2, 3]; }
layer fc: Linear { input x; output y; out_features: 2; }
"#,
    );
    net.buffer("x")?.set_data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;

    let params = net.params();
    assert_eq!(params.len(), 2);
    assert_eq!(params[0].layer, "fc");
    assert_eq!(params[0].name, "weight");
    params[0].buffer.set_data(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0])?;
    params[1].buffer.set_data(&[0.5, -0.5])?;

    let result = net.forward()?;
    assert_eq!(result.loss, 0.0);
    let y = result.get("y").expect("no output 'y'");
    assert_eq!(y.shape().dims(), &[2, 2]);
    assert_vec_approx(&y.data_vec(), &[1.5, 1.5, 4.5, 4.5], 1e-6);

    // The single-layer slice recomputes y from whatever x holds now.
    net.buffer("x")?.set_data(&[6.0, 5.0, 4.0, 3.0, 2.0, 1.0])?;
    let result = net.forward_range(Some("fc"), Some("fc"))?;
    let y = result.get("y").expect("no output 'y'");
    assert_vec_approx(&y.data_vec(), &[6.5, 4.5, 3.5, 1.5], 1e-6);
    Ok(())
}

#[test]
fn test_in_place_wiring_shares_storage() -> civet::Result<()> {
    let mut net = make_net(
        r#"
layer src: Input { output x: [1, 3]; }
layer act: Relu { input x; output x; }
"#,
    );
    // One buffer end to end; the unconsumed tail is the net output.
    assert_eq!(net.buffer_names(), vec!["x"]);
    assert_eq!(net.output_names(), vec!["x"]);

    let x = net.buffer("x")?;
    x.set_data(&[-1.0, 0.5, 2.0])?;
    net.forward()?;
    assert_vec_approx(&x.data_vec(), &[0.0, 0.5, 2.0], 1e-6);
    Ok(())
}

// Ranged execution

#[test]
fn test_forward_range_partial_reexecution() -> civet::Result<()> {
    let mut net = make_net(
        r#"
layer src: Input { output x: [1, 2]; }
layer fc: Linear {
    input x;
    output y;
    out_features: 1;
    weight_filler: constant(1.0);
    bias_filler: constant(0.0);
}
layer act: Sigmoid { input y; output z; }
"#,
    );
    net.buffer("x")?.set_data(&[1.0, 2.0])?;
    let result = net.forward()?;
    assert_eq!(net.output_names(), vec!["z"]);
    let z = result.get("z").expect("no output 'z'");
    assert!(approx_eq(z.data_vec()[0], 1.0 / (1.0 + (-3.0f32).exp()), 1e-6));

    // Rerun from the middle after editing the input; the head of the
    // net is skipped but its buffers feed in unchanged.
    net.buffer("x")?.set_data(&[0.0, 0.0])?;
    let result = net.forward_range(Some("fc"), None)?;
    assert!(approx_eq(result.get("z").unwrap().data_vec()[0], 0.5, 1e-6));

    // An explicit end returns that layer's outputs, not the net's.
    let result = net.forward_range(Some("act"), Some("act"))?;
    assert_eq!(result.outputs.len(), 1);
    assert!(result.get("z").is_some());
    Ok(())
}

#[test]
fn test_range_errors() {
    let mut net = make_net(
        r#"
layer src: Input { output x: [1]; }
layer a: Relu { input x; output y; }
layer b: Tanh { input y; output z; }
"#,
    );
    match net.forward_range(Some("b"), Some("a")) {
        Err(Error::Msg(msg)) => assert!(msg.contains("comes after"), "{msg}"),
        Err(other) => panic!("wrong error: {other}"),
        Ok(_) => panic!("inverted forward range should fail"),
    }
    match net.forward_range(Some("ghost"), None) {
        Err(Error::UnknownLayer { name }) => assert_eq!(name, "ghost"),
        Err(other) => panic!("wrong error: {other}"),
        Ok(_) => panic!("unknown layer should fail"),
    }
    match net.backward_range(Some("a"), Some("b")) {
        Err(Error::Msg(msg)) => assert!(msg.contains("comes before"), "{msg}"),
        Err(other) => panic!("wrong error: {other}"),
        Ok(_) => panic!("inverted backward range should fail"),
    }
}

#[test]
fn test_backward_range_isolates_layers() -> civet::Result<()> {
    let mut net = make_net(REGRESSION);
    net.forward()?;

    // Only the loss layer runs: dy lands, the fc gradients stay clean.
    net.backward_range(Some("loss"), Some("loss"))?;
    assert_vec_approx(&net.buffer("y")?.grad_vec(), &[2.0], 1e-6);
    assert!(net.params()[0].buffer.grad_vec().iter().all(|&g| g == 0.0));
    assert!(net.buffer("x")?.grad_vec().iter().all(|&g| g == 0.0));

    // The fc slice picks up the dy already in place.
    net.backward_range(Some("fc"), Some("fc"))?;
    assert_vec_approx(&net.params()[0].buffer.grad_vec(), &[2.0, 2.0], 1e-6);
    assert_vec_approx(&net.params()[1].buffer.grad_vec(), &[2.0], 1e-6);
    Ok(())
}

// Backward and gradient policies

#[test]
fn test_backward_adds_across_calls() -> civet::Result<()> {
    let mut net = make_net(REGRESSION);
    let result = net.forward()?;
    assert!(approx_eq(result.loss, 1.0, 1e-6));

    let weight = net.params()[0].buffer.clone();
    net.backward()?;
    assert_vec_approx(&weight.grad_vec(), &[2.0, 2.0], 1e-6);

    // Accumulate policy: a second pass adds onto existing gradients,
    // including the loss layer's contribution to dy (2 then 4), so the
    // weight gradient grows by 4 rather than doubling in place.
    net.backward()?;
    assert_vec_approx(&weight.grad_vec(), &[6.0, 6.0], 1e-6);

    // zero_grads clears everything and re-arms the loss seed.
    net.zero_grads();
    assert_vec_approx(&weight.grad_vec(), &[0.0, 0.0], 1e-6);
    assert_vec_approx(&net.buffer("l")?.grad_vec(), &[1.0], 1e-6);
    net.backward()?;
    assert_vec_approx(&weight.grad_vec(), &[2.0, 2.0], 1e-6);
    Ok(())
}

#[test]
fn test_zero_first_policy() -> civet::Result<()> {
    let mut net = make_net(
        r#"
@net { name: "reg"; grad_policy: zero_first; seed: 3; }

layer data: Data {
    output x: [1, 2] = constant(1.0);
    output target: [1, 1] = constant(0.0);
}

layer fc: Linear {
    input x;
    output y;
    out_features: 1;
    weight_filler: constant(0.5);
    bias_filler: constant(0.0);
}

layer loss: MseLoss { input y; input target; output l; }
"#,
    );
    assert_eq!(net.grad_policy(), GradPolicy::ZeroFirst);
    net.forward()?;

    let weight = net.params()[0].buffer.clone();
    net.backward()?;
    assert_vec_approx(&weight.grad_vec(), &[2.0, 2.0], 1e-6);
    // Each full pass starts from clean slots, so repeating it is a
    // no-op on the result.
    net.backward()?;
    assert_vec_approx(&weight.grad_vec(), &[2.0, 2.0], 1e-6);
    Ok(())
}

#[test]
fn test_lr_mult_zero_freezes_parameter() -> civet::Result<()> {
    let mut net = make_net(
        r#"
layer data: Data {
    output x: [1, 2] = constant(1.0);
    output target: [1, 1] = constant(0.0);
}

layer fc: Linear {
    input x;
    output y;
    out_features: 1;
    weight_filler: constant(0.5);
    bias_filler: constant(0.0);
    param { lr_mult: 0.0; }
    param { lr_mult: 1.0; decay_mult: 0.0; }
}

layer loss: MseLoss { input y; input target; output l; }
"#,
    );
    let params = net.params();
    assert_eq!(params[0].lr_mult, 0.0);
    assert_eq!(params[1].decay_mult, 0.0);

    net.forward()?;
    net.backward()?;
    // Frozen weight, live bias.
    assert_vec_approx(&params[0].buffer.grad_vec(), &[0.0, 0.0], 1e-6);
    assert_vec_approx(&params[1].buffer.grad_vec(), &[2.0], 1e-6);
    Ok(())
}

#[test]
fn test_force_backward_reaches_data_outputs() -> civet::Result<()> {
    let src = r#"
@net { name: "fb"; force_backward: true; }
layer data: Data { output x: [4] = constant(0.0); }
layer act: Relu { input x; output y; }
"#;
    let mut net = make_net(src);
    assert!(net.layer_info("act")?.needs_backward);

    net.buffer("x")?.set_data(&[1.0, -2.0, 3.0, -4.0])?;
    net.buffer("y")?.set_grad(&[10.0, 20.0, 30.0, 40.0])?;
    net.backward_range(None, None)?;
    assert_vec_approx(&net.buffer("x")?.grad_vec(), &[10.0, 0.0, 30.0, 0.0], 1e-6);

    // Without the switch there is no parameter anywhere, so no layer
    // computes backward and the injected gradient goes nowhere.
    let mut net = make_net(&src.replace("force_backward: true", "force_backward: false"));
    assert!(!net.layer_info("act")?.needs_backward);
    net.buffer("y")?.set_grad(&[10.0, 20.0, 30.0, 40.0])?;
    net.backward()?;
    assert_vec_approx(&net.buffer("x")?.grad_vec(), &[0.0; 4], 1e-6);
    Ok(())
}

#[test]
fn test_fan_out_gradients_accumulate() -> civet::Result<()> {
    let mut net = make_net(
        r#"
@net { name: "fanout"; force_backward: true; }
layer src: Input { output x: [1, 2]; }
layer a: Linear { input x; output u; out_features: 1; weight_filler: constant(1.0); bias: false; }
layer b: Linear { input x; output v; out_features: 1; weight_filler: constant(2.0); bias: false; }
"#,
    );
    net.buffer("x")?.set_data(&[1.0, 1.0])?;
    net.buffer("u")?.set_grad(&[3.0])?;
    net.buffer("v")?.set_grad(&[5.0])?;
    net.backward_range(None, None)?;

    // Both consumers add their term into the shared producer grad:
    // 3·1 + 5·2 per element.
    assert_vec_approx(&net.buffer("x")?.grad_vec(), &[13.0, 13.0], 1e-6);

    // Replayed one consumer at a time, the terms show up separately and
    // still sum to the same total.
    net.buffer("x")?.zero_grad();
    net.backward_range(Some("b"), Some("b"))?;
    assert_vec_approx(&net.buffer("x")?.grad_vec(), &[10.0, 10.0], 1e-6);
    net.backward_range(Some("a"), Some("a"))?;
    assert_vec_approx(&net.buffer("x")?.grad_vec(), &[13.0, 13.0], 1e-6);
    Ok(())
}

// Loss handling

#[test]
fn test_classifier_end_to_end() -> civet::Result<()> {
    let mut net = make_net(CLASSIFIER);
    let result = net.forward()?;

    // Zero scores give a uniform softmax; -ln(1/2) per row.
    assert!(approx_eq(result.loss, std::f32::consts::LN_2, 1e-5));
    net.backward()?;

    // dscores = (softmax - onehot) / batch.
    assert_vec_approx(
        &net.buffer("scores")?.grad_vec(),
        &[-0.25, 0.25, -0.25, 0.25],
        1e-6,
    );
    let params = net.params();
    assert_vec_approx(&params[0].buffer.grad_vec(), &[-0.5, -0.5, 0.5, 0.5], 1e-6);
    assert_vec_approx(&params[1].buffer.grad_vec(), &[-0.5, 0.5], 1e-6);

    // Integer labels never receive a gradient.
    assert_vec_approx(&net.buffer("labels")?.grad_vec(), &[0.0, 0.0], 1e-6);
    assert!(!net.layer_info("data")?.needs_backward);
    assert!(net.layer_info("fc")?.needs_backward);
    assert!(net.layer_info("loss")?.needs_backward);
    Ok(())
}

#[test]
fn test_labels_stay_frozen_under_force_backward() -> civet::Result<()> {
    let mut net = make_net(&CLASSIFIER.replace("seed: 5;", "seed: 5; force_backward: true;"));
    net.params()[0].buffer.set_data(&[1.0, 0.0, 0.0, 0.0])?;
    net.forward()?;
    net.backward()?;

    // The feature path now gets gradients; the label path still cannot.
    assert!(net.buffer("x")?.grad_vec().iter().any(|&g| g != 0.0));
    assert_vec_approx(&net.buffer("labels")?.grad_vec(), &[0.0, 0.0], 1e-6);
    Ok(())
}

#[test]
fn test_loss_weights_combine() -> civet::Result<()> {
    let mut net = make_net(
        r#"
layer data: Data {
    output x: [1, 2] = constant(1.0);
    output target: [1, 1] = constant(0.0);
}

layer fc: Linear {
    input x;
    output y;
    out_features: 1;
    weight_filler: constant(0.5);
    bias_filler: constant(0.0);
}

layer main_loss: MseLoss { input y; input target; output a; }
layer aux_loss: MseLoss { input y; input target; output b; loss_weight: 0.25; }
"#,
    );
    let result = net.forward()?;
    assert!(approx_eq(result.loss, 1.25, 1e-6));
    assert_eq!(net.output_names(), vec!["a", "b"]);

    // Seeds carry the weights.
    assert_vec_approx(&net.buffer("a")?.grad_vec(), &[1.0], 1e-6);
    assert_vec_approx(&net.buffer("b")?.grad_vec(), &[0.25], 1e-6);

    net.backward()?;
    // dy = 2(y - t) · (1 + 0.25).
    assert_vec_approx(&net.buffer("y")?.grad_vec(), &[2.5], 1e-6);
    assert_vec_approx(&net.params()[0].buffer.grad_vec(), &[2.5, 2.5], 1e-6);
    Ok(())
}

#[test]
fn test_conv_pipeline_forward_backward() -> civet::Result<()> {
    let mut net = make_net(
        r#"
@net { name: "convnet"; force_backward: true; seed: 11; }

layer data: Data {
    output x: [2, 1, 4, 4] = gaussian(0.0, 1.0);
    output labels: [2] = constant(1.0);
}

layer conv: Conv2d {
    input x;
    output fmap;
    out_channels: 2;
    kernel: 3;
    weight_filler: gaussian(0.0, 0.5);
}

layer fc: Linear {
    input fmap;
    output scores;
    out_features: 3;
    weight_filler: gaussian(0.0, 0.5);
}

layer loss: CrossEntropy {
    input scores;
    input labels;
    output l;
}
"#,
    );
    // Setup already ran at build, so the shapes are live.
    assert_eq!(net.buffer("fmap")?.shape().dims(), &[2, 2, 2, 2]);
    assert_eq!(net.buffer("scores")?.shape().dims(), &[2, 3]);

    let result = net.forward()?;
    assert!(result.loss.is_finite() && result.loss > 0.0);

    net.backward()?;
    let params = net.params();
    assert_eq!(params[0].layer, "conv");
    assert!(params[0].buffer.grad_vec().iter().any(|&g| g != 0.0));
    assert!(params[2].buffer.grad_vec().iter().any(|&g| g != 0.0));

    // force_backward carries the chain all the way into the data outputs,
    // except the labels, which the loss layer refuses.
    assert!(net.buffer("x")?.grad_vec().iter().any(|&g| g != 0.0));
    assert!(net.buffer("labels")?.grad_vec().iter().all(|&g| g == 0.0));
    Ok(())
}

// Reshape

#[test]
fn test_reshape_keeps_params_and_reseeds_losses() -> civet::Result<()> {
    let mut net = make_net(REGRESSION);
    let before = net.forward()?.loss;
    assert!(approx_eq(before, 1.0, 1e-6));

    // Wreck the seed, then reshape: setup reruns, weights survive, and
    // the loss seed is rewritten.
    net.buffer("l")?.set_grad(&[9.9])?;
    net.reshape()?;
    assert_vec_approx(&net.buffer("l")?.grad_vec(), &[1.0], 1e-6);
    assert_vec_approx(&net.params()[0].buffer.data_vec(), &[0.5, 0.5], 1e-6);

    let after = net.forward()?.loss;
    assert!(approx_eq(after, before, 1e-6));
    Ok(())
}

// Build failures

#[test]
fn test_build_rejects_duplicate_layer_names() {
    let err = Net::from_text(
        r#"
layer a: Data { output x: [1] = constant(0.0); }
layer a: Sigmoid { input x; output y; }
"#,
    )
    .err()
    .expect("duplicate name should fail");
    match err {
        Error::InvalidTopology { reason } => assert!(reason.contains("duplicate"), "{reason}"),
        other => panic!("wrong error: {other}"),
    }
}

#[test]
fn test_build_rejects_unknown_input() {
    let err = Net::from_text("layer a: Sigmoid { input ghost; output y; }")
        .err()
        .expect("unknown input should fail");
    match err {
        Error::UnknownBuffer { name } => assert_eq!(name, "ghost"),
        other => panic!("wrong error: {other}"),
    }
}

#[test]
fn test_build_rejects_two_producers() {
    let err = Net::from_text(
        r#"
layer a: Data { output x: [1] = constant(0.0); }
layer b: Data { output x: [1] = constant(0.0); }
"#,
    )
    .err()
    .expect("double producer should fail");
    match err {
        Error::InvalidTopology { reason } => {
            assert!(reason.contains("produced by two layers"), "{reason}")
        }
        other => panic!("wrong error: {other}"),
    }
}

#[test]
fn test_build_rejects_excess_param_blocks() {
    let err = Net::from_text(
        r#"
layer data: Data { output x: [1] = constant(0.0); }
layer act: Relu { input x; output y; param { lr_mult: 1.0; } }
"#,
    )
    .err()
    .expect("param block on a parameterless layer should fail");
    match err {
        Error::InvalidTopology { reason } => assert!(reason.contains("param block"), "{reason}"),
        other => panic!("wrong error: {other}"),
    }
}

// Inspection

#[test]
fn test_net_inspection() -> civet::Result<()> {
    let net = make_net(CLASSIFIER);
    assert_eq!(net.name(), "clf");
    assert_eq!(net.grad_policy(), GradPolicy::Accumulate);
    assert_eq!(net.layer_names(), vec!["data", "fc", "loss"]);
    assert_eq!(net.buffer_names(), vec!["x", "labels", "scores", "l"]);
    assert_eq!(net.input_names(), vec!["x", "labels"]);
    assert_eq!(net.output_names(), vec!["l"]);

    let layers = net.layers();
    assert_eq!(layers[0].kind, "Data");
    assert_eq!(layers[1].inputs.to_vec(), vec!["x"]);
    assert_eq!(layers[2].outputs.to_vec(), vec!["l"]);

    let info = net.layer_info("fc")?;
    assert_eq!(info.kind, "Linear");

    let params = net.params();
    assert_eq!(params.len(), 2);
    assert_eq!(params[0].layer, "fc");
    assert_eq!(params[0].name, "weight");
    assert_eq!(params[1].name, "bias");
    assert_eq!(params[0].lr_mult, 1.0);

    assert!(net.layer_info("nope").is_err());
    assert!(net.buffer("nope").is_err());
    Ok(())
}

#[test]
fn test_buffer_handles_outlive_the_net() -> civet::Result<()> {
    let mut net = make_net(CLASSIFIER);
    net.forward()?;
    let scores = net.buffer("scores")?;
    let snapshot = scores.data_vec();
    drop(net);

    // Storage is shared, not owned by the net.
    assert_eq!(scores.elem_count(), 4);
    assert_eq!(scores.data_vec(), snapshot);
    Ok(())
}
