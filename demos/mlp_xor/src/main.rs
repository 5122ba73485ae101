// MLP XOR Example — Training a layer graph end to end
//
// XOR is the classic problem that demonstrates why we NEED hidden layers.
// A single linear layer cannot learn XOR because it's not linearly
// separable; two layers with a nonlinearity in between can.
//
// Architecture: Input(4x2) → Linear(2→8) → Tanh → Linear(8→1) → MseLoss
//
// This example demonstrates:
//   1. Describing the whole net in topology text
//   2. Injecting training data through buffer handles
//   3. forward / zero_grads / backward per step
//   4. A hand-rolled SGD update over net.params()
//   5. Reading predictions back out of the graph

use civet::prelude::*;

const TOPOLOGY: &str = r#"
@net { name: "mlp_xor"; seed: 42; }

layer data: Input {
    output x: [4, 2];
    output target: [4, 1];
}

layer fc1: Linear {
    input x;
    output h;
    out_features: 8;
    weight_filler: xavier();
}

layer act: Tanh { input h; output h; }

layer fc2: Linear {
    input h;
    output prediction;
    out_features: 1;
    weight_filler: xavier();
}

layer loss: MseLoss {
    input prediction;
    input target;
    output l;
}
"#;

fn main() -> civet::Result<()> {
    println!("=== Civet — MLP XOR Example ===");
    println!();

    let mut net = Net::from_text(TOPOLOGY)?;

    // 1. The training data. Input layers never touch their buffers, so
    // one injection up front feeds every epoch.
    net.buffer("x")?
        .set_data(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0])?;
    net.buffer("target")?.set_data(&[0.0, 1.0, 1.0, 0.0])?;

    println!("Training data (XOR):");
    println!("  (0,0) → 0");
    println!("  (0,1) → 1");
    println!("  (1,0) → 1");
    println!("  (1,1) → 0");
    println!();

    // 2. The network, as built from the topology text.
    println!("Network:");
    for info in net.layers() {
        println!(
            "  {} ({}): {:?} → {:?}",
            info.name, info.kind, info.inputs, info.outputs
        );
    }
    let params = net.params();
    let total: usize = params.iter().map(|p| p.buffer.elem_count()).sum();
    println!("  Total parameters: {total}");
    println!();

    // 3. Training loop: plain SGD over the parameter handles.
    let lr = 0.5;
    let epochs = 1000;
    println!("Training for {epochs} epochs (SGD, lr={lr})...");
    println!("{:-<50}", "");

    for epoch in 0..epochs {
        let result = net.forward()?;
        net.zero_grads();
        net.backward()?;

        for p in &params {
            if p.lr_mult == 0.0 {
                continue;
            }
            let grad = p.buffer.grad_vec();
            let mut data = p.buffer.data_mut();
            for (d, g) in data.iter_mut().zip(grad.iter()) {
                *d -= lr * p.lr_mult * g;
            }
        }

        if epoch % 100 == 0 || epoch == epochs - 1 {
            println!("  Epoch {:>4} | Loss: {:.6}", epoch, result.loss);
        }
    }

    println!("{:-<50}", "");
    println!();

    // 4. Evaluate with the trained weights.
    net.forward()?;
    let preds = net.buffer("prediction")?.data_vec();
    let inputs = [(0, 0), (0, 1), (1, 0), (1, 1)];
    let targets = [0.0f32, 1.0, 1.0, 0.0];

    println!("Predictions after training:");
    for (i, ((a, b), &target)) in inputs.iter().zip(targets.iter()).enumerate() {
        let pred = preds[i];
        let rounded = if pred > 0.5 { 1 } else { 0 };
        let mark = if rounded as f32 == target { "✓" } else { "✗" };
        println!(
            "  ({},{}) → {:.4}  (rounded: {})  target: {}  {}",
            a, b, pred, rounded, target as i32, mark
        );
    }

    println!();
    println!("=== Done! ===");

    Ok(())
}
