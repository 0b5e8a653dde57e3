//! Quick benchmark of a full patch pass on a large terrain document

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Map, Value};
use std::time::Instant;
use terrapatch::patch::{PatchSettings, Patcher, RunSpec};
use terrapatch::variables::expr;

/// `stages` graphs of `nodes` nodes each, every node bound to `seed`
fn terrain(stages: usize, nodes: usize) -> Value {
    let mut assets = Vec::new();
    let mut bindings = Vec::new();
    for stage in 0..stages {
        let mut collection = Map::new();
        for n in 0..nodes {
            let id = (stage * nodes + n) as i64;
            collection.insert(
                id.to_string(),
                json!({"Id": id, "Name": "Mountain", "Seed": 0, "Scale": 1.0}),
            );
            bindings.push(json!({"Node": id, "Property": "Seed", "Variable": "seed"}));
        }
        assets.push(json!({
            "Terrain": {"Nodes": collection, "Variables": {"seed": "0", "scale": "1.0"}},
            "BuildDefinition": {"Destination": "", "PostBuildScript": ""}
        }));
    }
    json!({
        "Assets": {"$values": assets},
        "Automation": {"Bindings": {"$values": bindings}}
    })
}

fn main() {
    println!("Patch Performance Test");
    println!("======================\n");

    let vars = vec![
        "seed=lambda: random.randint(0, 1000000)".to_string(),
        "scale=lambda: round(uniform(0.5, 2.0) * 100) / 100".to_string(),
    ];

    for (stages, nodes) in [(1, 10), (4, 50), (8, 200)] {
        let doc = terrain(stages, nodes);
        let mut patcher = Patcher::with_rng(PatchSettings::default(), StdRng::seed_from_u64(7));
        let spec = RunSpec {
            output_directory: "/renders/001".to_string(),
            variable_assignments: vars.clone(),
        };

        let iterations: u32 = 200;
        let start = Instant::now();
        for _ in 0..iterations {
            let _ = patcher.patch(&doc, &spec);
        }
        let elapsed = start.elapsed();

        println!("Document: {} stage(s) x {} node(s)", stages, nodes);
        println!("  Time for {} iterations: {:?}", iterations, elapsed);
        println!("  Per patch: {:?}\n", elapsed / iterations);
    }

    println!("Expression Evaluation");
    println!("=====================\n");

    let parsed = match expr::parse("random.randint(0, 1000) * 2 + max([1, 2, 3])") {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("parse failed: {}", e);
            return;
        }
    };
    let mut rng = StdRng::seed_from_u64(7);
    let iterations: u32 = 1_000_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = parsed.eval(&mut rng);
    }
    let elapsed = start.elapsed();
    println!("  Time for {} evaluations: {:?}", iterations, elapsed);
    println!("  Per evaluation: {:?}", elapsed / iterations);
}
