//! CPU evaluation of constant color graphs.
//!
//! Only the nodes the export synthesizer emits for literal values are
//! understood; anything that needs geometry or lighting is an error.

use std::collections::{HashMap, HashSet};

use anyhow::{Result, bail};

use crate::dsl::{Endpoint, MaterialGraph, NodeKind, luminance, parse_str};

type Cache = HashMap<(String, String), [f32; 4]>;

/// Value of output socket `endpoint` as RGBA.
pub fn eval_output_color(graph: &MaterialGraph, endpoint: &Endpoint) -> Result<[f32; 4]> {
    let mut cache: Cache = HashMap::new();
    let mut visiting: HashSet<(String, String)> = HashSet::new();
    eval_output_inner(graph, &endpoint.node_id, &endpoint.socket, &mut cache, &mut visiting)
}

fn eval_input_color(
    graph: &MaterialGraph,
    node_id: &str,
    socket: &str,
    cache: &mut Cache,
    visiting: &mut HashSet<(String, String)>,
) -> Result<[f32; 4]> {
    if let Some(l) = graph.incoming(node_id, socket) {
        return eval_output_inner(graph, &l.from.node_id, &l.from.socket, cache, visiting);
    }
    let node = graph.find_node(node_id)?;
    let Some(s) = node.input(socket) else {
        bail!("node '{node_id}' has no input '{socket}'");
    };
    Ok(s.default_value.map(|v| v.as_color()).unwrap_or([0.0, 0.0, 0.0, 1.0]))
}

fn eval_input_f32(
    graph: &MaterialGraph,
    node_id: &str,
    socket: &str,
    cache: &mut Cache,
    visiting: &mut HashSet<(String, String)>,
) -> Result<f32> {
    if graph.incoming(node_id, socket).is_some() {
        let c = eval_input_color(graph, node_id, socket, cache, visiting)?;
        return Ok(luminance(c));
    }
    let node = graph.find_node(node_id)?;
    Ok(node
        .input(socket)
        .and_then(|s| s.default_value)
        .map(|v| v.as_float())
        .unwrap_or(0.0))
}

fn eval_output_inner(
    graph: &MaterialGraph,
    node_id: &str,
    out_port: &str,
    cache: &mut Cache,
    visiting: &mut HashSet<(String, String)>,
) -> Result<[f32; 4]> {
    let key = (node_id.to_string(), out_port.to_string());
    if let Some(v) = cache.get(&key) {
        return Ok(*v);
    }
    if visiting.contains(&key) {
        bail!("cycle detected while evaluating {node_id}.{out_port}");
    }
    visiting.insert(key.clone());

    let node = graph.find_node(node_id)?;

    let computed = match node.kind {
        NodeKind::Rgb | NodeKind::Value => {
            let Some(s) = node.output(out_port) else {
                bail!("unsupported {:?} output port: {out_port}", node.kind);
            };
            s.default_value.map(|v| v.as_color()).unwrap_or([0.0, 0.0, 0.0, 1.0])
        }
        NodeKind::MixRgb => {
            let fac = eval_input_f32(graph, node_id, "Fac", cache, visiting)?.clamp(0.0, 1.0);
            let a = eval_input_color(graph, node_id, "Color1", cache, visiting)?;
            let b = eval_input_color(graph, node_id, "Color2", cache, visiting)?;
            match parse_str(&node.params, "blendType").unwrap_or("MIX") {
                "MIX" => std::array::from_fn(|i| a[i] + (b[i] - a[i]) * fac),
                "ADD" => [a[0] + fac * b[0], a[1] + fac * b[1], a[2] + fac * b[2], a[3]],
                "MULTIPLY" => [
                    a[0] * (1.0 - fac + fac * b[0]),
                    a[1] * (1.0 - fac + fac * b[1]),
                    a[2] * (1.0 - fac + fac * b[2]),
                    a[3],
                ],
                other => bail!("unsupported MixRgb blend type '{other}' on node '{node_id}'"),
            }
        }
        NodeKind::RgbToBw => {
            let c = eval_input_color(graph, node_id, "Color", cache, visiting)?;
            let l = luminance(c);
            [l, l, l, 1.0]
        }
        NodeKind::Invert => {
            let fac = eval_input_f32(graph, node_id, "Fac", cache, visiting)?;
            let c = eval_input_color(graph, node_id, "Color", cache, visiting)?;
            let inv = |v: f32| v * (1.0 - fac) + (1.0 - v) * fac;
            [inv(c[0]), inv(c[1]), inv(c[2]), c[3]]
        }
        NodeKind::Emission => {
            let strength = eval_input_f32(graph, node_id, "Strength", cache, visiting)?;
            let c = eval_input_color(graph, node_id, "Color", cache, visiting)?;
            [c[0] * strength, c[1] * strength, c[2] * strength, c[3]]
        }
        other => bail!("cannot evaluate node '{node_id}' of kind {other:?} on the CPU"),
    };

    visiting.remove(&key);
    cache.insert(key, computed);
    Ok(computed)
}
