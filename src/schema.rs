use std::collections::{HashMap, HashSet};

use anyhow::{Result, bail};

use crate::dsl::{MaterialGraph, NodeKind, Socket, SocketType, SocketValue};
use crate::graph::topo_sort;

/// Input/output sockets a node of some kind carries by default.
#[derive(Debug, Clone, Default)]
pub struct NodeTemplate {
    pub inputs: Vec<Socket>,
    pub outputs: Vec<Socket>,
}

fn color(name: &str, c: [f32; 4]) -> Socket {
    Socket::new(name, SocketType::Color, Some(SocketValue::Color(c)))
}

fn float(name: &str, v: f32) -> Socket {
    Socket::new(name, SocketType::Float, Some(SocketValue::Float(v)))
}

fn vector(name: &str) -> Socket {
    Socket::new(name, SocketType::Vector, None)
}

fn vector_value(name: &str, v: [f32; 3]) -> Socket {
    Socket::new(name, SocketType::Vector, Some(SocketValue::Vector(v)))
}

fn shader(name: &str) -> Socket {
    Socket::new(name, SocketType::Shader, None)
}

const GREY: [f32; 4] = [0.8, 0.8, 0.8, 1.0];
const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

pub fn template_for(kind: NodeKind) -> NodeTemplate {
    let (inputs, outputs) = match kind {
        NodeKind::PrincipledBsdf => (
            vec![
                color("Base Color", GREY),
                float("Subsurface", 0.0),
                vector_value("Subsurface Radius", [1.0, 0.2, 0.1]),
                color("Subsurface Color", GREY),
                float("Metallic", 0.0),
                float("Specular", 0.5),
                float("Specular Tint", 0.0),
                float("Roughness", 0.5),
                float("Anisotropic", 0.0),
                float("Anisotropic Rotation", 0.0),
                float("Sheen", 0.0),
                float("Sheen Tint", 0.5),
                float("Clearcoat", 0.0),
                float("Clearcoat Roughness", 0.03),
                float("IOR", 1.45),
                float("Transmission", 0.0),
                float("Transmission Roughness", 0.0),
                color("Emission", BLACK),
                float("Emission Strength", 1.0),
                float("Alpha", 1.0),
                vector("Normal"),
                vector("Clearcoat Normal"),
                vector("Tangent"),
            ],
            vec![shader("BSDF")],
        ),
        NodeKind::DiffuseBsdf => (
            vec![color("Color", GREY), float("Roughness", 0.0), vector("Normal")],
            vec![shader("BSDF")],
        ),
        NodeKind::GlossyBsdf => (
            vec![color("Color", GREY), float("Roughness", 0.5), vector("Normal")],
            vec![shader("BSDF")],
        ),
        NodeKind::GlassBsdf | NodeKind::RefractionBsdf => (
            vec![
                color("Color", WHITE),
                float("Roughness", 0.0),
                float("IOR", 1.45),
                vector("Normal"),
            ],
            vec![shader("BSDF")],
        ),
        NodeKind::TransparentBsdf => (vec![color("Color", WHITE)], vec![shader("BSDF")]),
        NodeKind::TranslucentBsdf => (
            vec![color("Color", GREY), vector("Normal")],
            vec![shader("BSDF")],
        ),
        NodeKind::SubsurfaceScattering => (
            vec![
                color("Color", GREY),
                float("Scale", 1.0),
                vector_value("Radius", [1.0, 1.0, 1.0]),
                vector("Normal"),
            ],
            vec![shader("BSSRDF")],
        ),
        NodeKind::Emission => (
            vec![color("Color", WHITE), float("Strength", 1.0)],
            vec![shader("Emission")],
        ),
        NodeKind::MixShader => (
            vec![float("Fac", 0.5), shader("Shader"), shader("Shader_001")],
            vec![shader("Shader")],
        ),
        NodeKind::AddShader => (
            vec![shader("Shader"), shader("Shader_001")],
            vec![shader("Shader")],
        ),
        NodeKind::MixRgb => (
            vec![
                float("Fac", 0.5),
                color("Color1", [0.5, 0.5, 0.5, 1.0]),
                color("Color2", [0.5, 0.5, 0.5, 1.0]),
            ],
            vec![color("Color", BLACK)],
        ),
        NodeKind::Invert => (
            vec![float("Fac", 1.0), color("Color", BLACK)],
            vec![color("Color", BLACK)],
        ),
        NodeKind::ImageTexture => (
            vec![vector("Vector")],
            vec![color("Color", BLACK), float("Alpha", 1.0)],
        ),
        NodeKind::Attribute => (
            vec![],
            vec![color("Color", BLACK), vector("Vector"), float("Fac", 0.0)],
        ),
        NodeKind::VertexColor => (vec![], vec![color("Color", BLACK), float("Alpha", 1.0)]),
        NodeKind::AmbientOcclusion => (
            vec![color("Color", WHITE), float("Distance", 1.0), vector("Normal")],
            vec![color("Color", WHITE), float("AO", 1.0)],
        ),
        NodeKind::Wireframe => (vec![float("Size", 0.01)], vec![float("Fac", 0.0)]),
        NodeKind::NormalMap => (
            vec![float("Strength", 1.0), color("Color", [0.5, 0.5, 1.0, 1.0])],
            vec![vector("Normal")],
        ),
        NodeKind::Bump => (
            vec![
                float("Strength", 1.0),
                float("Distance", 1.0),
                float("Height", 1.0),
                vector("Normal"),
            ],
            vec![vector("Normal")],
        ),
        NodeKind::Displacement => (
            vec![
                float("Height", 0.0),
                float("Midlevel", 0.5),
                float("Scale", 1.0),
                vector("Normal"),
            ],
            vec![vector("Displacement")],
        ),
        NodeKind::OutputMaterial => (
            vec![shader("Surface"), shader("Volume"), vector("Displacement")],
            vec![],
        ),
        NodeKind::Value => (vec![], vec![float("Value", 0.5)]),
        NodeKind::Rgb => (vec![], vec![color("Color", [0.5, 0.5, 0.5, 1.0])]),
        NodeKind::RgbToBw => (vec![color("Color", [0.5, 0.5, 0.5, 1.0])], vec![float("Val", 0.0)]),
        NodeKind::TexCoord => (
            vec![],
            vec![
                vector("Generated"),
                vector("Normal"),
                vector("UV"),
                vector("Object"),
            ],
        ),
        NodeKind::Mapping => (vec![vector("Vector")], vec![vector("Vector")]),
        // Group boundaries carry whatever sockets the scene declares.
        NodeKind::Group | NodeKind::GroupInput | NodeKind::GroupOutput | NodeKind::Other => {
            (vec![], vec![])
        }
    };
    NodeTemplate { inputs, outputs }
}

/// Structural check of one material graph: links must reference existing
/// nodes and sockets, each input socket takes at most one link, and the
/// graph must be acyclic.
pub fn validate_material(graph: &MaterialGraph) -> Result<()> {
    let nodes_by_id: HashMap<&str, _> = graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut errors: Vec<String> = Vec::new();

    if nodes_by_id.len() != graph.nodes.len() {
        errors.push("duplicate node ids".to_string());
    }

    let mut seen_dst: HashSet<(&str, &str)> = HashSet::new();
    for l in &graph.links {
        match nodes_by_id.get(l.from.node_id.as_str()) {
            None => errors.push(format!("link '{}' references missing node '{}'", l.id, l.from.node_id)),
            Some(n) if n.output(&l.from.socket).is_none() => errors.push(format!(
                "link '{}' references missing output '{}.{}'",
                l.id, l.from.node_id, l.from.socket
            )),
            Some(_) => {}
        }
        match nodes_by_id.get(l.to.node_id.as_str()) {
            None => errors.push(format!("link '{}' references missing node '{}'", l.id, l.to.node_id)),
            Some(n) if n.input(&l.to.socket).is_none() => errors.push(format!(
                "link '{}' references missing input '{}.{}'",
                l.id, l.to.node_id, l.to.socket
            )),
            Some(_) => {}
        }
        if !seen_dst.insert((l.to.node_id.as_str(), l.to.socket.as_str())) {
            errors.push(format!(
                "input '{}.{}' has more than one upstream link",
                l.to.node_id, l.to.socket
            ));
        }
    }

    if errors.is_empty() {
        if let Err(e) = topo_sort(graph) {
            errors.push(format!("{e}"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!(
            "material '{}' failed validation ({} error(s)):\n- {}",
            graph.name,
            errors.len(),
            errors.join("\n- ")
        )
    }
}
