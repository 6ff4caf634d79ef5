#![allow(dead_code)]

use std::path::PathBuf;

use node_forge_bake::dsl::{
    BakeScene, Endpoint, MaterialGraph, Metadata, Node, NodeGroup, NodeKind, SceneObject, Socket,
    SocketType, SocketValue, VertexColorLayer,
};

pub fn scene(objects: Vec<SceneObject>, materials: Vec<MaterialGraph>) -> BakeScene {
    BakeScene {
        version: "1.0".to_string(),
        metadata: Metadata {
            name: "scene".to_string(),
            created: None,
            modified: None,
        },
        objects,
        materials,
        groups: Vec::new(),
    }
}

/// A selected object with one UV map and the given material slots.
pub fn object(name: &str, materials: &[&str]) -> SceneObject {
    SceneObject {
        name: name.to_string(),
        material_slots: materials.iter().map(|m| Some(m.to_string())).collect(),
        vertex_colors: Vec::new(),
        uv_layers: vec!["UVMap".to_string()],
        hide_render: false,
        selected: true,
        active: false,
    }
}

pub fn layer(name: &str, active: bool, active_render: bool) -> VertexColorLayer {
    VertexColorLayer {
        name: name.to_string(),
        active,
        active_render,
    }
}

/// `out` (active) <- `bsdf` principled with the given input defaults.
pub fn principled(name: &str, inputs: &[(&str, SocketValue)]) -> MaterialGraph {
    let mut bsdf = Node::new("bsdf", NodeKind::PrincipledBsdf);
    for (socket, value) in inputs {
        bsdf = bsdf.with_input(socket, *value);
    }
    let mut m = MaterialGraph::new(name);
    m.add_node(Node::new("out", NodeKind::OutputMaterial).active())
        .unwrap();
    m.add_node(bsdf).unwrap();
    m.connect(Endpoint::new("bsdf", "BSDF"), Endpoint::new("out", "Surface"));
    m
}

/// Group `id` wrapping a principled BSDF with the given input defaults; its
/// only output is the shader on "BSDF".
pub fn shell_group(id: &str, inputs: &[(&str, SocketValue)]) -> NodeGroup {
    let mut bsdf = Node::new("bsdf", NodeKind::PrincipledBsdf);
    for (socket, value) in inputs {
        bsdf = bsdf.with_input(socket, *value);
    }
    let mut gout = Node::new("gout", NodeKind::GroupOutput);
    gout.inputs = vec![Socket::new("BSDF", SocketType::Shader, None)];
    let mut g = MaterialGraph::new(id);
    g.add_node(bsdf).unwrap();
    g.add_node(gout).unwrap();
    g.connect(Endpoint::new("bsdf", "BSDF"), Endpoint::new("gout", "BSDF"));
    NodeGroup {
        id: id.to_string(),
        nodes: g.nodes,
        links: g.links,
    }
}

/// `out` (active) <- instance `grp` of group `group_id`.
pub fn grouped(name: &str, group_id: &str) -> MaterialGraph {
    let mut grp = Node::new("grp", NodeKind::Group).with_param("groupId", serde_json::json!(group_id));
    grp.outputs = vec![Socket::new("BSDF", SocketType::Shader, None)];
    let mut m = MaterialGraph::new(name);
    m.add_node(Node::new("out", NodeKind::OutputMaterial).active())
        .unwrap();
    m.add_node(grp).unwrap();
    m.connect(Endpoint::new("grp", "BSDF"), Endpoint::new("out", "Surface"));
    m
}

pub fn color(r: f32, g: f32, b: f32) -> SocketValue {
    SocketValue::Color([r, g, b, 1.0])
}

/// Fresh, empty directory under the system temp dir.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("node-forge-bake-it-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn approx(a: [f32; 4], b: [f32; 4]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 0.01)
}
