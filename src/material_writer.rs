//! Builds a principled material from a finished set of baked images.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::dsl::{Endpoint, MaterialGraph, Node, NodeKind};
use crate::jobs::tables::{
    BASE_COLOR_SOCKET, JOB_ALPHA, JOB_BUMP, JOB_CLEARCOAT_NORMAL, JOB_COLOR, JOB_DIFFUSE,
    JOB_DISPLACEMENT, JOB_GLOSSINESS, JOB_NORMAL,
};

const COLUMN_TEXTURES: f32 = -800.0;
const COLUMN_CONVERTERS: f32 = -400.0;
const ROW_SPACING: f32 = 300.0;

fn location(x: f32, y: f32) -> serde_json::Value {
    serde_json::json!([x, y])
}

fn is_color_data(job: &str) -> bool {
    matches!(job, JOB_COLOR | JOB_DIFFUSE) || job.starts_with("Vertex Color") || job == "Emission"
}

/// A material with one image-texture node per `(job, image path)` entry,
/// wired into a principled BSDF in entry order. Jobs with no matching
/// principled input keep an unconnected texture node.
pub fn assemble_material(name: &str, images: &[(String, PathBuf)]) -> Result<MaterialGraph> {
    let mut g = MaterialGraph::new(name);
    build(&mut g, images).with_context(|| format!("assembling material '{name}'"))?;
    Ok(g)
}

fn build(g: &mut MaterialGraph, images: &[(String, PathBuf)]) -> Result<()> {
    g.add_node(
        Node::new("output", NodeKind::OutputMaterial)
            .active()
            .with_param("location", location(400.0, 0.0)),
    )?;
    g.add_node(Node::new("principled", NodeKind::PrincipledBsdf).with_param("location", location(0.0, 0.0)))?;
    g.connect(Endpoint::new("principled", "BSDF"), Endpoint::new("output", "Surface"));

    let has_color = images.iter().any(|(job, _)| job == JOB_COLOR);
    let mut normal_feed: Option<Endpoint> = None;

    for (row, (job, path)) in images.iter().enumerate() {
        let y = -(row as f32) * ROW_SPACING;
        let tex_id = format!("tex.{job}");
        let color_space = if is_color_data(job) { "sRGB" } else { "Non-Color" };
        g.add_node(
            Node::new(tex_id.clone(), NodeKind::ImageTexture)
                .with_param("image", serde_json::json!(path.display().to_string()))
                .with_param("colorSpace", serde_json::json!(color_space))
                .with_param("label", serde_json::json!(job))
                .with_param("location", location(COLUMN_TEXTURES, y)),
        )?;
        let tex = Endpoint::new(tex_id, "Color");

        match job.as_str() {
            JOB_COLOR => g.connect(tex, Endpoint::new("principled", BASE_COLOR_SOCKET)),
            JOB_DIFFUSE if !has_color => g.connect(tex, Endpoint::new("principled", BASE_COLOR_SOCKET)),
            JOB_ALPHA => g.connect(tex, Endpoint::new("principled", "Alpha")),
            JOB_NORMAL | JOB_CLEARCOAT_NORMAL => {
                let id = format!("normal_map.{job}");
                g.add_node(Node::new(id.clone(), NodeKind::NormalMap).with_param("location", location(COLUMN_CONVERTERS, y)))?;
                g.connect(tex, Endpoint::new(id.clone(), "Color"));
                let normal = Endpoint::new(id, "Normal");
                if job == JOB_NORMAL {
                    normal_feed = Some(normal.clone());
                }
                g.connect(normal, Endpoint::new("principled", job.as_str()));
            }
            JOB_GLOSSINESS => {
                g.add_node(Node::new("invert", NodeKind::Invert).with_param("location", location(COLUMN_CONVERTERS, y)))?;
                g.connect(tex, Endpoint::new("invert", "Color"));
                g.connect(Endpoint::new("invert", "Color"), Endpoint::new("principled", "Roughness"));
            }
            JOB_DISPLACEMENT => {
                g.add_node(
                    Node::new("displacement", NodeKind::Displacement).with_param("location", location(COLUMN_CONVERTERS, y)),
                )?;
                g.connect(tex, Endpoint::new("displacement", "Height"));
                g.connect(
                    Endpoint::new("displacement", "Displacement"),
                    Endpoint::new("output", "Displacement"),
                );
            }
            JOB_BUMP => {
                g.add_node(Node::new("bump", NodeKind::Bump).with_param("location", location(COLUMN_CONVERTERS, y)))?;
                g.connect(tex, Endpoint::new("bump", "Height"));
                g.connect(Endpoint::new("bump", "Normal"), Endpoint::new("principled", "Normal"));
            }
            other => {
                let principled = g.find_node("principled")?;
                if principled.input(other).is_some() {
                    g.connect(tex, Endpoint::new("principled", other));
                }
            }
        }
    }

    // A normal map under a bump node feeds the bump instead of the BSDF.
    if let Some(normal) = normal_feed {
        if g.node("bump").is_some() {
            g.connect(normal, Endpoint::new("bump", "Normal"));
            g.connect(Endpoint::new("bump", "Normal"), Endpoint::new("principled", "Normal"));
        }
    }

    Ok(())
}
