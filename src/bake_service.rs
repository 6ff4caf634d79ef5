//! Collaborators a bake run drives but does not implement: the renderer's
//! bake call and UV unwrapping.

use anyhow::{Result, anyhow, bail};
use image::{Rgba, Rgba32FImage};
use log::debug;

use crate::bake::types::{BakeKind, BakeRequest, SENTINEL_BLACK, SENTINEL_FLAT_NORMAL};
use crate::dsl::{BakeScene, MaterialGraph, SceneObject, TAG_BAKE_TARGET, parse_str};
use crate::eval::eval_output_color;
use crate::graph::active_output;
use crate::settings::UvUnwrapMethod;

/// Renders one bake pass over the prepared scene.
///
/// The service reads whatever output is active on each participating
/// material and writes into the image named by `request.image`.
pub trait BakeService {
    fn bake(&mut self, scene: &BakeScene, request: &BakeRequest) -> Result<Rgba32FImage>;
    fn samples(&self) -> u32;
    fn set_samples(&mut self, samples: u32);
}

pub trait UvUnwrapService {
    fn smart_project(&mut self, object: &mut SceneObject, angle_limit: f32, island_margin: f32) -> Result<()>;
    fn lightmap_pack(&mut self, object: &mut SceneObject, quality: u32, margin: f32) -> Result<()>;
}

pub fn unwrap_uvs(service: &mut dyn UvUnwrapService, object: &mut SceneObject, method: &UvUnwrapMethod) -> Result<()> {
    match *method {
        UvUnwrapMethod::SmartProject {
            angle_limit,
            island_margin,
        } => service.smart_project(object, angle_limit, island_margin),
        UvUnwrapMethod::LightmapPack { quality, margin } => service.lightmap_pack(object, quality, margin),
    }
}

/// Bake service for constant materials.
///
/// Emission bakes evaluate each material's active surface on the CPU and
/// paint one vertical strip per material; normal bakes produce a flat normal.
/// Diffuse bakes need lighting and are refused.
#[derive(Debug, Default)]
pub struct FlatBaker {
    samples: u32,
    /// Every request received, with the sample count in effect at the time.
    pub calls: Vec<(BakeRequest, u32)>,
}

impl FlatBaker {
    pub fn new() -> Self {
        Self {
            samples: 1,
            calls: Vec::new(),
        }
    }
}

fn surface_color(graph: &MaterialGraph) -> Result<[f32; 4]> {
    let Some(out) = active_output(graph) else {
        return Ok(SENTINEL_BLACK);
    };
    match graph.incoming(&out.id, "Surface") {
        Some(l) => eval_output_color(graph, &l.from),
        None => Ok(SENTINEL_BLACK),
    }
}

fn targets_image(graph: &MaterialGraph, image: &str) -> bool {
    graph
        .nodes
        .iter()
        .any(|n| n.has_tag(TAG_BAKE_TARGET) && parse_str(&n.params, "image") == Some(image))
}

impl BakeService for FlatBaker {
    fn bake(&mut self, scene: &BakeScene, request: &BakeRequest) -> Result<Rgba32FImage> {
        self.calls.push((request.clone(), self.samples));

        if !scene.materials.iter().any(|m| targets_image(m, &request.image)) {
            bail!("no image node targets '{}'", request.image);
        }

        let (w, h) = (request.width, request.height);
        match request.kind {
            BakeKind::Normal => Ok(Rgba32FImage::from_pixel(w, h, Rgba(SENTINEL_FLAT_NORMAL))),
            BakeKind::Diffuse => bail!("diffuse bakes need a lighting renderer"),
            BakeKind::Emit => {
                // With selected-to-active the last object only receives the bake.
                let sources = match request.objects.split_last() {
                    Some((_, rest)) if request.selected_to_active => rest,
                    _ => request.objects.as_slice(),
                };
                let mut colors: Vec<[f32; 4]> = Vec::new();
                let mut seen: Vec<&str> = Vec::new();
                for name in sources {
                    let object = scene
                        .object(name)
                        .ok_or_else(|| anyhow!("object not found: {name}"))?;
                    for m in scene.object_materials(object) {
                        if seen.contains(&m.name.as_str()) {
                            continue;
                        }
                        seen.push(&m.name);
                        colors.push(surface_color(m)?);
                    }
                }
                if colors.is_empty() {
                    colors.push(SENTINEL_BLACK);
                }
                debug!("flat bake of '{}': {} material strip(s)", request.image, colors.len());

                let n = colors.len() as u32;
                Ok(Rgba32FImage::from_fn(w, h, |x, _| {
                    let i = ((x as u64 * n as u64) / w.max(1) as u64) as usize;
                    Rgba(colors[i.min(colors.len() - 1)])
                }))
            }
        }
    }

    fn samples(&self) -> u32 {
        self.samples
    }

    fn set_samples(&mut self, samples: u32) {
        self.samples = samples;
    }
}

/// Adds a single generated UV layer, whichever method is asked for.
#[derive(Debug, Default)]
pub struct LayerUvUnwrap {
    pub layer_name: Option<String>,
}

impl LayerUvUnwrap {
    fn add_layer(&self, object: &mut SceneObject, method: &str) {
        let name = self.layer_name.clone().unwrap_or_else(|| "UVMap".to_string());
        if !object.uv_layers.contains(&name) {
            object.uv_layers.push(name);
        }
        debug!("object '{}': generated UVs ({method})", object.name);
    }
}

impl UvUnwrapService for LayerUvUnwrap {
    fn smart_project(&mut self, object: &mut SceneObject, _angle_limit: f32, _island_margin: f32) -> Result<()> {
        self.add_layer(object, "smart project");
        Ok(())
    }

    fn lightmap_pack(&mut self, object: &mut SceneObject, _quality: u32, _margin: f32) -> Result<()> {
        self.add_layer(object, "lightmap pack");
        Ok(())
    }
}
