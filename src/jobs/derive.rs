use anyhow::Result;
use log::{debug, info};

use super::tables::{
    DetectionTables, JOB_ALPHA, JOB_AMBIENT_OCCLUSION, JOB_BUMP, JOB_COLOR, JOB_DIFFUSE,
    JOB_DISPLACEMENT, JOB_EMISSION, JOB_GLASS_ALPHA, JOB_GLOSSINESS, JOB_MATERIAL_ID, JOB_NORMAL,
    JOB_TRANSLUCENT_ALPHA, JOB_VERTEX_COLOR, JOB_WIREFRAME, job_name_for_input,
};
use super::{Job, JobSet};
use crate::bake::group_expand::flatten_groups;
use crate::dsl::{BakeScene, MaterialGraph, Node, NodeKind, SceneObject, SocketValue};
use crate::graph::{active_output, bsdf_nodes, upstream_reachable};
use crate::settings::{BakeMode, BakeSettings, VertexColorPolicy};

/// Preview of the jobs a bake run over the current selection would execute.
pub fn detect_jobs(scene: &BakeScene, settings: &BakeSettings) -> Result<JobSet> {
    let objects = scene.selected_objects();
    derive_jobs(scene, &objects, settings.mode, settings)
}

/// The union of every enabled derivation strategy, in first-detection order.
pub fn derive_jobs(
    scene: &BakeScene,
    objects: &[&SceneObject],
    mode: BakeMode,
    settings: &BakeSettings,
) -> Result<JobSet> {
    let mut jobs = JobSet::default();

    // Without materials on the high-poly side only geometry can be baked.
    if mode == BakeMode::SelectedToActive && objects.iter().any(|o| !scene.has_usable_material(o)) {
        info!("selected-to-active: an object has no usable material, baking normals only");
        jobs.insert_name(JOB_NORMAL);
        return Ok(jobs);
    }

    for e in settings.job_list.enabled() {
        let mut job = match e.name.split_once(':') {
            Some((JOB_VERTEX_COLOR, layer)) => Job::vertex_color(layer),
            _ => Job::new(e.name.clone()),
        };
        job.suffix = e.suffix.clone();
        job.samples = e.samples;
        job.color_depth = e.color_depth;
        jobs.insert(job);
    }

    // Detection reads through node groups, the same way isolation will.
    let flat = materials_of(scene, objects)
        .into_iter()
        .map(|m| flatten_groups(m, &scene.groups))
        .collect::<Result<Vec<_>>>()?;
    let materials: Vec<&MaterialGraph> = flat.iter().collect();

    if settings.use_autodetect && settings.detect_value_differs {
        let found = value_differs(&materials, &settings.tables)?;
        debug!("value-differs detection: {found:?}");
        for name in found {
            jobs.insert_name(&name);
        }
    }

    if settings.use_autodetect && settings.detect_connected_inputs {
        let found = connected_inputs(&materials, &settings.tables, settings.use_bump)?;
        debug!("connected-inputs detection: {found:?}");
        for name in found {
            jobs.insert_name(&name);
        }
    }

    for (enabled, name) in [
        (settings.bake_diffuse, JOB_DIFFUSE),
        (settings.bake_glossiness, JOB_GLOSSINESS),
        (settings.use_bump, JOB_BUMP),
        (settings.bake_material_id, JOB_MATERIAL_ID),
        (settings.bake_wireframe, JOB_WIREFRAME),
    ] {
        if enabled {
            jobs.insert_name(name);
        }
    }

    if settings.bake_vertex_colors {
        for o in objects {
            for layer in vertex_color_layers(o, settings.vertex_color_policy) {
                jobs.insert(Job::vertex_color(layer));
            }
        }
    }

    if settings.use_alpha_to_color && settings.color_mode.has_alpha() {
        jobs.insert_name(JOB_COLOR);
        jobs.insert_name(JOB_ALPHA);
    }

    info!("derived {} bake job(s): {}", jobs.len(), jobs.names().join(", "));
    Ok(jobs)
}

fn materials_of<'a>(scene: &'a BakeScene, objects: &[&SceneObject]) -> Vec<&'a MaterialGraph> {
    let mut out: Vec<&MaterialGraph> = Vec::new();
    for o in objects {
        for m in scene.object_materials(o) {
            if !out.iter().any(|x| x.name == m.name) {
                out.push(m);
            }
        }
    }
    out
}

/// Comparable inputs whose literal value is not the same on every BSDF node
/// feeding the materials' active outputs. Linked inputs carry no literal and
/// are left to [`connected_inputs`].
pub fn value_differs(materials: &[&MaterialGraph], tables: &DetectionTables) -> Result<Vec<String>> {
    let mut bsdfs: Vec<(&MaterialGraph, &Node)> = Vec::new();
    for m in materials {
        for n in bsdf_nodes(m)? {
            bsdfs.push((m, n));
        }
    }

    let mut found = Vec::new();
    for input in &tables.comparable_inputs {
        let values: Vec<SocketValue> = bsdfs
            .iter()
            .filter(|(m, n)| m.incoming(&n.id, input).is_none())
            .filter_map(|(_, n)| n.input(input).and_then(|s| s.default_value))
            .collect();
        let Some(first) = values.first() else {
            continue;
        };
        if values.iter().any(|v| v != first) {
            let name = job_name_for_input(input).to_string();
            if !found.contains(&name) {
                found.push(name);
            }
        }
    }
    Ok(found)
}

/// Jobs implied by what is wired into each material's active output.
pub fn connected_inputs(
    materials: &[&MaterialGraph],
    tables: &DetectionTables,
    use_bump: bool,
) -> Result<Vec<String>> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        if !found.iter().any(|f| f == name) {
            found.push(name.to_string());
        }
    };

    for m in materials {
        let Some(out) = active_output(m) else {
            continue;
        };
        for id in upstream_reachable(m, &out.id)? {
            let Some(n) = m.node(&id) else {
                continue;
            };
            match n.kind {
                NodeKind::TransparentBsdf => push(JOB_ALPHA),
                NodeKind::TranslucentBsdf => push(JOB_TRANSLUCENT_ALPHA),
                NodeKind::GlassBsdf => push(JOB_GLASS_ALPHA),
                NodeKind::Emission => push(JOB_EMISSION),
                NodeKind::AmbientOcclusion => push(JOB_AMBIENT_OCCLUSION),
                NodeKind::Bump if use_bump => push(JOB_BUMP),
                _ => {}
            }
            if n.kind.is_bsdf() {
                for input in &tables.connected_inputs {
                    if n.input(input).is_some() && m.incoming(&n.id, input).is_some() {
                        push(job_name_for_input(input));
                    }
                }
            }
        }
        if m.incoming(&out.id, "Displacement").is_some() {
            push(JOB_DISPLACEMENT);
        }
    }
    Ok(found)
}

pub fn vertex_color_layers(object: &SceneObject, policy: VertexColorPolicy) -> Vec<&str> {
    let layers = &object.vertex_colors;
    match policy {
        VertexColorPolicy::All => layers.iter().map(|l| l.name.as_str()).collect(),
        VertexColorPolicy::Active => layers
            .iter()
            .filter(|l| l.active)
            .map(|l| l.name.as_str())
            .collect(),
        VertexColorPolicy::ActiveRender => layers
            .iter()
            .filter(|l| l.active_render)
            .map(|l| l.name.as_str())
            .collect(),
        VertexColorPolicy::Index(i) => layers.get(i).map(|l| l.name.as_str()).into_iter().collect(),
    }
}
