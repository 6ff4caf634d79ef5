use std::collections::HashSet;

use anyhow::{Result, anyhow, bail};
use log::debug;

use super::group_expand::expand_scratch_groups;
use super::scratch::clone_upstream;
use super::types::{AlphaVariant, BakeTarget, OPAQUE_COLOR, TRANSPARENT_COLOR, WHITE};
use crate::dsl::{
    Endpoint, MaterialGraph, Node, NodeGroup, NodeKind, OutputTarget, SocketType, SocketValue,
    TAG_BAKE_TARGET, TAG_SCRATCH, TAG_SYNTH_MIX, TAG_SYNTH_OUTPUT, parse_str,
};
use crate::graph::{
    active_output, downstream_links, find_upstream_input, find_upstream_of_kind, upstream_reachable,
};

const CLONE_PREFIX: &str = "bake.tmp/";
const SYNTH_PREFIX: &str = "bake.synth/";

const TRANSPARENT_SLOTS_PARAM: &str = "transparentSlots";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsolateOptions {
    pub exclude_transparent_colors: bool,
}

impl Default for IsolateOptions {
    fn default() -> Self {
        Self {
            exclude_transparent_colors: true,
        }
    }
}

/// Nodes a prepared material gained for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportNodes {
    /// Image node the renderer writes into.
    pub image_node: String,
    /// Synthetic active output; `None` when the job renders the original shading.
    pub output: Option<String>,
    /// Socket wired into the synthetic emission, if isolation found one.
    pub source: Option<Endpoint>,
}

/// Adds a scratch-tagged node with a fresh id starting with `base`.
fn add_scratch_node(graph: &mut MaterialGraph, base: &str, node: Node) -> Result<String> {
    let mut n = 0usize;
    let id = loop {
        let candidate = format!("{base}.{n}");
        if graph.node(&candidate).is_none() {
            break candidate;
        }
        n += 1;
    };
    let mut node = node;
    node.id = id.clone();
    node.tags.insert(TAG_SCRATCH.to_string());
    graph.add_node(node)?;
    Ok(id)
}

/// Image node the bake writes into. Idempotent per material and image.
pub fn install_bake_target(graph: &mut MaterialGraph, image_name: &str) -> Result<String> {
    if let Some(existing) = graph.nodes.iter().find(|n| {
        n.has_tag(TAG_BAKE_TARGET) && parse_str(&n.params, "image") == Some(image_name)
    }) {
        return Ok(existing.id.clone());
    }
    let mut node = Node::new("", NodeKind::ImageTexture)
        .with_param("image", serde_json::json!(image_name));
    node.tags.insert(TAG_BAKE_TARGET.to_string());
    add_scratch_node(graph, &format!("{SYNTH_PREFIX}image"), node)
}

/// Rewrite `graph` so that its active output emits exactly the value `target`
/// isolates, and mark an image node for the renderer to write into.
///
/// The original nodes are never modified apart from their active-output flag;
/// every node added here is scratch-tagged so teardown can remove it.
pub fn prepare_export(
    graph: &mut MaterialGraph,
    groups: &[NodeGroup],
    target: &BakeTarget,
    options: IsolateOptions,
    image_name: &str,
) -> Result<ExportNodes> {
    let image_node = install_bake_target(graph, image_name)?;

    if !matches!(target.bake_kind(), super::types::BakeKind::Emit) {
        return Ok(ExportNodes {
            image_node,
            output: None,
            source: None,
        });
    }

    let source = match active_output(graph).map(|n| n.id.clone()) {
        Some(out) => {
            let map = clone_upstream(graph, &out, CLONE_PREFIX)?;
            expand_scratch_groups(graph, groups)?;
            let cloned = map
                .get(&out)
                .ok_or_else(|| anyhow!("clone of output '{out}' missing"))?
                .clone();
            isolate(graph, &cloned, target, options)?
        }
        None => {
            debug!("material '{}': no active output, baking sentinel", graph.name);
            None
        }
    };

    for n in graph.nodes.iter_mut().filter(|n| n.kind == NodeKind::OutputMaterial) {
        n.is_active_output = false;
    }

    let emission = Node::new("", NodeKind::Emission)
        .with_input("Color", SocketValue::Color(target.sentinel()))
        .with_input("Strength", SocketValue::Float(1.0));
    let emission = add_scratch_node(graph, &format!("{SYNTH_PREFIX}emission"), emission)?;
    if let Some(ep) = &source {
        graph.connect(ep.clone(), Endpoint::new(emission.clone(), "Color"));
    }

    let mut output = Node::new("", NodeKind::OutputMaterial).active();
    output.target = OutputTarget::All;
    output.tags.insert(TAG_SYNTH_OUTPUT.to_string());
    let output = add_scratch_node(graph, &format!("{SYNTH_PREFIX}output"), output)?;
    graph.connect(
        Endpoint::new(emission, "Emission"),
        Endpoint::new(output.clone(), "Surface"),
    );

    Ok(ExportNodes {
        image_node,
        output: Some(output),
        source,
    })
}

/// Synthesize, starting at the (cloned) output node `output_id`, a path that
/// carries only the value `target` names. Returns the socket carrying it, or
/// `None` when nothing in the reachable subgraph matches.
pub fn isolate(
    graph: &mut MaterialGraph,
    output_id: &str,
    target: &BakeTarget,
    options: IsolateOptions,
) -> Result<Option<Endpoint>> {
    let mut iso = Isolator {
        graph,
        target,
        options,
        on_path: HashSet::new(),
    };

    let found = match target {
        BakeTarget::Input(_) => iso.visit(output_id)?,
        BakeTarget::AmbientOcclusion => {
            let found = iso.visit(output_id)?;
            iso.ao_cleanup()?;
            found
        }
        BakeTarget::Glossiness => match iso.visit(output_id)? {
            Some(roughness) => Some(iso.invert(roughness)?),
            None => None,
        },
        BakeTarget::Alpha(variant) => iso.alpha_factor(output_id, *variant)?,
        BakeTarget::Displacement => iso.displacement(output_id)?,
        BakeTarget::Bump => iso.bump(output_id)?,
        BakeTarget::MaterialId => {
            let color = material_id_color(&iso.graph.name);
            Some(iso.constant_color(color)?)
        }
        BakeTarget::Wireframe => {
            let id = iso.synth("wireframe", Node::new("", NodeKind::Wireframe))?;
            Some(Endpoint::new(id, "Fac"))
        }
        BakeTarget::VertexColor(layer) => {
            let node = Node::new("", NodeKind::VertexColor).with_param("layerName", serde_json::json!(layer));
            let id = iso.synth("vertex_color", node)?;
            Some(Endpoint::new(id, "Color"))
        }
        BakeTarget::Normal | BakeTarget::Diffuse => None,
    };

    debug!(
        "material '{}': isolated {target:?} -> {}",
        iso.graph.name,
        found
            .as_ref()
            .map(|e| format!("{}:{}", e.node_id, e.socket))
            .unwrap_or_else(|| "nothing".to_string())
    );
    Ok(found)
}

/// Deterministic display color for a material name (32-bit FNV-1a).
pub fn material_id_color(name: &str) -> [f32; 4] {
    let mut h: u32 = 0x811c_9dc5;
    for b in name.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    let [r, g, b, _] = h.to_le_bytes();
    [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, 1.0]
}

struct Isolator<'g> {
    graph: &'g mut MaterialGraph,
    target: &'g BakeTarget,
    options: IsolateOptions,
    on_path: HashSet<String>,
}

impl Isolator<'_> {
    fn synth(&mut self, label: &str, node: Node) -> Result<String> {
        add_scratch_node(self.graph, &format!("{SYNTH_PREFIX}{label}"), node)
    }

    fn constant_color(&mut self, c: [f32; 4]) -> Result<Endpoint> {
        let node = Node::new("", NodeKind::Rgb).with_output("Color", SocketValue::Color(c));
        Ok(Endpoint::new(self.synth("rgb", node)?, "Color"))
    }

    fn constant_value(&mut self, v: f32) -> Result<Endpoint> {
        let node = Node::new("", NodeKind::Value).with_output("Value", SocketValue::Float(v));
        Ok(Endpoint::new(self.synth("value", node)?, "Value"))
    }

    fn invert(&mut self, from: Endpoint) -> Result<Endpoint> {
        let node = Node::new("", NodeKind::Invert).with_input("Fac", SocketValue::Float(1.0));
        let id = self.synth("invert", node)?;
        self.graph.connect(from, Endpoint::new(id.clone(), "Color"));
        Ok(Endpoint::new(id, "Color"))
    }

    fn color_mix(&mut self, blend: &str) -> Result<String> {
        let mut node = Node::new("", NodeKind::MixRgb).with_param("blendType", serde_json::json!(blend));
        node.tags.insert(TAG_SYNTH_MIX.to_string());
        self.synth("mix", node)
    }

    fn excludes_transparent(&self) -> bool {
        self.options.exclude_transparent_colors && self.target.is_color_family()
    }

    fn kind_of(&self, node_id: &str) -> Result<NodeKind> {
        Ok(self.graph.find_node(node_id)?.kind)
    }

    fn visit(&mut self, node_id: &str) -> Result<Option<Endpoint>> {
        if !self.on_path.insert(node_id.to_string()) {
            bail!(
                "cycle detected while isolating {:?} at node '{node_id}' (material '{}')",
                self.target,
                self.graph.name
            );
        }
        let found = self.dispatch(node_id);
        self.on_path.remove(node_id);
        found
    }

    fn dispatch(&mut self, node_id: &str) -> Result<Option<Endpoint>> {
        let kind = self.kind_of(node_id)?;
        match kind {
            NodeKind::OutputMaterial => self.follow(node_id, "Surface"),
            NodeKind::MixShader => self.mix_shader(node_id),
            NodeKind::AddShader => self.add_shader(node_id),
            _ if *self.target == BakeTarget::AmbientOcclusion => self.ambient_occlusion(node_id, kind),
            NodeKind::Emission => self.emission(node_id),
            _ => self.generic(node_id),
        }
    }

    fn follow(&mut self, node_id: &str, socket: &str) -> Result<Option<Endpoint>> {
        let Some(l) = self.graph.incoming(node_id, socket) else {
            return Ok(None);
        };
        let up = l.from.node_id.clone();
        self.visit(&up)
    }

    fn mix_shader(&mut self, node_id: &str) -> Result<Option<Endpoint>> {
        if self.target.socket_name() == Some("Fac") {
            return self.socket_value(node_id, "Fac");
        }

        let mix = self.color_mix("MIX")?;
        match self.graph.incoming(node_id, "Fac").map(|l| l.from.clone()) {
            Some(from) => self.graph.connect(from, Endpoint::new(mix.clone(), "Fac")),
            None => {
                let fac = self
                    .graph
                    .find_node(node_id)?
                    .input("Fac")
                    .and_then(|s| s.default_value)
                    .unwrap_or(SocketValue::Float(0.5));
                self.graph.set_input_default(&mix, "Fac", fac)?;
            }
        }
        let sentinel = SocketValue::Color(self.target.sentinel());
        self.graph.set_input_default(&mix, "Color1", sentinel)?;
        self.graph.set_input_default(&mix, "Color2", sentinel)?;

        let mut transparent_slots: Vec<&str> = Vec::new();
        let mut any = false;
        for (branch, slot, sibling) in [("Shader", "Color1", "Color2"), ("Shader_001", "Color2", "Color1")] {
            let Some(origin) = self.graph.incoming(node_id, branch).map(|l| l.from.node_id.clone()) else {
                continue;
            };
            if self.excludes_transparent() && self.kind_of(&origin)?.is_transparent_family() {
                self.graph
                    .set_input_default(&mix, slot, SocketValue::Color(TRANSPARENT_COLOR))?;
                if !transparent_slots.contains(&sibling) {
                    self.graph
                        .set_input_default(&mix, sibling, SocketValue::Color(OPAQUE_COLOR))?;
                }
                transparent_slots.push(slot);
                any = true;
                continue;
            }
            if let Some(ep) = self.visit(&origin)? {
                self.graph.connect(ep, Endpoint::new(mix.clone(), slot));
                any = true;
            }
        }

        if !any {
            self.graph.remove_nodes_where(|n| n.id == mix);
            return Ok(None);
        }
        if !transparent_slots.is_empty() {
            self.graph
                .find_node_mut(&mix)?
                .params
                .insert(TRANSPARENT_SLOTS_PARAM.to_string(), serde_json::json!(transparent_slots));
        }
        Ok(Some(Endpoint::new(mix, "Color")))
    }

    fn add_shader(&mut self, node_id: &str) -> Result<Option<Endpoint>> {
        let mix = self.color_mix("ADD")?;
        self.graph.set_input_default(&mix, "Fac", SocketValue::Float(1.0))?;
        self.graph
            .set_input_default(&mix, "Color1", SocketValue::Color([0.0; 4]))?;
        self.graph
            .set_input_default(&mix, "Color2", SocketValue::Color([0.0; 4]))?;

        let mut any = false;
        for (branch, slot) in [("Shader", "Color1"), ("Shader_001", "Color2")] {
            let Some(origin) = self.graph.incoming(node_id, branch).map(|l| l.from.node_id.clone()) else {
                continue;
            };
            if let Some(ep) = self.visit(&origin)? {
                self.graph.connect(ep, Endpoint::new(mix.clone(), slot));
                any = true;
            }
        }
        if !any {
            self.graph.remove_nodes_where(|n| n.id == mix);
            return Ok(None);
        }
        Ok(Some(Endpoint::new(mix, "Color")))
    }

    // Emission color only feeds the dedicated emission job.
    fn emission(&mut self, node_id: &str) -> Result<Option<Endpoint>> {
        match self.target.socket_name() {
            Some("Emission") => self.socket_value(node_id, "Color"),
            Some("Emission Strength") => self.socket_value(node_id, "Strength"),
            _ => Ok(None),
        }
    }

    fn generic(&mut self, node_id: &str) -> Result<Option<Endpoint>> {
        let Some(name) = self.target.socket_name().map(str::to_string) else {
            return Ok(None);
        };
        let node = self.graph.find_node(node_id)?;
        let socket = if name == "Color" && node.input(crate::jobs::tables::BASE_COLOR_SOCKET).is_some() {
            crate::jobs::tables::BASE_COLOR_SOCKET.to_string()
        } else {
            name
        };
        if node.input(&socket).is_some() {
            return self.socket_value(node_id, &socket);
        }

        // Pass-through: the target may sit further upstream.
        let ups: Vec<String> = node
            .inputs
            .iter()
            .filter_map(|s| self.graph.incoming(node_id, &s.name))
            .map(|l| l.from.node_id.clone())
            .collect();
        for up in ups {
            if let Some(ep) = self.visit(&up)? {
                return Ok(Some(ep));
            }
        }
        Ok(None)
    }

    /// The value on input `socket` of `node_id`, as a socket a synthetic
    /// emission can read.
    fn socket_value(&mut self, node_id: &str, socket: &str) -> Result<Option<Endpoint>> {
        let node = self.graph.find_node(node_id)?;
        let s = node
            .input(socket)
            .ok_or_else(|| anyhow!("node '{node_id}' has no input '{socket}'"))?;
        let socket_type = s.socket_type;
        let default = s.default_value;
        let link = self.graph.incoming(node_id, socket).map(|l| l.from.clone());

        match (socket_type, link) {
            (SocketType::Color, Some(from)) => {
                self.neutralize_transparent()?;
                Ok(Some(from))
            }
            (SocketType::Color, None) => {
                let c = default.map(|v| v.as_color()).unwrap_or(self.target.sentinel());
                Ok(Some(self.constant_color(c)?))
            }
            (SocketType::Float, Some(from)) => {
                if self.graph.output_socket_type(&from) == Some(SocketType::Color) {
                    let bw = self.synth("rgb_to_bw", Node::new("", NodeKind::RgbToBw))?;
                    self.graph.connect(from, Endpoint::new(bw.clone(), "Color"));
                    return Ok(Some(Endpoint::new(bw, "Val")));
                }
                Ok(Some(from))
            }
            (SocketType::Float, None) => {
                let v = default.map(|v| v.as_float()).unwrap_or(0.0);
                Ok(Some(self.constant_value(v)?))
            }
            (SocketType::Vector, Some(from)) => {
                if self.target.is_normal_family() && self.kind_of(&from.node_id)? == NodeKind::NormalMap {
                    return self.normal_map_color(&from.node_id);
                }
                Ok(Some(from))
            }
            (SocketType::Vector, None) => Ok(None),
            (SocketType::Shader, Some(from)) => self.visit(&from.node_id),
            (SocketType::Shader, None) => Ok(None),
        }
    }

    // A normal map's color input is already the tangent-space image.
    fn normal_map_color(&mut self, node_id: &str) -> Result<Option<Endpoint>> {
        if let Some(l) = self.graph.incoming(node_id, "Color") {
            return Ok(Some(l.from.clone()));
        }
        let c = self
            .graph
            .find_node(node_id)?
            .input("Color")
            .and_then(|s| s.default_value)
            .map(|v| v.as_color())
            .unwrap_or(self.target.sentinel());
        Ok(Some(self.constant_color(c)?))
    }

    /// Keep transparent-family branches recorded on synthetic mixes unlinked
    /// and neutral, even if a later step wired something into them.
    fn neutralize_transparent(&mut self) -> Result<()> {
        if !self.excludes_transparent() {
            return Ok(());
        }
        let marked: Vec<(String, Vec<String>)> = self
            .graph
            .nodes
            .iter()
            .filter(|n| n.has_tag(TAG_SYNTH_MIX))
            .filter_map(|n| {
                let slots = n.params.get(TRANSPARENT_SLOTS_PARAM)?.as_array()?;
                let slots = slots.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
                Some((n.id.clone(), slots))
            })
            .collect();
        for (id, slots) in marked {
            for slot in &slots {
                self.graph.disconnect(&id, slot);
                self.graph
                    .set_input_default(&id, slot, SocketValue::Color(TRANSPARENT_COLOR))?;
                let sibling = if slot == "Color1" { "Color2" } else { "Color1" };
                if !slots.iter().any(|s| s == sibling) && self.graph.incoming(&id, sibling).is_none() {
                    self.graph
                        .set_input_default(&id, sibling, SocketValue::Color(OPAQUE_COLOR))?;
                }
            }
        }
        Ok(())
    }

    fn reaches_ao(&self, node_id: &str) -> Result<bool> {
        Ok(upstream_reachable(&*self.graph, node_id)?
            .iter()
            .any(|id| self.graph.node(id).is_some_and(|n| n.kind == NodeKind::AmbientOcclusion)))
    }

    fn ambient_occlusion(&mut self, node_id: &str, kind: NodeKind) -> Result<Option<Endpoint>> {
        match kind {
            NodeKind::AmbientOcclusion => Ok(Some(Endpoint::new(node_id, "AO"))),
            NodeKind::MixRgb => self.ao_color_mix(node_id),
            _ => {
                let linked: Vec<Endpoint> = self
                    .graph
                    .find_node(node_id)?
                    .inputs
                    .iter()
                    .filter_map(|s| self.graph.incoming(node_id, &s.name))
                    .map(|l| l.from.clone())
                    .collect();
                for from in linked {
                    if !self.reaches_ao(&from.node_id)? {
                        continue;
                    }
                    let up_kind = self.kind_of(&from.node_id)?;
                    if up_kind.is_bsdf()
                        || up_kind.is_shader_combinator()
                        || matches!(
                            up_kind,
                            NodeKind::Emission | NodeKind::MixRgb | NodeKind::AmbientOcclusion
                        )
                    {
                        return self.visit(&from.node_id);
                    }
                    return Ok(Some(from));
                }
                Ok(None)
            }
        }
    }

    // Rewires a cloned color mix in place so only its AO branch shows.
    fn ao_color_mix(&mut self, node_id: &str) -> Result<Option<Endpoint>> {
        let mut has_ao = [false; 2];
        for (i, slot) in ["Color1", "Color2"].into_iter().enumerate() {
            let Some(up) = self.graph.incoming(node_id, slot).map(|l| l.from.node_id.clone()) else {
                continue;
            };
            if !self.reaches_ao(&up)? {
                continue;
            }
            has_ao[i] = true;
            if let Some(ep) = self.visit(&up)? {
                self.graph.connect(ep, Endpoint::new(node_id, slot));
            }
        }
        if has_ao == [false, false] {
            return Ok(None);
        }
        self.keep_ao_branches(node_id, has_ao)?;
        Ok(Some(Endpoint::new(node_id, "Color")))
    }

    fn keep_ao_branches(&mut self, mix: &str, has_ao: [bool; 2]) -> Result<()> {
        for (i, slot) in ["Color1", "Color2"].into_iter().enumerate() {
            if !has_ao[i] {
                self.graph.disconnect(mix, slot);
                self.graph.set_input_default(mix, slot, SocketValue::Color(WHITE))?;
            }
        }
        let fac = match has_ao {
            [true, false] => 0.0,
            [false, true] => 1.0,
            _ => return Ok(()),
        };
        self.graph.disconnect(mix, "Fac");
        self.graph.set_input_default(mix, "Fac", SocketValue::Float(fac))
    }

    /// Final AO pass over the synthetic shader mixes: branches without an AO
    /// node upstream become opaque white and the factor selects the AO side.
    fn ao_cleanup(&mut self) -> Result<()> {
        let mixes: Vec<String> = self
            .graph
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::MixRgb && n.has_tag(TAG_SYNTH_MIX))
            .map(|n| n.id.clone())
            .collect();
        for mix in mixes {
            let mut has_ao = [false; 2];
            for (i, slot) in ["Color1", "Color2"].into_iter().enumerate() {
                if let Some(up) = self.graph.incoming(&mix, slot).map(|l| l.from.node_id.clone()) {
                    has_ao[i] = self.reaches_ao(&up)?;
                }
            }
            if has_ao != [false, false] {
                self.keep_ao_branches(&mix, has_ao)?;
            }
        }
        Ok(())
    }

    /// Alpha of a transparent-family shader: the factor of the shader mix it
    /// feeds, arranged so 1.0 means opaque.
    fn alpha_factor(&mut self, output_id: &str, variant: AlphaVariant) -> Result<Option<Endpoint>> {
        let Some(found) = find_upstream_of_kind(&*self.graph, output_id, variant.node_kind())? else {
            if variant == AlphaVariant::Transparent {
                return self.visit(output_id);
            }
            return Ok(None);
        };
        let mix = downstream_links(&*self.graph, &found)
            .into_iter()
            .find(|l| {
                self.graph
                    .node(&l.to.node_id)
                    .is_some_and(|n| n.kind == NodeKind::MixShader)
            })
            .map(|l| (l.to.node_id.clone(), l.to.socket.clone()));
        let Some((mix, slot)) = mix else {
            // Nothing blends it in: fully transparent.
            return Ok(Some(self.constant_value(0.0)?));
        };
        let Some(fac) = self.socket_value(&mix, "Fac")? else {
            return Ok(None);
        };
        if slot == "Shader_001" {
            return Ok(Some(self.invert(fac)?));
        }
        Ok(Some(fac))
    }

    fn displacement(&mut self, output_id: &str) -> Result<Option<Endpoint>> {
        let Some(from) = self.graph.incoming(output_id, "Displacement").map(|l| l.from.clone()) else {
            return Ok(None);
        };
        if self.kind_of(&from.node_id)? == NodeKind::Displacement {
            return self.socket_value(&from.node_id, "Height");
        }
        Ok(Some(from))
    }

    fn bump(&mut self, output_id: &str) -> Result<Option<Endpoint>> {
        let filter = |k: NodeKind| {
            k.is_bsdf()
                || k.is_shader_combinator()
                || matches!(
                    k,
                    NodeKind::Bump | NodeKind::OutputMaterial | NodeKind::NormalMap
                )
        };
        let Some(hit) = find_upstream_input(&*self.graph, output_id, filter, "Height")? else {
            return Ok(None);
        };
        self.socket_value(&hit.node_id, "Height")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::types::{SENTINEL_BLACK, SENTINEL_FLAT_NORMAL};

    fn principled_material() -> MaterialGraph {
        let mut m = MaterialGraph::new("mat");
        m.add_node(Node::new("out", NodeKind::OutputMaterial).active()).unwrap();
        m.add_node(
            Node::new("bsdf", NodeKind::PrincipledBsdf)
                .with_input("Base Color", SocketValue::Color([0.8, 0.1, 0.1, 1.0]))
                .with_input("Roughness", SocketValue::Float(0.25)),
        )
        .unwrap();
        m.connect(Endpoint::new("bsdf", "BSDF"), Endpoint::new("out", "Surface"));
        m
    }

    fn emission_color(g: &MaterialGraph, export: &ExportNodes) -> Option<[f32; 4]> {
        let out = export.output.as_ref()?;
        let emit = &g.incoming(out, "Surface")?.from.node_id;
        g.node(emit)?.input("Color")?.default_value.map(|v| v.as_color())
    }

    #[test]
    fn unlinked_base_color_becomes_constant() {
        let mut g = principled_material();
        let export = prepare_export(
            &mut g,
            &[],
            &BakeTarget::Input("Color".into()),
            IsolateOptions::default(),
            "img",
        )
        .unwrap();
        let src = export.source.unwrap();
        let rgb = g.node(&src.node_id).unwrap();
        assert_eq!(rgb.kind, NodeKind::Rgb);
        assert_eq!(
            rgb.output("Color").unwrap().default_value,
            Some(SocketValue::Color([0.8, 0.1, 0.1, 1.0]))
        );
        assert!(g.node("bake.tmp/out").is_some());
        assert!(!g.node("out").unwrap().is_active_output);
    }

    #[test]
    fn missing_target_leaves_sentinel() {
        let mut g = principled_material();
        let export = prepare_export(
            &mut g,
            &[],
            &BakeTarget::Input("Nonexistent".into()),
            IsolateOptions::default(),
            "img",
        )
        .unwrap();
        assert!(export.source.is_none());
        assert_eq!(emission_color(&g, &export), Some(SENTINEL_BLACK));

        let mut g = principled_material();
        let export =
            prepare_export(&mut g, &[], &BakeTarget::Displacement, IsolateOptions::default(), "img").unwrap();
        assert!(export.source.is_none());
        assert_eq!(emission_color(&g, &export), Some(SENTINEL_FLAT_NORMAL));
    }

    #[test]
    fn glossiness_inverts_roughness() {
        let mut g = principled_material();
        let src = isolate(&mut g, "out", &BakeTarget::Glossiness, IsolateOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(g.node(&src.node_id).unwrap().kind, NodeKind::Invert);
        let feed = &g.incoming(&src.node_id, "Color").unwrap().from;
        assert_eq!(
            g.node(&feed.node_id).unwrap().output("Value").unwrap().default_value,
            Some(SocketValue::Float(0.25))
        );
    }

    #[test]
    fn material_id_is_stable() {
        assert_eq!(material_id_color("Steel"), material_id_color("Steel"));
        assert_ne!(material_id_color("Steel"), material_id_color("Brass"));
        assert_eq!(material_id_color("x")[3], 1.0);
    }

    #[test]
    fn normal_and_diffuse_keep_original_shading() {
        let mut g = principled_material();
        let export = prepare_export(&mut g, &[], &BakeTarget::Normal, IsolateOptions::default(), "img").unwrap();
        assert!(export.output.is_none());
        assert!(g.node("out").unwrap().is_active_output);
        assert!(g.node(&export.image_node).unwrap().has_tag(TAG_BAKE_TARGET));
    }

    #[test]
    fn cyclic_clone_is_reported() {
        let mut g = principled_material();
        g.add_node(Node::new("a", NodeKind::MixRgb)).unwrap();
        g.add_node(Node::new("b", NodeKind::MixRgb)).unwrap();
        g.connect(Endpoint::new("a", "Color"), Endpoint::new("b", "Color1"));
        g.connect(Endpoint::new("b", "Color"), Endpoint::new("a", "Color1"));
        g.connect(Endpoint::new("a", "Color"), Endpoint::new("bsdf", "Base Color"));
        let err = isolate(
            &mut g,
            "out",
            &BakeTarget::Input("Metallic".into()),
            IsolateOptions::default(),
        );
        // Metallic is found on the BSDF before the loop is entered.
        assert!(err.is_ok());
        let err = isolate(
            &mut g,
            "out",
            &BakeTarget::AmbientOcclusion,
            IsolateOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");
    }
}
