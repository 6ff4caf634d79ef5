use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::schema;
use crate::settings::BakeSettings;

/// Marks every node created by a bake run. All of them are deleted on teardown.
pub const TAG_SCRATCH: &str = "bake.scratch";
/// Marks the synthetic material output that is active while a job bakes.
pub const TAG_SYNTH_OUTPUT: &str = "bake.active_output";
/// Marks color-mix nodes the export synthesizer owns and may rewire.
pub const TAG_SYNTH_MIX: &str = "bake.mix";
/// Marks the image node the renderer writes into.
pub const TAG_BAKE_TARGET: &str = "bake.target";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BakeScene {
    pub version: String,
    pub metadata: Metadata,
    #[serde(default)]
    pub objects: Vec<SceneObject>,
    #[serde(default)]
    pub materials: Vec<MaterialGraph>,
    #[serde(default)]
    pub groups: Vec<NodeGroup>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Metadata {
    pub name: String,
    pub created: Option<String>,
    pub modified: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SceneObject {
    pub name: String,
    /// One entry per material slot; `None` is a slot with no material assigned.
    #[serde(default)]
    pub material_slots: Vec<Option<String>>,
    #[serde(default)]
    pub vertex_colors: Vec<VertexColorLayer>,
    #[serde(default)]
    pub uv_layers: Vec<String>,
    #[serde(default)]
    pub hide_render: bool,
    #[serde(default = "default_true")]
    pub selected: bool,
    #[serde(default)]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VertexColorLayer {
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub active_render: bool,
}

/// Reusable node group referenced by `Group` nodes through `params.groupId`.
///
/// Boundary sockets are the outputs of the inner `GroupInput` node and the
/// inputs of the inner `GroupOutput` node, matched by name against the
/// sockets of the instancing `Group` node.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeGroup {
    pub id: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MaterialGraph {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    PrincipledBsdf,
    DiffuseBsdf,
    GlossyBsdf,
    GlassBsdf,
    TransparentBsdf,
    TranslucentBsdf,
    RefractionBsdf,
    SubsurfaceScattering,
    Emission,
    MixShader,
    AddShader,
    MixRgb,
    Invert,
    ImageTexture,
    Attribute,
    VertexColor,
    AmbientOcclusion,
    Wireframe,
    NormalMap,
    Bump,
    Displacement,
    OutputMaterial,
    Group,
    GroupInput,
    GroupOutput,
    Value,
    Rgb,
    RgbToBw,
    TexCoord,
    Mapping,
    Other,
}

impl NodeKind {
    pub fn is_bsdf(self) -> bool {
        matches!(
            self,
            NodeKind::PrincipledBsdf
                | NodeKind::DiffuseBsdf
                | NodeKind::GlossyBsdf
                | NodeKind::GlassBsdf
                | NodeKind::TransparentBsdf
                | NodeKind::TranslucentBsdf
                | NodeKind::RefractionBsdf
                | NodeKind::SubsurfaceScattering
        )
    }

    /// Kinds whose color must never leak into a color bake when transparent
    /// colors are excluded.
    pub fn is_transparent_family(self) -> bool {
        matches!(
            self,
            NodeKind::TransparentBsdf | NodeKind::TranslucentBsdf | NodeKind::GlassBsdf
        )
    }

    pub fn is_shader_combinator(self) -> bool {
        matches!(self, NodeKind::MixShader | NodeKind::AddShader)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputTarget {
    #[default]
    All,
    Cycles,
    Eevee,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    Color,
    Float,
    Vector,
    Shader,
}

/// Literal value held by an unlinked input socket (or by a constant node's output).
///
/// Equality is by value, which is what value-differs detection compares.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum SocketValue {
    Float(f32),
    Vector([f32; 3]),
    Color([f32; 4]),
}

impl SocketValue {
    pub fn as_color(&self) -> [f32; 4] {
        match *self {
            SocketValue::Float(v) => [v, v, v, 1.0],
            SocketValue::Vector([x, y, z]) => [x, y, z, 1.0],
            SocketValue::Color(c) => c,
        }
    }

    pub fn as_float(&self) -> f32 {
        match *self {
            SocketValue::Float(v) => v,
            SocketValue::Vector([x, y, z]) => (x + y + z) / 3.0,
            SocketValue::Color(c) => luminance(c),
        }
    }
}

/// Rec. 709 luma weights, the same ones an RGB-to-BW conversion node uses.
pub fn luminance(c: [f32; 4]) -> f32 {
    0.2126 * c[0] + 0.7152 * c[1] + 0.0722 * c[2]
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Socket {
    pub name: String,
    #[serde(rename = "type")]
    pub socket_type: SocketType,
    #[serde(default, rename = "defaultValue")]
    pub default_value: Option<SocketValue>,
}

impl Socket {
    pub fn new(name: &str, socket_type: SocketType, default_value: Option<SocketValue>) -> Self {
        Self {
            name: name.to_string(),
            socket_type,
            default_value,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub inputs: Vec<Socket>,
    #[serde(default)]
    pub outputs: Vec<Socket>,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,

    // Only meaningful on `OutputMaterial` nodes.
    #[serde(default, rename = "isActiveOutput")]
    pub is_active_output: bool,
    #[serde(default)]
    pub target: OutputTarget,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl Node {
    /// A node of `kind` with the sockets and defaults from the bundled template.
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        let template = schema::template_for(kind);
        Self {
            id: id.into(),
            kind,
            inputs: template.inputs,
            outputs: template.outputs,
            params: HashMap::new(),
            is_active_output: false,
            target: OutputTarget::All,
            tags: BTreeSet::new(),
        }
    }

    pub fn input(&self, name: &str) -> Option<&Socket> {
        self.inputs.iter().find(|s| s.name == name)
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut Socket> {
        self.inputs.iter_mut().find(|s| s.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Socket> {
        self.outputs.iter().find(|s| s.name == name)
    }

    pub fn output_mut(&mut self, name: &str) -> Option<&mut Socket> {
        self.outputs.iter_mut().find(|s| s.name == name)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Builder-style default override, mostly for hand-built graphs.
    pub fn with_input(mut self, name: &str, value: SocketValue) -> Self {
        if let Some(s) = self.input_mut(name) {
            s.default_value = Some(value);
        }
        self
    }

    pub fn with_output(mut self, name: &str, value: SocketValue) -> Self {
        if let Some(s) = self.output_mut(name) {
            s.default_value = Some(value);
        }
        self
    }

    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn active(mut self) -> Self {
        self.is_active_output = true;
        self
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub socket: String,
}

impl Endpoint {
    pub fn new(node_id: impl Into<String>, socket: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            socket: socket.into(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Link {
    pub id: String,
    pub from: Endpoint,
    pub to: Endpoint,
}

impl MaterialGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn find_node(&self, id: &str) -> Result<&Node> {
        self.node(id)
            .ok_or_else(|| anyhow!("node not found: {id} (material '{}')", self.name))
    }

    pub fn find_node_mut(&mut self, id: &str) -> Result<&mut Node> {
        let material = self.name.clone();
        self.node_mut(id)
            .ok_or_else(|| anyhow!("node not found: {id} (material '{material}')"))
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.node(&node.id).is_some() {
            bail!("duplicate node id '{}' in material '{}'", node.id, self.name);
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn incoming(&self, node_id: &str, socket: &str) -> Option<&Link> {
        incoming_link(&self.links, node_id, socket)
    }

    /// Links `from` into `to`. An input socket has at most one upstream link,
    /// so an existing link into `to` is replaced.
    pub fn connect(&mut self, from: Endpoint, to: Endpoint) {
        self.links.retain(|l| l.to != to);
        self.links.push(Link {
            id: format!("{}:{}->{}:{}", from.node_id, from.socket, to.node_id, to.socket),
            from,
            to,
        });
    }

    pub fn disconnect(&mut self, node_id: &str, socket: &str) -> Option<Link> {
        let pos = self
            .links
            .iter()
            .position(|l| l.to.node_id == node_id && l.to.socket == socket)?;
        Some(self.links.remove(pos))
    }

    pub fn set_input_default(&mut self, node_id: &str, socket: &str, value: SocketValue) -> Result<()> {
        let node = self.find_node_mut(node_id)?;
        let node_id = node.id.clone();
        let s = node
            .input_mut(socket)
            .ok_or_else(|| anyhow!("node '{node_id}' has no input '{socket}'"))?;
        s.default_value = Some(value);
        Ok(())
    }

    /// Removes every node matching `pred` together with all links touching it.
    pub fn remove_nodes_where(&mut self, pred: impl Fn(&Node) -> bool) -> usize {
        let doomed: BTreeSet<String> = self
            .nodes
            .iter()
            .filter(|n| pred(n))
            .map(|n| n.id.clone())
            .collect();
        if doomed.is_empty() {
            return 0;
        }
        self.nodes.retain(|n| !doomed.contains(&n.id));
        self.links
            .retain(|l| !doomed.contains(&l.from.node_id) && !doomed.contains(&l.to.node_id));
        doomed.len()
    }

    pub fn output_socket_type(&self, ep: &Endpoint) -> Option<SocketType> {
        self.node(&ep.node_id)?
            .output(&ep.socket)
            .map(|s| s.socket_type)
    }

    pub fn material_outputs(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::OutputMaterial)
    }

    pub fn count_tagged(&self, tag: &str) -> usize {
        self.nodes.iter().filter(|n| n.has_tag(tag)).count()
    }
}

impl BakeScene {
    pub fn material(&self, name: &str) -> Option<&MaterialGraph> {
        self.materials.iter().find(|m| m.name == name)
    }

    pub fn material_mut(&mut self, name: &str) -> Option<&mut MaterialGraph> {
        self.materials.iter_mut().find(|m| m.name == name)
    }

    pub fn object(&self, name: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn object_mut(&mut self, name: &str) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|o| o.name == name)
    }

    pub fn selected_objects(&self) -> Vec<&SceneObject> {
        self.objects.iter().filter(|o| o.selected).collect()
    }

    pub fn active_object(&self) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.active)
    }

    /// Materials assigned to `object`, in slot order, without duplicates.
    /// Empty slots and names that do not resolve are skipped.
    pub fn object_materials(&self, object: &SceneObject) -> Vec<&MaterialGraph> {
        let mut out: Vec<&MaterialGraph> = Vec::new();
        for name in object.material_slots.iter().flatten() {
            if out.iter().any(|m| &m.name == name) {
                continue;
            }
            if let Some(m) = self.material(name) {
                out.push(m);
            }
        }
        out
    }

    /// An object is usable for baking when it has at least one slot and every
    /// slot names an existing material.
    pub fn has_usable_material(&self, object: &SceneObject) -> bool {
        !object.material_slots.is_empty()
            && object
                .material_slots
                .iter()
                .all(|slot| slot.as_deref().is_some_and(|n| self.material(n).is_some()))
    }

    pub fn group(&self, id: &str) -> Option<&NodeGroup> {
        self.groups.iter().find(|g| g.id == id)
    }
}

pub fn incoming_link<'a>(links: &'a [Link], node_id: &str, socket: &str) -> Option<&'a Link> {
    links
        .iter()
        .find(|l| l.to.node_id == node_id && l.to.socket == socket)
}

pub fn load_scene_from_path(path: impl AsRef<Path>) -> Result<BakeScene> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scene json at {}", path.display()))?;
    let mut scene: BakeScene = serde_json::from_str(&text).context("failed to parse scene json")?;

    // Hand-written scenes often list only the sockets they set.
    normalize_scene_defaults(&mut scene);

    Ok(scene)
}

/// Open a zip bundle holding `scene.json` and, optionally, `settings.json`.
pub fn load_scene_from_archive(path: &Path) -> Result<(BakeScene, Option<BakeSettings>)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open scene archive at {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("failed to read zip archive {}", path.display()))?;

    let scene_json = {
        let mut entry = archive
            .by_name("scene.json")
            .with_context(|| "missing scene.json in scene archive")?;
        let mut buf = String::new();
        entry
            .read_to_string(&mut buf)
            .context("failed to read scene.json from archive")?;
        buf
    };
    let mut scene: BakeScene =
        serde_json::from_str(&scene_json).context("failed to parse scene.json from archive")?;
    normalize_scene_defaults(&mut scene);

    let settings = match archive.by_name("settings.json") {
        Ok(mut entry) => {
            let mut buf = String::new();
            entry
                .read_to_string(&mut buf)
                .context("failed to read settings.json from archive")?;
            Some(serde_json::from_str(&buf).context("failed to parse settings.json from archive")?)
        }
        Err(zip::result::ZipError::FileNotFound) => None,
        Err(e) => return Err(e).context("failed to open settings.json in archive"),
    };

    Ok((scene, settings))
}

/// Fill in sockets a node omits, using the bundled template for its kind.
/// Sockets already present keep their values; template order is preserved.
pub fn normalize_scene_defaults(scene: &mut BakeScene) {
    for m in &mut scene.materials {
        for node in &mut m.nodes {
            apply_template_sockets(node);
        }
    }
    for g in &mut scene.groups {
        for node in &mut g.nodes {
            apply_template_sockets(node);
        }
    }
}

fn apply_template_sockets(node: &mut Node) {
    let template = schema::template_for(node.kind);
    node.inputs = merge_sockets(template.inputs, std::mem::take(&mut node.inputs));
    node.outputs = merge_sockets(template.outputs, std::mem::take(&mut node.outputs));
}

fn merge_sockets(template: Vec<Socket>, existing: Vec<Socket>) -> Vec<Socket> {
    let mut merged: Vec<Socket> = template
        .into_iter()
        .map(|t| existing.iter().find(|s| s.name == t.name).cloned().unwrap_or(t))
        .collect();
    for s in existing {
        if !merged.iter().any(|m| m.name == s.name) {
            merged.push(s);
        }
    }
    merged
}

pub fn parse_str<'a>(params: &'a HashMap<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}
