use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::dsl::NodeKind;
use crate::image_store::ImageHandle;
use crate::jobs::tables::{
    JOB_ALPHA, JOB_AMBIENT_OCCLUSION, JOB_BUMP, JOB_CLEARCOAT_NORMAL, JOB_DIFFUSE, JOB_DISPLACEMENT,
    JOB_GLASS_ALPHA, JOB_GLOSSINESS, JOB_MATERIAL_ID, JOB_NORMAL, JOB_TRANSLUCENT_ALPHA,
    JOB_VERTEX_COLOR, JOB_WIREFRAME,
};
use crate::settings::{NormalSpaceParams, PassFilter, SelectedToActiveParams};

/// "No value" color for generic channels.
pub const SENTINEL_BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
/// Flat tangent-space normal: the "no perturbation" color.
pub const SENTINEL_FLAT_NORMAL: [f32; 4] = [0.5, 0.5, 1.0, 1.0];
/// Forced onto a transparent-family branch of a color mix.
pub const TRANSPARENT_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 0.0];
/// Forced onto the sibling of a transparent-family branch.
pub const OPAQUE_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 0.0];
pub const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// What the renderer is asked to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BakeKind {
    Emit,
    Normal,
    Diffuse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaVariant {
    Transparent,
    Translucent,
    Glass,
}

impl AlphaVariant {
    pub fn node_kind(self) -> NodeKind {
        match self {
            AlphaVariant::Transparent => NodeKind::TransparentBsdf,
            AlphaVariant::Translucent => NodeKind::TranslucentBsdf,
            AlphaVariant::Glass => NodeKind::GlassBsdf,
        }
    }
}

/// How one job's value is isolated from a material.
#[derive(Debug, Clone, PartialEq)]
pub enum BakeTarget {
    /// A named BSDF input ("Color" reads the principled "Base Color").
    Input(String),
    AmbientOcclusion,
    Alpha(AlphaVariant),
    Displacement,
    Bump,
    Glossiness,
    MaterialId,
    Wireframe,
    VertexColor(String),
    /// Rendered by the host's normal bake, no isolation.
    Normal,
    /// Rendered by the host's diffuse bake, no isolation.
    Diffuse,
}

impl BakeTarget {
    pub fn for_job(name: &str, sub_name: Option<&str>) -> Self {
        match name {
            JOB_AMBIENT_OCCLUSION => BakeTarget::AmbientOcclusion,
            JOB_ALPHA => BakeTarget::Alpha(AlphaVariant::Transparent),
            JOB_TRANSLUCENT_ALPHA => BakeTarget::Alpha(AlphaVariant::Translucent),
            JOB_GLASS_ALPHA => BakeTarget::Alpha(AlphaVariant::Glass),
            JOB_DISPLACEMENT => BakeTarget::Displacement,
            JOB_BUMP => BakeTarget::Bump,
            JOB_GLOSSINESS => BakeTarget::Glossiness,
            JOB_MATERIAL_ID => BakeTarget::MaterialId,
            JOB_WIREFRAME => BakeTarget::Wireframe,
            JOB_VERTEX_COLOR => BakeTarget::VertexColor(sub_name.unwrap_or_default().to_string()),
            JOB_NORMAL => BakeTarget::Normal,
            JOB_DIFFUSE => BakeTarget::Diffuse,
            other => BakeTarget::Input(other.to_string()),
        }
    }

    pub fn bake_kind(&self) -> BakeKind {
        match self {
            BakeTarget::Normal => BakeKind::Normal,
            BakeTarget::Diffuse => BakeKind::Diffuse,
            _ => BakeKind::Emit,
        }
    }

    pub fn is_normal_family(&self) -> bool {
        match self {
            BakeTarget::Normal | BakeTarget::Displacement | BakeTarget::Bump => true,
            BakeTarget::Input(name) => name == JOB_NORMAL || name == JOB_CLEARCOAT_NORMAL,
            _ => false,
        }
    }

    /// Color left on the synthetic emission when nothing can be traced.
    pub fn sentinel(&self) -> [f32; 4] {
        if self.is_normal_family() {
            SENTINEL_FLAT_NORMAL
        } else {
            SENTINEL_BLACK
        }
    }

    /// Targets that transparent-family branches must not bleed into.
    pub fn is_color_family(&self) -> bool {
        matches!(self, BakeTarget::Input(name) if name == crate::jobs::tables::JOB_COLOR
            || name == "Subsurface Color")
    }

    /// Socket name looked up on generic nodes.
    pub fn socket_name(&self) -> Option<&str> {
        match self {
            BakeTarget::Input(name) => Some(name.as_str()),
            BakeTarget::Glossiness => Some("Roughness"),
            BakeTarget::Alpha(_) => Some(JOB_ALPHA),
            _ => None,
        }
    }
}

/// Render-bake invocation handed to the external bake service.
#[derive(Debug, Clone, PartialEq)]
pub struct BakeRequest {
    pub kind: BakeKind,
    pub pass_filter: PassFilter,
    pub selected_to_active: bool,
    pub cage: SelectedToActiveParams,
    pub normal_space: NormalSpaceParams,
    /// Objects taking part; with `selected_to_active` the last one is the target.
    pub objects: Vec<String>,
    /// Image the active bake-target nodes point at.
    pub image: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BakeStatus {
    Finished,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BakedImage {
    pub job: String,
    /// Object the image belongs to, or `None` for a combined image.
    pub object: Option<String>,
    pub path: PathBuf,
    pub handle: ImageHandle,
    /// Loaded from an existing file instead of baked.
    pub cached: bool,
}

/// Outcome of one bake run: a coarse status plus human-readable messages.
#[derive(Debug, Clone)]
pub struct BakeReport {
    pub status: BakeStatus,
    pub messages: Vec<String>,
    pub images: Vec<BakedImage>,
}

impl BakeReport {
    pub fn cancelled(message: String) -> Self {
        Self {
            status: BakeStatus::Cancelled,
            messages: vec![message],
            images: Vec::new(),
        }
    }
}

/// Recoverable conditions that skip one object or one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    HiddenFromRender,
    EmptyMaterialSlot,
    MissingUvMap,
    MissingVertexColors,
    NoMaterial,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SkipReason::HiddenFromRender => "object is hidden from render",
            SkipReason::EmptyMaterialSlot => "object has a material slot with no material",
            SkipReason::MissingUvMap => "object has no UV map and auto-unwrap is off",
            SkipReason::MissingVertexColors => "object has no matching vertex colors",
            SkipReason::NoMaterial => "object has no material",
        };
        f.write_str(msg)
    }
}
