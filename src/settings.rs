use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::jobs::list::JobList;
use crate::jobs::tables::DetectionTables;

/// Options read once per bake run. Every field has a default so a settings
/// file only needs to list what it changes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BakeSettings {
    /// Directory of the saved project. Required for `//`-relative output paths.
    pub project_dir: Option<PathBuf>,
    /// Output directory; a leading `//` makes it relative to `project_dir`.
    pub output_dir: String,
    pub file_format: FileFormat,
    pub color_mode: ColorMode,
    pub color_depth: ColorDepth,
    pub jpeg_quality: u8,
    pub resolution: [u32; 2],
    pub samples: u32,
    pub prefix: String,
    /// Per-job file name suffix; the job name is used when missing.
    pub suffixes: BTreeMap<String, String>,
    pub mode: BakeMode,

    pub use_autodetect: bool,
    pub detect_value_differs: bool,
    pub detect_connected_inputs: bool,
    pub tables: DetectionTables,

    pub use_bump: bool,
    pub bake_diffuse: bool,
    pub bake_glossiness: bool,
    pub bake_material_id: bool,
    pub bake_wireframe: bool,
    pub bake_vertex_colors: bool,
    pub vertex_color_policy: VertexColorPolicy,

    pub use_alpha_to_color: bool,
    pub exclude_transparent_colors: bool,
    pub overwrite: bool,

    pub selected_to_active: SelectedToActiveParams,
    pub normal_space: NormalSpaceParams,
    pub diffuse_pass_filter: PassFilter,

    pub auto_uv_unwrap: bool,
    pub uv_unwrap: UvUnwrapMethod,

    /// Assemble a new material from the baked images when the run finishes.
    pub new_material: bool,

    pub job_list: JobList,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            project_dir: None,
            output_dir: "//textures".to_string(),
            file_format: FileFormat::Png,
            color_mode: ColorMode::Rgb,
            color_depth: ColorDepth::Eight,
            jpeg_quality: 90,
            resolution: [1024, 1024],
            samples: 1,
            prefix: String::new(),
            suffixes: BTreeMap::new(),
            mode: BakeMode::Combined,
            use_autodetect: true,
            detect_value_differs: true,
            detect_connected_inputs: true,
            tables: DetectionTables::default(),
            use_bump: false,
            bake_diffuse: false,
            bake_glossiness: false,
            bake_material_id: false,
            bake_wireframe: false,
            bake_vertex_colors: false,
            vertex_color_policy: VertexColorPolicy::All,
            use_alpha_to_color: false,
            exclude_transparent_colors: true,
            overwrite: false,
            selected_to_active: SelectedToActiveParams::default(),
            normal_space: NormalSpaceParams::default(),
            diffuse_pass_filter: PassFilter::default(),
            auto_uv_unwrap: false,
            uv_unwrap: UvUnwrapMethod::default(),
            new_material: false,
            job_list: JobList::default(),
        }
    }
}

impl BakeSettings {
    pub fn suffix_for(&self, job_name: &str) -> String {
        self.job_list
            .entry(job_name)
            .and_then(|e| e.suffix.clone())
            .or_else(|| self.suffixes.get(job_name).cloned())
            .unwrap_or_else(|| job_name.to_string())
    }

    /// Whether any source of the run asks for a diffuse bake.
    pub fn wants_diffuse(&self) -> bool {
        self.bake_diffuse
            || self
                .job_list
                .entry(crate::jobs::tables::JOB_DIFFUSE)
                .is_some_and(|e| e.enabled)
    }
}

pub fn load_settings_from_path(path: impl AsRef<Path>) -> Result<BakeSettings> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings json at {}", path.display()))?;
    serde_json::from_str(&text).context("failed to parse settings json")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BakeMode {
    /// One image per job covering every selected object.
    #[default]
    Combined,
    /// One image per job per selected object.
    PerObjectBatch,
    /// Bake the other selected objects onto the active one.
    SelectedToActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Png,
    Jpeg,
    OpenExr,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Png => "png",
            FileFormat::Jpeg => "jpg",
            FileFormat::OpenExr => "exr",
        }
    }

    pub fn supports_alpha(self) -> bool {
        !matches!(self, FileFormat::Jpeg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColorMode {
    Bw,
    Rgb,
    Rgba,
}

impl ColorMode {
    pub fn has_alpha(self) -> bool {
        self == ColorMode::Rgba
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ColorDepth {
    #[serde(rename = "8")]
    Eight,
    #[serde(rename = "16")]
    Sixteen,
    #[serde(rename = "32")]
    ThirtyTwo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VertexColorPolicy {
    #[default]
    All,
    Active,
    ActiveRender,
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectedToActiveParams {
    pub cage_extrusion: f32,
    pub max_ray_distance: f32,
}

impl Default for SelectedToActiveParams {
    fn default() -> Self {
        Self {
            cage_extrusion: 0.05,
            max_ray_distance: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NormalSpace {
    #[default]
    Tangent,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Swizzle {
    #[serde(rename = "POS_X")]
    PosX,
    #[serde(rename = "POS_Y")]
    PosY,
    #[serde(rename = "POS_Z")]
    PosZ,
    #[serde(rename = "NEG_X")]
    NegX,
    #[serde(rename = "NEG_Y")]
    NegY,
    #[serde(rename = "NEG_Z")]
    NegZ,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NormalSpaceParams {
    pub space: NormalSpace,
    pub swizzle: [Swizzle; 3],
}

impl Default for NormalSpaceParams {
    fn default() -> Self {
        Self {
            space: NormalSpace::Tangent,
            swizzle: [Swizzle::PosX, Swizzle::PosY, Swizzle::PosZ],
        }
    }
}

/// Light contributions a diffuse bake collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PassFilter {
    pub color: bool,
    pub direct: bool,
    pub indirect: bool,
}

impl Default for PassFilter {
    fn default() -> Self {
        Self {
            color: true,
            direct: false,
            indirect: false,
        }
    }
}

impl PassFilter {
    pub fn is_empty(&self) -> bool {
        !(self.color || self.direct || self.indirect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum UvUnwrapMethod {
    SmartProject {
        #[serde(rename = "angleLimit")]
        angle_limit: f32,
        #[serde(rename = "islandMargin")]
        island_margin: f32,
    },
    LightmapPack {
        quality: u32,
        margin: f32,
    },
}

impl Default for UvUnwrapMethod {
    fn default() -> Self {
        UvUnwrapMethod::SmartProject {
            angle_limit: 66.0,
            island_margin: 0.02,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fill_in_defaults() {
        let s: BakeSettings = serde_json::from_str(
            r#"{
                "mode": "selected_to_active",
                "colorMode": "RGBA",
                "colorDepth": "16",
                "vertexColorPolicy": {"index": 2},
                "uvUnwrap": {"method": "lightmap_pack", "quality": 12, "margin": 0.1}
            }"#,
        )
        .unwrap();
        assert_eq!(s.mode, BakeMode::SelectedToActive);
        assert_eq!(s.color_mode, ColorMode::Rgba);
        assert_eq!(s.color_depth, ColorDepth::Sixteen);
        assert_eq!(s.vertex_color_policy, VertexColorPolicy::Index(2));
        assert_eq!(
            s.uv_unwrap,
            UvUnwrapMethod::LightmapPack {
                quality: 12,
                margin: 0.1
            }
        );
        assert_eq!(s.resolution, [1024, 1024]);
        assert!(s.use_autodetect);
    }

    #[test]
    fn suffix_falls_back_to_job_name() {
        let mut s = BakeSettings::default();
        s.suffixes.insert("Roughness".to_string(), "rough".to_string());
        assert_eq!(s.suffix_for("Roughness"), "rough");
        assert_eq!(s.suffix_for("Metallic"), "Metallic");
    }
}
