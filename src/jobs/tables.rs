use serde::{Deserialize, Serialize};

pub const JOB_COLOR: &str = "Color";
pub const JOB_ALPHA: &str = "Alpha";
pub const JOB_TRANSLUCENT_ALPHA: &str = "Translucent Alpha";
pub const JOB_GLASS_ALPHA: &str = "Glass Alpha";
pub const JOB_EMISSION: &str = "Emission";
pub const JOB_AMBIENT_OCCLUSION: &str = "Ambient Occlusion";
pub const JOB_DISPLACEMENT: &str = "Displacement";
pub const JOB_BUMP: &str = "Bump";
pub const JOB_NORMAL: &str = "Normal";
pub const JOB_CLEARCOAT_NORMAL: &str = "Clearcoat Normal";
pub const JOB_DIFFUSE: &str = "Diffuse";
pub const JOB_GLOSSINESS: &str = "Glossiness";
pub const JOB_MATERIAL_ID: &str = "Material ID";
pub const JOB_WIREFRAME: &str = "Wireframe";
pub const JOB_VERTEX_COLOR: &str = "Vertex Color";

/// The principled socket that the "Color" job reads.
pub const BASE_COLOR_SOCKET: &str = "Base Color";

/// Job name for a BSDF input socket ("Base Color" bakes as "Color").
pub fn job_name_for_input(socket: &str) -> &str {
    if socket == BASE_COLOR_SOCKET {
        JOB_COLOR
    } else {
        socket
    }
}

/// Input vocabularies the detectors consult. Kept as data so a scene can
/// widen or narrow them without touching the detectors.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectionTables {
    /// Inputs compared by value across materials. Non-comparable vector
    /// inputs (normals, tangent, subsurface radius) are left out.
    pub comparable_inputs: Vec<String>,
    /// Inputs that become a job as soon as they are linked.
    pub connected_inputs: Vec<String>,
}

const COMPARABLE_INPUTS: &[&str] = &[
    "Base Color",
    "Subsurface",
    "Subsurface Color",
    "Metallic",
    "Specular",
    "Specular Tint",
    "Roughness",
    "Anisotropic",
    "Anisotropic Rotation",
    "Sheen",
    "Sheen Tint",
    "Clearcoat",
    "Clearcoat Roughness",
    "IOR",
    "Transmission",
    "Transmission Roughness",
    "Emission",
    "Emission Strength",
    "Alpha",
];

impl Default for DetectionTables {
    fn default() -> Self {
        let comparable_inputs: Vec<String> = COMPARABLE_INPUTS.iter().map(|s| s.to_string()).collect();
        let mut connected_inputs = comparable_inputs.clone();
        connected_inputs.push(JOB_NORMAL.to_string());
        connected_inputs.push(JOB_CLEARCOAT_NORMAL.to_string());
        Self {
            comparable_inputs,
            connected_inputs,
        }
    }
}

/// Every job name the manual list offers, in display order.
pub fn known_job_names() -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for socket in COMPARABLE_INPUTS {
        names.push(job_name_for_input(socket).to_string());
    }
    for extra in [
        JOB_NORMAL,
        JOB_CLEARCOAT_NORMAL,
        JOB_TRANSLUCENT_ALPHA,
        JOB_GLASS_ALPHA,
        JOB_AMBIENT_OCCLUSION,
        JOB_DISPLACEMENT,
        JOB_BUMP,
        JOB_DIFFUSE,
        JOB_GLOSSINESS,
        JOB_MATERIAL_ID,
        JOB_WIREFRAME,
    ] {
        if !names.iter().any(|n| n == extra) {
            names.push(extra.to_string());
        }
    }
    names
}
