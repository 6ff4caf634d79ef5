use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use crate::dsl::BakeScene;
use crate::jobs::JobSet;
use crate::jobs::tables::JOB_DIFFUSE;
use crate::schema::validate_material;
use crate::settings::{BakeMode, BakeSettings};

/// Resolve the output directory, honoring the `//` project-relative prefix.
pub fn resolve_output_dir(settings: &BakeSettings) -> Result<PathBuf> {
    let raw = settings.output_dir.trim();
    if raw.is_empty() {
        bail!("output path is empty");
    }
    match raw.strip_prefix("//") {
        Some(rest) => {
            let Some(project) = settings.project_dir.as_ref() else {
                bail!("project is not saved: the relative output path '{raw}' needs a project directory");
            };
            Ok(project.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

/// Everything that must hold before a run touches a material. Returns the
/// output directory, created only once every other check has passed.
pub fn check_preconditions(scene: &BakeScene, settings: &BakeSettings, jobs: &JobSet) -> Result<PathBuf> {
    let dir = resolve_output_dir(settings)?;

    let selected = scene.selected_objects();
    if selected.is_empty() {
        bail!("no objects selected");
    }
    if settings.mode == BakeMode::SelectedToActive {
        if selected.len() < 2 {
            bail!(
                "selected-to-active needs at least two selected objects (got {})",
                selected.len()
            );
        }
        if scene.active_object().is_none_or(|o| !o.selected) {
            bail!("selected-to-active needs a selected active object");
        }
    }

    if (jobs.contains(JOB_DIFFUSE) || settings.wants_diffuse()) && settings.diffuse_pass_filter.is_empty() {
        bail!("diffuse bake requested but no color, direct or indirect contribution is enabled");
    }

    for o in &selected {
        for m in scene.object_materials(o) {
            validate_material(m).with_context(|| format!("object '{}' has an invalid material", o.name))?;
        }
    }

    // Only a run that is going ahead may leave a directory behind.
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create output directory {}", dir.display()))?;
    let meta = std::fs::metadata(&dir)
        .with_context(|| format!("cannot read output directory {}", dir.display()))?;
    if meta.permissions().readonly() {
        bail!("no write permission for output directory {}", dir.display());
    }

    Ok(dir)
}
