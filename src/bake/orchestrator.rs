use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use log::{info, warn};

use super::isolate::{IsolateOptions, install_bake_target, prepare_export};
use super::preconditions::check_preconditions;
use super::scratch::{SamplesOverride, ScratchScope};
use super::types::{BakeReport, BakeRequest, BakeStatus, BakeTarget, BakedImage, SkipReason};
use crate::bake_service::{BakeService, UvUnwrapService, unwrap_uvs};
use crate::dsl::{BakeScene, luminance};
use crate::image_store::{ImageStore, SaveOptions};
use crate::jobs::tables::{JOB_ALPHA, JOB_COLOR};
use crate::jobs::{Job, JobSet, detect_jobs};
use crate::material_writer::assemble_material;
use crate::settings::{BakeMode, BakeSettings, ColorDepth, FileFormat};

/// Drives one bake run over the selected objects.
pub struct Baker<'a> {
    service: &'a mut dyn BakeService,
    images: &'a mut dyn ImageStore,
    uv: &'a mut dyn UvUnwrapService,
}

/// Objects that share one image per job.
#[derive(Debug, Clone)]
struct BakeUnit {
    /// Object name used in file names; `None` for a combined image.
    label: Option<String>,
    /// Participating objects; with selected-to-active the receiver is last.
    objects: Vec<String>,
    /// Materials rewritten for every job.
    materials: Vec<String>,
    /// Materials that only hold the image node (the selected-to-active receiver).
    receivers: Vec<String>,
}

enum JobOutcome {
    Baked(BakedImage),
    Skipped(SkipReason),
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

impl<'a> Baker<'a> {
    pub fn new(
        service: &'a mut dyn BakeService,
        images: &'a mut dyn ImageStore,
        uv: &'a mut dyn UvUnwrapService,
    ) -> Self {
        Self { service, images, uv }
    }

    /// Run every derived job. Failures that stop the run are reported as a
    /// cancelled status; everything else ends up in the message log.
    pub fn bake(&mut self, scene: &mut BakeScene, settings: &BakeSettings) -> BakeReport {
        match self.run(scene, settings) {
            Ok(report) => report,
            Err(e) => {
                warn!("bake cancelled: {e:#}");
                BakeReport::cancelled(format!("{e:#}"))
            }
        }
    }

    fn run(&mut self, scene: &mut BakeScene, settings: &BakeSettings) -> Result<BakeReport> {
        let jobs = detect_jobs(scene, settings)?;
        let out_dir = check_preconditions(scene, settings, &jobs)?;
        info!("baking {} job(s) into {}", jobs.len(), out_dir.display());

        let mut messages: Vec<String> = Vec::new();
        let units = self.plan_units(scene, settings, &mut messages)?;

        let mut images: Vec<BakedImage> = Vec::new();
        for unit in &units {
            let base = unit
                .label
                .clone()
                .unwrap_or_else(|| scene.metadata.name.clone());
            let unit_images = self.bake_unit(scene, settings, unit, &jobs, &out_dir, &base, &mut messages);

            if settings.use_alpha_to_color
                && settings.color_mode.has_alpha()
                && settings.file_format.supports_alpha()
            {
                if let Err(e) = self.fold_alpha(&unit_images) {
                    let msg = format!("{base}: could not fold alpha into color: {e:#}");
                    warn!("{msg}");
                    messages.push(msg);
                }
            }

            if settings.new_material && !unit_images.is_empty() {
                let name = format!("{base}_baked");
                let entries: Vec<(String, PathBuf)> = unit_images
                    .iter()
                    .map(|i| (i.job.clone(), i.path.clone()))
                    .collect();
                match assemble_material(&name, &entries) {
                    Ok(material) => {
                        scene.materials.retain(|m| m.name != name);
                        scene.materials.push(material);
                        let msg = format!("{base}: created material '{name}'");
                        info!("{msg}");
                        messages.push(msg);
                    }
                    Err(e) => {
                        let msg = format!("{base}: no material created: {e:#}");
                        warn!("{msg}");
                        messages.push(msg);
                    }
                }
            }

            images.extend(unit_images);
        }

        info!(
            "bake finished: {} image(s), {} message(s)",
            images.len(),
            messages.len()
        );
        Ok(BakeReport {
            status: BakeStatus::Finished,
            messages,
            images,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn bake_unit(
        &mut self,
        scene: &mut BakeScene,
        settings: &BakeSettings,
        unit: &BakeUnit,
        jobs: &JobSet,
        out_dir: &Path,
        base: &str,
        messages: &mut Vec<String>,
    ) -> Vec<BakedImage> {
        let mut baked = Vec::new();
        for job in jobs.iter() {
            match self.bake_job(scene, settings, unit, job, out_dir, base) {
                Ok(JobOutcome::Baked(img)) => baked.push(img),
                Ok(JobOutcome::Skipped(reason)) => {
                    let msg = format!("{base}: skipped '{}': {reason}", job.display_name());
                    warn!("{msg}");
                    messages.push(msg);
                }
                Err(e) => {
                    let msg = format!("{base}: '{}' failed: {e:#}", job.display_name());
                    warn!("{msg}");
                    messages.push(msg);
                }
            }
        }
        baked
    }

    fn plan_units(
        &mut self,
        scene: &mut BakeScene,
        settings: &BakeSettings,
        messages: &mut Vec<String>,
    ) -> Result<Vec<BakeUnit>> {
        let selected: Vec<String> = scene
            .selected_objects()
            .iter()
            .map(|o| o.name.clone())
            .collect();

        if settings.mode == BakeMode::SelectedToActive {
            let active = scene
                .active_object()
                .map(|o| o.name.clone())
                .ok_or_else(|| anyhow!("selected-to-active needs an active object"))?;
            if let Some(reason) = self.prepare_object(scene, &active, settings, false)? {
                let msg = format!("{active}: skipped: {reason}");
                warn!("{msg}");
                messages.push(msg);
                return Ok(Vec::new());
            }

            let mut objects = Vec::new();
            let mut materials = Vec::new();
            for name in selected.iter().filter(|n| **n != active) {
                let Some(o) = scene.object(name) else {
                    continue;
                };
                if o.hide_render {
                    let msg = format!("{name}: skipped: {}", SkipReason::HiddenFromRender);
                    warn!("{msg}");
                    messages.push(msg);
                    continue;
                }
                if scene.has_usable_material(o) {
                    for m in scene.object_materials(o) {
                        push_unique(&mut materials, &m.name);
                    }
                }
                objects.push(name.clone());
            }
            let mut receivers = Vec::new();
            if let Some(o) = scene.object(&active) {
                for m in scene.object_materials(o) {
                    if !materials.contains(&m.name) {
                        push_unique(&mut receivers, &m.name);
                    }
                }
            }
            objects.push(active.clone());
            return Ok(vec![BakeUnit {
                label: Some(active),
                objects,
                materials,
                receivers,
            }]);
        }

        let mut ready: Vec<String> = Vec::new();
        for name in &selected {
            match self.prepare_object(scene, name, settings, true)? {
                Some(reason) => {
                    let msg = format!("{name}: skipped: {reason}");
                    warn!("{msg}");
                    messages.push(msg);
                }
                None => ready.push(name.clone()),
            }
        }

        let scene: &BakeScene = scene;
        let materials_of = |scene: &BakeScene, names: &[String]| -> Vec<String> {
            let mut out = Vec::new();
            for n in names {
                if let Some(o) = scene.object(n) {
                    for m in scene.object_materials(o) {
                        push_unique(&mut out, &m.name);
                    }
                }
            }
            out
        };

        let units = match settings.mode {
            BakeMode::PerObjectBatch => ready
                .iter()
                .map(|name| BakeUnit {
                    label: Some(name.clone()),
                    objects: vec![name.clone()],
                    materials: materials_of(scene, std::slice::from_ref(name)),
                    receivers: Vec::new(),
                })
                .collect(),
            _ if ready.is_empty() => Vec::new(),
            _ => vec![BakeUnit {
                label: None,
                materials: materials_of(scene, &ready),
                objects: ready,
                receivers: Vec::new(),
            }],
        };
        Ok(units)
    }

    /// Checks the per-object skip conditions, generating UVs when allowed.
    fn prepare_object(
        &mut self,
        scene: &mut BakeScene,
        name: &str,
        settings: &BakeSettings,
        needs_material: bool,
    ) -> Result<Option<SkipReason>> {
        let object = scene
            .object(name)
            .ok_or_else(|| anyhow!("object not found: {name}"))?;
        if object.hide_render {
            return Ok(Some(SkipReason::HiddenFromRender));
        }
        if needs_material {
            if object.material_slots.is_empty() {
                return Ok(Some(SkipReason::NoMaterial));
            }
            if object.material_slots.iter().any(Option::is_none) {
                return Ok(Some(SkipReason::EmptyMaterialSlot));
            }
        }
        if object.uv_layers.is_empty() {
            if !settings.auto_uv_unwrap {
                return Ok(Some(SkipReason::MissingUvMap));
            }
            let object = scene
                .object_mut(name)
                .ok_or_else(|| anyhow!("object not found: {name}"))?;
            unwrap_uvs(&mut *self.uv, object, &settings.uv_unwrap)?;
            info!("{name}: generated a UV map");
        }
        Ok(None)
    }

    fn bake_job(
        &mut self,
        scene: &mut BakeScene,
        settings: &BakeSettings,
        unit: &BakeUnit,
        job: &Job,
        out_dir: &Path,
        base: &str,
    ) -> Result<JobOutcome> {
        let target = job.target();
        if let BakeTarget::VertexColor(layer) = &target {
            let has_layer = unit
                .objects
                .iter()
                .filter_map(|n| scene.object(n))
                .any(|o| o.vertex_colors.iter().any(|l| &l.name == layer));
            if !has_layer {
                return Ok(JobOutcome::Skipped(SkipReason::MissingVertexColors));
            }
        }

        let suffix = job
            .suffix
            .clone()
            .unwrap_or_else(|| settings.suffix_for(&job.name));
        let suffix = match &job.sub_name {
            Some(sub) => format!("{suffix}_{sub}"),
            None => suffix,
        };
        let image_name = format!("{}{base}_{suffix}", settings.prefix);
        let path = out_dir.join(format!("{image_name}.{}", settings.file_format.extension()));

        if path.exists() && !settings.overwrite {
            let handle = self.images.load(&path)?;
            info!("{base}: '{}' exists, using {}", job.display_name(), path.display());
            return Ok(JobOutcome::Baked(BakedImage {
                job: job.display_name(),
                object: unit.label.clone(),
                path,
                handle,
                cached: true,
            }));
        }

        let [width, height] = settings.resolution;
        let depth = job.color_depth.unwrap_or(settings.color_depth);
        let is_float = settings.file_format == FileFormat::OpenExr || depth != ColorDepth::Eight;
        let handle = self
            .images
            .new_image(&image_name, width, height, settings.color_mode.has_alpha(), is_float)?;

        let options = IsolateOptions {
            exclude_transparent_colors: settings.exclude_transparent_colors,
        };
        let request = BakeRequest {
            kind: target.bake_kind(),
            pass_filter: settings.diffuse_pass_filter,
            selected_to_active: settings.mode == BakeMode::SelectedToActive,
            cage: settings.selected_to_active,
            normal_space: settings.normal_space,
            objects: unit.objects.clone(),
            image: image_name.clone(),
            width,
            height,
        };

        let pixels = {
            let mut scope = ScratchScope::new(scene);
            for m in &unit.materials {
                let (graph, groups) = scope.material_mut(m)?;
                prepare_export(graph, groups, &target, options, &image_name)?;
            }
            for m in &unit.receivers {
                let (graph, _) = scope.material_mut(m)?;
                install_bake_target(graph, &image_name)?;
            }
            let samples = job.samples.unwrap_or(settings.samples);
            let mut service = SamplesOverride::new(&mut *self.service, samples);
            service.bake(&scope, &request)?
        };

        self.images.write_pixels(&handle, pixels)?;
        self.images
            .save_as(&handle, &path, &SaveOptions::from_settings(settings, job.color_depth))?;
        self.images.reload(&handle)?;
        info!("{base}: baked '{}' to {}", job.display_name(), path.display());

        Ok(JobOutcome::Baked(BakedImage {
            job: job.display_name(),
            object: unit.label.clone(),
            path,
            handle,
            cached: false,
        }))
    }

    /// Writes the alpha image's luminance into the color image's alpha channel.
    fn fold_alpha(&mut self, images: &[BakedImage]) -> Result<()> {
        let (Some(color), Some(alpha)) = (
            images.iter().find(|i| i.job == JOB_COLOR),
            images.iter().find(|i| i.job == JOB_ALPHA),
        ) else {
            return Ok(());
        };
        if color.cached {
            return Ok(());
        }
        let alpha_px = &self
            .images
            .get(&alpha.handle)
            .ok_or_else(|| anyhow!("image not found: {}", alpha.handle.name()))?
            .pixels;
        let mut color_px = self
            .images
            .get(&color.handle)
            .ok_or_else(|| anyhow!("image not found: {}", color.handle.name()))?
            .pixels
            .clone();
        if color_px.dimensions() != alpha_px.dimensions() {
            bail!("color and alpha images differ in size");
        }
        for (c, a) in color_px.pixels_mut().zip(alpha_px.pixels()) {
            c.0[3] = luminance(a.0).clamp(0.0, 1.0);
        }
        self.images.write_pixels(&color.handle, color_px)?;
        self.images.save(&color.handle)
    }
}
