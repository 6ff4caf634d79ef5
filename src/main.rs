use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use log::{info, warn};

use node_forge_bake::bake::{BakeStatus, Baker};
use node_forge_bake::bake_service::{FlatBaker, LayerUvUnwrap};
use node_forge_bake::image_store::DiskImageStore;
use node_forge_bake::{dsl, jobs, settings};

#[derive(Debug, Default, Clone)]
struct Cli {
    scene: Option<PathBuf>,
    archive: Option<PathBuf>,
    settings: Option<PathBuf>,
    detect: bool,
    output_dir: Option<PathBuf>,
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--detect" => {
                cli.detect = true;
                i += 1;
            }
            "--scene" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --scene"));
                };
                cli.scene = Some(PathBuf::from(v));
                i += 2;
            }
            "--archive" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --archive"));
                };
                cli.archive = Some(PathBuf::from(v));
                i += 2;
            }
            "--settings" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --settings"));
                };
                cli.settings = Some(PathBuf::from(v));
                i += 2;
            }
            "--outputdir" | "--output-dir" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --output-dir"));
                };
                cli.output_dir = Some(PathBuf::from(v));
                i += 2;
            }
            other => {
                return Err(anyhow!(
                    "unknown argument: {other} (supported: --scene <scene.json>, --archive <bundle.zip>, --settings <settings.json>, --detect, --output-dir <dir>)"
                ));
            }
        }
    }
    if cli.scene.is_some() == cli.archive.is_some() {
        bail!("pass exactly one of --scene or --archive");
    }
    Ok(cli)
}

fn load_inputs(cli: &Cli) -> Result<(dsl::BakeScene, settings::BakeSettings)> {
    let (scene, bundled) = match (&cli.scene, &cli.archive) {
        (Some(path), _) => (dsl::load_scene_from_path(path)?, None),
        (None, Some(path)) => dsl::load_scene_from_archive(path)?,
        (None, None) => bail!("no scene given"),
    };
    let mut settings = match &cli.settings {
        Some(path) => settings::load_settings_from_path(path)?,
        None => bundled.unwrap_or_default(),
    };
    if let Some(dir) = &cli.output_dir {
        settings.output_dir = dir.display().to_string();
    }
    Ok((scene, settings))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    let (mut scene, settings) = load_inputs(&cli)?;

    if cli.detect {
        let found = jobs::detect_jobs(&scene, &settings)?;
        println!("{}", serde_json::to_string_pretty(&found.into_vec())?);
        return Ok(());
    }

    let mut service = FlatBaker::new();
    let mut images = DiskImageStore::new();
    let mut uv = LayerUvUnwrap::default();
    let report = Baker::new(&mut service, &mut images, &mut uv).bake(&mut scene, &settings);

    for m in &report.messages {
        info!("{m}");
    }
    for img in &report.images {
        println!("{}", img.path.display());
    }
    if report.status == BakeStatus::Cancelled {
        warn!("bake cancelled");
        std::process::exit(1);
    }
    Ok(())
}
