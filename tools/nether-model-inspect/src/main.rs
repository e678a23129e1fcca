//! nether-model-inspect - Scene file inspection tool
//!
//! Loads a GLB, packaged glTF (.gltf.ovrscene) or legacy scene archive
//! through nether-model and prints what came out of it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nether_model::{LoaderConfig, ModelError, ModelFile, ModelPrograms, ProgramHandle, load_model};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "nether-model-inspect")]
#[command(about = "Inspect packaged 3D scene files")]
#[command(version)]
struct Cli {
    /// Loader settings (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a scene file
    Info {
        /// Input scene file
        input: PathBuf,
    },

    /// Print the node hierarchy with global positions
    Nodes {
        /// Input scene file
        input: PathBuf,
    },

    /// List animations, their channels and timelines
    Animations {
        /// Input scene file
        input: PathBuf,
    },

    /// Load a scene file and report every problem found
    Validate {
        /// Input scene files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let config = match &cli.config {
        Some(path) => {
            LoaderConfig::load(path).with_context(|| format!("Failed to read loader config {:?}", path))?
        }
        None => LoaderConfig::default(),
    };
    // One program for every technique; inspection never renders.
    let programs = ModelPrograms::single_texture(ProgramHandle(0));

    match cli.command {
        Commands::Info { input } => {
            let model = load(&input, &programs, &config)?;
            print_info(&model);
        }

        Commands::Nodes { input } => {
            let model = load(&input, &programs, &config)?;
            print_nodes(&model);
        }

        Commands::Animations { input } => {
            let model = load(&input, &programs, &config)?;
            print_animations(&model);
        }

        Commands::Validate { inputs } => {
            let mut failed = 0;
            for input in &inputs {
                if !validate(input, &programs, &config) {
                    failed += 1;
                }
            }
            if failed > 0 {
                tracing::error!("{} of {} files failed validation", failed, inputs.len());
                std::process::exit(1);
            }
            tracing::info!("All {} files are valid", inputs.len());
        }
    }

    Ok(())
}

fn load(input: &Path, programs: &ModelPrograms, config: &LoaderConfig) -> Result<ModelFile> {
    load_model(input, programs, config).with_context(|| format!("Failed to load {:?}", input))
}

fn validate(input: &Path, programs: &ModelPrograms, config: &LoaderConfig) -> bool {
    match load_model(input, programs, config) {
        Ok(model) => {
            tracing::info!(
                "{:?}: ok ({} surfaces, {} nodes)",
                input,
                model.surfaces().count(),
                model.nodes.len()
            );
            true
        }
        Err(ModelError::Invalid { problems, .. }) => {
            tracing::error!("{:?}: {} problems", input, problems.len());
            for problem in &problems {
                tracing::error!("  {}", problem);
            }
            false
        }
        Err(e) => {
            match e.kind() {
                Some(kind) => tracing::error!("{:?}: {}: {}", input, kind, e),
                None => tracing::error!("{:?}: {}", input, e),
            }
            false
        }
    }
}

fn print_info(model: &ModelFile) {
    println!("{}", model.file_name);
    println!("  buffers:       {}", model.buffers.len());
    println!("  accessors:     {}", model.accessors.len());
    println!(
        "  textures:      {} ({} wrappers, {} samplers)",
        model.textures.len(),
        model.texture_wrappers.len(),
        model.samplers.len()
    );
    println!("  materials:     {}", model.materials.len());
    println!("  meshes:        {}", model.meshes.len());
    println!("  cameras:       {}", model.cameras.len());
    println!("  nodes:         {}", model.nodes.len());
    println!("  skins:         {}", model.skins.len());
    println!("  animations:    {}", model.animations.len());
    if !model.joints.is_empty() || !model.tags.is_empty() {
        println!("  joints / tags: {} / {}", model.joints.len(), model.tags.len());
    }

    if !model.collisions.is_empty() || !model.ground_collisions.is_empty() {
        println!(
            "  collisions:    {} ({} ground)",
            model.collisions.polytopes.len(),
            model.ground_collisions.polytopes.len()
        );
    }
    if let Some(trace) = &model.trace {
        println!(
            "  trace model:   {} triangles, {} nodes, {} leafs",
            trace.triangle_count(),
            trace.nodes.len(),
            trace.leafs.len()
        );
    }

    let bounds = model.bounds();
    if !bounds.is_empty() {
        println!("  bounds:        {:?} .. {:?}", bounds.min, bounds.max);
    }
    if !model.timelines.is_empty() {
        println!(
            "  time domain:   {:.3}s .. {:.3}s",
            model.animation_start_time, model.animation_end_time
        );
    }

    println!("Surfaces:");
    for surface in model.surfaces() {
        println!(
            "  '{}': {} vertices, {} indices, {:?}{}",
            surface.name,
            surface.attribs.positions.len(),
            surface.indices.len(),
            surface.technique.kind(),
            if surface.skinned { " (skinned)" } else { "" }
        );
    }

    for texture in model.textures.iter().filter(|t| t.is_placeholder()) {
        println!("  texture '{}' uses the default image", texture.name);
    }
}

fn print_nodes(model: &ModelFile) {
    for scene in &model.sub_scenes {
        println!(
            "Scene '{}'{}",
            scene.name,
            if scene.visible { " (visible)" } else { "" }
        );
        for &root in &scene.roots {
            print_node(model, root, 1);
        }
    }
}

fn print_node(model: &ModelFile, index: usize, depth: usize) {
    let Some(node) = model.nodes.get(index) else {
        return;
    };
    let position = node.global_transform.w_axis.truncate();
    let mut line = format!(
        "{}[{}] '{}' local {:?} global {:?}",
        "  ".repeat(depth),
        index,
        node.name,
        node.translation,
        position
    );
    if let Some(mesh) = node.mesh {
        line.push_str(&format!(" mesh {}", mesh));
    }
    if let Some(camera) = node.camera {
        line.push_str(&format!(" camera {}", camera));
    }
    if let Some(skin) = node.skin {
        line.push_str(&format!(" skin {}", skin));
    }
    println!("{}", line);
    for &child in &node.children {
        print_node(model, child, depth + 1);
    }
}

fn print_animations(model: &ModelFile) {
    if model.animations.is_empty() {
        println!("No animations in {}", model.file_name);
        return;
    }
    println!(
        "Time domain: {:.3}s .. {:.3}s",
        model.animation_start_time, model.animation_end_time
    );
    println!("Timelines:");
    for (i, timeline) in model.timelines.iter().enumerate() {
        println!(
            "  [{}] {} keys, {:.3}s .. {:.3}s{}",
            i,
            timeline.sample_count(),
            timeline.start_time,
            timeline.end_time,
            if timeline.is_fixed_rate() { ", fixed rate" } else { "" }
        );
    }
    println!("Animations:");
    for (i, animation) in model.animations.iter().enumerate() {
        println!(
            "  [{}] '{}': {} samplers, {} channels",
            i,
            animation.name,
            animation.samplers.len(),
            animation.channels.len()
        );
        for channel in &animation.channels {
            let Some(sampler) = animation.samplers.get(channel.sampler) else {
                continue;
            };
            let target = channel
                .node
                .and_then(|n| model.nodes.get(n))
                .map_or("<none>", |n| n.name.as_str());
            let timeline = sampler
                .timeline
                .map_or_else(|| "no timeline".to_string(), |t| format!("timeline {}", t));
            println!(
                "      {:?} of '{}': {:?}, {}",
                channel.path, target, sampler.interpolation, timeline
            );
        }
    }
}
