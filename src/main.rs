use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use mortality_atlas::{
    load_snapshot, write_outputs, AtlasConfig, GroupLevel, OverrideRules, Pipeline,
    PipelineSettings,
};

#[derive(Parser)]
#[command(name = "mortality-atlas", version, about = "Motorcycle mortality rates by region and group")]
struct Cli {
    /// Config file (JSON); defaults apply when it does not exist
    #[arg(short, long, global = true, default_value = "atlas.json", env = "ATLAS_CONFIG")]
    config: PathBuf,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build tables, geometry and color scales and write every output
    Build {
        /// Override the configured output directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Report how geometry labels resolved against statistics labels
    Audit,

    /// Browse both tables in the terminal
    View,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<AtlasConfig> {
    if path.exists() {
        AtlasConfig::load(path)
    } else {
        tracing::info!("config {:?} not found; using defaults", path);
        Ok(AtlasConfig::default())
    }
}

fn build_pipeline(config: &AtlasConfig) -> Result<Pipeline> {
    println!("📂 Loading inputs...");
    let snapshot = load_snapshot(config)?;
    println!("✓ {} mortality rows", snapshot.mortality.len());
    println!("✓ {} population rows", snapshot.population.len());
    println!("✓ {} crosswalk entries", snapshot.crosswalk.len());
    println!("✓ {} region boundaries", snapshot.regions.len());
    if let Some(groups) = &snapshot.group_boundaries {
        println!("✓ {} group boundaries", groups.len());
    }

    let overrides = match &config.overrides {
        Some(path) => {
            let resolved = config.resolve_input("overrides", path)?;
            OverrideRules::from_file(resolved)?
        }
        None => OverrideRules::with_defaults(),
    };

    Ok(Pipeline::new(
        snapshot,
        PipelineSettings {
            window: config.years,
            overrides,
        },
    ))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Build { out } => run_build(&config, out),
        Command::Audit => run_audit(&config),
        Command::View => run_view(&config),
    }
}

fn run_build(config: &AtlasConfig, out: Option<PathBuf>) -> Result<()> {
    println!("🗺️  Mortality Atlas - Build");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let pipeline = build_pipeline(config)?;

    println!("\n📊 Aggregating...");
    for level in [GroupLevel::Region, GroupLevel::Group] {
        let dataset = pipeline.dataset(level);
        let scale = pipeline.color_scale(level);
        println!("✓ {}", dataset.summary());
        println!("  color range {:.2} .. {:.2}", scale.min(), scale.max());
    }

    let report = pipeline.crosswalk_report();
    if !report.resolutions.is_empty() {
        println!("✓ {}", report.summary());
    }

    println!("\n💾 Writing outputs...");
    let dir = out.unwrap_or_else(|| config.output_dir());
    for path in write_outputs(&pipeline, &config.output, &dir)? {
        println!("✓ {}", path.display());
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Build complete (fingerprint {})", pipeline.fingerprint().short());

    Ok(())
}

fn run_audit(config: &AtlasConfig) -> Result<()> {
    println!("🔍 Mortality Atlas - Crosswalk Audit");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let pipeline = build_pipeline(config)?;
    let crosswalk = pipeline.crosswalk();

    for (kept, dropped) in crosswalk.collisions() {
        println!("⚠️  '{}' collides with '{}' after normalization", dropped, kept);
    }

    let report = pipeline.crosswalk_report();
    if report.resolutions.is_empty() {
        println!("\nNo group boundary layer configured; groups are dissolved from regions.");
        return Ok(());
    }

    println!();
    for resolution in &report.resolutions {
        let marker = if resolution.is_resolved() { "✓" } else { "✗" };
        println!(
            "{} {:<40} → {:<40} [{}]",
            marker,
            resolution.raw_label,
            resolution.label,
            resolution.method.as_str()
        );
    }

    println!("\n{}", report.summary());
    Ok(())
}

#[cfg(feature = "tui")]
fn run_view(config: &AtlasConfig) -> Result<()> {
    use mortality_atlas::ui::{run_ui, App};

    let pipeline = build_pipeline(config)?;
    let regions = pipeline.dataset(GroupLevel::Region);
    let groups = pipeline.dataset(GroupLevel::Group);

    println!("Starting viewer... (Press 'q' to quit)\n");
    let mut app = App::new(&regions, &groups);
    run_ui(&mut app)?;

    println!("\n✅ Viewer closed");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_view(_config: &AtlasConfig) -> Result<()> {
    eprintln!("❌ Viewer not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    std::process::exit(1);
}
