//! World generator binary — pre-generates terrain sections to disk.
//!
//! Usage: cargo run --release --bin generate_world -- [OPTIONS]
//!
//! Options:
//!   --radius <N>      Sections generated around the origin (default: 4)
//!   --seed <SEED>     Random seed (default: 12345)
//!   --name <NAME>     World name / output directory (default: "terrain")
//!   --scale <SCALE>   Terrain noise scale (default: 150.0)
//!   --height <H>      Terrain height scale (default: 80.0)
//!   --config <PATH>   World configuration JSON (default: built-in)
//!
//! Output structure:
//!   assets/worlds/<name>/
//!     index.bin               # World parameters + available sections
//!     0_0.section             # One file per generated section
//!     ...

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use vxworld::core::{Result, WorldConfig};
use vxworld::meshing::FaceMesher;
use vxworld::render::NullRenderer;
use vxworld::streaming::DirStore;
use vxworld::terrain::{NoiseTerrainGenerator, TerrainParams};
use vxworld::voxel::{World, WorldServices};

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    if let Err(e) = run() {
        eprintln!("generate_world failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let radius = parse_i32_arg(&args, "--radius").unwrap_or(4).max(0);
    let seed = parse_u32_arg(&args, "--seed").unwrap_or(12345);
    let name = parse_str_arg(&args, "--name").unwrap_or_else(|| "terrain".to_string());
    let scale = parse_f32_arg(&args, "--scale").unwrap_or(150.0);
    let height_scale = parse_f32_arg(&args, "--height").unwrap_or(80.0);

    let config = match parse_str_arg(&args, "--config") {
        Some(path) => WorldConfig::load(&PathBuf::from(path))?,
        None => WorldConfig::default(),
    };

    let output_dir = PathBuf::from(format!("assets/worlds/{}", name));

    println!("=== vxworld World Generator ===");
    println!("World:   {}", name);
    println!("Radius:  {} sections ({} x {})", radius, radius * 2 + 1, radius * 2 + 1);
    println!("Seed:    {}", seed);
    println!("Scale:   {}, Height: {}", scale, height_scale);
    println!("Section: {} chunks of {} blocks, {} LODs",
        config.section_size, config.chunk_size, config.lod_levels);
    println!("Output:  {}", output_dir.display());
    println!();

    let terrain_params = TerrainParams {
        seed,
        scale,
        height_scale,
        octaves: 5,
        bounds: Some(radius),
        ..TerrainParams::default()
    };

    let services = WorldServices::new(Arc::new(FaceMesher), Arc::new(NullRenderer::default()))
        .with_generator(Arc::new(NoiseTerrainGenerator::new(terrain_params)));
    let store = DirStore::open(&output_dir)?;
    let mut world = World::open(config, services, Box::new(store))?;

    let mut coords = Vec::new();
    for y in -radius..=radius {
        for x in -radius..=radius {
            coords.push((x, y));
        }
    }

    let start = Instant::now();
    let total = coords.len();
    let mut generated = 0usize;
    let mut skipped = 0usize;
    for (done, &(x, y)) in coords.iter().enumerate() {
        if world.is_section_available(x, y) {
            skipped += 1;
        } else if world.load_section(x, y, 0, false)? {
            // Unloading saves the freshly generated section
            world.unload_section(x, y)?;
            generated += 1;
        }

        let done = done + 1;
        if done % 16 == 0 || done == total {
            let elapsed = start.elapsed().as_secs_f64();
            let rate = done as f64 / elapsed.max(1e-6);
            let remaining = (total - done) as f64 / rate;
            eprintln!("  [{}/{}] {:.1} sections/sec, ~{:.0}s remaining",
                done, total, rate, remaining);
        }
    }
    world.flush()?;

    println!();
    println!("Generated {} sections ({} already present) in {:.2}s",
        generated, skipped, start.elapsed().as_secs_f64());
    Ok(())
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_i32_arg(args: &[String], flag: &str) -> Option<i32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
