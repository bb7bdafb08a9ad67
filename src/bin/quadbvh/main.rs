//! quadbvh CLI - build and benchmark accelerators on procedural scenes.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use quadbvh::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_TRIANGLES: usize = 100_000;
const DEFAULT_RAYS: usize = 1_000_000;
const DEFAULT_SEED: u64 = 1;

/// Hits from two accelerators agree when their distances are this close.
const T_TOLERANCE: f32 = 1e-3;

struct BenchArgs {
    triangles: usize,
    rays: usize,
    instances: usize,
    accels: Vec<AcceleratorType>,
    seed: u64,
    config: AcceleratorConfig,
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    // Parse global flags
    let mut level = "info";
    let mut rest: Vec<&str> = Vec::new();
    for arg in &args {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            _ => rest.push(arg),
        }
    }
    #[allow(clippy::let_unit_value)]
    let _guard = init_tracing(level);

    let result = match rest.first().copied() {
        None | Some("help" | "h" | "-h" | "--help") => {
            print_help();
            Ok(())
        }
        Some("bench" | "b") => parse_bench(&rest[1..]).and_then(|a| cmd_bench(&a)),
        Some("config" | "c") => cmd_config(),
        Some("version" | "--version") => {
            println!("{}", version_banner());
            Ok(())
        }
        Some(other) => {
            print_help();
            Err(anyhow!("unknown command: {other}"))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Console logging filtered by `RUST_LOG` or the verbosity flags. With
/// `QUADBVH_TRACE=1`, spans also go to `trace.json`.
#[cfg(feature = "trace")]
fn init_tracing(level: &str) -> Option<tracing_chrome::FlushGuard> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter(level));

    if env::var("QUADBVH_TRACE").ok().as_deref() != Some("1") {
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();
    let subscriber = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(chrome_layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

/// Console logging filtered by `RUST_LOG` or the verbosity flags.
#[cfg(not(feature = "trace"))]
fn init_tracing(level: &str) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter(level));
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}

fn version_banner() -> String {
    format!(
        "quadbvh-cli {} (built {} {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("QUADBVH_BUILD_DATE").unwrap_or("unknown"),
        option_env!("QUADBVH_BUILD_TIME").unwrap_or("unknown"),
    )
}

fn print_help() {
    println!("quadbvh-cli - ray acceleration structure toolkit");
    println!();
    println!("USAGE:");
    println!("    quadbvh-cli [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    b, bench      Build accelerators over a random scene and cast rays");
    println!("    c, config     Print the default configuration as JSON");
    println!("    version       Print the version and build stamp");
    println!("    h, help       Show this help");
    println!();
    println!("BENCH OPTIONS:");
    println!("    --triangles N    Triangles per mesh (default {DEFAULT_TRIANGLES})");
    println!("    --rays M         Rays to cast (default {DEFAULT_RAYS})");
    println!("    --instances K    Place the mesh K times as instances (default 0)");
    println!("    --accel TYPE     AUTO, BVH, QBVH, MQBVH, MBVH or all (default all)");
    println!("    --seed S         Random seed (default {DEFAULT_SEED})");
    println!("    --config FILE    JSON accelerator configuration");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Debug output");
    println!("    -vv, --trace     Trace output (very verbose)");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG         Overrides the log filter");
    println!("    QUADBVH_TRACE=1  Write a Chrome trace to trace.json (trace feature)");
}

fn parse_bench(args: &[&str]) -> anyhow::Result<BenchArgs> {
    let mut bench = BenchArgs {
        triangles: DEFAULT_TRIANGLES,
        rays: DEFAULT_RAYS,
        instances: 0,
        accels: AcceleratorType::CONCRETE.to_vec(),
        seed: DEFAULT_SEED,
        config: AcceleratorConfig::default(),
    };

    let mut it = args.iter();
    while let Some(&flag) = it.next() {
        let mut value = || {
            it.next()
                .copied()
                .ok_or_else(|| anyhow!("missing value for {flag}"))
        };
        match flag {
            "--triangles" | "-t" => bench.triangles = value()?.parse().context("--triangles")?,
            "--rays" | "-r" => bench.rays = value()?.parse().context("--rays")?,
            "--instances" | "-i" => bench.instances = value()?.parse().context("--instances")?,
            "--seed" | "-s" => bench.seed = value()?.parse().context("--seed")?,
            "--accel" | "-a" => {
                let v = value()?;
                bench.accels = if v.eq_ignore_ascii_case("all") {
                    AcceleratorType::CONCRETE.to_vec()
                } else {
                    vec![v.parse()?]
                };
            }
            "--config" | "-c" => {
                let path = value()?;
                bench.config = AcceleratorConfig::load(path)
                    .with_context(|| format!("loading {path}"))?;
            }
            other => bail!("unknown bench option: {other}"),
        }
    }
    Ok(bench)
}

fn cmd_config() -> anyhow::Result<()> {
    println!("{}", AcceleratorConfig::default().to_json_string()?);
    Ok(())
}

/// Small random triangles scattered through the unit cube.
fn random_soup(rng: &mut StdRng, count: usize) -> anyhow::Result<TriangleMesh> {
    let mut vertices = Vec::with_capacity(count * 3);
    let mut triangles = Vec::with_capacity(count);
    let size = (1.0 / (count.max(1) as f32)).cbrt() * 2.0;
    for i in 0..count as u32 {
        let center = Vec3::new(rng.random(), rng.random(), rng.random());
        for _ in 0..3 {
            let jitter = Vec3::new(
                rng.random_range(-0.5..0.5),
                rng.random_range(-0.5..0.5),
                rng.random_range(-0.5..0.5),
            );
            vertices.push(center + jitter * size);
        }
        triangles.push(Triangle::new(i * 3, i * 3 + 1, i * 3 + 2));
    }
    Ok(TriangleMesh::new(vertices, triangles)?)
}

fn build_scene(rng: &mut StdRng, bench: &BenchArgs) -> anyhow::Result<Vec<Arc<Mesh>>> {
    let base = Arc::new(random_soup(rng, bench.triangles)?);
    if bench.instances == 0 {
        return Ok(vec![Arc::new(Mesh::Triangle(base))]);
    }
    let side = (bench.instances as f32).sqrt().ceil() as usize;
    (0..bench.instances)
        .map(|i| -> anyhow::Result<Arc<Mesh>> {
            let offset = Vec3::new((i % side) as f32 * 1.5, (i / side) as f32 * 1.5, 0.0);
            let m = Mesh::instance(base.clone(), Mat4::from_translation(offset))?;
            Ok(Arc::new(m))
        })
        .collect()
}

/// Rays from random points on a sphere around the scene toward random
/// points inside it.
fn random_rays(rng: &mut StdRng, scene: &BBox3f, count: usize) -> Vec<Ray> {
    let center = scene.center();
    let radius = scene.size().length().max(1.0);
    (0..count)
        .map(|_| {
            let dir = loop {
                let v = Vec3::new(
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                );
                let len = v.length_squared();
                if len > 1e-4 && len <= 1.0 {
                    break v.normalize();
                }
            };
            let origin = center + dir * radius;
            let target = scene.min
                + scene.size() * Vec3::new(rng.random(), rng.random(), rng.random());
            Ray::new(origin, target - origin)
        })
        .collect()
}

fn cmd_bench(bench: &BenchArgs) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(bench.seed);
    let meshes = build_scene(&mut rng, bench)?;
    let triangle_count: usize = meshes.iter().map(|m| m.triangle_count()).sum();
    let scene_box = meshes
        .iter()
        .fold(BBox3f::EMPTY, |acc, m| acc.union(&m.bbox()));
    let rays = random_rays(&mut rng, &scene_box, bench.rays);
    info!(
        meshes = meshes.len(),
        triangles = triangle_count,
        rays = rays.len(),
        seed = bench.seed,
        "scene ready"
    );

    let mut data_set = DataSet::new(bench.config.clone());
    for mesh in &meshes {
        data_set.add(mesh.clone());
    }

    println!(
        "{:<8} {:>12} {:>12} {:>10} {:>12}",
        "accel", "build ms", "trace ms", "hits", "Mrays/s"
    );
    let mut reference: Option<(AcceleratorType, Vec<RayHit>)> = None;
    for &ty in &bench.accels {
        let build_start = Instant::now();
        let accel = data_set.get_accelerator(ty)?;
        let build_ms = build_start.elapsed().as_secs_f64() * 1e3;

        let trace_start = Instant::now();
        let hits: Vec<RayHit> = rays.par_iter().map(|r| accel.intersect(r)).collect();
        let trace_s = trace_start.elapsed().as_secs_f64();
        let hit_count = hits.iter().filter(|h| !h.is_miss()).count();
        let mrays = rays.len() as f64 / trace_s.max(1e-9) / 1e6;
        println!(
            "{:<8} {:>12.2} {:>12.2} {:>10} {:>12.2}",
            accel.accel_type(),
            build_ms,
            trace_s * 1e3,
            hit_count,
            mrays
        );

        match &reference {
            None => reference = Some((accel.accel_type(), hits)),
            Some((ref_ty, ref_hits)) => {
                let mismatches = count_mismatches(ref_hits, &hits);
                if mismatches > 0 {
                    warn!(
                        accel = %accel.accel_type(),
                        reference = %ref_ty,
                        mismatches,
                        "hit results differ"
                    );
                }
            }
        }
    }
    Ok(())
}

/// Rays where one accelerator hits and the other misses, or where the
/// distances disagree.
fn count_mismatches(a: &[RayHit], b: &[RayHit]) -> usize {
    a.iter()
        .zip(b)
        .filter(|(x, y)| {
            x.is_miss() != y.is_miss()
                || (!x.is_miss() && (x.t - y.t).abs() > T_TOLERANCE * x.t.max(1.0))
        })
        .count()
}
