//! flowpath CLI - longest flow path extraction from D8 flow direction

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use flowpath_algorithms::catalog::{ArtifactNames, DirectoryCatalog, LayerManifest};
use flowpath_algorithms::hydrology::{
    flow_length, resolve_grid, D8WatershedLabeler, ExtentPolicy, FlowLengthDirection, FlowLengthParams,
    LongestFlowPathExtractor, LongestFlowPathParams, OutletOutcome, PathStrategy, Seed, WatershedLabeler,
};
use flowpath_core::io::{read_geotiff, read_outlets, write_geotiff, GeoTiffOptions};
use flowpath_core::{D8Encoding, Outlet, Raster, RasterElement};
use flowpath_parallel::ProcessingMode;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "flowpath")]
#[command(author, version, about = "Longest flow path extraction from D8 flow direction", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Hydrology algorithms
    Hydrology {
        #[command(subcommand)]
        algorithm: HydrologyCommands,
    },
}

// ─── Hydrology subcommands ──────────────────────────────────────────────

#[derive(Subcommand)]
enum HydrologyCommands {
    /// Watershed labeling from outlet points
    Watershed {
        /// Input flow direction raster (D8 codes)
        input: PathBuf,
        /// Output file (outlet ids, -1 = no-data)
        output: PathBuf,
        /// Outlets as "id:x,y;id:x,y" in map units (id optional)
        #[arg(long)]
        outlets: Option<String>,
        /// GeoJSON file of outlet points
        #[arg(long)]
        outlets_file: Option<PathBuf>,
        /// Flow direction encoding: esri, sequential
        #[arg(short, long, default_value = "esri")]
        encoding: String,
        /// Grid extent: union, intersection, first
        #[arg(long, default_value = "union")]
        extent: String,
    },
    /// Upstream or downstream flow length
    FlowLength {
        /// Input flow direction raster (D8 codes)
        input: PathBuf,
        /// Output file (map units)
        output: PathBuf,
        /// Direction: up, down
        #[arg(short, long, default_value = "down")]
        direction: String,
        /// Flow direction encoding: esri, sequential
        #[arg(short, long, default_value = "esri")]
        encoding: String,
    },
    /// Longest flow path of every outlet's watershed
    LongestFlowPath {
        /// Input flow direction raster (D8 codes)
        input: PathBuf,
        /// Output location (directory)
        location: String,
        /// File name prefix for every output
        #[arg(short, long, default_value = "")]
        prefix: String,
        /// Outlets as "id:x,y;id:x,y" in map units (id optional)
        #[arg(long)]
        outlets: Option<String>,
        /// GeoJSON file of outlet points
        #[arg(long)]
        outlets_file: Option<PathBuf>,
        /// JSON file with extraction parameters; flags override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Path selection: traced, threshold
        #[arg(short, long)]
        strategy: Option<String>,
        /// Grid extent: union, intersection, first
        #[arg(long)]
        extent: Option<String>,
        /// Flow direction encoding: esri, sequential
        #[arg(short, long)]
        encoding: Option<String>,
        /// Number of worker threads
        #[arg(short, long)]
        threads: Option<usize>,
        /// Process outlets one at a time, in input order
        #[arg(long, conflicts_with = "threads")]
        sequential: bool,
        /// Only write the path mask and polyline of each outlet
        #[arg(long)]
        no_intermediates: bool,
        /// Write the list of flow path layers as JSON
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn progress(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos}/{len} outlets ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

fn read_raster<T: RasterElement>(path: &Path) -> Result<Raster<T>> {
    let pb = spinner("Reading raster...");
    let raster: Raster<T> = read_geotiff(path, None)
        .with_context(|| format!("Failed to read raster {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} x {}", raster.cols(), raster.rows());
    Ok(raster)
}

fn write_result<T: RasterElement>(raster: &Raster<T>, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff(raster, path, Some(GeoTiffOptions::default()))
        .context("Failed to write output")?;
    pb.finish_and_clear();
    Ok(())
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn parse_encoding(s: &str) -> Result<D8Encoding> {
    match s.to_lowercase().as_str() {
        "esri" | "arcgis" | "power" => Ok(D8Encoding::Esri),
        "sequential" | "seq" => Ok(D8Encoding::Sequential),
        _ => anyhow::bail!("Unknown encoding: {}. Use esri or sequential.", s),
    }
}

fn parse_extent(s: &str) -> Result<ExtentPolicy> {
    match s.to_lowercase().as_str() {
        "union" => Ok(ExtentPolicy::Union),
        "intersection" | "intersect" => Ok(ExtentPolicy::Intersection),
        "first" | "first-input" | "first_input_bounds" => Ok(ExtentPolicy::FirstInputBounds),
        _ => anyhow::bail!("Unknown extent: {}. Use union, intersection, or first.", s),
    }
}

fn parse_strategy(s: &str) -> Result<PathStrategy> {
    match s.to_lowercase().as_str() {
        "traced" | "trace" => Ok(PathStrategy::Traced),
        "threshold" | "legacy" => Ok(PathStrategy::Threshold),
        _ => anyhow::bail!("Unknown strategy: {}. Use traced or threshold.", s),
    }
}

fn parse_direction(s: &str) -> Result<FlowLengthDirection> {
    match s.to_lowercase().as_str() {
        "up" | "upstream" => Ok(FlowLengthDirection::Upstream),
        "down" | "downstream" => Ok(FlowLengthDirection::Downstream),
        _ => anyhow::bail!("Unknown direction: {}. Use up or down.", s),
    }
}

/// Parse "id:x,y;x,y". Outlets without an id get their 1-based position.
fn parse_outlets(s: &str) -> Result<Vec<Outlet>> {
    s.split(';')
        .filter(|item| !item.trim().is_empty())
        .enumerate()
        .map(|(position, item)| {
            let (id, coords) = match item.split_once(':') {
                Some((id, coords)) => (
                    id.trim()
                        .parse::<i64>()
                        .with_context(|| format!("Invalid outlet id: {}", id))?,
                    coords,
                ),
                None => (position as i64 + 1, item),
            };
            let parts: Vec<&str> = coords.trim().split(',').collect();
            if parts.len() != 2 {
                anyhow::bail!("Outlet must be 'id:x,y' or 'x,y', got: {}", item);
            }
            let x: f64 = parts[0].trim().parse().context("Invalid x")?;
            let y: f64 = parts[1].trim().parse().context("Invalid y")?;
            Ok(Outlet::new(id, x, y))
        })
        .collect()
}

fn load_outlets(inline: Option<&str>, file: Option<&Path>) -> Result<Vec<Outlet>> {
    let outlets = match (inline, file) {
        (Some(_), Some(_)) => anyhow::bail!("Use either --outlets or --outlets-file, not both"),
        (Some(s), None) => parse_outlets(s)?,
        (None, Some(path)) => read_outlets(path)
            .with_context(|| format!("Failed to read outlets from {}", path.display()))?,
        (None, None) => anyhow::bail!("Outlets are required (--outlets or --outlets-file)"),
    };
    if outlets.is_empty() {
        anyhow::bail!("At least one outlet is required");
    }
    Ok(outlets)
}

fn load_params(config: Option<&Path>) -> Result<LongestFlowPathParams> {
    match config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
        }
        None => Ok(LongestFlowPathParams::default()),
    }
}

fn print_outcome(outcome: &OutletOutcome) {
    match outcome {
        OutletOutcome::Completed(path) => println!(
            "  outlet {}: length {:.3}, {} cells, {} line(s)",
            path.outlet,
            path.length,
            path.cells,
            path.geometry.0.len()
        ),
        OutletOutcome::Empty { outlet, reason, .. } => println!("  outlet {}: empty ({})", outlet, reason),
        OutletOutcome::Failed(err) => println!("  FAILED {}", err),
        OutletOutcome::Cancelled { outlet } => println!("  outlet {}: cancelled", outlet),
    }
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let raster = read_raster::<f64>(&input)?;
            let (rows, cols) = raster.shape();
            let bounds = raster.bounds();
            let stats = raster.statistics();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
            println!("Cell size: {}", raster.cell_size());
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            if let Some(crs) = raster.crs() {
                println!("CRS: {}", crs);
            }
            if let Some(nodata) = raster.nodata() {
                println!("NoData: {}", nodata);
            }
            println!("\nStatistics:");
            if let Some(min) = stats.min {
                println!("  Min: {:.4}", min);
            }
            if let Some(max) = stats.max {
                println!("  Max: {:.4}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.4}", mean);
            }
            if !raster.is_empty() {
                println!(
                    "  Valid cells: {} ({:.1}%)",
                    stats.valid_count,
                    100.0 * stats.valid_count as f64 / raster.len() as f64
                );
            }
        }

        // ── Hydrology ────────────────────────────────────────────────
        Commands::Hydrology { algorithm } => match algorithm {
            HydrologyCommands::Watershed {
                input,
                output,
                outlets,
                outlets_file,
                encoding,
                extent,
            } => {
                let encoding = parse_encoding(&encoding)?;
                let policy = parse_extent(&extent)?;
                let outlets = load_outlets(outlets.as_deref(), outlets_file.as_deref())?;
                let flow_dir = read_raster::<u8>(&input)?;
                let start = Instant::now();
                let grid = resolve_grid(&flow_dir, &outlets, policy).context("Failed to resolve grid")?;
                let seeds: Vec<Seed> = grid
                    .outlets
                    .iter()
                    .filter_map(|p| p.cell.map(|(row, col)| Seed::new(p.outlet.id, row, col)))
                    .collect();
                let result = D8WatershedLabeler
                    .label(&grid.flow_dir, encoding, &seeds)
                    .context("Failed to label watersheds")?;
                let elapsed = start.elapsed();
                write_result(&result, &output)?;
                done("Watershed", &output, elapsed);
            }

            HydrologyCommands::FlowLength {
                input,
                output,
                direction,
                encoding,
            } => {
                let params = FlowLengthParams {
                    direction: parse_direction(&direction)?,
                    encoding: parse_encoding(&encoding)?,
                };
                let flow_dir = read_raster::<u8>(&input)?;
                let start = Instant::now();
                let result = flow_length(&flow_dir, params).context("Failed to compute flow length")?;
                let elapsed = start.elapsed();
                write_result(&result, &output)?;
                done("Flow length", &output, elapsed);
            }

            HydrologyCommands::LongestFlowPath {
                input,
                location,
                prefix,
                outlets,
                outlets_file,
                config,
                strategy,
                extent,
                encoding,
                threads,
                sequential,
                no_intermediates,
                manifest,
            } => {
                let mut params = load_params(config.as_deref())?;
                if let Some(s) = strategy {
                    params.strategy = parse_strategy(&s)?;
                }
                if let Some(s) = extent {
                    params.extent_policy = parse_extent(&s)?;
                }
                if let Some(s) = encoding {
                    params.encoding = parse_encoding(&s)?;
                }
                if let Some(n) = threads {
                    params.mode = ProcessingMode::ParallelWith(n.max(1));
                }
                if sequential {
                    params.mode = ProcessingMode::Sequential;
                }
                if no_intermediates {
                    params.write_intermediates = false;
                }

                let outlets = load_outlets(outlets.as_deref(), outlets_file.as_deref())?;
                let flow_dir = read_raster::<u8>(&input)?;
                std::fs::create_dir_all(&location)
                    .with_context(|| format!("Failed to create output location {}", location))?;

                let catalog = DirectoryCatalog::new();
                let layers = LayerManifest::new();
                let names = ArtifactNames::new(&location, &prefix);
                let extractor = LongestFlowPathExtractor::new(&catalog, names)
                    .with_params(params)
                    .with_display(&layers);

                info!(
                    "Extracting longest flow paths for {} outlets ({:?}, {:?})",
                    outlets.len(),
                    params.strategy,
                    params.mode
                );
                let start = Instant::now();
                let pb = progress(outlets.len());
                let report = extractor
                    .extract_with_progress(&flow_dir, &outlets, |_| pb.inc(1))
                    .context("Longest flow path extraction failed")?;
                pb.finish_and_clear();
                let elapsed = start.elapsed();

                if let Some(path) = &manifest {
                    layers
                        .save(path)
                        .with_context(|| format!("Failed to write manifest {}", path.display()))?;
                }

                println!("Watersheds saved to: {}", report.watersheds.location);
                for outcome in &report.outcomes {
                    print_outcome(outcome);
                }
                println!("  Processing time: {:.2?}", elapsed);

                let failed = report.failures().count();
                if failed > 0 {
                    anyhow::bail!("{} of {} outlets failed", failed, report.outcomes.len());
                }
            }
        },
    }

    Ok(())
}
