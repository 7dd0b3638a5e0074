//! Batch pipeline over a reserve survey data folder.
//!
//! Usage:
//!   reservechange --data-dir data register
//!   reservechange --data-dir data solve
//!   reservechange --data-dir data faces
//!   reservechange --data-dir data clean
//!   reservechange --data-dir data shift-maps
//!   reservechange --data-dir data shift-rasters
//!   reservechange --data-dir data merge
//!   reservechange --data-dir data transitions
//!
//! Folder layout:
//!   inputs/        missions.geojson, chms/, face_values/
//!   intermediate/  pairwise_shifts.geojson, global_shifts.json, maps/,
//!                  cleaned_maps/, shifted_maps/, shifted_rasters/
//!   outputs/       merged/, merged_clipped/, transitions/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geo::BoundingRect;
use log::{info, warn};

use reservechange::aggregation::{faces_to_layer, FaceAggregator, FaceValuesFolder};
use reservechange::cleanup;
use reservechange::config::PipelineConfig;
use reservechange::geotiff::{read_geotiff, write_geotiff};
use reservechange::global_shift;
use reservechange::layer::ClassLayer;
use reservechange::merge::{comparison_sets, merge_epochs, MergeIndex};
use reservechange::mission::{normalize_id, MissionCatalog};
use reservechange::projection::{Equirectangular, Identity, Projection};
use reservechange::registration::{read_pairwise, write_pairwise, ChmFolder, IntensityAligner, PairwiseRegistrar};
use reservechange::shift::{MapShifter, ShiftTable};
use reservechange::transition::{write_comparison, ComparisonOutcome};

// ==========================================================================
// Data folder layout
// ==========================================================================

struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    fn inputs(&self) -> PathBuf {
        self.root.join("inputs")
    }
    fn intermediate(&self) -> PathBuf {
        self.root.join("intermediate")
    }
    fn outputs(&self) -> PathBuf {
        self.root.join("outputs")
    }

    fn catalog(&self) -> PathBuf {
        self.inputs().join("missions.geojson")
    }
    fn chms(&self) -> PathBuf {
        self.inputs().join("chms")
    }
    fn face_values(&self) -> PathBuf {
        self.inputs().join("face_values")
    }
    fn pairwise(&self) -> PathBuf {
        self.intermediate().join("pairwise_shifts.geojson")
    }
    fn global_shifts(&self) -> PathBuf {
        self.intermediate().join("global_shifts.json")
    }
    fn maps(&self) -> PathBuf {
        self.intermediate().join("maps")
    }
    fn cleaned_maps(&self) -> PathBuf {
        self.intermediate().join("cleaned_maps")
    }
    fn shifted_maps(&self) -> PathBuf {
        self.intermediate().join("shifted_maps")
    }
    fn shifted_rasters(&self) -> PathBuf {
        self.intermediate().join("shifted_rasters")
    }
    fn merged(&self) -> PathBuf {
        self.outputs().join("merged")
    }
    fn merged_clipped(&self) -> PathBuf {
        self.outputs().join("merged_clipped")
    }
    fn transitions(&self) -> PathBuf {
        self.outputs().join("transitions")
    }
}

fn read_catalog(layout: &DataLayout, config: &PipelineConfig) -> Result<MissionCatalog> {
    MissionCatalog::from_geojson(&layout.catalog(), config.catalog_crs).context("reading the mission catalog")
}

/// Files in `dir` with the given extension, sorted by name.
fn files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("cannot list {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Mission id from a file stem: any non-digit prefix (`chm-mesh-`) is dropped.
fn mission_id_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.trim_start_matches(|c: char| !c.is_ascii_digit());
    (!digits.is_empty()).then(|| normalize_id(digits))
}

/// Per-mission layers of a folder, keyed by mission id. Unreadable files are skipped.
fn read_mission_layers(dir: &Path, config: &PipelineConfig) -> Result<BTreeMap<String, ClassLayer>> {
    let mut layers = BTreeMap::new();
    for path in files_with_extension(dir, "geojson")? {
        let Some(id) = mission_id_from_path(&path) else {
            warn!("cannot tell the mission of {}, skipped", path.display());
            continue;
        };
        match ClassLayer::read_geojson(&path, &config.classes) {
            Ok(layer) => {
                layers.insert(id, layer);
            }
            Err(e) => warn!("skipping {}: {}", path.display(), e),
        }
    }
    info!("read {} mission maps from {}", layers.len(), dir.display());
    Ok(layers)
}

/// Local metric projection centred on the layer, for layers stored in lon/lat.
fn lonlat_projection(layer: &ClassLayer) -> Option<Equirectangular> {
    let bbox = layer.footprint().bounding_rect()?;
    let c = bbox.center();
    Some(Equirectangular::new(c.x, c.y))
}

// ==========================================================================
// Stages
// ==========================================================================

fn run_register(layout: &DataLayout, config: &PipelineConfig) -> Result<()> {
    let catalog = read_catalog(layout, config)?;
    info!("1. Pairwise registration of {} missions", catalog.len());
    let aligner = IntensityAligner::from_params(&config.registration);
    let source = ChmFolder::new(layout.chms());
    let registrar = PairwiseRegistrar::new(&aligner, &source, &config.registration);
    let records = registrar.compute_pairwise(&catalog.missions);
    write_pairwise(&layout.pairwise(), &records)?;
    info!("   {} records → {}", records.len(), layout.pairwise().display());
    Ok(())
}

fn run_solve(layout: &DataLayout, config: &PipelineConfig) -> Result<()> {
    info!("2. Global shift solve");
    let records = read_pairwise(&layout.pairwise()).context("reading pairwise shifts; run `register` first")?;
    let (table, report) = global_shift::solve(&records, &config.solver)?;
    table.write_json(&layout.global_shifts())?;
    info!(
        "   {} missions solved from {} of {} records → {}",
        report.missions,
        report.used,
        report.input_records,
        layout.global_shifts().display()
    );
    Ok(())
}

fn run_faces(layout: &DataLayout, config: &PipelineConfig, skip_existing: bool) -> Result<()> {
    let catalog = read_catalog(layout, config)?;
    info!("3. Geospatialising face predictions of {} missions", catalog.len());
    let aggregator = FaceValuesFolder::new(layout.face_values());
    let (mut written, mut skipped) = (0usize, 0usize);
    for mission in &catalog.missions {
        let out = layout.maps().join(format!("{}.geojson", mission.id));
        if skip_existing && out.is_file() {
            info!("   mission {}: map exists, skipped", mission.id);
            skipped += 1;
            continue;
        }
        let result = aggregator
            .face_values(mission)
            .and_then(|faces| faces_to_layer(&faces, config.face_confidence_threshold, &config.classes, mission))
            .and_then(|layer| layer.write_geojson(&out, &config.classes));
        match result {
            Ok(()) => written += 1,
            Err(e) => {
                warn!("   mission {}: {}", mission.id, e);
                skipped += 1;
            }
        }
    }
    info!("   {written} maps written, {skipped} missions skipped");
    Ok(())
}

fn run_clean(layout: &DataLayout, config: &PipelineConfig) -> Result<()> {
    info!("4. Cleaning per-mission maps");
    let catalog = read_catalog(layout, config)?;
    let layers = read_mission_layers(&layout.maps(), config)?;
    let mut failed = 0usize;
    for (id, layer) in &layers {
        let footprint = catalog.get(id).map(|m| &m.footprint);
        let cleaned = cleanup::post_process(layer, &config.cleanup, footprint);
        info!(
            "   mission {id}: {} → {} regions, {:.1} → {:.1} m²",
            layer.len(),
            cleaned.len(),
            layer.total_area(),
            cleaned.total_area()
        );
        let out = layout.cleaned_maps().join(format!("{id}.geojson"));
        if let Err(e) = cleaned.write_geojson(&out, &config.classes) {
            warn!("   mission {id}: {e}");
            failed += 1;
        }
    }
    info!("   {} maps cleaned, {failed} failed", layers.len() - failed);
    Ok(())
}

fn run_shift_maps(layout: &DataLayout, config: &PipelineConfig, lonlat: bool) -> Result<()> {
    info!("5. Shifting cleaned maps");
    let table = ShiftTable::read_json(&layout.global_shifts()).context("reading global shifts; run `solve` first")?;
    let shifter = MapShifter::new(&table);
    let layers = read_mission_layers(&layout.cleaned_maps(), config)?;
    let mut failed = 0usize;
    for (id, layer) in &layers {
        let shifted = match lonlat.then(|| lonlat_projection(layer)).flatten() {
            Some(proj) => shifter.shift_layer(layer, id, &proj as &dyn Projection),
            None => shifter.shift_layer(layer, id, &Identity),
        };
        let out = layout.shifted_maps().join(format!("{id}.geojson"));
        if let Err(e) = shifted.write_geojson(&out, &config.classes) {
            warn!("   mission {id}: {e}");
            failed += 1;
        }
    }
    info!("   {} maps shifted, {failed} failed", layers.len() - failed);
    Ok(())
}

fn run_shift_rasters(layout: &DataLayout, input_dir: Option<PathBuf>) -> Result<()> {
    let input_dir = input_dir.unwrap_or_else(|| layout.chms());
    info!("6. Shifting rasters from {}", input_dir.display());
    let table = ShiftTable::read_json(&layout.global_shifts()).context("reading global shifts; run `solve` first")?;
    let shifter = MapShifter::new(&table);
    let (mut written, mut failed) = (0usize, 0usize);
    for path in files_with_extension(&input_dir, "tif")? {
        let Some(id) = mission_id_from_path(&path) else {
            warn!("   cannot tell the mission of {}, skipped", path.display());
            continue;
        };
        let Some(name) = path.file_name() else { continue };
        let out = layout.shifted_rasters().join(name);
        let result = read_geotiff(&path).and_then(|raster| write_geotiff(&out, &shifter.shift_raster(&raster, &id)));
        match result {
            Ok(()) => written += 1,
            Err(e) => {
                warn!("   {}: {}", path.display(), e);
                failed += 1;
            }
        }
    }
    info!("   {written} rasters shifted, {failed} failed");
    Ok(())
}

fn run_merge(layout: &DataLayout, config: &PipelineConfig) -> Result<()> {
    info!("7. Merging maps per region and epoch");
    if config.regions.is_empty() {
        warn!("   no regions configured, every mission will be skipped");
    }
    let catalog = read_catalog(layout, config)?;
    let layers = read_mission_layers(&layout.shifted_maps(), config)?;
    let (epochs, summary) = merge_epochs(&catalog, &layers, config)?;
    let (index, failed) = MergeIndex::write(&layout.merged(), &epochs, config)?;
    for e in &index.epochs {
        info!("   {} {}: {} missions → {}", e.region, e.epoch, e.missions.len(), e.file);
    }
    info!(
        "   {} epochs from {} records ({} rejected): {} contested regions, {} decided by tiebreak, {} dropped; {failed} not written",
        summary.epochs,
        summary.input_records,
        summary.rejected_inputs,
        summary.contested_regions,
        summary.tiebreaks,
        summary.dropped_outputs
    );
    Ok(())
}

fn run_transitions(layout: &DataLayout, config: &PipelineConfig) -> Result<()> {
    info!("8. Transition matrices");
    let epochs = MergeIndex::read(&layout.merged(), config).context("reading merged maps; run `merge` first")?;
    let mut total = ComparisonOutcome::default();
    for set in comparison_sets(&epochs) {
        info!("   {} ({})", set.region, set.name);
        total += write_comparison(&set, &layout.merged_clipped(), &layout.transitions(), &config.classes);
    }
    info!(
        "   {} clipped layers, {} transition matrices → {}; {} writes failed",
        total.layers,
        total.matrices,
        layout.transitions().display(),
        total.failed
    );
    Ok(())
}

// ==========================================================================
// CLI (clap)
// ==========================================================================

#[derive(Parser, Debug)]
#[command(
    name = "reservechange",
    version,
    about = "Co-registration, consolidation and change analysis of repeat drone surveys",
    after_help = "Stages run in order: register, solve, faces, clean, shift-maps, merge, transitions"
)]
struct Cli {
    /// Root of the data folder (inputs/, intermediate/, outputs/)
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Pipeline configuration (JSON); defaults apply when omitted
    #[arg(long, global = true, value_name = "config.json")]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate pairwise CHM shifts between overlapping missions
    Register,
    /// Reconcile pairwise shifts into one shift per mission
    Solve,
    /// Turn per-face class probabilities into per-mission maps
    Faces {
        /// Keep maps that already exist
        #[arg(long)]
        skip_existing: bool,
    },
    /// Remove slivers and overlaps from per-mission maps
    Clean,
    /// Apply the global shifts to the cleaned maps
    ShiftMaps {
        /// Maps are stored in lon/lat degrees
        #[arg(long)]
        lonlat: bool,
    },
    /// Apply the global shifts to rasters (CHMs by default)
    ShiftRasters {
        /// Folder of GeoTIFFs named after their mission
        #[arg(long, value_name = "DIR")]
        input_dir: Option<PathBuf>,
    },
    /// Merge shifted maps per region and epoch
    Merge,
    /// Clip epochs to their shared region and build transition matrices
    Transitions,
}

// ==========================================================================
// Main
// ==========================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.validate()?;

    let layout = DataLayout { root: cli.data_dir };
    let t0 = std::time::Instant::now();
    match cli.command {
        Command::Register => run_register(&layout, &config)?,
        Command::Solve => run_solve(&layout, &config)?,
        Command::Faces { skip_existing } => run_faces(&layout, &config, skip_existing)?,
        Command::Clean => run_clean(&layout, &config)?,
        Command::ShiftMaps { lonlat } => run_shift_maps(&layout, &config, lonlat)?,
        Command::ShiftRasters { input_dir } => run_shift_rasters(&layout, input_dir)?,
        Command::Merge => run_merge(&layout, &config)?,
        Command::Transitions => run_transitions(&layout, &config)?,
    }
    info!("done in {:.2}s", t0.elapsed().as_secs_f64());
    Ok(())
}
