//! Combining shifted per-mission maps into one map per region and epoch.
//!
//! An epoch is either a single year or a configured combination of years
//! (e.g. `2023_2024`). Combined epochs are only produced when every
//! constituent year has data in the region.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::consolidate::{ClassConsolidator, ConsolidationReport};
use crate::error::{Error, Result};
use crate::layer::ClassLayer;
use crate::mission::MissionCatalog;

/// A merged map of one region for one epoch.
#[derive(Debug, Clone)]
pub struct EpochLayer {
    pub region: String,
    /// `2020`, or the joined years of a combined epoch, `2023_2024`.
    pub epoch: String,
    pub years: Vec<i32>,
    pub missions: Vec<String>,
    pub layer: ClassLayer,
}

impl EpochLayer {
    pub fn is_combined(&self) -> bool {
        self.years.len() > 1
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.geojson", self.region, self.epoch)
    }
}

/// Consolidation counts summed over every merged epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeSummary {
    pub epochs: usize,
    pub input_records: usize,
    pub rejected_inputs: usize,
    pub contested_regions: usize,
    pub tiebreaks: usize,
    pub dropped_outputs: usize,
}

impl MergeSummary {
    fn add(&mut self, report: &ConsolidationReport) {
        self.epochs += 1;
        self.input_records += report.input_records;
        self.rejected_inputs += report.rejected_inputs;
        self.contested_regions += report.contested_regions;
        self.tiebreaks += report.tiebreaks;
        self.dropped_outputs += report.dropped_outputs;
    }
}

/// Per-mission layers of one region, grouped by year.
type YearGroups<'a> = BTreeMap<i32, Vec<(&'a str, &'a ClassLayer)>>;

/// Assign every mission with a layer to a region and year.
///
/// Missions outside the leaf-on season (when the filter is enabled) and
/// missions outside every configured region are left out.
fn group_missions<'a>(
    catalog: &MissionCatalog,
    layers: &'a BTreeMap<String, ClassLayer>,
    config: &PipelineConfig,
) -> BTreeMap<String, YearGroups<'a>> {
    let catalog = if config.season.enabled {
        catalog.filter_season(&config.season)
    } else {
        catalog.clone()
    };

    let mut groups: BTreeMap<String, YearGroups<'a>> = BTreeMap::new();
    for (mission_id, layer) in layers {
        let Some(mission) = catalog.get(mission_id) else {
            info!("mission {mission_id}: not in the (season-filtered) catalog, skipped");
            continue;
        };
        let Some(region) = MissionCatalog::region_of(mission, &config.regions) else {
            warn!("mission {mission_id}: outside every configured region, skipped");
            continue;
        };
        groups
            .entry(region.to_string())
            .or_default()
            .entry(mission.year)
            .or_default()
            .push((mission_id.as_str(), layer));
    }
    groups
}

/// Merge per-mission layers, keyed by mission id, into epoch layers.
pub fn merge_epochs(
    catalog: &MissionCatalog,
    layers: &BTreeMap<String, ClassLayer>,
    config: &PipelineConfig,
) -> Result<(Vec<EpochLayer>, MergeSummary)> {
    let consolidator = ClassConsolidator::new(&config.classes, &config.consolidation)?;
    let merge = |region: &str, years: Vec<i32>, members: Vec<(&str, &ClassLayer)>| {
        let epoch = years.iter().map(|y| y.to_string()).collect::<Vec<_>>().join("_");
        info!("merging {} missions for {region} {epoch}", members.len());
        let inputs: Vec<ClassLayer> = members.iter().map(|(_, l)| (*l).clone()).collect();
        let (mut layer, report) = consolidator.consolidate(&inputs);
        let year = (years.len() == 1).then(|| years[0]);
        for r in &mut layer.records {
            r.year = year;
        }
        let epoch_layer = EpochLayer {
            region: region.to_string(),
            epoch,
            years,
            missions: members.iter().map(|(id, _)| id.to_string()).collect(),
            layer,
        };
        (epoch_layer, report)
    };

    let mut out = Vec::new();
    let mut summary = MergeSummary::default();
    let mut push = |(epoch_layer, report): (EpochLayer, ConsolidationReport)| {
        summary.add(&report);
        out.push(epoch_layer);
    };
    for (region, by_year) in group_missions(catalog, layers, config) {
        for (year, members) in &by_year {
            push(merge(&region, vec![*year], members.clone()));
        }
        for combined in &config.combined_epochs {
            if !combined.years.iter().all(|y| by_year.contains_key(y)) {
                info!("{region}: not every year of {} has data, skipped", combined.label());
                continue;
            }
            let members = combined
                .years
                .iter()
                .flat_map(|y| by_year[y].iter().copied())
                .collect();
            push(merge(&region, combined.years.clone(), members));
        }
    }
    Ok((out, summary))
}

// ---------------------------------------------------------------------------
// Persisted index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochEntry {
    pub region: String,
    pub epoch: String,
    pub years: Vec<i32>,
    pub missions: Vec<String>,
    pub file: String,
}

/// `index.json` next to the merged layers, listing what each file holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeIndex {
    pub epochs: Vec<EpochEntry>,
}

impl MergeIndex {
    pub const FILE_NAME: &'static str = "index.json";

    /// Write every epoch layer and the index into `dir`.
    ///
    /// A layer that cannot be written is logged and left out of the index; the
    /// number of such layers is returned with the index.
    pub fn write(dir: &Path, epochs: &[EpochLayer], config: &PipelineConfig) -> Result<(MergeIndex, usize)> {
        let mut index = MergeIndex::default();
        let mut failed = 0usize;
        for e in epochs {
            let file = e.file_name();
            if let Err(err) = e.layer.write_geojson(&dir.join(&file), &config.classes) {
                warn!("{} {}: {}", e.region, e.epoch, err);
                failed += 1;
                continue;
            }
            index.epochs.push(EpochEntry {
                region: e.region.clone(),
                epoch: e.epoch.clone(),
                years: e.years.clone(),
                missions: e.missions.clone(),
                file,
            });
        }
        let path = dir.join(Self::FILE_NAME);
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let text = serde_json::to_string_pretty(&index)?;
        std::fs::write(&path, text).map_err(|e| Error::io(&path, e))?;
        Ok((index, failed))
    }

    /// Read the index and every layer it lists.
    pub fn read(dir: &Path, config: &PipelineConfig) -> Result<Vec<EpochLayer>> {
        let path: PathBuf = dir.join(Self::FILE_NAME);
        let text = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let index: MergeIndex = serde_json::from_str(&text)?;
        index
            .epochs
            .into_iter()
            .map(|entry| {
                let layer = ClassLayer::read_geojson(&dir.join(&entry.file), &config.classes)?;
                Ok(EpochLayer {
                    region: entry.region,
                    epoch: entry.epoch,
                    years: entry.years,
                    missions: entry.missions,
                    layer,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Comparison sets
// ---------------------------------------------------------------------------

/// Epochs of one region that are compared with each other.
#[derive(Debug)]
pub struct ComparisonSet<'a> {
    pub region: String,
    /// `separate_years` or `merged_years`.
    pub name: &'static str,
    pub epochs: Vec<&'a EpochLayer>,
}

/// Per region: every single-year epoch, and (when a combined epoch exists)
/// the combined epochs together with the single years they do not cover.
pub fn comparison_sets(epochs: &[EpochLayer]) -> Vec<ComparisonSet<'_>> {
    let mut by_region: BTreeMap<&str, Vec<&EpochLayer>> = BTreeMap::new();
    for e in epochs {
        by_region.entry(e.region.as_str()).or_default().push(e);
    }

    let mut sets = Vec::new();
    for (region, mut members) in by_region {
        members.sort_by_key(|e| e.years.clone());
        let separate: Vec<_> = members.iter().copied().filter(|e| !e.is_combined()).collect();
        let combined: Vec<_> = members.iter().copied().filter(|e| e.is_combined()).collect();

        if !combined.is_empty() {
            let mut merged: Vec<_> = separate
                .iter()
                .copied()
                .filter(|s| !combined.iter().any(|c| c.years.contains(&s.years[0])))
                .chain(combined.iter().copied())
                .collect();
            merged.sort_by_key(|e| e.years.clone());
            sets.push(ComparisonSet {
                region: region.to_string(),
                name: "merged_years",
                epochs: merged,
            });
        }
        sets.push(ComparisonSet {
            region: region.to_string(),
            name: "separate_years",
            epochs: separate,
        });
    }
    sets
}
