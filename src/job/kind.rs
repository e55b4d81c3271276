use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::JobRequest;
use crate::chain::{ProcessChain, Step};
use crate::error::{JobError, Result};
use crate::extract::{parse_categorical, parse_univariate, StatRecord, FIELD_SEPARATOR};

/// Output of the sampling step: `vector|raster,raster,...|start|end`
pub const SAMPLED_MAPS: &str = "sampled_maps";
/// Output of the step printing the statistics table
pub const STATISTICS: &str = "statistics";
/// Output of the region lookup: `key=value` lines as printed by `g.region -g`
pub const REGION: &str = "region";

/// Vector name the polygon gets inside the workspace
const POLYGON: &str = "polygon";
const UNIVARIATE_METHODS: &str =
    "number,minimum,maximum,range,average,median,stddev,sum,variance,coeff_var";

/// The parts of a statistics job that differ between kinds
pub trait StatsKind: Send + Sync {
    fn name(&self) -> &'static str;

    /// Chain computing statistics of `raster` inside the imported polygon.
    /// Its final step exports [`STATISTICS`].
    fn stage_two(&self, raster: &str) -> ProcessChain;

    /// Chain printing the region `stage_two` will compute on, exported as
    /// [`REGION`]
    fn region_lookup(&self, raster: &str) -> ProcessChain;

    fn extract(&self, table: &str) -> Result<Vec<StatRecord>>;
}

/// `g.region` fitted to the polygon, optionally aligned to a raster's grid
fn polygon_region(id: &str, align: Option<&str>) -> Step {
    let step = Step::new(id, "g.region").input("vector", POLYGON);
    match align {
        Some(raster) => step.input("align", raster),
        None => step,
    }
}

/// Per-category area, cell count and percentage
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoricalStats;

impl StatsKind for CategoricalStats {
    fn name(&self) -> &'static str {
        "categorical"
    }

    fn stage_two(&self, raster: &str) -> ProcessChain {
        ProcessChain::new()
            .step(polygon_region("g_region_5", Some(raster)).superquiet())
            .step(
                Step::new("r_mask_6", "r.mask")
                    .input("vector", POLYGON)
                    .superquiet(),
            )
            .step(
                Step::new("r_stats_7", "r.stats")
                    .input("input", raster)
                    .input("separator", FIELD_SEPARATOR.to_string())
                    .flags("acpl")
                    .superquiet()
                    .exports(STATISTICS),
            )
    }

    fn region_lookup(&self, raster: &str) -> ProcessChain {
        ProcessChain::new().step(
            polygon_region("g_region_lookup", Some(raster))
                .flags("g")
                .exports(REGION),
        )
    }

    fn extract(&self, table: &str) -> Result<Vec<StatRecord>> {
        Ok(parse_categorical(table)?
            .into_iter()
            .map(StatRecord::Categorical)
            .collect())
    }
}

/// Per-feature numeric summary
#[derive(Debug, Clone, Copy, Default)]
pub struct UnivariateStats;

impl StatsKind for UnivariateStats {
    fn name(&self) -> &'static str {
        "univariate"
    }

    fn stage_two(&self, raster: &str) -> ProcessChain {
        ProcessChain::new()
            .step(polygon_region("g_region_5", None).superquiet())
            .step(
                Step::new("v_rast_stats_6", "v.rast.stats")
                    .input("map", POLYGON)
                    .input("method", UNIVARIATE_METHODS)
                    .input("raster", raster)
                    .input("column_prefix", "raster")
                    .superquiet(),
            )
            .step(
                Step::new("v_db_select_7", "v.db.select")
                    .input("map", POLYGON)
                    .input("separator", FIELD_SEPARATOR.to_string())
                    .superquiet()
                    .exports(STATISTICS),
            )
    }

    fn region_lookup(&self, _raster: &str) -> ProcessChain {
        ProcessChain::new().step(
            polygon_region("g_region_lookup", None)
                .flags("g")
                .exports(REGION),
        )
    }

    fn extract(&self, table: &str) -> Result<Vec<StatRecord>> {
        Ok(parse_univariate(table)
            .into_iter()
            .map(StatRecord::Univariate)
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Categorical,
    Univariate,
}

impl JobKind {
    pub fn stats(&self) -> &'static dyn StatsKind {
        match self {
            JobKind::Categorical => &CategoricalStats,
            JobKind::Univariate => &UnivariateStats,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.stats().name())
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "categorical" => Ok(JobKind::Categorical),
            "univariate" | "univar" => Ok(JobKind::Univariate),
            other => Err(format!("Unknown statistics kind '{}'", other)),
        }
    }
}

/// Chain importing the polygon, registering it at the request timestamp and
/// sampling the dataset with it
pub fn import_and_sample(geometry: &Path, request: &JobRequest) -> ProcessChain {
    let series = format!("{}_space_time", POLYGON);

    ProcessChain::new()
        .step(
            Step::new("v_import_1", "v.import")
                .input("input", geometry.display().to_string())
                .output("output", POLYGON)
                .superquiet(),
        )
        .step(
            Step::new("t_create_2", "t.create")
                .input("type", "stvds")
                .input("temporaltype", "absolute")
                .input("semantictype", "mean")
                .input("title", "Polygon")
                .input("description", "Polygon")
                .output("output", series.as_str())
                .superquiet(),
        )
        .step(
            Step::new("t_register_3", "t.register")
                .input("type", "vector")
                .input("input", series.as_str())
                .input("maps", POLYGON)
                .input("start", request.timestamp.as_str())
                .input("increment", "1 second")
                .flags("i")
                .superquiet(),
        )
        .step(
            Step::new("t_sample_4", "t.sample")
                .input("sample", series.as_str())
                .input(
                    "inputs",
                    format!("{}@{}", request.dataset, request.dataset_group),
                )
                .input("samtype", "stvds")
                .input("intype", "strds")
                .superquiet()
                .exports(SAMPLED_MAPS),
        )
}

/// Name of the raster the sampling step matched
///
/// When several rasters match, the first one is used.
pub fn discover_raster(sampled: &str, timestamp: &str) -> Result<String> {
    let no_data = || JobError::NoDataForTimestamp {
        timestamp: timestamp.to_string(),
    };

    let candidates = sampled
        .lines()
        .find_map(|line| line.split(FIELD_SEPARATOR).nth(1))
        .ok_or_else(no_data)?;

    let mut names = candidates.split(',').map(str::trim);
    let first = names.next().unwrap_or_default();
    if first.is_empty() || first == "None" {
        return Err(no_data());
    }

    let skipped: Vec<&str> = names.filter(|n| !n.is_empty()).collect();
    if !skipped.is_empty() {
        warn!("Using {} for {}, ignoring {}", first, timestamp, skipped.join(","));
    }

    Ok(first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            project: "nc_spm_08".to_string(),
            dataset_group: "X".to_string(),
            dataset: "precip_daily".to_string(),
            timestamp: "2001-03-16T12:30:15".to_string(),
            geometry: "{}".to_string(),
        }
    }

    #[test]
    fn test_import_and_sample_chain() {
        let chain = import_and_sample(Path::new("/tmp/polygon.geojson"), &request());
        let tools: Vec<&str> = chain.steps().iter().map(|s| s.tool()).collect();
        assert_eq!(tools, vec!["v.import", "t.create", "t.register", "t.sample"]);

        let sample = &chain.steps()[3];
        assert_eq!(sample.input_value("inputs"), Some("precip_daily@X"));
        assert_eq!(sample.exported_as(), Some(SAMPLED_MAPS));

        let register = &chain.steps()[2];
        assert_eq!(register.input_value("start"), Some("2001-03-16T12:30:15"));
    }

    #[test]
    fn test_sample_step_prints_no_header() {
        let chain = import_and_sample(Path::new("/tmp/polygon.geojson"), &request());
        assert_eq!(
            chain.steps()[3].args(),
            vec![
                "sample=polygon_space_time",
                "inputs=precip_daily@X",
                "samtype=stvds",
                "intype=strds",
                "--qq",
            ]
        );
    }

    #[test]
    fn test_region_lookup_matches_stage_two() {
        let categorical = JobKind::Categorical.stats();
        let lookup = categorical.region_lookup("precip_daily_2001_03_16@X");
        assert_eq!(lookup.len(), 1);
        assert_eq!(
            lookup.steps()[0].args(),
            vec!["vector=polygon", "align=precip_daily_2001_03_16@X", "-g"]
        );
        assert_eq!(lookup.steps()[0].exported_as(), Some(REGION));
        assert_eq!(
            categorical.stage_two("precip_daily_2001_03_16@X").steps()[0].inputs(),
            lookup.steps()[0].inputs()
        );

        let univariate = JobKind::Univariate.stats().region_lookup("r@X");
        assert_eq!(univariate.steps()[0].args(), vec!["vector=polygon", "-g"]);
    }

    #[test]
    fn test_stage_two_exports_statistics() {
        for kind in [JobKind::Categorical, JobKind::Univariate] {
            let chain = kind.stats().stage_two("precip_daily_2001_03_16@X");
            let last = chain.steps().last().unwrap();
            assert_eq!(last.exported_as(), Some(STATISTICS));
            assert_eq!(chain.steps()[0].tool(), "g.region");
        }

        let categorical = JobKind::Categorical.stats().stage_two("r");
        assert_eq!(categorical.steps()[2].flag_letters(), "acpl");
    }

    #[test]
    fn test_discover_raster() {
        let stdout = "polygon@ephemeral|precip_daily_2001_03_16@X|2001-03-16 12:30:15|None\n";
        assert_eq!(
            discover_raster(stdout, "2001-03-16T12:30:15").unwrap(),
            "precip_daily_2001_03_16@X"
        );

        let several = "polygon|a@X,b@X|2001-03-16 12:30:15|None\n";
        assert_eq!(discover_raster(several, "t").unwrap(), "a@X");
    }

    #[test]
    fn test_discover_raster_no_data() {
        for stdout in ["", "polygon|None|2001|None\n", "polygon||x\n", "garbage"] {
            let err = discover_raster(stdout, "2001-03-16T12:30:15").unwrap_err();
            assert_eq!(
                err.to_string(),
                "No raster maps found for timestamp: 2001-03-16T12:30:15"
            );
        }
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("categorical".parse::<JobKind>().unwrap(), JobKind::Categorical);
        assert_eq!("univar".parse::<JobKind>().unwrap(), JobKind::Univariate);
        assert!("zonal".parse::<JobKind>().is_err());
        assert_eq!(JobKind::Univariate.to_string(), "univariate");
    }
}
