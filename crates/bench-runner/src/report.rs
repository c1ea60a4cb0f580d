use crate::config::InstanceSize;
use crate::error::Result;
use crate::quality::QualityMap;
use crate::seed::RunSeed;
use crate::telemetry::{round4, Telemetry};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Measurements of one run, written once to `results-<n>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Sum of the per-stage durations, in seconds. The key name is kept for
    /// consumers of existing result files.
    pub total_latency_ms: f64,
    pub per_stage: IndexMap<String, String>,
    pub bandwidth: IndexMap<String, String>,
    /// `"<tag> quality"` entries, written at the top level of the report.
    /// Empty on the single tier.
    #[serde(flatten)]
    pub model_quality: QualityMap,
    pub run_index: usize,
    pub instance: InstanceSize,
    pub seed: Option<u64>,
    pub created_at: String,
}

impl RunReport {
    pub fn from_run(
        run_index: usize,
        instance: InstanceSize,
        seed: RunSeed,
        telemetry: &Telemetry,
        model_quality: Option<QualityMap>,
    ) -> Self {
        let per_stage = telemetry
            .stage_durations()
            .iter()
            .map(|(label, secs)| (label.clone(), format!("{}s", round4(*secs))))
            .collect();
        Self {
            total_latency_ms: round4(telemetry.total_latency()),
            per_stage,
            bandwidth: telemetry.bandwidth().clone(),
            model_quality: model_quality.unwrap_or_default(),
            run_index,
            instance,
            seed: seed.value(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_report_file(path, &bytes)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}

/// Stages the report in a temp file next to `path` and renames it into place,
/// so a reader never sees a half-written `results-<n>.json`.
fn write_report_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{quality_key, QualityScore};
    use std::time::{Duration, Instant};

    fn sample_telemetry() -> Telemetry {
        let t0 = Instant::now();
        let mut telemetry = Telemetry::new();
        telemetry.mark_step_at("Init", true, t0);
        telemetry.mark_step_at("Client: Input encryption", false, t0 + Duration::from_millis(1500));
        telemetry.mark_step_at(
            "Server: Encrypted ML Inference computation",
            false,
            t0 + Duration::from_millis(4000),
        );
        telemetry
    }

    #[test]
    fn total_latency_is_sum_of_stage_durations() {
        let report = RunReport::from_run(
            1,
            InstanceSize::Small,
            RunSeed::Derived(9),
            &sample_telemetry(),
            None,
        );
        assert_eq!(report.total_latency_ms, 4.0);
        assert_eq!(report.per_stage["Client: Input encryption"], "1.5s");
        assert_eq!(
            report.per_stage["Server: Encrypted ML Inference computation"],
            "2.5s"
        );
        assert_eq!(report.seed, Some(9));
    }

    #[test]
    fn quality_map_is_omitted_when_absent() {
        let report = RunReport::from_run(
            1,
            InstanceSize::Single,
            RunSeed::Default,
            &sample_telemetry(),
            None,
        );
        let value = serde_json::to_value(&report).expect("json");
        let keys: Vec<&String> = value.as_object().expect("object").keys().collect();
        assert!(keys.iter().all(|k| !k.ends_with(" quality")), "{:?}", keys);
        assert!(value.get("model_quality").is_none());
        assert_eq!(value["instance"], "single");
        assert!(value["seed"].is_null());
    }

    #[test]
    fn written_report_preserves_stage_order() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut quality = QualityMap::new();
        quality.insert(quality_key("encrypted model"), QualityScore::new(14, 15));
        quality.insert(quality_key("harness model"), QualityScore::new(15, 15));
        let report = RunReport::from_run(
            2,
            InstanceSize::Small,
            RunSeed::Derived(5),
            &sample_telemetry(),
            Some(quality),
        );
        let path = tmp.path().join("measurements/small/results-2.json");
        report.write(&path).expect("write report");

        let loaded = RunReport::load(&path).expect("load report");
        assert_eq!(loaded.run_index, 2);
        assert_eq!(loaded.per_stage, report.per_stage);
        assert_eq!(loaded.created_at, report.created_at);
        let stages: Vec<&str> = loaded.per_stage.keys().map(String::as_str).collect();
        assert_eq!(
            stages,
            vec![
                "Client: Input encryption",
                "Server: Encrypted ML Inference computation"
            ]
        );
        let tags: Vec<&str> = loaded.model_quality.keys().map(String::as_str).collect();
        assert_eq!(tags, vec!["encrypted model quality", "harness model quality"]);

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("parse");
        assert_eq!(raw["encrypted model quality"]["correct_predictions"], 14);
        assert_eq!(raw["harness model quality"]["total_samples"], 15);
        assert!(raw.get("model_quality").is_none());

        let leftovers: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "temp file left behind");
    }
}
