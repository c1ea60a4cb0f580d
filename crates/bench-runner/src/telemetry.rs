//! Stage latency and artifact size accounting for a single run.

use crate::error::Result;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fs::Metadata;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Per-run measurements. A fresh collector is built for every run; it is not
/// meant to be shared between concurrent invocations.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    last_mark: Option<Instant>,
    stages: IndexMap<String, f64>,
    bandwidth: IndexMap<String, String>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// New collector for a run that inherits the measurements taken once per
    /// invocation (dataset, keys, model preparation) and starts its clock now.
    pub fn for_run(setup: &Telemetry) -> Self {
        Self {
            last_mark: Some(Instant::now()),
            stages: setup.stages.clone(),
            bandwidth: setup.bandwidth.clone(),
        }
    }

    pub fn mark_step(&mut self, label: &str, is_first: bool) -> f64 {
        self.mark_step_at(label, is_first, Instant::now())
    }

    /// Records the delta since the previous mark under `label`.
    ///
    /// A first mark only starts the clock. Re-marking a label replaces its
    /// duration but keeps its original position.
    pub fn mark_step_at(&mut self, label: &str, is_first: bool, now: Instant) -> f64 {
        let elapsed = self
            .last_mark
            .map(|prev| now.saturating_duration_since(prev).as_secs_f64())
            .unwrap_or(0.0);
        self.last_mark = Some(now);
        if is_first {
            return 0.0;
        }
        info!(
            step = label,
            elapsed_s = round4(elapsed),
            "{} completed (elapsed: {}s)",
            label,
            round4(elapsed)
        );
        self.stages.insert(label.to_string(), elapsed);
        elapsed
    }

    /// Total bytes under `path`, recorded in human-readable form.
    ///
    /// A missing path is recorded as zero with a warning; whichever stage
    /// actually needs the artifact reports the hard failure.
    pub fn measure_artifact_size(&mut self, path: &Path, label: &str) -> Result<u64> {
        if !path.exists() {
            warn!(artifact = label, path = %path.display(), "artifact path does not exist");
            self.bandwidth
                .insert(label.to_string(), human_readable_size(0));
            return Ok(0);
        }
        let bytes = disk_usage(path)?;
        let rendered = human_readable_size(bytes);
        info!(artifact = label, bytes, "{} size: {}", label, rendered);
        self.bandwidth.insert(label.to_string(), rendered);
        Ok(bytes)
    }

    pub fn stage_durations(&self) -> &IndexMap<String, f64> {
        &self.stages
    }

    pub fn bandwidth(&self) -> &IndexMap<String, String> {
        &self.bandwidth
    }

    pub fn total_latency(&self) -> f64 {
        self.stages.values().sum()
    }
}

/// Apparent size of `path` and everything beneath it, as `du -sb` reports
/// it: directories and symlinks count with their own length, and a file
/// reached through several hard links counts once.
pub fn disk_usage(path: &Path) -> Result<u64> {
    let mut seen = HashSet::new();
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !first_link(&mut seen, &meta) {
            continue;
        }
        total += meta.len();
    }
    Ok(total)
}

#[cfg(unix)]
fn first_link(seen: &mut HashSet<(u64, u64)>, meta: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    meta.is_dir() || meta.nlink() < 2 || seen.insert((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn first_link(_seen: &mut HashSet<(u64, u64)>, _meta: &Metadata) -> bool {
    true
}

pub fn human_readable_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "K", "M", "G", "T"] {
        if value < 1024.0 {
            return format!("{:.1}{}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1}P", value)
}

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn sizes_scale_by_1024_with_one_decimal() {
        assert_eq!(human_readable_size(0), "0.0B");
        assert_eq!(human_readable_size(1023), "1023.0B");
        assert_eq!(human_readable_size(1024), "1.0K");
        assert_eq!(human_readable_size(1536), "1.5K");
        assert_eq!(human_readable_size(5 * 1024 * 1024), "5.0M");
        assert_eq!(human_readable_size(3 * 1024_u64.pow(3)), "3.0G");
        assert_eq!(human_readable_size(2 * 1024_u64.pow(4)), "2.0T");
        assert_eq!(human_readable_size(1024_u64.pow(5)), "1.0P");
        assert_eq!(human_readable_size(2048 * 1024_u64.pow(5)), "2048.0P");
    }

    #[test]
    fn missing_artifact_records_zero_without_error() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut telemetry = Telemetry::new();
        let bytes = telemetry
            .measure_artifact_size(&tmp.path().join("ciphertexts_upload"), "Client: Encrypted input")
            .expect("missing path is not fatal");
        assert_eq!(bytes, 0);
        assert_eq!(
            telemetry.bandwidth().get("Client: Encrypted input").map(String::as_str),
            Some("0.0B")
        );
    }

    #[test]
    fn artifact_size_is_summed_recursively() {
        let tmp = tempfile::tempdir().expect("tmp");
        let root = tmp.path().join("public_keys");
        fs::create_dir_all(root.join("nested/deeper")).expect("mkdir");
        fs::write(root.join("ek.bin"), vec![0_u8; 1000]).expect("write");
        fs::write(root.join("nested/rk.bin"), vec![0_u8; 24]).expect("write");
        fs::write(root.join("nested/deeper/mk.bin"), vec![0_u8; 512]).expect("write");
        let dirs: u64 = [root.clone(), root.join("nested"), root.join("nested/deeper")]
            .iter()
            .map(|d| fs::metadata(d).expect("stat").len())
            .sum();

        let mut telemetry = Telemetry::new();
        let bytes = telemetry
            .measure_artifact_size(&root, "Client: Public and evaluation keys")
            .expect("measure");
        assert_eq!(bytes, 1536 + dirs);
        assert_eq!(
            telemetry.bandwidth()["Client: Public and evaluation keys"],
            human_readable_size(1536 + dirs)
        );
        assert_eq!(disk_usage(&root.join("ek.bin")).expect("single file"), 1000);
    }

    #[cfg(unix)]
    #[test]
    fn hard_linked_file_counts_once() {
        let tmp = tempfile::tempdir().expect("tmp");
        let root = tmp.path().join("ciphertexts_download");
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(root.join("ct.bin"), vec![0_u8; 700]).expect("write");
        fs::hard_link(root.join("ct.bin"), root.join("ct_alias.bin")).expect("link");
        let dir = fs::metadata(&root).expect("stat").len();
        assert_eq!(disk_usage(&root).expect("measure"), 700 + dir);
    }

    #[test]
    fn marks_record_deltas_in_execution_order() {
        let t0 = Instant::now();
        let mut telemetry = Telemetry::new();
        assert_eq!(telemetry.mark_step_at("Init", true, t0), 0.0);
        let a = telemetry.mark_step_at("Client: Input encryption", false, t0 + Duration::from_millis(250));
        let b = telemetry.mark_step_at("Client: Result decryption", false, t0 + Duration::from_millis(1250));
        assert!((a - 0.25).abs() < 1e-9);
        assert!((b - 1.0).abs() < 1e-9);

        let labels: Vec<&str> = telemetry.stage_durations().keys().map(String::as_str).collect();
        assert_eq!(labels, vec!["Client: Input encryption", "Client: Result decryption"]);
        assert!(!telemetry.stage_durations().contains_key("Init"));
        assert!((telemetry.total_latency() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn repeated_label_overwrites_in_place() {
        let t0 = Instant::now();
        let mut telemetry = Telemetry::new();
        telemetry.mark_step_at("Init", true, t0);
        telemetry.mark_step_at("a", false, t0 + Duration::from_secs(1));
        telemetry.mark_step_at("b", false, t0 + Duration::from_secs(2));
        telemetry.mark_step_at("a", false, t0 + Duration::from_secs(5));
        let entries: Vec<(&str, f64)> = telemetry
            .stage_durations()
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        assert_eq!(entries, vec![("a", 3.0), ("b", 1.0)]);
    }

    #[test]
    fn run_collector_inherits_setup_but_not_later_state() {
        let t0 = Instant::now();
        let mut setup = Telemetry::new();
        setup.mark_step_at("Init", true, t0);
        setup.mark_step_at("Client: Key Generation", false, t0 + Duration::from_secs(2));

        let mut first = Telemetry::for_run(&setup);
        first.mark_step("Harness: Input generation", false);
        let second = Telemetry::for_run(&setup);

        assert_eq!(first.stage_durations().len(), 2);
        assert_eq!(second.stage_durations().len(), 1);
        assert!(second.stage_durations().contains_key("Client: Key Generation"));
    }

    #[test]
    fn rounding_keeps_four_decimals() {
        assert_eq!(round4(1.234_56), 1.2346);
        assert_eq!(round4(0.0), 0.0);
    }
}
