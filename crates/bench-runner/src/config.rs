//! Instance sizes and the on-disk layout derived from them.
//!
//! Every directory is namespaced by the tier name so that benchmarks of
//! different sizes can share one root without clobbering each other. Nothing
//! here touches the filesystem; callers create the directories they need.

use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceSize {
    Single,
    Small,
    Medium,
    Large,
}

impl InstanceSize {
    pub const ALL: [InstanceSize; 4] = [
        InstanceSize::Single,
        InstanceSize::Small,
        InstanceSize::Medium,
        InstanceSize::Large,
    ];

    pub fn from_ordinal(size: u32) -> Result<Self> {
        Self::ALL
            .get(size as usize)
            .copied()
            .ok_or(BenchError::InvalidSize(size))
    }

    pub fn ordinal(self) -> u32 {
        match self {
            InstanceSize::Single => 0,
            InstanceSize::Small => 1,
            InstanceSize::Medium => 2,
            InstanceSize::Large => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InstanceSize::Single => "single",
            InstanceSize::Small => "small",
            InstanceSize::Medium => "medium",
            InstanceSize::Large => "large",
        }
    }

    /// Number of samples classified per run.
    pub fn batch_size(self) -> usize {
        match self {
            InstanceSize::Single => 1,
            InstanceSize::Small => 15,
            InstanceSize::Medium => 1000,
            InstanceSize::Large => 10000,
        }
    }

    /// The single-sample tier is verified instead of scored.
    pub fn is_single(self) -> bool {
        self == InstanceSize::Single
    }
}

impl TryFrom<u32> for InstanceSize {
    type Error = BenchError;

    fn try_from(value: u32) -> Result<Self> {
        Self::from_ordinal(value)
    }
}

impl fmt::Display for InstanceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub size: InstanceSize,
    pub batch_size: usize,
    pub root_dir: PathBuf,
}

/// Resolves a numeric size tier against a benchmark root.
///
/// `root_dir` defaults to the current working directory; relative roots are
/// anchored there as well so that every derived path is absolute.
pub fn resolve(size: u32, root_dir: Option<&Path>) -> Result<InstanceConfig> {
    let size = InstanceSize::from_ordinal(size)?;
    let root_dir = match root_dir {
        Some(p) if p.is_absolute() => normalize_path(p),
        Some(p) => normalize_path(&std::env::current_dir()?.join(p)),
        None => std::env::current_dir()?,
    };
    Ok(InstanceConfig::new(size, root_dir))
}

impl InstanceConfig {
    pub fn new(size: InstanceSize, root_dir: PathBuf) -> Self {
        Self {
            size,
            batch_size: size.batch_size(),
            root_dir,
        }
    }

    pub fn name(&self) -> &'static str {
        self.size.name()
    }

    pub fn layout(&self) -> DirectoryLayout {
        DirectoryLayout::new(&self.root_dir, self.size)
    }
}

/// Tier-keyed directory tree under the benchmark root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    pub dataset_dir: PathBuf,
    pub dataset_intermediate_dir: PathBuf,
    pub io_dir: PathBuf,
    pub io_intermediate_dir: PathBuf,
    pub measure_dir: PathBuf,
}

impl DirectoryLayout {
    pub fn new(root_dir: &Path, size: InstanceSize) -> Self {
        let name = size.name();
        let dataset_dir = root_dir.join("datasets").join(name);
        let io_dir = root_dir.join("io").join(name);
        Self {
            dataset_intermediate_dir: dataset_dir.join("intermediate"),
            io_intermediate_dir: io_dir.join("intermediate"),
            measure_dir: root_dir.join("measurements").join(name),
            dataset_dir,
            io_dir,
        }
    }

    pub fn dataset_file(&self) -> PathBuf {
        self.dataset_dir.join("dataset.txt")
    }

    pub fn test_input_file(&self) -> PathBuf {
        self.dataset_intermediate_dir.join("test_pixels.txt")
    }

    pub fn ground_truth_labels_file(&self) -> PathBuf {
        self.dataset_intermediate_dir.join("test_labels.txt")
    }

    pub fn encrypted_model_predictions_file(&self) -> PathBuf {
        self.io_dir.join("encrypted_model_predictions.txt")
    }

    pub fn harness_model_predictions_file(&self) -> PathBuf {
        self.io_dir.join("harness_model_predictions.txt")
    }

    pub fn client_data_dir(&self) -> PathBuf {
        self.io_dir.join("client_data")
    }

    pub fn public_keys_dir(&self) -> PathBuf {
        self.io_dir.join("public_keys")
    }

    pub fn secret_key_dir(&self) -> PathBuf {
        self.io_dir.join("secret_key")
    }

    pub fn ciphertexts_upload_dir(&self) -> PathBuf {
        self.io_dir.join("ciphertexts_upload")
    }

    pub fn ciphertexts_download_dir(&self) -> PathBuf {
        self.io_dir.join("ciphertexts_download")
    }

    /// Report path for a 1-based run index.
    pub fn run_report_file(&self, run_index: usize) -> PathBuf {
        self.measure_dir.join(format!("results-{}.json", run_index))
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
