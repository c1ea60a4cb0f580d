//! The benchmark state machine.
//!
//! One invocation builds the submission, prepares the tier's I/O tree, runs
//! the once-per-invocation stages (dataset, keys, model preparation) and then
//! loops the per-run stages `num_runs` times, writing one report per run.
//! Runs are strictly sequential because every run overwrites the previous
//! run's artifacts in place.

use crate::config::{resolve, DirectoryLayout, InstanceConfig, InstanceSize};
use crate::dispatch::{StageDispatcher, StageInvocation, StageOutcome, StageResolver};
use crate::error::{BenchError, Result};
use crate::quality::{self, QualityMap};
use crate::report::RunReport;
use crate::seed::{RunSeed, SeedSchedule};
use crate::telemetry::{round4, Telemetry};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

pub const HARNESS_DIR: &str = "harness";
pub const SCRIPTS_DIR: &str = "scripts";
pub const LOCAL_BACKEND_DIR: &str = "submission";
pub const REMOTE_BACKEND_DIR: &str = "submission_remote";

/// Step labels as they appear in `per_stage`.
pub mod steps {
    pub const INIT: &str = "Init";
    pub const DATASET_GENERATION: &str = "Harness: Test dataset generation";
    pub const GET_CONTEXT: &str = "Communication: Get cryptographic context";
    pub const KEY_GENERATION: &str = "Client: Key Generation";
    pub const UPLOAD_EVAL_KEY: &str = "Communication: Upload evaluation key";
    pub const MODEL_PREPROCESSING: &str = "Server: (Encrypted) model preprocessing";
    pub const INPUT_GENERATION: &str = "Harness: Input generation";
    pub const INPUT_PREPROCESSING: &str = "Client: Input preprocessing";
    pub const INPUT_ENCRYPTION: &str = "Client: Input encryption";
    pub const ENCRYPTED_COMPUTE: &str = "Server: Encrypted ML Inference computation";
    pub const RESULT_DECRYPTION: &str = "Client: Result decryption";
    pub const RESULT_POSTPROCESSING: &str = "Client: Result postprocessing";
    pub const CLEARTEXT_INFERENCE: &str = "Harness: Run inference for harness plaintext model";
    pub const QUALITY_CHECK: &str = "Harness: Run quality check";
}

/// Artifact labels as they appear in `bandwidth`.
pub mod artifacts {
    pub const CRYPTO_CONTEXT: &str = "Cryptographic Context";
    pub const KEYS: &str = "Client: Public and evaluation keys";
    pub const ENCRYPTED_INPUT: &str = "Client: Encrypted input";
    pub const ENCRYPTED_RESULTS: &str = "Client: Encrypted results";
}

pub const ENCRYPTED_MODEL_TAG: &str = "encrypted model";
pub const HARNESS_MODEL_TAG: &str = "harness model";

#[derive(Debug, Clone, PartialEq)]
pub struct BenchOptions {
    pub size: u32,
    pub root_dir: Option<PathBuf>,
    pub num_runs: usize,
    pub seed: Option<u64>,
    /// `Some(0)` skips the cleartext reference; anything else runs it.
    pub clrtxt: Option<i64>,
    pub remote: bool,
    pub dataset: String,
    pub skip_build: bool,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            size: 0,
            root_dir: None,
            num_runs: 1,
            seed: None,
            clrtxt: None,
            remote: false,
            dataset: "mnist".to_string(),
            skip_build: false,
        }
    }
}

impl BenchOptions {
    pub fn runs_cleartext_reference(&self) -> bool {
        self.clrtxt != Some(0)
    }

    pub fn backend_dir_name(&self) -> &'static str {
        if self.remote {
            REMOTE_BACKEND_DIR
        } else {
            LOCAL_BACKEND_DIR
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Built,
    DatasetReady,
    KeysReady,
    ModelReady,
    Run(usize),
    Done,
}

#[derive(Debug, Clone)]
pub struct BenchOutcome {
    pub instance: InstanceSize,
    pub root_dir: PathBuf,
    pub reports: Vec<PathBuf>,
    /// Soft stages that exited nonzero, as `run <n>: <stage>`.
    pub soft_failures: Vec<String>,
}

pub struct Orchestrator {
    options: BenchOptions,
    config: InstanceConfig,
    layout: DirectoryLayout,
    dispatcher: StageDispatcher,
    phase: Phase,
    soft_failures: Vec<String>,
}

pub fn run_benchmark(options: BenchOptions) -> Result<BenchOutcome> {
    Orchestrator::new(options)?.run()
}

impl Orchestrator {
    pub fn new(options: BenchOptions) -> Result<Self> {
        let config = resolve(options.size, options.root_dir.as_deref())?;
        let layout = config.layout();
        let dispatcher = StageDispatcher::new(
            config.root_dir.join(HARNESS_DIR),
            config.root_dir.join(options.backend_dir_name()),
            config.root_dir.clone(),
        );
        Ok(Self {
            options,
            config,
            layout,
            dispatcher,
            phase: Phase::Init,
            soft_failures: Vec::new(),
        })
    }

    pub fn with_resolvers(mut self, resolvers: Vec<Box<dyn StageResolver>>) -> Self {
        self.dispatcher = self.dispatcher.with_resolvers(resolvers);
        self
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn run(mut self) -> Result<BenchOutcome> {
        info!(
            instance = self.config.name(),
            batch_size = self.config.batch_size,
            remote = self.options.remote,
            "running submission for {} inference",
            self.config.name()
        );

        let mut setup = Telemetry::new();
        self.check_layout()?;
        self.build_submission()?;
        self.advance(Phase::Built);
        self.reset_io(&mut setup)?;
        self.prepare_dataset(&mut setup)?;
        self.prepare_keys(&mut setup)?;
        self.preprocess_model(&mut setup)?;

        let mut seeds = SeedSchedule::new(self.options.seed);
        let mut reports = Vec::with_capacity(self.options.num_runs);
        for run_index in 1..=self.options.num_runs {
            self.advance(Phase::Run(run_index));
            if self.options.num_runs > 1 {
                info!("run {} of {}", run_index, self.options.num_runs);
            }
            let seed = seeds.next_run_seed();
            reports.push(self.run_once(run_index, seed, &setup)?);
        }

        self.advance(Phase::Done);
        info!("all steps completed for the {} inference", self.config.name());
        Ok(BenchOutcome {
            instance: self.config.size,
            root_dir: self.config.root_dir.clone(),
            reports,
            soft_failures: self.soft_failures,
        })
    }

    fn advance(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
    }

    fn check_layout(&self) -> Result<()> {
        let root = &self.config.root_dir;
        for name in [HARNESS_DIR, SCRIPTS_DIR, self.options.backend_dir_name()] {
            if !root.join(name).is_dir() {
                return Err(BenchError::MissingDirectory {
                    name: name.to_string(),
                    root: root.clone(),
                });
            }
        }
        Ok(())
    }

    /// Recreates the tier's I/O tree and starts the clock. Runs after the
    /// build so toolchain setup is never charged to a pipeline step.
    fn reset_io(&self, setup: &mut Telemetry) -> Result<()> {
        let io_dir = &self.layout.io_dir;
        if io_dir.exists() {
            fs::remove_dir_all(io_dir)?;
        }
        fs::create_dir_all(io_dir)?;
        setup.mark_step(steps::INIT, true);
        Ok(())
    }

    /// Fetches toolkit dependencies and builds the local submission when the
    /// build scripts are present.
    fn build_submission(&self) -> Result<()> {
        if self.options.skip_build {
            info!("skipping submission build");
            return Ok(());
        }
        let scripts = self.config.root_dir.join(SCRIPTS_DIR);
        let submission = format!("./{}", LOCAL_BACKEND_DIR);
        let plan: [(&str, &[&str]); 2] = [
            ("get_openfhe.sh", &[]),
            ("build_task.sh", &[submission.as_str()]),
        ];
        for (script, args) in plan {
            let path = scripts.join(script);
            if !path.is_file() {
                debug!(script, "build script not present");
                continue;
            }
            run_build_script(&path, args, &self.config.root_dir)?;
        }
        Ok(())
    }

    fn prepare_dataset(&mut self, setup: &mut Telemetry) -> Result<()> {
        let dataset_file = self.layout.dataset_file();
        self.dispatcher.dispatch(
            &StageInvocation::harness("generate_dataset")
                .arg(path_arg(&dataset_file))
                .arg(self.options.dataset.clone()),
        )?;
        setup.mark_step(steps::DATASET_GENERATION, false);
        self.advance(Phase::DatasetReady);
        Ok(())
    }

    /// Key generation never sees the benchmark seed; the backend uses its
    /// own entropy so repeated runs do not repeat key material.
    fn prepare_keys(&mut self, setup: &mut Telemetry) -> Result<()> {
        let size = self.size_arg();
        if self.options.remote {
            self.dispatcher
                .dispatch(&StageInvocation::backend("server_get_params").arg(size.clone()))?;
            setup.mark_step(steps::GET_CONTEXT, false);
            setup.measure_artifact_size(&self.layout.client_data_dir(), artifacts::CRYPTO_CONTEXT)?;
        }

        self.dispatcher
            .dispatch(&StageInvocation::backend("client_key_generation").arg(size.clone()))?;
        setup.mark_step(steps::KEY_GENERATION, false);
        setup.measure_artifact_size(&self.layout.public_keys_dir(), artifacts::KEYS)?;

        if self.options.remote {
            self.dispatcher
                .dispatch(&StageInvocation::backend("server_upload_ek").arg(size))?;
            setup.mark_step(steps::UPLOAD_EVAL_KEY, false);
        }
        self.advance(Phase::KeysReady);
        Ok(())
    }

    fn preprocess_model(&mut self, setup: &mut Telemetry) -> Result<()> {
        self.dispatcher
            .dispatch(&StageInvocation::backend("server_preprocess_model"))?;
        setup.mark_step(steps::MODEL_PREPROCESSING, false);
        self.advance(Phase::ModelReady);
        Ok(())
    }

    fn run_once(&mut self, run_index: usize, seed: RunSeed, setup: &Telemetry) -> Result<PathBuf> {
        let mut telemetry = Telemetry::for_run(setup);
        let size = self.size_arg();

        if let Some(value) = seed.value() {
            debug!(run_index, seed = value, "derived input seed");
        }
        self.dispatcher.dispatch(
            &StageInvocation::harness("generate_input")
                .arg(size.clone())
                .args(seed.stage_args()),
        )?;
        telemetry.mark_step(steps::INPUT_GENERATION, false);

        self.dispatcher
            .dispatch(&StageInvocation::backend("client_preprocess_input").arg(size.clone()))?;
        telemetry.mark_step(steps::INPUT_PREPROCESSING, false);

        self.dispatcher
            .dispatch(&StageInvocation::backend("client_encode_encrypt_input").arg(size.clone()))?;
        telemetry.mark_step(steps::INPUT_ENCRYPTION, false);
        telemetry.measure_artifact_size(
            &self.layout.ciphertexts_upload_dir(),
            artifacts::ENCRYPTED_INPUT,
        )?;

        self.dispatcher
            .dispatch(&StageInvocation::backend("server_encrypted_compute").arg(size.clone()))?;
        telemetry.mark_step(steps::ENCRYPTED_COMPUTE, false);
        telemetry.measure_artifact_size(
            &self.layout.ciphertexts_download_dir(),
            artifacts::ENCRYPTED_RESULTS,
        )?;

        self.dispatcher
            .dispatch(&StageInvocation::backend("client_decrypt_decode").arg(size.clone()))?;
        telemetry.mark_step(steps::RESULT_DECRYPTION, false);

        self.dispatcher
            .dispatch(&StageInvocation::backend("client_postprocess").arg(size))?;
        telemetry.mark_step(steps::RESULT_POSTPROCESSING, false);

        let model_quality = self.verify_or_score(run_index, &mut telemetry)?;

        let report = RunReport::from_run(
            run_index,
            self.config.size,
            seed,
            &telemetry,
            model_quality,
        );
        let path = self.layout.run_report_file(run_index);
        report.write(&path)?;
        info!(
            run_index,
            report = %path.display(),
            "[total latency] {}s",
            round4(telemetry.total_latency())
        );
        Ok(path)
    }

    /// The single-sample tier gets a diagnostic verification; every other
    /// tier is scored against ground truth and the cleartext reference.
    fn verify_or_score(
        &mut self,
        run_index: usize,
        telemetry: &mut Telemetry,
    ) -> Result<Option<QualityMap>> {
        let encrypted_preds = self.layout.encrypted_model_predictions_file();
        let ground_truth = self.layout.ground_truth_labels_file();

        if self.config.size.is_single() {
            if !encrypted_preds.exists() {
                warn!(path = %encrypted_preds.display(), "encrypted model predictions not found");
            }
            let outcome = self.dispatcher.dispatch(
                &StageInvocation::harness("verify_result")
                    .arg(path_arg(&ground_truth))
                    .arg(path_arg(&encrypted_preds))
                    .soft(),
            )?;
            if let StageOutcome::SoftFailed { .. } = outcome {
                self.soft_failures
                    .push(format!("run {}: verify_result", run_index));
            }
            return Ok(None);
        }

        if !encrypted_preds.exists() {
            return Err(BenchError::MissingArtifact {
                label: "encrypted model predictions".to_string(),
                path: encrypted_preds,
            });
        }

        let harness_preds = self.layout.harness_model_predictions_file();
        let cleartext = self.options.runs_cleartext_reference();
        if cleartext {
            self.dispatcher.dispatch(
                &StageInvocation::harness("cleartext_impl")
                    .arg(path_arg(&self.layout.test_input_file()))
                    .arg(path_arg(&harness_preds))
                    .arg(self.options.dataset.clone()),
            )?;
            telemetry.mark_step(steps::CLEARTEXT_INFERENCE, false);
        } else {
            info!("cleartext reference disabled, reporting encrypted model quality only");
        }

        let mut model_quality = QualityMap::new();
        quality::score(
            &mut model_quality,
            &ground_truth,
            &encrypted_preds,
            ENCRYPTED_MODEL_TAG,
        )?;
        if cleartext {
            quality::score(
                &mut model_quality,
                &ground_truth,
                &harness_preds,
                HARNESS_MODEL_TAG,
            )?;
        }
        telemetry.mark_step(steps::QUALITY_CHECK, false);
        Ok(Some(model_quality))
    }

    fn size_arg(&self) -> String {
        self.config.size.ordinal().to_string()
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn run_build_script(script: &Path, args: &[&str], work_dir: &Path) -> Result<()> {
    let stage = script
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| script.display().to_string());
    info!(script = %stage, "building submission");
    let status = Command::new(script)
        .args(args)
        .current_dir(work_dir)
        .status()
        .map_err(|source| BenchError::StageSpawn {
            stage: stage.clone(),
            program: script.to_path_buf(),
            source,
        })?;
    if !status.success() {
        return Err(BenchError::StageFailed {
            stage,
            code: status.code(),
        });
    }
    Ok(())
}
