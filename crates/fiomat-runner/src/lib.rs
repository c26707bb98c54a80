//! Sequential fio benchmark orchestration: expands workload parameter
//! matrices per storage mount, runs every combination through the fio
//! binary, reclaims the mount's scratch area between jobs, and writes one
//! flat text artifact per job.

use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_FIO_BINARY: &str = "/usr/bin/fio";
const LOADAVG_PATH: &str = "/proc/loadavg";
const ARTIFACT_DELIMITER: &str = "-----------------";

/// One fully expanded parameter combination: `--name=value` flags in axis
/// order, ready to hand to fio.
pub type ExpandedJob = Vec<String>;

#[derive(Debug, Clone)]
struct ParameterAxis {
    name: String,
    values: Vec<String>,
}

/// An ordered set of benchmark parameter axes to combine exhaustively.
///
/// Axis order is insertion order and pins both flag order within a job and
/// the order jobs are expanded in, so counts and artifact names reproduce
/// across runs.
#[derive(Debug, Clone, Default)]
pub struct WorkloadDefinition {
    axes: Vec<ParameterAxis>,
}

impl WorkloadDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter axis. Duplicate axis names and empty value lists
    /// are rejected rather than silently overridden or expanded to zero
    /// combinations.
    pub fn axis<V: ToString>(mut self, name: &str, values: &[V]) -> Result<Self> {
        if values.is_empty() {
            bail!("workload axis '{}' has an empty value list", name);
        }
        if self.axes.iter().any(|a| a.name == name) {
            bail!("workload axis '{}' is defined twice", name);
        }
        self.axes.push(ParameterAxis {
            name: name.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        });
        Ok(self)
    }

    /// Number of jobs `expand` will produce.
    pub fn combination_count(&self) -> usize {
        self.axes.iter().map(|a| a.values.len()).product()
    }

    /// Expands the full Cartesian product. Later axes vary fastest. A
    /// definition with no axes expands to a single job with zero flags.
    pub fn expand(&self) -> Vec<ExpandedJob> {
        let mut jobs: Vec<ExpandedJob> = vec![Vec::new()];
        for axis in &self.axes {
            let mut next = Vec::with_capacity(jobs.len() * axis.values.len());
            for job in &jobs {
                for value in &axis.values {
                    let mut flags = job.clone();
                    flags.push(format!("--{}={}", axis.name, value));
                    next.push(flags);
                }
            }
            jobs = next;
        }
        jobs
    }
}

/// A storage volume under test: the path fio runs in (and scribbles scratch
/// files into), plus the workloads bound to it.
#[derive(Debug, Clone)]
pub struct MountTarget {
    pub path: PathBuf,
    pub workloads: Vec<WorkloadDefinition>,
}

impl MountTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            workloads: Vec::new(),
        }
    }

    pub fn workload(mut self, definition: WorkloadDefinition) -> Self {
        self.workloads.push(definition);
        self
    }

    /// Expands every bound workload in order and concatenates the results.
    /// Identical jobs coming from different workloads are kept and run
    /// twice.
    fn expand_all(&self) -> Vec<ExpandedJob> {
        self.workloads.iter().flat_map(|w| w.expand()).collect()
    }
}

/// Everything the orchestrator needs, built at startup and passed in
/// explicitly so tests can inject fixture binaries and paths.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub fio_binary: PathBuf,
    pub out_dir: PathBuf,
    pub mounts: Vec<MountTarget>,
    pub loadavg_path: PathBuf,
}

impl RunConfig {
    pub fn new(out_dir: impl Into<PathBuf>, mounts: Vec<MountTarget>) -> Self {
        Self {
            fio_binary: PathBuf::from(DEFAULT_FIO_BINARY),
            out_dir: out_dir.into(),
            mounts,
            loadavg_path: PathBuf::from(LOADAVG_PATH),
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub jobs_run: usize,
    pub artifacts: Vec<PathBuf>,
}

/// Timing and load facts captured right after a job finishes, before the
/// next one starts.
#[derive(Debug)]
struct RunMetadata {
    /// Elapsed wall time in milliseconds; recorded under the `sec` key.
    sec: f64,
    /// Raw load-average snapshot text.
    load: String,
}

/// Derives the job's name from its flag list: underscore-joined, leading
/// `--` stripped, `=` replaced by `-`. Doubles as the fio `--name` value and
/// the artifact file name, so it relies on the expander only ever emitting
/// `--name=value` shaped tokens.
pub fn job_name(job: &[String]) -> String {
    job.iter()
        .map(|flag| flag.trim_start_matches("--").replace('=', "-"))
        .collect::<Vec<_>>()
        .join("_")
}

/// One-shot pre-flight gate run before any job: hours of matrix execution
/// should never start against an environment without a working fio.
pub fn safety_check(binary: &Path) -> Result<()> {
    let status = Command::new(binary)
        .arg("--help")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| anyhow!("fio binary cannot be found at {}: {}", binary.display(), e))?;
    if !status.success() {
        bail!(
            "fio binary at {} failed its help-flag check ({})",
            binary.display(),
            status
        );
    }
    Ok(())
}

/// Runs one job to completion inside the mount directory and returns fio's
/// captured stdout. The output is an opaque blob; stderr passes through.
fn run_fio(binary: &Path, mount: &Path, job: &[String], name: &str) -> Result<String> {
    let output = Command::new(binary)
        .args(job)
        .arg(format!("--name={}", name))
        .current_dir(mount)
        .stderr(Stdio::inherit())
        .output()
        .with_context(|| format!("failed to invoke {}", binary.display()))?;
    if !output.status.success() {
        bail!("fio job '{}' exited with {}", name, output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Deletes every file and subdirectory tree under `dir`, leaving `dir`
/// itself in place. This is the only isolation between consecutive jobs on
/// a mount. Removes anything present, not just what the last job wrote.
pub fn clear_scratch(dir: &Path) -> Result<()> {
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read scratch dir {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("failed to remove scratch tree {}", path.display()))?;
        } else {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove scratch file {}", path.display()))?;
        }
    }
    Ok(())
}

fn read_loadavg(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read load average from {}", path.display()))?;
    Ok(raw.trim_end().to_string())
}

fn sanitize_mount_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('/', "_")
        .trim_start_matches('_')
        .to_string()
}

fn artifact_path(out_dir: &Path, mount: &Path, name: &str) -> PathBuf {
    out_dir.join(format!("{}-{}.txt", sanitize_mount_path(mount), name))
}

fn render_artifact(output: &str, metadata: &RunMetadata) -> String {
    format!(
        "{}\n{}\nsec = {:.2}\nload = {}\n",
        output, ARTIFACT_DELIMITER, metadata.sec, metadata.load
    )
}

/// Runs the whole matrix: expands every mount's workloads, logs the total
/// up front, then executes strictly sequentially in expansion order. Any
/// job, cleanup, or write failure halts the remaining matrix; artifacts
/// already written stay in place.
pub fn run_matrix(config: &RunConfig) -> Result<RunSummary> {
    fs::create_dir_all(&config.out_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            config.out_dir.display()
        )
    })?;

    let mut queues: Vec<(&MountTarget, Vec<ExpandedJob>)> = Vec::new();
    for mount in &config.mounts {
        info!("{} processing jobs", mount.path.display());
        let jobs = mount.expand_all();
        info!("{} -- {} distinct jobs", mount.path.display(), jobs.len());
        queues.push((mount, jobs));
    }
    let total_jobs: usize = queues.iter().map(|(_, jobs)| jobs.len()).sum();
    info!("running {} jobs across {} mounts", total_jobs, queues.len());

    let mut jobs_run = 0usize;
    let mut artifacts = Vec::with_capacity(total_jobs);
    for (mount, jobs) in queues {
        for job in jobs {
            info!("remaining: {}/{}", total_jobs - jobs_run, total_jobs);
            info!("{} job: {}", mount.path.display(), job.join(" "));

            let name = job_name(&job);
            let started = Instant::now();
            let output = run_fio(&config.fio_binary, &mount.path, &job, &name)?;
            clear_scratch(&mount.path)?;
            let metadata = RunMetadata {
                sec: started.elapsed().as_secs_f64() * 1000.0,
                load: read_loadavg(&config.loadavg_path)?,
            };
            debug!("sec = {:.2}", metadata.sec);
            debug!("load = {}", metadata.load);

            let artifact = artifact_path(&config.out_dir, &mount.path, &name);
            fs::write(&artifact, render_artifact(&output, &metadata))
                .with_context(|| format!("failed to write artifact {}", artifact.display()))?;
            info!("created --> {}", artifact.display());

            jobs_run += 1;
            artifacts.push(artifact);
        }
    }

    Ok(RunSummary { jobs_run, artifacts })
}

/// The built-in mount/workload plan: a sequential sweep and a random sweep
/// bound to both RAID volumes.
pub fn default_mounts() -> Result<Vec<MountTarget>> {
    let sequential = WorkloadDefinition::new()
        .axis("readwrite", &["read", "write", "readwrite"])?
        .axis("direct", &[0, 1])?
        .axis("ioengine", &["sync"])?
        .axis("size", &["250G", "100G"])?
        .axis("numjobs", &[1])?
        .axis("runtime", &[60])?
        .axis("bs", &["1024k", "1M"])?;
    let random = WorkloadDefinition::new()
        .axis("readwrite", &["randread", "randwrite", "randrw"])?
        .axis("direct", &[0, 1])?
        .axis("ioengine", &["libaio"])?
        .axis("size", &["1024k", "5M", "100M", "1G"])?
        .axis("numjobs", &[5, 50, 150, 200])?
        .axis("runtime", &[60, 350])?;

    Ok(vec![
        MountTarget::new("/mnt/RAID10")
            .workload(sequential.clone())
            .workload(random.clone()),
        MountTarget::new("/mnt/LVMRAID1STRIPES")
            .workload(sequential)
            .workload(random),
    ])
}
