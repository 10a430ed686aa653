//! In-memory fakes for the gate's capability traits (testing only)
//!
//! Every fake records how it was used so tests can assert that a later
//! stage never ran after an earlier one failed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::env::EnvAccessor;
use crate::probe::{
    CapabilityProbe, CapabilityReport, CompositionError, CompositionSurface, ProbeError,
    SdkBootstrap, SdkSession,
};
use crate::readiness::{HealthTransport, TransportError};
use crate::signoff::{CommandOutput, CommandRunner};
use crate::surfaces::{CompositionSurfaceId, RegistryError, RegistrySource};
use crate::workdir::{PathProbe, RepoRootError, RepoRootResolver, REPO_MARKER};

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// Clock frozen at one instant.
#[derive(Debug)]
pub struct FixedClock {
    now: i64,
}

impl FixedClock {
    pub const fn new(now: i64) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now
    }
}

/// Clock that advances by `step` milliseconds every time it is read.
#[derive(Debug)]
pub struct SteppingClock {
    next: AtomicI64,
    step: i64,
}

impl SteppingClock {
    pub fn new(start: i64, step: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now_ms(&self) -> i64 {
        self.next.fetch_add(self.step, Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// MapEnv
// ---------------------------------------------------------------------------

/// Environment backed by a map instead of the process.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: BTreeMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl EnvAccessor for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Script {
    Body(String),
    Error(String),
    Hang,
}

/// Increments the shared counter when a pending fetch is dropped.
struct CancelGuard(Arc<AtomicUsize>);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Health transport that answers every fetch the same way.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Script,
    calls: Mutex<Vec<String>>,
    cancellations: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    fn scripted(script: Script) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
            cancellations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn body(body: impl Into<String>) -> Self {
        Self::scripted(Script::Body(body.into()))
    }

    pub fn error(cause: impl Into<String>) -> Self {
        Self::scripted(Script::Error(cause.into()))
    }

    /// Never completes; dropping the fetch counts as a cancellation.
    pub fn hang() -> Self {
        Self::scripted(Script::Hang)
    }

    /// URLs fetched, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthTransport for ScriptedTransport {
    async fn fetch(&self, url: &str) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        match &self.script {
            Script::Body(body) => Ok(body.clone()),
            Script::Error(cause) => Err(TransportError(cause.clone())),
            Script::Hang => {
                let _guard = CancelGuard(self.cancellations.clone());
                std::future::pending().await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StaticProbe / StaticSdk
// ---------------------------------------------------------------------------

/// Capability probe returning a fixed composition or a fixed error.
#[derive(Debug)]
pub struct StaticProbe {
    outcome: Result<Vec<CompositionSurface>, ProbeError>,
    calls: AtomicUsize,
}

impl StaticProbe {
    pub fn reporting(composition: Vec<CompositionSurface>) -> Self {
        Self {
            outcome: Ok(composition),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every known surface, all available.
    pub fn all_surfaces() -> Self {
        Self::reporting(
            CompositionSurfaceId::ALL
                .into_iter()
                .map(|id| CompositionSurface {
                    id,
                    available: true,
                })
                .collect(),
        )
    }

    pub fn failing(error: ProbeError) -> Self {
        Self {
            outcome: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProbe for StaticProbe {
    async fn probe(
        &self,
        server_url: &str,
        _timeout: Duration,
    ) -> Result<CapabilityReport, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let composition = self.outcome.clone()?;
        Ok(CapabilityReport {
            server_url: server_url.to_string(),
            composition,
            probed_at: 0,
        })
    }
}

/// SDK bootstrap that always connects or always fails.
#[derive(Debug)]
pub struct StaticSdk {
    failure: Option<CompositionError>,
    calls: AtomicUsize,
}

impl StaticSdk {
    pub fn ok() -> Self {
        Self {
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: CompositionError) -> Self {
        Self {
            failure: Some(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SdkBootstrap for StaticSdk {
    async fn connect(
        &self,
        server_url: &str,
        directory: &Path,
    ) -> Result<SdkSession, CompositionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(SdkSession {
            server_url: server_url.to_string(),
            directory: directory.to_path_buf(),
            connected_at: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Path probe over a fixed set of existing paths.
#[derive(Debug, Default)]
pub struct StaticPathProbe {
    existing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl StaticPathProbe {
    pub fn new<I, S>(existing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            existing: existing.into_iter().map(Into::into).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Paths checked, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PathProbe for StaticPathProbe {
    async fn exists(&self, path: &str) -> bool {
        self.calls.lock().unwrap().push(path.to_string());
        self.existing.contains(path)
    }
}

/// Repository-root resolver with a fixed answer.
#[derive(Debug, Clone)]
pub struct FixedRepoRoot {
    root: Option<PathBuf>,
}

impl FixedRepoRoot {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn missing() -> Self {
        Self { root: None }
    }
}

#[async_trait]
impl RepoRootResolver for FixedRepoRoot {
    async fn resolve(&self, cwd: &Path) -> Result<PathBuf, RepoRootError> {
        self.root.clone().ok_or_else(|| RepoRootError::MarkerMissing {
            absolute: cwd.join(REPO_MARKER).to_string_lossy().into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingRunner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FailureRule {
    program: String,
    exit_code: i32,
    stderr: String,
}

/// Command runner that succeeds unless a rule matches the program name.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    rules: Vec<FailureRule>,
    invocations: Mutex<Vec<Vec<String>>>,
}

impl RecordingRunner {
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Exit with `exit_code` whenever the first token is `program`.
    pub fn fail_on(mut self, program: &str, exit_code: i32, stderr: &str) -> Self {
        self.rules.push(FailureRule {
            program: program.to_string(),
            exit_code,
            stderr: stderr.to_string(),
        });
        self
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &[String]) -> CommandOutput {
        self.invocations.lock().unwrap().push(command.to_vec());
        let rule = command
            .first()
            .and_then(|program| self.rules.iter().find(|r| &r.program == program));
        match rule {
            Some(rule) => CommandOutput {
                exit_code: rule.exit_code,
                stdout: String::new(),
                stderr: rule.stderr.clone(),
            },
            None => CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryRegistrySource
// ---------------------------------------------------------------------------

/// Registry source backed by a path-to-text map.
#[derive(Debug, Default)]
pub struct MemoryRegistrySource {
    files: HashMap<String, String>,
    reads: AtomicUsize,
}

impl MemoryRegistrySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.files.insert(path.into(), text.into());
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistrySource for MemoryRegistrySource {
    async fn read(&self, path: &str) -> Result<String, RegistryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                path: path.to_string(),
            })
    }
}
