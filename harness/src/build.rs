// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Building simulatable artifacts.
//!
//! A [`Toolchain`] turns a [`BuildRequest`] into an artifact. The
//! [`BuildOrchestrator`] sits in front of it and guarantees that each
//! [`BuildKey`] reaches the toolchain at most once per orchestrator, no matter
//! how many runs ask for it concurrently. Failures are cached like successes,
//! so every run depending on a broken key sees the same [`BuildError`].

use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use snafu::Whatever;

use crate::{
    error::{BuildError, BuildStage, HarnessError, diagnostic},
    generics::GenericParameterSet,
    module::ModuleDefinition,
    options::HarnessOptions,
    port::ResolvedPort,
    sim::Device,
};

/// The identity of a compiled artifact: equal keys may share one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildKey {
    module: String,
    digest: u64,
}

impl BuildKey {
    pub fn compute(
        module: &str,
        top_source: &Utf8Path,
        generics: &GenericParameterSet,
        order: &[Utf8PathBuf],
        interface: &[ResolvedPort],
        clock: Option<&str>,
    ) -> Self {
        let mut canonical = format!("module {module}\ntop {top_source}\n");
        for (name, value) in generics.iter() {
            canonical.push_str(&format!("generic {name} {}\n", value.render()));
        }
        for source in order {
            canonical.push_str(&format!("source {source}\n"));
        }
        for port in interface {
            canonical.push_str(&format!(
                "port {} {} {}\n",
                port.direction, port.name, port.width
            ));
        }
        if let Some(clock) = clock {
            canonical.push_str(&format!("clock {clock}\n"));
        }
        Self {
            module: module.to_string(),
            digest: xxhash_rust::xxh3::xxh3_64(canonical.as_bytes()),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn digest(&self) -> u64 {
        self.digest
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:016x}", self.module, self.digest)
    }
}

/// Everything a [`Toolchain`] needs to build one artifact.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub key: BuildKey,
    /// The top-level module name.
    pub top: String,
    /// Ordered and deduplicated, dependencies first.
    pub sources: Vec<Utf8PathBuf>,
    pub generics: GenericParameterSet,
    pub interface: Vec<ResolvedPort>,
    pub clock: Option<String>,
    /// A directory reserved for this key.
    pub artifact_directory: Utf8PathBuf,
    pub force_rebuild: bool,
    pub log: bool,
}

/// The external compiler/elaborator and simulator of some HDL.
pub trait Toolchain: Send + Sync {
    type Artifact: Send + Sync + 'static;
    type Device: Device;

    fn name(&self) -> &str;

    fn build(&self, request: &BuildRequest) -> Result<Self::Artifact, Whatever>;

    /// Renders a structural diagram of `artifact` into `output`, returning the
    /// path of the diagram.
    fn render(
        &self,
        artifact: &Self::Artifact,
        output: &Utf8Path,
    ) -> Result<Utf8PathBuf, Whatever>;

    fn instantiate(
        &self,
        artifact: &Arc<Self::Artifact>,
    ) -> Result<Self::Device, Whatever>;
}

/// One entry of [`BuildOrchestrator::history`].
#[derive(Debug, Clone)]
pub struct BuildEvent {
    pub key: BuildKey,
    /// Whether the outcome came from the cache instead of the toolchain.
    pub cached: bool,
    pub succeeded: bool,
    pub duration: Duration,
}

type Slot<A> = Arc<OnceLock<Result<Arc<A>, BuildError>>>;

/// Shared by every run of a test binary; wrap it in an [`Arc`].
pub struct BuildOrchestrator<T: Toolchain> {
    toolchain: T,
    options: HarnessOptions,
    cache: DashMap<BuildKey, Slot<T::Artifact>>,
    history: boxcar::Vec<BuildEvent>,
    runs: AtomicU64,
}

impl<T: Toolchain> BuildOrchestrator<T> {
    pub fn new(toolchain: T, options: HarnessOptions) -> Self {
        Self {
            toolchain,
            options,
            cache: DashMap::new(),
            history: boxcar::Vec::new(),
            runs: AtomicU64::new(0),
        }
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    /// Resolves the build order and interface of `definition` and computes its
    /// key. Never invokes the toolchain.
    pub fn prepare(
        &self,
        definition: &ModuleDefinition,
        generics: &GenericParameterSet,
    ) -> Result<BuildRequest, HarnessError> {
        let sources = definition.build_order()?;
        let interface = definition.resolve_interface(generics)?;
        let key = BuildKey::compute(
            definition.name(),
            definition.source(),
            generics,
            &sources,
            &interface,
            definition.clock(),
        );
        if self.options.log {
            log::debug!("Build key for `{}` with {generics} is {key}", definition.name());
        }
        Ok(BuildRequest {
            artifact_directory: self.options.artifact_directory.join(key.to_string()),
            key,
            top: definition.name().to_string(),
            sources,
            generics: generics.clone(),
            interface,
            clock: definition.clock().map(str::to_string),
            force_rebuild: self.options.force_rebuild,
            log: self.options.log,
        })
    }

    /// Returns the artifact for `request.key`, invoking the toolchain only if
    /// no other request for the key has. Concurrent requests for a key that is
    /// being built block until it finishes.
    pub fn ensure(
        &self,
        request: &BuildRequest,
    ) -> Result<Arc<T::Artifact>, BuildError> {
        let slot = self
            .cache
            .entry(request.key.clone())
            .or_default()
            .value()
            .clone();

        let start = Instant::now();
        let mut compiled = false;
        let outcome = slot
            .get_or_init(|| {
                compiled = true;
                self.compile(request)
            })
            .clone();

        if !compiled && self.options.log {
            log::debug!("Reusing cached build of {}", request.key);
        }
        self.history.push(BuildEvent {
            key: request.key.clone(),
            cached: !compiled,
            succeeded: outcome.is_ok(),
            duration: start.elapsed(),
        });
        outcome
    }

    fn compile(&self, request: &BuildRequest) -> Result<Arc<T::Artifact>, BuildError> {
        if self.options.log {
            log::info!(
                "Building {} from {} source file(s) with {}",
                request.key,
                request.sources.len(),
                self.toolchain.name()
            );
        }
        let start = Instant::now();

        let artifact = self.toolchain.build(request).map_err(|error| {
            if self.options.log {
                log::warn!("Failed to build {}", request.key);
            }
            BuildError {
                key: request.key.to_string(),
                stage: BuildStage::Compile,
                diagnostic: diagnostic(error),
            }
        })?;

        if self.options.log {
            log::info!(
                "Built {} in {:.2}s",
                request.key,
                start.elapsed().as_secs_f64()
            );
        }
        Ok(Arc::new(artifact))
    }

    /// Renders a structural diagram of the artifact for `request` into
    /// `output`, building it first if needed.
    pub fn render(
        &self,
        request: &BuildRequest,
        output: &Utf8Path,
    ) -> Result<Utf8PathBuf, BuildError> {
        let artifact = self.ensure(request)?;
        if self.options.log {
            log::info!("Rendering {} into {output}", request.key);
        }
        self.toolchain
            .render(&artifact, output)
            .map_err(|error| BuildError {
                key: request.key.to_string(),
                stage: BuildStage::Render,
                diagnostic: diagnostic(error),
            })
    }

    /// Every build and cache reuse so far, in completion order.
    pub fn history(&self) -> impl Iterator<Item = &BuildEvent> {
        self.history.iter().map(|(_, event)| event)
    }

    /// A fresh index for a run, unique within this orchestrator. Traces of
    /// runs sharing a build key are told apart by it.
    pub(crate) fn next_run(&self) -> u64 {
        self.runs.fetch_add(1, Ordering::Relaxed)
    }

    /// How many times the toolchain was invoked.
    pub fn compilations(&self) -> usize {
        self.history().filter(|event| !event.cached).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GenericDecl, ModuleDefinition};

    fn definition() -> ModuleDefinition {
        ModuleDefinition::builder("COUNTER", "rtl/counter.vhd")
            .input("clk", 1)
            .output("count", 4)
            .generic(GenericDecl::integer("LIMIT").range(1, 15).default(9))
            .clock("clk")
            .build()
            .unwrap()
    }

    fn key(limit: i64) -> BuildKey {
        let definition = definition();
        let generics = definition.resolve_generics([("LIMIT", limit)]).unwrap();
        BuildKey::compute(
            definition.name(),
            definition.source(),
            &generics,
            &definition.build_order().unwrap(),
            &definition.resolve_interface(&generics).unwrap(),
            definition.clock(),
        )
    }

    #[test]
    fn keys_are_deterministic_and_parameter_sensitive() {
        assert_eq!(key(9), key(9));
        assert_ne!(key(9), key(10));

        let rendered = key(9).to_string();
        let (module, digest) = rendered.rsplit_once('-').unwrap();
        assert_eq!(module, "COUNTER");
        assert_eq!(digest.len(), 16);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn run_indices_are_unique_across_threads() {
        let orchestrator = Arc::new(BuildOrchestrator::new(
            crate::ModelLibrary::new(),
            HarnessOptions::default(),
        ));
        let workers = (0..4)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                std::thread::spawn(move || {
                    (0..50).map(|_| orchestrator.next_run()).collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        let mut indices = workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect::<Vec<_>>();
        indices.sort_unstable();
        assert_eq!(indices, (0..200).collect::<Vec<_>>());
    }
}
