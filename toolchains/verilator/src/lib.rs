// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! This crate implements a [`Toolchain`] that compiles (System)Verilog with
//! Verilator into a dynamic library and simulates it in-process.
//!
//! Verilator is two-state, so only `0` and `1` can be written to a verilated
//! device, and ports are limited to 64 bits.

use std::{
    ffi::OsString,
    fs,
    sync::{Arc, LazyLock, Mutex},
    time::Instant,
};

use build_library::build_library;
use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use libloading::Library;
use owo_colors::OwoColorize;
use snafu::{ResultExt, Whatever, whatever};
use strobe_harness::{
    BuildRequest, Config, GenericParameterSet, ResolvedPort, Toolchain,
    eprintln_nocapture,
};

mod build_library;
pub mod dynamic;
mod render;

pub use dynamic::VerilatedDevice;

/// Optional configuration for a [`VerilatorToolchain`]. Usually, you can just
/// use [`VerilatorOptions::default()`].
#[derive(Debug, Clone)]
pub struct VerilatorOptions {
    /// The name of the `verilator` executable, interpreted in some way by the
    /// OS/shell.
    pub executable: OsString,

    /// If `None`, there will be no optimization. If a value from `0` to `3`
    /// inclusive, the flag `-O<level>` will be passed. Enabling will slow
    /// compilation times.
    pub optimization: Option<usize>,

    /// A list of warnings to disable.
    pub ignored_warnings: Vec<String>,

    /// Passed to Verilator as `-I<directory>`.
    pub include_directories: Vec<Utf8PathBuf>,

    pub yosys_executable: OsString,

    pub netlistsvg_executable: OsString,
}

impl Default for VerilatorOptions {
    fn default() -> Self {
        Self {
            executable: "verilator".into(),
            optimization: None,
            ignored_warnings: vec![],
            include_directories: vec![],
            yosys_executable: "yosys".into(),
            netlistsvg_executable: "netlistsvg".into(),
        }
    }
}

impl VerilatorOptions {
    /// Overrides defaults with the `[verilator]` section of `config`.
    /// `include_directories` entries are glob patterns.
    pub fn from_config(config: &Config) -> Result<Self, Whatever> {
        let mut options = Self::default();
        if let Some(executable) = config.string("verilator", "executable")? {
            options.executable = executable.into();
        }
        if let Some(level) = config
            .section("verilator")
            .and_then(|section| section.get("optimization"))
        {
            let Some(level) = level
                .as_integer()
                .and_then(|level| usize::try_from(level).ok())
                .filter(|level| *level <= 3)
            else {
                whatever!(
                    "Expected an optimization level from 0 to 3 in {}, got {}",
                    config.path(),
                    level
                );
            };
            options.optimization = Some(level);
        }
        if let Some(warnings) = config.strings("verilator", "ignored_warnings")? {
            options.ignored_warnings =
                warnings.into_iter().map(str::to_string).collect();
        }
        options.include_directories =
            config.globbed_paths("verilator", "include_directories")?;
        if let Some(yosys) = config.string("verilator", "yosys")? {
            options.yosys_executable = yosys.into();
        }
        if let Some(netlistsvg) = config.string("verilator", "netlistsvg")? {
            options.netlistsvg_executable = netlistsvg.into();
        }
        Ok(options)
    }

    /// [`VerilatorOptions::from_config`] on the discovered `strobe.toml`, or
    /// the defaults if there is none.
    pub fn discover() -> Result<Self, Whatever> {
        match Config::discover()? {
            Some(config) => Self::from_config(&config),
            None => Ok(Self::default()),
        }
    }

    fn profile(&self) -> String {
        self.optimization
            .map(|level| format!("O{level}"))
            .unwrap_or("unoptimized".into())
    }
}

/// A verilated top module, loaded and ready to instantiate.
pub struct VerilatedLibrary {
    top: String,
    ports: Vec<ResolvedPort>,
    clock: Option<String>,
    sources: Vec<Utf8PathBuf>,
    generics: GenericParameterSet,
    path: Utf8PathBuf,
    library: Library,
}

impl VerilatedLibrary {
    pub fn top(&self) -> &str {
        &self.top
    }

    pub fn ports(&self) -> &[ResolvedPort] {
        &self.ports
    }

    /// The location of the shared object on disk.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

#[derive(Default)]
struct ThreadLocalFileLock;

/* <Forgive me father for I have sinned> */

/// The file_guard handles locking across processes, but does not guarantee
/// locking between threads in one process.
static THREAD_LOCK: LazyLock<DashMap<Utf8PathBuf, Mutex<ThreadLocalFileLock>>> =
    LazyLock::new(DashMap::default);

/* </Forgive me father for I have sinned> */

/// Toolchain for (System)Verilog code.
#[derive(Default)]
pub struct VerilatorToolchain {
    options: VerilatorOptions,
}

impl VerilatorToolchain {
    pub fn new(options: VerilatorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &VerilatorOptions {
        &self.options
    }

    fn validate(&self, request: &BuildRequest) -> Result<(), Whatever> {
        if request.top.chars().any(|c| c == '\\' || c == ' ') {
            whatever!("Escaped module names are not supported");
        }

        if request.log {
            log::info!("Validating source files");
        }
        for source in &request.sources {
            if !source.is_file() {
                whatever!(
                    "Source file {} does not exist or is not a file. Note that if it's a relative path, you must be in the correct directory",
                    source
                );
            }
        }

        if let Some(port) = request.interface.iter().find(|port| port.width > 64) {
            whatever!(
                "Port {} on module {} is greater than 64 bits",
                port.name,
                request.top
            );
        }
        Ok(())
    }
}

impl Toolchain for VerilatorToolchain {
    type Artifact = VerilatedLibrary;
    type Device = VerilatedDevice;

    fn name(&self) -> &str {
        "verilator"
    }

    /// Invokes verilator to build a dynamic library for `request.top` with the
    /// resolved interface of the request, then loads it.
    ///
    /// The library is rebuilt only if one of the sources is newer than what is
    /// already in the artifact directory or if `request.force_rebuild` is set.
    /// Builds of one artifact directory are serialized across threads and
    /// processes.
    fn build(&self, request: &BuildRequest) -> Result<Self::Artifact, Whatever> {
        self.validate(request)?;

        let artifact_directory = &request.artifact_directory;
        if request.log {
            log::info!("Creating artifacts directory {}", artifact_directory);
        }
        fs::create_dir_all(artifact_directory).whatever_context(format!(
            "Failed to create artifacts directory {}",
            artifact_directory,
        ))?;

        eprintln_nocapture!(
            "{} waiting for file lock on build directory",
            "    Blocking".bold().cyan(),
        )?;

        // # Safety
        // build_library is not thread-safe, so we have to lock the directory
        if request.log {
            log::info!("Acquiring file lock on artifact directory");
        }
        let file_lock = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(artifact_directory.join("build.lock"))
            .whatever_context(
                "Failed to open file lock file for artifacts directory (this is not the actual lock itself, it is an I/O error)",
            )?;

        let _file_lock =
            file_guard::lock(&file_lock, file_guard::Lock::Exclusive, 0, 1)
                .whatever_context(
                    "Failed to acquire file lock for artifacts directory",
                )?;

        let thread_mutex =
            THREAD_LOCK.entry(artifact_directory.clone()).or_default();
        let Ok(_thread_lock) = thread_mutex.lock() else {
            whatever!("Failed to acquire thread-local lock for artifacts directory");
        };

        eprintln_nocapture!(
            "{} {} ({})",
            "   Compiling".bold().green(),
            request.top,
            request.key
        )?;
        let start = Instant::now();
        if request.log {
            log::info!("Building the dynamic library with verilator");
        }
        let path = build_library(request, &self.options)
            .whatever_context("Failed to build verilator dynamic library")?;

        if request.log {
            log::info!("Opening the dynamic library");
        }
        let library = unsafe { Library::new(&path) }
            .whatever_context("Failed to load verilator dynamic library")?;

        let duration = start.elapsed();
        eprintln_nocapture!(
            "{} `verilator-{}` profile target(s) in {}.{:02}s",
            "    Finished".bold().green(),
            self.options.profile(),
            duration.as_secs(),
            duration.subsec_millis() / 10
        )?;

        Ok(VerilatedLibrary {
            top: request.top.clone(),
            ports: request.interface.clone(),
            clock: request.clock.clone(),
            sources: request.sources.clone(),
            generics: request.generics.clone(),
            path,
            library,
        })
    }

    fn render(
        &self,
        artifact: &Self::Artifact,
        output: &Utf8Path,
    ) -> Result<Utf8PathBuf, Whatever> {
        render::render_netlist(
            &self.options,
            &artifact.top,
            &artifact.sources,
            &artifact.generics,
            output,
        )
    }

    fn instantiate(
        &self,
        artifact: &Arc<Self::Artifact>,
    ) -> Result<Self::Device, Whatever> {
        VerilatedDevice::new(artifact.clone())
    }
}
