// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

// hardcoded knowledge:
// - output library is obj_dir/libV${top_module}_dyn.so
// - location of verilated.h

use std::{fmt::Write, fs, process::Command, time::SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use snafu::{ResultExt, Whatever, whatever};
use strobe_harness::{BuildRequest, PortDirection, ResolvedPort};

use crate::VerilatorOptions;

/// Every port crosses the C boundary as a `uint64_t`; the wrappers narrow it to
/// whatever type Verilator picked for the port.
fn build_ffi(
    artifact_directory: &Utf8Path,
    top: &str,
    ports: &[ResolvedPort],
) -> Result<Utf8PathBuf, Whatever> {
    let ffi_wrappers = artifact_directory.join("ffi.cpp");

    let mut buffer = String::new();
    writeln!(
        &mut buffer,
        r#"
#include <cstdint>
#include <type_traits>
#include "verilated.h"
#include "V{top}.h"

extern "C" {{
    void* ffi_new_V{top}() {{
        return new V{top}{{}};
    }}

    void ffi_V{top}_eval(V{top}* top) {{
        top->eval();
    }}

    void ffi_delete_V{top}(V{top}* top) {{
        delete top;
    }}
"#
    )
    .whatever_context("Failed to format utility FFI")?;

    for port in ports {
        let name = &port.name;
        if port.width > 64 {
            whatever!(
                "Port `{}` on top module `{}` was larger than 64 bits wide",
                name,
                top
            );
        }

        if port.direction.is_drivable() {
            writeln!(
                &mut buffer,
                r#"
    void ffi_V{top}_pin_{name}(V{top}* top, uint64_t new_value) {{
        top->{name} = static_cast<std::remove_reference_t<decltype(top->{name})>>(new_value);
    }}"#
            )
            .whatever_context("Failed to format input port FFI")?;
        }

        writeln!(
            &mut buffer,
            r#"
    uint64_t ffi_V{top}_read_{name}(V{top}* top) {{
        return static_cast<uint64_t>(top->{name});
    }}"#
        )
        .whatever_context("Failed to format output port FFI")?;
    }

    writeln!(&mut buffer, "}} // extern \"C\"")
        .whatever_context("Failed to format ending brace")?;

    fs::write(&ffi_wrappers, buffer)
        .whatever_context("Failed to write FFI wrappers file")?;

    Ok(ffi_wrappers)
}

fn needs_rebuild(
    sources: &[Utf8PathBuf],
    verilator_artifact_directory: &Utf8Path,
    library_path: &Utf8Path,
) -> Result<bool, Whatever> {
    if !library_path.is_file() {
        return Ok(true);
    }

    let Some(last_built) = fs::read_dir(verilator_artifact_directory)
        .whatever_context(format!(
            "{} exists but could not read it",
            verilator_artifact_directory
        ))?
        .flatten() // Remove failed
        .filter_map(|entry| entry.metadata().ok())
        .filter(|metadata| metadata.is_file())
        .filter_map(|metadata| metadata.modified().ok())
        .max()
    else {
        return Ok(true);
    };

    for source in sources {
        let last_edited: SystemTime = fs::metadata(source)
            .whatever_context(format!(
                "Failed to read file metadata for source file {}",
                source
            ))?
            .modified()
            .whatever_context(format!(
                "Failed to determine last-modified time for source file {}",
                source
            ))?;
        if last_edited > last_built {
            return Ok(true);
        }
    }

    Ok(false)
}

/// The arguments passed to verilator before the sources, excluding output
/// locations.
fn verilator_flags(request: &BuildRequest, options: &VerilatorOptions) -> Vec<String> {
    let mut flags = vec!["--top-module".to_string(), request.top.clone()];
    for (name, value) in request.generics.iter() {
        flags.push(format!("-G{name}={}", value.render()));
    }
    if let Some(level) = options.optimization {
        flags.push(format!("-O{level}"));
    }
    for warning in &options.ignored_warnings {
        flags.push(format!("-Wno-{warning}"));
    }
    for directory in &options.include_directories {
        flags.push(format!("-I{directory}"));
    }
    flags
}

/// Builds the shared library for `request` under its artifact directory and
/// returns its path, reusing the one already there if it is up to date.
pub fn build_library(
    request: &BuildRequest,
    options: &VerilatorOptions,
) -> Result<Utf8PathBuf, Whatever> {
    let artifact_directory = &request.artifact_directory;
    let ffi_artifact_directory = artifact_directory.join("ffi");
    fs::create_dir_all(&ffi_artifact_directory).whatever_context(
        "Failed to create ffi subdirectory under artifacts directory",
    )?;
    let verilator_artifact_directory = artifact_directory.join("obj_dir");
    let library_name = format!("V{}_dyn", request.top);
    let library_path =
        verilator_artifact_directory.join(format!("lib{}.so", library_name));

    if !request.force_rebuild
        && !needs_rebuild(
            &request.sources,
            &verilator_artifact_directory,
            &library_path,
        )
        .whatever_context("Failed to check if artifacts need rebuilding")?
    {
        if request.log {
            log::info!("Reusing up-to-date library at {}", library_path);
        }
        return Ok(library_path);
    }

    let _ffi_wrappers =
        build_ffi(&ffi_artifact_directory, &request.top, &request.interface)
            .whatever_context("Failed to build FFI wrappers")?;

    // bug in verilator#5226 means the directory must be relative to -Mdir
    let ffi_wrappers = Utf8Path::new("../ffi/ffi.cpp");

    let mut command = Command::new(&options.executable);
    command
        .args(["--cc", "-sv", "--build", "-j", "0"])
        .args(["-CFLAGS", "-shared -fpic"])
        .args(["--lib-create", &library_name])
        .args(["--Mdir", verilator_artifact_directory.as_str()])
        .args(verilator_flags(request, options))
        .args(&request.sources)
        .arg(ffi_wrappers);
    if request.log {
        log::info!("Invoking {:?}", command);
    }

    let verilator_output = command
        .output()
        .whatever_context("Invocation of verilator failed")?;

    if !verilator_output.status.success() {
        whatever!(
            "Invocation of verilator failed with nonzero exit code {}\n\n--- STDOUT ---\n{}\n\n--- STDERR ---\n{}",
            verilator_output.status,
            String::from_utf8_lossy(&verilator_output.stdout),
            String::from_utf8_lossy(&verilator_output.stderr)
        );
    }

    Ok(library_path)
}

#[cfg(test)]
mod tests {
    use strobe_harness::{
        BuildKey, GenericDecl, GenericParameterSet, GenericValue, ModuleDefinition,
    };

    use super::*;

    fn request() -> BuildRequest {
        let definition = ModuleDefinition::builder("counter", "rtl/counter.sv")
            .input("clk", 1)
            .output("count", 4)
            .inout("pad", 1)
            .generic(GenericDecl::integer("WIDTH").default(4))
            .generic(GenericDecl::boolean("SATURATE").default(false))
            .clock("clk")
            .build()
            .expect("valid definition");
        let generics: GenericParameterSet = definition
            .resolve_generics([("SATURATE", GenericValue::from(true))])
            .expect("valid generics");
        let interface = definition
            .resolve_interface(&generics)
            .expect("fixed widths");
        BuildRequest {
            key: BuildKey::compute(
                "counter",
                definition.source(),
                &generics,
                &[],
                &interface,
                Some("clk"),
            ),
            top: "counter".into(),
            sources: vec!["rtl/counter.sv".into()],
            generics,
            interface,
            clock: Some("clk".into()),
            artifact_directory: "artifacts/counter".into(),
            force_rebuild: false,
            log: false,
        }
    }

    #[test]
    fn flags_carry_generics_and_options() {
        let options = VerilatorOptions {
            optimization: Some(2),
            ignored_warnings: vec!["WIDTH".into()],
            include_directories: vec!["rtl/include".into()],
            ..Default::default()
        };
        assert_eq!(
            verilator_flags(&request(), &options),
            [
                "--top-module",
                "counter",
                "-GSATURATE=1",
                "-GWIDTH=4",
                "-O2",
                "-Wno-WIDTH",
                "-Irtl/include"
            ]
        );
    }

    #[test]
    #[snafu::report]
    fn ffi_only_pins_drivable_ports() -> Result<(), Whatever> {
        let directory = tempfile::tempdir()
            .whatever_context("Failed to create temporary directory")?;
        let directory = Utf8PathBuf::try_from(directory.path().to_path_buf())
            .whatever_context("Temporary directory is not UTF-8")?;
        let request = request();

        let path = build_ffi(&directory, &request.top, &request.interface)?;
        let wrappers = fs::read_to_string(path)
            .whatever_context("Failed to read FFI wrappers")?;
        for symbol in [
            "ffi_new_Vcounter",
            "ffi_Vcounter_eval",
            "ffi_delete_Vcounter",
            "ffi_Vcounter_pin_clk",
            "ffi_Vcounter_pin_pad",
            "ffi_Vcounter_read_count",
            "ffi_Vcounter_read_pad",
        ] {
            assert!(wrappers.contains(symbol), "missing {symbol}");
        }
        assert!(!wrappers.contains("ffi_Vcounter_pin_count"));
        assert!(request
            .interface
            .iter()
            .any(|port| port.direction == PortDirection::Inout));
        Ok(())
    }
}
