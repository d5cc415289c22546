// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Netlist diagrams through yosys and netlistsvg.

use std::{fs, process::Command};

use camino::{Utf8Path, Utf8PathBuf};
use snafu::{ResultExt, Whatever, whatever};
use strobe_harness::GenericParameterSet;

use crate::VerilatorOptions;

fn yosys_script(
    top: &str,
    sources: &[Utf8PathBuf],
    generics: &GenericParameterSet,
    json: &Utf8Path,
) -> String {
    let mut script = String::new();
    for source in sources {
        script.push_str(&format!("read_verilog -sv {source}; "));
    }
    for (name, value) in generics.iter() {
        script.push_str(&format!("chparam -set {name} {} {top}; ", value.render()));
    }
    script.push_str(&format!("prep -top {top}; write_json {json}"));
    script
}

fn run(command: &mut Command, tool: &str) -> Result<(), Whatever> {
    let output = command
        .output()
        .whatever_context(format!("Invocation of {tool} failed"))?;
    if !output.status.success() {
        whatever!(
            "Invocation of {} failed with nonzero exit code {}\n\n--- STDOUT ---\n{}\n\n--- STDERR ---\n{}",
            tool,
            output.status,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// Synthesizes `top` into a JSON netlist and renders it as `<top>.svg` under
/// `output`.
pub fn render_netlist(
    options: &VerilatorOptions,
    top: &str,
    sources: &[Utf8PathBuf],
    generics: &GenericParameterSet,
    output: &Utf8Path,
) -> Result<Utf8PathBuf, Whatever> {
    fs::create_dir_all(output)
        .whatever_context(format!("Failed to create output directory {output}"))?;
    let json = output.join(format!("{top}.json"));
    let svg = output.join(format!("{top}.svg"));

    run(
        Command::new(&options.yosys_executable)
            .arg("-q")
            .arg("-p")
            .arg(yosys_script(top, sources, generics, &json)),
        "yosys",
    )?;
    run(
        Command::new(&options.netlistsvg_executable)
            .arg(&json)
            .arg("-o")
            .arg(&svg),
        "netlistsvg",
    )?;

    Ok(svg)
}
