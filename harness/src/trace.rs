// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Per-cycle waveform samples and their Value Change Dump rendering.

use std::{
    fs,
    io::{self, BufWriter, Write},
};

use camino::Utf8Path;
use snafu::{ResultExt, Whatever};

use crate::logic::{Logic, LogicVector};

/// The values of every traced port after one settled cycle, in the order of
/// [`Trace::ports`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub cycle: u64,
    pub values: Vec<LogicVector>,
}

#[derive(Debug, Clone, Default)]
pub struct Trace {
    ports: Vec<(String, usize)>,
    samples: Vec<Sample>,
}

impl Trace {
    /// A trace of the given `(name, width)` ports.
    pub fn new(ports: Vec<(String, usize)>) -> Self {
        Self {
            ports,
            samples: Vec::new(),
        }
    }

    pub fn ports(&self) -> &[(String, usize)] {
        &self.ports
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub(crate) fn record(&mut self, cycle: u64, values: Vec<LogicVector>) {
        self.samples.push(Sample { cycle, values });
    }

    /// The values of `port` over time as `(cycle, value)` pairs.
    pub fn waveform(&self, port: &str) -> Vec<(u64, &LogicVector)> {
        let Some(index) = self.ports.iter().position(|(name, _)| name == port)
        else {
            return vec![];
        };
        self.samples
            .iter()
            .filter_map(|sample| {
                sample.values.get(index).map(|value| (sample.cycle, value))
            })
            .collect()
    }

    /// Writes the trace as a Value Change Dump with one time unit per cycle.
    /// Only values that changed since the previous sample are emitted.
    pub fn write_vcd<W: Write>(&self, module: &str, out: W) -> io::Result<()> {
        let mut out = BufWriter::new(out);
        writeln!(out, "$timescale 1ns $end")?;
        writeln!(out, "$scope module {module} $end")?;
        for (index, (name, width)) in self.ports.iter().enumerate() {
            writeln!(out, "$var wire {width} {} {name} $end", identifier(index))?;
        }
        writeln!(out, "$upscope $end")?;
        writeln!(out, "$enddefinitions $end")?;

        let mut previous: Option<&[LogicVector]> = None;
        for sample in &self.samples {
            writeln!(out, "#{}", sample.cycle)?;
            for (index, value) in sample.values.iter().enumerate() {
                if previous.is_some_and(|previous| previous.get(index) == Some(value)) {
                    continue;
                }
                let id = identifier(index);
                if value.width() == 1 {
                    writeln!(out, "{}{id}", vcd_symbol(value.bits()[0]))?;
                } else {
                    let bits =
                        value.bits().iter().copied().map(vcd_symbol).collect::<String>();
                    writeln!(out, "b{bits} {id}")?;
                }
            }
            previous = Some(sample.values.as_slice());
        }
        out.flush()
    }

    pub fn save(&self, module: &str, path: &Utf8Path) -> Result<(), Whatever> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).whatever_context(format!(
                "Failed to create trace directory {parent}"
            ))?;
        }
        let file = fs::File::create(path)
            .whatever_context(format!("Failed to create trace file {path}"))?;
        self.write_vcd(module, file)
            .whatever_context(format!("Failed to write trace file {path}"))
    }
}

/// VCD identifiers are strings over the printable ASCII range.
fn identifier(mut index: usize) -> String {
    let mut id = String::new();
    loop {
        id.push(char::from(b'!' + (index % 94) as u8));
        index /= 94;
        if index == 0 {
            return id;
        }
        index -= 1;
    }
}

fn vcd_symbol(bit: Logic) -> char {
    match bit {
        Logic::Zero | Logic::WeakZero => '0',
        Logic::One | Logic::WeakOne => '1',
        Logic::HighImpedance => 'z',
        _ => 'x',
    }
}
