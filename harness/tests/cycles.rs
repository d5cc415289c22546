// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{fs, sync::Arc};

use camino::Utf8PathBuf;
use snafu::{OptionExt, ResultExt, Whatever};
use strobe_harness::{
    BuildOrchestrator, GenericParameterSet, Harness, HarnessError,
    HarnessOptions, ModelLibrary, ModuleDefinition, Pins, PortDescriptor,
    PortDirection, PortWidth, TestStatus, UsageError,
};

fn models() -> ModelLibrary {
    ModelLibrary::new()
        .model(
            "PASSTHROUGH",
            "rtl/passthrough.vhd",
            vec![
                PortDescriptor::new("enable", PortDirection::Input, PortWidth::Fixed(1)),
                PortDescriptor::new("out", PortDirection::Output, PortWidth::Fixed(1)),
            ],
            |_: &GenericParameterSet| {
                Ok(|pins: &mut Pins| {
                    let enable = pins.get("enable")?.clone();
                    pins.set("out", enable)
                })
            },
        )
        .model(
            "COUNTER",
            "rtl/counter.vhd",
            vec![
                PortDescriptor::new("clk", PortDirection::Input, PortWidth::Fixed(1)),
                PortDescriptor::new("count", PortDirection::Output, PortWidth::Fixed(4)),
            ],
            |_: &GenericParameterSet| {
                let mut count = 0u128;
                Ok(move |pins: &mut Pins| {
                    count += 1;
                    pins.set_unsigned("count", count)
                })
            },
        )
}

fn passthrough(options: HarnessOptions) -> Harness<ModelLibrary> {
    let _ = env_logger::builder().is_test(true).try_init();
    let definition = ModuleDefinition::builder("PASSTHROUGH", "rtl/passthrough.vhd")
        .input("enable", 1)
        .output("out", 1)
        .build()
        .expect("valid definition");
    Harness::new(definition, Arc::new(BuildOrchestrator::new(models(), options)))
}

fn counter(options: HarnessOptions) -> Harness<ModelLibrary> {
    let _ = env_logger::builder().is_test(true).try_init();
    let definition = ModuleDefinition::builder("COUNTER", "rtl/counter.vhd")
        .input("clk", 1)
        .output("count", 4)
        .clock("clk")
        .build()
        .expect("valid definition");
    Harness::new(definition, Arc::new(BuildOrchestrator::new(models(), options)))
}

#[test]
#[snafu::report]
fn passthrough_follows_stimulus() -> Result<(), Whatever> {
    let harness = passthrough(HarnessOptions::default());

    let mut observed = vec![];
    let report = harness
        .test(|bench| {
            for value in [0, 1, 0, 1] {
                bench.write("enable", value)?;
                bench.advance(1)?;
                observed.push(bench.read("out")?.to_string());
                bench.check("out", value, format!("out follows enable={value}"))?;
            }
            Ok(())
        })
        .into_result()
        .whatever_context("Passthrough run did not pass")?;

    assert_eq!(observed, ["0", "1", "0", "1"]);
    assert_eq!(report.cycles, 4);
    assert_eq!(report.checks.len(), 4);
    assert!(report.key.is_some());
    Ok(())
}

#[test]
fn writes_are_invisible_until_the_next_cycle() {
    let harness = passthrough(HarnessOptions::default());
    let report = harness.test(|bench| {
        assert_eq!(bench.current_cycle(), 0);
        assert_eq!(bench.read("out")?.to_string(), "U");
        bench.write("enable", "1")?;
        assert_eq!(bench.read("out")?.to_string(), "U");
        bench.cycle()?;
        assert_eq!(bench.current_cycle(), 1);
        assert_eq!(bench.read("out")?.to_string(), "1");
        Ok(())
    });
    assert_eq!(report.status, TestStatus::Passed);
}

#[test]
fn width_mismatched_check_aborts_before_any_cycle() {
    let harness = passthrough(HarnessOptions::default());
    let report = harness.test(|bench| {
        bench.check("out", "00", "too wide")?;
        bench.advance(1)?;
        Ok(())
    });
    assert_eq!(report.status, TestStatus::Errored);
    assert_eq!(report.cycles, 0);
    assert!(report.checks.is_empty());
    assert!(matches!(
        report.error,
        Some(HarnessError::Usage {
            source: UsageError::WidthMismatch { width: 1, actual: 2, .. }
        })
    ));
}

#[test]
fn discarded_usage_error_still_ends_the_run() {
    let harness = counter(HarnessOptions::default());
    let mut later = vec![];
    let report = harness.test(|bench| {
        let _ = bench.check("count", "00", "too narrow");
        later.push(bench.advance(3).is_err());
        later.push(bench.write("clk", 1).is_err());
        later.push(bench.check("count", 3u8, "never compared").is_err());
        Ok(())
    });

    assert_eq!(later, [true, true, true]);
    assert_eq!(report.status, TestStatus::Errored);
    assert_eq!(report.cycles, 0);
    assert!(report.checks.is_empty());
    assert!(matches!(
        report.error,
        Some(HarnessError::Usage {
            source: UsageError::WidthMismatch { width: 4, actual: 2, .. }
        })
    ));
}

#[test]
fn zero_cycle_advance_is_a_usage_error() {
    let harness = passthrough(HarnessOptions::default());
    let report = harness.test(|bench| bench.advance(0));
    assert!(matches!(
        report.error,
        Some(HarnessError::Usage {
            source: UsageError::ZeroCycles { .. }
        })
    ));
}

#[test]
fn undeclared_ports_are_rejected_at_the_call() {
    let harness = passthrough(HarnessOptions::default());
    let report = harness.test(|bench| bench.write("reset", "1"));
    assert!(matches!(
        report.error,
        Some(HarnessError::Usage {
            source: UsageError::UnknownPort { .. }
        })
    ));

    let report = harness.test(|bench| bench.write("out", "1"));
    assert!(matches!(
        report.error,
        Some(HarnessError::Usage {
            source: UsageError::WriteToOutput { .. }
        })
    ));
}

fn checks_at_two_five_eight(low_detail: bool) -> strobe_harness::TestReport {
    let harness = counter(HarnessOptions {
        low_detail,
        ..Default::default()
    });
    harness.test(|bench| {
        bench.advance(2)?;
        bench.check("count", 2u8, "after two cycles")?;
        bench.advance(3)?;
        bench.check("count", 7u8, "deliberately wrong")?;
        bench.advance(3)?;
        bench.check("count", 8u8, "after eight cycles")?;
        Ok(())
    })
}

#[test]
fn failing_check_does_not_halt_later_cycles() {
    let report = checks_at_two_five_eight(false);
    assert_eq!(report.status, TestStatus::Failed);
    assert_eq!(report.cycles, 8);
    assert_eq!(
        report
            .checks
            .iter()
            .map(|check| (check.cycle, check.passed))
            .collect::<Vec<_>>(),
        [(2, true), (5, false), (8, true)]
    );
    let failure = report.failures().next().expect("one failure");
    assert_eq!(failure.observed.to_string(), "0101");
    assert_eq!(failure.expected.to_string(), "0111");

    let error = report.into_result().expect_err("failed run");
    let message = error.to_string();
    assert!(message.contains("[cycle 5] FAIL count"));
    assert!(message.contains("deliberately wrong"));
    assert!(!message.contains("after eight cycles"));
}

#[test]
fn low_detail_never_changes_outcomes() {
    let detailed = checks_at_two_five_eight(false);
    let fast = checks_at_two_five_eight(true);
    assert_eq!(detailed.status, fast.status);
    assert_eq!(detailed.checks, fast.checks);
    assert_eq!(detailed.cycles, fast.cycles);
}

#[test]
#[snafu::report]
fn traces_are_persisted_per_run() -> Result<(), Whatever> {
    let directory =
        tempfile::tempdir().whatever_context("Failed to create temporary directory")?;
    let trace_directory = Utf8PathBuf::try_from(directory.path().to_path_buf())
        .whatever_context("Temporary directory is not UTF-8")?;
    let harness = counter(HarnessOptions {
        trace_directory: Some(trace_directory.clone()),
        ..Default::default()
    });

    let report = harness.test(|bench| {
        bench.advance(2)?;
        bench.disable_trace();
        bench.advance(5)?;
        bench.enable_trace();
        bench.advance(1)
    });
    assert_eq!(report.status, TestStatus::Passed);

    let key = report.key.clone().whatever_context("Run has no build key")?;
    let path = report.trace_path.clone().whatever_context("Trace was not persisted")?;
    assert_eq!(path, trace_directory.join(format!("{key}-0.vcd")));

    let vcd = fs::read_to_string(&path).whatever_context("Failed to read trace")?;
    assert!(vcd.starts_with("$timescale"));
    assert!(vcd.contains("$var wire 4 \" count $end"));
    for cycle in ["#0\n", "#1\n", "#2\n", "#8\n"] {
        assert!(vcd.contains(cycle), "missing {cycle:?} in {vcd}");
    }
    assert!(!vcd.contains("#5\n"));
    Ok(())
}

#[test]
#[snafu::report]
fn runs_sharing_a_build_key_keep_their_own_traces() -> Result<(), Whatever> {
    let directory =
        tempfile::tempdir().whatever_context("Failed to create temporary directory")?;
    let trace_directory = Utf8PathBuf::try_from(directory.path().to_path_buf())
        .whatever_context("Temporary directory is not UTF-8")?;
    let harness = counter(HarnessOptions {
        trace_directory: Some(trace_directory),
        ..Default::default()
    });

    let long = harness.test(|bench| bench.advance(10));
    let short = harness.test(|bench| bench.advance(1));
    assert_eq!(long.key, short.key);

    let long_path = long.trace_path.whatever_context("Long trace was not persisted")?;
    let short_path = short
        .trace_path
        .whatever_context("Short trace was not persisted")?;
    assert_ne!(long_path, short_path);

    let long_vcd =
        fs::read_to_string(&long_path).whatever_context("Failed to read long trace")?;
    let short_vcd =
        fs::read_to_string(&short_path).whatever_context("Failed to read short trace")?;
    assert!(long_vcd.contains("#10\n"));
    assert!(!short_vcd.contains("#10\n"));
    assert!(short_vcd.contains("#1\n"));
    Ok(())
}
