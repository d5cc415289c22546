// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use strobe_harness::{
    BuildOrchestrator, GenericParameterSet, Harness, HarnessError,
    HarnessOptions, Logic, ModelLibrary, ModuleDefinition, Pins,
    PortDescriptor, PortDirection, PortWidth, Suite, TestStatus, UsageError,
};

/// A pad that the model drives when `oe` is high and samples otherwise.
fn gpio_library() -> ModelLibrary {
    ModelLibrary::new().model(
        "GPIO",
        "rtl/gpio.sv",
        vec![
            PortDescriptor::new("oe", PortDirection::Input, PortWidth::Fixed(1)),
            PortDescriptor::new("data", PortDirection::Input, PortWidth::Fixed(1)),
            PortDescriptor::new("pad", PortDirection::Inout, PortWidth::Fixed(1)),
            PortDescriptor::new("sampled", PortDirection::Output, PortWidth::Fixed(1)),
            PortDescriptor::new("bus", PortDirection::Output, PortWidth::Fixed(4)),
        ],
        |_: &GenericParameterSet| {
            Ok(|pins: &mut Pins| {
                if pins.bit("oe")? == Logic::One {
                    let data = pins.bit("data")?;
                    pins.set("pad", data)?;
                    pins.fill("bus", data)?;
                } else {
                    pins.fill("bus", Logic::HighImpedance)?;
                }
                let pad = pins.bit("pad")?;
                pins.set("sampled", pad)
            })
        },
    )
}

fn gpio() -> Harness<ModelLibrary> {
    let _ = env_logger::builder().is_test(true).try_init();
    let definition = ModuleDefinition::builder("GPIO", "rtl/gpio.sv")
        .input("oe", 1)
        .input("data", 1)
        .inout("pad", 1)
        .output("sampled", 1)
        .output("bus", 4)
        .build()
        .expect("valid definition");
    Harness::new(
        definition,
        Arc::new(BuildOrchestrator::new(gpio_library(), HarnessOptions::default())),
    )
}

#[test]
fn inout_pad_is_driven_when_oriented_as_input() {
    let report = gpio().orient("pad", PortDirection::Input).test(|bench| {
        bench.write("oe", 0)?;
        bench.write("pad", 1)?;
        bench.cycle()?;
        bench.check("sampled", 1, "pad is sampled")?;
        bench.check("bus", "ZZZZ", "bus released")?;
        Ok(())
    });
    assert_eq!(report.status, TestStatus::Passed, "{report}");
}

#[test]
fn inout_pad_is_read_only_when_oriented_as_output() {
    let harness = gpio().orient("pad", PortDirection::Output);

    let report = harness.test(|bench| {
        bench.write("oe", 1)?;
        bench.write("data", 1)?;
        bench.cycle()?;
        bench.check("pad", 1, "model drives the pad")?;
        bench.check("bus", "1111", "bus follows data")?;
        Ok(())
    });
    assert_eq!(report.status, TestStatus::Passed, "{report}");

    let report = harness.test(|bench| bench.write("pad", 0));
    assert!(matches!(
        report.error,
        Some(HarnessError::Usage {
            source: UsageError::WriteToOutput { .. }
        })
    ));
}

#[test]
fn only_bidirectional_ports_can_be_narrowed() {
    let report = gpio()
        .orient("sampled", PortDirection::Input)
        .test(|_| Ok(()));
    assert_eq!(report.status, TestStatus::Errored);
    assert!(matches!(
        report.error,
        Some(HarnessError::Usage {
            source: UsageError::InvalidOrientation {
                declared: PortDirection::Output,
                requested: PortDirection::Input,
                ..
            }
        })
    ));

    let report = gpio().orient("reset", PortDirection::Input).test(|_| Ok(()));
    assert!(matches!(
        report.error,
        Some(HarnessError::Usage {
            source: UsageError::UnknownPort { .. }
        })
    ));
}

fn suite() -> Suite {
    let mut suite = Suite::new();
    suite
        .threads(2)
        .register("gpio_input", || {
            gpio().orient("pad", PortDirection::Input).test(|bench| {
                bench.write("pad", 1)?;
                bench.cycle()?;
                bench.check("sampled", 1, "pad is sampled")?;
                Ok(())
            })
        })
        .expect("fresh name")
        .register("gpio_released_bus", || {
            gpio().test(|bench| {
                bench.write("oe", 0)?;
                bench.cycle()?;
                bench.check("bus", "0000", "deliberately wrong")?;
                Ok(())
            })
        })
        .expect("fresh name")
        .register("gpio_parameter_sweep", || {
            (0..3)
                .map(|_| gpio().test(|bench| bench.cycle()))
                .collect::<Vec<_>>()
        })
        .expect("fresh name")
        .register("gpio_panics", || -> strobe_harness::TestReport {
            panic!("sequence exploded")
        })
        .expect("fresh name");
    suite
}

#[test]
fn suite_reports_every_test_in_registration_order() {
    let summary = suite().run();

    assert_eq!(
        summary
            .outcomes
            .iter()
            .map(|outcome| (outcome.name.as_str(), outcome.status))
            .collect::<Vec<_>>(),
        [
            ("gpio_input", TestStatus::Passed),
            ("gpio_released_bus", TestStatus::Failed),
            ("gpio_parameter_sweep", TestStatus::Passed),
            ("gpio_panics", TestStatus::Errored),
        ]
    );
    assert_eq!(summary.outcomes[2].reports.len(), 3);
    assert_eq!(
        summary.outcomes[3].panic.as_deref(),
        Some("sequence exploded")
    );
    assert_eq!((summary.passed(), summary.failed(), summary.errored()), (2, 1, 1));
    assert!(!summary.success());
    assert_eq!(summary.exit_code(), 1);
}

#[test]
fn suite_filter_selects_by_substring() {
    let mut suite = suite();
    let summary = suite.filter("input").run();
    assert_eq!(summary.outcomes.len(), 1);
    assert!(summary.success());
    assert_eq!(summary.exit_code(), 0);
}

#[test]
fn suite_rejects_duplicate_names() {
    let mut suite = suite();
    let result = suite.register("gpio_input", || gpio().test(|_| Ok(())));
    assert!(matches!(
        result,
        Err(UsageError::DuplicateTest { name }) if name == "gpio_input"
    ));
}

#[test]
fn test_without_reports_is_errored() {
    let mut suite = Suite::new();
    suite
        .register("gpio_empty_sweep", Vec::<strobe_harness::TestReport>::new)
        .expect("fresh name")
        .register("gpio_idle", || gpio().test(|bench| bench.cycle()))
        .expect("fresh name");
    let summary = suite.run();

    assert_eq!(summary.outcomes[0].status, TestStatus::Errored);
    assert!(summary.outcomes[0].reports.is_empty());
    assert!(summary.outcomes[0].panic.is_none());
    assert_eq!(summary.outcomes[1].status, TestStatus::Passed);
    assert!(!summary.success());
    assert_eq!(summary.exit_code(), 1);
}
