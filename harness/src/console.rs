// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Progress output that is not swallowed by the test harness' capture.

use std::{
    fmt, fs,
    io::Write,
    os::fd::FromRawFd,
    sync::{LazyLock, Mutex, PoisonError},
};

use snafu::{ResultExt, Whatever};

/* <Forgive me father for I have sinned> */

// TODO: make cross-platform
static STDERR: LazyLock<Mutex<fs::File>> =
    LazyLock::new(|| Mutex::new(unsafe { fs::File::from_raw_fd(2) }));

/* </Forgive me father for I have sinned> */

#[doc(hidden)]
pub fn write_nocapture(arguments: fmt::Arguments<'_>) -> Result<(), Whatever> {
    let mut stderr = STDERR.lock().unwrap_or_else(PoisonError::into_inner);
    stderr
        .write_fmt(arguments)
        .and_then(|_| stderr.write_all(b"\n"))
        .whatever_context("Failed to write to non-captured stderr")
}

/// Like [`eprintln!`], but writes to the real stderr even under `cargo test`.
#[macro_export]
macro_rules! eprintln_nocapture {
    ($($contents:tt)*) => {
        $crate::console::write_nocapture(format_args!($($contents)*))
    };
}
