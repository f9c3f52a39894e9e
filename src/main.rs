#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
use std::process::exit;

use barqs_lib::opts::setup;
use barqs_lib::run::run;
use log::error;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(not(tarpaulin_include))]
fn main() {
    let opts = setup();

    if let Err(err) = run(opts) {
        error!("{:#}", err);
        exit(1);
    }
}
