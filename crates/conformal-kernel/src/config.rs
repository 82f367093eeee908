//! Process-wide tunables.
//!
//! Defaults follow the engine's documented thresholds; each is settable at
//! runtime and read with relaxed ordering (the values gate effort bounds,
//! not correctness).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static RECURSION_LIMIT: AtomicUsize = AtomicUsize::new(4);
static FSPEC_ITERATIONS: AtomicUsize = AtomicUsize::new(21);
static COLL_CHECK_LIMIT: AtomicUsize = AtomicUsize::new(101);
static COLL_ERROR_LIMIT: AtomicUsize = AtomicUsize::new(20);
static INSTRUMENT_ENABLED: AtomicBool = AtomicBool::new(true);

/// Max revisits of a branching-op id on a recursive generation path.
pub fn recursion_limit() -> usize {
    RECURSION_LIMIT.load(Ordering::Relaxed)
}

pub fn set_recursion_limit(n: usize) {
    RECURSION_LIMIT.store(n, Ordering::Relaxed);
}

/// Number of generative trials a function-contract conform runs.
pub fn fspec_iterations() -> usize {
    FSPEC_ITERATIONS.load(Ordering::Relaxed)
}

pub fn set_fspec_iterations(n: usize) {
    FSPEC_ITERATIONS.store(n, Ordering::Relaxed);
}

/// Max elements a sampled collection validation reads.
pub fn coll_check_limit() -> usize {
    COLL_CHECK_LIMIT.load(Ordering::Relaxed)
}

pub fn set_coll_check_limit(n: usize) {
    COLL_CHECK_LIMIT.store(n, Ordering::Relaxed);
}

/// Max element problems a collection explain reports.
pub fn coll_error_limit() -> usize {
    COLL_ERROR_LIMIT.load(Ordering::Relaxed)
}

pub fn set_coll_error_limit(n: usize) {
    COLL_ERROR_LIMIT.store(n, Ordering::Relaxed);
}

/// Dynamic switch for the instrumentation wrappers.
pub fn instrument_enabled() -> bool {
    INSTRUMENT_ENABLED.load(Ordering::Relaxed)
}

pub fn set_instrument_enabled(on: bool) {
    INSTRUMENT_ENABLED.store(on, Ordering::Relaxed);
}
