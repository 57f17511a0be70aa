//! Last-resort cleanup when a thread panics.
//!
//! The hook runs every registered step even if an earlier one panics, then
//! ends the process with exit code 1. Steps run on a separate thread: a
//! panic raised directly inside a panic hook aborts the process before any
//! `catch_unwind` can see it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

pub type CleanupStep = Box<dyn Fn() + Send + Sync>;

pub const FAULT_EXIT_CODE: i32 = 1;

#[derive(Default)]
pub struct FaultCleanup {
    steps: Vec<(&'static str, CleanupStep)>,
}

impl FaultCleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step<F>(mut self, name: &'static str, step: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.steps.push((name, Box::new(step)));
        self
    }

    /// Runs every step in order. Returns the names of the steps that panicked.
    pub fn run(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        for (name, step) in &self.steps {
            if panic::catch_unwind(AssertUnwindSafe(|| step())).is_err() {
                failed.push(*name);
            }
        }
        failed
    }

    /// Replaces the process panic hook.
    pub fn install(self) {
        let cleanup = Arc::new(self);
        let in_fault = Arc::new(AtomicBool::new(false));
        let default_hook = panic::take_hook();

        panic::set_hook(Box::new(move |info| {
            if in_fault.swap(true, Ordering::SeqCst) {
                error!("Panic during fault cleanup: {}", info);
                return;
            }

            default_hook(info);
            error!("💥 Unrecoverable fault: {}", info);

            let steps = cleanup.clone();
            match std::thread::spawn(move || steps.run()).join() {
                Ok(failed) if failed.is_empty() => error!("Fault cleanup finished"),
                Ok(failed) => error!("Fault cleanup steps failed: {}", failed.join(", ")),
                Err(_) => error!("Fault cleanup thread died"),
            }
            std::process::exit(FAULT_EXIT_CODE);
        }));
    }
}
