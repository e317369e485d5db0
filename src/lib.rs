//! gocrane lowers whole-program Go SSA into Cranelift IR and native object
//! code, one object per package.
//!
//! The input is an [`ssa::Program`] built in memory (see [`ssa::builder`]) or
//! read from JSON. [`compile_package`] translates a single package;
//! [`compile_program`] translates every package, spreading them over
//! `config.jobs` worker threads.

pub mod span;
pub mod diagnostics;
pub mod config;
pub mod types;
pub mod ssa;
pub mod codegen;

use crossbeam_channel::unbounded;
use tracing::{debug, info};

pub use codegen::{DefinedFunction, PackageObject};
pub use config::Config;
pub use diagnostics::CompileError;

/// Translate package `pkg` of `program` into an object.
pub fn compile_package(program: &ssa::Program, pkg: ssa::PkgId, config: &Config) -> Result<PackageObject, CompileError> {
    let mut unit = codegen::Unit::new(program, pkg, config)?;
    unit.translate_package()?;
    unit.finish()
}

/// Translate every package of `program`. Objects come back in package order;
/// the first failing package (in package order) aborts the whole program.
pub fn compile_program(program: &ssa::Program, config: &Config) -> Result<Vec<PackageObject>, CompileError> {
    config.validate(None)?;
    let count = program.packages.len();
    let workers = config.jobs.min(count).max(1);
    info!(packages = count, workers, "compiling program");

    if workers == 1 {
        return (0..count).map(|i| compile_package(program, ssa::PkgId(i as u32), config)).collect();
    }

    let (job_tx, job_rx) = unbounded::<usize>();
    let (done_tx, done_rx) = unbounded::<(usize, Result<PackageObject, CompileError>)>();
    for i in 0..count {
        // The receiver is alive in this scope, so the send cannot fail.
        let _ = job_tx.send(i);
    }
    drop(job_tx);

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            scope.spawn(move || {
                for i in job_rx.iter() {
                    debug!(worker, package = %program.packages[i].path, "worker picked package");
                    let result = compile_package(program, ssa::PkgId(i as u32), config);
                    if done_tx.send((i, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(done_tx);

    let mut slots: Vec<Option<Result<PackageObject, CompileError>>> = (0..count).map(|_| None).collect();
    for (i, result) in done_rx.iter() {
        slots[i] = Some(result);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.unwrap_or_else(|| {
                Err(CompileError::internal(
                    format!("package {} produced no result", program.packages[i].path),
                    "compile_program",
                ))
            })
        })
        .collect()
}

/// Parse a JSON program and translate every package.
pub fn compile_json(source: &str, config: &Config) -> Result<Vec<PackageObject>, CompileError> {
    let program = ssa::Program::from_json(source)?;
    compile_program(&program, config)
}
