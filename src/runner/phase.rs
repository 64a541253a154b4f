use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::registry::unit::{TestUnit, UnitSpec};
use crate::runner::context::UnitContext;
use crate::runner::orchestrator::panic_message;
use crate::runner::result::UnitOutcome;

/// A coarse unit that runs several chunk units back to back on the live
/// surface, without resets in between.
///
/// Chunk checks are recorded under the phase as `"<chunk>: <check>"`. The
/// phase fails if any chunk fails; every chunk still runs, including after
/// a chunk panics.
pub struct PhaseUnit {
    spec: UnitSpec,
    chunks: Vec<Box<dyn TestUnit>>,
}

impl PhaseUnit {
    /// The phase needs every fixture any of its chunks needs.
    pub fn new(mut spec: UnitSpec, chunks: Vec<Box<dyn TestUnit>>) -> Self {
        for chunk in &chunks {
            spec.requires = spec.requires.merge(chunk.spec().requires);
        }
        Self { spec, chunks }
    }

    pub fn chunks(&self) -> impl Iterator<Item = &dyn TestUnit> {
        self.chunks.iter().map(|c| c.as_ref())
    }
}

impl TestUnit for PhaseUnit {
    fn spec(&self) -> &UnitSpec {
        &self.spec
    }

    fn run(&self, ctx: &mut UnitContext<'_>) -> UnitOutcome {
        let mut failures = Vec::new();

        for chunk in &self.chunks {
            let mut chunk_ctx =
                UnitContext::new(chunk.id(), &mut *ctx.fixtures, &mut *ctx.surface);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| chunk.run(&mut chunk_ctx)))
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    warn!(
                        phase = %self.spec.id,
                        chunk = %chunk.id(),
                        panic = %message,
                        "chunk panicked"
                    );
                    UnitOutcome::Failed(format!("panicked: {message}"))
                });
            let checks = chunk_ctx.into_checks();

            for check in checks {
                let name = format!("{}: {}", chunk.name(), check.name);
                if check.is_failed() {
                    ctx.fail(&name, check.duration, check.error.unwrap_or_default());
                } else {
                    ctx.pass(&name, check.duration);
                }
            }
            if let UnitOutcome::Failed(reason) = outcome {
                failures.push(format!("{}: {reason}", chunk.name()));
            }
        }

        if failures.is_empty() {
            UnitOutcome::Passed
        } else {
            UnitOutcome::Failed(failures.join("; "))
        }
    }
}
