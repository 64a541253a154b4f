/// The shared execution surface units act through (a browser page, an HTTP
/// session, a network shaper).
///
/// One surface is reused by every unit in a run. Units are not trusted to
/// undo their own side effects, so the orchestrator calls [`reset`] after each
/// unit regardless of how it finished.
///
/// [`reset`]: ExecutionSurface::reset
pub trait ExecutionSurface {
    /// Human-readable name used in log lines.
    fn name(&self) -> &str {
        "surface"
    }

    /// Restore the surface to a known-good state.
    ///
    /// # Errors
    ///
    /// Returns [`SurfaceError`] if the surface could not be restored. The
    /// orchestrator logs this as a warning and carries on.
    fn reset(&mut self) -> Result<(), SurfaceError>;
}

/// A surface with no state to restore.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSurface;

impl ExecutionSurface for DetachedSurface {
    fn name(&self) -> &str {
        "detached"
    }

    fn reset(&mut self) -> Result<(), SurfaceError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("surface reset failed: {0}")]
pub struct SurfaceError(pub String);
