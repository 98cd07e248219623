//! Pipeline configuration.
//!
//! All tunables of the optimization pipeline live in [`OptimizationConfig`], an immutable
//! value handed to [`crate::Pipeline::new`] and passed by reference to every pass. Nothing in
//! this crate reads process-wide state, so independent pipelines can run concurrently with
//! different settings.

/// Immutable configuration consumed at pipeline entry.
///
/// # Examples
///
/// ```rust
/// use jitmir::OptimizationConfig;
///
/// let config = OptimizationConfig::default().with_range_assertions(true);
/// assert!(config.insert_range_assertions);
/// assert!(!config.is_asmjs_like_mode);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizationConfig {
    /// Insert an `AssertRange` instruction after every definition that received a range,
    /// so that execution re-checks what the analysis inferred.
    pub insert_range_assertions: bool,

    /// Treat resume points as unobservable when deciding truncation.
    ///
    /// Code compiled in this mode never resumes in a lower tier, so a truncated value
    /// captured by a resume point cannot leak.
    pub is_asmjs_like_mode: bool,
}

impl OptimizationConfig {
    /// Returns a copy with `insert_range_assertions` set to `enabled`.
    #[must_use]
    pub const fn with_range_assertions(mut self, enabled: bool) -> Self {
        self.insert_range_assertions = enabled;
        self
    }

    /// Returns a copy with `is_asmjs_like_mode` set to `enabled`.
    #[must_use]
    pub const fn with_asmjs_like_mode(mut self, enabled: bool) -> Self {
        self.is_asmjs_like_mode = enabled;
        self
    }
}
