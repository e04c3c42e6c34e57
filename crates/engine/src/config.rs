//! Engine tuning knobs.

/// Limits applied by the read-side views.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Instances shown when the caller does not ask for a number.
    pub default_view_limit: usize,
    /// Upper bound on requested instances.
    pub max_view_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_view_limit: 10,
            max_view_limit: 100,
        }
    }
}

impl EngineConfig {
    /// Resolve a requested instance limit to `1..=max_view_limit`.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_view_limit)
            .clamp(1, self.max_view_limit.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_clamped() {
        let config = EngineConfig::default();
        assert_eq!(config.clamp_limit(None), 10);
        assert_eq!(config.clamp_limit(Some(0)), 1);
        assert_eq!(config.clamp_limit(Some(5)), 5);
        assert_eq!(config.clamp_limit(Some(1_000)), 100);
    }
}
