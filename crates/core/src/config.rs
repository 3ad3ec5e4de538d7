// Engine configuration
//
// Decision: Strict view ordering is opt-in. By default a transition is
// accepted for any (view, state) pair that has a route, whatever view the
// instance currently awaits.

/// Engine behaviour knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Reject transitions whose view differs from the instance's next view.
    pub strict_view_order: bool,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// - `STEPFLOW_STRICT_VIEW_ORDER`: "true" or "1" to enable strict view order
    pub fn from_env() -> Self {
        Self {
            strict_view_order: std::env::var("STEPFLOW_STRICT_VIEW_ORDER")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }

    pub fn strict() -> Self {
        Self {
            strict_view_order: true,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
