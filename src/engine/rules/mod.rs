//! Detection rule library.
//!
//! All rules are stateless across windows: each `analyze` call only examines
//! the provided window's top flows and window-level unique sets. Rules never
//! panic - each one guards its own body and reports an internal error as a
//! non-triggered result.

pub mod beaconing;
pub mod brute_force;
pub mod dns_tunneling;
pub mod port_scan;
pub mod syn_flood;

use crate::engine::models::{RuleResult, Severity};
use crate::state::AggregatedWindow;

pub use beaconing::BeaconingRule;
pub use brute_force::BruteForceRule;
pub use dns_tunneling::DnsTunnelingRule;
pub use port_scan::PortScanRule;
pub use syn_flood::SynFloodRule;

/// Contract every detection rule satisfies.
///
/// Name, default severity, and enabled state are advertised declaratively so
/// the engine can iterate rules without knowing their concrete types.
pub trait Rule: Send {
    /// Unique snake_case identifier used in `Alert::rule_name`.
    fn name(&self) -> &'static str;

    /// Default severity; a rule may override per-result through
    /// `evidence["severity"]`.
    fn severity(&self) -> Severity;

    fn enabled(&self) -> bool {
        true
    }

    /// Analyze one sealed window. Must complete quickly (the engine warns
    /// past 50 ms) and must not panic.
    fn analyze(&self, window: &AggregatedWindow) -> RuleResult;
}

/// The built-in rule set, in evaluation order.
pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(BeaconingRule::default()),
        Box::new(BruteForceRule::default()),
        Box::new(DnsTunnelingRule::default()),
        Box::new(PortScanRule::default()),
        Box::new(SynFloodRule::default()),
    ]
}
