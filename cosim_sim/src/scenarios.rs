//! Named co-simulation scenarios.

use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Two participants, consensus iteration, checked against the oracle
    Nonlinear,

    /// Same system, iterate-if-needed instead of forced iteration
    OnUpdate,

    /// Three participants, AND over two peers, averaged input
    ThreeWay,

    /// Oscillating linear system that never settles
    IterationCap,

    /// One-instant lag exchange without a convergence loop
    Loose,

    /// Bidirectional endpoint exchange with coalesced delivery
    Messages,

    /// Delay filter reconfigured twice during the run
    FilterReconfig,

    /// Seeded random drop and random delay
    RandomFilters,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Nonlinear,
            ScenarioId::OnUpdate,
            ScenarioId::ThreeWay,
            ScenarioId::IterationCap,
            ScenarioId::Loose,
            ScenarioId::Messages,
            ScenarioId::FilterReconfig,
            ScenarioId::RandomFilters,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Nonlinear => "nonlinear",
            ScenarioId::OnUpdate => "on_update",
            ScenarioId::ThreeWay => "three_way",
            ScenarioId::IterationCap => "iteration_cap",
            ScenarioId::Loose => "loose",
            ScenarioId::Messages => "messages",
            ScenarioId::FilterReconfig => "filter_reconfig",
            ScenarioId::RandomFilters => "random_filters",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Nonlinear => "Quadratic + ellipse participants reach the monolithic fixed point",
            ScenarioId::OnUpdate => "Same system driven by iterate-if-needed requests",
            ScenarioId::ThreeWay => "Three participants; every flag must be set before anyone advances",
            ScenarioId::IterationCap => "Non-contracting system; the cap forces progress every instant",
            ScenarioId::Loose => "Observed peer values lag exactly one instant",
            ScenarioId::Messages => "Two endpoints exchanging messages, several per grant",
            ScenarioId::FilterReconfig => "Delay filter 0.5s -> 1.5s -> 0.75s, in-flight messages unaffected",
            ScenarioId::RandomFilters => "Random drop and delay replay identically for one seed",
        }
    }

    /// Returns true if the scenario runs the fixed-point protocol.
    pub fn is_iterative(&self) -> bool {
        matches!(
            self,
            ScenarioId::Nonlinear | ScenarioId::OnUpdate | ScenarioId::ThreeWay | ScenarioId::IterationCap
        )
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "nonlinear" => Ok(ScenarioId::Nonlinear),
            "on_update" | "onupdate" => Ok(ScenarioId::OnUpdate),
            "three_way" | "threeway" => Ok(ScenarioId::ThreeWay),
            "iteration_cap" | "cap" => Ok(ScenarioId::IterationCap),
            "loose" => Ok(ScenarioId::Loose),
            "messages" => Ok(ScenarioId::Messages),
            "filter_reconfig" | "filters" => Ok(ScenarioId::FilterReconfig),
            "random_filters" => Ok(ScenarioId::RandomFilters),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
