//! Simulation scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// FV-001: Select one operator and follow its vehicle
    FollowOperator,

    /// FV-002: Fit the camera around an organization's fleet
    GroupFit,

    /// FV-003: Gesture and external overrides suppress the camera
    ManualOverride,

    /// FV-004: Vehicles stop reporting, garbage payloads arrive
    FeedDropout,

    /// FV-005: Every record uses a random field-naming convention
    AliasChaos,

    /// FV-006: The map widget fails every few calls
    WidgetFaults,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::FollowOperator,
            ScenarioId::GroupFit,
            ScenarioId::ManualOverride,
            ScenarioId::FeedDropout,
            ScenarioId::AliasChaos,
            ScenarioId::WidgetFaults,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::FollowOperator => "follow_operator",
            ScenarioId::GroupFit => "group_fit",
            ScenarioId::ManualOverride => "manual_override",
            ScenarioId::FeedDropout => "feed_dropout",
            ScenarioId::AliasChaos => "alias_chaos",
            ScenarioId::WidgetFaults => "widget_faults",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::FollowOperator => "Lock onto operator 1 and pan after it, never another vehicle",
            ScenarioId::GroupFit => "Fit bounds around one organization, center on a lone vehicle",
            ScenarioId::ManualOverride => "Drag suppresses follow until selection change; timed override expires",
            ScenarioId::FeedDropout => "Silent vehicles are pruned and disposed; bad payloads are skipped",
            ScenarioId::AliasChaos => "Randomly aliased records still resolve to one id per vehicle",
            ScenarioId::WidgetFaults => "Every 7th widget call fails; animation and tracking carry on",
        }
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
        match s.to_lowercase().as_str() {
            "follow_operator" | "followoperator" | "fv-001" => Ok(ScenarioId::FollowOperator),
            "group_fit" | "groupfit" | "fv-002" => Ok(ScenarioId::GroupFit),
            "manual_override" | "manualoverride" | "fv-003" => Ok(ScenarioId::ManualOverride),
            "feed_dropout" | "feeddropout" | "fv-004" => Ok(ScenarioId::FeedDropout),
            "alias_chaos" | "aliaschaos" | "fv-005" => Ok(ScenarioId::AliasChaos),
            "widget_faults" | "widgetfaults" | "fv-006" => Ok(ScenarioId::WidgetFaults),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("FV-004".parse::<ScenarioId>(), Ok(ScenarioId::FeedDropout));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
