//! Strategy selection and the run state machine.

use ragloom_core::query::Query;
use ragloom_core::retrieval::Target;
use serde::{Deserialize, Serialize};

/// How a query is answered. A pure function of the query's target and options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Web, one retrieval, one synthesis.
    SimpleWeb,
    /// Web, decomposed into sub-queries up front.
    DirectDecomposition,
    /// Web, exploratory answer first, then decomposition informed by it.
    InformedDecomposition,
    /// Collection, one retrieval, one synthesis.
    StandardRag,
    CollectionDecomposition,
    InformedCollectionDecomposition,
}

impl Strategy {
    pub fn select(query: &Query) -> Self {
        let options = query.options();
        match (query.target(), options.decompose, options.informed) {
            (Target::Web, false, _) => Self::SimpleWeb,
            (Target::Web, true, false) => Self::DirectDecomposition,
            (Target::Web, true, true) => Self::InformedDecomposition,
            (Target::Collection(_), false, _) => Self::StandardRag,
            (Target::Collection(_), true, false) => Self::CollectionDecomposition,
            (Target::Collection(_), true, true) => Self::InformedCollectionDecomposition,
        }
    }

    pub fn decomposes(self) -> bool {
        !matches!(self, Self::SimpleWeb | Self::StandardRag)
    }

    pub fn is_informed(self) -> bool {
        matches!(
            self,
            Self::InformedDecomposition | Self::InformedCollectionDecomposition
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SimpleWeb => "simple_web",
            Self::DirectDecomposition => "direct_decomposition",
            Self::InformedDecomposition => "informed_decomposition",
            Self::StandardRag => "standard_rag",
            Self::CollectionDecomposition => "collection_decomposition",
            Self::InformedCollectionDecomposition => "informed_collection_decomposition",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of one orchestration run.
///
/// ```text
/// START → STRATEGY_SELECTED → {DECOMPOSING | SKIP_DECOMPOSE} → RETRIEVING
///       → CONTEXT_ASSEMBLED → SYNTHESIZING → DONE
/// ```
///
/// `FAILED` is reachable from every non-terminal state. A decomposition that
/// degrades moves `DECOMPOSING → SKIP_DECOMPOSE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Start,
    StrategySelected,
    Decomposing,
    SkipDecompose,
    Retrieving,
    ContextAssembled,
    Synthesizing,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Start, StrategySelected)
                | (StrategySelected, Decomposing)
                | (StrategySelected, SkipDecompose)
                | (Decomposing, SkipDecompose)
                | (Decomposing, Retrieving)
                | (SkipDecompose, Retrieving)
                | (Retrieving, ContextAssembled)
                | (ContextAssembled, Synthesizing)
                | (Synthesizing, Done)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::StrategySelected => "STRATEGY_SELECTED",
            Self::Decomposing => "DECOMPOSING",
            Self::SkipDecompose => "SKIP_DECOMPOSE",
            Self::Retrieving => "RETRIEVING",
            Self::ContextAssembled => "CONTEXT_ASSEMBLED",
            Self::Synthesizing => "SYNTHESIZING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Every state a run has visited, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTrace {
    states: Vec<RunState>,
}

impl Default for RunTrace {
    fn default() -> Self {
        Self {
            states: vec![RunState::Start],
        }
    }
}

impl RunTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Start)
    }

    pub fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.current().can_transition_to(next),
            "invalid transition {} -> {}",
            self.current(),
            next
        );
        self.states.push(next);
    }

    pub fn states(&self) -> &[RunState] {
        &self.states
    }

    pub fn into_states(self) -> Vec<RunState> {
        self.states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloom_core::query::QueryOptions;

    fn strategy(target: Target, options: QueryOptions) -> Strategy {
        Strategy::select(&Query::new("q", target, options).unwrap())
    }

    #[test]
    fn selection_covers_every_combination() {
        let docs = || Target::collection("docs");
        assert_eq!(strategy(Target::Web, QueryOptions::default()), Strategy::SimpleWeb);
        assert_eq!(strategy(Target::Web, QueryOptions::decomposed()), Strategy::DirectDecomposition);
        assert_eq!(strategy(Target::Web, QueryOptions::informed()), Strategy::InformedDecomposition);
        assert_eq!(strategy(docs(), QueryOptions::default()), Strategy::StandardRag);
        assert_eq!(strategy(docs(), QueryOptions::decomposed()), Strategy::CollectionDecomposition);
        assert_eq!(
            strategy(docs(), QueryOptions::informed()),
            Strategy::InformedCollectionDecomposition
        );
    }

    #[test]
    fn informed_without_decompose_is_plain() {
        let options = QueryOptions {
            informed: true,
            ..QueryOptions::default()
        };
        assert_eq!(strategy(Target::Web, options), Strategy::SimpleWeb);
        assert!(!Strategy::SimpleWeb.decomposes());
        assert!(Strategy::InformedDecomposition.is_informed());
    }

    #[test]
    fn strategy_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(Strategy::StandardRag).unwrap(),
            "standard_rag"
        );
        assert_eq!(Strategy::DirectDecomposition.to_string(), "direct_decomposition");
    }

    #[test]
    fn happy_path_transitions_are_valid() {
        let mut trace = RunTrace::new();
        for state in [
            RunState::StrategySelected,
            RunState::Decomposing,
            RunState::Retrieving,
            RunState::ContextAssembled,
            RunState::Synthesizing,
            RunState::Done,
        ] {
            trace.advance(state);
        }
        assert_eq!(trace.current(), RunState::Done);
        assert_eq!(trace.states().len(), 7);
    }

    #[test]
    fn failed_is_reachable_from_non_terminal_only() {
        assert!(RunState::Retrieving.can_transition_to(RunState::Failed));
        assert!(RunState::Start.can_transition_to(RunState::Failed));
        assert!(!RunState::Done.can_transition_to(RunState::Failed));
        assert!(!RunState::Retrieving.can_transition_to(RunState::Synthesizing));
    }

    #[test]
    fn states_serialize_upper_case() {
        assert_eq!(
            serde_json::to_value(RunState::ContextAssembled).unwrap(),
            "CONTEXT_ASSEMBLED"
        );
        assert_eq!(RunState::SkipDecompose.to_string(), "SKIP_DECOMPOSE");
    }
}
