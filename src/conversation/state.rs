//! Lead qualification state machine.

use serde::{Deserialize, Serialize};

/// Where the lead qualification flow of one conversation stands.
///
/// Starts at `InProgress`. The dialogue's status signal moves it to
/// `Success` or `Aborted`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadQualificationState {
    #[default]
    InProgress,
    Success,
    Aborted,
}

/// Effect of applying a dialogue signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    /// Entered `Success`; lead extraction must run now, and only now.
    Completed,
    /// Entered `Aborted`; qualification is closed for the conversation.
    Aborted,
}

impl LeadQualificationState {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: LeadQualificationState) -> bool {
        use LeadQualificationState::*;
        matches!((self, target), (InProgress, Success) | (InProgress, Aborted))
    }

    /// Whether the flow is finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Aborted)
    }

    /// Whether routing may still hand a turn to the lead dialogue.
    pub fn accepts_qualification(&self) -> bool {
        !self.is_terminal()
    }

    /// Apply the status the lead dialogue reported for a turn.
    pub fn apply(&mut self, signal: LeadQualificationState) -> Transition {
        if !self.can_transition_to(signal) {
            if self.is_terminal() && signal != *self {
                tracing::debug!(state = %self, signal = %signal, "Ignoring signal in terminal state");
            }
            return Transition::Unchanged;
        }
        *self = signal;
        match signal {
            Self::Success => Transition::Completed,
            Self::Aborted => Transition::Aborted,
            Self::InProgress => Transition::Unchanged,
        }
    }
}

impl std::fmt::Display for LeadQualificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LeadQualificationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in_progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "aborted" => Ok(Self::Aborted),
            other => Err(format!("unknown lead status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LeadQualificationState::*;

    #[test]
    fn valid_transitions() {
        assert!(InProgress.can_transition_to(Success));
        assert!(InProgress.can_transition_to(Aborted));
    }

    #[test]
    fn invalid_transitions() {
        assert!(!InProgress.can_transition_to(InProgress));
        assert!(!Success.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Success));
        assert!(!Success.can_transition_to(InProgress));
        assert!(!Aborted.can_transition_to(InProgress));
    }

    #[test]
    fn is_terminal() {
        assert!(Success.is_terminal());
        assert!(Aborted.is_terminal());
        assert!(!InProgress.is_terminal());
    }

    #[test]
    fn success_is_reported_exactly_once() {
        let mut state = InProgress;
        assert_eq!(state.apply(InProgress), Transition::Unchanged);
        assert_eq!(state.apply(Success), Transition::Completed);
        assert_eq!(state.apply(Success), Transition::Unchanged);
        assert_eq!(state, Success);
    }

    #[test]
    fn terminal_states_absorb_every_signal() {
        for terminal in [Success, Aborted] {
            let mut state = terminal;
            for signal in [InProgress, Success, Aborted, InProgress, Aborted] {
                assert_eq!(state.apply(signal), Transition::Unchanged);
                assert_eq!(state, terminal);
            }
        }
    }

    #[test]
    fn display_matches_serde() {
        for state in [InProgress, Success, Aborted] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(format!("\"{state}\""), json);
            assert_eq!(state.to_string().parse::<LeadQualificationState>().unwrap(), state);
        }
    }
}
