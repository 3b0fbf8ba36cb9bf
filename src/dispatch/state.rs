//! Lifecycle of one (endpoint, call) unit.
//!
//! ```text
//! Pending(n) -> Attempting(n) -> Succeeded(n)
//!                             -> Pending(n+1)          (attempts remain)
//!                             -> PermanentlyFailed(n)  (n == max_attempts)
//! ```

/// State of one unit. Attempt numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Waiting to start attempt `attempt` (for a retry: after backoff)
    Pending { attempt: u32 },
    /// Holding a concurrency slot, executor running
    Attempting { attempt: u32 },
    Succeeded { attempts: u32 },
    PermanentlyFailed { attempts: u32 },
}

impl UnitState {
    pub fn initial() -> Self {
        Self::Pending { attempt: 1 }
    }

    /// Pending(n) -> Attempting(n). Any other state is returned unchanged.
    pub fn begin_attempt(self) -> Self {
        match self {
            Self::Pending { attempt } => Self::Attempting { attempt },
            other => other,
        }
    }

    /// Attempting(n) -> Succeeded | Pending(n+1) | PermanentlyFailed.
    /// Any other state is returned unchanged.
    pub fn finish_attempt(self, success: bool, max_attempts: u32) -> Self {
        match self {
            Self::Attempting { attempt } if success => Self::Succeeded { attempts: attempt },
            Self::Attempting { attempt } if attempt >= max_attempts => {
                Self::PermanentlyFailed { attempts: attempt }
            }
            Self::Attempting { attempt } => Self::Pending {
                attempt: attempt + 1,
            },
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::PermanentlyFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_on_first_attempt() {
        let state = UnitState::initial().begin_attempt().finish_attempt(true, 3);
        assert_eq!(state, UnitState::Succeeded { attempts: 1 });
        assert!(state.is_terminal());
    }

    #[test]
    fn test_retry_then_exhaust() {
        let mut state = UnitState::initial();
        for expected_next in [2, 3] {
            state = state.begin_attempt().finish_attempt(false, 3);
            assert_eq!(
                state,
                UnitState::Pending {
                    attempt: expected_next
                }
            );
        }
        state = state.begin_attempt().finish_attempt(false, 3);
        assert_eq!(state, UnitState::PermanentlyFailed { attempts: 3 });
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        let done = UnitState::Succeeded { attempts: 2 };
        assert_eq!(done.begin_attempt(), done);
        assert_eq!(done.finish_attempt(false, 5), done);

        let pending = UnitState::initial();
        assert_eq!(pending.finish_attempt(true, 3), pending);
    }
}
