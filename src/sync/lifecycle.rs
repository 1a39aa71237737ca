use std::fmt;
use std::str::FromStr;
use tokio::sync::watch;

/// Process lifecycle state as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

impl AppState {
    pub fn as_str(self) -> &'static str {
        match self {
            AppState::Active => "active",
            AppState::Inactive => "inactive",
            AppState::Background => "background",
        }
    }

    /// True for a transition from inactive or background into active.
    pub fn is_foreground_transition(from: AppState, to: AppState) -> bool {
        matches!(from, AppState::Inactive | AppState::Background) && to == AppState::Active
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AppState::Active),
            "inactive" => Ok(AppState::Inactive),
            "background" => Ok(AppState::Background),
            other => Err(format!("unknown app state: {other}")),
        }
    }
}

/// Publishes lifecycle transitions to any number of list views.
#[derive(Debug)]
pub struct LifecycleSignal {
    tx: watch::Sender<AppState>,
}

impl LifecycleSignal {
    pub fn new(initial: AppState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Moves to `state`. Setting the current state again notifies nobody.
    pub fn set(&self, state: AppState) {
        let previous = self.current();
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::debug!(from = %previous, to = %state, "App state changed");
        }
    }

    pub fn current(&self) -> AppState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }
}

impl Default for LifecycleSignal {
    fn default() -> Self {
        Self::new(AppState::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreground_transitions() {
        use AppState::*;
        assert!(AppState::is_foreground_transition(Background, Active));
        assert!(AppState::is_foreground_transition(Inactive, Active));
        assert!(!AppState::is_foreground_transition(Active, Active));
        assert!(!AppState::is_foreground_transition(Active, Background));
        assert!(!AppState::is_foreground_transition(Background, Inactive));
    }

    #[test]
    fn test_parse_app_state() {
        assert_eq!("Background".parse::<AppState>(), Ok(AppState::Background));
        assert_eq!(" active ".parse::<AppState>(), Ok(AppState::Active));
        assert!("asleep".parse::<AppState>().is_err());
    }

    #[tokio::test]
    async fn test_repeated_state_does_not_notify() {
        let signal = LifecycleSignal::default();
        let mut rx = signal.subscribe();

        signal.set(AppState::Active);
        assert!(!rx.has_changed().unwrap());

        signal.set(AppState::Background);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), AppState::Background);
        assert_eq!(signal.current(), AppState::Background);
    }
}
