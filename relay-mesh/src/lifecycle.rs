use serde::Serialize;
use tokio::sync::watch;

/// Lifecycle shared by the relay and by nodes. The relay never enters `Registered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Created,
    Listening,
    /// The registration line went out; the relay never confirms it.
    Registered,
    Running,
    Stopping,
    Stopped,
}

impl Lifecycle {
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Lifecycle::Listening | Lifecycle::Registered | Lifecycle::Running
        )
    }

    pub fn is_shutting_down(self) -> bool {
        self >= Lifecycle::Stopping
    }
}

/// Result of asking a component to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopRequest {
    /// This call moved the component from running to `Stopping` and owns the teardown.
    Teardown,
    /// Never started; moved straight to `Stopped`.
    NeverStarted,
    /// Another call already stopped or is stopping it.
    AlreadyStopping,
}

pub(crate) fn new_state() -> watch::Sender<Lifecycle> {
    watch::Sender::new(Lifecycle::Created)
}

/// Claims the `Created -> Listening` transition; only one caller can win it.
pub(crate) fn begin_start(state: &watch::Sender<Lifecycle>) -> bool {
    state.send_if_modified(|current| {
        if *current == Lifecycle::Created {
            *current = Lifecycle::Listening;
            true
        } else {
            false
        }
    })
}

/// Moves forward to `next` unless a stop has already begun.
pub(crate) fn advance(state: &watch::Sender<Lifecycle>, next: Lifecycle) {
    state.send_if_modified(|current| {
        if current.is_running() && next > *current {
            *current = next;
            true
        } else {
            false
        }
    });
}

pub(crate) fn begin_stop(state: &watch::Sender<Lifecycle>) -> StopRequest {
    let mut request = StopRequest::AlreadyStopping;
    state.send_if_modified(|current| match *current {
        Lifecycle::Created => {
            *current = Lifecycle::Stopped;
            request = StopRequest::NeverStarted;
            true
        }
        running if running.is_running() => {
            *current = Lifecycle::Stopping;
            request = StopRequest::Teardown;
            true
        }
        _ => false,
    });
    request
}

pub(crate) fn finish_stop(state: &watch::Sender<Lifecycle>) {
    state.send_replace(Lifecycle::Stopped);
}

/// Resolves once the component has begun shutting down.
pub(crate) async fn shutdown_signal(mut receiver: watch::Receiver<Lifecycle>) {
    // An error means the sender is gone, which also ends the wait.
    let _ = receiver.wait_for(|current| current.is_shutting_down()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered_along_the_lifecycle() {
        assert!(Lifecycle::Created < Lifecycle::Listening);
        assert!(Lifecycle::Registered < Lifecycle::Running);
        assert!(Lifecycle::Running.is_running());
        assert!(!Lifecycle::Created.is_running());
        assert!(Lifecycle::Stopping.is_shutting_down());
        assert!(!Lifecycle::Running.is_shutting_down());
    }

    #[test]
    fn start_can_only_be_claimed_once() {
        let state = new_state();
        assert!(begin_start(&state));
        assert!(!begin_start(&state));
        assert_eq!(*state.borrow(), Lifecycle::Listening);
    }

    #[test]
    fn stop_is_claimed_once_per_run() {
        let state = new_state();
        begin_start(&state);
        advance(&state, Lifecycle::Running);

        assert_eq!(begin_stop(&state), StopRequest::Teardown);
        assert_eq!(begin_stop(&state), StopRequest::AlreadyStopping);
        finish_stop(&state);
        assert_eq!(begin_stop(&state), StopRequest::AlreadyStopping);
        assert_eq!(*state.borrow(), Lifecycle::Stopped);
    }

    #[test]
    fn stopping_before_start_goes_straight_to_stopped() {
        let state = new_state();
        assert_eq!(begin_stop(&state), StopRequest::NeverStarted);
        assert_eq!(*state.borrow(), Lifecycle::Stopped);
        assert!(!begin_start(&state));
    }

    #[test]
    fn advance_never_resurrects_a_stopping_component() {
        let state = new_state();
        begin_start(&state);
        begin_stop(&state);
        advance(&state, Lifecycle::Running);
        assert_eq!(*state.borrow(), Lifecycle::Stopping);
    }

    #[tokio::test]
    async fn shutdown_signal_fires_on_stop() {
        let state = new_state();
        begin_start(&state);
        let signal = tokio::spawn(shutdown_signal(state.subscribe()));

        begin_stop(&state);
        tokio::time::timeout(std::time::Duration::from_secs(1), signal)
            .await
            .expect("signal should resolve")
            .expect("signal task");
    }
}
