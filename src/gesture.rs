//! Tap versus press-and-hold on a single control.
//!
//! A press arms one timer. Releasing before it fires is a tap; letting it
//! fire moves the detector to `Held`, which is reported on the channel
//! returned by [`HoldDetector::new`] so the caller can open its edit prompt.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_HOLD_DURATION: Duration = Duration::from_millis(2_000);

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum HoldState<T> {
    Idle,
    Pending(T),
    Held(T),
}

/// What the caller should do after the pointer is released.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Release<T> {
    /// Released before the threshold: run the ordinary tap action.
    Tap(T),
    /// The hold already fired; the tap action must not run.
    Suppressed,
    /// Nothing was pressed.
    Ignored,
}

#[derive(Debug)]
struct Shared<T> {
    state: HoldState<T>,
    generation: u64,
}

#[derive(Debug)]
pub struct HoldDetector<T> {
    hold_duration: Duration,
    shared: Arc<Mutex<Shared<T>>>,
    timer: Option<JoinHandle<()>>,
    held_tx: mpsc::UnboundedSender<T>,
}

fn lock<T>(shared: &Mutex<Shared<T>>) -> MutexGuard<'_, Shared<T>> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<T> HoldDetector<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(hold_duration: Duration) -> (Self, mpsc::UnboundedReceiver<T>) {
        let (held_tx, held_rx) = mpsc::unbounded_channel();
        let detector = Self {
            hold_duration,
            shared: Arc::new(Mutex::new(Shared {
                state: HoldState::Idle,
                generation: 0,
            })),
            timer: None,
            held_tx,
        };
        (detector, held_rx)
    }

    pub fn hold_duration(&self) -> Duration {
        self.hold_duration
    }

    pub fn state(&self) -> HoldState<T> {
        lock(&self.shared).state.clone()
    }

    /// Starts a hold on `target`, replacing any pending one.
    ///
    /// Ignored while a previous hold is `Held` and its prompt is still open.
    /// Must be called from within a tokio runtime.
    pub fn press(&mut self, target: T) -> bool {
        let generation = {
            let mut shared = lock(&self.shared);
            if matches!(shared.state, HoldState::Held(_)) {
                return false;
            }
            shared.generation = shared.generation.wrapping_add(1);
            shared.state = HoldState::Pending(target);
            shared.generation
        };
        self.cancel_timer();

        let shared = Arc::clone(&self.shared);
        let held_tx = self.held_tx.clone();
        let hold_duration = self.hold_duration;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(hold_duration).await;
            let mut shared = lock(&shared);
            if shared.generation != generation {
                return;
            }
            if let HoldState::Pending(target) = &shared.state {
                let target = target.clone();
                shared.state = HoldState::Held(target.clone());
                drop(shared);
                debug!(hold_ms = hold_duration.as_millis() as u64, "hold threshold reached");
                let _ = held_tx.send(target);
            }
        }));
        true
    }

    pub fn release(&mut self) -> Release<T> {
        let outcome = {
            let mut shared = lock(&self.shared);
            match std::mem::replace(&mut shared.state, HoldState::Idle) {
                HoldState::Pending(target) => {
                    shared.generation = shared.generation.wrapping_add(1);
                    Release::Tap(target)
                }
                held @ HoldState::Held(_) => {
                    shared.state = held;
                    Release::Suppressed
                }
                HoldState::Idle => Release::Ignored,
            }
        };
        if matches!(outcome, Release::Tap(_)) {
            self.cancel_timer();
        }
        outcome
    }

    /// Pointer left the control: a pending hold is dropped without a tap.
    pub fn leave(&mut self) -> bool {
        let cancelled = {
            let mut shared = lock(&self.shared);
            if matches!(shared.state, HoldState::Pending(_)) {
                shared.state = HoldState::Idle;
                shared.generation = shared.generation.wrapping_add(1);
                true
            } else {
                false
            }
        };
        if cancelled {
            self.cancel_timer();
        }
        cancelled
    }

    /// Closes the edit prompt opened by a hold and returns its target.
    pub fn close_modal(&mut self) -> Option<T> {
        let mut shared = lock(&self.shared);
        match std::mem::replace(&mut shared.state, HoldState::Idle) {
            HoldState::Held(target) => Some(target),
            other => {
                shared.state = other;
                None
            }
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl<T> Drop for HoldDetector<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> (HoldDetector<&'static str>, mpsc::UnboundedReceiver<&'static str>) {
        HoldDetector::new(DEFAULT_HOLD_DURATION)
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn release_before_threshold_is_a_tap() {
        let (mut detector, mut held_rx) = detector();
        assert!(detector.press("mask"));
        assert_eq!(detector.state(), HoldState::Pending("mask"));

        tokio::time::advance(Duration::from_millis(1_999)).await;
        settle().await;
        assert_eq!(detector.release(), Release::Tap("mask"));

        tokio::time::advance(Duration::from_millis(5_000)).await;
        settle().await;
        assert_eq!(detector.state(), HoldState::Idle);
        assert!(held_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn holding_past_threshold_opens_prompt_and_suppresses_tap() {
        let (mut detector, mut held_rx) = detector();
        detector.press("mask");

        tokio::time::advance(DEFAULT_HOLD_DURATION).await;
        let held = held_rx.recv().await;
        assert_eq!(held, Some("mask"));
        assert_eq!(detector.state(), HoldState::Held("mask"));

        assert_eq!(detector.release(), Release::Suppressed);
        assert_eq!(detector.state(), HoldState::Held("mask"));
        assert_eq!(detector.close_modal(), Some("mask"));
        assert_eq!(detector.state(), HoldState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_control_cancels_without_tap() {
        let (mut detector, mut held_rx) = detector();
        detector.press("fins");
        assert!(detector.leave());
        assert_eq!(detector.release(), Release::Ignored);

        tokio::time::advance(Duration::from_millis(3_000)).await;
        settle().await;
        assert!(held_rx.try_recv().is_err());
        assert_eq!(detector.state(), HoldState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn new_press_replaces_pending_target() {
        let (mut detector, mut held_rx) = detector();
        detector.press("mask");
        tokio::time::advance(Duration::from_millis(1_500)).await;
        settle().await;
        detector.press("fins");

        // first timer would have fired here
        tokio::time::advance(Duration::from_millis(600)).await;
        settle().await;
        assert!(held_rx.try_recv().is_err());
        assert_eq!(detector.state(), HoldState::Pending("fins"));

        tokio::time::advance(Duration::from_millis(1_400)).await;
        assert_eq!(held_rx.recv().await, Some("fins"));
    }

    #[tokio::test(start_paused = true)]
    async fn press_is_ignored_while_prompt_is_open() {
        let (mut detector, mut held_rx) = detector();
        detector.press("mask");
        tokio::time::advance(DEFAULT_HOLD_DURATION).await;
        assert_eq!(held_rx.recv().await, Some("mask"));

        assert!(!detector.press("fins"));
        assert_eq!(detector.state(), HoldState::Held("mask"));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_duration_is_respected() {
        let (mut detector, mut held_rx) = HoldDetector::new(Duration::from_millis(300));
        detector.press(7_u32);
        tokio::time::advance(Duration::from_millis(299)).await;
        settle().await;
        assert!(held_rx.try_recv().is_err());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(held_rx.recv().await, Some(7));
    }

    #[test]
    fn close_modal_without_hold_is_noop() {
        let (mut detector, _held_rx) = detector();
        assert_eq!(detector.close_modal(), None);
        assert_eq!(detector.state(), HoldState::Idle);
    }
}
