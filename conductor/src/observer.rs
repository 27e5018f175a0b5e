//! Run lifecycle observation.
//!
//! The interpreter reports progress through an injected observer
//! instead of a global event bus. Every hook has an empty default so
//! implementations subscribe only to what they care about.

/// Callbacks invoked at run lifecycle points. All hooks default to
/// no-ops and cannot signal errors back; observation never affects
/// control flow.
pub trait RunObserver {
    fn run_started(&self, total_steps: usize) {
        let _ = total_steps;
    }

    fn step_started(&self, step: usize, action: &str, expert: &str) {
        let _ = (step, action, expert);
    }

    fn step_finished(&self, step: usize, action: &str, output: &str) {
        let _ = (step, action, output);
    }

    fn decision_made(&self, step: usize, decision: bool, explanation: &str) {
        let _ = (step, decision, explanation);
    }

    fn run_finished(&self, success: bool) {
        let _ = success;
    }
}

/// The default observer: ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}
