//! Test doubles shared by unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::{Result, anyhow};

use crate::expert::{ExpertCaller, ExpertResponse};

/// An expert that replays a scripted queue of responses and records
/// every `(expert, prompt)` pair it was called with.
#[derive(Debug, Default)]
pub struct ScriptedExpert {
    script: RefCell<VecDeque<ExpertResponse>>,
    calls: RefCell<Vec<(String, String)>>,
}

impl ScriptedExpert {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full response, history included.
    pub fn push_response(&self, response: ExpertResponse) {
        self.script.borrow_mut().push_back(response);
    }

    /// Queue a plain answer.
    pub fn push_answer(&self, text: &str) {
        self.push_response(ExpertResponse {
            final_answer: text.to_string(),
            history: Vec::new(),
        });
    }

    /// Queue a structured decision response.
    pub fn push_decision(&self, decision: bool, explanation: &str) {
        let body = serde_json::json!({
            "explanation": explanation,
            "decision": decision,
        });
        self.push_answer(&body.to_string());
    }

    /// Every `(expert, prompt)` pair seen so far, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.borrow().clone()
    }
}

impl ExpertCaller for ScriptedExpert {
    fn call(&self, expert: &str, prompt: &str) -> Result<ExpertResponse> {
        self.calls
            .borrow_mut()
            .push((expert.to_string(), prompt.to_string()));
        self.script.borrow_mut().pop_front().ok_or_else(|| {
            anyhow!(
                "scripted expert exhausted after {} call(s)",
                self.calls.borrow().len()
            )
        })
    }
}

/// An observer that records lifecycle events as readable strings.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: RefCell<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }
}

impl crate::observer::RunObserver for RecordingObserver {
    fn run_started(&self, total_steps: usize) {
        self.events
            .borrow_mut()
            .push(format!("run_started {total_steps}"));
    }

    fn step_started(&self, step: usize, action: &str, expert: &str) {
        self.events
            .borrow_mut()
            .push(format!("step_started {step} {action} {expert}"));
    }

    fn step_finished(&self, step: usize, action: &str, output: &str) {
        self.events
            .borrow_mut()
            .push(format!("step_finished {step} {action} {output}"));
    }

    fn decision_made(&self, step: usize, decision: bool, _explanation: &str) {
        self.events
            .borrow_mut()
            .push(format!("decision_made {step} {decision}"));
    }

    fn run_finished(&self, success: bool) {
        self.events
            .borrow_mut()
            .push(format!("run_finished {success}"));
    }
}
