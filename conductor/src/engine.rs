//! The program-counter step interpreter.
//!
//! Execution is a loop over an explicit program counter into the
//! expanded action sequence. PROMPT steps advance unconditionally;
//! DECIDE steps either advance or move the counter back to the step
//! whose `id` matches their `loopback_target`. Loop budgets are
//! tracked per `(deciding step, target)` pair so chained DECIDE gates
//! targeting the same step keep independent counters. A rejection's
//! explanation is cached for the target step and folded into its
//! prompt on re-execution when it opts into history.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::decision::extract_decision;
use crate::document::{ActionStep, DecideStep, HistoryPolicy, PromptStep, WorkflowDocument};
use crate::error::EngineError;
use crate::expert::ExpertCaller;
use crate::observer::RunObserver;
use crate::outputs::{OutputRecord, OutputStore};
use crate::strings::StringTable;
use crate::template;

/// Appended to every DECIDE prompt so the expert knows the expected
/// response shape.
pub const DECISION_INSTRUCTION: &str = "\n\nRespond with a single JSON object of the form \
{\"explanation\": \"<your reasoning>\", \"decision\": true|false}.";

/// Cooperative cancellation, checked at step boundaries. A call in
/// flight is never interrupted; its result is discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Total step executions, re-executions included.
    pub steps_executed: u32,
    /// Execution count per 0-based step index.
    pub exec_counts: BTreeMap<usize, u32>,
}

/// Interprets one expanded workflow document against an output store.
pub struct Interpreter<'a> {
    doc: &'a WorkflowDocument,
    strings: &'a StringTable,
    caller: &'a dyn ExpertCaller,
    observer: &'a dyn RunObserver,
    cancel: CancelFlag,
}

struct RunState {
    pc: usize,
    id_map: BTreeMap<String, usize>,
    loop_counters: BTreeMap<(usize, String), u32>,
    feedback: BTreeMap<String, String>,
    exec_counts: BTreeMap<usize, u32>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        doc: &'a WorkflowDocument,
        strings: &'a StringTable,
        caller: &'a dyn ExpertCaller,
        observer: &'a dyn RunObserver,
    ) -> Self {
        Interpreter {
            doc,
            strings,
            caller,
            observer,
            cancel: CancelFlag::new(),
        }
    }

    /// Share a cancellation handle with the caller.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the document from the first step to past the last.
    #[instrument(skip_all, fields(steps = self.doc.actions.len()))]
    pub fn run(&self, outputs: &mut OutputStore) -> Result<RunOutcome> {
        self.observer.run_started(self.doc.actions.len());
        let result = self.drive(outputs);
        self.observer.run_finished(result.is_ok());
        result
    }

    fn drive(&self, outputs: &mut OutputStore) -> Result<RunOutcome> {
        let mut state = RunState {
            pc: 0,
            id_map: build_id_map(self.doc),
            loop_counters: BTreeMap::new(),
            feedback: BTreeMap::new(),
            exec_counts: BTreeMap::new(),
        };

        while state.pc < self.doc.actions.len() {
            if self.cancel.is_cancelled() {
                warn!(step = state.pc + 1, "run cancelled before step");
                return Err(EngineError::Cancelled.into());
            }

            let step = &self.doc.actions[state.pc];
            let number = state.pc + 1;
            *state.exec_counts.entry(state.pc).or_insert(0) += 1;
            self.observer.step_started(number, step.kind(), step.expert());

            match step {
                ActionStep::Prompt(prompt) => {
                    self.exec_prompt(number, prompt, outputs, &mut state)?;
                    state.pc += 1;
                }
                ActionStep::Decide(decide) => {
                    self.exec_decide(number, decide, outputs, &mut state)?;
                }
                ActionStep::Complex(complex) => {
                    return Err(EngineError::UnexpandedComplex {
                        step: number,
                        action: complex.action.clone(),
                    }
                    .into());
                }
            }
        }

        let steps_executed = state.exec_counts.values().sum();
        info!(steps_executed, "workflow run complete");
        for (index, count) in &state.exec_counts {
            debug!(step = index + 1, count, "step execution count");
        }
        Ok(RunOutcome {
            steps_executed,
            exec_counts: state.exec_counts,
        })
    }

    fn exec_prompt(
        &self,
        number: usize,
        prompt: &PromptStep,
        outputs: &mut OutputStore,
        state: &mut RunState,
    ) -> Result<()> {
        require_field(number, "PROMPT", "expert", &prompt.expert)?;
        require_field(number, "PROMPT", "output", &prompt.output)?;

        let history = prompt.append_history.then_some(prompt.append_history_type);
        let mut text = self.resolve_inputs(&prompt.inputs, outputs, history);

        // A loopback to this step leaves the rejection explanation
        // behind; it is consumed on re-execution either way but only
        // surfaces in the prompt when the step carries history.
        if let Some(id) = prompt.id.as_deref()
            && let Some(explanation) = state.feedback.remove(id)
            && prompt.append_history
        {
            text.push_str("\n\nFeedback on the previous attempt:\n");
            text.push_str(&explanation);
        }

        debug!(step = number, expert = %prompt.expert, prompt_bytes = text.len(), "calling expert");
        let response =
            self.caller
                .call(&prompt.expert, &text)
                .map_err(|err| EngineError::Invocation {
                    step: number,
                    action: "PROMPT",
                    expert: prompt.expert.clone(),
                    message: err.to_string(),
                })?;

        let record = OutputRecord {
            final_answer: response.final_answer,
            decision: None,
            explanation: None,
            history: response.history,
            expert: prompt.expert.clone(),
            action_type: "PROMPT".to_string(),
            inputs: prompt.inputs.clone(),
            timestamp: OutputRecord::now_timestamp(),
            loopback_target: None,
        };
        let version = outputs.save(&prompt.output, record)?;
        info!(step = number, output = %prompt.output, version, "prompt step complete");
        self.observer.step_finished(number, "PROMPT", &prompt.output);
        Ok(())
    }

    fn exec_decide(
        &self,
        number: usize,
        decide: &DecideStep,
        outputs: &mut OutputStore,
        state: &mut RunState,
    ) -> Result<()> {
        require_field(number, "DECIDE", "expert", &decide.expert)?;
        require_field(number, "DECIDE", "output", &decide.output)?;
        let target = decide
            .loopback_target
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(EngineError::StepField {
                step: number,
                action: "DECIDE",
                field: "loopback_target",
            })?;

        let mut text = self.resolve_inputs(&decide.inputs, outputs, None);
        text.push_str(DECISION_INSTRUCTION);

        debug!(step = number, expert = %decide.expert, "calling expert for decision");
        let response =
            self.caller
                .call(&decide.expert, &text)
                .map_err(|err| EngineError::Invocation {
                    step: number,
                    action: "DECIDE",
                    expert: decide.expert.clone(),
                    message: err.to_string(),
                })?;

        let (explanation, decision) = extract_decision(&response.final_answer);
        self.observer.decision_made(number, decision, &explanation);

        let record = OutputRecord {
            final_answer: response.final_answer,
            decision: Some(decision),
            explanation: Some(explanation.clone()),
            history: response.history,
            expert: decide.expert.clone(),
            action_type: "DECIDE".to_string(),
            inputs: decide.inputs.clone(),
            timestamp: OutputRecord::now_timestamp(),
            loopback_target: Some(target.to_string()),
        };
        outputs.save(&decide.output, record)?;
        self.observer.step_finished(number, "DECIDE", &decide.output);

        if decision {
            info!(step = number, "decision accepted, advancing");
            state.loop_counters.remove(&(state.pc, target.to_string()));
            state.pc += 1;
            return Ok(());
        }

        let counter = state
            .loop_counters
            .entry((state.pc, target.to_string()))
            .or_insert(0);
        *counter += 1;
        if *counter >= decide.loop_limit {
            return Err(EngineError::LoopLimitExceeded {
                step: number,
                target: target.to_string(),
                limit: decide.loop_limit,
            }
            .into());
        }

        let target_index =
            *state
                .id_map
                .get(target)
                .ok_or_else(|| EngineError::UnresolvedLoopbackTarget {
                    step: number,
                    target: target.to_string(),
                })?;
        state.feedback.insert(target.to_string(), explanation);
        info!(
            step = number,
            target,
            rejections = *counter,
            limit = decide.loop_limit,
            "decision rejected, looping back"
        );
        state.pc = target_index;
        Ok(())
    }

    fn resolve_inputs(
        &self,
        inputs: &[String],
        outputs: &OutputStore,
        history: Option<HistoryPolicy>,
    ) -> String {
        inputs
            .iter()
            .map(|token| self.resolve_token(token, outputs, history))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Resolve one input token, in precedence order: string table
    /// name, prior output name, output snapshot file, literal text
    /// with `{{variable}}` substitution.
    fn resolve_token(
        &self,
        token: &str,
        outputs: &OutputStore,
        history: Option<HistoryPolicy>,
    ) -> String {
        if let Some(text) = self.strings.get(token) {
            return text.to_string();
        }

        if let Some(record) = outputs.latest(token) {
            let mut text = record.final_answer.clone();
            if let Some(policy) = history
                && let Some(prior) = outputs.history_text(token, policy)
            {
                text.push_str("\n\nEarlier versions:\n");
                text.push_str(&prior);
            }
            return text;
        }

        if token.ends_with(".yaml") || token.ends_with(".yml") {
            match self.read_snapshot(token, outputs) {
                Some(answer) => return answer,
                None => {
                    warn!(token, "output snapshot not readable, treating as literal");
                }
            }
        }

        template::resolve_str(token, self.strings.variables())
    }

    fn read_snapshot(&self, token: &str, outputs: &OutputStore) -> Option<String> {
        let direct = std::path::Path::new(token);
        let contents = std::fs::read_to_string(direct)
            .or_else(|_| std::fs::read_to_string(outputs.dir().join(token)))
            .ok()?;
        let record: OutputRecord = serde_yaml::from_str(&contents).ok()?;
        Some(record.final_answer)
    }
}

fn require_field(
    step: usize,
    action: &'static str,
    field: &'static str,
    value: &str,
) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EngineError::StepField {
            step,
            action,
            field,
        }
        .into());
    }
    Ok(())
}

/// Map step ids to indices. Duplicate ids resolve to the later step,
/// matching a linear scan where later definitions shadow earlier ones.
fn build_id_map(doc: &WorkflowDocument) -> BTreeMap<String, usize> {
    let mut map = BTreeMap::new();
    for (index, step) in doc.actions.iter().enumerate() {
        if let Some(id) = step.id() {
            map.insert(id.to_string(), index);
        }
    }
    map
}
