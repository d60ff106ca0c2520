//! Command Sequence: a small orchestrator chaining asynchronous device
//! operations into one terminal `(success, text, payload)` result, spec.md
//! §4.5.
//!
//! No teacher analogue exists (the teacher has no multi-step
//! orchestration); implemented from spec.md §9's design note ("express
//! Command Sequences as ... state machines on an explicit step index ...
//! avoid deep callback chains").

use std::future::Future;
use std::pin::Pin;

use log::warn;

use crate::handler::HandlerPayload;

/// A single step: an async function taking the previous step's payload and
/// producing the next one, or failing.
pub type Step = Box<dyn FnMut(HandlerPayload) -> Pin<Box<dyn Future<Output = StepResult>>>>;

pub type StepResult = Result<HandlerPayload, (String, HandlerPayload)>;

/// Runs a fixed list of steps strictly in order, short-circuiting on the
/// first failure and firing the terminal callback exactly once, spec.md
/// §4.5/§8 invariant 8.
pub struct CommandSequence {
    name: String,
    steps: Vec<Step>,
    done: Option<Box<dyn FnOnce(bool, String, HandlerPayload)>>,
    finished: bool,
}

impl CommandSequence {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        CommandSequence {
            name: name.into(),
            steps,
            done: None,
            finished: false,
        }
    }

    /// Runs every step in order, invoking `done` exactly once with the
    /// final outcome. Steps execute strictly in order: step `j+1` never
    /// starts until step `j`'s future resolves.
    pub async fn run(mut self, done: impl FnOnce(bool, String, HandlerPayload) + 'static) {
        self.done = Some(Box::new(done));

        let mut payload = HandlerPayload::None;
        for (index, step) in self.steps.iter_mut().enumerate() {
            match step(payload).await {
                Ok(next_payload) => {
                    payload = next_payload;
                }
                Err((text, failure_payload)) => {
                    self.finish(false, text, failure_payload);
                    return;
                }
            }
            let _ = index;
        }

        let text = format!("{} completed", self.name);
        self.finish(true, text, payload);
    }

    /// Guards against a step calling its completion twice (spec.md §4.5:
    /// "a step's `on_done` must not be called twice; violations are logged
    /// and ignored").
    fn finish(&mut self, success: bool, text: impl Into<String>, payload: HandlerPayload) {
        if self.finished {
            warn!("command sequence '{}' terminal callback invoked more than once; ignoring", self.name);
            return;
        }
        self.finished = true;
        if let Some(done) = self.done.take() {
            done(success, text.into(), payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn succeeding_step(value: u8) -> Step {
        Box::new(move |_payload| Box::pin(async move { Ok(HandlerPayload::Byte(value)) }))
    }

    fn failing_step(text: &'static str) -> Step {
        Box::new(move |_payload| Box::pin(async move { Err((text.to_string(), HandlerPayload::None)) }))
    }

    #[tokio::test]
    async fn all_steps_succeed_fires_done_true_with_last_payload() {
        let steps = vec![succeeding_step(1), succeeding_step(2), succeeding_step(3)];
        let seq = CommandSequence::new("pair", steps);

        let result = Arc::new(Mutex::new(None));
        let r = result.clone();
        seq.run(move |success, text, payload| {
            *r.lock().unwrap() = Some((success, text, payload));
        })
        .await;

        let (success, _text, payload) = result.lock().unwrap().clone().unwrap();
        assert!(success);
        assert_eq!(payload, HandlerPayload::Byte(3));
    }

    #[tokio::test]
    async fn middle_step_failure_short_circuits() {
        let ran_third = Arc::new(Mutex::new(false));
        let r = ran_third.clone();
        let third: Step = Box::new(move |payload| {
            let r = r.clone();
            Box::pin(async move {
                *r.lock().unwrap() = true;
                Ok(payload)
            })
        });

        let steps = vec![succeeding_step(1), failing_step("rejected"), third];
        let seq = CommandSequence::new("pair", steps);

        let result = Arc::new(Mutex::new(None));
        let r2 = result.clone();
        seq.run(move |success, text, payload| {
            *r2.lock().unwrap() = Some((success, text, payload));
        })
        .await;

        let (success, text, _payload) = result.lock().unwrap().clone().unwrap();
        assert!(!success);
        assert_eq!(text, "rejected");
        assert!(!*ran_third.lock().unwrap());
    }

    #[tokio::test]
    async fn terminal_callback_fires_exactly_once() {
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();

        let seq = CommandSequence::new("noop", Vec::new());
        seq.run(move |_, _, _| {
            *c.lock().unwrap() += 1;
        })
        .await;

        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
