//! Administrative command endpoint, spec.md §4.9/§6: interface only, the
//! Flask/SocketIO transport is an external collaborator and is not
//! reimplemented here (spec.md §1 non-goal). Grounded in
//! `original_source/hassio/webcli/app.py`'s `Worker`/`app.config['cmd']`
//! pair: this is that pattern's Rust-native equivalent, a guarded FIFO a
//! single worker drains.

use std::collections::VecDeque;

use crate::error::Error;

/// Validates a raw command line against the guardrails the original
/// `app.py` enforced ad hoc per-token: reject anything containing `start`
/// or `stop` ("do not attempt to run the start/stop command from here"),
/// and reject a user command that already duplicates the fixed prefix
/// ("the command prefix ... is automatically added to all commands").
pub struct CommandGuard {
    /// Prepended to every accepted command, spec.md §6 ("prepends fixed
    /// arguments"). `app.py` hardcodes `["insteon-mqtt",
    /// "/config/insteon-mqtt/config.yaml"]`; kept configurable here rather
    /// than hardcoded since the fixed prefix is deployment-specific.
    fixed_prefix: Vec<String>,
}

impl CommandGuard {
    pub fn new(fixed_prefix: Vec<String>) -> Self {
        CommandGuard { fixed_prefix }
    }

    /// Splits `line` on shell-style quoting and validates it, returning the
    /// full command (fixed prefix + user tokens) on success.
    pub fn validate(&self, line: &str) -> Result<Vec<String>, Error> {
        let tokens = shell_words::split(line).map_err(|e| Error::CommandRejected(e.to_string()))?;

        let first = tokens
            .first()
            .ok_or_else(|| Error::CommandRejected("empty command".to_string()))?
            .to_lowercase();

        if first.contains("start") {
            return Err(Error::CommandRejected(
                "do not attempt to run the start command from here".to_string(),
            ));
        }
        if first.contains("stop") {
            return Err(Error::CommandRejected(
                "do not attempt to run the stop command from here".to_string(),
            ));
        }
        if self
            .fixed_prefix
            .first()
            .map(|p| first.contains(&p.to_lowercase()))
            .unwrap_or(false)
        {
            return Err(Error::CommandRejected(format!(
                "the command prefix {:?} is automatically added to all commands",
                self.fixed_prefix
            )));
        }

        let mut command = self.fixed_prefix.clone();
        command.extend(tokens);
        Ok(command)
    }
}

/// A single-consumer FIFO of validated commands, spec.md §6 ("pushes onto
/// a FIFO consumed by a single worker"). `app.py`'s worker popped from the
/// *end* of its list (a stack, despite the comment calling it a queue);
/// this keeps true FIFO order since nothing in spec.md or the source's
/// actual use depends on LIFO ordering, and FIFO is the less surprising
/// contract for a command console.
#[derive(Default)]
pub struct CommandQueue {
    commands: VecDeque<Vec<String>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue::default()
    }

    pub fn push(&mut self, command: Vec<String>) {
        self.commands.push_back(command);
    }

    /// Drained by the single worker; spec.md §4.9 calls this "the Rust
    /// equivalent of the Python `Worker`/`cmd` queue."
    pub fn pop(&mut self) -> Option<Vec<String>> {
        self.commands.pop_front()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Emergency stop, spec.md §6: "exit of the worker is signaled by an
    /// out-of-band stop command" (`app.py`'s `estop` socket event).
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> CommandGuard {
        CommandGuard::new(vec!["insteon-mqtt".to_string(), "/config/insteon-mqtt/config.yaml".to_string()])
    }

    #[test]
    fn rejects_start_and_stop() {
        assert!(guard().validate("start").is_err());
        assert!(guard().validate("stop").is_err());
        assert!(guard().validate("restart-all").is_err());
    }

    #[test]
    fn rejects_duplicated_fixed_prefix() {
        let result = guard().validate("insteon-mqtt config.yaml linking");
        assert!(result.is_err());
    }

    #[test]
    fn accepts_and_prepends_fixed_prefix() {
        let command = guard().validate("linking '11.22.33'").unwrap();
        assert_eq!(
            command,
            vec![
                "insteon-mqtt".to_string(),
                "/config/insteon-mqtt/config.yaml".to_string(),
                "linking".to_string(),
                "11.22.33".to_string(),
            ]
        );
    }

    #[test]
    fn queue_is_first_in_first_out() {
        let mut queue = CommandQueue::new();
        queue.push(vec!["a".to_string()]);
        queue.push(vec!["b".to_string()]);
        assert_eq!(queue.pop(), Some(vec!["a".to_string()]));
        assert_eq!(queue.pop(), Some(vec!["b".to_string()]));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn clear_drops_all_pending_commands() {
        let mut queue = CommandQueue::new();
        queue.push(vec!["a".to_string()]);
        queue.clear();
        assert!(queue.is_empty());
    }
}
