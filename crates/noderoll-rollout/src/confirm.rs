//! Operator confirmation.
//!
//! Asked at two points: before the first node is touched, and after a
//! control-plane node fails.

use std::collections::VecDeque;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::io::{AsyncBufReadExt, BufReader};

pub const PROCEED_PROMPT: &str = "Proceed with upgrade?";
pub const CONTINUE_PROMPT: &str = "Control plane upgrade failed. Continue?";

pub trait Confirm: Send + Sync {
    fn confirm<'a>(&'a self, prompt: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

/// `y` or `yes`, case-insensitive. Anything else declines.
pub fn parse_answer(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Prompts on stdout and reads one line from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm<'a>(&'a self, prompt: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            print!("{prompt} [y/N] ");
            let _ = std::io::stdout().flush();

            let mut line = String::new();
            let mut reader = BufReader::new(tokio::io::stdin());
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => false,
                Ok(_) => parse_answer(&line),
            }
        })
    }
}

/// Answers from a fixed script; declines once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedConfirm {
    answers: Mutex<VecDeque<bool>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedConfirm {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts asked so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm<'a>(&'a self, prompt: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let answer = self
            .answers
            .lock()
            .ok()
            .and_then(|mut a| a.pop_front())
            .unwrap_or(false);
        Box::pin(std::future::ready(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers() {
        assert!(parse_answer("y\n"));
        assert!(parse_answer("  YES "));
        assert!(parse_answer("Yes"));
        assert!(!parse_answer(""));
        assert!(!parse_answer("n"));
        assert!(!parse_answer("yep"));
    }

    #[tokio::test]
    async fn scripted_runs_out_to_no() {
        let confirm = ScriptedConfirm::new([true]);
        assert!(confirm.confirm(PROCEED_PROMPT).await);
        assert!(!confirm.confirm(CONTINUE_PROMPT).await);
        assert_eq!(confirm.prompts(), vec![PROCEED_PROMPT, CONTINUE_PROMPT]);
    }
}
