use std::io::{self, Write};

use serde_json::Value;

use crate::dispatcher::StepOutcome;
use crate::envelope::Envelope;
use crate::pipeline::Outcome;

pub const NO_TEXTUAL_RESPONSE: &str = "No textual response produced by the model.";

/// Writes conversational chunks to stdout as they arrive.
#[derive(Debug, Default)]
pub struct ChunkPrinter {
    emitted: usize,
    ends_with_newline: bool,
}

impl ChunkPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let mut stdout = io::stdout().lock();
        // stdout may be a closed pipe.
        let _ = stdout.write_all(chunk.as_bytes());
        let _ = stdout.flush();
        self.emitted += chunk.len();
        self.ends_with_newline = chunk.ends_with('\n');
    }

    /// Terminate the streamed reply with a newline, or print a placeholder
    /// when the model streamed nothing.
    pub fn finish(&mut self) {
        if self.emitted == 0 {
            println!("{NO_TEXTUAL_RESPONSE}");
        } else if !self.ends_with_newline {
            println!();
        }
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

pub fn format_step_line(outcome: &StepOutcome) -> String {
    match &outcome.envelope {
        Envelope::Success(result) => format!(
            "[✓] step {} ({}): {}",
            outcome.step_number,
            outcome.agent,
            compact_json(result)
        ),
        Envelope::Failure(error) => format!(
            "[✗] step {} ({}): {}",
            outcome.step_number, outcome.agent, error
        ),
    }
}

fn compact_json(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Lines to print after a message completes. Conversational replies were
/// already streamed, so they contribute nothing here.
pub fn outcome_lines(outcome: &Outcome) -> Vec<String> {
    match outcome {
        Outcome::Conversational { .. } => Vec::new(),
        Outcome::Tool { results, .. } => results.iter().map(format_step_line).collect(),
    }
}

pub fn print_outcome(outcome: &Outcome) {
    for line in outcome_lines(outcome) {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Plan;
    use serde_json::json;

    fn outcome(step_number: u32, agent: &str, envelope: Envelope) -> StepOutcome {
        StepOutcome {
            step_number,
            agent: agent.to_string(),
            envelope,
        }
    }

    #[test]
    fn step_lines_mark_success_and_failure() {
        let ok = outcome(1, "todo_agent", Envelope::success(json!({"id": 1})));
        assert_eq!(format_step_line(&ok), "[✓] step 1 (todo_agent): {\"id\":1}");

        let failed = outcome(
            2,
            "ghost_agent",
            Envelope::failure("Agent 'ghost_agent' not found"),
        );
        assert_eq!(
            format_step_line(&failed),
            "[✗] step 2 (ghost_agent): Agent 'ghost_agent' not found"
        );
    }

    #[test]
    fn conversational_outcome_prints_no_extra_lines() {
        let conversational = Outcome::Conversational {
            reply: "hello".to_string(),
        };
        assert!(outcome_lines(&conversational).is_empty());

        let tool = Outcome::Tool {
            plan: Plan { steps: Vec::new() },
            results: vec![outcome(1, "todo_agent", Envelope::success(json!("done")))],
        };
        assert_eq!(outcome_lines(&tool), vec!["[✓] step 1 (todo_agent): done"]);
    }

    #[test]
    fn printer_counts_emitted_bytes() {
        let mut printer = ChunkPrinter::new();
        printer.print("");
        assert_eq!(printer.emitted(), 0);
        printer.print("hi");
        assert_eq!(printer.emitted(), 2);
    }
}
