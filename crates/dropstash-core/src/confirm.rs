//! Confirmation policy for destructive removals.

use std::io::{BufRead, Write};

/// Attempts `StdinConfirm` makes before giving up and declining.
pub const MAX_PROMPT_ATTEMPTS: usize = 3;

/// Asks whether a destructive action should go ahead.
pub trait Confirm {
    /// Return `true` to proceed.
    fn confirm(&self, prompt: &str) -> bool;
}

/// Always proceeds.
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Always declines.
pub struct NeverConfirm;

impl Confirm for NeverConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

/// Interpret one line of user input. `None` means unrecognised.
///
/// Empty input takes the default answer, which is "no".
pub fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "n" | "no" => Some(false),
        "y" | "yes" => Some(true),
        _ => None,
    }
}

/// Prompt on stdout, read answers from stdin.
pub struct StdinConfirm;

impl StdinConfirm {
    /// Run the prompt loop against arbitrary input and output streams.
    pub fn ask<R: BufRead, W: Write>(prompt: &str, input: &mut R, output: &mut W) -> bool {
        let _ = writeln!(output, "{prompt} [yes/No]");
        for _ in 0..MAX_PROMPT_ATTEMPTS {
            let _ = output.flush();
            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }
            if let Some(answer) = parse_answer(&line) {
                return answer;
            }
            let _ = writeln!(output, "Please type yes or no and then press enter:");
        }
        tracing::warn!("no valid answer after {} attempts, declining", MAX_PROMPT_ATTEMPTS);
        false
    }
}

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        Self::ask(prompt, &mut input, &mut std::io::stdout())
    }
}
