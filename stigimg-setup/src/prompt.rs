//! Interactive prompts on the controlling terminal.

use std::future::Future;
use std::io::IsTerminal;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::ReconcileError;

/// Whether stdin is attached to a terminal.
pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal()
}

async fn read_answer(question: &str) -> std::io::Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(question.as_bytes()).await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_string())
}

/// Ask for a free-form value. Returns `None` on an empty answer.
pub async fn ask(question: &str) -> std::io::Result<Option<String>> {
    let answer = read_answer(&format!("{}: ", question)).await?;
    Ok(Some(answer).filter(|a| !a.is_empty()))
}

/// Ask a yes/no question; anything but `y`/`yes` is a no.
pub async fn confirm(question: &str) -> std::io::Result<bool> {
    let answer = read_answer(&format!("{} [y/N] ", question)).await?;
    Ok(is_yes(&answer))
}

/// Decide whether a run may go ahead.
///
/// `--yes` skips the question. Without a terminal there is nobody to ask, so
/// the run is refused. Otherwise `ask` is called and a no cancels the run.
pub async fn require_confirmation<F, Fut>(
    yes: bool,
    interactive: bool,
    ask: F,
) -> Result<(), ReconcileError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::io::Result<bool>>,
{
    if yes {
        return Ok(());
    }
    if !interactive {
        return Err(ReconcileError::ConfirmationRequired);
    }
    match ask().await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ReconcileError::UserCancelled),
        Err(e) => Err(ReconcileError::Prompt(e.to_string())),
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}
