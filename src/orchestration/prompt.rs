// DANS : src/orchestration/prompt.rs

use async_trait::async_trait;
use std::io::{self, BufRead, Write};
use tracing::warn;

/// Confirmation explicite de l'utilisateur avant une dépense ou un import douteux.
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

pub struct AutoApprove;

#[async_trait]
impl OperatorPrompt for AutoApprove {
    async fn confirm(&self, _message: &str) -> bool {
        true
    }
}

pub struct AutoDecline;

#[async_trait]
impl OperatorPrompt for AutoDecline {
    async fn confirm(&self, _message: &str) -> bool {
        false
    }
}

/// Question posée sur le terminal ; seul `y`/`yes`/`o`/`oui` vaut accord.
pub struct ConsolePrompt;

#[async_trait]
impl OperatorPrompt for ConsolePrompt {
    async fn confirm(&self, message: &str) -> bool {
        let message = message.to_string();
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stdout = io::stdout();
            writeln!(stdout, "{message}")?;
            write!(stdout, "Confirmer ? [y/N] ")?;
            stdout.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => is_affirmative(&line),
            Ok(Err(e)) => {
                warn!(error = %e, "[Prompt] Lecture de la réponse impossible, refus.");
                false
            }
            Err(e) => {
                warn!(error = %e, "[Prompt] Tâche de saisie interrompue, refus.");
                false
            }
        }
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes" | "o" | "oui")
}
