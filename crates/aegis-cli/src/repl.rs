//! Subcommand: `aegis run` — interactive session.
//!
//! Reads requests line by line, renders responses, and for command
//! previews offers execution with streamed output.  Blocked commands are
//! never offered; confirm-level commands require an explicit yes.

use std::io::{self, Write as _};

use anyhow::Result;
use tracing::info;

use aegis_brain::{Brain, BrainError, CommandView, Response};
use aegis_exec::{ExecEvent, ExecutionMode, StreamKind};
use aegis_registry::{RiskAction, Role};
use aegis_store::WorkMode;

/// Run the interactive loop until EOF or `exit`.
pub async fn cmd_run(brain: Brain, role: Role, mode: WorkMode) -> Result<()> {
    let session = brain.create_session(role, mode).await?;
    info!(session_id = %session.id, role = %role, mode = %mode, "session started");

    println!("aegis — {role} / {mode} session {}", session.id);
    println!("Type a request, /help for builtins, or `exit` to quit.\n");

    let stdin = io::stdin();
    loop {
        print!("aegis> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        match brain.process(session.id, line).await {
            Ok(response) => render(&brain, session.id, response).await?,
            Err(e) => eprintln!("error: {e}"),
        }
    }

    println!("session {} closed", session.id);
    Ok(())
}

async fn render(brain: &Brain, session_id: uuid::Uuid, response: Response) -> Result<()> {
    match response {
        Response::Conversation { message } | Response::Explanation { message } => {
            println!("{message}\n");
        }
        Response::Plan { plan } => {
            println!("plan: {}", plan.goal);
            for step in &plan.steps {
                println!("  {}. {} -> `{}`", step.n, step.description, step.tool_request);
            }
            println!("Approve a step by submitting its request.\n");
        }
        Response::Error { error, code } => {
            match code {
                Some(code) => eprintln!("[{code}] {error}\n"),
                None => eprintln!("{error}\n"),
            }
        }
        Response::Command(view) => {
            render_command(brain, session_id, view).await?;
        }
    }
    Ok(())
}

async fn render_command(brain: &Brain, session_id: uuid::Uuid, view: CommandView) -> Result<()> {
    println!("tool: {}", view.tool_name);
    println!("command: {}", shell_quote(&view.argv));
    if !view.explanation.is_empty() {
        println!("explanation: {}", view.explanation);
    }
    println!(
        "risk: {} ({}) — {}",
        view.risk.level, view.risk.action, view.risk.reason
    );
    for alternative in &view.risk.alternatives {
        println!("  alternative: {alternative}");
    }

    if !view.suggestions.is_empty() {
        for (i, suggestion) in view.suggestions.iter().enumerate() {
            println!(
                "  {}. {} — {}",
                i + 1,
                shell_quote(&suggestion.argv),
                suggestion.explanation
            );
        }
        println!();
        return Ok(());
    }

    if let Some(execution_id) = view.execution_id {
        // Quick mode already started it; attach to the stream.
        let events = brain.subscribe_execution(execution_id)?;
        stream_events(brain, execution_id, events).await;
        return Ok(());
    }

    match view.risk.action {
        RiskAction::Block => {
            println!("execution blocked\n");
            return Ok(());
        }
        RiskAction::Allow | RiskAction::Warn => {
            if !confirm("execute? [y/N] ")? {
                println!();
                return Ok(());
            }
        }
        RiskAction::RequireConfirm => {
            if !confirm("this command requires confirmation — execute? [y/N] ")? {
                println!();
                return Ok(());
            }
        }
    }

    match brain
        .execute(session_id, view.argv, true, ExecutionMode::Background)
        .await
    {
        Ok(handle) => stream_events(brain, handle.execution_id, handle.events).await,
        Err(e @ (BrainError::RiskBlocked { .. } | BrainError::ConfirmationRequired { .. })) => {
            eprintln!("refused: {e}\n");
        }
        Err(e) => eprintln!("error: {e}\n"),
    }

    Ok(())
}

/// Print execution events as they arrive until the stream completes.
///
/// A subscription taken after the execution finished would never see its
/// `Complete` event, so an idle stream falls back to the snapshot.
async fn stream_events(
    brain: &Brain,
    execution_id: uuid::Uuid,
    mut events: tokio::sync::broadcast::Receiver<ExecEvent>,
) {
    loop {
        let event = tokio::time::timeout(std::time::Duration::from_millis(500), events.recv()).await;
        match event {
            Ok(Ok(ExecEvent::Output { stream, chunk })) => {
                let text = String::from_utf8_lossy(&chunk);
                match stream {
                    StreamKind::Out => print!("{text}"),
                    StreamKind::Err => eprint!("{text}"),
                }
                let _ = io::stdout().flush();
            }
            Ok(Ok(ExecEvent::Status { status })) => {
                info!(status = %status, "execution status");
            }
            Ok(Ok(ExecEvent::Complete {
                return_code,
                failure,
            })) => {
                match failure {
                    Some(failure) => println!("\n[exit {return_code:?}: {failure:?}]\n"),
                    None => println!("\n[exit {}]\n", return_code.unwrap_or(-1)),
                }
                return;
            }
            Ok(Err(_)) => return,
            Err(_elapsed) => {
                if let Ok(snapshot) = brain.execution(execution_id) {
                    if snapshot.status.is_terminal() {
                        println!(
                            "\n[{} exit {}]\n",
                            snapshot.status,
                            snapshot.return_code.unwrap_or(-1)
                        );
                        return;
                    }
                }
            }
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Render an argv for display only; execution never goes through a shell.
fn shell_quote(argv: &[String]) -> String {
    argv.iter()
        .map(|a| {
            if a.chars().any(char::is_whitespace) {
                format!("'{a}'")
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_spaces_only() {
        let argv = vec!["echo".to_string(), "hello there".to_string()];
        assert_eq!(shell_quote(&argv), "echo 'hello there'");
        assert_eq!(shell_quote(&["nmap".to_string()]), "nmap");
    }
}
