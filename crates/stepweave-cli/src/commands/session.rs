//! `stepweave session` — Session lifecycle and interactive driving.

use async_trait::async_trait;
use console::style;
use serde_json::json;

use stepweave_core::models::session::UserInput;
use stepweave_core::models::step::NextStep;
use stepweave_core::orchestration::{
    CancelHandle, CancelSignal, InputSource, ScriptedInput, SessionOutcome, SessionReport,
};
use stepweave_core::replay::Recording;
use stepweave_core::state::EngineState;
use stepweave_core::store::{Mutation, StateStore};
use stepweave_core::HandBack;

use super::{print_json, to_json};

pub async fn new(state: &EngineState, session_id: Option<&str>) -> Result<(), String> {
    let id = state
        .store
        .create_session(session_id)
        .await
        .map_err(|e| e.to_string())?;
    let next = state.coordinator.resolve(&id).await.map_err(|e| e.to_string())?;
    print_json(&json!({
        "sessionId": id,
        "workflow": state.schema.name(),
        "next": to_json(&next)?,
    }));
    Ok(())
}

/// Reads answers from the terminal. `quit` or `:q` suspends the session.
struct TerminalInput;

#[async_trait]
impl InputSource for TerminalInput {
    async fn next_input(&mut self, next: &NextStep, prompt: &str) -> Option<UserInput> {
        println!();
        println!("{} {}", style("▶").cyan(), style(&next.target).bold());
        println!("{}", style(&next.reason).dim());
        println!("{}", prompt);

        let answer = tokio::task::spawn_blocking(|| {
            dialoguer::Input::<String>::new()
                .with_prompt(">")
                .allow_empty(true)
                .interact_text()
        })
        .await;

        match answer {
            Ok(Ok(text)) if matches!(text.trim(), ":q" | "quit") => None,
            Ok(Ok(text)) => Some(UserInput::new(text)),
            Ok(Err(e)) => {
                tracing::warn!("Input closed: {}", e);
                None
            }
            Err(_) => None,
        }
    }
}

/// Drive a session interactively. Ctrl-C cancels the turn in flight; the
/// stored document stays at its last committed write.
pub async fn run(state: &EngineState, session_id: &str) -> Result<(), String> {
    let (handle, signal) = CancelHandle::new();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    println!("Stepweave — {}", state.schema.name());
    println!("══════════════════════════════════════");
    println!("Session: {}", session_id);
    println!("Type 'quit' to stop; the session can be resumed later.");

    let result = state
        .run_session(session_id, &mut TerminalInput, &signal)
        .await
        .map_err(|e| e.to_string());
    watcher.abort();
    let report = result?;

    println!();
    for turn in &report.turns {
        if let Some(message) = hand_back_message(&turn.hand_back) {
            println!("  {} {}: {}", style("✓").green(), turn.step_id, message);
        }
    }
    match &report.outcome {
        SessionOutcome::Completed { .. } => {
            println!("{}", style("Session complete.").green().bold());
            Ok(())
        }
        SessionOutcome::Suspended { next, .. } => {
            println!("Session saved at step '{}'.", next.target);
            Ok(())
        }
        SessionOutcome::Halted { error, .. } => Err(error.user_report()),
    }
}

/// Feed one answer to the pending step, then keep going until the next
/// step needs input.
pub async fn step(state: &EngineState, session_id: &str, input: &str) -> Result<(), String> {
    let mut source = ScriptedInput::new([input]);
    let report = state
        .run_session(session_id, &mut source, &CancelSignal::never())
        .await
        .map_err(|e| e.to_string())?;
    print_json(&report_json(&report)?);
    match &report.outcome {
        SessionOutcome::Halted { error, .. } => Err(error.user_report()),
        _ => Ok(()),
    }
}

pub async fn show(state: &EngineState, session_id: &str, with_turns: bool) -> Result<(), String> {
    let (document, version) = state.store.read(session_id).await.map_err(|e| e.to_string())?;
    let next = match state.coordinator.resolve_state(&document) {
        Ok(next) => to_json(&next)?,
        Err(e) => json!({ "error": e.to_string() }),
    };
    let mut output = json!({
        "sessionId": session_id,
        "workflow": state.schema.name(),
        "version": version,
        "state": to_json(&document)?,
        "next": next,
    });
    if with_turns {
        let turns = state
            .turn_store
            .list(session_id)
            .await
            .map_err(|e| e.to_string())?;
        output["turns"] = to_json(&turns)?;
    }
    print_json(&output);
    Ok(())
}

pub async fn resolve(state: &EngineState, session_id: &str) -> Result<(), String> {
    let next = state
        .coordinator
        .resolve(session_id)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&to_json(&next)?);
    Ok(())
}

pub async fn edit(state: &EngineState, session_id: &str, step: &str) -> Result<(), String> {
    if !state.schema.is_declared(step) {
        return Err(format!("Unknown step '{}' in workflow '{}'", step, state.schema.name()));
    }
    change_mode(
        state,
        session_id,
        Mutation::EnterEdit {
            step: step.to_string(),
        },
    )
    .await
}

pub async fn review(state: &EngineState, session_id: &str) -> Result<(), String> {
    change_mode(state, session_id, Mutation::EnterReview).await
}

async fn change_mode(state: &EngineState, session_id: &str, mutation: Mutation) -> Result<(), String> {
    let (_, version) = state.store.read(session_id).await.map_err(|e| e.to_string())?;
    let version = state
        .store
        .write(session_id, version, &[mutation])
        .await
        .map_err(|e| e.to_string())?;
    let next = state
        .coordinator
        .resolve(session_id)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&json!({
        "sessionId": session_id,
        "version": version,
        "next": to_json(&next)?,
    }));
    Ok(())
}

pub async fn list(state: &EngineState) -> Result<(), String> {
    let sessions = state.store.list_sessions().await.map_err(|e| e.to_string())?;
    print_json(&json!({ "sessions": to_json(&sessions)? }));
    Ok(())
}

pub async fn delete(state: &EngineState, session_id: &str) -> Result<(), String> {
    state.store.delete(session_id).await.map_err(|e| e.to_string())?;
    println!("Deleted session {}", session_id);
    Ok(())
}

pub async fn export(state: &EngineState, session_id: &str, out: Option<&str>) -> Result<(), String> {
    // Fail on unknown ids rather than exporting an empty recording.
    state.store.read(session_id).await.map_err(|e| e.to_string())?;
    let inputs = state
        .turn_store
        .inputs(session_id)
        .await
        .map_err(|e| e.to_string())?;
    let yaml = Recording::new(state.schema.name(), inputs)
        .to_yaml()
        .map_err(|e| e.to_string())?;

    match out {
        Some(path) => {
            std::fs::write(path, yaml)
                .map_err(|e| format!("Failed to write recording '{}': {}", path, e))?;
            println!("Recording written to {}", path);
        }
        None => print!("{}", yaml),
    }
    Ok(())
}

fn hand_back_message(hand_back: &HandBack) -> Option<&str> {
    match hand_back {
        HandBack::Completed { message } => message.as_deref(),
        HandBack::Yielded { message } => Some(message),
        HandBack::NeedsInput { .. } => None,
    }
}

/// JSON view of a coordinator run.
pub fn report_json(report: &SessionReport) -> Result<serde_json::Value, String> {
    let mut output = json!({
        "sessionId": report.session_id,
        "version": report.state().version,
        "completedSteps": report.state().completed_steps,
        "turns": to_json(&report.turns)?,
    });
    match &report.outcome {
        SessionOutcome::Completed { .. } => {
            output["outcome"] = json!("completed");
        }
        SessionOutcome::Suspended { next, prompt, .. } => {
            output["outcome"] = json!("suspended");
            output["next"] = to_json(next)?;
            output["prompt"] = json!(prompt);
        }
        SessionOutcome::Halted { error, .. } => {
            output["outcome"] = json!("halted");
            output["error"] = json!(error.user_message());
            output["detail"] = json!(error.to_string());
        }
    }
    Ok(output)
}
