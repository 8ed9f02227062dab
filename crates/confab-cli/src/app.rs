use anyhow::Result;
use confab_core::{GenerationController, StoreEvent, TurnOptions, TurnOutcome};
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::commands::{handle_command, CommandResult};
use crate::view::{format_providers, format_threads, resolve_thread, short_id, Renderer};

type PendingTurn = Pin<Box<dyn Future<Output = TurnOutcome> + Send>>;

async fn wait_turn(turn: &mut Option<PendingTurn>) -> TurnOutcome {
    match turn {
        Some(turn) => turn.await,
        None => std::future::pending().await,
    }
}

fn print_flush(text: &str) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

fn prompt() {
    print_flush("\n> ");
}

fn show(renderer: &mut Renderer, event: Result<StoreEvent, RecvError>) -> bool {
    match event {
        Ok(event) => {
            if let Some(text) = renderer.render(&event) {
                print_flush(&text);
            }
            true
        }
        Err(RecvError::Lagged(skipped)) => {
            warn!("Renderer skipped {skipped} store events");
            true
        }
        Err(RecvError::Closed) => false,
    }
}

fn drain(renderer: &mut Renderer, events: &mut broadcast::Receiver<StoreEvent>) {
    while let Ok(event) = events.try_recv() {
        if let Some(text) = renderer.render(&event) {
            print_flush(&text);
        }
    }
}

/// One turn in a fresh thread, streamed to stdout.
pub async fn run_single_prompt(
    controller: &GenerationController,
    prompt: &str,
    options: TurnOptions,
) -> Result<()> {
    let mut events = controller.store().subscribe();
    let mut renderer = Renderer::new();

    controller.store().create_thread();
    let mut turn: Option<PendingTurn> =
        Some(Box::pin(controller.start_turn(prompt, options)?.wait()));

    let outcome = loop {
        tokio::select! {
            biased;
            event = events.recv() => {
                show(&mut renderer, event);
            }
            outcome = wait_turn(&mut turn) => break outcome,
        }
    };
    drain(&mut renderer, &mut events);
    println!();

    match outcome {
        TurnOutcome::Failed(message) => anyhow::bail!(message),
        TurnOutcome::Completed | TurnOutcome::Cancelled => Ok(()),
    }
}

/// Line-oriented chat. Input is read while an answer streams, so a new
/// message or `/stop` interrupts it.
pub async fn run_repl(controller: GenerationController, options: TurnOptions) -> Result<()> {
    let mut events = controller.store().subscribe();
    let mut renderer = Renderer::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut turn: Option<PendingTurn> = None;

    println!(
        "Confab v{} using {}. Type /help for commands.",
        env!("CARGO_PKG_VERSION"),
        controller.default_provider()
    );
    prompt();

    loop {
        tokio::select! {
            event = events.recv() => {
                if !show(&mut renderer, event) {
                    break;
                }
            }
            outcome = wait_turn(&mut turn) => {
                turn = None;
                drain(&mut renderer, &mut events);
                if let TurnOutcome::Failed(message) = outcome {
                    eprintln!("\n[{message}]");
                }
                prompt();
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    if turn.is_none() {
                        prompt();
                    }
                    continue;
                }

                match handle_command(line) {
                    CommandResult::Quit => break,
                    CommandResult::NotACommand => {
                        println!();
                        match controller.start_turn(line, options.clone()) {
                            Ok(handle) => turn = Some(Box::pin(handle.wait())),
                            Err(e) => {
                                drain(&mut renderer, &mut events);
                                eprintln!("\n[{e}]");
                                prompt();
                            }
                        }
                    }
                    CommandResult::Retry => {
                        println!();
                        match controller.retry_last_turn(options.clone()) {
                            Ok(handle) => turn = Some(Box::pin(handle.wait())),
                            Err(e) => {
                                drain(&mut renderer, &mut events);
                                eprintln!("\n[{e}]");
                                prompt();
                            }
                        }
                    }
                    other => {
                        let reply = run_command(&controller, other);
                        drain(&mut renderer, &mut events);
                        println!("{reply}");
                        if turn.is_none() {
                            prompt();
                        }
                    }
                }
            }
        }
    }

    controller.cancel();
    controller.store().flush()?;
    Ok(())
}

/// Apply a command that does not start a turn; returns the text to show.
fn run_command(controller: &GenerationController, command: CommandResult) -> String {
    let store = controller.store();
    match command {
        CommandResult::Message(text) => text,
        CommandResult::Stop => {
            if controller.cancel() {
                String::new()
            } else {
                "Nothing is running.".to_string()
            }
        }
        CommandResult::NewThread => {
            controller.cancel();
            let id = store.create_thread();
            format!("Started thread {}.", short_id(&id))
        }
        CommandResult::ListThreads => {
            format_threads(&store.threads(), store.current_thread_id().as_deref())
        }
        CommandResult::SwitchThread(prefix) => match resolve_thread(&store.threads(), &prefix) {
            Ok(id) => {
                store.select_thread(&id);
                let title = store.thread(&id).map(|t| t.title).unwrap_or_default();
                format!("Switched to {} ({title}).", short_id(&id))
            }
            Err(message) => message,
        },
        CommandResult::RenameThread(title) => match store.current_thread_id() {
            Some(id) => {
                store.rename_thread(&id, title.as_str());
                format!("Renamed to {title}.")
            }
            None => "No thread selected.".to_string(),
        },
        CommandResult::DeleteThread => match store.current_thread_id() {
            Some(id) => {
                controller.delete_thread(&id);
                format!("Deleted thread {}.", short_id(&id))
            }
            None => "No thread selected.".to_string(),
        },
        CommandResult::ShowProvider => format!("Provider: {}", controller.default_provider()),
        CommandResult::ProviderChanged(id) => match controller.set_provider(&id) {
            Ok(()) => format!("Provider set to {id}."),
            Err(e) => format!("{e}. Type /providers to list them."),
        },
        CommandResult::ListProviders => {
            format_providers(&controller.providers(), &controller.default_provider())
        }
        CommandResult::Quit | CommandResult::Retry | CommandResult::NotACommand => String::new(),
    }
}
