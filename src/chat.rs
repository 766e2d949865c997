use std::io::{self, Write};

use anyhow::{Context, Result};
use serde_json::json;

use crate::error::format_cli_error;
use crate::pipeline::Pipeline;
use crate::streaming::{ChunkPrinter, print_outcome};
use crate::telemetry::TelemetrySink;
use crate::todos::{TodoFilter, TodoStatus, TodoStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Exit,
    Help,
    Agents,
    Todos(Option<TodoStatus>),
    Plan(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedChatCommand {
    NotACommand,
    Command(ChatCommand),
    MissingArgument { usage: &'static str },
    InvalidArgument { usage: &'static str },
    UnknownCommand(String),
}

pub fn parse_chat_command(input: &str) -> ParsedChatCommand {
    let trimmed = input.trim();

    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("/exit") {
        return ParsedChatCommand::Command(ChatCommand::Exit);
    }

    if !trimmed.starts_with('/') {
        return ParsedChatCommand::NotACommand;
    }

    let slashless = trimmed.trim_start_matches('/');
    if slashless.is_empty() {
        return ParsedChatCommand::UnknownCommand("/".to_string());
    }

    let mut parts = slashless.splitn(2, char::is_whitespace);
    let command = parts
        .next()
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match command.as_str() {
        "exit" | "quit" => ParsedChatCommand::Command(ChatCommand::Exit),
        "help" => ParsedChatCommand::Command(ChatCommand::Help),
        "agents" => ParsedChatCommand::Command(ChatCommand::Agents),
        "todos" => {
            if arg.is_empty() {
                return ParsedChatCommand::Command(ChatCommand::Todos(None));
            }
            match serde_json::from_value::<TodoStatus>(json!(arg.to_ascii_lowercase())) {
                Ok(status) => ParsedChatCommand::Command(ChatCommand::Todos(Some(status))),
                Err(_) => ParsedChatCommand::InvalidArgument {
                    usage: "/todos [pending|in_progress|completed]",
                },
            }
        }
        "plan" => {
            if arg.is_empty() {
                ParsedChatCommand::MissingArgument {
                    usage: "/plan <message>",
                }
            } else {
                ParsedChatCommand::Command(ChatCommand::Plan(arg.to_string()))
            }
        }
        other => ParsedChatCommand::UnknownCommand(format!("/{other}")),
    }
}

pub fn print_chat_help() {
    println!("Chat commands:");
    println!("- /help: show command quick reference");
    println!("- /agents: list registered agents");
    println!("- /todos [status]: show the todo list, optionally filtered by status");
    println!("- /plan <message>: show the plan for a message without running it");
    println!("- /exit: end interactive chat");
    println!("Anything else is routed: conversation streams a reply, requests run as steps.");
}

pub fn print_agents(pipeline: &Pipeline) {
    let registry = pipeline.registry();
    if registry.is_empty() {
        println!("No agents registered.");
        return;
    }
    println!("Agents:");
    for descriptor in registry.descriptors() {
        println!(
            "- {} (tool: {}): {}",
            descriptor.name, descriptor.input_schema.name, descriptor.description
        );
    }
}

pub fn print_todos(store: &TodoStore, filter: &TodoFilter) -> Result<()> {
    let records = store.list(filter)?;
    if records.is_empty() {
        println!("No todo records at '{}'.", store.path().display());
        return Ok(());
    }
    for record in records {
        let mark = match record.status {
            TodoStatus::Completed => "✓",
            TodoStatus::InProgress => "…",
            TodoStatus::Pending => " ",
        };
        let mut line = format!("[{mark}] {}: {}", record.id, record.description);
        if let Some(priority) = record.priority {
            line.push_str(&format!(" (priority: {})", priority.label()));
        }
        if let Some(due) = record.due_date {
            line.push_str(&format!(" (due: {due})"));
        }
        println!("{line}");
    }
    Ok(())
}

pub async fn run_chat(
    pipeline: &Pipeline,
    store: &TodoStore,
    telemetry: &TelemetrySink,
) -> Result<()> {
    telemetry.emit(
        "chat.started",
        json!({ "model": pipeline.model_name(), "agents": pipeline.registry().len() }),
    );
    tracing::info!(model = %pipeline.model_name(), "Using model");
    println!("Interactive mode started. Type /help for commands or /exit to quit.");

    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("router> ");
        io::stdout().flush().context("failed to flush stdout")?;
        line.clear();
        let read = stdin
            .read_line(&mut line)
            .context("failed to read input from stdin")?;
        if read == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match parse_chat_command(input) {
            ParsedChatCommand::NotACommand => {}
            ParsedChatCommand::MissingArgument { usage }
            | ParsedChatCommand::InvalidArgument { usage } => {
                println!("Usage: {usage}");
                continue;
            }
            ParsedChatCommand::UnknownCommand(command) => {
                println!("Unknown command '{command}'. Use /help.");
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Exit) => break,
            ParsedChatCommand::Command(ChatCommand::Help) => {
                print_chat_help();
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Agents) => {
                print_agents(pipeline);
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Todos(status)) => {
                let filter = TodoFilter {
                    status,
                    ..TodoFilter::default()
                };
                if let Err(err) = print_todos(store, &filter) {
                    eprintln!("{}", format_cli_error(&err));
                }
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Plan(message)) => {
                match pipeline.plan(&message).await {
                    Ok(plan) => println!("{}", serde_json::to_string_pretty(&plan)?),
                    Err(err) => eprintln!("{}", format_cli_error(&err)),
                }
                continue;
            }
        }

        let mut printer = ChunkPrinter::new();
        match pipeline.run(input, |chunk| printer.print(chunk)).await {
            Ok(outcome) => {
                if matches!(outcome, crate::pipeline::Outcome::Conversational { .. }) {
                    printer.finish();
                }
                print_outcome(&outcome);
            }
            Err(err) => eprintln!("{}", format_cli_error(&err)),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_chat_command("add milk"), ParsedChatCommand::NotACommand);
        assert_eq!(
            parse_chat_command("exit"),
            ParsedChatCommand::Command(ChatCommand::Exit)
        );
    }

    #[test]
    fn todos_accepts_status_aliases() {
        assert_eq!(
            parse_chat_command("/todos"),
            ParsedChatCommand::Command(ChatCommand::Todos(None))
        );
        assert_eq!(
            parse_chat_command("/todos done"),
            ParsedChatCommand::Command(ChatCommand::Todos(Some(TodoStatus::Completed)))
        );
        assert!(matches!(
            parse_chat_command("/todos someday"),
            ParsedChatCommand::InvalidArgument { .. }
        ));
    }

    #[test]
    fn plan_requires_a_message() {
        assert!(matches!(
            parse_chat_command("/plan"),
            ParsedChatCommand::MissingArgument { .. }
        ));
        assert_eq!(
            parse_chat_command("/PLAN add eggs"),
            ParsedChatCommand::Command(ChatCommand::Plan("add eggs".to_string()))
        );
        assert_eq!(
            parse_chat_command("/compact"),
            ParsedChatCommand::UnknownCommand("/compact".to_string())
        );
    }
}
