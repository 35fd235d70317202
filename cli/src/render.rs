use console::style;
use tooloop_core::{ConversationTurn, LoopEvent, LoopObserver, LoopResult};

/// Prints loop progress to stderr as it happens.
pub struct ConsoleObserver;

impl LoopObserver for ConsoleObserver {
    fn on_event(&self, event: &LoopEvent) {
        match event {
            LoopEvent::IterationStarted { iteration } => {
                eprintln!("{}", style(format!("… thinking (turn {})", iteration)).dim());
            }
            LoopEvent::ToolStarted { name, .. } => {
                eprintln!("{} {}", style("→").cyan(), name);
            }
            LoopEvent::ToolFinished { name, is_error, .. } => {
                if *is_error {
                    eprintln!("{} {} reported an error", style("✗").red(), name);
                }
            }
            LoopEvent::ToolRejected { name, .. } => {
                eprintln!("{} {} is not allowed", style("✗").yellow(), name);
            }
            LoopEvent::AssistantReplied { .. } | LoopEvent::Finished { .. } => {}
        }
    }
}

pub fn result(result: &LoopResult) {
    for turn in result.turns() {
        match turn {
            ConversationTurn::User { content } => {
                println!("{} {}", style("user:").bold(), content);
            }
            ConversationTurn::Assistant(assistant) => {
                if !assistant.content.is_empty() {
                    println!("{} {}", style("assistant:").bold().green(), assistant.content);
                }
                for call in &assistant.tool_calls {
                    println!(
                        "{} {}({})",
                        style("tool call:").bold().cyan(),
                        call.name,
                        call.arguments
                    );
                }
            }
            ConversationTurn::ToolResult {
                content, is_error, ..
            } => {
                let label = if *is_error {
                    style("tool error:").bold().red()
                } else {
                    style("tool result:").bold().cyan()
                };
                println!("{} {}", label, content.trim_end());
            }
        }
    }

    println!();
    match result {
        LoopResult::Completed { .. } => println!("{}", style("completed").green()),
        LoopResult::IterationLimitExceeded { .. } => {
            println!("{}", style("stopped: iteration limit reached").yellow())
        }
        LoopResult::TimedOut { .. } => println!("{}", style("stopped: timed out").yellow()),
        LoopResult::Cancelled { .. } => println!("{}", style("cancelled").yellow()),
        LoopResult::ProviderFailed { reason, .. } => {
            println!("{} {}", style("provider failed:").red(), reason)
        }
        LoopResult::ToolFailed {
            tool_call_id,
            reason,
            ..
        } => println!(
            "{} {} ({})",
            style("tool registry failed:").red(),
            reason,
            tool_call_id
        ),
    }
}
