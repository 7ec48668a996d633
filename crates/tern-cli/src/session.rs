use anyhow::Result;
use bat::PrettyPrinter;
use cliclack::{input, spinner};
use console::style;
use futures::StreamExt;

use tern::agent::{Agent, ReplyEvent};
use tern::models::message::Message;

/// An interactive chat session owning its conversation history. History
/// lives only for the life of the session; nothing is persisted.
pub struct Session {
    agent: Agent,
    messages: Vec<Message>,
}

impl Session {
    pub fn new(agent: Agent) -> Self {
        Session {
            agent,
            messages: Vec::new(),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        println!(
            "Tern chat {}",
            style("- type \"exit\" to end the session, \"clear\" to wipe history").dim()
        );
        println!();

        loop {
            let message_text: String = input("Message:").placeholder("").multiline().interact()?;
            let trimmed = message_text.trim();

            if trimmed.eq_ignore_ascii_case("exit") {
                break;
            }
            if trimmed.eq_ignore_ascii_case("clear") {
                self.messages.clear();
                println!("{}", style("History cleared.").dim());
                continue;
            }
            if trimmed.is_empty() {
                continue;
            }

            self.messages.push(Message::user().with_text(trimmed));
            self.process_turn().await;
        }

        Ok(())
    }

    /// Run one reply turn, fold the yielded messages into the owned
    /// history, and render the answer. Tool traffic is not displayed
    /// beyond a one-line notice per tool run.
    async fn process_turn(&mut self) {
        let spin = spinner();
        spin.start("awaiting reply");

        let mut pending: Vec<Message> = Vec::new();
        let mut tool_notices: Vec<String> = Vec::new();
        let mut answer = String::new();

        {
            let mut events = self.agent.reply(&self.messages);
            while let Some(event) = events.next().await {
                match event {
                    ReplyEvent::ToolCalls(message) => {
                        for request in message.tool_requests() {
                            if let Ok(call) = &request.tool_call {
                                tool_notices.push(format!("ran {}", call.name));
                            }
                        }
                        pending.push(message);
                    }
                    ReplyEvent::ToolResults(message) => {
                        pending.push(message);
                    }
                    ReplyEvent::Chunk(_) => {
                        // fragments are accumulated into the final Answer
                    }
                    ReplyEvent::Answer(message) => {
                        answer = message.text();
                        pending.push(message);
                    }
                }
            }
        }

        self.messages.extend(pending);
        spin.stop("");

        for notice in &tool_notices {
            println!("{}", style(format!("  {}", notice)).dim());
        }
        render(&answer).await;
        println!();
    }
}

async fn render(content: &str) {
    PrettyPrinter::new()
        .input_from_bytes(content.as_bytes())
        .language("markdown")
        .print()
        .unwrap();
}
