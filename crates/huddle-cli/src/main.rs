// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Huddle Contributors

//! Huddle CLI - console client for a Huddle chat server.
//!
//! Prompts for a recipient and a message in turn. Leave the recipient
//! empty to broadcast, or prefix it with `@` to post to a group.

use anyhow::{Context, Result};
use clap::Parser;
use huddle_router::transport::{split_tcp, DEFAULT_MAX_LINE_LENGTH};
use huddle_router::{ChatMessage, MessageSink, MessageSource};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::TcpStream;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const RECIPIENT_PROMPT: &str =
    "Enter recipient (leave empty for broadcast; add '@' for group name, e.g., '@group1'): ";
const MESSAGE_PROMPT: &str = "Enter message: ";

/// Huddle CLI - console chat client
#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Chat server address
    #[arg(short, long, env = "HUDDLE_SERVER", default_value = "127.0.0.1:50051")]
    server: String,

    /// Name to chat as (prompted if omitted)
    #[arg(short, long)]
    name: Option<String>,

    /// Longest accepted message line in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    max_line_length: usize,
}

type StdinLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they do not interleave with the chat.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let name = match cli.name {
        Some(name) => name,
        None => prompt(&mut input, "Enter your name: ")
            .await?
            .context("No name given")?,
    };

    let stream = TcpStream::connect(&cli.server)
        .await
        .with_context(|| format!("Could not connect to server at {}", cli.server))?;
    let (mut source, mut sink) = split_tcp(stream, cli.max_line_length);

    sink.send_message(&ChatMessage::handshake(&name))
        .await
        .context("Failed to send handshake")?;
    println!("Connected to {} as {}", cli.server, name);

    let mut receiver = tokio::spawn(async move {
        loop {
            match source.next_message().await {
                Ok(Some(message)) => println!("\n{}", format_incoming(&message)),
                Ok(None) => {
                    println!("\nServer closed the connection");
                    break;
                }
                Err(e) => {
                    eprintln!("\nError receiving message: {}", e);
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut receiver => break,
            outgoing = read_outgoing(&mut input, &name) => {
                let Some(message) = outgoing? else {
                    debug!("Input closed");
                    break;
                };
                sink.send_message(&message)
                    .await
                    .context("Error sending message")?;
            }
        }
    }

    receiver.abort();
    Ok(())
}

/// Print `label` and read one line; `None` on end of input.
async fn prompt(input: &mut StdinLines, label: &str) -> Result<Option<String>> {
    print!("{}", label);
    std::io::stdout().flush().context("Failed to flush stdout")?;
    input.next_line().await.context("Failed to read input")
}

/// Prompt for a recipient and a message.
async fn read_outgoing(input: &mut StdinLines, name: &str) -> Result<Option<ChatMessage>> {
    let Some(recipient) = prompt(input, RECIPIENT_PROMPT).await? else {
        return Ok(None);
    };
    let Some(text) = prompt(input, MESSAGE_PROMPT).await? else {
        return Ok(None);
    };
    Ok(Some(outgoing_message(name, &recipient, &text)))
}

fn outgoing_message(name: &str, recipient: &str, text: &str) -> ChatMessage {
    ChatMessage::new(name, recipient.trim(), text)
}

fn format_incoming(message: &ChatMessage) -> String {
    format!("[{}]: {}", message.sender, message.text)
}
