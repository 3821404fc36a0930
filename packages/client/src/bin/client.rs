//! Terminal chat shell for the Hiroba relay client.
//!
//! Connects to a relay server room, prints chat and presence updates, and
//! sends lines from stdin as chat messages. Two commands are recognized:
//! `/who` prints the room roster, `/reply <message-id> <text>` replies to an
//! earlier message (ids are shown next to each message).
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hiroba-client -- --username Alice
//! cargo run --bin hiroba-client -- -u ws://relay.example.com/ws -r lobby -n Bob
//! ```

use std::io::Write;

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use hiroba_client::formatter::MessageFormatter;
use hiroba_client::{ChatReplyTo, RelayClient, RelayOptions};
use hiroba_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "hiroba-client")]
#[command(about = "Relay chat client with room presence and replies", long_about = None)]
struct Args {
    /// Relay server base URL
    #[arg(short = 'u', long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Room to join
    #[arg(short = 'r', long, default_value = "lobby")]
    room: String,

    /// Display name announced to peers
    #[arg(short = 'n', long)]
    username: String,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "warn");

    let args = Args::parse();

    let client = RelayClient::new(RelayOptions {
        url: args.url,
        room_id: args.room.clone(),
        username: args.username.clone(),
    });
    if let Err(e) = client.connect() {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }

    println!(
        "\nJoining '{}' as '{}'. Type messages and press Enter to send. Press Ctrl+C to exit.\n",
        args.room, args.username
    );

    // Create channel for rustyline input
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();

    // Spawn a blocking thread for rustyline (synchronous readline)
    let prompt_name = args.username.clone();
    let _readline_handle = std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        let prompt = format!("{}> ", prompt_name);

        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if !line.is_empty() {
                        rl.add_history_entry(&line).ok();
                        if input_tx.send(line).is_err() {
                            // Channel closed, exit thread
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    // Ctrl+D
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    let mut history_rx = client.history().subscribe();
    let mut connection_rx = client.subscribe_connection();
    let mut printed = 0usize;

    loop {
        tokio::select! {
            changed = history_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = history_rx.borrow_and_update().clone();
                if snapshot.len() < printed {
                    // History was cleared (disconnect); start over.
                    printed = 0;
                }
                for entry in snapshot.iter().skip(printed) {
                    print!("{}", MessageFormatter::format_entry(entry));
                }
                printed = snapshot.len();
                redisplay_prompt(&args.username);
            }
            changed = connection_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let info = *connection_rx.borrow_and_update();
                print!("\n[{}]\n", MessageFormatter::format_connection(&info));
                redisplay_prompt(&args.username);
            }
            line = input_rx.recv() => match line {
                Some(line) => handle_line(&client, &line),
                // Input thread ended (Ctrl+C / Ctrl+D)
                None => break,
            },
        }
    }

    client.disconnect();
}

/// Interpret one input line: a command, or plain chat text.
fn handle_line(client: &RelayClient, line: &str) {
    if line == "/who" {
        print!(
            "{}",
            MessageFormatter::format_roster(&client.presence().snapshot())
        );
        return;
    }

    if let Some(rest) = line.strip_prefix("/reply ") {
        let mut parts = rest.splitn(2, ' ');
        let (Some(id), Some(text)) = (parts.next(), parts.next()) else {
            println!("usage: /reply <message-id> <text>");
            return;
        };
        match client.history().find_by_id(id) {
            Some(target) => {
                client.send_chat(
                    text,
                    Some(ChatReplyTo {
                        id: target.id,
                        text: target.text,
                        username: target.username,
                    }),
                );
            }
            None => println!("no such message: {}", id),
        }
        return;
    }

    client.send_chat(line, None);
}

/// Redisplay the prompt after printing asynchronous output
fn redisplay_prompt(username: &str) {
    print!("{}> ", username);
    std::io::stdout().flush().ok();
}
