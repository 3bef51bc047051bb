use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";

#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
enum Command<'a> {
    Connect { username: &'a str },
}

struct Args {
    url: String,
    username: Option<String>,
}

fn parse_args() -> Result<Args, Box<dyn std::error::Error>> {
    let mut url = DEFAULT_URL.to_string();
    let mut username = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--url" => {
                url = args.next().ok_or("--url requires a value")?;
            }
            _ if username.is_none() => username = Some(arg),
            other => return Err(format!("unexpected argument: {other}").into()),
        }
    }
    Ok(Args { url, username })
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args()?;

    println!("ws-dev-client: connecting to {}", args.url);
    let socket = loop {
        match connect_async(args.url.as_str()).await {
            Ok((socket, _)) => break socket,
            Err(_) => tokio::time::sleep(Duration::from_millis(250)).await,
        }
    };
    println!("ws-dev-client: connected");

    let (mut write, mut read) = socket.split();

    if let Some(username) = args.username.as_deref() {
        let cmd = serde_json::to_string(&Command::Connect { username })?;
        write.send(Message::Text(cmd)).await?;
        println!("-> connect {username}");
    }

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text)?;
                let event = value
                    .get("event")
                    .and_then(|e| e.as_str())
                    .unwrap_or("unknown");
                println!("<- {} {}", event, serde_json::to_string(&value)?);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    println!("ws-dev-client: server closed the connection");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run().await
}
