#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test file uses every helper"
)]

use std::net::SocketAddr;
use std::time::Duration;

use eftl_client::{Config, Connection};
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

pub const CHANNEL: &str = "/channel";
pub const CLIENT_ID: &str = "C1";

enum ServerCommand {
    Send(String),
    Close,
}

/// Mock eFTL server accepting a single client.
pub struct MockEftlServer {
    pub addr: SocketAddr,
    /// Frames to write to the client
    command_tx: mpsc::UnboundedSender<ServerCommand>,
    /// Text frames received from the client
    received_rx: mpsc::UnboundedReceiver<String>,
}

impl MockEftlServer {
    /// Start a mock server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<ServerCommand>();
        let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            let (mut write, mut read) = ws_stream.split();

            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                drop(received_tx.send(text.to_string()));
                            }
                            Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        }
                    }
                    command = command_rx.recv() => {
                        match command {
                            Some(ServerCommand::Send(text)) => {
                                if write.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            Some(ServerCommand::Close) | None => {
                                drop(write.send(Message::Close(None)).await);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            addr,
            command_tx,
            received_rx,
        }
    }

    pub fn server(&self) -> String {
        self.addr.to_string()
    }

    /// Write a frame to the client.
    pub fn send(&self, frame: &Value) {
        drop(self.command_tx.send(ServerCommand::Send(frame.to_string())));
    }

    /// Write raw text to the client.
    pub fn send_text(&self, text: &str) {
        drop(self.command_tx.send(ServerCommand::Send(text.to_owned())));
    }

    /// Close the socket from the server side.
    pub fn close(&self) {
        drop(self.command_tx.send(ServerCommand::Close));
    }

    /// Next raw frame received from the client.
    pub async fn recv_text(&mut self) -> Option<String> {
        timeout(Duration::from_secs(2), self.received_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next frame received from the client, parsed.
    pub async fn recv(&mut self) -> Value {
        let text = self.recv_text().await.expect("no frame from client");
        serde_json::from_str(&text).unwrap()
    }

    /// Connect a client to this server.
    pub async fn connect(&self, config: Config) -> Connection {
        Connection::connect(&self.server(), CHANNEL, config)
            .await
            .unwrap()
    }

    /// Connect a client and complete its login with `welcome`.
    pub async fn logged_in_with(&mut self, config: Config, welcome: Value) -> Connection {
        let connection = self.connect(config).await;

        let login = tokio::spawn({
            let connection = connection.clone();
            async move { connection.login("alice", "secret").await }
        });

        let request = self.recv().await;
        assert_eq!(request["op"], 1);
        self.send(&welcome);

        login.await.unwrap().unwrap();
        connection
    }

    /// Connect a client and log it in with [`welcome`].
    pub async fn logged_in(&mut self) -> Connection {
        self.logged_in_with(Config::default(), welcome()).await
    }
}

#[must_use]
pub fn welcome() -> Value {
    json!({
        "op": 2,
        "client_id": CLIENT_ID,
        "id_token": "T1",
        "timeout": 600,
        "heartbeat": 240,
        "max_size": 8192,
        "_qos": "true"
    })
}

#[must_use]
pub fn event(to: &str, seq: u64, destination: &str, text: &str) -> Value {
    json!({
        "op": 7,
        "to": to,
        "seq": seq,
        "body": { "_dest": destination, "text": text, "number": seq }
    })
}
