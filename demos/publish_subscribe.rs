//! Publish and subscribe against an eFTL server.
//!
//! Logs in, subscribes to a destination, publishes a few messages to it and
//! prints what comes back.
//!
//! Run with tracing enabled:
//! ```sh
//! EFTL_SERVER=localhost:9191 EFTL_USER=alice EFTL_PASSWORD=secret \
//!     RUST_LOG=info cargo run --example publish_subscribe --features tracing
//! ```

use std::env;
use std::time::Duration;

use eftl_client::{Config, Connection, Frame};
use futures::StreamExt as _;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let server = env::var("EFTL_SERVER").unwrap_or_else(|_| "localhost:9191".to_owned());
    let channel = env::var("EFTL_CHANNEL").unwrap_or_else(|_| "/channel".to_owned());
    let user = env::var("EFTL_USER").unwrap_or_default();
    let password = env::var("EFTL_PASSWORD").unwrap_or_default();

    let config = Config::builder()
        .request_timeout(Duration::from_secs(10))
        .build();
    let connection = Connection::connect(&server, &channel, config).await?;
    info!(endpoint = %connection.endpoint(), state = %connection.state());

    connection.login(&user, &password).await?;
    let session = connection.session();
    info!(
        client_id = ?session.client_id,
        max_message_size = session.max_message_size,
        qos = session.qos,
        "Logged in"
    );

    let mut messages = Box::pin(connection.messages());
    let mut frames = Box::pin(connection.frames());

    let id = connection.subscribe(r#"{"_dest":"demo"}"#, None).await?;
    info!(subscription = %id, "Subscribed");

    for i in 1..=5 {
        let seq = connection.publish(&format!("hello #{i}"), "demo").await?;
        debug!(seq, "Published");
    }

    let mut count = 0;
    while let Ok(Some(result)) = timeout(Duration::from_secs(5), messages.next()).await {
        match result {
            Ok(event) => {
                info!(
                    to = %event.to,
                    destination = %event.destination(),
                    text = %event.text(),
                    number = event.number()
                );
                count += 1;
                if count >= 5 {
                    break;
                }
            }
            Err(e) => warn!(error = %e),
        }
    }
    info!(received = count);

    // Drain acknowledgements that already arrived.
    while let Ok(Some(Ok(frame))) = timeout(Duration::from_millis(100), frames.next()).await {
        if let Frame::Ack(ack) = frame {
            debug!(seq = ack.seq, "Acknowledged");
        }
    }
    info!(last_acknowledged = connection.last_acknowledged());

    connection.unsubscribe(&id).await?;
    connection.close().await?;
    info!(state = %connection.state());

    Ok(())
}
