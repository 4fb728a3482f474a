//! Connects to a scripted in-memory spa, watches a value change and
//! turns a pump on.
//!
//! Run with `cargo run --example simulated_spa`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::sleep;

use spalink_client::message::{FirmwareVersion, Message};
use spalink_client::session::{SessionConfig, SpaSession};
use spalink_client::transport::{ChannelTransport, DeviceEndpoint};
use spalink_client::{SessionEvent, SpaDescriptor};
use spalink_core::types::Value;
use spalink_packs::registry::PackRegistry;

/// Answer the protocol on behalf of a pretend inYT spa
async fn run_device(mut endpoint: DeviceEndpoint) {
    let mut status = vec![0u8; 480];
    status[0] = 1; // ConfigNumber
    status[1..3].copy_from_slice(&374u16.to_be_bytes()); // SetpointG
    status[260..262].copy_from_slice(&368u16.to_be_bytes()); // DisplayedTempG
    status[289] = 10; // PackType
    status[290..292].copy_from_slice(&6503u16.to_be_bytes()); // PackConfID
    status[292] = 4; // PackConfRev
    status[293] = 1; // PackConfRel

    while let Some((message, _)) = endpoint.recv().await {
        let reply = match &message {
            Message::Ping { seq } => Some(Message::PingResponse { seq: *seq }),
            Message::VersionRequest { seq } => Some(Message::VersionResponse {
                seq: *seq,
                display: FirmwareVersion::new("SPAPACK", 1, 2),
                controller: FirmwareVersion::new("SPACTRL", 1, 0),
            }),
            Message::ChannelRequest { seq } => Some(Message::ChannelResponse {
                seq: *seq,
                channel: 11,
                signal_strength: 67,
            }),
            Message::ConfigFileRequest { seq } => Some(Message::ConfigFileResponse {
                seq: *seq,
                platform_key: "inYT".to_string(),
                config_revision: 4,
                log_revision: 3,
            }),
            Message::StatusBlockRequest { seq, start, end } => {
                Some(Message::StatusBlockResponse {
                    seq: *seq,
                    start: *start,
                    data: Bytes::copy_from_slice(&status[*start as usize..*end as usize]),
                })
            }
            // Confirm a pump command by patching the structure back
            Message::PackCommand {
                command: spalink_client::message::PackCommandKind::SetValue { offset, data },
                ..
            } => {
                let offset = *offset as usize;
                status[offset..offset + data.len()].copy_from_slice(data);
                Some(Message::PartialStatusUpdate {
                    changes: vec![spalink_client::message::BlockChange::new(
                        offset as u16,
                        data.clone(),
                    )],
                })
            }
            _ => None,
        };
        if let Some(reply) = reply {
            if !endpoint.send(reply) {
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    spalink_core::logging::init()?;

    let destination = "10.0.0.5:10022".parse()?;
    let (transport, endpoint) = ChannelTransport::pair(destination);
    tokio::spawn(run_device(endpoint));

    let descriptor = SpaDescriptor::new(
        SpaDescriptor::generate_client_identifier(),
        Bytes::from_static(b"SPA0001"),
        "Demo Spa",
        destination,
    );
    let session = SpaSession::new(
        descriptor,
        Arc::new(transport),
        Arc::new(PackRegistry::with_builtin()),
        SessionConfig::default(),
    );
    let mut events = session.subscribe();

    session.start_connect().await?;
    session.wait_until_connected().await?;

    let identity = session.identity();
    println!("Connected to {}", session.descriptor());
    println!("  model:    {}", identity.model.unwrap_or_default());
    println!("  version:  {}", identity.version.unwrap_or_default());
    println!("  channel:  {:?}", identity.channel);
    println!("  water:    {}", session.read("DisplayedTempG")?);
    println!("  pump 1:   {}", session.read("Pump1")?);

    println!("Turning pump 1 to LO...");
    session.write("Pump1", &Value::Label("LO".to_string()))?;

    // Wait for the device to confirm the change
    loop {
        match events.recv().await? {
            SessionEvent::ValueChanged { name, old, new } if name == "Pump1" => {
                println!("  {} changed from {} to {}", name, old, new);
                break;
            }
            _ => {}
        }
    }
    println!("  pump 1:   {}", session.read("Pump1")?);

    sleep(Duration::from_millis(100)).await;
    session.close().await?;
    Ok(())
}
