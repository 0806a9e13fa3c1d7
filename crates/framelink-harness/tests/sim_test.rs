//! framelink over the simulated network.
//!
//! Real TLS handshakes and framing, turmoil-controlled time and latency.

use std::{error::Error, future::Future, pin::Pin, sync::Arc, time::Duration};

use framelink_client::{ClientConfig, Connector};
use framelink_core::{CertificateIdentity, ClientEvent, DisconnectReason, RequireValid};
use framelink_harness::{
    SERVER_HOST, SERVER_PORT, SimResult, run_echo_server, server_identity, sim_connect,
};
use framelink_server::{ServerConfig, ServerConfigBuilder};
use tokio::sync::mpsc;

fn echo_host(
    identity: CertificateIdentity,
    configure: fn(ServerConfigBuilder) -> ServerConfigBuilder,
) -> impl Fn() -> Pin<Box<dyn Future<Output = SimResult>>> {
    move || {
        let identity = identity.clone();
        Box::pin(async move {
            let config = configure(ServerConfig::builder(identity)).build()?;
            run_echo_server(config, SERVER_PORT).await?;
            SimResult::Ok(())
        })
    }
}

fn client_connector(
    identity: &CertificateIdentity,
) -> Result<(Connector, mpsc::UnboundedReceiver<ClientEvent>), Box<dyn Error>> {
    let config = ClientConfig::builder().trust_only(identity.chain().to_vec()).build()?;
    let connector = Connector::new(config);
    let (tx, rx) = mpsc::unbounded_channel::<ClientEvent>();
    connector.subscribe(Arc::new(tx));
    Ok((connector, rx))
}

async fn next_message(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Option<String> {
    loop {
        match events.recv().await? {
            ClientEvent::MessageReceived { message } => return Some(message),
            ClientEvent::Connected => {},
            ClientEvent::Disconnected { .. } => return None,
        }
    }
}

#[test]
fn echo_with_latency() {
    let identity = server_identity().unwrap();
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(60))
        .min_message_latency(Duration::from_millis(50))
        .max_message_latency(Duration::from_millis(50))
        .build();

    sim.host(SERVER_HOST, echo_host(identity.clone(), |builder| builder));

    sim.client("client", async move {
        let (connector, mut events) = client_connector(&identity)?;
        let client = sim_connect(&connector, SERVER_HOST, SERVER_PORT, Some(SERVER_HOST)).await?;
        assert_eq!(events.recv().await, Some(ClientEvent::Connected));

        let start = tokio::time::Instant::now();
        client.write("ping over a slow link").await?;
        assert_eq!(next_message(&mut events).await.as_deref(), Some("ping over a slow link"));
        assert!(start.elapsed() >= Duration::from_millis(100), "round trip faster than two hops");

        client.close().await;
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::Disconnected { reason: DisconnectReason::UserForced })
        );
        Ok(())
    });

    sim.run().unwrap();
}

#[test]
fn ten_peers_exchange_messages_independently() {
    let identity = server_identity().unwrap();
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(120))
        .min_message_latency(Duration::from_millis(1))
        .max_message_latency(Duration::from_millis(20))
        .build();

    sim.host(SERVER_HOST, echo_host(identity.clone(), |builder| builder));

    for peer in 0..10 {
        let identity = identity.clone();
        sim.client(format!("peer-{peer}"), async move {
            let (connector, mut events) = client_connector(&identity)?;
            let client =
                sim_connect(&connector, SERVER_HOST, SERVER_PORT, Some(SERVER_HOST)).await?;

            for round in 0..5 {
                let message = format!("peer {peer} says {round}");
                client.write(&message).await?;
                assert_eq!(next_message(&mut events).await, Some(message));
            }

            client.close().await;
            Ok(())
        });
    }

    sim.run().unwrap();
}

#[test]
fn idle_timeout_runs_on_simulated_time() {
    let identity = server_identity().unwrap();
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(120)).build();

    sim.host(
        SERVER_HOST,
        echo_host(identity.clone(), |builder| builder.idle_timeout(Duration::from_secs(30))),
    );

    sim.client("sleeper", async move {
        let (connector, mut events) = client_connector(&identity)?;
        let client = sim_connect(&connector, SERVER_HOST, SERVER_PORT, Some(SERVER_HOST)).await?;
        assert_eq!(events.recv().await, Some(ClientEvent::Connected));

        let start = tokio::time::Instant::now();
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::Disconnected { reason: DisconnectReason::ConnectionClosed })
        );
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(!client.is_connected());
        Ok(())
    });

    sim.run().unwrap();
}

#[test]
fn strict_client_rejects_wrong_name_in_simulation() {
    let identity = server_identity().unwrap();
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(60)).build();

    sim.host(SERVER_HOST, echo_host(identity.clone(), |builder| builder));

    sim.client("strict", async move {
        let config = ClientConfig::builder()
            .trust_only(identity.chain().to_vec())
            .validator(RequireValid)
            .build()?;
        let connector = Connector::new(config);

        let result =
            sim_connect(&connector, SERVER_HOST, SERVER_PORT, Some("somewhere-else")).await;
        assert!(result.is_err());
        Ok(())
    });

    sim.run().unwrap();
}
