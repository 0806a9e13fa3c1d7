//! framelink relay server.
//!
//! Rebroadcasts every message it receives to all connected clients.

use std::{error::Error, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use framelink_core::{
    CertificateIdentity, ServerEvent, TlsProtocol, load_certificates, load_revocation_lists,
};
use framelink_server::{BasicClient, Server, ServerClient, ServerConfig};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "framelink-server", about = "TLS message relay")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:4443")]
    bind: SocketAddr,

    /// PEM certificate chain (self-signed if omitted)
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Names for the self-signed certificate
    #[arg(long = "name", default_value = "localhost")]
    names: Vec<String>,

    /// TLS version: 1.2, 1.3 or any
    #[arg(long, default_value_t = TlsProtocol::Any)]
    tls: TlsProtocol,

    /// Require client certificates issued by the roots in this PEM file
    #[arg(long)]
    client_ca: Option<PathBuf>,

    /// Revocation lists for client certificates (PEM)
    #[arg(long, requires = "client_ca")]
    crl: Vec<PathBuf>,

    /// Seconds allowed for the TLS handshake
    #[arg(long, default_value_t = 30)]
    handshake_timeout: u64,

    /// Seconds a client gets to take one relayed message
    #[arg(long, default_value_t = 30)]
    write_timeout: u64,

    /// Disconnect clients silent for this many seconds
    #[arg(long)]
    idle_timeout: Option<u64>,
}

fn build_config(args: &Args) -> Result<ServerConfig, Box<dyn Error>> {
    let identity = match (&args.cert, &args.key) {
        (Some(cert), Some(key)) => CertificateIdentity::from_pem_files(cert, key)?,
        _ => {
            tracing::warn!(
                names = ?args.names,
                "no certificate given, generating a self-signed one"
            );
            CertificateIdentity::self_signed(args.names.clone())?
        },
    };

    let mut builder = ServerConfig::builder(identity)
        .protocol(args.tls)
        .handshake_timeout(Duration::from_secs(args.handshake_timeout))
        .write_timeout(Duration::from_secs(args.write_timeout));

    if let Some(path) = &args.client_ca {
        builder = builder.require_client_certificates(load_certificates(path)?);
    }

    if !args.crl.is_empty() {
        let mut crls = Vec::new();
        for path in &args.crl {
            crls.extend(load_revocation_lists(path)?);
        }
        builder = builder.check_revocation(crls);
    }

    if let Some(secs) = args.idle_timeout {
        builder = builder.idle_timeout(Duration::from_secs(secs));
    }

    Ok(builder.build()?)
}

async fn relay(
    server: Arc<Server<BasicClient>>,
    mut events: mpsc::UnboundedReceiver<ServerEvent<BasicClient>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::ClientConnected { client } => {
                tracing::info!(
                    client = %client.id(),
                    peer = %client.connection().peer_addr(),
                    "joined"
                );
            },
            ServerEvent::ClientDisconnected { client, reason } => {
                tracing::info!(client = %client.id(), %reason, "left");
            },
            ServerEvent::MessageReceived { client, message } => {
                tracing::info!(client = %client.id(), %message, "relaying");
                if let Err(error) = server.broadcast(&message).await {
                    tracing::warn!(%error, "broadcast failed");
                }
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let server = Arc::new(Server::basic(config));
    let (tx, rx) = mpsc::unbounded_channel::<ServerEvent<BasicClient>>();
    server.subscribe(Arc::new(tx));

    let addr = server.listen(args.bind).await?;
    tracing::info!(%addr, "relay ready, ctrl-c to stop");

    let relay_task = tokio::spawn(relay(Arc::clone(&server), rx));

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    relay_task.abort();

    Ok(())
}
