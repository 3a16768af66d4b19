use anyhow::{Context, Result};
use colored::*;
use domain::{MessagesClient, Navigator, RedirectController, Surface};
use events::EventPublisher;
use log::*;
use service::{config::Config, logging::Logger};
use session::http::HttpClientBuilder;
use session::{
    AuthCredentials, FileStore, HostInfo, MemoryStore, PersistentStore, SessionConfig,
    SessionState,
};
use sse::{
    EventSourceTransport, EventStreamClient, ReceivedMessage, SendMessageRequest, StreamConfig,
    StreamSessionHandler,
};
use std::net::UdpSocket;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate(&self, to: Surface) {
        match to {
            Surface::Home => println!("{} Connected, type a message and press enter", "→".green()),
            Surface::Login => println!(
                "{} Not logged in, restart with --host-ip and --password",
                "→".yellow()
            ),
        }
    }
}

fn print_message(message: ReceivedMessage) {
    let sender = if message.is_self {
        "you".to_string()
    } else {
        message.from_name.clone()
    };
    println!(
        "{} {}: {}",
        message.timestamp.dimmed(),
        sender.bold(),
        message.message
    );
    for attachment in &message.attachments {
        println!(
            "    {} {} ({}, {} bytes)",
            "↳".dimmed(),
            attachment.filename,
            attachment.mime_type,
            attachment.size
        );
    }
}

/// Address this machine uses to reach the host. No packet is sent.
fn local_ip_towards(host: &HostInfo) -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect((host.ip.as_str(), host.port)).ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::new();
    Logger::init_logger(&config).context("Failed to initialize logging")?;

    let store: Arc<dyn PersistentStore> = if config.persist_session {
        Arc::new(FileStore::new(config.data_dir.clone()))
    } else {
        Arc::new(MemoryStore::new())
    };

    let clients = HttpClientBuilder::new()
        .with_timeout(config.login_timeout())
        .with_max_retries(config.history_max_retries)
        .build()
        .context("Failed to build HTTP client")?;

    let publisher = EventPublisher::new();
    let session = Arc::new(SessionState::new(
        store,
        clients.plain.clone(),
        SessionConfig {
            login_timeout: config.login_timeout(),
            ping_timeout: config.ping_timeout(),
            verify_timeout: config.verify_timeout(),
        },
        publisher.clone(),
    ));
    session.hydrate().await;

    if config.logout {
        session.logout().await;
        println!("{} Saved session cleared", "✓".green());
        return Ok(());
    }

    let stream = Arc::new(EventStreamClient::new(
        session.clone(),
        Arc::new(EventSourceTransport::new()),
        Arc::new(print_message),
        StreamConfig {
            reconnect_delay: config.reconnect_delay(),
            monitor_interval: config.monitor_interval(),
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
        },
    ));
    publisher.subscribe(Arc::new(StreamSessionHandler::new(&stream)));

    let redirect = RedirectController::new(
        session.clone(),
        Arc::new(ConsoleNavigator),
        config.redirect_mode,
        config.redirect_interval(),
    );
    redirect.subscribe();

    let authenticated = match (config.host_ip(), config.password()) {
        (Some(ip), Some(password)) => {
            let host = HostInfo::new(ip, config.host_port);
            session
                .login(host, AuthCredentials::new(&config.device_name, password))
                .await
        }
        _ => session.try_reauthenticate_with_saved_host().await,
    };

    let messages = MessagesClient::new(session.clone(), clients);
    if authenticated {
        match messages.history().await {
            Ok(history) => history.into_iter().for_each(print_message),
            Err(err) => warn!("Could not load message history: {err}"),
        }
    } else if let Some(last_error) = session.last_error() {
        println!("{} {}", "✗".red(), last_error.message);
    }

    redirect.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    let Some(host) = session.host() else {
                        println!("{} No host bound", "✗".red());
                        continue;
                    };
                    let from_ip = local_ip_towards(&host).unwrap_or_default();
                    let request = SendMessageRequest::text(line, &config.device_name, from_ip);
                    match messages.send(&request).await {
                        Ok(response) if response.success => debug!("Sent at {}", response.timestamp),
                        Ok(response) => println!("{} {}", "✗".red(), response.message),
                        Err(err) => println!("{} Failed to send: {err}", "✗".red()),
                    }
                }
                Ok(None) => stdin_open = false,
                Err(err) => {
                    error!("Failed to read stdin: {err}");
                    stdin_open = false;
                }
            },
        }
    }

    info!("Shutting down");
    redirect.stop();
    stream.disconnect().await;
    Ok(())
}
