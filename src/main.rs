use anyhow::Result;
use clap::{Parser, Subcommand};
use nfc_profile_client::{
    ClientConfig, NotificationFeed, PageEvent, PageLifecycle, ProfileClient, RealtimeBridge,
    SessionTracker,
};
use nfc_profile_shared::{EventKind, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "nfc-profile-client")]
#[command(about = "Open tracked NFC profiles and watch admin notifications")]
#[command(version)]
struct Cli {
    /// API base, overrides NFC_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a student profile and track the view until Ctrl-C or inactivity
    Profile {
        /// Student identifier from the NFC card
        student_id: String,

        /// Record a call to this phone number once the profile is open
        #[arg(long)]
        call: Option<String>,
    },

    /// Connect to the realtime feed and log admin notifications
    Admin {
        /// Admin bearer token
        #[arg(short, long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(api_url) = cli.api_url.as_deref() {
        let base = ClientConfig::with_api_url(api_url)?;
        config.api_url = base.api_url;
        config.socket_url = base.socket_url;
    }
    info!("API: {}", config.api_url);

    match cli.command {
        Commands::Profile { student_id, call } => run_profile(config, &student_id, call).await,
        Commands::Admin { token } => run_admin(config, token).await,
    }
}

async fn run_profile(config: ClientConfig, student_id: &str, call: Option<String>) -> Result<()> {
    let page = PageLifecycle::new();
    let tracker = SessionTracker::from_config(&config, page.clone())?;
    let profiles = ProfileClient::new(config)?;

    let profile = profiles.open_student_profile(student_id, &tracker).await?;
    info!("Profile: {}", serde_json::to_string_pretty(&profile.data)?);

    if let Some(phone) = call.filter(|p| !p.is_empty()) {
        tracker.track_call(&phone).await;
    }

    let mut check = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                page.emit(PageEvent::Unload);
                break;
            }
            _ = check.tick() => {
                if !tracker.is_active() {
                    info!("Session over after {}s", tracker.session_duration());
                    break;
                }
            }
        }
    }

    tracker.shutdown().await;
    Ok(())
}

async fn run_admin(config: ClientConfig, token: Option<String>) -> Result<()> {
    let bridge = RealtimeBridge::new(&config)?;
    let handle = bridge.connect(token.as_deref());

    bridge.on(EventKind::ConnectError, |event| {
        if let ServerEvent::ConnectError { message } = event {
            warn!("Realtime connect error: {}", message);
        }
    });

    let feed = Arc::new(NotificationFeed::default());
    feed.attach(&bridge);

    let mut last_seen = 0;
    let mut poll = interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {
                for notification in feed.visible() {
                    if notification.id > last_seen {
                        last_seen = notification.id;
                        info!("[{:?}] {}: {}", notification.kind, notification.title, notification.message);
                    }
                }
            }
        }
    }

    info!("Disconnecting (state {:?})", handle.state());
    bridge.disconnect();
    Ok(())
}
