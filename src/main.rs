use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use log::{error, info};
use tokio::sync::mpsc;

mod config;
mod coordinator;
mod messages;
mod mqtt;
mod notify;
mod player;

fn init_logging() {
    pretty_env_logger::formatted_timed_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Error listening for shutdown signal: {:?}", err);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = config::Cli::parse();
    let app_config = match &cli.config {
        Some(path) => config::AppConfig::load(path)?,
        None => config::AppConfig::default(),
    };
    let settings = config::Settings::resolve(cli, app_config)?;

    // Both cues share the one output device; the stream must outlive playback.
    let (_stream, output) =
        rodio::OutputStream::try_default().context("opening audio output device")?;
    let single = player::AudioCuePlayer::open("single", &settings.single_sound, output.clone())?;
    let double = player::AudioCuePlayer::open("double", &settings.double_sound, output)?;

    let notifier = notify::SlackNotifier::from_url(settings.slack_webhook.as_deref())
        .map(|n| Box::new(n) as Box<dyn notify::Notifier>);
    if notifier.is_none() {
        info!("No Slack webhook configured, notifications disabled");
    }

    let (mqtt_client, mut eventloop) =
        mqtt::MqttClient::new(&settings.mqtt, Arc::new(mqtt::LogHooks));
    mqtt_client
        .wait_for_connection(&mut eventloop)
        .await
        .with_context(|| format!("connecting to MQTT broker {}", settings.mqtt.host))?;

    let (tx, rx) = mpsc::channel(32);
    let forwarder = tokio::spawn(async move {
        mqtt_client
            .forward(&mut eventloop, tx, shutdown_signal())
            .await;
    });

    let core = coordinator::Coordinator::new(Box::new(single), Box::new(double), notifier);
    core.run_loop(rx).await;

    if let Err(err) = forwarder.await {
        error!("Error joining MQTT task: {:?}", err);
    }
    info!("Exiting");

    Ok(())
}
