use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webcast_picker::config::parse_ladder;
use webcast_picker::{
    payload_queue, spawn_actuator, ActuatorHandle, LoggingActuator, PickerConfig,
    QuestionSelector, QueueReceiver, Selection, SessionResolver, StreamClient,
};

#[derive(Parser)]
#[command(
    name = "webcast-picker",
    version,
    about = "Collect viewer questions from a live webcast chat and pick one per round",
    long_about = "Connects to the push stream of a live broadcast, collects chat messages that \
                  start with the command prefix, and selects one question per collection window.\n\
                  Settings come from PICKER_* environment variables (or a .env file); the flags \
                  below override them."
)]
struct Cli {
    /// Live id from the broadcast page URL
    live_id: String,

    /// Command prefix marking a chat message as a question
    #[arg(long)]
    prefix: Option<String>,

    /// Window ladder in seconds, comma separated (e.g. "15,30,60")
    #[arg(long)]
    ladder: Option<String>,

    /// Chance of picking a fallback question after an empty window
    #[arg(long)]
    fallback_probability: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webcast_picker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    info!("Starting webcast picker for live {}", cli.live_id);
    info!(
        "Prefix {:?}, ladder {:?}, broadcast delay {:?}",
        config.command_prefix, config.window_ladder, config.broadcast_delay
    );

    let resolver = SessionResolver::new(config.user_agent.as_str())?;
    let session = resolver
        .resolve(&config.page_url(&cli.live_id))
        .await
        .context("Failed to resolve broadcast session")?;

    let (queue_tx, mut queue_rx) = payload_queue(config.queue_capacity)?;
    let client = StreamClient::new(&config, &session);
    let mut stream_task = tokio::spawn(async move { client.run(queue_tx).await });

    let mut actuator = spawn_actuator(LoggingActuator);
    let mut selector = QuestionSelector::from_config(&config)?;

    let outcome = tokio::select! {
        result = &mut stream_task => match result {
            Ok(Ok(())) => Err(anyhow!("Push connection closed")),
            Ok(Err(e)) => Err(e).context("Push connection failed"),
            Err(e) => Err(e).context("Stream task aborted"),
        },
        result = round_loop(&config, &mut selector, &mut queue_rx, &mut actuator) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            Ok(())
        }
    };

    stream_task.abort();
    actuator.shutdown().await;
    info!("Queue metrics: {:?}", queue_rx.metrics());

    outcome
}

fn load_config(cli: &Cli) -> anyhow::Result<PickerConfig> {
    let mut config = PickerConfig::from_env().context("Failed to load configuration")?;

    if let Some(prefix) = &cli.prefix {
        config.command_prefix = prefix.clone();
    }
    if let Some(ladder) = &cli.ladder {
        config.window_ladder = parse_ladder(ladder).context("Invalid --ladder")?;
    }
    if let Some(probability) = cli.fallback_probability {
        config.fallback_probability = probability;
    }

    config.validate()?;
    Ok(config)
}

/// Drain, announce, collect, then hand the pick to the actuator; runs until an error
async fn round_loop(
    config: &PickerConfig,
    selector: &mut QuestionSelector,
    queue: &mut QueueReceiver,
    actuator: &mut ActuatorHandle,
) -> anyhow::Result<()> {
    actuator
        .prepare()
        .await
        .context("Actuator failed to prepare")?;

    let mut round: u64 = 0;
    loop {
        round += 1;

        let stale = queue.drain_nonblocking();
        if stale > 0 {
            debug!("Discarded {} stale payloads", stale);
        }

        if let Err(e) = actuator.set_countdown(selector.upcoming_window()).await {
            warn!("Failed to announce countdown: {}", e);
        }

        let report = selector.run_cycle(queue).await?;
        info!(
            "Round {}: {} payloads ({} skipped), {} candidates, next window {:?}",
            round,
            report.payloads,
            report.skipped_payloads,
            report.candidates,
            report.next_window_length
        );

        let text = match &report.selection {
            Selection::Candidate(text) => text,
            Selection::Fallback(text) => {
                info!("Using fallback question");
                text
            }
            Selection::Nothing => {
                tokio::time::sleep(config.round_pause).await;
                continue;
            }
        };

        if let Err(e) = actuator.send_question(text).await {
            warn!("Failed to send question: {}", e);
            continue;
        }

        match actuator.wait_for_answer(config.answer_timeout).await {
            Ok(true) => info!("Answer finished"),
            Ok(false) => warn!("Answer timed out after {:?}", config.answer_timeout),
            Err(e) => warn!("Failed waiting for answer: {}", e),
        }
    }
}
