//! CLI for Herald
//!
//! Subcommands:
//! - `serve`: run the broker, the orchestration engine and the control server
//! - `dispatch`: run one consumer process against a running server
//! - `produce`: route and publish a single message
//! - `status`: print the server's health snapshot

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use herald::broker::LocalBroker;
use herald::config::{DEFAULT_CONFIG_PATH, Settings, load_config_from};
use herald::dispatch::DispatchPipeline;
use herald::notification::{Message, MessageType};
use herald::orchestrator::Orchestrator;
use herald::reporting::{ReportingAggregator, StatsHandle};
use herald::routing::MessageRouter;
use herald::transport::{ControlClient, RemoteConsumer, ServerContext, start_control_server};
use herald::utils::error::Result;
use herald::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "herald", version, about = "Notification queue orchestration")]
struct Cli {
    /// Configuration file, without extension
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker, orchestration engine and control server
    Serve,
    /// Register with a running server and dispatch the assigned queue
    Dispatch {
        #[arg(long, default_value = "ws://127.0.0.1:3000")]
        url: String,
    },
    /// Route and publish one message
    Produce {
        #[arg(long, default_value = "ws://127.0.0.1:3000")]
        url: String,
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        sender: String,
        /// OTP, TRX or CMP
        #[arg(long = "type")]
        kind: MessageType,
    },
    /// Print the server's health snapshot
    Status {
        #[arg(long, default_value = "ws://127.0.0.1:3000")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match load_config_from(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Configuration failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.logging.level);

    let outcome = match cli.command {
        Command::Serve => run_server(settings, cli.config).await,
        Command::Dispatch { url } => run_dispatch(&settings, &url).await,
        Command::Produce {
            url,
            recipient,
            message,
            sender,
            kind,
        } => {
            let message = Message::new(recipient, message, sender, kind);
            run_produce(&settings, &url, message).await
        }
        Command::Status { url } => run_status(&url).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_server(settings: Settings, config_path: String) -> Result<()> {
    let broker = LocalBroker::open(&settings.broker.path)?;
    let stats = StatsHandle::new(settings.reporting.window_secs);
    let orchestrator = Arc::new(Orchestrator::new(broker.clone(), &settings, stats.clone()));
    orchestrator.start().await;

    let reporting_queue = orchestrator.reporting_queue();
    let reporting = broker.subscribe(&settings.reporting.group, vec![reporting_queue.clone()]);
    tokio::spawn(ReportingAggregator::new(reporting, stats).run());

    for _ in 0..settings.dispatch.local_consumers {
        let target = orchestrator.register_consumer()?;
        let consumer = broker.subscribe(&settings.dispatch.group, vec![target]);
        let pipeline = DispatchPipeline::new(
            consumer,
            broker.clone(),
            reporting_queue.clone(),
            settings.dispatch.tier_capacity,
        );
        tokio::spawn(pipeline.run());
    }

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let ctx = ServerContext {
        broker,
        orchestrator,
        config_path,
    };

    tokio::select! {
        result = start_control_server(&addr, ctx) => {
            result?;
            error!("Control server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }
    Ok(())
}

async fn run_dispatch(settings: &Settings, url: &str) -> Result<()> {
    let client = ControlClient::connect(url).await?;
    let registration = client.register().await?;
    let reporting_queue = registration
        .reporting_queue
        .unwrap_or_else(|| settings.orchestration.reporting_queue.clone());
    info!(queue = %registration.queue, %reporting_queue, "registered as consumer");

    let window = u32::try_from(settings.dispatch.tier_capacity).unwrap_or(u32::MAX);
    let consumer = RemoteConsumer::subscribe(
        url,
        &settings.dispatch.group,
        vec![registration.queue],
        window,
    )
    .await?;
    let summary = DispatchPipeline::new(
        consumer,
        client,
        reporting_queue,
        settings.dispatch.tier_capacity,
    )
    .run()
    .await;
    info!(forwarded = summary.forwarded, "consumer finished");
    Ok(())
}

async fn run_produce(settings: &Settings, url: &str, message: Message) -> Result<()> {
    let router = MessageRouter::from_settings(&settings.routing);
    let client = ControlClient::connect(url).await?;
    let (message, delivered) = router.publish(&client, message).await?;
    println!(
        "{}",
        serde_json::json!({ "result": "success", "delivered": delivered, "message": message })
    );
    Ok(())
}

async fn run_status(url: &str) -> Result<()> {
    let client = ControlClient::connect(url).await?;
    let report = client.health().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| format!("{report:?}"))
    );
    Ok(())
}
