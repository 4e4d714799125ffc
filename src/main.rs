//! VoxWeave - Voice Agent Orchestration
//!
//! Demo binary wiring the orchestration core together and pushing a short
//! scripted conversation through it, barge-in included.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use voxweave::config::Config;
use voxweave::context::ConversationContext;
use voxweave::events::tap::EventTap;
use voxweave::events::{sync_handler, EventBus, WILDCARD};
use voxweave::frames::{
    ControlSignal, Frame, SystemMarker, TapChain, COMPONENT_LLM, COMPONENT_STT, COMPONENT_TTS,
};
use voxweave::interruption::InterruptionCoordinator;
use voxweave::metrics::MetricsAggregator;
use voxweave::modules::memory::MemoryModule;
use voxweave::modules::runtime::ModuleRuntime;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("🔊 VoxWeave v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let bus = Arc::new(EventBus::new(config.event_bus.buffer_size));
    let context = Arc::new(ConversationContext::with_defaults());

    // Print every event crossing the bus
    bus.subscribe(
        WILDCARD,
        sync_handler(|event| {
            info!("📡 #{} {} {}", event.id, event.kind(), event.data());
            Ok(())
        }),
    )?;

    // Extension modules
    let mut runtime = ModuleRuntime::new(bus.clone(), context.clone());
    runtime.attach()?;
    runtime
        .load(Arc::new(MemoryModule::new(&config.memory)))
        .await?;

    // Observers on the frame stream. Short emit interval so the scripted
    // run publishes a metrics_update before it ends.
    let mut chain = TapChain::new();
    chain.add(EventTap::new(bus.clone()));
    chain.add(MetricsAggregator::new(
        bus.clone(),
        Duration::from_millis(400),
    ));
    chain.add(InterruptionCoordinator::from_config(
        bus.clone(),
        &config.interruption,
    ));
    chain.start().await?;

    info!("✅ VoxWeave ready - running scripted conversation");

    chain.feed(Frame::Start).await?;

    // One user turn through stt and llm
    chain
        .feed(Frame::marker(SystemMarker::component_start(COMPONENT_STT)))
        .await?;
    sleep(Duration::from_millis(80)).await;
    chain
        .feed(Frame::transcript(
            "my name is Ada and I like synthesizers",
            true,
        ))
        .await?;
    chain
        .feed(Frame::marker(SystemMarker::component_end(COMPONENT_STT)))
        .await?;

    chain
        .feed(Frame::marker(SystemMarker::component_start(COMPONENT_LLM)))
        .await?;
    sleep(Duration::from_millis(120)).await;
    for word in ["Nice ", "to ", "meet ", "you, ", "Ada!"] {
        chain.feed(Frame::token(word)).await?;
    }
    chain
        .feed(Frame::marker(SystemMarker::component_end(COMPONENT_LLM)))
        .await?;

    chain
        .feed(Frame::marker(SystemMarker::component_start(COMPONENT_TTS)))
        .await?;
    sleep(Duration::from_millis(60)).await;
    chain
        .feed(Frame::marker(SystemMarker::component_end(COMPONENT_TTS)))
        .await?;

    // Playback begins, then the user barges in early
    chain
        .feed(Frame::marker(SystemMarker::tts_started(Some(4.0))))
        .await?;
    sleep(Duration::from_millis(300)).await;
    let forwarded = chain
        .feed(Frame::marker(SystemMarker::user_started_speaking()))
        .await?;
    if forwarded
        .iter()
        .any(|f| matches!(f, Frame::Control(ControlSignal::InterruptTts)))
    {
        info!("🛑 Barge-in: TTS interrupt signalled downstream");
    }

    chain.feed(Frame::End).await?;
    chain.stop().await?;

    // What the run left behind
    info!(
        "🧠 Context: {}",
        serde_json::to_string_pretty(&context.snapshot()?)?
    );
    let recent = bus.event_history(None, None, Some(5))?;
    info!("📜 Last {} events:", recent.len());
    for event in &recent {
        info!("   {}", serde_json::to_string(event.as_ref())?);
    }

    runtime.unload("memory").await?;
    Ok(())
}
