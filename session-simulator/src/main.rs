mod config;
mod simulated_source;

use anyhow::Result;
use common::StreamId;
use simulated_source::SimulatedSource;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use streaming_engine::{
    transport_event_channel, MediaSession, MediaSubsession, SessionDispatcher, StreamingMediaSession,
    TransportSource,
};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志 - 使用环境变量 RUST_LOG 控制级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("🎥 Session simulator starting...");

    let config = config::Config::load()?;
    info!("✓ Configuration loaded");
    info!("  Session: {}", config.session_name);
    info!("  Streams: {}", config.streams.len());
    info!("  Max samples: {}", config.max_samples);

    // 传输层持有全部传输源，引擎只保存弱引用
    let (events_tx, events_rx) = transport_event_channel();
    let mut sources = Vec::new();
    let mut subsessions = Vec::new();

    for stream in &config.streams {
        if stream.refused {
            warn!("⚠️  Transport setup refused for stream {} ({})", stream.stream_id, stream.codec_name);
            subsessions.push(MediaSubsession::without_source(
                stream.stream_id,
                stream.medium.clone(),
                stream.codec_name.clone(),
            ));
            continue;
        }

        let source = SimulatedSource::new(stream.clone(), events_tx.clone());
        let transport: Arc<dyn TransportSource> = source.clone();
        subsessions.push(MediaSubsession::new(
            stream.stream_id,
            stream.medium.clone(),
            stream.codec_name.clone(),
            &transport,
        ));
        sources.push(source);
    }
    drop(events_tx);

    let session = MediaSession::new(config.session_name.clone(), subsessions);
    let mut engine = StreamingMediaSession::new(session, config.engine.clone());
    info!("✓ Engine created with {} active stream(s)", engine.stream_count());

    let per_stream: Arc<Mutex<BTreeMap<StreamId, (usize, usize)>>> = Arc::new(Mutex::new(BTreeMap::new()));
    let total = Arc::new(AtomicUsize::new(0));

    let sink = per_stream.clone();
    let counter = total.clone();
    engine.set_sample_callback(move |stream_id, sample| {
        counter.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Sample: stream={}, codec={}, size={}, pts={:?}, key={}",
            stream_id,
            sample.codec_name,
            sample.len(),
            sample.presentation_time,
            sample.attributes.is_key_frame
        );
        if let Ok(mut stats) = sink.lock() {
            let entry = stats.entry(stream_id).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += sample.len();
        }
    });

    engine.set_stream_closed_callback(|stream_id| {
        info!("📴 Stream {} closed", stream_id);
    });

    let max_samples = config.max_samples;
    let progress = total.clone();
    engine.set_continue_reading_callback(move || progress.load(Ordering::SeqCst) < max_samples);

    engine.begin_reading()?;
    info!("🚀 Reading started");

    let mut dispatcher = SessionDispatcher::new(engine, events_rx);
    while !dispatcher.session().is_paused() && dispatcher.dispatch_next().await {}
    info!("⏸  Reading paused after {} samples", total.load(Ordering::SeqCst));

    // 模拟对端发送BYE后关闭传输源
    for source in &sources {
        source.send_goodbye();
        source.close();
    }
    let drained = dispatcher.dispatch_pending();
    debug!("Dispatched {} termination events", drained);

    let mut engine = dispatcher.into_session();

    let descriptor = engine.get_descriptor();
    for stream in descriptor.streams() {
        info!(
            "Stream {}: codec={}, last sample {} bytes",
            stream.stream_id,
            stream.codec_name,
            stream.sample.len()
        );
    }

    for stream_id in engine.stream_ids() {
        match engine.get_statistics(stream_id) {
            Ok(stats) => info!("Stream {} statistics: {}", stream_id, serde_json::to_string(&stats)?),
            Err(e) => warn!("Stream {} statistics unavailable: {}", stream_id, e),
        }
    }

    if let Ok(stats) = per_stream.lock() {
        for (stream_id, (samples, bytes)) in stats.iter() {
            info!("Stream {}: {} samples, {} bytes delivered", stream_id, samples, bytes);
        }
    }

    engine.close();
    info!("✅ Session simulator finished");

    Ok(())
}
