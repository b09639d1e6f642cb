// 流媒体会话引擎 - 事件调度器
//
// 从传输层事件通道中逐个取出事件并投递给引擎，
// 保证引擎看到的完成通知严格串行。

use super::handler::StreamingMediaSession;
use super::source::TransportEventReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info};

/// 会话事件调度器
///
/// 引擎的唯一驱动者：拥有引擎与事件接收端，在同一个任务中串行处理事件。
pub struct SessionDispatcher {
    session: StreamingMediaSession,
    events: TransportEventReceiver,
    dispatched: u64,
}

impl SessionDispatcher {
    pub fn new(session: StreamingMediaSession, events: TransportEventReceiver) -> Self {
        Self {
            session,
            events,
            dispatched: 0,
        }
    }

    pub fn session(&self) -> &StreamingMediaSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut StreamingMediaSession {
        &mut self.session
    }

    /// 已投递的事件数
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched
    }

    /// 等待并投递下一个事件
    ///
    /// 所有发送端关闭后返回 `false`。
    pub async fn dispatch_next(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.session.handle_event(event);
                self.dispatched += 1;
                true
            }
            None => false,
        }
    }

    /// 投递通道中已就绪的全部事件，不等待
    pub fn dispatch_pending(&mut self) -> usize {
        let mut count = 0;

        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.session.handle_event(event);
                    self.dispatched += 1;
                    count += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        count
    }

    /// 持续投递，直到通道关闭或引擎关闭
    pub async fn run(mut self) -> StreamingMediaSession {
        info!("Dispatcher started for session {}", self.session.session_id());

        while !self.session.is_closed() && self.dispatch_next().await {}

        debug!(
            "Dispatcher for session {} stopped after {} events",
            self.session.session_id(),
            self.dispatched
        );
        self.session
    }

    pub fn into_session(self) -> StreamingMediaSession {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::session::{MediaSession, MediaSubsession};
    use crate::streaming::mock_source::EchoSource;
    use crate::streaming::source::{transport_event_channel, TransportSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_dispatch_until_paused() {
        let (tx, rx) = transport_event_channel();
        let source = EchoSource::new(tx, &[1, 2, 3, 4], Duration::from_millis(10));
        let transport: Arc<dyn TransportSource> = source.clone();
        let session = MediaSession::new("echo", vec![MediaSubsession::new(9, "data", "raw", &transport)]);

        let mut engine = StreamingMediaSession::new(session, EngineConfig::default());
        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = samples.clone();
        engine.set_sample_callback(move |id, sample| sink.lock().unwrap().push((id, sample.presentation_time)));

        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        engine.set_continue_reading_callback(move || counter.fetch_add(1, Ordering::SeqCst) < 4);
        engine.begin_reading().unwrap();

        let mut dispatcher = SessionDispatcher::new(engine, rx);
        let dispatched = dispatcher.dispatch_pending();

        assert_eq!(dispatched, 5);
        assert_eq!(dispatcher.dispatched_count(), 5);
        assert!(dispatcher.session().is_paused());
        assert_eq!(source.delivered_count(), 5);

        let samples = samples.lock().unwrap();
        assert_eq!(samples.len(), 5);
        assert!(samples.iter().all(|(id, _)| *id == 9));
        assert!(samples.windows(2).all(|pair| pair[0].1 <= pair[1].1));
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let (tx, rx) = transport_event_channel();
        let source = EchoSource::new(tx, &[0xAA; 8], Duration::from_millis(20));
        let transport: Arc<dyn TransportSource> = source.clone();
        let session = MediaSession::new("echo", vec![MediaSubsession::new(1, "data", "raw", &transport)]);

        let mut engine = StreamingMediaSession::new(session, EngineConfig::default());
        engine.set_continue_reading_callback(|| false);
        engine.begin_reading().unwrap();

        // 释放传输源即关闭唯一的发送端
        drop(transport);
        drop(source);

        let engine = SessionDispatcher::new(engine, rx).run().await;
        assert!(engine.is_paused());
        assert!(!engine.is_closed());
    }
}
