// 流媒体会话引擎 - StreamingMediaSession实现
//
// 本模块实现了会话引擎：持有活动流集合，驱动基于读取延续的连续读取，
// 把所有流完成的样本汇入同一个输出回调，并响应终止通知。
//
// # 读取延续协议
//
// 每路流同一时刻最多一个未完成的读取。完成时：
// 1. 通过句柄找回发起读取的流，把交付的数据交给其分帧器
// 2. 询问应用的"是否继续读取"回调
//    - true：对所有未在等待数据的流重新发起读取
//    - false：整个会话暂停，直到应用再次调用 `begin_reading()`
//
// # 调度模型
//
// 引擎状态只在外部调度原语串行投递的完成通知中被访问，内部不加锁。
// `close()` 之后迟到的完成与终止通知一律忽略。

use super::live_source::ReadIssue;
use super::source::{FrameDelivery, StreamHandle, TransportEvent};
use super::{ContinueReadingCallback, SampleCallback, StreamClosedCallback};
use crate::config::EngineConfig;
use crate::framers::MediaFramer;
use crate::session::{MediaSession, MediaSubsession};
use bytes::BytesMut;
use common::{
    MediaDescriptor, MediaSample, Result, StreamDescriptor, StreamId, StreamStatistics, StreamingError,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// 单路流上下文
///
/// 构造时分配，只在 `close()` 时释放，迟到的完成不会访问到悬空状态。
struct StreamContext {
    framer: MediaFramer,
    /// 空闲时持有接收缓冲区，读取进行中为 `None`
    receive_buffer: Option<BytesMut>,
}

/// 流媒体会话引擎
///
/// # 示例
///
/// ```rust,ignore
/// let (tx, rx) = transport_event_channel();
/// let mut engine = StreamingMediaSession::new(session, EngineConfig::default());
///
/// engine.set_sample_callback(|stream_id, sample| {
///     println!("stream {}: {} bytes", stream_id, sample.len());
/// });
/// engine.begin_reading()?;
///
/// let mut dispatcher = SessionDispatcher::new(engine, rx);
/// while dispatcher.dispatch_next().await {}
/// ```
pub struct StreamingMediaSession {
    session_id: Uuid,
    session: Option<MediaSession>,
    config: EngineConfig,
    streams: Vec<StreamContext>,
    closed: bool,
    paused: bool,
    on_sample: Option<SampleCallback>,
    on_stream_closed: Option<StreamClosedCallback>,
    continue_reading: Option<ContinueReadingCallback>,
}

impl Default for StreamingMediaSession {
    /// 没有后备会话的空引擎
    fn default() -> Self {
        Self {
            session_id: Uuid::nil(),
            session: None,
            config: EngineConfig::default(),
            streams: Vec::new(),
            closed: false,
            paused: false,
            on_sample: None,
            on_stream_closed: None,
            continue_reading: None,
        }
    }
}

impl StreamingMediaSession {
    /// 为会话的全部子会话创建引擎
    pub fn new(session: MediaSession, config: EngineConfig) -> Self {
        let subsessions = session.subsessions().to_vec();
        Self::with_subsessions(session, subsessions, config)
    }

    /// 为指定的子会话列表创建引擎
    ///
    /// 传输源不可用的子会话被跳过（不影响构造），重复的流编号只保留第一个。
    /// 未通过校验的配置整体替换为默认配置。
    pub fn with_subsessions(
        session: MediaSession,
        subsessions: Vec<MediaSubsession>,
        config: EngineConfig,
    ) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!("{}, falling back to default engine config", e);
                EngineConfig::default()
            }
        };
        let session_id = Uuid::new_v4();
        let mut streams = Vec::with_capacity(subsessions.len());
        let mut seen = HashSet::new();

        for subsession in &subsessions {
            let stream_id = subsession.stream_id();

            if subsession.transport_source().is_none() {
                warn!(
                    "Transport source unavailable for stream {} ({}), skipping",
                    stream_id,
                    subsession.codec_name()
                );
                continue;
            }

            if !seen.insert(stream_id) {
                warn!("Duplicate stream id {} in session {}, skipping", stream_id, session.name());
                continue;
            }

            let handle = StreamHandle {
                session_id,
                slot: streams.len(),
            };
            let framer = MediaFramer::new(
                stream_id,
                subsession.codec_name(),
                handle,
                subsession.source_ref(),
                &config,
            );

            info!(
                "Stream {} attached: codec={}, framer={}",
                stream_id,
                subsession.codec_name(),
                framer.family().as_str()
            );

            streams.push(StreamContext {
                framer,
                receive_buffer: Some(BytesMut::with_capacity(config.receive_buffer_size)),
            });
        }

        debug!(
            "Created StreamingMediaSession {} with {}/{} streams",
            session_id,
            streams.len(),
            subsessions.len()
        );

        Self {
            session_id,
            session: Some(session),
            config,
            streams,
            closed: false,
            paused: false,
            on_sample: None,
            on_stream_closed: None,
            continue_reading: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 是否没有后备会话（默认构造、已被 `std::mem::take` 移走或已关闭）
    pub fn is_empty(&self) -> bool {
        self.session.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 是否因"是否继续读取"回调返回 false 而暂停
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// 活动流编号（构造顺序）
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.iter().map(|ctx| ctx.framer.stream_number()).collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// 设置样本回调并下发到每个分帧器，下一个样本起生效
    pub fn set_sample_callback<F>(&mut self, callback: F)
    where
        F: Fn(StreamId, MediaSample) + Send + Sync + 'static,
    {
        let callback: SampleCallback = Arc::new(callback);
        for ctx in &mut self.streams {
            ctx.framer.on_sample_set(Some(callback.clone()));
        }
        self.on_sample = Some(callback);
    }

    /// 设置流关闭回调并下发到每个分帧器
    pub fn set_stream_closed_callback<F>(&mut self, callback: F)
    where
        F: Fn(StreamId) + Send + Sync + 'static,
    {
        let callback: StreamClosedCallback = Arc::new(callback);
        for ctx in &mut self.streams {
            ctx.framer.on_stream_closed_set(Some(callback.clone()));
        }
        self.on_stream_closed = Some(callback);
    }

    /// 设置"是否继续读取"回调，每次交付后询问一次；未设置时始终继续
    pub fn set_continue_reading_callback<F>(&mut self, callback: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.continue_reading = Some(Arc::new(callback));
    }

    /// 开始（或在暂停后恢复）读取
    ///
    /// 对每路未在等待数据的流发起首个读取。
    pub fn begin_reading(&mut self) -> Result<()> {
        self.ensure_open()?;

        if self.paused {
            debug!("Resuming reading for session {}", self.session_id);
            self.paused = false;
        }

        let issued = self.issue_reads();
        trace!("begin_reading issued {} continuations", issued);
        Ok(())
    }

    /// 对所有存在传输源且未在等待数据的流发起一次读取
    ///
    /// 可重复调用；会话暂停期间不发起任何读取。
    pub fn continue_reading(&mut self) -> Result<()> {
        self.ensure_open()?;

        if self.paused {
            trace!("Session {} paused, not continuing", self.session_id);
            return Ok(());
        }

        self.issue_reads();
        Ok(())
    }

    /// 处理一个传输层事件
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::FrameDelivered(delivery) => self.on_frame_delivered(delivery),
            TransportEvent::Goodbye(handle) => self.on_goodbye(handle),
            TransportEvent::SourceClosed(handle) => self.on_source_closed(handle),
        }
    }

    /// 读取完成
    pub fn on_frame_delivered(&mut self, mut delivery: FrameDelivery) {
        let handle = delivery.handle;
        let Some(ctx) = self.context_mut(handle) else {
            debug!("Ignoring late frame delivery for {:?}", handle);
            return;
        };

        // 传输源已永久关闭的流不再产出样本
        if ctx.framer.is_closed() {
            debug!(
                "Dropping delivery for closed stream {}",
                ctx.framer.stream_number()
            );
            delivery.buffer.clear();
            ctx.receive_buffer = Some(delivery.buffer);
            return;
        }

        ctx.framer.on_frame_delivered(&delivery);
        // 负载已由分帧器复制，缓冲区可以复用
        delivery.buffer.clear();
        ctx.receive_buffer = Some(delivery.buffer);

        let keep_reading = self.continue_reading.as_ref().map_or(true, |callback| callback());
        if !keep_reading {
            debug!("Reading paused for session {}", self.session_id);
            self.paused = true;
        } else if self.paused {
            // 暂停期间在途读取的完成不恢复读取，只有 begin_reading() 能恢复
            trace!("Session {} paused, not reissuing reads", self.session_id);
        } else {
            self.issue_reads();
        }
    }

    /// 会话级终止通知（如RTCP BYE）
    ///
    /// 可能重复或迟到；关闭后为空操作。不释放关联记录。
    pub fn on_goodbye(&mut self, handle: StreamHandle) {
        let Some(stream_id) = self.context_mut(handle).map(|ctx| ctx.framer.stream_number()) else {
            debug!("Ignoring goodbye for {:?}", handle);
            return;
        };

        info!("Goodbye received for stream {}", stream_id);
        if let Some(callback) = &self.on_stream_closed {
            callback(stream_id);
        }
    }

    /// 传输源永久关闭，该流不再参与读取
    pub fn on_source_closed(&mut self, handle: StreamHandle) {
        let Some(ctx) = self.context_mut(handle) else {
            debug!("Ignoring source closure for {:?}", handle);
            return;
        };

        if ctx.framer.on_source_closed() {
            info!("Transport source closed for stream {}", ctx.framer.stream_number());
        }
    }

    /// 获取流统计快照
    pub fn get_statistics(&self, stream_id: StreamId) -> Result<StreamStatistics> {
        self.ensure_open()?;

        let ctx = self
            .streams
            .iter()
            .find(|ctx| ctx.framer.stream_number() == stream_id)
            .ok_or(StreamingError::NotFound(stream_id))?;

        ctx.framer
            .qos_stats()
            .ok_or(StreamingError::SourceUnavailable(stream_id))
    }

    /// 所有活动流的描述（构造顺序）
    pub fn get_descriptor(&self) -> MediaDescriptor {
        let mut descriptor = MediaDescriptor::new();

        for ctx in &self.streams {
            descriptor.add_stream_from_attributes(
                ctx.framer.stream_number(),
                ctx.framer.codec_name(),
                ctx.framer.working_sample().clone(),
            );
        }

        descriptor
    }

    /// 单路流描述
    pub fn get_stream_descriptor(&self, stream_id: StreamId) -> Result<StreamDescriptor> {
        self.streams
            .iter()
            .find(|ctx| ctx.framer.stream_number() == stream_id)
            .map(|ctx| StreamDescriptor {
                stream_id,
                codec_name: ctx.framer.codec_name().to_string(),
                sample: ctx.framer.working_sample().clone(),
            })
            .ok_or(StreamingError::NotFound(stream_id))
    }

    /// 关闭会话
    ///
    /// 清除回调，释放全部分帧器与关联记录。幂等。
    /// 已发出的读取不保证被传输层取消，其完成到达时被忽略。
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        self.closed = true;
        self.on_sample = None;
        self.on_stream_closed = None;
        self.continue_reading = None;

        for ctx in &mut self.streams {
            ctx.framer.stop();
        }
        let released = self.streams.len();
        self.streams.clear();

        if self.session.take().is_some() {
            info!("StreamingMediaSession {} closed ({} streams released)", self.session_id, released);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed || self.session.is_none() {
            return Err(StreamingError::AlreadyClosed);
        }
        Ok(())
    }

    /// 按句柄找回流上下文；关闭后、或句柄属于其他引擎时返回 `None`
    fn context_mut(&mut self, handle: StreamHandle) -> Option<&mut StreamContext> {
        if self.closed || handle.session_id != self.session_id {
            return None;
        }
        self.streams.get_mut(handle.slot)
    }

    fn issue_reads(&mut self) -> usize {
        let mut issued = 0;

        for ctx in &mut self.streams {
            if !ctx.framer.is_available() {
                continue;
            }

            // 缓冲区不在手中说明读取仍在进行
            let Some(buffer) = ctx.receive_buffer.take() else {
                continue;
            };

            match ctx.framer.begin_reading(buffer) {
                ReadIssue::Issued => issued += 1,
                ReadIssue::Busy(buffer) | ReadIssue::Unavailable(buffer) => {
                    ctx.receive_buffer = Some(buffer);
                }
            }
        }

        issued
    }
}

impl Drop for StreamingMediaSession {
    fn drop(&mut self) {
        self.close();
    }
}
