// 流媒体会话引擎 - 帧源适配器
//
// 把单路流的外部传输源（"数据就绪时交付"原语）桥接到引擎的拉取模型。
// 适配器不持有缓冲区，只负责转发：
//
// - 发起读取延续并记录"等待数据"状态
// - 把分帧器产出的样本转发给输出回调
// - 传输源永久关闭时调用关闭委托

use super::source::{ReadRequest, StreamHandle, TransportSource};
use super::{SampleCallback, StreamClosedCallback};
use bytes::BytesMut;
use common::{MediaSample, ReceptionCounters, StreamId};
use std::sync::Weak;
use tracing::{debug, trace};

/// 发起读取的结果
#[derive(Debug)]
pub enum ReadIssue {
    /// 已发出读取延续，缓冲区交由传输层
    Issued,
    /// 该流已有未完成的读取，缓冲区原样归还
    Busy(BytesMut),
    /// 传输源已不可用，缓冲区原样归还
    Unavailable(BytesMut),
}

/// 帧源适配器
///
/// 每路流一个，由对应的分帧器持有。
pub struct LiveFramedSource {
    stream_id: StreamId,
    handle: StreamHandle,
    source: Weak<dyn TransportSource>,
    awaiting: bool,
    closed: bool,
    on_sample: Option<SampleCallback>,
    on_source_closed: Option<StreamClosedCallback>,
}

impl LiveFramedSource {
    pub fn new(stream_id: StreamId, handle: StreamHandle, source: Weak<dyn TransportSource>) -> Self {
        Self {
            stream_id,
            handle,
            source,
            awaiting: false,
            closed: false,
            on_sample: None,
            on_source_closed: None,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    pub fn on_sample_set(&mut self, callback: Option<SampleCallback>) {
        self.on_sample = callback;
    }

    pub fn on_closed_set(&mut self, callback: Option<StreamClosedCallback>) {
        self.on_source_closed = callback;
    }

    /// 传输源仍然存在且未报告永久关闭
    pub fn is_available(&self) -> bool {
        !self.closed && self.source.strong_count() > 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 是否有未完成的读取
    pub fn is_awaiting_data(&self) -> bool {
        if self.awaiting {
            return true;
        }

        self.source
            .upgrade()
            .map_or(false, |source| source.is_currently_awaiting_data())
    }

    /// 向传输源请求下一帧
    ///
    /// 已在等待数据时不会重复发起，传输层对同一路流的重复读取是未定义行为。
    pub fn do_get_next_frame(&mut self, buffer: BytesMut) -> ReadIssue {
        if self.closed {
            return ReadIssue::Unavailable(buffer);
        }

        let Some(source) = self.source.upgrade() else {
            return ReadIssue::Unavailable(buffer);
        };

        if self.awaiting || source.is_currently_awaiting_data() {
            trace!("Stream {} already awaiting data, skipping read", self.stream_id);
            return ReadIssue::Busy(buffer);
        }

        self.awaiting = true;
        trace!(
            "Issuing read continuation for stream {} (max {} bytes)",
            self.stream_id,
            buffer.capacity()
        );
        source.get_next_frame(ReadRequest {
            handle: self.handle,
            buffer,
        });

        ReadIssue::Issued
    }

    /// 读取延续已完成
    pub fn frame_completed(&mut self) {
        self.awaiting = false;
    }

    /// 把完成的样本推向输出回调
    pub fn deliver_sample(&self, sample: MediaSample) {
        if let Some(callback) = &self.on_sample {
            callback(self.stream_id, sample);
        }
    }

    /// 传输源报告永久关闭
    ///
    /// 只在第一次关闭时调用关闭委托，返回是否为首次关闭。
    pub fn handle_closure(&mut self) -> bool {
        if self.closed {
            return false;
        }

        self.closed = true;
        self.awaiting = false;
        debug!("Transport source closed for stream {}", self.stream_id);

        if let Some(callback) = &self.on_source_closed {
            callback(self.stream_id);
        }

        true
    }

    pub fn reception_counters(&self) -> Option<ReceptionCounters> {
        self.source.upgrade().map(|source| source.reception_counters())
    }

    pub fn stop_getting_frames(&mut self) {
        if let Some(source) = self.source.upgrade() {
            source.stop_getting_frames();
        }
        self.on_sample = None;
        self.on_source_closed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::mock_source::MockSource;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn adapter_for(source: &Arc<MockSource>) -> LiveFramedSource {
        let handle = StreamHandle {
            session_id: Uuid::new_v4(),
            slot: 0,
        };
        let source: Arc<dyn TransportSource> = source.clone();
        LiveFramedSource::new(5, handle, Arc::downgrade(&source))
    }

    #[test]
    fn test_issue_read_only_once() {
        let source = MockSource::new();
        let mut adapter = adapter_for(&source);

        assert!(matches!(
            adapter.do_get_next_frame(BytesMut::with_capacity(64)),
            ReadIssue::Issued
        ));
        assert!(adapter.is_awaiting_data());
        assert!(matches!(
            adapter.do_get_next_frame(BytesMut::with_capacity(64)),
            ReadIssue::Busy(_)
        ));
        assert_eq!(source.issued_count(), 1);

        adapter.frame_completed();
        source.take_pending();
        assert!(!adapter.is_awaiting_data());
        assert!(matches!(
            adapter.do_get_next_frame(BytesMut::with_capacity(64)),
            ReadIssue::Issued
        ));
        assert_eq!(source.issued_count(), 2);
    }

    #[test]
    fn test_source_dropped_is_unavailable() {
        let source = MockSource::new();
        let mut adapter = adapter_for(&source);
        drop(source);

        assert!(!adapter.is_available());
        assert!(adapter.reception_counters().is_none());
        assert!(matches!(
            adapter.do_get_next_frame(BytesMut::with_capacity(64)),
            ReadIssue::Unavailable(_)
        ));
    }

    #[test]
    fn test_closure_invokes_delegate_once() {
        let source = MockSource::new();
        let mut adapter = adapter_for(&source);
        let closed = Arc::new(Mutex::new(Vec::new()));
        let sink = closed.clone();
        adapter.on_closed_set(Some(Arc::new(move |id| sink.lock().unwrap().push(id))));

        assert!(adapter.handle_closure());
        assert!(!adapter.handle_closure());
        assert_eq!(*closed.lock().unwrap(), vec![5]);
        assert!(matches!(
            adapter.do_get_next_frame(BytesMut::with_capacity(64)),
            ReadIssue::Unavailable(_)
        ));
    }

    #[test]
    fn test_deliver_sample_forwards_stream_id() {
        let source = MockSource::new();
        let mut adapter = adapter_for(&source);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        adapter.on_sample_set(Some(Arc::new(move |id, sample: MediaSample| {
            sink.lock().unwrap().push((id, sample.len()))
        })));

        adapter.deliver_sample(MediaSample::new(
            5,
            "H264",
            bytes::Bytes::from_static(&[1, 2, 3]),
            std::time::Duration::ZERO,
            std::time::Duration::ZERO,
        ));
        assert_eq!(*received.lock().unwrap(), vec![(5, 3)]);
    }
}
