// 流媒体会话引擎 - 传输层边界定义
//
// 本模块定义了引擎与外部传输层之间的接口：
// 读取延续请求、完成通知、终止通知以及传输源抽象。
// 传输源由传输层持有，引擎只保存非拥有引用。

use bytes::BytesMut;
use common::ReceptionCounters;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 流关联句柄
///
/// 绑定传输层身份与所属引擎实例。完成通知只携带句柄，
/// 引擎据此找回对应的流上下文。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    /// 所属引擎的会话ID
    pub session_id: Uuid,
    /// 引擎内部的流槽位
    pub slot: usize,
}

/// 读取延续请求
///
/// "最多交付 `buffer.capacity()` 字节到该缓冲区，完成后回报"。
/// 缓冲区在请求期间由传输层独占，随完成通知归还。
#[derive(Debug)]
pub struct ReadRequest {
    pub handle: StreamHandle,
    pub buffer: BytesMut,
}

impl ReadRequest {
    /// 本次请求可交付的最大字节数
    pub fn max_size(&self) -> usize {
        self.buffer.capacity()
    }

    /// 以给定数据完成请求
    ///
    /// 超出缓冲区容量的部分计为截断字节。
    pub fn complete(
        mut self,
        data: &[u8],
        presentation_time: Duration,
        duration_us: u32,
    ) -> FrameDelivery {
        let max_size = self.max_size();
        let delivered = data.len().min(max_size);

        self.buffer.clear();
        self.buffer.extend_from_slice(&data[..delivered]);

        FrameDelivery {
            handle: self.handle,
            buffer: self.buffer,
            bytes_delivered: delivered,
            bytes_truncated: data.len() - delivered,
            presentation_time,
            duration_us,
        }
    }
}

/// 读取完成通知
#[derive(Debug)]
pub struct FrameDelivery {
    pub handle: StreamHandle,
    /// 归还的接收缓冲区，前 `bytes_delivered` 字节有效
    pub buffer: BytesMut,
    pub bytes_delivered: usize,
    pub bytes_truncated: usize,
    pub presentation_time: Duration,
    pub duration_us: u32,
}

impl FrameDelivery {
    /// 本次交付的有效数据
    pub fn payload(&self) -> &[u8] {
        let end = self.bytes_delivered.min(self.buffer.len());
        &self.buffer[..end]
    }

    pub fn is_truncated(&self) -> bool {
        self.bytes_truncated > 0
    }

    pub fn duration(&self) -> Duration {
        Duration::from_micros(u64::from(self.duration_us))
    }
}

/// 传输层事件
///
/// 由外部调度原语串行投递给引擎。
#[derive(Debug)]
pub enum TransportEvent {
    /// 读取延续完成
    FrameDelivered(FrameDelivery),
    /// 会话级终止通知（如RTCP BYE），可能重复或迟到
    Goodbye(StreamHandle),
    /// 传输源本身永久关闭
    SourceClosed(StreamHandle),
}

impl TransportEvent {
    pub fn handle(&self) -> StreamHandle {
        match self {
            TransportEvent::FrameDelivered(delivery) => delivery.handle,
            TransportEvent::Goodbye(handle) | TransportEvent::SourceClosed(handle) => *handle,
        }
    }
}

/// 传输层事件发送端
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// 传输层事件接收端
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// 创建传输层事件通道
pub fn transport_event_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::unbounded_channel()
}

/// 传输源抽象
///
/// 外部传输层对单路流的数据源（非可重入的"数据就绪时交付"原语）。
/// 引擎保证同一路流任何时刻最多只有一个未完成的读取延续。
///
/// # 实现
///
/// - 真实实现：RTP接收源，完成时通过 `TransportEventSender` 投递事件
/// - 模拟实现：`session-simulator` 中按定时器生成合成负载
pub trait TransportSource: Send + Sync {
    /// 发起一次读取延续，立即返回
    ///
    /// 结果稍后以 `TransportEvent::FrameDelivered` 形式送达，并归还缓冲区。
    fn get_next_frame(&self, request: ReadRequest);

    /// 当前是否有未完成的读取
    fn is_currently_awaiting_data(&self) -> bool;

    /// 实时接收计数
    fn reception_counters(&self) -> ReceptionCounters;

    /// 停止取帧
    ///
    /// 已发出的读取不保证被取消，迟到的完成由引擎忽略。
    fn stop_getting_frames(&self) {}
}

/// 永远不可用的传输源，仅用于构造空的弱引用
pub(crate) struct NullSource;

impl TransportSource for NullSource {
    fn get_next_frame(&self, _request: ReadRequest) {}

    fn is_currently_awaiting_data(&self) -> bool {
        false
    }

    fn reception_counters(&self) -> ReceptionCounters {
        ReceptionCounters::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_handle() -> StreamHandle {
        StreamHandle {
            session_id: Uuid::new_v4(),
            slot: 0,
        }
    }

    #[test]
    fn test_request_complete_within_capacity() {
        let request = ReadRequest {
            handle: test_handle(),
            buffer: BytesMut::with_capacity(16),
        };
        let max_size = request.max_size();
        assert!(max_size >= 16);

        let delivery = request.complete(&[1, 2, 3, 4], Duration::from_millis(40), 33_333);
        assert_eq!(delivery.bytes_delivered, 4);
        assert_eq!(delivery.bytes_truncated, 0);
        assert_eq!(delivery.payload(), &[1, 2, 3, 4]);
        assert!(!delivery.is_truncated());
        assert_eq!(delivery.duration(), Duration::from_micros(33_333));
    }

    #[test]
    fn test_request_complete_truncates_oversized_data() {
        let request = ReadRequest {
            handle: test_handle(),
            buffer: BytesMut::with_capacity(8),
        };
        let max_size = request.max_size();
        let data = vec![0xAAu8; max_size + 5];

        let delivery = request.complete(&data, Duration::ZERO, 0);
        assert_eq!(delivery.bytes_delivered, max_size);
        assert_eq!(delivery.bytes_truncated, 5);
        assert!(delivery.is_truncated());
    }

    #[test]
    fn test_event_handle() {
        let handle = test_handle();
        assert_eq!(TransportEvent::Goodbye(handle).handle(), handle);
        assert_eq!(TransportEvent::SourceClosed(handle).handle(), handle);
    }
}
