// 流媒体会话引擎 - Streaming模块
//
// 本模块实现了多路流的连续读取引擎。
//
// # 核心组件
//
// - `TransportSource`: 外部传输层的数据源抽象
// - `LiveFramedSource`: 帧源适配器，每路流一个
// - `StreamingMediaSession`: 会话引擎，驱动读取延续并汇聚样本
// - `SessionDispatcher`: 把传输层事件串行投递给引擎
//
// # 并发模型
//
// 引擎本身不加锁，所有状态变更都发生在调度器串行投递事件的上下文中。
// 回调在该上下文中同步调用，不得重入引擎。

pub mod dispatcher;
pub mod handler;
pub mod live_source;
pub mod source;

#[cfg(test)]
pub(crate) mod mock_source;


pub use dispatcher::SessionDispatcher;
pub use handler::StreamingMediaSession;
pub use live_source::{LiveFramedSource, ReadIssue};
pub use source::{
    transport_event_channel, FrameDelivery, ReadRequest, StreamHandle, TransportEvent,
    TransportEventReceiver, TransportEventSender, TransportSource,
};

use common::{MediaSample, StreamId};
use std::sync::Arc;

/// 样本输出回调：（流编号，样本）
pub type SampleCallback = Arc<dyn Fn(StreamId, MediaSample) + Send + Sync>;

/// 流关闭回调：（流编号）
pub type StreamClosedCallback = Arc<dyn Fn(StreamId) + Send + Sync>;

/// 每次交付后询问是否继续读取
pub type ContinueReadingCallback = Arc<dyn Fn() -> bool + Send + Sync>;
