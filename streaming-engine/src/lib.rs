// 流媒体会话引擎
//
// 把协商好的多路音视频流（子会话）接到外部传输层上，持续读取原始负载，
// 按编解码族重新分帧为样本，并通过单一回调交给应用。

pub mod config;
pub mod framers;
pub mod session;
pub mod streaming;

pub use config::EngineConfig;
pub use framers::{CodecFamily, MediaFramer};
pub use session::{MediaSession, MediaSubsession};
pub use streaming::{
    transport_event_channel, FrameDelivery, ReadRequest, SessionDispatcher, StreamHandle,
    StreamingMediaSession, TransportEvent, TransportEventReceiver, TransportEventSender,
    TransportSource,
};

pub use common::{
    MediaDescriptor, MediaSample, ReceptionCounters, Result, SampleAttributes, StreamDescriptor,
    StreamId, StreamStatistics, StreamingError,
};
