// 会话/子会话元数据
//
// 会话协商层产出的轻量值对象：子会话列表，每个子会话带编码名称
// 和一个指向传输源的非拥有引用。

use crate::streaming::source::TransportSource;
use common::StreamId;
use std::fmt;
use std::sync::{Arc, Weak};

/// 媒体子会话（一路协商好的音视频轨道）
#[derive(Clone)]
pub struct MediaSubsession {
    stream_id: StreamId,
    medium: String,
    codec_name: String,
    source: Weak<dyn TransportSource>,
}

impl MediaSubsession {
    /// 创建子会话
    ///
    /// 传输源由传输层持有，这里只保存弱引用。
    pub fn new(
        stream_id: StreamId,
        medium: impl Into<String>,
        codec_name: impl Into<String>,
        source: &Arc<dyn TransportSource>,
    ) -> Self {
        Self {
            stream_id,
            medium: medium.into(),
            codec_name: codec_name.into(),
            source: Arc::downgrade(source),
        }
    }

    /// 创建没有可用传输源的子会话（传输建立被拒绝）
    pub fn without_source(
        stream_id: StreamId,
        medium: impl Into<String>,
        codec_name: impl Into<String>,
    ) -> Self {
        Self {
            stream_id,
            medium: medium.into(),
            codec_name: codec_name.into(),
            source: Weak::<crate::streaming::source::NullSource>::new(),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// 媒体类型（"video" / "audio"）
    pub fn medium(&self) -> &str {
        &self.medium
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    /// 解析传输源，传输层已释放时返回 `None`
    pub fn transport_source(&self) -> Option<Arc<dyn TransportSource>> {
        self.source.upgrade()
    }

    pub(crate) fn source_ref(&self) -> Weak<dyn TransportSource> {
        self.source.clone()
    }
}

impl fmt::Debug for MediaSubsession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSubsession")
            .field("stream_id", &self.stream_id)
            .field("medium", &self.medium)
            .field("codec_name", &self.codec_name)
            .field("source_available", &(self.source.strong_count() > 0))
            .finish()
    }
}

/// 媒体会话
#[derive(Debug, Clone, Default)]
pub struct MediaSession {
    name: String,
    subsessions: Vec<MediaSubsession>,
}

impl MediaSession {
    pub fn new(name: impl Into<String>, subsessions: Vec<MediaSubsession>) -> Self {
        Self {
            name: name.into(),
            subsessions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subsessions(&self) -> &[MediaSubsession] {
        &self.subsessions
    }

    pub fn subsession_count(&self) -> usize {
        self.subsessions.len()
    }

    pub fn subsession(&self, index: usize) -> Option<&MediaSubsession> {
        self.subsessions.get(index)
    }
}
