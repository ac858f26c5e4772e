//! Encoded frames carried by the bus

use bytes::Bytes;

/// Which ingestion point a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Encoded video access unit
    Video,
    /// Encoded audio packet
    Audio,
}

/// An encoded frame produced by the capture/encode stage
///
/// Cheap to clone: the payload is shared via `Bytes` reference counting.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    /// Video or audio
    pub kind: FrameKind,
    /// Presentation timestamp in milliseconds
    pub pts: u64,
    /// Encoded payload
    pub data: Bytes,
    /// Whether this is a keyframe (video only)
    pub is_keyframe: bool,
}

impl MediaFrame {
    /// Create a video frame
    pub fn video(pts: u64, data: Bytes, is_keyframe: bool) -> Self {
        Self {
            kind: FrameKind::Video,
            pts,
            data,
            is_keyframe,
        }
    }

    /// Create an audio frame
    pub fn audio(pts: u64, data: Bytes) -> Self {
        Self {
            kind: FrameKind::Audio,
            pts,
            data,
            is_keyframe: false,
        }
    }

    /// Whether this is a video frame
    pub fn is_video(&self) -> bool {
        self.kind == FrameKind::Video
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constructors() {
        let v = MediaFrame::video(40, Bytes::from_static(&[0, 0, 0, 1]), true);
        assert!(v.is_video());
        assert!(v.is_keyframe);
        assert_eq!(v.size(), 4);

        let a = MediaFrame::audio(20, Bytes::from_static(&[1, 2]));
        assert_eq!(a.kind, FrameKind::Audio);
        assert!(!a.is_keyframe);
    }

    #[test]
    fn test_clone_shares_payload() {
        let frame = MediaFrame::video(0, Bytes::from(vec![7u8; 1024]), false);
        let copy = frame.clone();

        assert_eq!(frame.data.as_ptr(), copy.data.as_ptr());
    }
}
