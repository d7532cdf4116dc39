//! Outbound frame slot
//!
//! Media bound for a TCP receiver crosses from the coordinator to the
//! session's writer through a single-slot, latest-wins queue: offering a
//! frame replaces any frame the writer has not yet picked up. A receiver
//! whose writer cannot keep up therefore observes frame loss, never
//! unbounded latency — media streaming prefers drop to backlog. Responses
//! travel on a separate lossless queue.
//!
//! The slot is single-producer (the coordinator) / single-consumer (the
//! session's writer task).

use tokio::sync::watch;

use crate::protocol::InterleavedFrame;

/// Create a connected slot pair.
pub fn frame_slot() -> (FrameSender, FrameReceiver) {
    let (tx, rx) = watch::channel(None);
    (FrameSender { tx }, FrameReceiver { rx })
}

/// Coordinator side of the slot.
pub struct FrameSender {
    tx: watch::Sender<Option<InterleavedFrame>>,
}

impl FrameSender {
    /// Offer a frame, replacing any undelivered one.
    pub fn offer(&self, frame: InterleavedFrame) {
        let _ = self.tx.send(Some(frame));
    }
}

/// Writer side of the slot.
pub struct FrameReceiver {
    rx: watch::Receiver<Option<InterleavedFrame>>,
}

impl FrameReceiver {
    /// Wait for the next frame. Returns `None` once the sender is gone
    /// (the coordinator dropped the client entry).
    pub async fn next(&mut self) -> Option<InterleavedFrame> {
        loop {
            self.rx.changed().await.ok()?;
            let frame = self.rx.borrow_and_update().clone();
            if let Some(frame) = frame {
                return Some(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn frame(channel: u8, payload: &'static [u8]) -> InterleavedFrame {
        InterleavedFrame::new(channel, Bytes::from_static(payload))
    }

    #[tokio::test]
    async fn test_delivers_frames_in_order_when_consumer_keeps_up() {
        let (tx, mut rx) = frame_slot();
        tx.offer(frame(0, b"one"));
        assert_eq!(rx.next().await.unwrap().payload.as_ref(), b"one");
        tx.offer(frame(0, b"two"));
        assert_eq!(rx.next().await.unwrap().payload.as_ref(), b"two");
    }

    #[tokio::test]
    async fn test_slow_consumer_sees_latest_frame_only() {
        let (tx, mut rx) = frame_slot();
        tx.offer(frame(0, b"old"));
        tx.offer(frame(0, b"older"));
        tx.offer(frame(2, b"latest"));

        let got = rx.next().await.unwrap();
        assert_eq!(got.channel, 2);
        assert_eq!(got.payload.as_ref(), b"latest");
    }

    #[tokio::test]
    async fn test_receiver_ends_when_sender_dropped() {
        let (tx, mut rx) = frame_slot();
        drop(tx);
        assert!(rx.next().await.is_none());
    }
}
