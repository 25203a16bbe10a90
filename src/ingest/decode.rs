//! Packet-to-frame loop shared by packet-based decoders.

use anyhow::Result;

/// Push/pull decoder: packets go in, frames come out some time later.
pub(crate) trait PacketDecoder {
    type Packet;
    type Frame;

    fn send_packet(&mut self, packet: &Self::Packet) -> Result<()>;

    /// Next decoded frame, `None` when the decoder needs more input.
    fn receive_frame(&mut self) -> Option<Self::Frame>;

    /// Signal end of input so buffered frames are released.
    fn send_eof(&mut self) -> Result<()>;
}

/// First frame decodable from `packets`.
///
/// Packets the decoder rejects are skipped. When input runs out the decoder is
/// flushed once, so a frame it was still holding is not lost.
pub(crate) fn first_frame<D, I>(decoder: &mut D, packets: I) -> Option<D::Frame>
where
    D: PacketDecoder,
    I: IntoIterator<Item = D::Packet>,
{
    for packet in packets {
        if let Err(err) = decoder.send_packet(&packet) {
            log::debug!("skipping undecodable packet: {:#}", err);
            continue;
        }
        if let Some(frame) = decoder.receive_frame() {
            return Some(frame);
        }
    }

    if let Err(err) = decoder.send_eof() {
        log::debug!("decoder refused end of input: {:#}", err);
    }
    decoder.receive_frame()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::VecDeque;

    /// Emits a frame for a packet only after `delay` further packets arrive.
    struct DelayingDecoder {
        delay: usize,
        pending: VecDeque<u32>,
        sent: Vec<u32>,
        eof: bool,
    }

    impl DelayingDecoder {
        fn new(delay: usize) -> Self {
            Self {
                delay,
                pending: VecDeque::new(),
                sent: Vec::new(),
                eof: false,
            }
        }
    }

    impl PacketDecoder for DelayingDecoder {
        type Packet = u32;
        type Frame = u32;

        fn send_packet(&mut self, packet: &u32) -> Result<()> {
            self.sent.push(*packet);
            if *packet == 0 {
                return Err(anyhow!("corrupt packet"));
            }
            self.pending.push_back(*packet);
            Ok(())
        }

        fn receive_frame(&mut self) -> Option<u32> {
            if self.eof || self.pending.len() > self.delay {
                return self.pending.pop_front();
            }
            None
        }

        fn send_eof(&mut self) -> Result<()> {
            self.eof = true;
            Ok(())
        }
    }

    #[test]
    fn frame_ready_mid_stream_stops_reading() {
        let mut decoder = DelayingDecoder::new(1);
        assert_eq!(first_frame(&mut decoder, vec![5, 6, 7, 8]), Some(5));
        assert_eq!(decoder.sent, vec![5, 6]);
        assert!(!decoder.eof);
    }

    #[test]
    fn buffered_last_frame_is_flushed_at_end_of_input() {
        let mut decoder = DelayingDecoder::new(3);
        assert_eq!(first_frame(&mut decoder, vec![9]), Some(9));
        assert!(decoder.eof);
    }

    #[test]
    fn rejected_packets_are_skipped() {
        let mut decoder = DelayingDecoder::new(0);
        assert_eq!(first_frame(&mut decoder, vec![0, 0, 4]), Some(4));
        assert_eq!(decoder.sent, vec![0, 0, 4]);
    }

    #[test]
    fn no_decodable_packets_yield_nothing() {
        let mut decoder = DelayingDecoder::new(0);
        assert_eq!(first_frame(&mut decoder, vec![0, 0]), None);
        assert_eq!(first_frame(&mut DelayingDecoder::new(0), Vec::new()), None);
    }
}
