//! Parameter hand-off from a non-real-time thread to the audio thread.
//!
//! A single-producer/single-consumer ring carries whole parameter sets. The
//! audio thread drains it between blocks, so a coefficient set is always
//! swapped in one piece and never observed half-written.

use super::compressor::CompressorSettings;
use ringbuf::{Consumer, Producer, RingBuffer};

// Pending messages before pushes start failing.
pub const CONTROL_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMessage {
    SetCrossover { index: usize, hz: f32 },
    SetCompressor { band: usize, settings: CompressorSettings },
    SetLinkwitzRiley(bool),
    Reset,
}

/// Sending half, owned by the UI/automation thread.
pub struct ProcessorControl {
    producer: Producer<ControlMessage>,
}

impl ProcessorControl {
    /// Queue a message. Never blocks; a full queue hands the message back.
    pub fn send(&mut self, msg: ControlMessage) -> Result<(), ControlMessage> {
        self.producer.push(msg)
    }

    pub fn set_crossover_frequency(&mut self, index: usize, hz: f32) -> Result<(), ControlMessage> {
        self.send(ControlMessage::SetCrossover { index, hz })
    }

    pub fn set_compressor_params(
        &mut self,
        band: usize,
        settings: CompressorSettings,
    ) -> Result<(), ControlMessage> {
        self.send(ControlMessage::SetCompressor { band, settings })
    }

    pub fn set_linkwitz_riley(&mut self, enabled: bool) -> Result<(), ControlMessage> {
        self.send(ControlMessage::SetLinkwitzRiley(enabled))
    }

    pub fn reset(&mut self) -> Result<(), ControlMessage> {
        self.send(ControlMessage::Reset)
    }

    /// Number of messages waiting for the audio thread.
    pub fn pending(&self) -> usize {
        self.producer.len()
    }
}

/// Receiving half, drained on the audio thread.
pub(crate) struct ControlReceiver {
    consumer: Consumer<ControlMessage>,
}

impl ControlReceiver {
    #[inline]
    pub(crate) fn pop(&mut self) -> Option<ControlMessage> {
        self.consumer.pop()
    }
}

pub(crate) fn control_channel(capacity: usize) -> (ProcessorControl, ControlReceiver) {
    let (producer, consumer) = RingBuffer::<ControlMessage>::new(capacity.max(1)).split();
    (ProcessorControl { producer }, ControlReceiver { consumer })
}
