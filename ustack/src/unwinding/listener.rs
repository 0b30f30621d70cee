//! Receivers for what the visitor emits
//!
//! The visitor calls out through [`TracerListener`]. Two adapters are
//! provided: [`RecordingListener`] keeps everything in memory, and
//! [`ChannelListener`] hands records to another thread without ever blocking
//! the visitor.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::warn;

use crate::trace_data::{CompletedFunctionCall, CorrectedCallStack};

pub trait TracerListener {
    fn on_callstack_sample(&mut self, sample: CorrectedCallStack);
    fn on_function_call(&mut self, call: CompletedFunctionCall);
}

impl<L: TracerListener + ?Sized> TracerListener for &mut L {
    fn on_callstack_sample(&mut self, sample: CorrectedCallStack) {
        (**self).on_callstack_sample(sample);
    }

    fn on_function_call(&mut self, call: CompletedFunctionCall) {
        (**self).on_function_call(call);
    }
}

impl<L: TracerListener + ?Sized> TracerListener for Box<L> {
    fn on_callstack_sample(&mut self, sample: CorrectedCallStack) {
        (**self).on_callstack_sample(sample);
    }

    fn on_function_call(&mut self, call: CompletedFunctionCall) {
        (**self).on_function_call(call);
    }
}

/// An absent listener discards everything
impl<L: TracerListener> TracerListener for Option<L> {
    fn on_callstack_sample(&mut self, sample: CorrectedCallStack) {
        if let Some(listener) = self {
            listener.on_callstack_sample(sample);
        }
    }

    fn on_function_call(&mut self, call: CompletedFunctionCall) {
        if let Some(listener) = self {
            listener.on_function_call(call);
        }
    }
}

/// Keeps every emitted record, in emission order
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub samples: Vec<CorrectedCallStack>,
    pub calls: Vec<CompletedFunctionCall>,
}

impl RecordingListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TracerListener for RecordingListener {
    fn on_callstack_sample(&mut self, sample: CorrectedCallStack) {
        self.samples.push(sample);
    }

    fn on_function_call(&mut self, call: CompletedFunctionCall) {
        self.calls.push(call);
    }
}

/// A record on its way to a consumer thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerRecord {
    CallstackSample(CorrectedCallStack),
    FunctionCall(CompletedFunctionCall),
}

/// Forwards records over a bounded channel
///
/// Sending never blocks: when the consumer falls behind, records are dropped
/// and counted.
#[derive(Debug)]
pub struct ChannelListener {
    tx: Sender<ListenerRecord>,
    dropped: u64,
}

impl ChannelListener {
    #[must_use]
    pub fn new(tx: Sender<ListenerRecord>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Create a listener and the receiving end of its channel
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<ListenerRecord>) {
        let (tx, rx) = bounded(capacity);
        (Self::new(tx), rx)
    }

    /// Records that could not be delivered
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn send(&mut self, record: ListenerRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            Err(TrySendError::Disconnected(_)) => {
                if self.dropped == 0 {
                    warn!("Listener channel disconnected, dropping records");
                }
                self.dropped += 1;
            }
        }
    }
}

impl TracerListener for ChannelListener {
    fn on_callstack_sample(&mut self, sample: CorrectedCallStack) {
        self.send(ListenerRecord::CallstackSample(sample));
    }

    fn on_function_call(&mut self, call: CompletedFunctionCall) {
        self.send(ListenerRecord::FunctionCall(call));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CpuId, FunctionId, Tid, Timestamp};

    fn sample(ts: u64) -> CorrectedCallStack {
        CorrectedCallStack {
            tid: Tid(1),
            cpu: CpuId(0),
            timestamp: Timestamp(ts),
            frames: vec![0x1000],
        }
    }

    fn call() -> CompletedFunctionCall {
        CompletedFunctionCall {
            tid: Tid(1),
            cpu: CpuId(0),
            function: FunctionId(0xf),
            entry_timestamp: Timestamp(1),
            exit_timestamp: Timestamp(2),
            depth: 0,
        }
    }

    fn emit<L: TracerListener>(mut listener: L) {
        listener.on_callstack_sample(sample(1));
        listener.on_function_call(call());
    }

    #[test]
    fn test_recording_listener_through_reference() {
        let mut recorder = RecordingListener::new();
        emit(&mut recorder);
        let boxed: Box<dyn TracerListener> = Box::new(RecordingListener::new());
        emit(boxed);

        assert_eq!(recorder.samples.len(), 1);
        assert_eq!(recorder.calls.len(), 1);
    }

    #[test]
    fn test_optional_listener() {
        emit(None::<RecordingListener>);

        let mut recorder = Some(RecordingListener::new());
        emit(&mut recorder);
        assert_eq!(recorder.map(|r| r.calls.len()), Some(1));
    }

    #[test]
    fn test_channel_listener_delivers_in_order() {
        let (mut listener, rx) = ChannelListener::bounded(4);
        listener.on_callstack_sample(sample(1));
        listener.on_function_call(call());

        assert_eq!(
            rx.try_recv().unwrap(),
            ListenerRecord::CallstackSample(sample(1))
        );
        assert_eq!(rx.try_recv().unwrap(), ListenerRecord::FunctionCall(call()));
        assert_eq!(listener.dropped(), 0);
    }

    #[test]
    fn test_channel_listener_drops_when_full() {
        let (mut listener, rx) = ChannelListener::bounded(1);
        listener.on_callstack_sample(sample(1));
        listener.on_callstack_sample(sample(2));

        assert_eq!(listener.dropped(), 1);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_channel_listener_survives_disconnect() {
        let (mut listener, rx) = ChannelListener::bounded(1);
        drop(rx);
        listener.on_function_call(call());
        assert_eq!(listener.dropped(), 1);
    }
}
