//! Demand-driven record flow between a blocking producer and an async consumer
//!
//! The producer runs on the blocking pool and parses records one at a time.
//! Before each record it takes one unit of demand from a [`DemandGate`]; with
//! no demand left it marks itself paused and waits. The consumer side,
//! [`RecordStream`], grants `prefetch` units whenever everything it asked
//! for has arrived. Dropping the stream cancels the gate, which wakes the
//! producer so it can return and drop its source handle.

use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use super::{LogicalSourceRecord, ResolverError, ResolverResult};

#[derive(Debug, Default)]
struct GateState {
    /// Records the consumer asked for that the producer has not sent yet
    outstanding: usize,
    /// Producer is waiting for demand
    paused: bool,
    cancelled: bool,
}

/// Outstanding-demand counter plus pause and cancel flags
#[derive(Debug, Default)]
pub struct DemandGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl DemandGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `n` more records
    pub fn request(&self, n: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.outstanding = state.outstanding.saturating_add(n);
            state.paused = false;
        }
        self.changed.notify_all();
    }

    /// Stop the producer at its next checkpoint
    pub fn cancel(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.cancelled = true;
        }
        self.changed.notify_all();
    }

    /// Take one unit of demand, waiting while there is none
    pub fn acquire(&self) -> ResolverResult<()> {
        let mut state = self.state.lock().map_err(|_| ResolverError::Cancelled)?;
        loop {
            if state.cancelled {
                return Err(ResolverError::Cancelled);
            }
            if state.outstanding > 0 {
                state.outstanding -= 1;
                return Ok(());
            }
            if !state.paused {
                trace!("record producer paused, waiting for demand");
                state.paused = true;
            }
            state = self
                .changed
                .wait(state)
                .map_err(|_| ResolverError::Cancelled)?;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().map(|s| s.paused).unwrap_or(false)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().map(|s| s.cancelled).unwrap_or(true)
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().map(|s| s.outstanding).unwrap_or(0)
    }
}

type Item<R> = ResolverResult<LogicalSourceRecord<R>>;

/// Producer end handed to a resolver
pub struct RecordSink<R> {
    sender: UnboundedSender<Item<R>>,
    gate: Arc<DemandGate>,
    emitted: u64,
}

impl<R> RecordSink<R> {
    /// Send one record, blocking until the consumer wants it
    pub fn emit(&mut self, record: LogicalSourceRecord<R>) -> ResolverResult<()> {
        self.gate.acquire()?;
        self.sender
            .send(Ok(record))
            .map_err(|_| ResolverError::Cancelled)?;
        self.emitted += 1;
        Ok(())
    }

    /// Check for cancellation without taking demand
    pub fn checkpoint(&self) -> ResolverResult<()> {
        if self.gate.is_cancelled() || self.sender.is_closed() {
            Err(ResolverError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn fail(&self, error: ResolverError) {
        let _ = self.sender.send(Err(error));
    }
}

/// Consumer end: an async stream of records with batched demand
pub struct RecordStream<R> {
    inner: UnboundedReceiverStream<Item<R>>,
    gate: Arc<DemandGate>,
    prefetch: usize,
    in_flight: usize,
}

impl<R> RecordStream<R> {
    pub fn gate(&self) -> &Arc<DemandGate> {
        &self.gate
    }
}

impl<R> Stream for RecordStream<R> {
    type Item = Item<R>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.in_flight == 0 {
            this.gate.request(this.prefetch);
            this.in_flight = this.prefetch;
        }
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(record))) => {
                this.in_flight -= 1;
                Poll::Ready(Some(Ok(record)))
            }
            other => other,
        }
    }
}

impl<R> Drop for RecordStream<R> {
    fn drop(&mut self) {
        self.gate.cancel();
    }
}

/// Run `produce` on the blocking pool and return the consumer stream.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_producer<R, F>(label: String, prefetch: usize, produce: F) -> RecordStream<R>
where
    R: Send + 'static,
    F: FnOnce(&mut RecordSink<R>) -> ResolverResult<()> + Send + 'static,
{
    let (sender, receiver) = unbounded_channel();
    let gate = Arc::new(DemandGate::new());
    let mut sink = RecordSink {
        sender,
        gate: Arc::clone(&gate),
        emitted: 0,
    };

    tokio::task::spawn_blocking(move || match produce(&mut sink) {
        Ok(()) => debug!("{}: produced {} records", label, sink.emitted()),
        Err(ResolverError::Cancelled) => {
            debug!("{}: cancelled after {} records", label, sink.emitted())
        }
        Err(e) => sink.fail(e),
    });

    RecordStream {
        inner: UnboundedReceiverStream::new(receiver),
        gate,
        prefetch: prefetch.max(1),
        in_flight: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{LogicalSource, SourceRef};
    use futures::StreamExt;
    use std::time::Duration;

    fn source() -> Arc<LogicalSource> {
        Arc::new(LogicalSource::new(SourceRef::new("numbers")))
    }

    #[tokio::test]
    async fn test_records_arrive_in_order() {
        let logical_source = source();
        let stream = spawn_producer("numbers".to_string(), 2, move |sink| {
            for i in 0..5u32 {
                sink.emit(LogicalSourceRecord::new(Arc::clone(&logical_source), i))?;
            }
            Ok(())
        });

        let values: Vec<u32> = stream.map(|r| r.unwrap().record).collect().await;
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_producer_pauses_without_demand() {
        let logical_source = source();
        let mut stream = spawn_producer("endless".to_string(), 3, move |sink| loop {
            sink.emit(LogicalSourceRecord::new(Arc::clone(&logical_source), ()))?;
        });

        for _ in 0..3 {
            stream.next().await.unwrap().unwrap();
        }
        let gate = Arc::clone(stream.gate());
        for _ in 0..100 {
            if gate.is_paused() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(gate.is_paused());
        assert_eq!(gate.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_error_is_delivered() {
        let stream: RecordStream<()> = spawn_producer("failing".to_string(), 1, |_| {
            Err(ResolverError::Read {
                source_name: "x".to_string(),
                message: "boom".to_string(),
            })
        });
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ResolverError::Read { .. })));
    }

    #[test]
    fn test_gate_cancel_wakes_acquire() {
        let gate = Arc::new(DemandGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || gate.acquire())
        };
        std::thread::sleep(Duration::from_millis(20));
        gate.cancel();
        assert!(matches!(waiter.join().unwrap(), Err(ResolverError::Cancelled)));
    }
}
