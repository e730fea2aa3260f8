//! Lock-free SPSC event ring between render and control contexts

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::events::RenderEvent;

/// Create a connected sender/receiver pair holding up to `capacity` events
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (producer, consumer) = HeapRb::<RenderEvent>::new(capacity.max(1)).split();
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventSender {
            producer,
            dropped: Arc::clone(&dropped),
        },
        EventReceiver { consumer, dropped },
    )
}

/// Render-side end; posting never blocks or allocates
pub struct EventSender {
    producer: HeapProd<RenderEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Post an event, counting it as dropped if the ring is full
    #[inline]
    pub fn post(&mut self, event: RenderEvent) {
        if self.producer.try_push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Control-side end
pub struct EventReceiver {
    consumer: HeapCons<RenderEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventReceiver {
    /// Take every queued event
    pub fn drain(&mut self) -> Vec<RenderEvent> {
        let mut events = Vec::with_capacity(self.consumer.occupied_len());
        while let Some(event) = self.consumer.try_pop() {
            events.push(event);
        }
        events
    }

    /// Events lost to overflow since the queue was created
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = event_queue(8);
        tx.post(RenderEvent::TopologyObserved { generation: 1 });
        tx.post(RenderEvent::TopologyObserved { generation: 2 });
        assert_eq!(
            rx.drain(),
            vec![
                RenderEvent::TopologyObserved { generation: 1 },
                RenderEvent::TopologyObserved { generation: 2 },
            ]
        );
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_overflow_is_counted() {
        let (mut tx, mut rx) = event_queue(2);
        for total in 0..5 {
            tx.post(RenderEvent::Underrun { total });
        }
        assert_eq!(rx.drain().len(), 2);
        assert_eq!(rx.dropped(), 3);
    }
}
