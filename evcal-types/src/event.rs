use serde::{Deserialize, Serialize};

/// A single per-pixel brightness-change sample from an event camera.
///
/// `polarity = true` means the pixel got brighter ("ON" event); `false` means
/// it got darker ("OFF" event). Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Seconds since an arbitrary epoch shared by a single event source.
    pub t: f64,
    pub x: u16,
    pub y: u16,
    pub polarity: bool,
}

impl Event {
    pub fn new(t: f64, x: u16, y: u16, polarity: bool) -> Self {
        Self { t, x, y, polarity }
    }
}

/// A time-batched group of events as delivered by one ingestion chunk.
///
/// `events` is sorted by `t` ascending; `t_batch` equals the timestamp of the
/// last event. Arrays themselves must be delivered to the SAE in
/// non-decreasing `t_batch` order, but the events *within* one array need not
/// be pre-sorted by the caller — [`EventArray::new`] sorts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventArray {
    pub t_batch: f64,
    pub events: Vec<Event>,
}

impl EventArray {
    /// Build an `EventArray`, sorting `events` by timestamp and deriving
    /// `t_batch` from the last (latest) event.
    ///
    /// An empty slice produces `t_batch = f64::NEG_INFINITY`, which never
    /// compares greater than a real event's timestamp and so can never
    /// spuriously advance a SAE.
    pub fn new(mut events: Vec<Event>) -> Self {
        events.sort_by(|a, b| a.t.total_cmp(&b.t));
        let t_batch = events.last().map(|e| e.t).unwrap_or(f64::NEG_INFINITY);
        Self { t_batch, events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sorts_and_derives_t_batch() {
        let events = vec![
            Event::new(0.3, 1, 1, true),
            Event::new(0.1, 2, 2, false),
            Event::new(0.2, 3, 3, true),
        ];
        let arr = EventArray::new(events);
        assert_eq!(arr.t_batch, 0.3);
        let ts: Vec<f64> = arr.events.iter().map(|e| e.t).collect();
        assert_eq!(ts, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn empty_array_has_neg_infinity_batch_time() {
        let arr = EventArray::new(vec![]);
        assert_eq!(arr.t_batch, f64::NEG_INFINITY);
        assert!(arr.is_empty());
    }
}
