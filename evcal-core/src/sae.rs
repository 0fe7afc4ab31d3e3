use tracing::trace;

use evcal_types::{DecayMode, Error as TypesError, Event, EventArray, Image, SaeConfig};

use crate::errors::Result;

/// Timestamp written to a pixel that has never received an event. Compares
/// as "older than any real event" everywhere it is used.
const NEVER: f64 = f64::NEG_INFINITY;

/// Per-pixel Surface of Active Events (C2).
///
/// Maintains the timestamp of the most recent event at every image
/// location, one plane per polarity. This is the only mutable state in the
/// pipeline; everything downstream (normal-flow estimation onward) reads a
/// snapshot of it and is otherwise stateless between calls.
#[derive(Debug, Clone)]
pub struct Sae {
    width: usize,
    height: usize,
    // planes[0] = negative polarity, planes[1] = positive polarity.
    planes: [Vec<f64>; 2],
    time_latest: f64,
    dropped_out_of_bounds: u64,
    decay_tau: f64,
}

impl Sae {
    /// Allocate a new, empty surface for the given configuration.
    ///
    /// The only failure mode is an invalid configuration (non-positive
    /// dimensions or non-positive `decay_tau`), which is fatal per this
    /// crate's error taxonomy.
    pub fn new(cfg: &SaeConfig) -> Result<Self> {
        cfg.validate().map_err(TypesError::from)?;
        let (width, height) = (cfg.width as usize, cfg.height as usize);
        Ok(Self {
            width,
            height,
            planes: [vec![NEVER; width * height], vec![NEVER; width * height]],
            time_latest: NEVER,
            dropped_out_of_bounds: 0,
            decay_tau: cfg.decay_tau,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn time_latest(&self) -> f64 {
        self.time_latest
    }

    /// The `τ` this surface was configured with, used by the normal-flow
    /// estimator to size its activity window.
    pub fn decay_tau(&self) -> f64 {
        self.decay_tau
    }

    /// Number of events dropped so far for having out-of-range pixel
    /// coordinates. Observability only; never blocks ingestion.
    pub fn dropped_out_of_bounds(&self) -> u64 {
        self.dropped_out_of_bounds
    }

    #[inline]
    fn index(&self, x: u16, y: u16) -> Option<usize> {
        let (x, y) = (x as usize, y as usize);
        if x < self.width && y < self.height {
            Some(y * self.width + x)
        } else {
            None
        }
    }

    /// Write one event's timestamp into the appropriate polarity plane, if
    /// it is both in-bounds and newer than the value already there.
    ///
    /// Out-of-bounds and out-of-order events are silently dropped -- this is
    /// normal operation for an event camera near the sensor edges and for
    /// within-batch reordering, not an error.
    pub fn grab_event(&mut self, e: &Event) {
        let Some(idx) = self.index(e.x, e.y) else {
            self.dropped_out_of_bounds += 1;
            trace!(x = e.x, y = e.y, "event out of SAE bounds, dropped");
            return;
        };
        let plane = &mut self.planes[e.polarity as usize];
        if e.t > plane[idx] {
            plane[idx] = e.t;
            if e.t > self.time_latest {
                self.time_latest = e.t;
            }
        }
    }

    /// Ingest every event of one [`EventArray`], in order.
    pub fn ingest(&mut self, array: &EventArray) {
        for e in &array.events {
            self.grab_event(e);
        }
    }

    #[inline]
    fn timestamp(&self, x: usize, y: usize, polarity: bool) -> f64 {
        self.planes[polarity as usize][y * self.width + x]
    }

    /// The more recent of the two polarity planes at `(x, y)`, and which
    /// polarity it came from. Used both by [`Self::decay_time_surface`]'s
    /// `Diff`/ignore-polarity paths and by the normal-flow estimator's
    /// per-pixel "active" test.
    #[inline]
    pub(crate) fn latest_polarity_at(&self, x: usize, y: usize) -> (f64, bool) {
        let neg = self.timestamp(x, y, false);
        let pos = self.timestamp(x, y, true);
        if pos >= neg {
            (pos, true)
        } else {
            (neg, false)
        }
    }

    #[inline]
    fn decay(&self, t: f64, tau: f64) -> f64 {
        if t == NEVER || self.time_latest == NEVER {
            0.0
        } else {
            (-(self.time_latest - t) / tau).exp()
        }
    }

    /// Render the fused, exponentially-decayed time surface as an 8-bit
    /// image for visualization or as a dense downstream input.
    ///
    /// Pixels never updated render as 0; a pixel whose selected plane equals
    /// `time_latest` renders as 255.
    pub fn decay_time_surface(&self, ignore_polarity: bool, mode: DecayMode, tau: f64) -> Image<u8> {
        let to_u8 = |d: f64| -> u8 { (d * 255.0).round().clamp(0.0, 255.0) as u8 };
        let mut out = Image::filled(self.width, self.height, 0u8);
        for y in 0..self.height {
            for x in 0..self.width {
                let value = if ignore_polarity {
                    let (t, _) = self.latest_polarity_at(x, y);
                    to_u8(self.decay(t, tau))
                } else {
                    match mode {
                        DecayMode::PositiveOnly => to_u8(self.decay(self.timestamp(x, y, true), tau)),
                        DecayMode::NegativeOnly => to_u8(self.decay(self.timestamp(x, y, false), tau)),
                        DecayMode::Diff => {
                            let dp = self.decay(self.timestamp(x, y, true), tau);
                            let dn = self.decay(self.timestamp(x, y, false), tau);
                            to_u8(0.5 + 0.5 * (dp - dn))
                        }
                    }
                };
                *out.get_mut(x, y) = value;
            }
        }
        out
    }

    /// Like [`Self::decay_time_surface`] but returns the fused raw
    /// timestamps directly, without exponential decay or rescaling.
    pub fn raw_time_surface(&self, ignore_polarity: bool, mode: DecayMode) -> Image<f64> {
        let mut out = Image::filled(self.width, self.height, NEVER);
        for y in 0..self.height {
            for x in 0..self.width {
                let value = if ignore_polarity {
                    self.latest_polarity_at(x, y).0
                } else {
                    match mode {
                        DecayMode::PositiveOnly => self.timestamp(x, y, true),
                        DecayMode::NegativeOnly => self.timestamp(x, y, false),
                        DecayMode::Diff => self.latest_polarity_at(x, y).0,
                    }
                };
                *out.get_mut(x, y) = value;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(w: u32, h: u32) -> SaeConfig {
        SaeConfig {
            width: w,
            height: h,
            decay_tau: 0.01,
        }
    }

    #[test]
    fn monotonic_update_and_time_latest() {
        let mut sae = Sae::new(&cfg(4, 4)).unwrap();
        sae.grab_event(&Event::new(1.0, 1, 1, true));
        sae.grab_event(&Event::new(0.5, 1, 1, true)); // older, ignored
        assert_eq!(sae.timestamp(1, 1, true), 1.0);
        assert_eq!(sae.time_latest(), 1.0);
        sae.grab_event(&Event::new(2.0, 2, 2, false));
        assert_eq!(sae.time_latest(), 2.0);
    }

    #[test]
    fn out_of_order_shuffle_matches_sorted_stream() {
        let events_sorted = vec![
            Event::new(0.1, 0, 0, true),
            Event::new(0.2, 1, 0, true),
            Event::new(0.3, 0, 1, true),
            Event::new(0.4, 1, 1, true),
        ];
        let mut shuffled = events_sorted.clone();
        shuffled.reverse();

        let mut a = Sae::new(&cfg(4, 4)).unwrap();
        for e in &events_sorted {
            a.grab_event(e);
        }
        let mut b = Sae::new(&cfg(4, 4)).unwrap();
        for e in &shuffled {
            b.grab_event(e);
        }
        assert_eq!(a.planes, b.planes);
        assert_eq!(a.time_latest(), b.time_latest());
    }

    #[test]
    fn out_of_bounds_events_are_dropped_and_counted() {
        let mut sae = Sae::new(&cfg(4, 4)).unwrap();
        sae.grab_event(&Event::new(1.0, 10, 10, true));
        assert_eq!(sae.dropped_out_of_bounds(), 1);
        assert_eq!(sae.time_latest(), NEVER);
    }

    #[test]
    fn decay_surface_bounds_and_never_written_pixel() {
        let mut sae = Sae::new(&cfg(2, 2)).unwrap();
        sae.grab_event(&Event::new(1.0, 0, 0, true));
        let img = sae.decay_time_surface(true, DecayMode::Diff, 0.01);
        assert_eq!(*img.get(0, 0), 255);
        assert_eq!(*img.get(1, 1), 0);
    }

    #[test]
    fn empty_sae_decay_surface_is_all_zero() {
        let sae = Sae::new(&cfg(3, 3)).unwrap();
        let img = sae.decay_time_surface(true, DecayMode::Diff, 0.01);
        assert!(img.as_slice().iter().all(|&v| v == 0));
    }
}
