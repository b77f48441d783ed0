//! Frame-in-flight rotation

/// Index-based ring of frames in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRing {
    flight_count: usize,
    current: usize,
    frame_number: u64,
}

impl FrameRing {
    /// Ring of `flight_count` frames (at least one)
    pub fn new(flight_count: usize) -> Self {
        Self {
            flight_count: flight_count.max(1),
            current: 0,
            frame_number: 0,
        }
    }

    /// Move to the next frame and return its index
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.flight_count;
        self.frame_number += 1;
        self.current
    }

    /// Index of the frame being recorded
    pub fn current(&self) -> usize {
        self.current
    }

    /// Frames advanced since creation
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Number of frames in flight
    pub fn flight_count(&self) -> usize {
        self.flight_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_wraps() {
        let mut ring = FrameRing::new(2);
        assert_eq!(ring.current(), 0);
        assert_eq!(ring.advance(), 1);
        assert_eq!(ring.advance(), 0);
        assert_eq!(ring.frame_number(), 2);
    }

    #[test]
    fn test_zero_flight_count_is_clamped() {
        let mut ring = FrameRing::new(0);
        assert_eq!(ring.flight_count(), 1);
        assert_eq!(ring.advance(), 0);
    }
}
