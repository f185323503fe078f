//! Admission control for concurrent jobs
//!
//! A slot is taken when a job is admitted into `Prepared` and held until the
//! job reaches `Done` or `Aborted`. Slots are never handed back between
//! stages.

#[derive(Debug, Clone)]
pub struct AdmissionController {
    limit: usize,
    in_flight: usize,
    peak: usize,
    admitted: usize,
}

impl AdmissionController {
    /// `limit` is clamped to at least one slot
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            in_flight: 0,
            peak: 0,
            admitted: 0,
        }
    }

    /// Take a slot if one is free
    pub fn try_admit(&mut self) -> bool {
        if self.in_flight >= self.limit {
            return false;
        }
        self.in_flight += 1;
        self.admitted += 1;
        self.peak = self.peak.max(self.in_flight);
        true
    }

    /// Give back the slot of a finished job
    pub fn release(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight < self.limit
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Highest number of simultaneous jobs seen
    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn admitted(&self) -> usize {
        self.admitted
    }
}
