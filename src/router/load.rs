//! Router load components
//!
//! A load component turns recent per-router activity into a normalised
//! utilisation figure in `[0, 100]` that adaptive routing can compare across
//! directions. SLB publishes its figure to all neighbours once per clock
//! tick; SO is read on demand by the neighbour that wants it.

use serde::{Deserialize, Serialize};

/// The available load model variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadKind {
    /// Static-Load-Balanced model
    Slb,
    /// Self-Organising model
    So,
}

/// Per-router load bookkeeping
#[derive(Debug, Clone)]
pub struct LoadComponent {
    kind: LoadKind,
    /// Flits injected or forwarded since the last publication window
    window: u32,
    data_flit_speedup: u32,
    message_length: u32,
}

impl LoadComponent {
    /// Create a load component with the given model constants
    pub fn new(kind: LoadKind, data_flit_speedup: u32, message_length: u32) -> Self {
        Self {
            kind,
            window: 0,
            data_flit_speedup,
            message_length,
        }
    }

    /// Which model this component implements
    pub fn kind(&self) -> LoadKind {
        self.kind
    }

    /// Account one injected or forwarded flit
    pub fn register_flit(&mut self) {
        self.window = self.window.saturating_add(1);
    }

    /// Normalised local utilisation in `[0, 100]`:
    /// `100 * window / (8 * (6 * speedup + message_length))`, clamped.
    pub fn local_load(&self) -> u32 {
        let ceiling = 8 * (6 * self.data_flit_speedup + self.message_length);
        (self.window * 100 / ceiling).min(100)
    }

    /// Close the publication window
    pub fn reset_window(&mut self) {
        self.window = 0;
    }
}

/// Blend a router's own load with the mean load of its other neighbours:
/// `(2 * local + mean(neighbours)) / 3`. With no neighbour readings the
/// local figure stands alone.
pub fn blend_direction_load(local: u32, neighbours: &[u32]) -> u32 {
    if neighbours.is_empty() {
        return local;
    }
    let mean = neighbours.iter().sum::<u32>() / neighbours.len() as u32;
    (2 * local + mean) / 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_load_is_clamped() {
        let mut load = LoadComponent::new(LoadKind::Slb, 2, 9);
        assert_eq!(load.local_load(), 0);

        // 8 * (6*2 + 9) = 168 flits saturate the window
        for _ in 0..200 {
            load.register_flit();
        }
        assert_eq!(load.local_load(), 100);

        load.reset_window();
        assert_eq!(load.local_load(), 0);
    }

    #[test]
    fn test_partial_window() {
        let mut load = LoadComponent::new(LoadKind::Slb, 2, 9);
        for _ in 0..84 {
            load.register_flit();
        }
        // half of the 168-flit ceiling
        assert_eq!(load.local_load(), 50);
    }

    #[test]
    fn test_blend_weights_local_double() {
        assert_eq!(blend_direction_load(60, &[30, 30, 30]), 50);
        assert_eq!(blend_direction_load(60, &[]), 60);
        assert_eq!(blend_direction_load(0, &[90, 0, 0]), 10);
    }
}
