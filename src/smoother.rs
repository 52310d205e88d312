/// Per-address RSSI smoothing over a bounded sliding window.
use std::collections::{HashMap, VecDeque};

use crate::address::Address;

/// Running RSSI mean over the last `window` readings of each address.
///
/// Windows live as long as the smoother; the registry drops the whole
/// smoother when it is reset.
#[derive(Debug, Clone)]
pub struct SignalSmoother {
    window: usize,
    history: HashMap<Address, VecDeque<i8>>,
}

impl SignalSmoother {
    /// A window of 0 is treated as 1.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            history: HashMap::new(),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Push a reading and return the truncated mean of the current window.
    pub fn update(&mut self, address: Address, rssi: i8) -> i8 {
        let window = self.window;
        // Grows with the readings seen, not with the configured window
        let history = self.history.entry(address).or_default();

        history.push_back(rssi);
        while history.len() > window {
            history.pop_front();
        }

        mean(history)
    }

    /// Number of addresses with a window
    pub fn tracked(&self) -> usize {
        self.history.len()
    }
}

/// Integer mean, truncated toward zero.
fn mean(samples: &VecDeque<i8>) -> i8 {
    let sum: i32 = samples.iter().map(|&s| i32::from(s)).sum();
    let len = i32::try_from(samples.len()).unwrap_or(i32::MAX).max(1);
    // The mean of i8 samples always fits in i8
    i8::try_from(sum / len).unwrap_or(i8::MIN)
}
