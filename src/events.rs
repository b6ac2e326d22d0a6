//! External coordinate-set channel.
//!
//! Any part of the application can publish a millimetre position (a peak
//! picked from a results list, say); every live viewer subscription sees
//! it. Dropping the subscription unsubscribes.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::TryRecvError};

const DEFAULT_CAPACITY: usize = 16;

/// A position in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MmCoord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl MmCoord {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Publisher side of the coordinate channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CoordinateBus {
    tx: broadcast::Sender<MmCoord>,
}

impl Default for CoordinateBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CoordinateBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send `coord` to every subscriber; returns how many there were.
    pub fn publish(&self, coord: MmCoord) -> usize {
        self.tx.send(coord).unwrap_or(0)
    }

    pub fn subscribe(&self) -> CoordinateSubscription {
        CoordinateSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug)]
pub struct CoordinateSubscription {
    rx: broadcast::Receiver<MmCoord>,
}

impl CoordinateSubscription {
    /// Next pending coordinate without blocking. Requests dropped because
    /// this subscriber fell behind are skipped.
    pub fn try_next(&mut self) -> Option<MmCoord> {
        loop {
            match self.rx.try_recv() {
                Ok(coord) => return Some(coord),
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("coordinate subscriber lagged, {skipped} request(s) dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}
