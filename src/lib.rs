//! Core of an interactive three-view NIfTI viewer: a background anatomy
//! with a thresholded statistical overlay, a shared crosshair cursor, and
//! millimetre coordinates in MNI template space.
//!
//! The egui front end lives in the binary; everything here is independent
//! of the windowing layer and can be driven from tests.

pub mod compositor;
pub mod config;
pub mod coords;
pub mod cursor;
pub mod decode;
pub mod error;
pub mod events;
pub mod net;
pub mod session;
pub mod threshold;
pub mod volume;

pub use compositor::{compose_slice, present, Layers, Presentation, SliceImage};
pub use config::{DisplayConfig, Kernel, MapParams, ThresholdMode, ViewerConfig};
pub use coords::{format_mm, Axis, Grid};
pub use cursor::{Cursor, FieldState};
pub use decode::{decode_volume, load_volume_file};
pub use error::{DecodeError, LoadError, NetworkError, ParseError};
pub use events::{CoordinateBus, CoordinateSubscription, MmCoord};
pub use net::{Fetcher, HttpFetcher};
pub use session::{SlotStatus, ViewerSession};
pub use volume::Volume;
