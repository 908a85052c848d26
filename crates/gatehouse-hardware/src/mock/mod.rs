//! Simulated hardware for development and testing.

mod gpio;
mod reader;

pub use gpio::MockGpio;
pub use reader::{MockReader, MockReaderHandle};
