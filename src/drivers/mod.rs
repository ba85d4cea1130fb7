// src/drivers/mod.rs
pub mod buffer;
pub mod error;
pub mod fft;
pub mod limits;
pub mod pipeline;
pub mod siggen;
pub mod source;
pub mod units;
pub mod verdict;
pub mod window;
pub use error::ProdTestError;
pub use source::{DeviceSession, StimulusController};
