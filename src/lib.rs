//! gainstage - Real-Time Signal Chain and Gain Staging Engine
//!
//! gainstage hosts an ordered chain of processing units, renders audio
//! through it from a real-time callback and keeps the signal level under
//! control at every stage.
//!
//! # Architecture
//!
//! The engine is split in two halves by [`Engine::init`]:
//! - Control plane ([`Engine`]): chain edits, parameter writes, trims,
//!   metering and transport. Edits build a new immutable topology that is
//!   published atomically.
//! - Render plane ([`Renderer`]): runs on the audio thread, loads the
//!   current topology once per block and never allocates or blocks.
//!
//! Signal flow per block:
//!
//! ```text
//! input -> trim -> pre gain -> serial units -> parallel section
//!       -> post gain -> trim -> master limiter -> true-peak limiter -> output
//! ```
//!
//! Every unit sits between unity-compensating gain nodes, so an idle chain
//! is level-neutral.
//!
//! # Example
//!
//! ```
//! use gainstage::{ChainMode, Engine, EngineConfig};
//! use gainstage::dsp::GainUnit;
//! use gainstage::engine::{AudioBuffer, ChannelLayout};
//!
//! let (mut engine, mut renderer) = Engine::init(EngineConfig::default()).unwrap();
//! let id = engine.connect_unit(Box::new(GainUnit::new(-6.0)), ChainMode::Serial).unwrap();
//! engine.set_parameter(id, "gain_db", -3.0).unwrap();
//! engine.play();
//!
//! let input = AudioBuffer::sine(440.0, 0.5, 512, ChannelLayout::Stereo, 48000);
//! let mut output = AudioBuffer::new(512, ChannelLayout::Stereo);
//! let outcome = renderer.render(&input, &mut output);
//! assert_eq!(outcome.active_units, 1);
//! ```

pub mod chain;
pub mod channel;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod gain;
pub mod metering;

pub use chain::{ChainMode, UnitDescriptor, UnitId};
pub use channel::{EngineEvent, WriteState, WriteTicket};
pub use config::EngineConfig;
pub use engine::{Engine, Renderer};
pub use error::{EngineError, Result};
pub use metering::MeteringSnapshot;
