//! Speech output: engines and the synthesizer station.

pub mod command;
pub mod engine;
pub mod synthesizer;

pub use command::CommandSpeechEngine;
pub use engine::{MockSpeechEngine, SpeechEngine};
pub use synthesizer::SpeechSynthesizer;
