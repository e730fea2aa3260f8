//! Processing units
//!
//! The [`ProcessingUnit`] capability the engine consumes, plus a handful of
//! reference units used by the CLI, benchmarks and tests.

mod eq;
mod gain;
mod limiter;
pub mod unit;

pub use eq::{EqUnit, FilterType};
pub use gain::GainUnit;
pub use limiter::Limiter;
pub use unit::{ParamDescriptor, ParamUnit, ProcessingUnit};

use crate::engine::AudioBuffer;

/// Unit that leaves audio untouched
#[derive(Debug, Clone, Default)]
pub struct Passthrough;

impl ProcessingUnit for Passthrough {
    fn process(&mut self, _buffer: &mut AudioBuffer) {}

    fn set_bypass(&mut self, _bypassed: bool) {}

    fn describe_parameters(&self) -> Vec<ParamDescriptor> {
        Vec::new()
    }

    fn set_parameter(&mut self, _key: &str, _value: f32) {}

    fn display_kind(&self) -> &str {
        "passthrough"
    }
}

/// Build a reference unit by kind name
pub fn create_unit(kind: &str) -> Option<Box<dyn ProcessingUnit>> {
    match kind {
        "gain" => Some(Box::new(GainUnit::default())),
        "eq" => Some(Box::new(EqUnit::default())),
        "limiter" => Some(Box::new(Limiter::default())),
        "passthrough" => Some(Box::new(Passthrough)),
        _ => None,
    }
}
