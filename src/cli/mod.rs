//! CLI Module
//!
//! Command-line interface for offline rendering through the engine and for
//! inspecting its gain-staging constants.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// gainstage - signal-chain and gain-staging engine
#[derive(Parser, Debug)]
#[command(name = "gainstage")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a WAV file through a chain of reference units
    Process {
        /// Input WAV file (mono or stereo)
        input: PathBuf,

        /// Output WAV file
        output: PathBuf,

        /// Unit spec: kind[:key=value,...][@parallel], repeatable
        ///
        /// Kinds: gain, eq, limiter, passthrough
        #[arg(short, long = "unit")]
        units: Vec<String>,

        /// Engine configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Master input trim in dB
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        input_trim_db: f32,

        /// Master output trim in dB
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        output_trim_db: f32,

        /// Output bit depth (16, 24 or 32)
        #[arg(long, default_value_t = 24)]
        bit_depth: u16,
    },

    /// Print the soft-clip transfer curve as JSON
    Curve {
        /// Knee as a fraction of full scale
        #[arg(long, default_value_t = crate::gain::DEFAULT_KNEE)]
        knee: f32,

        /// Number of points over [-1.5, 1.5]
        #[arg(long, default_value_t = 31)]
        points: usize,
    },

    /// Print the headroom policy as JSON
    Policy,
}
