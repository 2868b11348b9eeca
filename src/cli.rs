use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::pipeline::Step;

#[derive(Parser)]
#[command(name = "vodflow")]
#[command(author, version, about = "Video ingest and HLS packaging pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker pool until interrupted
    Worker,

    /// Upload a local file and start its pipeline run
    Submit {
        /// Video file to ingest
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Put an existing video back on the queue
    Enqueue {
        /// Video id
        video_id: String,

        /// Step to start from
        #[arg(long, default_value_t = Step::Validate)]
        step: Step,

        /// Rewind the status to what the step expects, clearing a failure
        #[arg(long)]
        reset: bool,
    },

    /// Show the stored record of a video
    Status {
        /// Video id
        video_id: String,
    },
}
