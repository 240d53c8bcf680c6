//! # Tile Scheduler Demo Entry Point
//!
//! Calls into the library's `run()` function, which starts the engine and
//! walks an observer across procedurally generated terrain.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release -- [config.json]
//! ```

use std::process::ExitCode;

fn main() -> ExitCode {
    match tile_scheduler::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("tile-scheduler: {err}");
            ExitCode::FAILURE
        }
    }
}
