//! # Core Module
//!
//! Concurrency primitives shared by the scheduler and the tile grid.
//!
//! ## Key Components
//! - `MtResource`: Thread-safe reference-counted resource with read-write locking
//! - `CancellationToken`: Shared one-way flag used to abandon queued work
//! - `MainThreadDispatcher`: Hands callbacks from worker threads to the consumer thread
//!
//! ## Usage
//! ```rust
//! use tile_scheduler::core::{CancellationToken, MainThreadDispatcher, MtResource};
//!
//! let counter = MtResource::new(0);
//! *counter.get_mut() += 1;
//! assert_eq!(*counter.get(), 1);
//!
//! let token = CancellationToken::new();
//! token.cancel();
//! assert!(token.is_cancelled());
//!
//! let dispatcher = MainThreadDispatcher::new();
//! dispatcher.post(Box::new(|| println!("runs on the main thread")));
//! assert_eq!(dispatcher.run_pending(), Ok(1));
//! ```

pub mod cancellation;
pub mod main_thread;
pub mod mt_resource;

pub use cancellation::CancellationToken;
pub use main_thread::{MainThreadCallback, MainThreadDispatcher};
pub use mt_resource::MtResource;
