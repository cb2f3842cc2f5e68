//! # Events Module
//!
//! Progress reporting for ingest runs.
//!
//! Every stage emits events through a crossbeam channel; the CLI renders
//! them as a progress bar, tests usually pass `null_sender()`.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         match event {
//!             Event::Copy(CopyEvent::FileCopied { relative_path, .. }) => {
//!                 println!("copied {}", relative_path.display())
//!             }
//!             Event::Session(SessionEvent::ShareLink { url, .. }) => println!("{}", url),
//!             _ => {}
//!         }
//!     }
//! });
//!
//! pipeline.run_with_events(&source_root, &sender)?;
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
