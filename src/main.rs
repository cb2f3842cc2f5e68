//! # card-ingest CLI
//!
//! ## Usage
//! ```bash
//! card-ingest ingest /media/card
//! card-ingest ingest /media/card --output json
//! card-ingest stats
//! card-ingest sessions
//! ```

mod cli;

use card_ingest::Result;

fn main() -> Result<()> {
    cli::run()
}
