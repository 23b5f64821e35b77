//! Atrium server binary entry point.
//!
//! All the real work happens in [`lib_atrium::init`]; this wrapper only sets
//! up the tokio runtime and maps a startup failure to a non-zero exit code.

use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = lib_atrium::init().await {
        error!("❌ Fatal error: {e}");
        std::process::exit(1);
    }
}
