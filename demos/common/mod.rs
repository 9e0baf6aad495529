use bytecheck::CheckBytes;
use rkyv::{Archive, Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Region file shared by the demos
pub const REGION_PATH: &str = "/tmp/mmap_bridge_demo";

/// Example data-structure broadcast between participants
#[derive(Archive, Deserialize, Serialize, Debug, PartialEq)]
#[archive_attr(derive(CheckBytes))]
pub struct Status {
    pub sequence: u64,
    pub sender: u32,
    pub message: String,
}

/// Log to stderr, filtered through `RUST_LOG` (default `debug`)
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_writer(std::io::stderr)
        .init();
}
