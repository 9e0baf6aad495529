mod common;

use common::{Status, REGION_PATH};
use mmap_bridge::Bridge;
use std::thread;
use std::time::Duration;

fn main() {
    common::init_tracing();

    // Join the region, creating it when no other participant is running
    let mut bridge = Bridge::<Status>::open(REGION_PATH).expect("failed to join region");

    for sequence in 0..10 {
        let status = Status {
            sequence,
            sender: std::process::id(),
            message: format!("hello #{sequence}"),
        };

        // Replace the shared value, every other participant gets notified
        let written = bridge.write(&status).expect("failed to write status");
        println!("written: {} bytes | participants: {:?}", written, bridge.participants());

        thread::sleep(Duration::from_millis(500));
    }

    // Leave the region, removing it when this was the last participant
    bridge.close().expect("failed to leave region");
}
