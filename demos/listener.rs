mod common;

use common::{Status, REGION_PATH};
use mmap_bridge::Bridge;
use std::thread;
use std::time::Duration;

fn main() {
    common::init_tracing();

    // Print every status written by another participant
    let bridge = Bridge::<Status>::with_listener(REGION_PATH, |status: Status| {
        println!(
            "sequence: {} | sender: {} | message: {}",
            status.sequence, status.sender, status.message
        );
    })
    .expect("failed to join region");

    println!("listening on {} in slot {:?}", REGION_PATH, bridge.slot());
    thread::sleep(Duration::from_secs(30));

    // Dropping the bridge stops the listener and leaves the region
}
