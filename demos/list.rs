//! Lists the HID interfaces connected to the system.

use hidstream::{usb, Result};
use std::process;

fn main() {
    match run() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn run() -> Result<()> {
    env_logger::init();

    for info in usb::devices()? {
        println!(
            "Bus {:03} Address {:03}: ID {:04x}:{:04x} interface {}, reports in {} / out {} Bytes",
            info.path.bus_number,
            info.path.address,
            info.vendor_id,
            info.product_id,
            info.interface,
            info.capabilities.input_report_len,
            info.capabilities.output_report_len,
        );
    }

    Ok(())
}
