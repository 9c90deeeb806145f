//! Echoes everything received on a Linux HID gadget back to the host.

use hidstream::gadget::HidGadget;
use hidstream::{Capabilities, DeviceStream};
use std::path::PathBuf;
use std::{error, process};
use structopt::StructOpt;

#[derive(StructOpt)]
struct Opts {
    /// Gadget device node.
    #[structopt(long, parse(from_os_str), default_value = "/dev/hidg0")]
    dev: PathBuf,

    /// Report length configured for the gadget function.
    #[structopt(long, default_value = "64")]
    report_len: usize,
}

fn main() {
    match run() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

fn run() -> Result<(), Box<dyn error::Error>> {
    env_logger::init();
    let opts: Opts = Opts::from_args();

    let gadget = HidGadget::open(&opts.dev)?;
    let caps = Capabilities {
        input_report_len: opts.report_len,
        output_report_len: opts.report_len,
    };
    let stream = DeviceStream::new(gadget, caps)?;

    let mut buf = [0; 100];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            eprintln!("gadget closed");
            return Ok(());
        }
        stream.write(&buf[..n])?;
    }
}
