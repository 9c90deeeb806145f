//! Measures round trips through a device running an echo loop.
//!
//! Sends one Byte at a time and waits for it to come back, like the `gadget_echo` demo expects.

use hidstream::usb::UsbHid;
use hidstream::HostStream;
use std::time::Instant;
use std::{error, process};
use structopt::StructOpt;

#[derive(StructOpt)]
struct Opts {
    /// Device to open, as `bus:address`. Defaults to the only device with the default IDs.
    #[structopt(long)]
    path: Option<String>,

    /// Number of Bytes to send.
    #[structopt(long, default_value = "2048")]
    count: usize,

    /// Number of times to reopen the device and repeat the test.
    #[structopt(long, default_value = "1")]
    rounds: usize,
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

    for round in 0..opts.rounds {
        let hid = match &opts.path {
            Some(path) => UsbHid::open_path(path.parse()?)?,
            None => UsbHid::open_unique()?,
        };
        println!("[{}] {} ({:?})", round, hid.info().path, hid.product().ok());
        let stream = HostStream::open(hid)?;

        let start = Instant::now();
        let mut reply = [0; 1];
        for i in 0..opts.count {
            let byte = i as u8;
            stream.write(&[byte])?;
            // Skip anything left over from an earlier, interrupted run.
            loop {
                if stream.read(&mut reply)? == 0 {
                    return Err("stream closed".into());
                }
                if reply[0] == byte {
                    break;
                }
            }
        }

        let secs = start.elapsed().as_secs_f64();
        println!("round trips per second: {:.1}", opts.count as f64 / secs);
        println!("ms per round trip:      {:.3}", secs * 1000.0 / opts.count as f64);
        stream.dispose();
    }

    Ok(())
}
