//! Device and host streams talking to each other over the in-memory link.

use hidstream::loopback::{self, LoopbackDevice, LoopbackHost};
use hidstream::{Capabilities, Config, DeviceStream, ErrorKind, HostStream, OverflowPolicy};
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CAPS: Capabilities = Capabilities {
    input_report_len: 64,
    output_report_len: 64,
};

fn connect(config: Config) -> (DeviceStream<LoopbackDevice>, HostStream<LoopbackHost>) {
    let (device, host) = loopback::pair(CAPS);
    let device = DeviceStream::with_config(device, CAPS, config.clone()).unwrap();
    let host = HostStream::with_config(host, config.poll_interval(Duration::from_millis(10)))
        .unwrap();
    (device, host)
}

fn read_exactly<R: Read>(mut r: R, len: usize) -> Vec<u8> {
    let mut data = vec![0; len];
    r.read_exact(&mut data).unwrap();
    data
}

#[test]
fn host_to_device() {
    let (device, host) = connect(Config::default());
    assert_eq!(
        host.capabilities(),
        Capabilities {
            input_report_len: 65,
            output_report_len: 65,
        }
    );

    let data: Vec<u8> = (0..2048).map(|i| (i % 256) as u8).collect();
    host.write(&data).unwrap();
    assert_eq!(read_exactly(&device, data.len()), data);
}

#[test]
fn device_to_host() {
    let (device, host) = connect(Config::default());

    let data: Vec<u8> = (0..2048).map(|i| (i * 13 % 256) as u8).collect();
    device.write(&data).unwrap();

    let mut received = Vec::new();
    let mut buf = [0; 2048];
    while received.len() < data.len() {
        let n = host.read(&mut buf[..data.len() - received.len()]).unwrap();
        assert!(n > 0);
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, data);
}

#[test]
fn byte_at_a_time_echo() {
    let (device, host) = connect(Config::default());
    let device = Arc::new(device);

    let echo = {
        let device = device.clone();
        thread::spawn(move || {
            let mut buf = [0; 100];
            loop {
                let n = device.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                device.write(&buf[..n]).unwrap();
            }
        })
    };

    let mut byte = [0; 1];
    for i in 0..256 {
        host.write(&[i as u8]).unwrap();
        assert_eq!(host.read(&mut byte).unwrap(), 1);
        assert_eq!(byte[0], i as u8);
    }

    device.dispose();
    echo.join().unwrap();
}

#[test]
fn stale_device_output_is_flushed() {
    let (device, host) = loopback::pair(CAPS);
    let device = DeviceStream::new(device, CAPS).unwrap();
    device.write(b"from before").unwrap();

    let mut host = HostStream::open(host).unwrap();
    device.write(b"fresh").unwrap();
    assert_eq!(read_exactly(&mut host, 5), b"fresh");
}

#[test]
fn backpressure_loses_nothing() {
    let config = Config::new()
        .buffer_reports(1)
        .overflow(OverflowPolicy::Backpressure);
    let (device, host) = connect(config);
    assert_eq!(device.buffer_capacity(), 64);

    let data: Vec<u8> = (0..1000).map(|i| (i % 199) as u8).collect();
    host.write(&data).unwrap();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(read_exactly(&device, data.len()), data);
    assert_eq!(device.dropped_bytes(), 0);
}

#[test]
fn lossy_overflow_saturates() {
    let config = Config::new().buffer_reports(1);
    let (device, host) = connect(config);

    let data = [0x5A; 200];
    host.write(&data).unwrap();

    while device.dropped_bytes() < 200 - 64 {
        thread::sleep(Duration::from_millis(5));
    }
    let mut buf = [0; 256];
    assert_eq!(device.read(&mut buf).unwrap(), 64);
    assert_eq!(device.dropped_bytes(), 136);
}

#[test]
fn dropping_device_breaks_host_writes() {
    let (device, host) = connect(Config::default());
    device.dispose();
    drop(device);

    // The receive thread lets go of the endpoint once it notices the disposal.
    let mut result = Ok(());
    for _ in 0..100 {
        result = host.write(b"anyone there?");
        if result.is_err() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Io);
    assert_eq!(host.write(b"x").unwrap_err().kind(), ErrorKind::Io);
}

#[test]
fn disposed_streams_report_end_of_stream() {
    let (device, host) = connect(Config::default());
    device.dispose();
    host.dispose();

    let mut buf = [0; 8];
    assert_eq!(device.read(&mut buf).unwrap(), 0);
    assert_eq!(host.read(&mut buf).unwrap(), 0);
    assert_eq!(device.write(b"x").unwrap_err().kind(), ErrorKind::Disposed);
    assert_eq!(host.write(b"x").unwrap_err().kind(), ErrorKind::Disposed);
}
