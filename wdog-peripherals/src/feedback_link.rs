//! Feedback wire for host runs. Bytes the transport puts on the bus are
//! handed to a forwarder thread over a channel and written to whoever
//! connects to the TCP port, so an external monitor can watch the
//! decoder's reports live.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};
use std::io::Write;
use std::net::TcpListener;

use rsbus_protocol::feedback::parse_feedback_byte;
use wdog_core::rsbus::ByteSink;

pub struct FeedbackLink {
    tx: Sender<u8>,
}

fn link_thread(rx: Receiver<u8>, addr: String) {
    let listener = match TcpListener::bind(&addr) {
        Ok(listener) => listener,
        Err(e) => {
            error!("could not open feedback port {}: {:?}", addr, e);
            return;
        }
    };

    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("feedback monitor failed to connect: {:?}", e);
                continue;
            }
        };
        info!("feedback monitor connected");
        loop {
            let byte = match rx.recv() {
                Ok(byte) => byte,
                Err(_) => return, // decoder side is gone
            };
            if stream.write_all(&[byte]).is_err() {
                info!("feedback monitor hung up");
                break;
            }
        }
    }
}

impl FeedbackLink {
    pub fn new(addr: &str) -> FeedbackLink {
        let (tx, rx) = unbounded();
        let addr = addr.to_string();
        std::thread::spawn(move || link_thread(rx, addr));
        FeedbackLink { tx }
    }
}

impl ByteSink for FeedbackLink {
    fn send(&mut self, byte: u8) {
        if self.tx.send(byte).is_err() {
            warn!("feedback forwarder thread is gone");
        }
    }
}

/// Wire for runs without a monitor attached: every byte is decoded and
/// logged instead of forwarded.
pub struct LogSink;

impl ByteSink for LogSink {
    fn send(&mut self, byte: u8) {
        match parse_feedback_byte(byte) {
            Some(report) => info!(
                "feedback nibble {:#06b} ({} half)",
                report.data,
                if report.high_nibble { "high" } else { "low" }
            ),
            None => warn!("feedback byte {:#04x} fails parity", byte),
        }
    }
}
