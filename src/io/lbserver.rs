//! The LBServer text transport (spec §4.1, §6), grounded in
//! `original_source/.../loconet/iohandler/lbserveriohandler.cpp`.
//!
//! Frames are carried as ASCII hex over a line-oriented TCP stream:
//! `SEND <hex-pairs>\n` outbound, `RECEIVE <hex-pairs>\n` / `SENT OK\n` /
//! `VERSION <s>\n` inbound. Hex-pair decoding is tolerant of stray
//! separator characters, matching the original's `readHexBytes`.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;
use crate::message::MessageFamily;

use super::{IoEvent, IoHandler};

fn format_send<M: MessageFamily>(message: &M) -> String {
    let bytes = message.to_bytes();
    let mut out = String::with_capacity(5 + 3 * bytes.len());
    out.push_str("SEND");
    for b in bytes {
        out.push(' ');
        out.push_str(&format!("{b:02X}"));
    }
    out.push('\n');
    out
}

fn is_hex_digit(c: u8) -> bool {
    c.is_ascii_hexdigit()
}

fn hex_digit_value(c: u8) -> u8 {
    (c as char).to_digit(16).unwrap_or(0xFF) as u8
}

/// Tolerant of any non-hex separator between pairs, matching the
/// original's single-char skip-and-retry loop.
fn read_hex_bytes(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if is_hex_digit(bytes[i]) && is_hex_digit(bytes[i + 1]) {
            out.push((hex_digit_value(bytes[i]) << 4) | hex_digit_value(bytes[i + 1]));
            i += 2;
        } else {
            i += 1;
        }
    }
    out
}

pub struct LbServerIoHandler<M> {
    host: String,
    port: u16,
    write_half: Option<Arc<Mutex<OwnedWriteHalf>>>,
    version: Option<String>,
    tx: mpsc::Sender<IoEvent<M>>,
    rx: mpsc::Receiver<IoEvent<M>>,
    _message: PhantomData<M>,
}

impl<M: MessageFamily + Send + 'static> LbServerIoHandler<M> {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let (tx, rx) = mpsc::channel(256);
        Self {
            host: host.into(),
            port,
            write_half: None,
            version: None,
            tx,
            rx,
            _message: PhantomData,
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn spawn_reader(&mut self, mut read_half: tokio::net::tcp::OwnedReadHalf) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let mut pending = Vec::new();
            loop {
                let n = match read_half.read(&mut buf).await {
                    Ok(0) => {
                        let _ = tx
                            .send(IoEvent::Error(TransportError::Read(std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                "connection closed",
                            ))))
                            .await;
                        return;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        let _ = tx.send(IoEvent::Error(TransportError::Read(e))).await;
                        return;
                    }
                };
                pending.extend_from_slice(&buf[..n]);

                loop {
                    let Some(eol) = pending.iter().position(|&b| b == b'\n' || b == b'\r') else {
                        break;
                    };
                    let line = String::from_utf8_lossy(&pending[..eol]).into_owned();
                    let is_crlf = pending[eol] == b'\r' && pending.get(eol + 1) == Some(&b'\n');
                    let is_lfcr = pending[eol] == b'\n' && pending.get(eol + 1) == Some(&b'\r');
                    let consumed = eol + 1 + usize::from(is_crlf || is_lfcr);
                    pending.drain(..consumed);

                    if let Some(rest) = line.strip_prefix("RECEIVE ") {
                        let bytes = read_hex_bytes(rest);
                        match M::parse(&bytes) {
                            Ok(Some((msg, _))) => {
                                let _ = tx.send(IoEvent::Frame(msg)).await;
                            }
                            Ok(None) => {}
                            Err(_) => {
                                if let Some(&b) = bytes.first() {
                                    let _ = tx.send(IoEvent::InvalidByte(b)).await;
                                }
                            }
                        }
                    }
                    // "SENT OK" / "VERSION <s>" carry no frame data; the
                    // write side doesn't gate on SENT OK here since sends
                    // are fire-and-forget over the shared write half.
                }
            }
        });
    }
}

impl<M: MessageFamily + Send + 'static> IoHandler<M> for LbServerIoHandler<M> {
    async fn start(&mut self) -> Result<(), TransportError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(TransportError::Open)?;
        let (read_half, write_half) = stream.into_split();
        self.write_half = Some(Arc::new(Mutex::new(write_half)));
        self.spawn_reader(read_half);
        let _ = self.tx.send(IoEvent::Started).await;
        Ok(())
    }

    fn send(&mut self, message: M) -> Result<(), TransportError> {
        let Some(write_half) = self.write_half.clone() else {
            return Err(TransportError::BufferFull);
        };
        let line = format_send(&message);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut guard = write_half.lock().await;
            if let Err(e) = guard.write_all(line.as_bytes()).await {
                let _ = tx.send(IoEvent::Error(TransportError::Write(e))).await;
            }
        });
        Ok(())
    }

    fn events(&mut self) -> &mut mpsc::Receiver<IoEvent<M>> {
        &mut self.rx
    }

    async fn stop(&mut self) {
        self.write_half = None;
    }
}
