//! Live trace ingestion over a local socket.
//!
//! The agent inside the test process connects once per run and writes the
//! same frame sequence a trace file carries, minus the file header. The
//! listener polls for connections with a short sleep between attempts and
//! hands every decoded record to the caller's sink.

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use covmap_error::Result;
use covmap_types::TraceRecord;
use tracing::{debug, warn};

use crate::TraceSource;
use crate::codec::{RecordAssembler, read_frame};

/// Requests a running [`SocketTraceListener::serve`] loop to stop after its
/// current poll or connection.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    stop: Arc<AtomicBool>,
}

impl ListenerHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Accepts agent connections and decodes their trace streams.
///
/// Connections are handled one at a time in arrival order. A malformed
/// stream is logged and dropped without taking the listener down; only
/// listener-level I/O failures and sink errors end the serve loop.
#[derive(Debug)]
pub struct SocketTraceListener {
    listener: TcpListener,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl SocketTraceListener {
    /// Bind and switch the socket to non-blocking accepts.
    pub fn bind(addr: impl ToSocketAddrs, poll_interval: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            stop: Arc::new(AtomicBool::new(false)),
            poll_interval,
        })
    }

    /// The bound address, useful after binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    #[must_use]
    pub fn stop_handle(&self) -> ListenerHandle {
        ListenerHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Poll for connections until stopped, feeding every decoded record to
    /// `sink`.
    pub fn serve<F>(&self, mut sink: F) -> Result<()>
    where
        F: FnMut(TraceRecord) -> Result<()>,
    {
        while !self.stop.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "accepted trace connection");
                    drain_connection(stream, peer, &mut sink)?;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(self.poll_interval);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

fn drain_connection<F>(stream: TcpStream, peer: SocketAddr, sink: &mut F) -> Result<()>
where
    F: FnMut(TraceRecord) -> Result<()>,
{
    // Accepted sockets inherit the listener's non-blocking mode.
    if let Err(err) = stream.set_nonblocking(false) {
        warn!(peer = %peer, error = %err, "could not switch trace connection to blocking reads");
        return Ok(());
    }
    let mut source = StreamTraceSource::new(stream);
    loop {
        match source.next_record() {
            Ok(Some(record)) => sink(record)?,
            Ok(None) => {
                debug!(peer = %peer, records = source.records, "trace connection finished");
                return Ok(());
            }
            Err(err) => {
                warn!(peer = %peer, error = %err, "abandoning malformed trace connection");
                return Ok(());
            }
        }
    }
}

/// One accepted connection's frame stream.
struct StreamTraceSource {
    stream: BufReader<TcpStream>,
    assembler: RecordAssembler,
    offset: u64,
    records: u64,
}

impl StreamTraceSource {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufReader::new(stream),
            assembler: RecordAssembler::new(),
            offset: 0,
            records: 0,
        }
    }
}

impl TraceSource for StreamTraceSource {
    fn next_record(&mut self) -> Result<Option<TraceRecord>> {
        loop {
            let Some((frame, consumed)) = read_frame(&mut self.stream, self.offset)? else {
                return Ok(None);
            };
            let at = self.offset;
            self.offset += consumed;
            if let Some(record) = self.assembler.push(frame, at)? {
                self.records += 1;
                return Ok(Some(record));
            }
        }
    }
}
