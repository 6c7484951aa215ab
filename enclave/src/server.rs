// SPDX-License-Identifier:

//! Vsock accept loop. Each connection is served on its own thread.

use crate::acquire::{Acquirer, AttestationSource};
use crate::config::Config;
use crate::session::{self, SessionState};
use anyhow::{Context, Result};
use log::{info, warn};
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use vsock::{VMADDR_CID_ANY, VsockAddr, VsockListener};

/// Bind on `(VMADDR_CID_ANY, config.vsock_port)` and serve forever.
///
/// Only returns on a bind failure; accept errors are logged and skipped.
pub fn serve<C, D>(config: Arc<Config>, acquirer: Arc<Acquirer<C, D>>) -> Result<()>
where
    C: AttestationSource + Send + Sync + 'static,
    D: AttestationSource + Send + Sync + 'static,
{
    let addr = VsockAddr::new(VMADDR_CID_ANY, config.vsock_port);
    let listener = VsockListener::bind(&addr)
        .with_context(|| format!("failed to bind vsock port {}", config.vsock_port))?;
    info!("listening on vsock port {}", config.vsock_port);

    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!("connection from cid {} port {}", peer.cid(), peer.port());
                spawn_session(stream, Arc::clone(&acquirer), Arc::clone(&config));
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

/// Run one session on a new thread. The stream is dropped, and so closed,
/// when the session ends.
pub fn spawn_session<S, C, D>(
    mut stream: S,
    acquirer: Arc<Acquirer<C, D>>,
    config: Arc<Config>,
) -> JoinHandle<SessionState>
where
    S: Read + Write + Send + 'static,
    C: AttestationSource + Send + Sync + 'static,
    D: AttestationSource + Send + Sync + 'static,
{
    thread::spawn(move || {
        let state = session::handle_connection(&mut stream, &acquirer, &config);
        info!("session finished: {state}");
        state
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::AttestationRequest;
    use crate::error::AcquireError;
    use std::io::{self, Cursor};
    use std::sync::mpsc::{self, Sender};

    /// Connection that reports its outbound bytes on drop.
    struct ChannelStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        closed: Sender<Vec<u8>>,
    }

    impl Read for ChannelStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ChannelStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for ChannelStream {
        fn drop(&mut self) {
            let _ = self.closed.send(std::mem::take(&mut self.output));
        }
    }

    /// Echoes the nonce back as the document.
    struct Echo;

    impl AttestationSource for Echo {
        fn attest(&self, request: &AttestationRequest) -> Result<Vec<u8>, AcquireError> {
            Ok(request.nonce.clone())
        }
    }

    fn stream(input: &[u8]) -> (ChannelStream, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        let stream = ChannelStream {
            input: Cursor::new(input.to_vec()),
            output: Vec::new(),
            closed: tx,
        };
        (stream, rx)
    }

    #[test]
    fn sessions_run_independently_and_close_their_stream() {
        let acquirer = Arc::new(Acquirer::new(Echo, Echo));
        let config = Arc::new(Config::default());

        let (first, first_rx) = stream(br#"{"nonce":"one"}"#);
        let (second, second_rx) = stream(b"garbage");

        let first = spawn_session(first, Arc::clone(&acquirer), Arc::clone(&config));
        let second = spawn_session(second, Arc::clone(&acquirer), Arc::clone(&config));

        assert_eq!(first.join().unwrap(), SessionState::ResponseSent);
        assert_eq!(second.join().unwrap(), SessionState::ErrorSent);

        let first_out = first_rx.recv().unwrap();
        assert_eq!(first_out, br#"{"success":true,"document":"b25l"}"#);
        let second_out = second_rx.recv().unwrap();
        assert!(second_out.starts_with(br#"{"success":false"#));
    }
}
