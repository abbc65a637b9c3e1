use super::ExportReport;
use crate::error::Result;
use crate::harness::Harness;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(20);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Pull endpoint: every connection gets one HTTP/1.0 response carrying the
/// current [`ExportReport`] as JSON, then the connection is closed.
///
/// Requests are served one at a time on a single thread.
pub struct ExportServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ExportServer {
    pub fn bind(addr: impl ToSocketAddrs, harness: Arc<Harness>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("faultbench-export".to_string())
                .spawn(move || serve(listener, harness, shutdown))?
        };

        tracing::info!(%addr, "export endpoint listening");
        Ok(Self {
            addr,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            tracing::debug!(addr = %self.addr, "export endpoint stopped");
        }
    }
}

impl Drop for ExportServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(listener: TcpListener, harness: Arc<Harness>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = respond(stream, &harness) {
                    tracing::debug!(%peer, error = %e, "export request failed");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "export accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn respond(mut stream: TcpStream, harness: &Harness) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
    stream.set_write_timeout(Some(CLIENT_TIMEOUT))?;

    // The request is not inspected; read whatever arrived so the client
    // does not see a reset.
    let mut request = [0u8; 1024];
    let _ = stream.read(&mut request);

    let body = ExportReport::capture(harness).to_json()?;
    let response = format!(
        "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::policy::PolicyKind;

    fn fetch(addr: SocketAddr) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(b"GET / HTTP/1.0\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_serves_report() {
        let harness = Arc::new(Harness::new());
        harness
            .start(PolicyKind::Correct, HarnessConfig::new(0, 10, 1))
            .unwrap();
        harness.stop().unwrap();

        let server = ExportServer::bind("127.0.0.1:0", Arc::clone(&harness)).unwrap();
        let response = fetch(server.local_addr());
        assert!(response.starts_with("HTTP/1.0 200 OK"));

        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let value: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(value["snapshot"]["cumulative_released"], 10);
        assert_eq!(value["policy"], "correct");

        server.shutdown();
    }

    #[test]
    fn test_shutdown_closes_listener() {
        let server = ExportServer::bind("127.0.0.1:0", Arc::new(Harness::new())).unwrap();
        let addr = server.local_addr();
        drop(server);
        assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
    }
}
