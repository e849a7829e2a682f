//! Notification of the local Tux Droid driver.
//!
//! The driver keeps the dongle open while it runs, so it is asked to let go
//! before programming and to resume afterwards. A driver that is not running
//! needs no notification.

use crate::CliError;
use log::{debug, info};
use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Request line for a driver command.
pub(crate) fn request(command: &str) -> String {
    format!("GET /0/tuxup/{command}? HTTP/1.0\n\n")
}

/// Client for the driver control port on localhost.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DriverNotifier {
    port: u16,
}

impl DriverNotifier {
    pub(crate) fn new(port: u16) -> Self {
        Self { port }
    }

    /// Ask the driver to release the dongle.
    pub(crate) fn stop(self) -> Result<(), CliError> {
        self.send("stop_driver")
    }

    /// Ask the driver to take the dongle back.
    pub(crate) fn start(self) -> Result<(), CliError> {
        self.send("start_driver")
    }

    fn send(self, command: &str) -> Result<(), CliError> {
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let mut stream = match TcpStream::connect_timeout(&address, CONNECT_TIMEOUT) {
            Ok(stream) => stream,
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("Driver not running on port {}, skipping {command}", self.port);
                return Ok(());
            },
            Err(source) => {
                return Err(CliError::ServerConnection {
                    port: self.port,
                    source,
                });
            },
        };

        stream
            .write_all(request(command).as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|source| CliError::ServerConnection {
                port: self.port,
                source,
            })?;
        info!("Driver notified: {command}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_request_format() {
        assert_eq!(
            request("stop_driver"),
            "GET /0/tuxup/stop_driver? HTTP/1.0\n\n"
        );
    }

    #[test]
    fn test_stop_sends_request() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut received = String::new();
            socket.read_to_string(&mut received).unwrap();
            received
        });

        DriverNotifier::new(port).stop().unwrap();
        assert_eq!(server.join().unwrap(), request("stop_driver"));
    }

    #[test]
    fn test_refused_connection_is_ignored() {
        // Bind then drop to get a port with nobody listening.
        let port = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        assert!(DriverNotifier::new(port).start().is_ok());
    }
}
