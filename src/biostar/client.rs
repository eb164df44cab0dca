use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use super::error::{AcquisitionError, FetchError};
use super::legacy::{self, LegacyDecode};
use super::status::{self, StatusData};
use super::{DeviceIdentity, PollOutcome, ReadingSet};

/// CGI endpoints served by the boiler controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// JSON status document (newer firmware only).
    Status,
    /// Legacy `name;unit` descriptor lines.
    Descriptors,
    /// Legacy value lines, aligned with the descriptors.
    Values,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Status => "/status.cgi",
            Endpoint::Descriptors => "/daqdesc.cgi",
            Endpoint::Values => "/daqdata.cgi",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path().trim_start_matches('/'))
    }
}

/// Raw HTTP response.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Issues GET requests against the controller.
pub trait Transport {
    fn get(&self, endpoint: Endpoint) -> impl Future<Output = Result<Reply, FetchError>> + Send;
}

pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(host: &str, api_key: &str) -> Result<Self, reqwest::Error> {
        // The controller is on the local network.
        let http = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            http,
            base_url: format!("http://{host}"),
            api_key: api_key.to_string(),
        })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, endpoint: Endpoint) -> Result<Reply, FetchError> {
        let url = format!("{}{}", self.base_url, endpoint.path());
        let transport_err = |e: reqwest::Error| FetchError::Transport {
            endpoint,
            cause: e.to_string(),
        };

        let resp = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(transport_err)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(transport_err)?;

        Ok(Reply {
            status,
            body: body.to_vec(),
        })
    }
}

/// Polls one boiler and merges its two data sources.
pub struct BiostarClient<T> {
    transport: T,
    timeout: Duration,
    /// Last identity reported by the status endpoint. Never cleared.
    device: Option<DeviceIdentity>,
}

impl<T: Transport> BiostarClient<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            device: None,
        }
    }

    pub fn device_info(&self) -> Option<&DeviceIdentity> {
        self.device.as_ref()
    }

    /// Main poll loop. Fetches on every tick and forwards the outcome.
    pub async fn run(mut self, tx: mpsc::Sender<PollOutcome>, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);

        loop {
            ticker.tick().await;

            let outcome = match self.fetch().await {
                Ok(readings) => PollOutcome::Readings {
                    readings,
                    device: self.device_info().cloned(),
                },
                Err(e) => {
                    error!("Biostar update failed: {}", e);
                    PollOutcome::Unavailable
                }
            };

            if tx.send(outcome).await.is_err() {
                warn!("Outcome channel closed, stopping poller");
                return;
            }
        }
    }

    /// Run one refresh cycle.
    ///
    /// The status endpoint is best-effort. The legacy endpoints always run and
    /// fill in keys the status document did not provide. A legacy failure is
    /// only fatal when the status endpoint produced nothing.
    pub async fn fetch(&mut self) -> Result<ReadingSet, AcquisitionError> {
        let deadline = Instant::now() + self.timeout;

        let mut readings = match self.fetch_status(deadline).await {
            Ok(StatusData { readings, device }) => {
                debug!("status.cgi returned {} readings", readings.len());
                if device.is_some() {
                    self.device = device;
                }
                readings
            }
            Err(e) => {
                debug!("status.cgi not available: {}", e);
                ReadingSet::new()
            }
        };

        match self.fetch_legacy(deadline).await {
            Ok(LegacyDecode { readings: legacy, skipped }) => {
                for s in &skipped {
                    debug!("Skipped legacy line {}: {:?}", s.line, s.reason);
                }
                let added = readings.merge_missing(legacy);
                debug!("Legacy API added {} readings", added);
            }
            Err(e) if !readings.is_empty() => {
                warn!("Legacy API failed but status.cgi data available: {}", e);
            }
            Err(e) => return Err(AcquisitionError::Unavailable(e)),
        }

        info!("Biostar: retrieved {} sensors", readings.len());
        Ok(readings)
    }

    async fn fetch_status(&self, deadline: Instant) -> Result<StatusData, FetchError> {
        let body = self.request(Endpoint::Status, deadline).await?;
        status::parse_status(&body).map_err(|e| FetchError::Malformed {
            endpoint: Endpoint::Status,
            cause: e.to_string(),
        })
    }

    async fn fetch_legacy(&self, deadline: Instant) -> Result<LegacyDecode, FetchError> {
        let descriptors = self.request(Endpoint::Descriptors, deadline).await?;
        let values = self.request(Endpoint::Values, deadline).await?;

        Ok(legacy::decode(
            &legacy::decode_windows_1252(&descriptors),
            &legacy::decode_windows_1252(&values),
        ))
    }

    async fn request(&self, endpoint: Endpoint, deadline: Instant) -> Result<Vec<u8>, FetchError> {
        let reply = timeout_at(deadline, self.transport.get(endpoint))
            .await
            .map_err(|_| FetchError::Timeout {
                endpoint,
                after: self.timeout,
            })??;

        if reply.status != 200 {
            return Err(FetchError::Status {
                endpoint,
                status: reply.status,
            });
        }
        Ok(reply.body)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;
    use crate::biostar::Value;

    #[derive(Default)]
    struct FakeTransport {
        replies: HashMap<Endpoint, Result<Reply, FetchError>>,
        hang: HashSet<Endpoint>,
        calls: Mutex<Vec<Endpoint>>,
    }

    impl FakeTransport {
        fn reply(mut self, endpoint: Endpoint, status: u16, body: &[u8]) -> Self {
            self.replies.insert(
                endpoint,
                Ok(Reply {
                    status,
                    body: body.to_vec(),
                }),
            );
            self
        }

        fn refuse(mut self, endpoint: Endpoint) -> Self {
            self.replies.insert(
                endpoint,
                Err(FetchError::Transport {
                    endpoint,
                    cause: "connection refused".into(),
                }),
            );
            self
        }

        fn hang(mut self, endpoint: Endpoint) -> Self {
            self.hang.insert(endpoint);
            self
        }

        fn set(&mut self, endpoint: Endpoint, status: u16, body: &[u8]) {
            self.replies.insert(
                endpoint,
                Ok(Reply {
                    status,
                    body: body.to_vec(),
                }),
            );
        }
    }

    impl Transport for FakeTransport {
        async fn get(&self, endpoint: Endpoint) -> Result<Reply, FetchError> {
            self.calls.lock().unwrap().push(endpoint);
            if self.hang.contains(&endpoint) {
                std::future::pending::<()>().await;
            }
            self.replies.get(&endpoint).cloned().unwrap_or(Ok(Reply {
                status: 404,
                body: Vec::new(),
            }))
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(15);

    fn legacy_ok(fake: FakeTransport) -> FakeTransport {
        fake.reply(Endpoint::Descriptors, 200, b"Pumpe;\nPuffer oben;\xb0C\n")
            .reply(Endpoint::Values, 200, b"AN\n65.5\n")
    }

    #[tokio::test]
    async fn total_failure_when_both_fail() {
        let fake = FakeTransport::default()
            .reply(Endpoint::Status, 500, b"")
            .reply(Endpoint::Descriptors, 500, b"")
            .reply(Endpoint::Values, 500, b"");
        let mut client = BiostarClient::new(fake, TIMEOUT);

        let err = client.fetch().await.unwrap_err();

        assert_eq!(
            err,
            AcquisitionError::Unavailable(FetchError::Status {
                endpoint: Endpoint::Descriptors,
                status: 500,
            })
        );
    }

    #[tokio::test]
    async fn values_failure_after_descriptors_is_total_failure() {
        let fake = FakeTransport::default()
            .reply(Endpoint::Status, 500, b"")
            .reply(Endpoint::Descriptors, 200, b"Pumpe;\n")
            .reply(Endpoint::Values, 500, b"");
        let mut client = BiostarClient::new(fake, TIMEOUT);

        let err = client.fetch().await.unwrap_err();

        assert_eq!(
            err,
            AcquisitionError::Unavailable(FetchError::Status {
                endpoint: Endpoint::Values,
                status: 500,
            })
        );
        assert_eq!(
            *client.transport.calls.lock().unwrap(),
            vec![Endpoint::Status, Endpoint::Descriptors, Endpoint::Values]
        );
    }

    #[tokio::test]
    async fn status_only_when_legacy_fails() {
        let fake = FakeTransport::default()
            .reply(Endpoint::Status, 200, br#"{"temp": 70.0, "mode": "Auto", "fuel": 40}"#)
            .reply(Endpoint::Descriptors, 500, b"");
        let mut client = BiostarClient::new(fake, TIMEOUT);

        let readings = client.fetch().await.unwrap();

        assert_eq!(readings.len(), 3);
        assert_eq!(readings.get("_Boiler temperature").unwrap().value, Value::Float(70.0));
    }

    #[tokio::test]
    async fn legacy_runs_even_when_status_succeeds() {
        let fake = legacy_ok(
            FakeTransport::default().reply(Endpoint::Status, 200, br#"{"temp": 70.0}"#),
        );
        let mut client = BiostarClient::new(fake, TIMEOUT);

        let readings = client.fetch().await.unwrap();

        assert_eq!(readings.len(), 3);
        assert_eq!(readings.get("Pumpe").unwrap().value, Value::Bool(true));
        assert_eq!(readings.get("Puffer oben").unwrap().value, Value::Float(65.5));
        assert_eq!(
            *client.transport.calls.lock().unwrap(),
            vec![Endpoint::Status, Endpoint::Descriptors, Endpoint::Values]
        );
    }

    #[tokio::test]
    async fn status_wins_on_key_collision() {
        let fake = FakeTransport::default()
            .reply(Endpoint::Status, 200, br#"{"temp": 21.0}"#)
            .reply(Endpoint::Descriptors, 200, b"_Boiler temperature;\nAsche;%\n")
            .reply(Endpoint::Values, 200, b"21\n12\n");
        let mut client = BiostarClient::new(fake, TIMEOUT);

        let readings = client.fetch().await.unwrap();

        let temp = readings.get("_Boiler temperature").unwrap();
        assert_eq!(temp.value, Value::Float(21.0));
        assert_eq!(temp.unit.as_deref(), Some("°C"));
        assert_eq!(readings.get("Asche").unwrap().value, Value::Float(12.0));
    }

    #[tokio::test]
    async fn legacy_only_firmware() {
        let fake = legacy_ok(FakeTransport::default().refuse(Endpoint::Status));
        let mut client = BiostarClient::new(fake, TIMEOUT);

        let readings = client.fetch().await.unwrap();

        assert_eq!(readings.len(), 2);
        assert!(client.device_info().is_none());
    }

    #[tokio::test]
    async fn malformed_status_is_ignored() {
        let fake = legacy_ok(FakeTransport::default().reply(Endpoint::Status, 200, b"<html>"));
        let mut client = BiostarClient::new(fake, TIMEOUT);

        assert_eq!(client.fetch().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_result_is_not_an_error() {
        let fake = FakeTransport::default()
            .reply(Endpoint::Status, 200, b"{}")
            .reply(Endpoint::Descriptors, 200, b"")
            .reply(Endpoint::Values, 200, b"");
        let mut client = BiostarClient::new(fake, TIMEOUT);

        assert!(client.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn device_identity_is_retained() {
        let fake = legacy_ok(FakeTransport::default().reply(
            Endpoint::Status,
            200,
            br#"{"meta": {"typ": "Biostar 23", "sw_version": "32c", "sn": "X1"}}"#,
        ));
        let mut client = BiostarClient::new(fake, TIMEOUT);

        client.fetch().await.unwrap();
        let first = client.device_info().cloned().unwrap();
        assert_eq!(first.model, "Biostar 23");

        // Status document without a meta block keeps the previous identity.
        client.transport.set(Endpoint::Status, 200, br#"{"temp": 50}"#);
        client.fetch().await.unwrap();
        assert_eq!(client.device_info(), Some(&first));

        // Failed cycle keeps it too.
        client.transport.set(Endpoint::Status, 503, b"");
        client.transport.set(Endpoint::Descriptors, 503, b"");
        assert!(client.fetch().await.is_err());
        assert_eq!(client.device_info(), Some(&first));
    }

    #[tokio::test(start_paused = true)]
    async fn legacy_timeout_falls_back_to_status() {
        let fake = FakeTransport::default()
            .reply(Endpoint::Status, 200, br#"{"temp": 70.0}"#)
            .hang(Endpoint::Descriptors);
        let mut client = BiostarClient::new(fake, TIMEOUT);

        let readings = client.fetch().await.unwrap();

        assert_eq!(readings.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_everywhere_is_total_failure() {
        let fake = FakeTransport::default()
            .hang(Endpoint::Status)
            .hang(Endpoint::Descriptors);
        let mut client = BiostarClient::new(fake, TIMEOUT);

        let err = client.fetch().await.unwrap_err();

        assert_eq!(
            err,
            AcquisitionError::Unavailable(FetchError::Timeout {
                endpoint: Endpoint::Descriptors,
                after: TIMEOUT,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_forwards_outcomes() {
        let fake = FakeTransport::default().reply(Endpoint::Status, 500, b"");
        let client = BiostarClient::new(legacy_ok(fake), TIMEOUT);
        let (tx, mut rx) = mpsc::channel(4);

        let handle = tokio::spawn(client.run(tx, Duration::from_secs(60)));

        match rx.recv().await {
            Some(PollOutcome::Readings { readings, device }) => {
                assert_eq!(readings.len(), 2);
                assert!(device.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        handle.abort();
    }

    /// Minimal controller on a loopback socket. Sends each request line on
    /// `lines` and answers with a canned reply per path.
    async fn serve_controller(lines: mpsc::UnboundedSender<String>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&request);
                let line = request.lines().next().unwrap_or_default().to_string();

                let (status, body) = if line.contains("/status.cgi") {
                    ("500 Internal Server Error", b"".as_slice())
                } else if line.contains("/daqdesc.cgi") {
                    ("200 OK", b"Kessel;\xb0C\n".as_slice())
                } else if line.contains("/daqdata.cgi") {
                    ("200 OK", b"61.5\n".as_slice())
                } else {
                    ("404 Not Found", b"".as_slice())
                };
                let _ = lines.send(line);

                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });

        addr
    }

    #[tokio::test]
    async fn http_transport_against_loopback_controller() {
        let (lines_tx, mut lines_rx) = mpsc::unbounded_channel();
        let addr = serve_controller(lines_tx).await;
        let transport = HttpTransport::new(&addr, "s3cret").unwrap();
        let mut client = BiostarClient::new(transport, TIMEOUT);

        let readings = client.fetch().await.unwrap();

        assert_eq!(readings.len(), 1);
        let kessel = readings.get("Kessel").unwrap();
        assert_eq!(kessel.value, Value::Float(61.5));
        assert_eq!(kessel.unit.as_deref(), Some("°C"));

        let mut seen = Vec::new();
        while let Ok(line) = lines_rx.try_recv() {
            seen.push(line);
        }
        assert_eq!(
            seen,
            vec![
                "GET /status.cgi?key=s3cret HTTP/1.1",
                "GET /daqdesc.cgi?key=s3cret HTTP/1.1",
                "GET /daqdata.cgi?key=s3cret HTTP/1.1",
            ]
        );

        let deadline = Instant::now() + TIMEOUT;
        assert_eq!(
            client.request(Endpoint::Status, deadline).await,
            Err(FetchError::Status {
                endpoint: Endpoint::Status,
                status: 500,
            })
        );
    }

    #[tokio::test]
    async fn http_transport_refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let transport = HttpTransport::new(&addr, "s3cret").unwrap();

        let err = transport.get(Endpoint::Status).await.unwrap_err();

        assert!(
            matches!(err, FetchError::Transport { endpoint: Endpoint::Status, .. }),
            "unexpected error: {err:?}"
        );
    }
}
