//! TCP compute channel to the Spark job server.
//!
//! Newline-delimited JSON both ways: one [`JobRequest`] per outbound line,
//! one `{"job": {"jobID": .., "jobResult": ..}}` envelope per inbound line.

use std::future::Future;
use std::io;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Duration};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tweetlens_scheduler::{ChannelError, ComputeChannel, JobRequest, JobResponse};

/// Minimum delay between connect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between connect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300;
/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;
/// Longest inbound line accepted; results are small JSON documents.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;
/// Upper bound on one TCP connect; the channel lock is held meanwhile.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Envelope {
    job: EnvelopeJob,
}

#[derive(Debug, Deserialize)]
struct EnvelopeJob {
    #[serde(rename = "jobID")]
    job_id: String,
    #[serde(rename = "jobResult")]
    job_result: serde_json::Value,
}

/// Decode one inbound line into a [`JobResponse`].
pub fn parse_response(line: &str) -> Result<JobResponse, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(line)?;
    Ok(JobResponse {
        job_id: envelope.job.job_id,
        payload: envelope.job.job_result,
    })
}

type Writer = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// One open socket. The reader task cancels `closed` when the peer goes
/// away, so the next submit knows to reconnect.
struct Connection {
    writer: Writer,
    closed: CancellationToken,
}

/// [`ComputeChannel`] over a single TCP connection.
///
/// Responses read from the socket are pushed into `responses`. A dropped
/// connection is re-opened lazily by the next `submit`.
pub struct SparkChannel {
    addr: String,
    conn: Mutex<Option<Connection>>,
    responses: mpsc::Sender<JobResponse>,
    cancel: CancellationToken,
}

impl SparkChannel {
    /// Create a disconnected channel; call [`connect`](Self::connect) or let
    /// the first submit open the socket.
    pub fn new(addr: &str, responses: mpsc::Sender<JobResponse>, cancel: CancellationToken) -> Self {
        Self {
            addr: addr.to_string(),
            conn: Mutex::new(None),
            responses,
            cancel,
        }
    }

    /// Connect with exponential backoff and ±10 % jitter.
    ///
    /// Schedule: 5 s → 10 s → 20 s → … → 300 s (cap), up to `attempts` tries.
    pub async fn connect(&self, attempts: u32) -> Result<(), ChannelError> {
        let mut delay_secs = BACKOFF_BASE_SECS;
        let attempts = attempts.max(1);

        for attempt in 1..=attempts {
            match self.open().await {
                Ok(stream) => {
                    info!(addr = %self.addr, attempt, "connected to spark");
                    let mut conn = self.conn.lock().await;
                    if let Some(old) = conn.replace(self.attach(stream)) {
                        old.closed.cancel();
                    }
                    return Ok(());
                }
                Err(e) if attempt == attempts => return Err(e),
                Err(e) => {
                    let total = delay_secs + jitter_secs(delay_secs);
                    warn!(
                        addr = %self.addr,
                        attempt,
                        max = attempts,
                        error = %e,
                        retry_after_secs = total,
                        "spark connect failed, retrying with backoff"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return Err(ChannelError::ConnectionFailed("cancelled".to_string()));
                        }
                        _ = sleep(Duration::from_secs(total)) => {}
                    }
                    delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
                }
            }
        }

        Err(ChannelError::ConnectionFailed(self.addr.clone()))
    }

    /// True while a socket is open and its reader has not seen it close.
    #[cfg(test)]
    pub async fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| !c.closed.is_cancelled())
    }

    async fn open(&self) -> Result<TcpStream, ChannelError> {
        bounded_connect(&self.addr, TcpStream::connect(&self.addr), CONNECT_TIMEOUT).await
    }

    /// Split `stream`, start the reader task and keep the write half.
    fn attach(&self, stream: TcpStream) -> Connection {
        let (read, write) = stream.into_split();
        let closed = self.cancel.child_token();
        tokio::spawn(read_responses(
            FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
            self.responses.clone(),
            closed.clone(),
        ));
        Connection {
            writer: FramedWrite::new(write, LinesCodec::new()),
            closed,
        }
    }
}

/// Bound a connect attempt by `limit`; a timeout is a `ConnectionFailed`.
async fn bounded_connect<T>(
    addr: &str,
    connecting: impl Future<Output = io::Result<T>>,
    limit: Duration,
) -> Result<T, ChannelError> {
    match tokio::time::timeout(limit, connecting).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ChannelError::ConnectionFailed(format!("{addr}: {e}"))),
        Err(_) => Err(ChannelError::ConnectionFailed(format!(
            "{addr}: timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

#[async_trait]
impl ComputeChannel for SparkChannel {
    fn name(&self) -> &str {
        "spark"
    }

    async fn submit(&self, request: &JobRequest) -> Result<(), ChannelError> {
        let line = serde_json::to_string(request)?;
        let mut conn = self.conn.lock().await;

        if conn.as_ref().is_some_and(|c| c.closed.is_cancelled()) {
            debug!(addr = %self.addr, "spark connection lost");
            *conn = None;
        }
        if conn.is_none() {
            let stream = self.open().await?;
            info!(addr = %self.addr, "reconnected to spark");
            *conn = Some(self.attach(stream));
        }
        let live = conn
            .as_mut()
            .ok_or_else(|| ChannelError::ConnectionFailed(self.addr.clone()))?;

        if let Err(e) = live.writer.send(line).await {
            live.closed.cancel();
            *conn = None;
            return Err(ChannelError::SendFailed(e.to_string()));
        }
        debug!(job_id = %request.id, "job sent to spark");
        Ok(())
    }
}

/// Forward responses until the socket closes, then mark it closed.
async fn read_responses(
    mut lines: FramedRead<OwnedReadHalf, LinesCodec>,
    responses: mpsc::Sender<JobResponse>,
    closed: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => return,
            next = lines.next() => next,
        };
        match next {
            Some(Ok(line)) if line.trim().is_empty() => {}
            Some(Ok(line)) => match parse_response(&line) {
                Ok(response) => {
                    if responses.send(response).await.is_err() {
                        debug!("response receiver dropped; reader exiting");
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "malformed spark response skipped"),
            },
            Some(Err(e)) => {
                warn!(error = %e, "spark connection read failed");
                break;
            }
            None => {
                warn!("spark connection closed by peer");
                break;
            }
        }
    }
    closed.cancel();
}

/// Return a jitter offset (0 … `JITTER_FRACTION * base_secs`) as integer seconds.
fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn parses_result_envelope() {
        let line = r#"{"job":{"jobID":"9b6351d6","jobResult":{"topHashtags":[{"hashtag":"harald","anzahl":200}],"countAllHashtags":500}}}"#;
        let response = parse_response(line).unwrap();
        assert_eq!(response.job_id, "9b6351d6");
        assert_eq!(response.payload["countAllHashtags"], json!(500));
    }

    #[test]
    fn rejects_envelope_without_id() {
        assert!(parse_response(r#"{"job":{"jobResult":{}}}"#).is_err());
        assert!(parse_response("not json").is_err());
    }

    #[test]
    fn jitter_stays_within_fraction() {
        assert!(jitter_secs(100) < 10);
        assert_eq!(jitter_secs(5), 0);
    }

    #[tokio::test]
    async fn submit_and_receive_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Fake engine: answer every request with one hashtag row.
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let request: serde_json::Value = serde_json::from_str(&line).unwrap();
            let reply = json!({
                "job": {
                    "jobID": request["jobID"],
                    "jobResult": {"topHashtags": [{"hashtag": "rust", "anzahl": 1}]}
                }
            });
            write.write_all(b"garbage\n").await.unwrap();
            write.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
            request
        });

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let channel = SparkChannel::new(&addr, tx, cancel.clone());
        channel.connect(1).await.unwrap();

        let request = JobRequest {
            id: "job-42".to_string(),
            name: "TopHashtagJob".to_string(),
            params: vec![json!(10)],
            time_offset: -1,
        };
        channel.submit(&request).await.unwrap();

        let seen = server.await.unwrap();
        assert_eq!(seen["name"], json!("TopHashtagJob"));
        assert_eq!(seen["timeOffset"], json!(-1));

        let response = rx.recv().await.unwrap();
        assert_eq!(response.job_id, "job-42");
        assert_eq!(response.payload["topHashtags"][0]["hashtag"], json!("rust"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn reconnects_after_engine_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Engine restart: the first connection is closed straight away.
        let server = tokio::spawn(async move {
            let (first, _) = listener.accept().await.unwrap();
            drop(first);
            let (second, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(second).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            serde_json::from_str::<serde_json::Value>(&line).unwrap()
        });

        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let channel = SparkChannel::new(&addr, tx, cancel.clone());
        channel.connect(1).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while channel.is_connected().await {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reader never noticed the closed socket");

        let request = JobRequest {
            id: "job-1".to_string(),
            name: "OriginTweetsJob".to_string(),
            params: Vec::new(),
            time_offset: -1,
        };
        channel.submit(&request).await.unwrap();

        let seen = server.await.unwrap();
        assert_eq!(seen["jobID"], json!("job-1"));
        assert!(channel.is_connected().await);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connect_times_out() {
        let result = bounded_connect(
            "10.255.255.1:9999",
            std::future::pending::<io::Result<()>>(),
            CONNECT_TIMEOUT,
        )
        .await;
        match result {
            Err(ChannelError::ConnectionFailed(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_fails_after_last_attempt() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let (tx, _rx) = mpsc::channel(1);
        let channel = SparkChannel::new(&addr, tx, CancellationToken::new());
        assert!(matches!(
            channel.connect(1).await,
            Err(ChannelError::ConnectionFailed(_))
        ));
    }
}
