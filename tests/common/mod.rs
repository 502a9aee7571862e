use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use async_std::io::{ReadExt, WriteExt};
use async_std::net::{TcpListener, TcpStream};
use async_std::task::{self, JoinHandle};
use tick_h1::{Client, ClientConfig};

/// One step of a scripted server connection.
#[allow(dead_code)]
pub enum Step {
    /// Read one request (head plus `content-length` body).
    Read,
    /// Write raw bytes.
    Write(Vec<u8>),
    /// Sleep before the next step, keeping the connection open.
    Pause(Duration),
}

#[allow(dead_code)]
pub fn write(bytes: impl AsRef<[u8]>) -> Step {
    Step::Write(bytes.as_ref().to_vec())
}

#[allow(dead_code)]
pub fn pause(ms: u64) -> Step {
    Step::Pause(Duration::from_millis(ms))
}

/// A loopback server that accepts one connection per script, plays it and
/// closes the connection.
pub struct TestServer {
    pub addr: SocketAddr,
    handle: JoinHandle<Vec<Vec<u8>>>,
}

impl TestServer {
    pub fn new(connections: Vec<Vec<Step>>) -> Self {
        task::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let handle = task::spawn(async move {
                let mut requests = Vec::new();
                for script in connections {
                    let (mut stream, _) = listener.accept().await.unwrap();
                    for step in script {
                        match step {
                            Step::Read => requests.push(read_request(&mut stream).await),
                            Step::Write(bytes) => {
                                // The client may already have given up on us.
                                if stream.write_all(&bytes).await.is_err() {
                                    break;
                                }
                            }
                            Step::Pause(d) => task::sleep(d).await,
                        }
                    }
                }
                requests
            });
            TestServer { addr, handle }
        })
    }

    /// A server answering a single request with `response`.
    #[allow(dead_code)]
    pub fn respond(response: impl AsRef<[u8]>) -> Self {
        Self::new(vec![vec![Step::Read, write(response)]])
    }

    pub fn url(&self, path: &str) -> http_types::Url {
        http_types::Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }

    /// Wait for every script to finish and return the requests read.
    #[allow(dead_code)]
    pub fn finish(self) -> Vec<Vec<u8>> {
        task::block_on(self.handle)
    }
}

async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return buf,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
    let len = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + len {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    buf
}

pub fn config() -> ClientConfig {
    ClientConfig::default()
        .with_poll_interval(Duration::from_millis(1))
        .with_connect_timeout(Duration::from_secs(5))
        .with_read_timeout(Duration::from_secs(5))
}

/// Tick `client` until it completes or fails.
pub fn drive(client: &mut Client) -> tick_h1::Result<()> {
    let started = Instant::now();
    while !client.tick()? {
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "client stalled in {:?}",
            client.state()
        );
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

/// Read a response body to a string.
#[allow(dead_code)]
pub fn body_string(res: &mut http_types::Response) -> String {
    task::block_on(res.body_string()).unwrap()
}
