//! Raw TCP dashcam double for exercising transfer pacing, which mock HTTP
//! servers only emulate at whole-response granularity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// How the dashcam answers a path
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Whole body at once
    Full(Vec<u8>),
    /// Body sent one byte per interval
    Trickle(Vec<u8>, Duration),
    /// Headers announcing `len` bytes, the given prefix, then silence
    Stall { len: usize, prefix: Vec<u8> },
}

pub(crate) struct ScriptedDashcam {
    address: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDashcam {
    pub(crate) async fn start(routes: HashMap<String, Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);

        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    serve(stream, &routes, &seen).await;
                });
            }
        });

        Self { address, requests }
    }

    /// Address in the `host:port` form the client accepts
    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    /// Requested paths, in arrival order
    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Index body listing the given videos
pub(crate) fn index_body(videos: &[&str]) -> Vec<u8> {
    let mut index = String::from("v:1.00\r\n");
    for video in videos {
        index.push_str(&format!("n:/Record/{},s:1000000\r\n", video));
    }
    index.into_bytes()
}

async fn serve(mut stream: TcpStream, routes: &HashMap<String, Reply>, seen: &Mutex<Vec<String>>) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }

    let head = String::from_utf8_lossy(&head);
    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
    seen.lock().unwrap().push(path.clone());

    let headers = |len: usize| {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n",
            len
        )
    };

    match routes.get(&path) {
        None => {
            let _ = stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        }
        Some(Reply::Full(body)) => {
            let _ = stream.write_all(headers(body.len()).as_bytes()).await;
            let _ = stream.write_all(body).await;
        }
        Some(Reply::Trickle(body, interval)) => {
            let _ = stream.write_all(headers(body.len()).as_bytes()).await;
            for byte in body {
                tokio::time::sleep(*interval).await;
                if stream.write_all(&[*byte]).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
            }
        }
        Some(Reply::Stall { len, prefix }) => {
            let _ = stream.write_all(headers(*len).as_bytes()).await;
            let _ = stream.write_all(prefix).await;
            let _ = stream.flush().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }
    let _ = stream.shutdown().await;
}
