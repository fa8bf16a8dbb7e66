//! Test helpers: message fixtures and an in-process broker stub.
//!
//! [`StubBroker`] speaks just enough of the NATS client protocol for a real
//! `async-nats` client to connect to it: `INFO` on accept, `PONG` for every
//! `PING`, and a record of every `SUB`. It never routes messages on its own;
//! tests push frames with [`StubBroker::deliver`] and cut the transport with
//! [`StubBroker::drop_connection`].

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_nats::Message;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn message(subject: &str, payload: &[u8]) -> Message {
    Message {
        subject: subject.into(),
        reply: None,
        payload: Bytes::copy_from_slice(payload),
        headers: None,
        status: None,
        description: None,
        length: payload.len(),
    }
}

/// Header block of a `503 No Responders` status message.
const NO_RESPONDERS_HEADER: &str = "NATS/1.0 503\r\n\r\n";

#[derive(Default)]
struct StubState {
    /// `(subject, sid)` for every `SUB` received, across connections.
    subs: Mutex<Vec<(String, String)>>,
    /// Outbound frames for the live connection. Taking it closes the socket.
    current: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    connections: Mutex<usize>,
    no_responders: bool,
}

pub struct StubBroker {
    addr: SocketAddr,
    state: Arc<StubState>,
    accept: JoinHandle<()>,
}

impl StubBroker {
    /// A broker that accepts requests and never answers them.
    pub async fn start() -> Self {
        Self::spawn(StubState::default()).await
    }

    /// A broker that answers every request with a no-responders status.
    pub async fn without_responders() -> Self {
        Self::spawn(StubState {
            no_responders: true,
            ..StubState::default()
        })
        .await
    }

    async fn spawn(state: StubState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(state);

        let shared = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, addr.port(), Arc::clone(&shared)));
            }
        });

        Self {
            addr,
            state,
            accept,
        }
    }

    pub fn url(&self) -> String {
        format!("nats://{}", self.addr)
    }

    /// Number of `SUB` lines received for `subject`.
    pub fn sub_count(&self, subject: &str) -> usize {
        guard(&self.state.subs)
            .iter()
            .filter(|(s, _)| s == subject)
            .count()
    }

    /// Number of client connections accepted so far.
    pub fn connections(&self) -> usize {
        *guard(&self.state.connections)
    }

    /// Push a `MSG` for `subject` down the live connection, addressed to the
    /// most recent subscription on that subject.
    pub fn deliver(&self, subject: &str, payload: &[u8]) -> bool {
        let Some(sid) = guard(&self.state.subs)
            .iter()
            .rev()
            .find(|(s, _)| s == subject)
            .map(|(_, sid)| sid.clone())
        else {
            return false;
        };

        let mut frame = format!("MSG {subject} {sid} {}\r\n", payload.len()).into_bytes();
        frame.extend_from_slice(payload);
        frame.extend_from_slice(b"\r\n");
        self.send(frame)
    }

    /// Close the live client socket, forcing the client to reconnect.
    pub fn drop_connection(&self) -> bool {
        guard(&self.state.current).take().is_some()
    }

    fn send(&self, frame: Vec<u8>) -> bool {
        guard(&self.state.current)
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }
}

impl Drop for StubBroker {
    fn drop(&mut self) {
        self.accept.abort();
        guard(&self.state.current).take();
    }
}

impl StubState {
    /// React to one protocol line from the client.
    fn handle(&self, line: &str) -> Option<Vec<u8>> {
        let mut parts = line.split_whitespace();
        match parts.next()? {
            "PING" => Some(b"PONG\r\n".to_vec()),
            "SUB" => {
                // SUB <subject> [queue] <sid>
                let args: Vec<&str> = parts.collect();
                if let (Some(subject), Some(sid)) = (args.first(), args.last()) {
                    guard(&self.subs).push(((*subject).to_string(), (*sid).to_string()));
                }
                None
            }
            "PUB" if self.no_responders => {
                // PUB <subject> <reply> <len>
                let args: Vec<&str> = parts.collect();
                let [_, reply, _] = args.as_slice() else {
                    return None;
                };
                let sid = self.inbox_sid(reply)?;
                let len = NO_RESPONDERS_HEADER.len();
                Some(format!("HMSG {reply} {sid} {len} {len}\r\n{NO_RESPONDERS_HEADER}\r\n").into_bytes())
            }
            _ => None,
        }
    }

    /// Sid of the wildcard inbox subscription covering `reply`.
    fn inbox_sid(&self, reply: &str) -> Option<String> {
        guard(&self.subs)
            .iter()
            .rev()
            .find(|(subject, _)| {
                subject
                    .strip_suffix('*')
                    .is_some_and(|prefix| reply.starts_with(prefix))
            })
            .map(|(_, sid)| sid.clone())
    }
}

async fn serve(stream: TcpStream, port: u16, state: Arc<StubState>) {
    let (read, mut write) = stream.into_split();
    let (tx, mut outbound) = mpsc::unbounded_channel();
    *guard(&state.current) = Some(tx);
    *guard(&state.connections) += 1;

    let info = format!(
        "INFO {{\"server_id\":\"stub\",\"server_name\":\"stub\",\"version\":\"2.10.0\",\
         \"go\":\"go1.22\",\"host\":\"127.0.0.1\",\"port\":{port},\"headers\":true,\
         \"max_payload\":1048576,\"proto\":1}}\r\n"
    );
    if write.write_all(info.as_bytes()).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(read).lines();
    loop {
        let frame = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match state.handle(&line) {
                    Some(frame) => frame,
                    None => continue,
                },
                _ => return,
            },
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };
        if write.write_all(&frame).await.is_err() {
            return;
        }
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
