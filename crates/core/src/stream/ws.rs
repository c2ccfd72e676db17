use std::{
    io,
    net::{TcpStream, ToSocketAddrs},
    thread,
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tungstenite::{
    client::IntoClientRequest,
    handshake::client::Request,
    protocol::{frame::coding::CloseCode, CloseFrame},
    stream::MaybeTlsStream,
    Message, WebSocket,
};

use super::{Transport, TransportEvent, TransportEventKind};
use crate::{Result, VignetteError};

/// How long a read may block before queued outbound frames are flushed.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on the TCP connect and on each handshake read.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Send(String),
    Close(u16, String),
}

/// Websocket transport backed by one IO thread per connection. Events are
/// pushed into the channel handed to [`WsTransport::new`].
#[derive(Debug)]
pub struct WsTransport {
    events: Sender<TransportEvent>,
    commands: Option<Sender<Command>>,
}

impl WsTransport {
    pub fn new(events: Sender<TransportEvent>) -> Self {
        Self {
            events,
            commands: None,
        }
    }

    /// Creates a transport together with the receiving end of its events.
    pub fn channel() -> (Self, Receiver<TransportEvent>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Send(text) => f.debug_tuple("Send").field(&text.len()).finish(),
            Command::Close(code, _) => f.debug_tuple("Close").field(code).finish(),
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str, generation: u64) -> Result<()> {
        let request = url.into_client_request()?;
        let (tx, rx) = unbounded();
        let events = self.events.clone();

        thread::Builder::new()
            .name(format!("analysis-ws-{generation}"))
            .spawn(move || run_connection(request, generation, events, rx))?;

        self.commands = Some(tx);
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<()> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| VignetteError::Transport("no open connection".into()))?;
        commands
            .send(Command::Send(text.to_string()))
            .map_err(|_| VignetteError::Transport("connection thread has exited".into()))
    }

    fn close(&mut self, code: u16, reason: &str) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Close(code, reason.to_string()));
        }
    }
}

fn run_connection(
    request: Request,
    generation: u64,
    events: Sender<TransportEvent>,
    commands: Receiver<Command>,
) {
    let emit = |kind: TransportEventKind| {
        let _ = events.send(TransportEvent { generation, kind });
    };

    let stream = match open_stream(&request) {
        Ok(stream) => stream,
        Err(err) => {
            emit(TransportEventKind::Error(err.to_string()));
            emit(TransportEventKind::Close(None));
            return;
        }
    };
    let mut socket = match tungstenite::client(request, MaybeTlsStream::Plain(stream)) {
        Ok((socket, _response)) => socket,
        Err(err) => {
            emit(TransportEventKind::Error(err.to_string()));
            emit(TransportEventKind::Close(None));
            return;
        }
    };

    if let Err(err) = set_poll_timeout(&socket) {
        tracing::debug!(%err, "could not set read timeout, outbound frames may lag");
    }
    emit(TransportEventKind::Open);

    loop {
        loop {
            match commands.try_recv() {
                Ok(Command::Send(text)) => {
                    if let Err(err) = socket.send(Message::Text(text)) {
                        emit(TransportEventKind::Error(err.to_string()));
                        emit(TransportEventKind::Close(None));
                        return;
                    }
                }
                Ok(Command::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = socket.close(Some(frame));
                    let _ = socket.flush();
                    return;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    return;
                }
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => emit(TransportEventKind::Message(text)),
            Ok(Message::Close(frame)) => {
                emit(TransportEventKind::Close(
                    frame.map(|frame| frame.reason.into_owned()),
                ));
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(err) => {
                emit(TransportEventKind::Error(err.to_string()));
                emit(TransportEventKind::Close(None));
                return;
            }
        }
    }
}

/// Host and port the request should be dialled on.
fn socket_target(request: &Request) -> Result<(String, u16)> {
    let uri = request.uri();
    let default_port = match uri.scheme_str() {
        Some("ws") => 80,
        Some("wss") => {
            return Err(VignetteError::Transport(
                "wss is not supported without TLS".into(),
            ))
        }
        other => {
            return Err(VignetteError::Transport(format!(
                "unsupported scheme {other:?}"
            )))
        }
    };
    let host = uri
        .host()
        .ok_or_else(|| VignetteError::Transport(format!("no host in {uri}")))?
        .trim_start_matches('[')
        .trim_end_matches(']');
    Ok((host.to_string(), uri.port_u16().unwrap_or(default_port)))
}

/// Dials every resolved address in turn, bounding each attempt.
fn open_stream(request: &Request) -> Result<TcpStream> {
    let (host, port) = socket_target(request)?;
    let mut last_err = None;
    for addr in (host.as_str(), port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream.set_read_timeout(Some(CONNECT_TIMEOUT))?;
                stream.set_write_timeout(Some(CONNECT_TIMEOUT))?;
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => {
                tracing::debug!(%addr, %err, "analysis server address unreachable");
                last_err = Some(err);
            }
        }
    }
    Err(match last_err {
        Some(err) => err.into(),
        None => VignetteError::Transport(format!("{host} did not resolve")),
    })
}

fn set_poll_timeout(socket: &WebSocket<MaybeTlsStream<TcpStream>>) -> io::Result<()> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(POLL_INTERVAL)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_fails_construction() {
        let (mut transport, _rx) = WsTransport::channel();
        assert!(transport.open("not a url", 1).is_err());
    }

    #[test]
    fn targets_default_to_scheme_port() {
        let target = |url: &str| socket_target(&url.into_client_request().unwrap());

        assert_eq!(target("ws://localhost/").unwrap(), ("localhost".to_string(), 80));
        assert_eq!(target("ws://127.0.0.1:9").unwrap(), ("127.0.0.1".to_string(), 9));
        assert_eq!(target("ws://[::1]:4000").unwrap(), ("::1".to_string(), 4000));
        assert!(target("wss://example.com").is_err());
    }

    #[test]
    fn unroutable_address_gives_up_in_bounded_time() {
        let (mut transport, rx) = WsTransport::channel();
        // TEST-NET-1 addresses are never routed, so the connect stalls.
        transport.open("ws://192.0.2.1:5000", 3).unwrap();

        let deadline = CONNECT_TIMEOUT + Duration::from_secs(5);
        let mut closed = false;
        while let Ok(event) = rx.recv_timeout(deadline) {
            if matches!(event.kind, TransportEventKind::Close(_)) {
                closed = true;
                break;
            }
        }
        assert!(closed);
    }

    #[test]
    fn send_without_connection_fails() {
        let (mut transport, _rx) = WsTransport::channel();
        assert!(transport.send_text("device").is_err());
    }

    #[test]
    fn refused_connection_reports_close() {
        let (mut transport, rx) = WsTransport::channel();
        // Port 9 (discard) is closed on test machines.
        transport.open("ws://127.0.0.1:9", 7).unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
            assert_eq!(event.generation, 7);
            let done = matches!(event.kind, TransportEventKind::Close(_));
            kinds.push(event.kind);
            if done {
                break;
            }
        }
        assert!(matches!(kinds.last(), Some(TransportEventKind::Close(None))));
    }
}
