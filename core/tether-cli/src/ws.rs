//! WebSocket session channel over blocking tungstenite.
//!
//! `recv` is bounded by a socket read timeout so the client loop can keep
//! firing timers; a timeout surfaces as [`ChannelEvent::Idle`].

use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

use tether_core::{Channel, ChannelEvent, Result, TetherError, Transport};
use tether_protocol::{ConnectParams, OutboundMessage};
use tracing::{debug, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Error as WsError, Message, WebSocket};

const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
        }
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, params: &ConnectParams) -> Result<Box<dyn Channel>> {
        let url = params.channel_url(&self.base_url)?;
        let (socket, response) = tungstenite::connect(url.as_str())
            .map_err(|err| TetherError::Transport(format!("connect {}: {}", self.base_url, err)))?;
        debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsChannel { socket }))
    }
}

pub struct WsChannel {
    socket: Socket,
}

impl WsChannel {
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        let timeout = Some(timeout.max(MIN_READ_TIMEOUT));
        let result = match self.socket.get_mut() {
            MaybeTlsStream::Plain(stream) => stream.set_read_timeout(timeout),
            MaybeTlsStream::Rustls(stream) => stream.sock.set_read_timeout(timeout),
            _ => Ok(()),
        };
        result.map_err(|err| TetherError::Transport(format!("set read timeout: {}", err)))
    }
}

impl Channel for WsChannel {
    fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        let frame = message.to_frame()?;
        debug!(kind = message.kind(), "Sending frame");
        self.socket
            .send(Message::Text(frame))
            .map_err(|err| TetherError::Transport(format!("send {}: {}", message.kind(), err)))
    }

    fn recv(&mut self, timeout: Duration) -> Result<ChannelEvent> {
        self.set_read_timeout(timeout)?;
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(ChannelEvent::Text(text)),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Ok(ChannelEvent::Text(text)),
                Err(_) => {
                    warn!("Dropping non-UTF-8 binary frame");
                    Ok(ChannelEvent::Idle)
                }
            },
            Ok(Message::Close(frame)) => Ok(ChannelEvent::Closed {
                reason: frame
                    .map(|frame| frame.reason.into_owned())
                    .unwrap_or_else(|| "closed by server".to_string()),
            }),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => Ok(ChannelEvent::Idle),
            Err(WsError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(ChannelEvent::Idle)
            }
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(ChannelEvent::Closed {
                reason: "connection closed".to_string(),
            }),
            Err(err) => Err(TetherError::Transport(format!("read: {}", err))),
        }
    }

    fn close(&mut self) {
        if let Err(err) = self.socket.close(None) {
            debug!(error = %err, "Close handshake failed");
        }
        if let Err(err) = self.socket.flush() {
            debug!(error = %err, "Flush after close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn channel_exchanges_frames_and_reports_server_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut socket = tungstenite::accept(stream).unwrap();
            let received = match socket.read().unwrap() {
                Message::Text(text) => text,
                other => panic!("unexpected frame {:?}", other),
            };
            socket
                .send(Message::Text(
                    r#"{"type":"stream_chunk","content":"hi"}"#.to_string(),
                ))
                .unwrap();
            socket.close(None).unwrap();
            while socket.read().is_ok() {}
            received
        });

        let mut transport = WsTransport::new(&format!("ws://{}/ws/chat", addr));
        let params = ConnectParams {
            session_id: "session_1_abc".to_string(),
            active_tools: vec!["todo".to_string()],
        };
        let mut channel = transport.connect(&params).unwrap();
        channel
            .send(&OutboundMessage::Message {
                content: "hello".to_string(),
            })
            .unwrap();

        let mut events = Vec::new();
        for _ in 0..50 {
            match channel.recv(Duration::from_millis(100)).unwrap() {
                ChannelEvent::Idle => continue,
                ChannelEvent::Closed { reason } => {
                    events.push(ChannelEvent::Closed { reason });
                    break;
                }
                event => events.push(event),
            }
        }
        channel.close();
        drop(channel);

        assert_eq!(
            events,
            vec![
                ChannelEvent::Text(r#"{"type":"stream_chunk","content":"hi"}"#.to_string()),
                ChannelEvent::Closed {
                    reason: "closed by server".to_string()
                },
            ]
        );
        let received = server.join().unwrap();
        assert!(received.contains(r#""type":"message""#));
        assert!(received.contains("hello"));
    }

    #[test]
    fn read_timeout_surfaces_as_idle() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut socket = tungstenite::accept(stream).unwrap();
            while socket.read().is_ok() {}
        });

        let mut transport = WsTransport::new(&format!("ws://{}/ws/chat", addr));
        let params = ConnectParams {
            session_id: "session_1_abc".to_string(),
            active_tools: Vec::new(),
        };
        let mut channel = transport.connect(&params).unwrap();
        assert_eq!(
            channel.recv(Duration::from_millis(20)).unwrap(),
            ChannelEvent::Idle
        );
        channel.close();
        drop(channel);
        server.join().unwrap();
    }

    #[test]
    fn refused_connect_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut transport = WsTransport::new(&format!("ws://{}/ws/chat", addr));
        let params = ConnectParams {
            session_id: "session_1_abc".to_string(),
            active_tools: Vec::new(),
        };
        let err = transport.connect(&params).err().unwrap();
        assert!(matches!(err, TetherError::Transport(_)));
    }
}
