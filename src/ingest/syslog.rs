//! UDP and TCP syslog sources. Parses RFC3164/RFC5424 where possible and
//! falls back to a raw event (`rawContent` + `level="INFO"`) on any parse
//! failure — syslog senders in the wild routinely violate both RFCs, so a
//! parse miss must never drop the event (§4.5).

use std::sync::LazyLock;

use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, UdpSocket};

use crate::model::event::LogEvent;

use super::Sink;

pub struct SyslogUdpSource {
    port: u16,
    sink: Sink,
}

impl SyslogUdpSource {
    pub fn new(port: u16, sink: Sink) -> Self {
        Self { port, sink }
    }

    pub fn spawn(self: std::sync::Arc<Self>) {
        tokio::spawn(async move {
            match UdpSocket::bind(("0.0.0.0", self.port)).await {
                Ok(socket) => {
                    tracing::info!("syslog UDP source: listening on :{}", self.port);
                    let mut buf = vec![0u8; 64 * 1024];
                    loop {
                        match socket.recv_from(&mut buf).await {
                            Ok((n, _addr)) => {
                                let text = String::from_utf8_lossy(&buf[..n]);
                                let event = parse_syslog_or_fallback(&text, "syslog-udp");
                                self.sink.enqueue(event).await;
                            }
                            Err(e) => tracing::warn!("syslog UDP source: recv error: {e}"),
                        }
                    }
                }
                Err(e) => tracing::error!("syslog UDP source: bind failed on :{}: {e}", self.port),
            }
        });
    }
}

pub struct SyslogTcpSource {
    port: u16,
    sink: Sink,
}

impl SyslogTcpSource {
    pub fn new(port: u16, sink: Sink) -> Self {
        Self { port, sink }
    }

    pub fn spawn(self: std::sync::Arc<Self>) {
        tokio::spawn(async move {
            match TcpListener::bind(("0.0.0.0", self.port)).await {
                Ok(listener) => {
                    tracing::info!("syslog TCP source: listening on :{}", self.port);
                    loop {
                        match listener.accept().await {
                            Ok((socket, addr)) => {
                                let sink = self.sink.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_tcp_connection(socket, sink).await {
                                        tracing::warn!("syslog TCP source: connection from {addr} ended: {e}");
                                    }
                                });
                            }
                            Err(e) => tracing::warn!("syslog TCP source: accept error: {e}"),
                        }
                    }
                }
                Err(e) => tracing::error!("syslog TCP source: bind failed on :{}: {e}", self.port),
            }
        });
    }
}

/// RFC6587 framing: a message that starts with an ASCII digit followed by a
/// space is octet-counted (`"<len> <message>"`); otherwise frames are
/// newline-delimited.
async fn handle_tcp_connection(mut socket: tokio::net::TcpStream, sink: Sink) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        loop {
            if let Some(len_prefix) = leading_octet_count(&buf) {
                let (prefix_len, msg_len) = len_prefix;
                if buf.len() < prefix_len + msg_len {
                    break;
                }
                let message = String::from_utf8_lossy(&buf[prefix_len..prefix_len + msg_len]).to_string();
                buf.drain(..prefix_len + msg_len);
                let event = parse_syslog_or_fallback(&message, "syslog-tcp");
                sink.enqueue(event).await;
            } else if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line = String::from_utf8_lossy(&buf[..pos]).to_string();
                buf.drain(..=pos);
                if !line.trim().is_empty() {
                    let event = parse_syslog_or_fallback(&line, "syslog-tcp");
                    sink.enqueue(event).await;
                }
            } else {
                break;
            }
        }
    }
    Ok(())
}

/// Returns `(prefix_byte_len, message_byte_len)` if `buf` begins with an
/// octet count, i.e. `<digits><space>`.
fn leading_octet_count(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() && buf[i].is_ascii_digit() {
        i += 1;
    }
    if i == 0 || i >= buf.len() || buf[i] != b' ' {
        return None;
    }
    let digits = std::str::from_utf8(&buf[..i]).ok()?;
    let len: usize = digits.parse().ok()?;
    Some((i + 1, len))
}

static RFC3164_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<(?P<pri>\d{1,3})>(?P<time>\w{3}\s+\d{1,2}\s\d{2}:\d{2}:\d{2})\s(?P<host>\S+)\s(?P<tag>[^:\[]+)(\[\d+\])?:\s?(?P<msg>.*)$").unwrap());

static RFC5424_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<(?P<pri>\d{1,3})>(?P<ver>\d)\s(?P<time>\S+)\s(?P<host>\S+)\s(?P<app>\S+)\s(?P<procid>\S+)\s(?P<msgid>\S+)\s(?P<sd>(-|\[.*\]))\s?(?P<msg>.*)$").unwrap()
});

fn severity_from_pri(pri: u8) -> &'static str {
    match pri % 8 {
        0..=3 => "ERROR",
        4 => "WARN",
        _ => "INFO",
    }
}

fn parse_syslog_or_fallback(raw: &str, source_id: &str) -> LogEvent {
    let trimmed = raw.trim_end_matches(['\r', '\n']);

    if let Some(caps) = RFC5424_RE.captures(trimmed) {
        return build_event(trimmed, &caps, "host", "msg", source_id);
    }
    if let Some(caps) = RFC3164_RE.captures(trimmed) {
        return build_event(trimmed, &caps, "host", "msg", source_id);
    }

    let mut event = LogEvent::new(source_id, trimmed);
    event.severity = "INFO".to_string();
    event
}

fn build_event(raw: &str, caps: &regex::Captures, host_group: &str, msg_group: &str, source_id: &str) -> LogEvent {
    let host = caps.name(host_group).map(|m| m.as_str().to_string()).unwrap_or_else(|| source_id.to_string());
    let message = caps.name(msg_group).map(|m| m.as_str().to_string()).unwrap_or_else(|| raw.to_string());
    let pri: u8 = caps.name("pri").and_then(|m| m.as_str().parse().ok()).unwrap_or(14);

    let mut event = LogEvent::new(host, raw);
    event.message = message;
    event.severity = severity_from_pri(pri).to_string();
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3164_parses_host_and_message() {
        let event = parse_syslog_or_fallback("<13>Oct 11 22:14:15 host app: hello world", "syslog-udp");
        assert_eq!(event.source, "host");
        assert!(event.message.contains("hello world"));
    }

    #[test]
    fn unparseable_input_falls_back_to_raw_content() {
        let event = parse_syslog_or_fallback("not a syslog line at all", "syslog-udp");
        assert_eq!(event.severity, "INFO");
        assert_eq!(event.raw_content, "not a syslog line at all");
    }

    #[test]
    fn octet_count_framing_is_detected() {
        let buf = b"12 hello world13 another one!!";
        let (prefix, len) = leading_octet_count(buf).unwrap();
        assert_eq!(prefix, 3);
        assert_eq!(len, 12);
    }

    #[test]
    fn newline_framing_has_no_octet_count() {
        assert!(leading_octet_count(b"hello world\n").is_none());
    }
}
