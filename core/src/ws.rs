//! Hand-rolled WebSocket handshake and binary framing: both the server and
//! client sides detect and perform the HTTP/1.1 upgrade by hand and frame
//! messages without pulling in a full WebSocket crate.
//!
//! Only what the tunnel needs is implemented: text frames are never sent,
//! fragmentation is not produced (every write is a single FIN binary
//! frame), and control frames other than `Close` are ignored on read.

use std::collections::HashMap;

use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::error::WsError;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HTTP_HEADER: usize = 8192;
const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            _ => Opcode::Binary,
        }
    }
}

fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// A parsed HTTP/1.1 request head, with the raw bytes kept around so a
/// non-upgrade request can still be forwarded verbatim to a reverse-proxy
/// target.
pub struct HttpRequest {
    pub raw: Vec<u8>,
    pub request_line: String,
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_upgrade(&self) -> bool {
        let is_upgrade = self.header("upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false);
        let is_conn_upgrade = self.header("connection").map(|v| v.to_ascii_lowercase().contains("upgrade")).unwrap_or(false);
        is_upgrade && is_conn_upgrade && self.headers.contains_key("sec-websocket-key")
    }
}

/// Server side: read one HTTP request head (request line + headers, no
/// body) off the stream.
pub async fn read_request<S>(stream: &mut S) -> Result<HttpRequest, WsError>
where
    S: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    let mut buf = [0u8; 1];
    loop {
        stream.read_exact(&mut buf).await?;
        raw.push(buf[0]);
        let len = raw.len();
        if len >= 4 && &raw[len - 4..] == b"\r\n\r\n" {
            break;
        }
        if len > MAX_HTTP_HEADER {
            return Err(WsError::RequestTooLarge);
        }
    }

    let text = String::from_utf8_lossy(&raw).to_string();
    let mut lines = text.lines();
    let request_line = lines.next().unwrap_or_default().to_string();
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    Ok(HttpRequest { raw, request_line, headers })
}

async fn read_http_headers<S>(stream: &mut S) -> Result<(String, HashMap<String, String>), WsError>
where
    S: AsyncRead + Unpin,
{
    let request = read_request(stream).await?;
    Ok((request.request_line, request.headers))
}

/// Server side: read the request head and validate it's a WebSocket
/// upgrade. Returns the parsed request so callers can inspect `Auth`/`via`
/// alongside the standard upgrade headers.
pub async fn read_upgrade_request<S>(stream: &mut S) -> Result<HttpRequest, WsError>
where
    S: AsyncRead + Unpin,
{
    let request = read_request(stream).await?;
    if !request.is_upgrade() {
        return Err(WsError::NotUpgrade);
    }
    Ok(request)
}

/// Server side: reply `101 Switching Protocols` completing the handshake.
pub async fn accept_upgrade<S>(stream: &mut S, client_key: &str) -> Result<(), WsError>
where
    S: AsyncWrite + Unpin,
{
    let accept_key = compute_accept_key(client_key);
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Server side: reply `404 Not Found`, used when authentication or the
/// hash-algorithm header fail validation.
pub async fn reject_not_found<S>(stream: &mut S) -> Result<(), WsError>
where
    S: AsyncWrite + Unpin,
{
    let response = "HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Client side: send the HTTP upgrade request with the given extra headers
/// (`Auth`, `via`) and validate the server's `101` response.
pub async fn client_handshake<S>(
    stream: &mut S,
    host: &str,
    path: &str,
    extra_headers: &[(&str, &str)],
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut key_bytes = [0u8; 16];
    for b in key_bytes.iter_mut() {
        *b = fastrand::u8(..);
    }
    let key = base64::engine::general_purpose::STANDARD.encode(key_bytes);

    let mut request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n"
    );
    for (name, value) in extra_headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let (status_line, headers) = read_http_headers(stream).await?;
    if !status_line.starts_with("HTTP/1.1 101") {
        return Err(WsError::Rejected(status_line));
    }
    let expected = compute_accept_key(&key);
    match headers.get("sec-websocket-accept") {
        Some(v) if v == &expected => Ok(()),
        _ => Err(WsError::BadAccept),
    }
}

async fn write_frame<W>(writer: &mut W, opcode: Opcode, payload: &[u8], mask: bool) -> Result<(), WsError>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len();
    let first_byte = 0x80 | (opcode as u8);
    let mut header = Vec::with_capacity(14);
    header.push(first_byte);

    let mask_bit = if mask { 0x80 } else { 0x00 };
    if len < 126 {
        header.push(mask_bit | len as u8);
    } else if len < 65536 {
        header.push(mask_bit | 126);
        header.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        header.push(mask_bit | 127);
        header.extend_from_slice(&(len as u64).to_be_bytes());
    }

    if mask {
        let key: [u8; 4] = std::array::from_fn(|_| fastrand::u8(..));
        header.extend_from_slice(&key);
        writer.write_all(&header).await?;
        let masked: Vec<u8> = payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]).collect();
        writer.write_all(&masked).await?;
    } else {
        writer.write_all(&header).await?;
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R>(reader: &mut R) -> Result<(Opcode, Vec<u8>), WsError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;
    let opcode = Opcode::from(header[0]);
    let masked = (header[1] & 0x80) != 0;
    let mut len = (header[1] & 0x7F) as u64;

    if len == 126 {
        let mut ext = [0u8; 2];
        reader.read_exact(&mut ext).await?;
        len = u16::from_be_bytes(ext) as u64;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        reader.read_exact(&mut ext).await?;
        len = u64::from_be_bytes(ext);
    }
    if len > MAX_FRAME_LEN {
        return Err(WsError::FrameTooLarge);
    }

    let mask = if masked {
        let mut m = [0u8; 4];
        reader.read_exact(&mut m).await?;
        Some(m)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }
    Ok((opcode, payload))
}

/// Which side of the handshake this stream is on — determines whether
/// outgoing frames are masked (client) and whether control frames are
/// answered the client way or server way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// A framed WebSocket connection over any `AsyncRead + AsyncWrite` stream
/// (plain TCP or a `tokio_rustls` TLS stream).
pub struct WsStream<S> {
    inner: S,
    role: Role,
}

impl<S> WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: S, role: Role) -> Self {
        Self { inner, role }
    }

    /// Read the next complete binary message, skipping ping/pong/continuation
    /// frames we don't otherwise handle.
    pub async fn read_message(&mut self) -> Result<Vec<u8>, WsError> {
        loop {
            let (opcode, payload) = read_frame(&mut self.inner).await?;
            match opcode {
                Opcode::Binary | Opcode::Text => return Ok(payload),
                Opcode::Close => return Err(WsError::Closed),
                Opcode::Ping => {
                    self.write_raw(Opcode::Pong, &payload).await?;
                }
                _ => continue,
            }
        }
    }

    /// Write one binary message as a single unfragmented frame.
    pub async fn write_message(&mut self, payload: &[u8]) -> Result<(), WsError> {
        self.write_raw(Opcode::Binary, payload).await
    }

    async fn write_raw(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), WsError> {
        let mask = self.role == Role::Client;
        write_frame(&mut self.inner, opcode, payload, mask).await
    }

    pub async fn close(&mut self) {
        let _ = self.write_raw(Opcode::Close, &[]).await;
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Split into independently-owned read/write halves so one task can
    /// read frames while another writes them, matching gorilla-websocket's
    /// "one reader, one writer, no other concurrency" contract.
    pub fn split(self) -> (WsReader<ReadHalf<S>>, WsWriter<WriteHalf<S>>) {
        let (read_half, write_half) = tokio::io::split(self.inner);
        (WsReader { inner: read_half }, WsWriter { inner: write_half, role: self.role })
    }
}

/// The read half of a split [`WsStream`]. Control frames other than
/// `Close` are silently dropped — neither peer in this tunnel ever sends
/// `Ping`, so there is nothing to answer.
pub struct WsReader<R> {
    inner: R,
}

impl<R> WsReader<R>
where
    R: AsyncRead + Unpin,
{
    pub async fn read_message(&mut self) -> Result<Vec<u8>, WsError> {
        loop {
            let (opcode, payload) = read_frame(&mut self.inner).await?;
            match opcode {
                Opcode::Binary | Opcode::Text => return Ok(payload),
                Opcode::Close => return Err(WsError::Closed),
                _ => continue,
            }
        }
    }
}

/// The write half of a split [`WsStream`], still aware of which side it is
/// writing for so it masks frames correctly.
pub struct WsWriter<W> {
    inner: W,
    role: Role,
}

impl<W> WsWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub async fn write_message(&mut self, payload: &[u8]) -> Result<(), WsError> {
        let mask = self.role == Role::Client;
        write_frame(&mut self.inner, Opcode::Binary, payload, mask).await
    }

    pub async fn close(&mut self) {
        let mask = self.role == Role::Client;
        let _ = write_frame(&mut self.inner, Opcode::Close, &[], mask).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn client_and_server_frames_round_trip() {
        let (client_io, server_io) = duplex(4096);
        let mut client = WsStream::new(client_io, Role::Client);
        let mut server = WsStream::new(server_io, Role::Server);

        client.write_message(b"ping from client").await.unwrap();
        let got = server.read_message().await.unwrap();
        assert_eq!(got, b"ping from client");

        server.write_message(b"pong from server").await.unwrap();
        let got = client.read_message().await.unwrap();
        assert_eq!(got, b"pong from server");
    }

    #[tokio::test]
    async fn split_halves_work_independently() {
        let (client_io, server_io) = duplex(4096);
        let (_client_reader, mut client_writer) = WsStream::new(client_io, Role::Client).split();
        let (mut server_reader, _server_writer) = WsStream::new(server_io, Role::Server).split();

        client_writer.write_message(b"hello").await.unwrap();
        let got = server_reader.read_message().await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn handshake_round_trip() {
        let (client_io, mut server_io) = duplex(8192);
        let client_task = tokio::spawn(async move {
            let mut client_io = client_io;
            client_handshake(&mut client_io, "example.test", "/ws", &[("Auth", "abc"), ("via", "crcHash")])
                .await
                .unwrap();
            client_io
        });

        let request = read_upgrade_request(&mut server_io).await.unwrap();
        assert_eq!(request.header("via").unwrap(), "crcHash");
        assert_eq!(request.header("auth").unwrap(), "abc");
        let key = request.header("sec-websocket-key").unwrap().to_string();
        accept_upgrade(&mut server_io, &key).await.unwrap();

        client_task.await.unwrap();
    }
}
