//! Minimal SOCKS5 server handshake (RFC 1928): no-auth method negotiation
//! plus a `CONNECT`-only request, returning the resolved `host:port` the
//! dialer should connect to.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Socks5Error;

const VERSION: u8 = 5;
const CMD_CONNECT: u8 = 1;
const ATYP_IPV4: u8 = 1;
const ATYP_DOMAIN: u8 = 3;
const ATYP_IPV6: u8 = 4;

const NO_AUTH: u8 = 0x00;

/// Run the SOCKS5 greeting and CONNECT request over `stream`, returning the
/// `host:port` string the caller should dial. Writes the method-selection
/// reply and the connect reply as it goes; on any protocol error the stream
/// is left in an unspecified state and should be dropped by the caller.
pub async fn handshake<S>(stream: &mut S) -> Result<String, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != VERSION {
        return Err(Socks5Error::BadVersion);
    }
    let nmethods = header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;

    stream.write_all(&[VERSION, NO_AUTH]).await?;
    stream.flush().await?;

    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != VERSION {
        return Err(Socks5Error::BadVersion);
    }
    if request[1] != CMD_CONNECT {
        return Err(Socks5Error::CommandNotSupported);
    }
    let atyp = request[3];

    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            std::net::Ipv4Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            stream.read_exact(&mut len_buf).await?;
            let mut name = vec![0u8; len_buf[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8(name).map_err(|_| Socks5Error::AddressNotSupported)?
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => return Err(Socks5Error::AddressNotSupported),
    };

    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    stream
        .write_all(&[VERSION, 0, 0, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    stream.flush().await?;

    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn connects_to_ipv4_target() {
        let (mut client, mut server) = duplex(256);
        let server_task = tokio::spawn(async move { handshake(&mut server).await });

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [5, 0]);

        client
            .write_all(&[5, 1, 0, 1, 93, 184, 216, 34, 0, 80])
            .await
            .unwrap();
        let mut connect_reply = [0u8; 10];
        client.read_exact(&mut connect_reply).await.unwrap();
        assert_eq!(connect_reply[..2], [5, 0]);

        let target = server_task.await.unwrap().unwrap();
        assert_eq!(target, "93.184.216.34:80");
    }

    #[tokio::test]
    async fn connects_to_domain_target() {
        let (mut client, mut server) = duplex(256);
        let server_task = tokio::spawn(async move { handshake(&mut server).await });

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();

        let domain = b"example.test";
        let mut req = vec![5, 1, 0, 3, domain.len() as u8];
        req.extend_from_slice(domain);
        req.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&req).await.unwrap();
        let mut connect_reply = [0u8; 10];
        client.read_exact(&mut connect_reply).await.unwrap();

        let target = server_task.await.unwrap().unwrap();
        assert_eq!(target, "example.test:443");
    }

    #[tokio::test]
    async fn rejects_bind_command() {
        let (mut client, mut server) = duplex(256);
        let server_task = tokio::spawn(async move { handshake(&mut server).await });

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();

        client.write_all(&[5, 2, 0, 1, 0, 0, 0, 0, 0, 0]).await.unwrap();
        let err = server_task.await.unwrap().unwrap_err();
        assert!(matches!(err, Socks5Error::CommandNotSupported));
    }
}
