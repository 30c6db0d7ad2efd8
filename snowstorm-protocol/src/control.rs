//! Control-channel handshake spoken between the mock station server and the
//! mock station client.
//!
//! Commands (client to server) are three bytes: a type byte followed by a
//! big-endian `u16`. Replies carry either a `u16` (`Welcome`) or a
//! length-prefixed string of at most 255 bytes (`Announce`, `InvalidCommand`).

use snowstorm_core::error::{HarnessError, Result};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MESSAGE_HELLO: u8 = 0;
const MESSAGE_SET_STATION: u8 = 1;

const REPLY_WELCOME: u8 = 0;
const REPLY_ANNOUNCE: u8 = 1;
const REPLY_INVALID: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Hello { udp_port: u16 },
    SetStation { station: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Welcome { stations: u16 },
    Announce { song: String },
    InvalidCommand { reason: String },
}

impl ControlMessage {
    pub fn encode(&self) -> [u8; 3] {
        let (kind, value) = match *self {
            ControlMessage::Hello { udp_port } => (MESSAGE_HELLO, udp_port),
            ControlMessage::SetStation { station } => (MESSAGE_SET_STATION, station),
        };
        let [hi, lo] = value.to_be_bytes();
        [kind, hi, lo]
    }
}

impl Reply {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Reply::Welcome { stations } => {
                let mut buf = vec![REPLY_WELCOME];
                buf.extend_from_slice(&stations.to_be_bytes());
                buf
            }
            Reply::Announce { song } => encode_text(REPLY_ANNOUNCE, song),
            Reply::InvalidCommand { reason } => encode_text(REPLY_INVALID, reason),
        }
    }
}

fn encode_text(kind: u8, text: &str) -> Vec<u8> {
    let mut end = text.len().min(usize::from(u8::MAX));
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let text = &text.as_bytes()[..end];

    let mut buf = Vec::with_capacity(text.len() + 2);
    buf.push(kind);
    buf.push(text.len() as u8);
    buf.extend_from_slice(text);
    buf
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: ControlMessage,
) -> Result<()> {
    writer.write_all(&msg.encode()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Reply) -> Result<()> {
    writer.write_all(&reply.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one command; `None` when the peer closed the connection between messages
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<ControlMessage>> {
    let Some(kind) = read_type(reader).await? else {
        return Ok(None);
    };
    let value = reader.read_u16().await?;
    match kind {
        MESSAGE_HELLO => Ok(Some(ControlMessage::Hello { udp_port: value })),
        MESSAGE_SET_STATION => Ok(Some(ControlMessage::SetStation { station: value })),
        other => Err(HarnessError::Protocol(format!("unknown command type {other}"))),
    }
}

/// Reads one reply; `None` when the peer closed the connection between replies
pub async fn read_reply<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Reply>> {
    let Some(kind) = read_type(reader).await? else {
        return Ok(None);
    };
    match kind {
        REPLY_WELCOME => Ok(Some(Reply::Welcome {
            stations: reader.read_u16().await?,
        })),
        REPLY_ANNOUNCE => Ok(Some(Reply::Announce {
            song: read_text(reader).await?,
        })),
        REPLY_INVALID => Ok(Some(Reply::InvalidCommand {
            reason: read_text(reader).await?,
        })),
        other => Err(HarnessError::Protocol(format!("unknown reply type {other}"))),
    }
}

async fn read_type<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<u8>> {
    match reader.read_u8().await {
        Ok(kind) => Ok(Some(kind)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn read_text<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let len = reader.read_u8().await?;
    let mut buf = vec![0u8; usize::from(len)];
    reader.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_layout() {
        assert_eq!(ControlMessage::Hello { udp_port: 10000 }.encode(), [0, 0x27, 0x10]);
        assert_eq!(ControlMessage::SetStation { station: 2 }.encode(), [1, 0, 2]);
    }

    #[test]
    fn test_long_announce_is_truncated() {
        let song = "x".repeat(300);
        let bytes = Reply::Announce { song }.encode();
        assert_eq!(bytes[1], 255);
        assert_eq!(bytes.len(), 257);
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let song = format!("{}é", "x".repeat(254));
        let bytes = Reply::Announce { song }.encode();
        assert_eq!(bytes[1], 254);
    }

    #[tokio::test]
    async fn test_replies_over_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);

        write_reply(&mut server, &Reply::Welcome { stations: 7 }).await.unwrap();
        write_reply(
            &mut server,
            &Reply::InvalidCommand {
                reason: "Station 9 does not exist".into(),
            },
        )
        .await
        .unwrap();
        drop(server);

        assert_eq!(
            read_reply(&mut client).await.unwrap(),
            Some(Reply::Welcome { stations: 7 })
        );
        assert_eq!(
            read_reply(&mut client).await.unwrap(),
            Some(Reply::InvalidCommand {
                reason: "Station 9 does not exist".into()
            })
        );
        assert_eq!(read_reply(&mut client).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_command_type() {
        let (mut client, mut server) = tokio::io::duplex(16);
        client.write_all(&[9, 0, 0]).await.unwrap();
        drop(client);

        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, HarnessError::Protocol(_)));
    }
}
