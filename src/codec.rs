//! Framing for the SSDB text protocol.
//!
//! Every block on the wire is `<decimal length>\n<bytes>\n`. A message is a
//! run of blocks closed by a bare `\n`. Requests put the command name in the
//! first block; responses put the status there.
//!
//! Encoding is synchronous and never touches the network. Decoding reads from
//! any buffered async source and waits for more bytes whenever a frame is
//! split across reads.

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncReadExt};

use crate::types::{Arg, Response, Status};
use crate::{Error, Result};

/// Largest frame body the decoder accepts (128 MiB)
pub const MAX_FRAME_SIZE: usize = 128 * 1024 * 1024;

/// One decoded wire block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A length-prefixed block (possibly zero bytes long)
    Data(Bytes),
    /// The bare newline closing a message
    End,
}

/// Encode a command and its arguments into `out`.
///
/// On failure `out` is left as it was before the call.
pub fn encode_command(cmd: &str, args: &[Arg], out: &mut BytesMut) -> Result<()> {
    let start = out.len();
    put_block(out, cmd.as_bytes());
    for arg in args {
        if let Err(err) = encode_arg(arg, out, false) {
            out.truncate(start);
            return Err(err);
        }
    }
    out.put_u8(b'\n');
    Ok(())
}

/// Encode a command into a fresh buffer
pub fn encode(cmd: &str, args: &[Arg]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);
    encode_command(cmd, args, &mut buf)?;
    Ok(buf.freeze())
}

fn encode_arg(arg: &Arg, out: &mut BytesMut, nested: bool) -> Result<()> {
    match arg {
        Arg::Str(s) => put_block(out, s.as_bytes()),
        Arg::Bytes(b) => put_block(out, b),
        Arg::Int(i) => put_display(out, i),
        Arg::UInt(u) => put_display(out, u),
        Arg::Float(f) => put_block(out, format!("{:.6}", f).as_bytes()),
        Arg::Bool(b) => put_block(out, if *b { b"1" } else { b"0" }),
        Arg::Nil => put_block(out, b""),
        Arg::List(items) => {
            if nested {
                return Err(Error::invalid_argument(format!(
                    "unsupported argument kind `{}` inside a list",
                    arg.kind()
                )));
            }
            for item in items {
                encode_arg(item, out, true)?;
            }
        }
    }
    Ok(())
}

fn put_display(out: &mut BytesMut, value: &dyn std::fmt::Display) {
    let mut text = String::with_capacity(20);
    // Writing into a String cannot fail.
    let _ = write!(text, "{}", value);
    put_block(out, text.as_bytes());
}

fn put_block(out: &mut BytesMut, data: &[u8]) {
    let mut len = String::with_capacity(8);
    let _ = write!(len, "{}", data.len());
    out.reserve(len.len() + data.len() + 2);
    out.extend_from_slice(len.as_bytes());
    out.put_u8(b'\n');
    out.extend_from_slice(data);
    out.put_u8(b'\n');
}

/// Read exactly one frame.
///
/// A length made of anything but ASCII digits, a declared length above
/// [`MAX_FRAME_SIZE`], or a body not followed by `\n` is a protocol error.
/// Running out of bytes mid-frame surfaces as an I/O error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let first = reader.read_u8().await?;
    if first == b'\n' {
        return Ok(Frame::End);
    }

    let mut len = digit(first)?;
    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        len = len
            .checked_mul(10)
            .and_then(|l| l.checked_add(digit(byte).ok()?))
            .ok_or_else(|| bad_length(byte, len))?;
        if len > MAX_FRAME_SIZE {
            return Err(Error::protocol(format!(
                "frame too large: more than {} bytes",
                MAX_FRAME_SIZE
            )));
        }
    }

    let mut data = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut data).await?;
    }

    let terminator = reader.read_u8().await?;
    if terminator != b'\n' {
        return Err(Error::protocol(format!(
            "expected newline after {} byte frame, got byte {}",
            len, terminator
        )));
    }
    Ok(Frame::Data(Bytes::from(data)))
}

fn digit(byte: u8) -> Result<usize> {
    if byte.is_ascii_digit() {
        Ok((byte - b'0') as usize)
    } else {
        Err(Error::protocol(format!(
            "unexpected byte {} in frame length",
            byte
        )))
    }
}

fn bad_length(byte: u8, len: usize) -> Error {
    if byte.is_ascii_digit() {
        Error::protocol(format!("frame length overflows after {}", len))
    } else {
        Error::protocol(format!("unexpected byte {} in frame length", byte))
    }
}

/// Read every frame of one message, without the closing marker.
///
/// A message with no frames at all is a protocol error.
pub async fn read_message<R>(reader: &mut R) -> Result<Vec<Bytes>>
where
    R: AsyncBufRead + Unpin,
{
    let mut frames = Vec::new();
    loop {
        match read_frame(reader).await? {
            Frame::Data(data) => frames.push(data),
            Frame::End if frames.is_empty() => {
                return Err(Error::protocol("empty message"));
            }
            Frame::End => return Ok(frames),
        }
    }
}

/// Read one response: the status frame followed by its payload
pub async fn read_response<R>(reader: &mut R) -> Result<Response>
where
    R: AsyncBufRead + Unpin,
{
    let mut frames = read_message(reader).await?.into_iter();
    let status = frames
        .next()
        .map(|frame| Status::from_frame(&frame))
        .unwrap_or(Status::Undefined);
    Ok(Response::new(status, frames.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    fn chunked(bytes: &[u8], chunk: usize) -> BufReader<tokio_test::io::Mock> {
        let mut builder = Builder::new();
        for part in bytes.chunks(chunk) {
            builder.read(part);
        }
        BufReader::new(builder.build())
    }

    #[test]
    fn test_encode_hset() {
        let bytes = encode("hset", &args!["k", "f", "v"]).unwrap();
        assert_eq!(&bytes[..], b"4\nhset\n1\nk\n1\nf\n1\nv\n\n");
    }

    #[test]
    fn test_encode_scalars() {
        let bytes = encode(
            "set",
            &args![-12i64, 7u32, 1.5f64, true, false, (), b"\x00\n"],
        )
        .unwrap();
        assert_eq!(
            &bytes[..],
            &b"3\nset\n3\n-12\n1\n7\n8\n1.500000\n1\n1\n1\n0\n0\n\n2\n\x00\n\n\n"[..]
        );
    }

    #[test]
    fn test_encode_expands_lists_in_place() {
        let bytes = encode("multi_hget", &args!["h", vec!["a", "bb"], 3i32]).unwrap();
        assert_eq!(
            &bytes[..],
            b"10\nmulti_hget\n1\nh\n1\na\n2\nbb\n1\n3\n\n"
        );
    }

    #[test]
    fn test_encode_rejects_nested_list_without_touching_buffer() {
        let mut buf = BytesMut::from(&b"prefix"[..]);
        let nested = Arg::List(vec![Arg::List(vec![Arg::Int(1)])]);
        let err = encode_command("multi_set", &[Arg::from("k"), nested], &mut buf).unwrap_err();
        match err {
            Error::InvalidArgument(msg) => assert!(msg.contains("`list`"), "{}", msg),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
        assert_eq!(&buf[..], b"prefix");
    }

    #[tokio::test]
    async fn test_decode_ok_response() {
        let mut reader = BufReader::new(&b"2\nok\n3\n123\n\n"[..]);
        let resp = read_response(&mut reader).await.unwrap();
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.data, vec![Bytes::from_static(b"123")]);
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let bytes = encode("zset", &args!["z", "m", 42i64, b"bin\x01"]).unwrap();
        let mut reader = BufReader::new(&bytes[..]);
        let frames = read_message(&mut reader).await.unwrap();
        let expected: Vec<&[u8]> = vec![b"zset", b"z", b"m", b"42", b"bin\x01"];
        assert_eq!(frames.iter().map(|f| &f[..]).collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn test_decode_is_independent_of_chunking() {
        let wire = b"9\nnot_found\n0\n\n5\nhello\n11\nhello\nworld\n\n";
        let mut whole = BufReader::new(&wire[..]);
        let expected = read_response(&mut whole).await.unwrap();
        assert_eq!(expected.status, Status::NotFound);
        assert_eq!(expected.data.len(), 3);
        assert_eq!(&expected.data[0][..], b"");
        assert_eq!(&expected.data[2][..], b"hello\nworld");

        for chunk in [1, 2, 3, 7] {
            let mut reader = chunked(wire, chunk);
            let resp = read_response(&mut reader).await.unwrap();
            assert_eq!(resp, expected, "chunk size {}", chunk);
        }
    }

    #[tokio::test]
    async fn test_decode_keeps_frame_order() {
        let mut wire = b"2\nok\n".to_vec();
        for i in 0..20 {
            let body = format!("v{}", i);
            wire.extend_from_slice(format!("{}\n{}\n", body.len(), body).as_bytes());
        }
        wire.push(b'\n');

        let mut reader = BufReader::new(&wire[..]);
        let resp = read_response(&mut reader).await.unwrap();
        assert_eq!(resp.data.len(), 20);
        for (i, frame) in resp.data.iter().enumerate() {
            assert_eq!(frame, &Bytes::from(format!("v{}", i)));
        }
    }

    #[tokio::test]
    async fn test_end_marker_differs_from_empty_frame() {
        let mut reader = BufReader::new(&b"0\n\n\n"[..]);
        assert_eq!(read_frame(&mut reader).await.unwrap(), Frame::Data(Bytes::new()));
        assert_eq!(read_frame(&mut reader).await.unwrap(), Frame::End);
    }

    #[tokio::test]
    async fn test_non_digit_length_is_protocol_error() {
        for wire in [&b"2x\nok\n\n"[..], b"x\n", b"-1\n", b" 2\nok\n\n"] {
            let mut reader = BufReader::new(wire);
            let err = read_frame(&mut reader).await.unwrap_err();
            assert!(matches!(err, Error::Protocol(_)), "{:?}", wire);
        }
    }

    #[tokio::test]
    async fn test_missing_terminator_is_protocol_error() {
        let mut reader = BufReader::new(&b"2\nokX"[..]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_oversized_length_is_protocol_error() {
        let mut reader = BufReader::new(&b"99999999999999999999999\n"[..]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_empty_message_is_protocol_error() {
        let mut reader = BufReader::new(&b"\n"[..]);
        let err = read_response(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_io_error() {
        let mut reader = BufReader::new(&b"5\nhel"[..]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }
}
