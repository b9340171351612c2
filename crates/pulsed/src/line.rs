//! Line-oriented handshake I/O shared by the heartbeat client and the
//! inbound listener.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use pulse_core::wire::{LINE_TERMINATOR, MAX_LINE_LEN};

/// Read exactly one `\n`-terminated line, terminator included.
///
/// At most `MAX_LINE_LEN` bytes are consumed. A stream that ends, or a line
/// that runs past the limit, before a terminator arrives is an error.
pub async fn read_line<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader
        .take(MAX_LINE_LEN as u64)
        .read_until(LINE_TERMINATOR, &mut buf)
        .await?;

    if buf.last() != Some(&LINE_TERMINATOR) {
        let err = if n == 0 {
            io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before a line arrived")
        } else if n >= MAX_LINE_LEN {
            io::Error::new(io::ErrorKind::InvalidData, "line exceeds maximum length")
        } else {
            io::Error::new(io::ErrorKind::UnexpectedEof, "line not terminated")
        };
        return Err(err);
    }

    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
