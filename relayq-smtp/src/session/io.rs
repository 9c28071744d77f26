use relayq_common::{error::SessionError, internal, outgoing, status::Status};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};

use super::Session;

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// Read one line, CRLF or bare LF terminated.
    ///
    /// Returns `Ok(None)` once the client has closed its side.
    pub(super) async fn receive(&mut self) -> Result<Option<String>, SessionError> {
        let mut buffer = Vec::new();

        let read = self
            .connection
            .read_until(b'\n', &mut buffer)
            .await
            .map_err(|err| {
                internal!("Error: {err}");
                SessionError::Connection(err)
            })?;

        if read == 0 {
            return Ok(None);
        }

        if buffer.last() == Some(&b'\n') {
            buffer.pop();
        }
        if buffer.last() == Some(&b'\r') {
            buffer.pop();
        }

        Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
    }

    pub(super) async fn send(&mut self, response: &str) -> Result<(), SessionError> {
        outgoing!("{response}");

        let stream = self.connection.get_mut();
        stream.write_all(response.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;

        Ok(())
    }

    /// Best-effort final reply before the connection is dropped
    pub(super) async fn close_with(&mut self, status: Status, message: &str) {
        if let Err(err) = self.send(&format!("{status} {message}")).await {
            internal!(level = DEBUG, "Unable to send closing reply: {err}");
        }
    }
}
