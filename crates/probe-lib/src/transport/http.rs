//! Minimal HTTP/1.1 exchange used to time a probe

use crate::error::TransportError;
use crate::models::ProbeRequest;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Render a GET request that asks the server to close the connection
pub(crate) fn render_request(request: &ProbeRequest) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        request.path, request.host_header, request.user_agent
    )
}

/// Read up to the end of the status line and return the status code.
///
/// Only the first line is consumed; the probe measures time to first
/// response, not transfer of the body.
pub(crate) async fn read_status<R>(reader: &mut R, limit: usize) -> Result<u16, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader.take(limit as u64).read_line(&mut line).await?;

    if read == 0 {
        return Err(TransportError::MalformedResponse(
            "connection closed before status line".to_string(),
        ));
    }
    if !line.ends_with('\n') {
        return Err(TransportError::MalformedResponse(format!(
            "status line exceeds {} bytes or was truncated",
            limit
        )));
    }

    parse_status_line(line.trim_end())
}

pub(crate) fn parse_status_line(line: &str) -> Result<u16, TransportError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(TransportError::MalformedResponse(format!(
            "not an HTTP status line: {:?}",
            line
        )));
    }

    let code = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..=599).contains(code))
        .ok_or_else(|| {
            TransportError::MalformedResponse(format!("invalid status code in {:?}", line))
        })?;

    Ok(code)
}
