//! Newline-delimited JSON framing for the IPC wire protocol (§6 of the
//! interface contract). Message shapes themselves live in `agent-types`.

use agent_types::{Event, Request};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::error::CoordinatorError;

/// Reads exactly one request line. Each connection carries one request.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, CoordinatorError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Err(CoordinatorError::Protocol("connection closed before a request was sent".to_string()));
    }
    let request: Request = serde_json::from_str(line.trim_end())?;
    Ok(request)
}

/// Writes one event line, newline-terminated.
pub async fn write_event<W>(writer: &mut W, event: &Event) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(event).expect("Event always serializes");
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// The protocol's response to an unrecognized `op`.
pub fn unknown_op_message(op: &str) -> String {
    format!("Unknown operation: {op}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_a_single_request_line() {
        let input = b"{\"op\":\"ensure\",\"id\":\"x\",\"version\":\"1.0.0\"}\n".to_vec();
        let mut reader = std::io::Cursor::new(input);
        let request = read_request(&mut reader).await.unwrap();
        assert_eq!(request.op, "ensure");
        assert_eq!(request.id, "x");
    }

    #[tokio::test]
    async fn empty_connection_is_a_protocol_error() {
        let mut reader = std::io::Cursor::new(Vec::<u8>::new());
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Protocol(_)));
    }

    #[tokio::test]
    async fn writes_newline_terminated_event_json() {
        let event = Event::Start { id: "x".to_string(), version: "1.0.0".to_string() };
        let mut buf = Vec::new();
        write_event(&mut buf, &event).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.contains("\"type\":\"start\""));
    }

    #[test]
    fn unknown_op_message_matches_protocol_wording() {
        assert_eq!(unknown_op_message("delete"), "Unknown operation: delete");
    }
}
