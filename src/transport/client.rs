//! Client-facing transport.
//!
//! Reads newline-delimited [`ClientRequest`] records, validates the method
//! against the [`ToolCatalog`], forwards known tools to the [`CallRouter`] and
//! writes one [`ClientResponse`] per request, echoing the request `id`.
//!
//! Requests are handled concurrently; responses are written in completion
//! order. A single writer task owns the output stream.
//!
//! | Input | Handling |
//! |-------|----------|
//! | blank line | ignored |
//! | unparsable record | logged, skipped |
//! | record over the length limit | logged, skipped |
//! | `list_tools` | answered locally from the catalog |
//! | unknown method | immediate `unknown_tool` error, router untouched |
//! | known tool | routed, answered when the call resolves |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::config::DEFAULT_MAX_RECORD_SIZE;
use crate::error::{Error, Result, is_disconnect};
use crate::protocol::{ClientError, ClientRequest, ClientResponse};
use crate::registry::ToolCatalog;
use crate::router::CallRouter;

// ============================================================================
// Constants
// ============================================================================

/// Method answered by the transport itself.
pub const LIST_TOOLS_METHOD: &str = "list_tools";

// ============================================================================
// ClientEnd
// ============================================================================

/// Why [`ClientTransport::serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEnd {
    /// Input reached EOF and every in-flight call was answered.
    EndOfInput,
    /// The client stopped reading (broken pipe or reset).
    PeerGone,
}

// ============================================================================
// ClientTransport
// ============================================================================

/// Serves one external client.
#[derive(Debug, Clone)]
pub struct ClientTransport {
    router: Arc<CallRouter>,
    catalog: Arc<ToolCatalog>,
    max_record_size: usize,
}

impl ClientTransport {
    /// Creates a transport routing through `router`.
    #[must_use]
    pub fn new(router: Arc<CallRouter>, catalog: Arc<ToolCatalog>) -> Self {
        Self {
            router,
            catalog,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        }
    }

    /// Sets the longest accepted request record, newline excluded.
    #[inline]
    #[must_use]
    pub fn with_max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }

    /// Serves requests from `reader`, writing responses to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on a read or write failure that is not a
    /// disconnect.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<ClientEnd>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let mut writer_task = tokio::spawn(write_responses(writer, response_rx));

        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.try_join_next().is_some() {}

            line.clear();
            let read = tokio::select! {
                read = read_record(&mut reader, &mut line, self.max_record_size) => read,
                joined = &mut writer_task => return finish_writer(joined),
            };

            match read {
                Ok(Record::End) => break,
                Ok(Record::Line) => {}
                Ok(Record::Oversized(len)) => {
                    warn!(len, limit = self.max_record_size, "Skipping oversized client record");
                    continue;
                }
                Err(err) if is_disconnect(&err) => {
                    info!(error = %err, "Client input closed");
                    break;
                }
                Err(err) => return Err(err.into()),
            }

            let Some(request) = parse_record(&line) else {
                continue;
            };
            self.handle(request, &response_tx, &mut in_flight);
        }

        debug!(in_flight = in_flight.len(), "Client input ended, draining calls");
        while in_flight.join_next().await.is_some() {}
        drop(response_tx);

        finish_writer(writer_task.await)
    }

    /// Answers or routes one request.
    fn handle(
        &self,
        request: ClientRequest,
        responses: &mpsc::UnboundedSender<ClientResponse>,
        in_flight: &mut JoinSet<()>,
    ) {
        let ClientRequest {
            id,
            method,
            params,
            timeout_ms,
        } = request;

        if method == LIST_TOOLS_METHOD {
            let response = match self.catalog.to_json() {
                Ok(tools) => ClientResponse::success(id, tools),
                Err(err) => ClientResponse::failure(id, ClientError::from(&err)),
            };
            let _ = responses.send(response);
            return;
        }

        if !self.catalog.contains(&method) {
            warn!(method = %method, "Rejecting unknown tool");
            let err = Error::unknown_tool(method);
            let _ = responses.send(ClientResponse::failure(id, ClientError::from(&err)));
            return;
        }

        let router = Arc::clone(&self.router);
        let responses = responses.clone();
        let call_timeout = timeout_ms.map(std::time::Duration::from_millis);

        in_flight.spawn(async move {
            let outcome = router
                .invoke(&method, params, call_timeout)
                .await
                .and_then(|result| Ok(serde_json::to_value(result)?));

            let response = match outcome {
                Ok(result) => ClientResponse::success(id, result),
                Err(err) => {
                    debug!(method = %method, code = err.code(), error = %err, "Call failed");
                    ClientResponse::failure(id, ClientError::from(&err))
                }
            };
            let _ = responses.send(response);
        });
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Outcome of reading one input record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    /// A record is in the line buffer.
    Line,
    /// The record exceeded the limit; carries the bytes discarded.
    Oversized(usize),
    /// Input reached EOF.
    End,
}

/// Reads up to and including the next newline into `line`.
///
/// Bytes past `limit` are consumed and discarded, never buffered.
async fn read_record<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> std::io::Result<Record>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0usize;
    let mut oversized = false;

    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }

            let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (&available[..=end], true),
                None => (available, false),
            };

            if !oversized {
                let body = chunk.strip_suffix(b"\n").unwrap_or(chunk);
                if line.len() + body.len() > limit {
                    oversized = true;
                    line.clear();
                } else {
                    line.extend_from_slice(chunk);
                }
            }

            (chunk.len(), done)
        };

        reader.consume(used);
        consumed += used;
        if done {
            break;
        }
    }

    Ok(match (consumed, oversized) {
        (0, _) => Record::End,
        (_, true) => Record::Oversized(consumed),
        (_, false) => Record::Line,
    })
}

/// Parses one input line. Blank and malformed lines yield `None`.
fn parse_record(line: &[u8]) -> Option<ClientRequest> {
    if line.trim_ascii().is_empty() {
        return None;
    }

    match serde_json::from_slice::<ClientRequest>(line) {
        Ok(request) => {
            trace!(id = %request.id, method = %request.method, "Client request");
            Some(request)
        }
        Err(err) => {
            warn!(error = %err, len = line.len(), "Skipping malformed client record");
            None
        }
    }
}

/// Writes responses as newline-delimited JSON until the channel closes.
async fn write_responses<W>(
    mut writer: W,
    mut responses: mpsc::UnboundedReceiver<ClientResponse>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = responses.recv().await {
        let mut record = serde_json::to_vec(&response)?;
        record.push(b'\n');
        writer.write_all(&record).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Maps the writer task's outcome to the transport's.
fn finish_writer(
    joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<ClientEnd> {
    match joined {
        Ok(Ok(())) => Ok(ClientEnd::EndOfInput),
        Ok(Err(err)) if is_disconnect(&err) => {
            info!(error = %err, "Client stopped reading");
            Ok(ClientEnd::PeerGone)
        }
        Ok(Err(err)) => Err(err.into()),
        Err(join_err) => Err(std::io::Error::other(join_err).into()),
    }
}

// ============================================================================
// Tests
// ============================================================================
