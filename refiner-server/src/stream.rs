//! Newline-delimited JSON response bodies fed from session workers.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Body;
use bytes::Bytes;
use futures::stream::Stream;
use refiner::session::writer::{ResponseWriter, WriteError};
use tokio::sync::mpsc;

/// Writer end of one streamed response.
///
/// Sending never blocks the worker thread. Once the client has gone away
/// the body, and with it the receiver, is dropped, and every later write
/// reports [`WriteError::Disconnected`].
pub struct ChannelWriter {
    tx: Mutex<mpsc::UnboundedSender<Bytes>>,
}

impl ResponseWriter for ChannelWriter {
    fn write_line(&self, line: &[u8]) -> Result<(), WriteError> {
        let mut chunk = Vec::with_capacity(line.len() + 1);
        chunk.extend_from_slice(line);
        chunk.push(b'\n');
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        tx.send(Bytes::from(chunk))
            .map_err(|_| WriteError::Disconnected)
    }
}

/// A connected writer/body pair.
pub fn channel() -> (Arc<ChannelWriter>, Body) {
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = Arc::new(ChannelWriter { tx: Mutex::new(tx) });
    (writer, Body::from_stream(ndjson_stream(rx)))
}

/// Yields lines until every sender is dropped, i.e. the session is done.
fn ndjson_stream(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    async_stream::stream! {
        while let Some(line) = rx.recv().await {
            yield Ok(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refiner::core::types::ChatMessage;
    use refiner::session::Session;
    use refiner::session::messages::Outbound;
    use refiner::test_support::sample_query;

    #[tokio::test]
    async fn lines_arrive_newline_terminated_and_body_ends_with_writer() {
        let (writer, body) = channel();
        writer.write_line(br#"{"a":1}"#).expect("write");
        writer.write_line(br#"{"b":2}"#).expect("write");
        drop(writer);

        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .expect("collect body");
        assert_eq!(&bytes[..], b"{\"a\":1}\n{\"b\":2}\n");
    }

    #[tokio::test]
    async fn concurrent_session_writes_arrive_as_whole_ordered_lines() {
        let (writer, body) = channel();
        let session = Arc::new(Session::new("chan", sample_query(), 4, writer));

        let updater = {
            let session = session.clone();
            std::thread::spawn(move || {
                let mut log = Vec::new();
                for round in 0..50 {
                    log.push(ChatMessage::assistant(format!("reply {round}")));
                    session.update_messages(log.clone()).expect("update");
                }
            })
        };
        let reporter = {
            let session = session.clone();
            std::thread::spawn(move || {
                session.write_error_message("internal").expect("error");
                session.write_finish_message().expect("finish");
            })
        };
        updater.join().expect("join updater");
        reporter.join().expect("join reporter");
        drop(session);

        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .expect("collect body");
        let sent: Vec<Outbound> = String::from_utf8(bytes.to_vec())
            .expect("utf8 body")
            .lines()
            .map(|line| serde_json::from_str(line).expect("whole outbound line"))
            .collect();
        assert_eq!(sent.len(), 52);

        let log_lengths: Vec<usize> = sent
            .iter()
            .filter_map(|m| match m {
                Outbound::Msg(data) => Some(data.messages.len()),
                _ => None,
            })
            .collect();
        assert_eq!(log_lengths, (1..=50).collect::<Vec<_>>());

        let statuses: Vec<&Outbound> = sent
            .iter()
            .filter(|m| matches!(m, Outbound::Status(_)))
            .collect();
        assert_eq!(
            statuses,
            vec![&Outbound::error("internal"), &Outbound::finish("chan")]
        );
    }

    #[test]
    fn dropped_body_reports_disconnect() {
        let (writer, body) = channel();
        drop(body);
        let err = writer.write_line(b"{}").unwrap_err();
        assert!(matches!(err, WriteError::Disconnected));
    }
}
