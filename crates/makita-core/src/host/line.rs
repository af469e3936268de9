// Makita Line Protocol Host
// Newline-delimited text commands in, status lines and JSON records out

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use log::{debug, log};

use super::{Host, HostResult, Inbound, Polled};
use crate::bridge::{QueryAnswer, QueryRequest};
use crate::event::{Event, SyntheticEvent, WireEvent};
use crate::notification::{Disposition, Notification};
use crate::state::KeyTracker;

/// Log target for script `log()` calls
pub const SCRIPT_LOG_TARGET: &str = "makita::script";

/// Parse one inbound line; `None` for blank lines.
///
/// ```text
/// LOAD:<name>:<path>
/// EVENT:{"event_type":1,"code":30,"value":1,"script":"echo"}
/// STATE:{"id":3,"response":true}
/// ```
pub fn parse_line(line: &str) -> Option<Inbound> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let parsed = if let Some(rest) = line.strip_prefix("LOAD:") {
        match rest.split_once(':') {
            Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok(Inbound::Load {
                name: name.to_string(),
                path: PathBuf::from(path),
            }),
            _ => Err(format!("malformed LOAD command: {}", line)),
        }
    } else if let Some(json) = line.strip_prefix("EVENT:") {
        serde_json::from_str::<WireEvent>(json)
            .map(|wire| Inbound::Event(wire.into()))
            .map_err(|err| format!("invalid event: {}", err))
    } else if let Some(json) = line.strip_prefix("STATE:") {
        serde_json::from_str::<QueryAnswer>(json)
            .map(Inbound::Answer)
            .map_err(|err| format!("invalid state answer: {}", err))
    } else {
        Err(format!("unknown command: {}", line))
    };

    Some(parsed.unwrap_or_else(Inbound::Malformed))
}

/// Outbound line for a notification, if it has one
pub fn format_notification(notification: &Notification) -> Option<String> {
    match notification {
        Notification::Ready => Some("READY".to_string()),
        Notification::Loaded { name } => Some(format!("LOADED:{}", name)),
        Notification::Error(fault) => Some(format!("ERROR:{}", single_line(&fault.to_string()))),
        Notification::Outcome {
            script,
            disposition: Disposition::Consume,
            ..
        } => Some(format!("CONSUME:{}", script)),
        Notification::Outcome { .. } | Notification::Log { .. } => None,
    }
}

/// Fold multi-line messages (Lua tracebacks) onto one protocol line
fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// One line from the input stream
#[derive(Debug)]
enum RawLine {
    Text(String),
    /// Not UTF-8; reported and skipped
    Invalid(String),
}

/// Reader thread body: forward lines until end of input or a read error
fn read_lines<R: BufRead>(mut reader: R, tx: Sender<io::Result<RawLine>>) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let line = match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => match String::from_utf8(std::mem::take(&mut buf)) {
                Ok(text) => Ok(RawLine::Text(text)),
                Err(err) => Ok(RawLine::Invalid(format!(
                    "input line is not valid UTF-8: {}",
                    err.utf8_error()
                ))),
            },
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => Err(err),
        };
        let failed = line.is_err();
        if tx.send(line).is_err() || failed {
            break;
        }
    }
}

/// Host speaking the line protocol over any reader/writer pair.
///
/// Lines are read on a dedicated thread and handed over a channel, so
/// `poll` never blocks longer than its timeout.
pub struct LineHost<W: Write> {
    lines: Receiver<io::Result<RawLine>>,
    writer: W,
    tracker: Option<KeyTracker>,
    answers: Vec<Inbound>,
    closed: bool,
}

impl<W: Write> LineHost<W> {
    pub fn spawn<R>(reader: R, writer: W) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("makita-input".to_string())
            .spawn(move || read_lines(reader, tx))?;

        Ok(Self {
            lines: rx,
            writer,
            tracker: None,
            answers: Vec::new(),
            closed: false,
        })
    }

    /// Answer state queries from tracked key state instead of forwarding them
    pub fn with_local_answers(mut self) -> Self {
        self.tracker = Some(KeyTracker::new());
        self
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    fn accept(&mut self, line: RawLine, items: &mut Vec<Inbound>) {
        match line {
            RawLine::Text(text) => items.extend(parse_line(&text)),
            RawLine::Invalid(message) => items.push(Inbound::Malformed(message)),
        }
    }

    fn mark_closed(&mut self) {
        debug!("input stream closed");
        self.closed = true;
    }

    fn write_line(&mut self, line: &str) -> HostResult<()> {
        writeln!(self.writer, "{}", line)?;
        Ok(())
    }
}

impl<W: Write> Host for LineHost<W> {
    fn poll(&mut self, timeout: Duration) -> HostResult<Polled> {
        let mut items = std::mem::take(&mut self.answers);

        if !self.closed && items.is_empty() {
            match self.lines.recv_timeout(timeout) {
                Ok(line) => self.accept(line?, &mut items),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.mark_closed(),
            }
        }
        while !self.closed {
            match self.lines.try_recv() {
                Ok(line) => self.accept(line?, &mut items),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.mark_closed(),
            }
        }

        if self.closed && items.is_empty() {
            return Ok(Polled::Closed);
        }
        Ok(Polled::Items(items))
    }

    fn observe(&mut self, event: &Event) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.observe(event);
        }
    }

    fn deliver(&mut self, events: Vec<SyntheticEvent>) -> HostResult<()> {
        for event in &events {
            let json = serde_json::to_string(event).map_err(io::Error::from)?;
            self.write_line(&format!("SYNTHETIC:{}", json))?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn forward_query(&mut self, request: QueryRequest) -> HostResult<()> {
        if let Some(tracker) = &self.tracker {
            let response = tracker.answer(&request.query);
            debug!("answered query {} locally: {:?}", request.id, response);
            self.answers.push(Inbound::Answer(QueryAnswer {
                id: request.id,
                response,
            }));
            return Ok(());
        }

        let json = serde_json::to_string(&request).map_err(io::Error::from)?;
        self.write_line(&format!("STATE:{}", json))?;
        self.writer.flush()?;
        Ok(())
    }

    fn notify(&mut self, notification: Notification) -> HostResult<()> {
        if let Notification::Log {
            script,
            level,
            message,
        } = &notification
        {
            log!(
                target: SCRIPT_LOG_TARGET,
                *level,
                "[{}] {}",
                script.as_deref().unwrap_or("-"),
                message
            );
            return Ok(());
        }

        if let Some(line) = format_notification(&notification) {
            self.write_line(&line)?;
            self.writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{StateQuery, StateResponse};
    use crate::event::Action;
    use crate::notification::Fault;
    use std::io::Cursor;

    fn host(input: &str) -> LineHost<Vec<u8>> {
        LineHost::spawn(Cursor::new(input.as_bytes().to_vec()), Vec::new()).unwrap()
    }

    fn poll_all(host: &mut LineHost<Vec<u8>>) -> Vec<Inbound> {
        let mut items = Vec::new();
        loop {
            match host.poll(Duration::from_millis(50)).unwrap() {
                Polled::Items(batch) => items.extend(batch),
                Polled::Closed => return items,
            }
        }
    }

    fn output(host: &LineHost<Vec<u8>>) -> String {
        String::from_utf8(host.writer().clone()).unwrap()
    }

    #[test]
    fn test_parse_load() {
        assert_eq!(
            parse_line("LOAD:echo:/tmp/scripts/echo.lua"),
            Some(Inbound::Load {
                name: "echo".into(),
                path: PathBuf::from("/tmp/scripts/echo.lua")
            })
        );
        // paths may contain colons
        assert_eq!(
            parse_line("LOAD:a:/x:y.lua"),
            Some(Inbound::Load {
                name: "a".into(),
                path: PathBuf::from("/x:y.lua")
            })
        );
        assert!(matches!(parse_line("LOAD:broken"), Some(Inbound::Malformed(_))));
    }

    #[test]
    fn test_parse_event_and_state() {
        let Some(Inbound::Event(event)) =
            parse_line(r#"EVENT:{"event_type":1,"code":30,"value":1,"script":"echo"}"#)
        else {
            panic!("expected event");
        };
        assert_eq!(event.code(), 30);
        assert_eq!(event.script(), Some("echo"));

        assert_eq!(
            parse_line(r#"STATE:{"id":4,"response":[29]}"#),
            Some(Inbound::Answer(QueryAnswer {
                id: 4,
                response: StateResponse::Codes(vec![29])
            }))
        );
    }

    #[test]
    fn test_parse_blank_and_garbage() {
        assert_eq!(parse_line("   "), None);
        assert!(matches!(parse_line("HELLO"), Some(Inbound::Malformed(_))));
        assert!(matches!(parse_line("EVENT:{nope"), Some(Inbound::Malformed(_))));
    }

    #[test]
    fn test_format_notifications() {
        assert_eq!(format_notification(&Notification::Ready).as_deref(), Some("READY"));
        assert_eq!(
            format_notification(&Notification::Error(Fault::NotLoaded {
                script: "missing".into()
            }))
            .as_deref(),
            Some("ERROR:script not loaded: missing")
        );
        let pass = Notification::Outcome {
            script: "echo".into(),
            event: crate::event::Event::key(30, Action::Press),
            disposition: Disposition::PassThrough,
        };
        assert_eq!(format_notification(&pass), None);
    }

    #[test]
    fn test_multiline_errors_fold() {
        let fault = Fault::Handler {
            script: "bad".into(),
            message: "boom\nstack traceback:\n\t[C]: in ?".into(),
        };
        let line = format_notification(&Notification::Error(fault)).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.starts_with("ERROR:handler error in bad: boom | stack traceback:"));
    }

    #[test]
    fn test_poll_reads_until_closed() {
        let mut host = host("LOAD:echo:/tmp/echo.lua\n\nEVENT:{\"event_type\":1,\"code\":30,\"value\":1}\n");
        let items = poll_all(&mut host);
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Inbound::Event(_)));
        assert_eq!(host.poll(Duration::ZERO).unwrap(), Polled::Closed);
    }

    #[test]
    fn test_outbound_lines() {
        let mut host = host("");
        host.notify(Notification::Loaded { name: "echo".into() }).unwrap();
        host.deliver(vec![SyntheticEvent::key(30, Action::Press).with_script("echo")])
            .unwrap();
        host.forward_query(QueryRequest {
            id: 1,
            script: "echo".into(),
            query: StateQuery::key_state(30),
        })
        .unwrap();

        assert_eq!(
            output(&host),
            "LOADED:echo\n\
             SYNTHETIC:{\"event_type\":1,\"code\":30,\"value\":1,\"script\":\"echo\"}\n\
             STATE:{\"id\":1,\"script\":\"echo\",\"kind\":\"KeyState\",\"arg\":30}\n"
        );
    }

    #[test]
    fn test_local_answers_use_tracked_state() {
        let mut host = host(
            "EVENT:{\"event_type\":1,\"code\":42,\"value\":1}\n\
             EVENT:{\"event_type\":1,\"code\":42,\"value\":0}\n",
        )
        .with_local_answers();
        let items = poll_all(&mut host);
        assert_eq!(items.len(), 2);

        // only the press has been dispatched so far
        if let Inbound::Event(press) = &items[0] {
            host.observe(press);
        }

        host.forward_query(QueryRequest {
            id: 7,
            script: "caps".into(),
            query: StateQuery::key_state(42),
        })
        .unwrap();

        // input is closed, but the local answer is still handed over first
        assert_eq!(
            host.poll(Duration::ZERO).unwrap(),
            Polled::Items(vec![Inbound::Answer(QueryAnswer {
                id: 7,
                response: StateResponse::Flag(true)
            })])
        );
        assert!(output(&host).is_empty());
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let mut input = b"LOAD:echo:/tmp/echo.lua\n".to_vec();
        input.extend_from_slice(b"\xff\xfe\n");
        input.extend_from_slice(b"EVENT:{\"event_type\":1,\"code\":30,\"value\":1}\n");
        let mut host = LineHost::spawn(Cursor::new(input), Vec::new()).unwrap();

        let items = poll_all(&mut host);
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[1], Inbound::Malformed(message) if message.contains("UTF-8")));
        assert!(matches!(items[2], Inbound::Event(_)));
    }
}
