// Makita Embedded Host
// Call-hook binding for a capture layer living in the same process

use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{Host, HostError, HostResult, Inbound, Polled};
use crate::bridge::{QueryAnswer, QueryRequest, StateResponse};
use crate::event::{Event, SyntheticEvent};
use crate::notification::{Disposition, Notification};

/// Callbacks the embedding capture layer provides.
///
/// The readiness descriptor becomes readable whenever `fetch_pending_events`
/// has something to return; the host is expected to drain it there.
pub trait HostHooks {
    fn signal_readiness_fd(&self) -> RawFd;

    fn fetch_pending_events(&mut self) -> Vec<Event>;

    fn emit_synthetic_event(&mut self, event_type: u16, code: u16, value: i32);

    /// Reply text is `true`, `false`, an integer, a JSON list of codes, or free text
    fn query_host_state(&mut self, kind: &str, arg: Option<i64>) -> String;

    fn log(&mut self, level: log::Level, message: &str);

    fn handler_outcome(&mut self, _script: &str, _consumed: bool) {}
}

/// What one wait on the readiness descriptor saw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Idle,
    Readable,
    /// Peer went away; readable data may still be pending
    HungUp { readable: bool },
}

/// Wait up to `timeout` for `fd` to become readable
fn wait_readable(fd: RawFd, timeout: Duration) -> HostResult<Readiness> {
    let mut poll_fd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = i32::try_from(timeout.as_micros().div_ceil(1000)).unwrap_or(i32::MAX);

    let poll_result = unsafe { libc::poll(&mut poll_fd, 1, timeout_ms) };

    if poll_result < 0 {
        let err = std::io::Error::last_os_error();
        // a signal arrived; the caller re-checks its running flag
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok(Readiness::Idle);
        }
        return Err(HostError::Io(err));
    }
    if poll_result == 0 {
        return Ok(Readiness::Idle);
    }

    if poll_fd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        return Err(HostError::Readiness(format!(
            "poll reported revents {:#x} on fd {}",
            poll_fd.revents, fd
        )));
    }
    let readable = poll_fd.revents & libc::POLLIN != 0;
    if poll_fd.revents & libc::POLLHUP != 0 {
        return Ok(Readiness::HungUp { readable });
    }
    Ok(if readable {
        Readiness::Readable
    } else {
        Readiness::Idle
    })
}

/// Host driving the runtime through [`HostHooks`].
///
/// Query answers come back synchronously from `query_host_state` and are
/// handed to the runtime on the next poll.
pub struct EmbeddedHost<H: HostHooks> {
    hooks: H,
    answers: Vec<Inbound>,
    closed: bool,
}

impl<H: HostHooks> EmbeddedHost<H> {
    pub fn new(hooks: H) -> Self {
        Self {
            hooks,
            answers: Vec::new(),
            closed: false,
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn into_hooks(self) -> H {
        self.hooks
    }

    fn fetch_into(&mut self, items: &mut Vec<Inbound>) {
        items.extend(
            self.hooks
                .fetch_pending_events()
                .into_iter()
                .map(Inbound::Event),
        );
    }
}

impl<H: HostHooks> Host for EmbeddedHost<H> {
    fn poll(&mut self, timeout: Duration) -> HostResult<Polled> {
        let mut items = std::mem::take(&mut self.answers);
        if self.closed {
            return Ok(if items.is_empty() {
                Polled::Closed
            } else {
                Polled::Items(items)
            });
        }

        let wait = if items.is_empty() {
            timeout
        } else {
            Duration::ZERO
        };
        match wait_readable(self.hooks.signal_readiness_fd(), wait)? {
            Readiness::Idle => {}
            Readiness::Readable => self.fetch_into(&mut items),
            Readiness::HungUp { readable } => {
                if readable {
                    self.fetch_into(&mut items);
                }
                self.closed = true;
            }
        }
        Ok(Polled::Items(items))
    }

    fn deliver(&mut self, events: Vec<SyntheticEvent>) -> HostResult<()> {
        for event in events {
            self.hooks
                .emit_synthetic_event(event.event_type, event.code, event.value);
        }
        Ok(())
    }

    fn forward_query(&mut self, request: QueryRequest) -> HostResult<()> {
        let reply = self
            .hooks
            .query_host_state(request.query.kind.as_str(), request.query.arg);
        self.answers.push(Inbound::Answer(QueryAnswer {
            id: request.id,
            response: StateResponse::parse_host_reply(&reply),
        }));
        Ok(())
    }

    fn notify(&mut self, notification: Notification) -> HostResult<()> {
        match notification {
            Notification::Ready => self.hooks.log(log::Level::Info, "script engine ready"),
            Notification::Loaded { name } => {
                self.hooks.log(log::Level::Info, &format!("loaded script {}", name))
            }
            Notification::Error(fault) => self.hooks.log(log::Level::Error, &fault.to_string()),
            Notification::Outcome {
                script,
                disposition,
                ..
            } => self
                .hooks
                .handler_outcome(&script, disposition == Disposition::Consume),
            Notification::Log {
                script,
                level,
                message,
            } => {
                let line = match script {
                    Some(script) => format!("[{}] {}", script, message),
                    None => message,
                };
                self.hooks.log(level, &line);
            }
        }
        Ok(())
    }
}
