// Makita Memory Host
// In-process queue host for embedding the runtime in tests and tools

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use super::{Host, HostResult, Inbound, Polled};
use crate::bridge::{QueryAnswer, QueryRequest, StateResponse};
use crate::event::{Event, SyntheticEvent};
use crate::notification::{Fault, Notification};

type Answerer = Box<dyn FnMut(&QueryRequest) -> Option<StateResponse>>;

/// Host backed by plain queues.
///
/// `poll` never waits; queued input is handed over all at once. Everything
/// the runtime sends back is recorded for inspection.
#[derive(Default)]
pub struct MemoryHost {
    inbound: VecDeque<Inbound>,
    closed: bool,
    answerer: Option<Answerer>,
    delivered: Vec<Vec<SyntheticEvent>>,
    notifications: Vec<Notification>,
    queries: Vec<QueryRequest>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer forwarded queries with `answerer`; answers arrive on the next poll
    pub fn with_answerer(
        mut self,
        answerer: impl FnMut(&QueryRequest) -> Option<StateResponse> + 'static,
    ) -> Self {
        self.answerer = Some(Box::new(answerer));
        self
    }

    pub fn push(&mut self, item: Inbound) {
        self.inbound.push_back(item);
    }

    pub fn push_event(&mut self, event: Event) {
        self.push(Inbound::Event(event));
    }

    pub fn push_load(&mut self, name: &str, path: impl Into<PathBuf>) {
        self.push(Inbound::Load {
            name: name.to_string(),
            path: path.into(),
        });
    }

    pub fn push_answer(&mut self, id: u64, response: StateResponse) {
        self.push(Inbound::Answer(QueryAnswer { id, response }));
    }

    /// Report `Closed` once the queue is empty
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Synthetic events, one batch per flush
    pub fn delivered(&self) -> &[Vec<SyntheticEvent>] {
        &self.delivered
    }

    /// Every synthetic event as (type, code, value), in delivery order
    pub fn delivered_triples(&self) -> Vec<(u16, u16, i32)> {
        self.delivered
            .iter()
            .flatten()
            .map(SyntheticEvent::triple)
            .collect()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn faults(&self) -> Vec<Fault> {
        self.notifications
            .iter()
            .filter_map(Notification::fault)
            .cloned()
            .collect()
    }

    pub fn queries(&self) -> &[QueryRequest] {
        &self.queries
    }
}

impl Host for MemoryHost {
    fn poll(&mut self, _timeout: Duration) -> HostResult<Polled> {
        if self.inbound.is_empty() && self.closed {
            return Ok(Polled::Closed);
        }
        Ok(Polled::Items(self.inbound.drain(..).collect()))
    }

    fn deliver(&mut self, events: Vec<SyntheticEvent>) -> HostResult<()> {
        self.delivered.push(events);
        Ok(())
    }

    fn forward_query(&mut self, request: QueryRequest) -> HostResult<()> {
        if let Some(answerer) = self.answerer.as_mut() {
            if let Some(response) = answerer(&request) {
                self.inbound.push_back(Inbound::Answer(QueryAnswer {
                    id: request.id,
                    response,
                }));
            }
        }
        self.queries.push(request);
        Ok(())
    }

    fn notify(&mut self, notification: Notification) -> HostResult<()> {
        self.notifications.push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::StateQuery;

    #[test]
    fn test_poll_drains_then_closes() {
        let mut host = MemoryHost::new();
        host.push_load("echo", "/tmp/echo.lua");
        host.close();

        match host.poll(Duration::ZERO).unwrap() {
            Polled::Items(items) => assert_eq!(items.len(), 1),
            Polled::Closed => panic!("closed too early"),
        }
        assert_eq!(host.poll(Duration::ZERO).unwrap(), Polled::Closed);
    }

    #[test]
    fn test_answerer_queues_answer() {
        let mut host = MemoryHost::new().with_answerer(|_| Some(StateResponse::Flag(true)));
        host.forward_query(QueryRequest {
            id: 9,
            script: "caps".into(),
            query: StateQuery::device_connected(),
        })
        .unwrap();

        assert_eq!(
            host.poll(Duration::ZERO).unwrap(),
            Polled::Items(vec![Inbound::Answer(QueryAnswer {
                id: 9,
                response: StateResponse::Flag(true)
            })])
        );
        assert_eq!(host.queries().len(), 1);
    }
}
