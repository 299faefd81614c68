//! # Request/Response Correlation
//!
//! Purpose: Match responses to the callbacks of the requests that caused
//! them on a single pipelined connection.
//!
//! ## Design Principles
//! 1. **FIFO Queue**: Entries sit in send order. The server answers
//!    non-quiet requests in that order, so the match is almost always at or
//!    near the head.
//! 2. **Quiet Pruning**: Entries ahead of the matched one belong to quiet
//!    requests that succeeded silently; they are dropped without a call.
//! 3. **Proceed Retains**: A callback returning [`Flow::Proceed`] stays at
//!    the head to receive the next response with the same opaque (STAT).
//! 4. **Faults Stay Contained**: A callback that returns [`Flow::Failed`] or
//!    panics is reported to the [`FaultHook`] and its entry removed. The
//!    queue is left consistent.
//!
//! ## Notes
//! - Pruning cannot tell a quiet request's expected silence from a lost
//!   non-quiet response; both are dropped the same way.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use remc_common::Packet;

/// What a callback wants after seeing a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Request satisfied; forget the entry.
    Done,
    /// More responses expected; keep the entry at the head.
    Proceed,
    /// Callback could not handle the response. Reported to the [`FaultHook`]
    /// and the entry is forgotten.
    Failed(String),
}

/// Response callback. Receives real responses or a DISCONNECTED packet.
pub type Callback = Box<dyn FnMut(&Packet) -> Flow + Send + 'static>;

/// Report of a callback that failed or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFault {
    pub opaque: u32,
    pub opcode: u8,
    pub message: String,
}

impl fmt::Display for CallbackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "callback for opaque {} (opcode {:#04x}) failed: {}",
            self.opaque, self.opcode, self.message
        )
    }
}

/// Sink for callback faults.
///
/// Panics are caught and reported here too, but the process-wide panic hook
/// still runs first and, by default, prints to stderr. Callbacks that want
/// their faults to reach only this hook should return [`Flow::Failed`].
pub type FaultHook = Arc<dyn Fn(&CallbackFault) + Send + Sync + 'static>;

/// Default hook: log and carry on.
pub fn log_fault() -> FaultHook {
    Arc::new(|fault: &CallbackFault| {
        tracing::error!(
            opaque = fault.opaque,
            opcode = fault.opcode,
            "response callback failed: {}",
            fault.message
        );
    })
}

/// 32-bit correlation counter, wrapping modulo 2^32.
#[derive(Debug, Clone, Default)]
pub struct OpaqueCounter {
    current: u32,
}

impl OpaqueCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the counter at `current`; the next value is `current + 1`.
    pub fn starting_at(current: u32) -> Self {
        OpaqueCounter { current }
    }

    /// Advances and returns the new value.
    pub fn next(&mut self) -> u32 {
        self.current = self.current.wrapping_add(1);
        self.current
    }

    pub fn current(&self) -> u32 {
        self.current
    }
}

struct PendingEntry {
    opaque: u32,
    opcode: u8,
    callback: Callback,
}

/// What happened to one inbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Callback ran and the entry was removed.
    Completed { pruned: usize },
    /// Callback asked to proceed; the entry stays at the head.
    Retained { pruned: usize },
    /// Callback failed or panicked; the entry was removed.
    Faulted { pruned: usize },
    /// No entry had this opaque; the response was dropped.
    Unmatched,
}

/// Ordered queue of requests awaiting responses.
pub struct PendingQueue {
    entries: VecDeque<PendingEntry>,
    hook: FaultHook,
}

impl PendingQueue {
    pub fn new(hook: FaultHook) -> Self {
        PendingQueue {
            entries: VecDeque::new(),
            hook,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a callback at the tail.
    pub fn push(&mut self, opaque: u32, opcode: u8, callback: Callback) {
        self.entries.push_back(PendingEntry {
            opaque,
            opcode,
            callback,
        });
    }

    /// Routes a response to its callback.
    pub fn dispatch(&mut self, response: &Packet) -> Dispatch {
        let opaque = response.opaque();
        let Some(pos) = self.entries.iter().position(|entry| entry.opaque == opaque) else {
            return Dispatch::Unmatched;
        };
        self.entries.drain(..pos);
        let Some(entry) = self.entries.front_mut() else {
            return Dispatch::Unmatched;
        };

        match invoke(&mut entry.callback, response, &self.hook) {
            Some(Flow::Proceed) => Dispatch::Retained { pruned: pos },
            Some(Flow::Done) | Some(Flow::Failed(_)) => {
                self.entries.pop_front();
                Dispatch::Completed { pruned: pos }
            }
            None => {
                self.entries.pop_front();
                Dispatch::Faulted { pruned: pos }
            }
        }
    }

    /// Notifies every entry, in order, with DISCONNECTED and empties the queue.
    ///
    /// Returns the number of callbacks notified.
    pub fn fail_all(&mut self) -> usize {
        let entries: Vec<PendingEntry> = self.entries.drain(..).collect();
        let count = entries.len();
        for mut entry in entries {
            let notice = Packet::disconnected(entry.opcode, entry.opaque);
            invoke(&mut entry.callback, &notice, &self.hook);
        }
        count
    }
}

/// Runs a callback behind a panic boundary.
///
/// Returns `None` when the callback panicked or returned [`Flow::Failed`];
/// the fault has been reported.
pub fn invoke(callback: &mut Callback, response: &Packet, hook: &FaultHook) -> Option<Flow> {
    let message = match panic::catch_unwind(AssertUnwindSafe(|| callback(response))) {
        Ok(Flow::Failed(message)) => message,
        Ok(flow) => return Some(flow),
        Err(payload) => panic_message(payload.as_ref()),
    };
    hook(&CallbackFault {
        opaque: response.opaque(),
        opcode: response.header.opcode,
        message,
    });
    None
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use remc_common::{Opcode, Status};

    type Log = Arc<Mutex<Vec<(u32, Status)>>>;

    fn recorder(log: &Log, tag: u32, flow: Flow) -> Callback {
        let log = log.clone();
        Box::new(move |packet: &Packet| {
            log.lock().unwrap().push((tag, packet.status()));
            flow.clone()
        })
    }

    fn response(opaque: u32) -> Packet {
        Packet::response(Opcode::Get).with_opaque(opaque)
    }

    fn queue() -> PendingQueue {
        PendingQueue::new(log_fault())
    }

    #[test]
    fn in_order_responses_complete_in_order() {
        let log = Log::default();
        let mut pending = queue();
        for opaque in 1..=3 {
            pending.push(opaque, Opcode::Get.as_u8(), recorder(&log, opaque, Flow::Done));
        }
        for opaque in 1..=3 {
            assert_eq!(
                pending.dispatch(&response(opaque)),
                Dispatch::Completed { pruned: 0 }
            );
        }
        assert!(pending.is_empty());
        let tags: Vec<u32> = log.lock().unwrap().iter().map(|(tag, _)| *tag).collect();
        assert_eq!(tags, vec![1, 2, 3]);
    }

    #[test]
    fn quiet_entries_ahead_of_match_are_pruned_silently() {
        let log = Log::default();
        let mut pending = queue();
        pending.push(1, Opcode::GetQ.as_u8(), recorder(&log, 1, Flow::Done)); // never answered
        pending.push(2, Opcode::SetQ.as_u8(), recorder(&log, 2, Flow::Done)); // never answered
        pending.push(3, Opcode::Get.as_u8(), recorder(&log, 3, Flow::Done));
        pending.push(4, Opcode::Get.as_u8(), recorder(&log, 4, Flow::Done));

        assert_eq!(
            pending.dispatch(&response(3)),
            Dispatch::Completed { pruned: 2 }
        );
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending.dispatch(&response(4)),
            Dispatch::Completed { pruned: 0 }
        );
        let tags: Vec<u32> = log.lock().unwrap().iter().map(|(tag, _)| *tag).collect();
        assert_eq!(tags, vec![3, 4]);
    }

    #[test]
    fn proceed_keeps_entry_until_done() {
        let calls = Arc::new(Mutex::new(0usize));
        let mut pending = queue();
        let counter = calls.clone();
        pending.push(
            9,
            Opcode::Stat.as_u8(),
            Box::new(move |packet: &Packet| {
                *counter.lock().unwrap() += 1;
                if packet.key.is_empty() {
                    Flow::Done
                } else {
                    Flow::Proceed
                }
            }),
        );

        for key in ["pid", "uptime", "threads"] {
            let stat = Packet::response(Opcode::Stat).with_key(key).with_opaque(9);
            assert_eq!(pending.dispatch(&stat), Dispatch::Retained { pruned: 0 });
        }
        let terminal = Packet::response(Opcode::Stat).with_opaque(9);
        assert_eq!(pending.dispatch(&terminal), Dispatch::Completed { pruned: 0 });
        assert_eq!(*calls.lock().unwrap(), 4);

        // A stray response afterwards is not addressable.
        assert_eq!(pending.dispatch(&terminal), Dispatch::Unmatched);
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[test]
    fn unmatched_response_leaves_queue_alone() {
        let log = Log::default();
        let mut pending = queue();
        pending.push(5, Opcode::Get.as_u8(), recorder(&log, 5, Flow::Done));
        assert_eq!(pending.dispatch(&response(77)), Dispatch::Unmatched);
        assert_eq!(pending.len(), 1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn fail_all_notifies_each_once_in_order() {
        let log = Log::default();
        let mut pending = queue();
        for opaque in [10, 11, 12] {
            pending.push(opaque, Opcode::Get.as_u8(), recorder(&log, opaque, Flow::Proceed));
        }
        assert_eq!(pending.fail_all(), 3);
        assert!(pending.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (10, Status::Disconnected),
                (11, Status::Disconnected),
                (12, Status::Disconnected)
            ]
        );
        assert_eq!(pending.fail_all(), 0);
    }

    #[test]
    fn fail_all_notice_names_the_request_opcode() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pending = queue();
        for (opaque, opcode) in [(1, Opcode::Set), (2, Opcode::Stat), (3, Opcode::Delete)] {
            let sink = seen.clone();
            pending.push(
                opaque,
                opcode.as_u8(),
                Box::new(move |packet: &Packet| {
                    sink.lock()
                        .unwrap()
                        .push((packet.opaque(), packet.command(), packet.status()));
                    Flow::Done
                }),
            );
        }
        pending.fail_all();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (1, Some(Opcode::Set), Status::Disconnected),
                (2, Some(Opcode::Stat), Status::Disconnected),
                (3, Some(Opcode::Delete), Status::Disconnected)
            ]
        );
    }

    #[test]
    fn panicking_callback_is_reported_and_removed() {
        let faults = Arc::new(Mutex::new(Vec::new()));
        let sink = faults.clone();
        let hook: FaultHook = Arc::new(move |fault: &CallbackFault| {
            sink.lock().unwrap().push(fault.clone());
        });
        let log = Log::default();
        let mut pending = PendingQueue::new(hook);
        pending.push(
            1,
            Opcode::Get.as_u8(),
            Box::new(|_: &Packet| -> Flow { panic!("boom") }),
        );
        pending.push(2, Opcode::Get.as_u8(), recorder(&log, 2, Flow::Done));

        assert_eq!(pending.dispatch(&response(1)), Dispatch::Faulted { pruned: 0 });
        assert_eq!(pending.dispatch(&response(2)), Dispatch::Completed { pruned: 0 });

        let faults = faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].opaque, 1);
        assert_eq!(faults[0].message, "boom");
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn failed_callback_is_reported_without_panicking() {
        let faults = Arc::new(Mutex::new(Vec::new()));
        let sink = faults.clone();
        let hook: FaultHook = Arc::new(move |fault: &CallbackFault| {
            sink.lock().unwrap().push(fault.clone());
        });
        let log = Log::default();
        let mut pending = PendingQueue::new(hook);
        pending.push(
            4,
            Opcode::Get.as_u8(),
            Box::new(|_: &Packet| Flow::Failed("unexpected value".to_string())),
        );
        pending.push(5, Opcode::Get.as_u8(), recorder(&log, 5, Flow::Done));

        assert_eq!(pending.dispatch(&response(4)), Dispatch::Faulted { pruned: 0 });
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.dispatch(&response(5)), Dispatch::Completed { pruned: 0 });

        let faults = faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].opaque, 4);
        assert_eq!(faults[0].message, "unexpected value");
    }

    #[test]
    fn opaque_counter_wraps() {
        let mut counter = OpaqueCounter::starting_at(u32::MAX - 1);
        assert_eq!(counter.next(), u32::MAX);
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(OpaqueCounter::new().next(), 1);
    }

    #[test]
    fn wrapped_opaque_does_not_hit_drained_entries() {
        let log = Log::default();
        let mut pending = queue();
        let mut counter = OpaqueCounter::starting_at(u32::MAX);
        pending.push(u32::MAX, Opcode::Get.as_u8(), recorder(&log, 0, Flow::Done));
        pending.dispatch(&response(u32::MAX));

        let opaque = counter.next();
        pending.push(opaque, Opcode::Get.as_u8(), recorder(&log, 1, Flow::Done));
        assert_eq!(pending.dispatch(&response(0)), Dispatch::Completed { pruned: 0 });
        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
