//! Per-client state tracked by the server.

use ember_core::Bytes;

/// State of a blocked list pop.
#[derive(Debug, Clone)]
pub struct Blocked {
    /// Keys the client waits on, in argument order.
    pub keys: Vec<Bytes>,
    /// Absolute deadline in ms; 0 blocks forever.
    pub deadline_ms: u64,
    /// Pop from the tail (BRPOP/BRPOPLPUSH) instead of the head.
    pub pop_tail: bool,
    /// Destination key for BRPOPLPUSH.
    pub target: Option<Bytes>,
}

/// A connected client as dispatch sees it.
#[derive(Debug)]
pub struct Client {
    /// Client id, unique for the process lifetime.
    pub id: u64,
    /// CLIENT SETNAME label.
    pub name: String,
    /// Selected database.
    pub db: usize,
    /// Passed AUTH (or no password is configured).
    pub authenticated: bool,
    /// Synthetic replay client: replies are discarded and gates are
    /// bypassed, because replay is the only activity while loading.
    pub loading: bool,
    /// Queued transaction commands; `Some` after MULTI.
    pub multi_queue: Option<Vec<Vec<Bytes>>>,
    /// A queueing error poisoned the transaction; EXEC will abort.
    pub dirty_exec: bool,
    /// Keys watched for optimistic concurrency, as (db, key).
    pub watched: Vec<(usize, Bytes)>,
    /// Blocking pop state, when parked.
    pub blocked: Option<Blocked>,
    /// Connection timestamp in ms.
    pub created_ms: u64,
    /// Last command timestamp in ms, for idle-timeout handling.
    pub last_interaction_ms: u64,
}

impl Client {
    /// A fresh client.
    pub fn new(id: u64, now_ms: u64) -> Client {
        Client {
            id,
            name: String::new(),
            db: 0,
            authenticated: false,
            loading: false,
            multi_queue: None,
            dirty_exec: false,
            watched: Vec::new(),
            blocked: None,
            created_ms: now_ms,
            last_interaction_ms: now_ms,
        }
    }

    /// The synthetic client used while replaying the log.
    pub fn replay(now_ms: u64) -> Client {
        let mut client = Client::new(u64::MAX, now_ms);
        client.loading = true;
        client.authenticated = true;
        client
    }

    /// True between MULTI and EXEC/DISCARD.
    pub fn in_multi(&self) -> bool {
        self.multi_queue.is_some()
    }

    /// Forget transaction state (EXEC, DISCARD, or disconnect).
    pub fn reset_multi(&mut self) {
        self.multi_queue = None;
        self.dirty_exec = false;
    }
}
