use crate::connection;
use crate::error::{Error, Result};
use crate::request;
use crate::response;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const SERVER: Token = Token(0);
const WAKER: Token = Token(1);
const CONNECTIONS_START: usize = 2;
const MAX_EVENTS: usize = 1024;
const INITIAL_CONNECTIONS: usize = 128;

/// A handler that can handle incoming requests for a server.
///
/// Handlers run on the event loop thread, but must be shareable with whatever thread
/// constructed them.
pub trait Handler: Sync + Send {
    /// Receives a `Request`/`Response` pair, and should perform some action on them.
    ///
    /// This could be reading from the request, and writing to the response. A response
    /// left without a status code is sent as a 500.
    fn handle(&self, request: request::Request, response: &mut response::Response);
}

impl<F> Handler for F where F: Fn(request::Request, &mut response::Response), F: Sync + Send {
    fn handle(&self, req: request::Request, res: &mut response::Response) {
        self(req, res)
    }
}

#[derive(Debug, Clone, Copy)]
struct Stop {
    grace: Duration,
    force: Duration,
}

/// A running HTTP server. The accept loop lives on its own thread from `start` until a
/// `stop` has been fully processed.
pub struct Server {
    local_addr: SocketAddr,
    stop_tx: mpsc::Sender<Stop>,
    waker: Waker,
    stopping: AtomicBool,
    event_loop: Mutex<Option<thread::JoinHandle<io::Result<()>>>>,
}

impl Server {
    /// Binds `address` and starts serving it with `handler`. Returns once the listener is bound.
    pub fn start(address: SocketAddr, handler: Arc<dyn Handler>) -> Result<Server> {
        let mut listener = TcpListener::bind(address)
            .map_err(|source| Error::Bind { addr: address, source })?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry().register(&mut listener, SERVER, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER)?;
        let (stop_tx, stop_rx) = mpsc::channel();

        let event_loop = EventLoop {
            poll,
            listener: Some(listener),
            connections: Slab::with_capacity(INITIAL_CONNECTIONS),
            handler,
            stop_rx,
            drain: None,
        };
        let thread = thread::Builder::new()
            .name("http-event-loop".to_string())
            .spawn(move || event_loop.run())?;

        info!("Listening for HTTP on {}", local_addr);

        Ok(Server {
            local_addr,
            stop_tx,
            waker,
            stopping: AtomicBool::new(false),
            event_loop: Mutex::new(Some(thread)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections. Idle connections survive until `grace` has passed; any
    /// connection still open once `force` has passed is closed mid-request. Both periods
    /// count from this call. Only the first call has an effect.
    pub fn stop(&self, grace: Duration, force: Duration) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            debug!("stop already requested");
            return;
        }

        info!("stopping server on {}; grace={:?} force={:?}", self.local_addr, grace, force);
        if self.stop_tx.send(Stop { grace, force }).is_err() {
            debug!("event loop already exited");
            return;
        }
        if let Err(e) = self.waker.wake() {
            error!("failed to wake event loop; err={:?}", e);
        }
    }

    /// Blocks until the event loop has exited, which happens once a `stop` has drained
    /// every connection.
    pub fn await_termination(&self) -> Result<()> {
        let mut event_loop = self.event_loop.lock().unwrap_or_else(PoisonError::into_inner);

        match event_loop.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result.map_err(Error::from),
                Err(_) => Err(Error::EventLoop("event loop thread panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(0), Duration::from_secs(0));
    }
}

#[derive(Debug, Clone, Copy)]
struct Drain {
    grace_deadline: Instant,
    force_deadline: Instant,
}

impl Drain {
    fn begin(stop: Stop, now: Instant) -> Drain {
        Drain {
            grace_deadline: now + stop.grace,
            force_deadline: now + stop.force.max(stop.grace),
        }
    }

    fn timeout(&self, now: Instant) -> Duration {
        if now < self.grace_deadline {
            self.grace_deadline - now
        } else {
            self.force_deadline.saturating_duration_since(now)
        }
    }
}

struct EventLoop {
    poll: Poll,
    listener: Option<TcpListener>,
    connections: Slab<connection::Connection>,
    handler: Arc<dyn Handler>,
    stop_rx: mpsc::Receiver<Stop>,
    drain: Option<Drain>,
}

impl EventLoop {
    fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(MAX_EVENTS);

        loop {
            let timeout = self.drain.map(|drain| drain.timeout(Instant::now()));
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("event loop poll failed; err={:?}", e);
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    SERVER => self.accept(),
                    WAKER => self.receive_stop(),
                    token => self.ready(token, event),
                }
            }

            if self.drain.is_some() && self.drain_step(Instant::now()) {
                break;
            }
        }

        debug!("event loop exited");
        Ok(())
    }

    fn accept(&mut self) {
        loop {
            let listener = match self.listener {
                Some(ref listener) => listener,
                None => return,
            };

            match listener.accept() {
                Ok((mut stream, peer)) => {
                    let entry = self.connections.vacant_entry();
                    let token = Token(entry.key() + CONNECTIONS_START);

                    if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
                        error!("failed to register connection from {}; err={:?}", peer, e);
                        continue;
                    }

                    debug!("{:?}: accepted a new connection from {}", token, peer);
                    entry.insert(connection::Connection::server(stream, peer, token, self.handler.clone()));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("encountered error while accepting connection; err={:?}", e);
                    return;
                }
            }
        }
    }

    fn receive_stop(&mut self) {
        while let Ok(stop) = self.stop_rx.try_recv() {
            if self.drain.is_some() {
                continue;
            }

            if let Some(mut listener) = self.listener.take() {
                if let Err(e) = self.poll.registry().deregister(&mut listener) {
                    debug!("failed to deregister listener; err={:?}", e);
                }
            }

            self.drain = Some(Drain::begin(stop, Instant::now()));
            info!("stopped accepting connections; draining {} connection(s)", self.connections.len());
        }
    }

    fn ready(&mut self, token: Token, event: &mio::event::Event) {
        let key = token.0 - CONNECTIONS_START;

        match self.connections.get_mut(key) {
            Some(connection) => connection.ready(event),
            None => {
                debug!("{:?}: event for a connection that is already gone", token);
                return;
            }
        }

        self.refresh(key);
    }

    /// Re-arms the connection for whatever its state waits on, or drops it once closed.
    fn refresh(&mut self, key: usize) {
        let token = Token(key + CONNECTIONS_START);
        let connection = &mut self.connections[key];

        let interest = match connection.state {
            connection::State::Reading => Interest::READABLE,
            connection::State::Writing => Interest::WRITABLE,
            connection::State::Closed => return self.close(key),
        };

        if let Err(e) = self.poll.registry().reregister(&mut connection.stream, token, interest) {
            error!("{:?}: failed to reregister; err={:?}", token, e);
            self.close(key);
        }
    }

    fn close(&mut self, key: usize) {
        if let Some(mut connection) = self.connections.try_remove(key) {
            if let Err(e) = self.poll.registry().deregister(&mut connection.stream) {
                debug!("{:?}: failed to deregister; err={:?}", connection.token(), e);
            }
            debug!("{:?}: closed connection from {}", connection.token(), connection.peer);
        }
    }

    /// Closes whatever the drain deadlines allow. Returns true once nothing is left open.
    fn drain_step(&mut self, now: Instant) -> bool {
        let drain = match self.drain {
            Some(drain) => drain,
            None => return false,
        };

        if now >= drain.force_deadline {
            if !self.connections.is_empty() {
                warn!("force-closing {} connection(s)", self.connections.len());
            }
            let keys: Vec<usize> = self.connections.iter().map(|(key, _)| key).collect();
            for key in keys {
                self.close(key);
            }
            return true;
        }

        if now >= drain.grace_deadline {
            let idle: Vec<usize> = self.connections.iter_mut()
                .filter_map(|(key, connection)| {
                    connection.drain();
                    if connection.is_idle() { Some(key) } else { None }
                })
                .collect();
            for key in idle {
                self.close(key);
            }
        }

        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_deadline_never_precedes_grace() {
        let now = Instant::now();
        let drain = Drain::begin(Stop { grace: Duration::from_secs(3), force: Duration::from_secs(1) }, now);

        assert_eq!(drain.grace_deadline, now + Duration::from_secs(3));
        assert_eq!(drain.force_deadline, now + Duration::from_secs(3));
    }

    #[test]
    fn timeout_targets_the_next_deadline() {
        let now = Instant::now();
        let drain = Drain::begin(Stop { grace: Duration::from_secs(1), force: Duration::from_secs(5) }, now);

        assert_eq!(drain.timeout(now), Duration::from_secs(1));
        assert_eq!(drain.timeout(now + Duration::from_secs(2)), Duration::from_secs(3));
        assert_eq!(drain.timeout(now + Duration::from_secs(9)), Duration::from_secs(0));
    }
}
