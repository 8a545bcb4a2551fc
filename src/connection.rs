use crate::request;
use crate::response;
use crate::server;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

const MAX_HEADERS: usize = 50;
const READ_CHUNK: usize = 4096;

pub struct Connection {
    handler: Arc<dyn server::Handler>,
    incoming_buf: BytesMut,
    outgoing_buf: io::Cursor<Vec<u8>>,
    keep_alive: bool,
    draining: bool,
    peer_closed: bool,
    pub peer: SocketAddr,
    pub state: State,
    pub stream: TcpStream,
    token: mio::Token,
}

impl Connection {
    pub fn server(stream: TcpStream, peer: SocketAddr, token: mio::Token, handler: Arc<dyn server::Handler>) -> Connection {
        Connection {
            stream,
            handler,
            incoming_buf: BytesMut::with_capacity(READ_CHUNK),
            outgoing_buf: io::Cursor::new(Vec::with_capacity(READ_CHUNK)),
            keep_alive: true,
            draining: false,
            peer_closed: false,
            peer,
            state: State::Reading,
            token,
        }
    }

    pub fn token(&self) -> mio::Token {
        self.token
    }

    /// Nothing buffered in either direction: safe to close without cutting a request short.
    pub fn is_idle(&self) -> bool {
        match self.state {
            State::Reading => self.incoming_buf.is_empty(),
            _ => false,
        }
    }

    /// Finish whatever request is in flight, then close.
    pub fn drain(&mut self) {
        self.draining = true;
        self.keep_alive = false;
    }

    pub fn ready(&mut self, event: &mio::event::Event) {
        match self.state {
            State::Reading if event.is_readable() || event.is_read_closed() => self.read(),
            State::Writing if event.is_writable() => self.write(),
            _ => debug!("{:?}: ignoring event; state={:?} event={:?}", self.token, self.state, event),
        }
    }

    fn read(&mut self) {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!("{:?}: peer closed; buffered={}", self.token, self.incoming_buf.len());
                    self.peer_closed = true;
                    break;
                }
                Ok(n) => {
                    trace!("{:?}: read bytes={}", self.token, n);
                    self.incoming_buf.extend_from_slice(&chunk[..n]);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("{:?}: got an error trying to read; err={:?}", self.token, e);
                    self.state = State::Closed;
                    return;
                }
            }
        }

        if !self.incoming_buf.is_empty() {
            self.parse_request();
        }

        if self.peer_closed {
            if let State::Reading = self.state {
                if self.incoming_buf.is_empty() {
                    self.state = State::Closed;
                } else {
                    warn!("{:?}: read 0 bytes from client; buffered={}", self.token, self.incoming_buf.len());
                    self.reject(response::Response::bad_request(Some("Incomplete request")));
                }
            }
        }
    }

    fn write(&mut self) {
        loop {
            let position = self.outgoing_buf.position() as usize;
            if position >= self.outgoing_buf.get_ref().len() {
                break;
            }

            match self.stream.write(&self.outgoing_buf.get_ref()[position..]) {
                Ok(0) => {
                    warn!("{:?}: wrote 0 bytes; closing", self.token);
                    self.state = State::Closed;
                    return;
                }
                Ok(n) => self.outgoing_buf.set_position((position + n) as u64),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("{:?}: got an error trying to write; err={:?}", self.token, e);
                    self.state = State::Closed;
                    return;
                }
            }
        }

        debug!("{:?}: finished writing response", self.token);
        self.outgoing_buf.get_mut().clear();
        self.outgoing_buf.set_position(0);

        if !self.keep_alive {
            self.state = State::Closed;
            return;
        }

        self.state = State::Reading;
        // pipelined requests may already be buffered
        if !self.incoming_buf.is_empty() {
            self.parse_request();
        }
    }

    fn parse_request(&mut self) {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let header_length = match req.parse(&self.incoming_buf) {
            Ok(httparse::Status::Complete(offset)) => offset,
            Ok(httparse::Status::Partial) => {
                debug!("{:?}: partial headers parsed; buffered={}", self.token, self.incoming_buf.len());
                return;
            }
            Err(e) => {
                warn!("{:?}: parse error={:?}", self.token, e);
                return self.reject(response::Response::bad_request(Some("Malformed request")));
            }
        };

        if request::find_header(req.headers, "Transfer-Encoding").is_some() {
            warn!("{:?}: request uses Transfer-Encoding; rejecting", self.token);
            return self.reject(response::Response::not_implemented(Some("Transfer-Encoding is not supported")));
        }

        let content_length = match Connection::get_content_length(req.headers) {
            Ok(n) => n,
            Err(e) => {
                warn!("{:?}: bad Content-Length; err={}", self.token, e);
                return self.reject(response::Response::bad_request(Some("Invalid Content-Length")));
            }
        };

        let request_length = header_length + content_length;
        if request_length > self.incoming_buf.len() {
            debug!(
                "{:?}: read complete headers, still waiting for body read={} content_length={}",
                self.token, self.incoming_buf.len(), content_length);
            return;
        }

        debug!("{:?}: {} {} from {}",
            self.token, req.method.unwrap_or("-"), req.path.unwrap_or("-"), self.peer);

        self.keep_alive = !self.draining && !self.peer_closed && Connection::wants_keep_alive(&req);

        let mut res = response::Response::new();
        let body = &self.incoming_buf[header_length..request_length];
        self.handler.handle(request::Request::from_httparse(&req, body, self.peer), &mut res);

        if !self.keep_alive {
            res.add_header("Connection", b"close");
        }
        res.finalize(self.outgoing_buf.get_mut());

        self.incoming_buf.advance(request_length);
        self.state = State::Writing;
    }

    /// Answers with `res` and closes once it is written; anything still buffered is dropped.
    fn reject(&mut self, mut res: response::Response) {
        self.keep_alive = false;
        res.add_header("Connection", b"close");
        res.finalize(self.outgoing_buf.get_mut());
        self.incoming_buf.clear();
        self.state = State::Writing;
    }

    // TODO: handle Transfer-Encoding; chunked bodies get a 501 until then
    pub fn get_content_length(headers: &[httparse::Header]) -> Result<usize, std::num::ParseIntError> {
        match request::find_header(headers, "Content-Length") {
            Some(value) => usize::from_str(std::str::from_utf8(value).unwrap_or("").trim()),
            None => Ok(0),
        }
    }

    fn wants_keep_alive(req: &httparse::Request) -> bool {
        let connection = request::find_header(req.headers, "Connection")
            .map(|value| String::from_utf8_lossy(value).to_ascii_lowercase());

        match (req.version, connection.as_deref()) {
            (_, Some(value)) if value.contains("close") => false,
            (Some(1), _) => true,
            (_, Some(value)) => value.contains("keep-alive"),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub enum State {
    Reading,
    Writing,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_request<T>(raw: &[u8], f: impl FnOnce(&httparse::Request) -> T) -> T {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(raw) {
            Ok(httparse::Status::Complete(_)) => f(&req),
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn content_length_defaults_to_zero() {
        let n = with_request(b"POST / HTTP/1.1\r\nHost: a\r\n\r\n", |req| Connection::get_content_length(req.headers));
        assert_eq!(n, Ok(0));
    }

    #[test]
    fn content_length_header_is_case_insensitive() {
        let n = with_request(b"POST / HTTP/1.1\r\ncontent-length: 12\r\n\r\n", |req| Connection::get_content_length(req.headers));
        assert_eq!(n, Ok(12));
    }

    #[test]
    fn garbage_content_length_is_an_error() {
        let n = with_request(b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n", |req| Connection::get_content_length(req.headers));
        assert!(n.is_err());
    }

    #[test]
    fn http11_keeps_alive_unless_told_otherwise() {
        assert!(with_request(b"POST / HTTP/1.1\r\n\r\n", Connection::wants_keep_alive));
        assert!(!with_request(b"POST / HTTP/1.1\r\nConnection: close\r\n\r\n", Connection::wants_keep_alive));
    }

    #[test]
    fn http10_closes_unless_asked_to_keep_alive() {
        assert!(!with_request(b"POST / HTTP/1.0\r\n\r\n", Connection::wants_keep_alive));
        assert!(with_request(b"POST / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n", Connection::wants_keep_alive));
    }
}
