use crate::log_file::LogFile;
use crate::request;
use crate::response;
use crate::server;
use crate::shutdown;
use crate::status;
use std::net::SocketAddr;
use std::sync::Arc;

/// Body that asks the service to shut down instead of being logged.
pub const STOP_SENTINEL: &str = "STOP";

/// `"<body> <ip>:<port>"`, the line recorded for one request.
pub fn log_entry(body: &str, remote: SocketAddr) -> String {
    format!("{} {}:{}", body, remote.ip(), remote.port())
}

/// Records every POST body together with the sender's address, except the sentinel,
/// which raises the shutdown signal.
pub struct IngestHandler {
    log: Arc<LogFile>,
    shutdown: shutdown::Trigger,
}

impl IngestHandler {
    pub fn new(log: Arc<LogFile>, shutdown: shutdown::Trigger) -> IngestHandler {
        IngestHandler { log, shutdown }
    }
}

impl server::Handler for IngestHandler {
    fn handle(&self, req: request::Request, res: &mut response::Response) {
        if req.method != Some("POST") {
            debug!("rejecting method={:?} path={:?} from {}", req.method, req.path, req.remote);
            res.set_code(status::Code::MethodNotAllowed405);
            res.add_header("Allow", b"POST");
            return;
        }

        if req.body == STOP_SENTINEL.as_bytes() {
            info!("stop requested by {}", req.remote);
            self.shutdown.signal(shutdown::Reason::StopRequested);
            res.set_code(status::Code::Ok200);
            return;
        }

        match self.log.append(&log_entry(&req.text(), req.remote)) {
            Ok(()) => res.set_code(status::Code::Ok200),
            Err(e) => {
                error!("failed to append to {}; err={}", self.log.path().display(), e);
                res.set_code(status::Code::InternalServerError500);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Handler;
    use std::time::Duration;

    fn fixture() -> (tempfile::TempDir, IngestHandler, Arc<LogFile>, shutdown::Listener) {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(LogFile::create(dir.path().join("service.log")).unwrap());
        let (trigger, listener) = shutdown::channel();
        (dir, IngestHandler::new(log.clone(), trigger), log, listener)
    }

    fn call(handler: &IngestHandler, method: &str, body: &[u8]) -> status::Code {
        let req = request::Request {
            method: Some(method),
            path: Some("/"),
            version: Some(1),
            headers: &[],
            body,
            remote: "127.0.0.1:51234".parse().unwrap(),
        };
        let mut res = response::Response::new();
        handler.handle(req, &mut res);
        res.code().unwrap()
    }

    #[test]
    fn entry_joins_body_and_peer() {
        assert_eq!(log_entry("test", "10.0.0.7:9000".parse().unwrap()), "test 10.0.0.7:9000");
        assert_eq!(log_entry("v6", "[::1]:9000".parse().unwrap()), "v6 ::1:9000");
    }

    #[test]
    fn post_is_logged_with_peer_address() {
        let (_dir, handler, log, _listener) = fixture();

        assert_eq!(call(&handler, "POST", b"hello world"), status::Code::Ok200);
        assert_eq!(log.entries().unwrap(), vec!["hello world 127.0.0.1:51234".to_string()]);
    }

    #[test]
    fn empty_body_is_logged_verbatim() {
        let (_dir, handler, log, _listener) = fixture();

        assert_eq!(call(&handler, "POST", b""), status::Code::Ok200);
        assert_eq!(log.entries().unwrap(), vec![" 127.0.0.1:51234".to_string()]);
    }

    #[test]
    fn sentinel_signals_shutdown_without_logging() {
        let (_dir, handler, log, listener) = fixture();

        assert_eq!(call(&handler, "POST", b"STOP"), status::Code::Ok200);
        assert_eq!(listener.wait_timeout(Duration::from_secs(1)), Some(shutdown::Reason::StopRequested));
        assert!(log.entries().unwrap().is_empty());
    }

    #[test]
    fn sentinel_must_match_exactly() {
        let (_dir, handler, log, listener) = fixture();

        call(&handler, "POST", b"stop");
        call(&handler, "POST", b"STOP ");

        assert_eq!(listener.wait_timeout(Duration::from_millis(20)), None);
        assert_eq!(log.entries().unwrap().len(), 2);
    }

    #[test]
    fn failed_append_is_a_500_for_that_request_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.log");
        std::fs::write(&path, "").unwrap();
        let read_only = std::fs::File::open(&path).unwrap();
        let log = Arc::new(LogFile::from_file(path, read_only));
        let (trigger, listener) = shutdown::channel();
        let handler = IngestHandler::new(log.clone(), trigger);

        assert_eq!(call(&handler, "POST", b"lost"), status::Code::InternalServerError500);
        assert_eq!(call(&handler, "POST", b"also lost"), status::Code::InternalServerError500);
        assert!(log.entries().unwrap().is_empty());

        assert_eq!(call(&handler, "POST", b"STOP"), status::Code::Ok200);
        assert_eq!(listener.wait_timeout(Duration::from_secs(1)), Some(shutdown::Reason::StopRequested));
    }

    #[test]
    fn other_methods_are_not_allowed() {
        let (_dir, handler, log, _listener) = fixture();

        assert_eq!(call(&handler, "GET", b""), status::Code::MethodNotAllowed405);
        assert_eq!(call(&handler, "PUT", b"STOP"), status::Code::MethodNotAllowed405);
        assert!(log.entries().unwrap().is_empty());
    }
}
