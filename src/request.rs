use std::net::SocketAddr;

pub struct Request<'a> {
    pub method: Option<&'a str>,
    pub path: Option<&'a str>,
    pub version: Option<u8>,
    pub headers: &'a [httparse::Header<'a>],
    pub body: &'a [u8],
    pub remote: SocketAddr,
}

impl<'a> Request<'a> {
    pub fn from_httparse<'h, 'b>(req: &'a httparse::Request<'h, 'b>, body: &'a [u8], remote: SocketAddr) -> Request<'a> {
        Request {
            method: req.method,
            path: req.path,
            version: req.version,
            headers: &*req.headers,
            body,
            remote,
        }
    }

    /// The body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> std::borrow::Cow<'a, str> {
        String::from_utf8_lossy(self.body)
    }
}

pub(crate) fn find_header<'a>(headers: &[httparse::Header<'a>], name: &str) -> Option<&'a [u8]> {
    headers.iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value)
}
