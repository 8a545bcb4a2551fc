use crate::status;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

const INITIAL_BODY_SIZE: usize = 512;
const INITIAL_HEADER_COUNT: usize = 8;

// IMF-fixdate, e.g. "Sun, 06 Nov 1994 08:49:37 GMT"
const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

pub struct Response<'a> {
    code: Option<status::Code>,
    headers: Vec<httparse::Header<'a>>,
    body: Vec<u8>,
}

impl<'a> Response<'a> {
    pub fn new() -> Response<'a> {
        Response {
            code: None,
            headers: Vec::with_capacity(INITIAL_HEADER_COUNT),
            body: Vec::with_capacity(INITIAL_BODY_SIZE),
        }
    }

    pub fn bad_request(msg: Option<&str>) -> Response<'a> {
        Response::plain(status::Code::BadRequest400, msg)
    }

    pub fn not_implemented(msg: Option<&str>) -> Response<'a> {
        Response::plain(status::Code::NotImplemented501, msg)
    }

    fn plain(code: status::Code, msg: Option<&str>) -> Response<'a> {
        Response {
            code: Some(code),
            headers: vec![httparse::Header { name: "Content-Type", value: b"text/plain" }],
            body: msg.map_or(vec![], |m| m.as_bytes().to_vec()),
        }
    }

    pub fn code(&self) -> Option<status::Code> {
        self.code
    }

    pub fn set_code(&mut self, code: status::Code) {
        self.code = Some(code);
    }

    pub fn add_header(&mut self, name: &'a str, value: &'a [u8]) {
        self.headers.push(httparse::Header { name, value });
    }

    pub fn add_body(&mut self, body: &[u8]) {
        self.body.extend_from_slice(body);
    }

    /// Serializes the response onto `buf`. A response nobody set a code on goes out as a 500.
    pub fn finalize(&mut self, buf: &mut Vec<u8>) {
        let code = *self.code.get_or_insert(status::Code::InternalServerError500);

        buf.extend_from_slice(format!("HTTP/1.1 {}\r\n", code).as_bytes());
        if let Ok(date) = time::OffsetDateTime::now_utc().format(HTTP_DATE) {
            buf.extend_from_slice(format!("Date: {}\r\n", date).as_bytes());
        }
        buf.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());

        for header in self.headers.iter() {
            buf.extend_from_slice(header.name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(header.value);
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");

        buf.append(&mut self.body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(res: &mut Response) -> String {
        let mut buf = Vec::new();
        res.finalize(&mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn empty_ok_response_has_zero_length() {
        let mut res = Response::new();
        res.set_code(status::Code::Ok200);
        let out = render(&mut res);

        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("\r\nDate: "));
        assert!(out.contains("\r\nContent-Length: 0\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[test]
    fn unset_code_becomes_500() {
        let mut res = Response::new();
        let out = render(&mut res);

        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert_eq!(res.code(), Some(status::Code::InternalServerError500));
    }

    #[test]
    fn headers_and_body_are_written_in_order() {
        let mut res = Response::new();
        res.set_code(status::Code::MethodNotAllowed405);
        res.add_header("Allow", b"POST");
        res.add_body(b"nope");
        let out = render(&mut res);

        assert!(out.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(out.contains("\r\nContent-Length: 4\r\n"));
        assert!(out.ends_with("Allow: POST\r\n\r\nnope"));
    }

    #[test]
    fn bad_request_carries_message() {
        let mut res = Response::bad_request(Some("Incomplete request"));
        let out = render(&mut res);

        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(out.contains("Content-Type: text/plain\r\n"));
        assert!(out.ends_with("\r\n\r\nIncomplete request"));
    }
}
