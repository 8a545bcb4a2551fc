#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Ok200,
    BadRequest400,
    MethodNotAllowed405,
    InternalServerError500,
    NotImplemented501,
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Code::Ok200 => write!(f, "200 OK"),
            Code::BadRequest400 => write!(f, "400 Bad Request"),
            Code::MethodNotAllowed405 => write!(f, "405 Method Not Allowed"),
            Code::InternalServerError500 => write!(f, "500 Internal Server Error"),
            Code::NotImplemented501 => write!(f, "501 Not Implemented"),
        }
    }
}
