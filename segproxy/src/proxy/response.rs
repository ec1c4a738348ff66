pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// Responses the proxy answers with itself, always closing the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    BadRequest(String),
    Forbidden(String),
    BadGateway(String),
}

impl Response {
    pub fn status(&self) -> u16 {
        match self {
            Response::BadRequest(_) => 400,
            Response::Forbidden(_) => 403,
            Response::BadGateway(_) => 502,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Response::BadRequest(_) => "Bad Request",
            Response::Forbidden(_) => "Forbidden",
            Response::BadGateway(_) => "Bad Gateway",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Response::BadRequest(m) | Response::Forbidden(m) | Response::BadGateway(m) => m,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body = format!("{}\n", self.message());
        format!(
            "HTTP/1.1 {} {}\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            Content-Length: {}\r\n\
            Connection: close\r\n\r\n{}",
            self.status(),
            self.reason(),
            body.len(),
            body
        )
        .into_bytes()
    }
}

#[test]
fn test_response_bytes() {
    let resp = Response::Forbidden("Blocked by deny rule: .ads.com".to_string());
    assert_eq!(resp.status(), 403);
    assert_eq!(
        String::from_utf8(resp.to_bytes()).unwrap(),
        "HTTP/1.1 403 Forbidden\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: 31\r\n\
         Connection: close\r\n\r\n\
         Blocked by deny rule: .ads.com\n"
    );
    assert!(Response::BadGateway("x".into())
        .to_bytes()
        .starts_with(b"HTTP/1.1 502 Bad Gateway\r\n"));
}
