//! Minimal HTTP/1.1 front end for single-frame recognition.
//!
//! Each connection carries exactly one request and is closed after the response. Connections are
//! handed to a [`Worker`] pool, so the number of concurrently running pipelines is bounded by the
//! number of worker threads.
//!
//! Request handling itself ([`handle_request`]) does not touch the network and can be called
//! directly.

use std::{
    borrow::Cow,
    io::{self, prelude::*, BufReader},
    net::{SocketAddr, TcpListener, TcpStream},
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use anyhow::bail;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    image::Frame,
    pipeline::{GestureResult, Pipeline},
    worker::Worker,
};

/// Largest accepted request body.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// Largest accepted request line and headers, combined.
pub const MAX_HEADER_LEN: u64 = 16 * 1024;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// An HTTP response with a JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    body: Vec<u8>,
}

impl Response {
    fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_vec(body) {
            Ok(body) => Self { status, body },
            Err(e) => {
                log::error!("failed to serialize response: {}", e);
                Self {
                    status: 500,
                    body: br#"{"error":"Internal server error"}"#.to_vec(),
                }
            }
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(
            status,
            &ErrorBody {
                error: message.into(),
                field: None,
                reason: None,
            },
        )
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    fn reason_phrase(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            411 => "Length Required",
            413 => "Payload Too Large",
            431 => "Request Header Fields Too Large",
            _ => "Internal Server Error",
        }
    }

    fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        write!(
            w,
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason_phrase(),
            self.body.len(),
        )?;
        w.write_all(&self.body)?;
        w.flush()
    }
}

#[derive(Deserialize)]
struct RecognizeRequest {
    #[serde(default)]
    image: Option<String>,
}

#[derive(Serialize)]
struct RecognizedBody<'a> {
    gesture: &'a str,
    sinhala: &'a str,
    confidence: f32,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: Cow<'a, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

/// Routes a request to its handler.
pub fn handle_request(pipeline: &Pipeline, method: &str, path: &str, body: &[u8]) -> Response {
    let path = path.split_once('?').map_or(path, |(path, _)| path);
    match (method, path) {
        ("POST", "/api/recognize") => recognize(pipeline, body),
        ("GET", "/health") => Response::json(200, &HealthBody { status: "ok" }),
        (_, "/api/recognize" | "/health") => Response::error(405, "Method not allowed"),
        _ => Response::error(404, "Not found"),
    }
}

/// Handles a `POST /api/recognize` body.
pub fn recognize(pipeline: &Pipeline, body: &[u8]) -> Response {
    let request = match serde_json::from_slice::<RecognizeRequest>(body) {
        Ok(request) => request,
        Err(e) => return Response::error(400, &format!("Malformed JSON body: {e}")),
    };

    let frame = match decode_image(request.image.as_deref()) {
        Ok(frame) => frame,
        Err(e) => return error_response(&e),
    };

    match pipeline.recognize(&frame) {
        Ok(GestureResult::Recognized {
            label,
            confidence,
            text,
        }) => Response::json(
            200,
            &RecognizedBody {
                gesture: &label,
                sinhala: &text,
                confidence,
            },
        ),
        Ok(GestureResult::Rejected { reason }) => Response::json(
            400,
            &ErrorBody {
                error: "No valid gesture detected".into(),
                field: None,
                reason: Some(reason.as_str()),
            },
        ),
        Err(e) => error_response(&e),
    }
}

fn decode_image(image: Option<&str>) -> Result<Frame, Error> {
    let image = match image.map(str::trim) {
        Some(image) if !image.is_empty() => image,
        _ => return Err(Error::invalid_field("image", "Missing image data")),
    };

    // Strip `data:image/jpeg;base64,` prefixes sent by browsers.
    let image = match image.strip_prefix("data:") {
        Some(url) => match url.split_once(',') {
            Some((_, data)) => data,
            None => return Err(Error::invalid_field("image", "Malformed data URL")),
        },
        None => image,
    };

    let data = STANDARD
        .decode(image)
        .map_err(|e| Error::invalid_field("image", format!("Invalid base64 image data: {e}")))?;
    Frame::decode(&data)
        .map_err(|e| Error::invalid_field("image", format!("Could not decode image: {e}")))
}

fn error_response(error: &Error) -> Response {
    match error {
        Error::InvalidInput { field, message } => Response::json(
            400,
            &ErrorBody {
                error: message.as_str().into(),
                field: *field,
                reason: None,
            },
        ),
        _ => Response::error(500, &error.to_string()),
    }
}

/// An HTTP request as read from a connection.
#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

/// Reads one line of the request head into `line`.
///
/// Returns `false` if the line was cut off by the header size limit.
fn read_head_line<R: BufRead>(head: &mut io::Take<R>, line: &mut String) -> io::Result<bool> {
    line.clear();
    head.read_line(line)?;
    Ok(line.ends_with('\n') || head.limit() > 0)
}

/// Reads one request, returning an error response if it is unacceptable.
fn read_request<R: BufRead>(mut stream: R) -> anyhow::Result<Result<Request, Response>> {
    let too_large = || Ok(Err(Response::error(431, "Request header too large")));
    let mut head = (&mut stream).take(MAX_HEADER_LEN);

    let mut line = String::new();
    if !read_head_line(&mut head, &mut line)? {
        return too_large();
    }
    log::trace!("request: {}", line.trim());
    let mut parts = line.split_whitespace();
    let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        bail!("malformed HTTP request line: {}", line.trim());
    };
    if !version.starts_with("HTTP/1.") {
        bail!("unsupported HTTP version {}", version);
    }
    let (method, path) = (method.to_string(), path.to_string());

    let mut length = None;
    loop {
        if !read_head_line(&mut head, &mut line)? {
            return too_large();
        }
        if line.is_empty() {
            bail!("connection closed in request header");
        }
        if line == "\r\n" || line == "\n" {
            break;
        }
        log::trace!("request header: {}", line.trim());
        let Some((name, value)) = line.split_once(':') else {
            bail!("malformed HTTP header");
        };
        if name.eq_ignore_ascii_case("Content-Length") {
            length = Some(value.trim().parse::<usize>()?);
        }
    }

    let length = match (method.as_str(), length) {
        (_, Some(length)) => length,
        ("POST", None) => return Ok(Err(Response::error(411, "Content-Length required"))),
        (_, None) => 0,
    };
    if length > MAX_BODY_LEN {
        return Ok(Err(Response::error(413, "Request body too large")));
    }

    let mut body = vec![0; length];
    stream.read_exact(&mut body)?;
    Ok(Ok(Request { method, path, body }))
}

fn serve_connection(pipeline: &Pipeline, stream: &TcpStream) -> anyhow::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let response = match read_request(BufReader::new(stream))? {
        Ok(request) => handle_request(pipeline, &request.method, &request.path, &request.body),
        Err(response) => response,
    };
    response.write_to(stream)?;
    Ok(())
}

/// Serves one connection. A panic while handling the request is answered with a 500 response
/// and does not propagate, so the worker thread survives it.
fn handle_connection(pipeline: &Pipeline, stream: TcpStream, peer: SocketAddr) {
    match panic::catch_unwind(AssertUnwindSafe(|| serve_connection(pipeline, &stream))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("connection from {} failed: {}", peer, e),
        Err(_) => {
            log::error!("request from {} panicked", peer);
            if let Err(e) = Response::error(500, "Internal server error").write_to(&stream) {
                log::warn!("failed to respond to {}: {}", peer, e);
            }
        }
    }
}

/// Recognition server listening on a TCP socket.
pub struct Server {
    listener: TcpListener,
    pipeline: Pipeline,
    workers: usize,
}

impl Server {
    pub fn bind(addr: &str, pipeline: Pipeline, workers: usize) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            pipeline,
            workers,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever.
    pub fn run(self) -> anyhow::Result<()> {
        log::info!(
            "listening on http://{} with {} workers",
            self.local_addr()?,
            self.workers
        );

        let pipeline = self.pipeline;
        let worker = Worker::builder()
            .name("http")
            .threads(self.workers)
            .capacity(self.workers)
            .spawn(move |(stream, peer): (TcpStream, SocketAddr)| {
                handle_connection(&pipeline, stream, peer)
            })?;

        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("failed to accept connection: {}", e);
                    continue;
                }
            };
            // The client may already have reset the connection.
            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    log::warn!("dropping connection without peer address: {}", e);
                    continue;
                }
            };
            if worker.send((stream, peer)).is_err() {
                bail!("all HTTP workers have exited");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request() {
        let raw = b"POST /api/recognize HTTP/1.1\r\nHost: x\r\ncontent-length: 4\r\n\r\nbodyEXTRA";
        let request = read_request(&raw[..]).unwrap().unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/api/recognize");
        assert_eq!(request.body, b"body");
    }

    #[test]
    fn post_requires_length() {
        let raw = b"POST /api/recognize HTTP/1.1\r\n\r\n";
        let response = read_request(&raw[..]).unwrap().unwrap_err();
        assert_eq!(response.status(), 411);
    }

    #[test]
    fn body_too_large() {
        let raw = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", MAX_BODY_LEN + 1);
        let response = read_request(raw.as_bytes()).unwrap().unwrap_err();
        assert_eq!(response.status(), 413);
    }

    #[test]
    fn header_too_large() {
        // An endless request line.
        let response = read_request(BufReader::new(io::repeat(b'a'))).unwrap().unwrap_err();
        assert_eq!(response.status(), 431);

        let mut raw = b"GET / HTTP/1.1\r\nX-Padding: ".to_vec();
        raw.resize(MAX_HEADER_LEN as usize + 10, b'x');
        raw.extend_from_slice(b"\r\n\r\n");
        let response = read_request(&raw[..]).unwrap().unwrap_err();
        assert_eq!(response.status(), 431);

        // Just below the limit is fine.
        let mut raw = b"GET / HTTP/1.1\r\nX-Padding: ".to_vec();
        raw.resize(MAX_HEADER_LEN as usize - 4, b'x');
        raw.extend_from_slice(b"\r\n\r\n");
        assert!(read_request(&raw[..]).unwrap().is_ok());
    }

    #[test]
    fn truncated_header() {
        assert!(read_request(&b"GET / HTTP/1.1\r\nHost: x\r\n"[..]).is_err());
    }

    #[test]
    fn garbage_request() {
        assert!(read_request(&b"hello\r\n\r\n"[..]).is_err());
        assert!(read_request(&b"GET / SMTP\r\n\r\n"[..]).is_err());
        assert!(read_request(&b"GET / HTTP/1.1\r\nbroken\r\n\r\n"[..]).is_err());
    }

    #[test]
    fn decode_errors_name_the_field() {
        for image in [None, Some(""), Some("   "), Some("data:image/png"), Some("!!!")] {
            match decode_image(image) {
                Err(Error::InvalidInput { field, .. }) => assert_eq!(field, Some("image")),
                other => panic!("unexpected result for {:?}: {:?}", image, other),
            }
        }
        // Valid base64, but not an image.
        let b64 = STANDARD.encode(b"not an image");
        assert!(decode_image(Some(&b64)).unwrap_err().is_client_error());
    }

    #[test]
    fn decodes_data_url() {
        let jpeg = Frame::new(8, 4).encode_jpeg(90).unwrap();
        let url = format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg));
        let frame = decode_image(Some(&url)).unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 4));
    }

    #[test]
    fn writes_response() {
        let mut out = Vec::new();
        Response::error(404, "Not found").write_to(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"), "{out}");
        assert!(out.ends_with("\r\n\r\n{\"error\":\"Not found\"}"), "{out}");
    }
}
