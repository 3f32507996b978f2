//! IP webcam client for servers offering HTTP MJPEG streams.

use std::{
    io::{self, prelude::*, BufRead, BufReader},
    net::{SocketAddr, TcpStream},
};

use anyhow::bail;

use crate::{image::Frame, timer::Timer};

use super::FrameSource;

pub struct HttpStream<R = BufReader<TcpStream>> {
    stream: R,
    boundary: String,
    t_decode: Timer,
}

impl HttpStream {
    /// Connects to an MJPEG server and requests the stream at `path` (for example `/video`).
    pub fn connect(addr: SocketAddr, path: &str) -> anyhow::Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        write!(
            stream,
            "GET {} HTTP/1.1\r\nHost: {}\r\n\r\n",
            path,
            addr.ip()
        )?;
        Self::from_reader(BufReader::new(stream))
    }
}

impl<R: BufRead> HttpStream<R> {
    /// Reads the HTTP response header from `stream` and positions it at the first frame.
    pub fn from_reader(mut stream: R) -> anyhow::Result<Self> {
        let mut line = String::new();
        stream.read_line(&mut line)?;
        log::trace!("response: {}", line.trim());
        if !line.starts_with("HTTP/1.1 200") && !line.starts_with("HTTP/1.0 200") {
            bail!("received unexpected response: {}", line.trim());
        }

        let mut boundary = None;
        loop {
            line.clear();
            if stream.read_line(&mut line)? == 0 || line.trim().is_empty() {
                break;
            }
            log::trace!("response header: {}", line.trim());
            let Some((name, value)) = line.split_once(':') else {
                bail!("malformed HTTP response");
            };
            if name.eq_ignore_ascii_case("Content-Type") {
                boundary = Some(parse_boundary(value)?);
            }
        }
        let Some(boundary) = boundary else {
            bail!("missing `Content-Type` header");
        };

        let mut this = Self {
            stream,
            boundary,
            t_decode: Timer::new("decode"),
        };
        this.read_until_boundary()?;
        Ok(this)
    }

    /// Reads the next frame, returning [`None`] when the server closes the stream.
    pub fn read(&mut self) -> anyhow::Result<Option<Frame>> {
        let mut length = None;
        let mut line = String::new();
        loop {
            line.clear();
            if self.stream.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                break;
            }
            log::trace!("multipart header: {}", line.trim());
            let Some((key, value)) = line.split_once(':') else {
                bail!("malformed multipart header");
            };
            if key.eq_ignore_ascii_case("Content-Type") && value.trim() != "image/jpeg" {
                bail!(
                    "unexpected Content-Type: expected image/jpeg, got {}",
                    value.trim()
                );
            }
            if key.eq_ignore_ascii_case("Content-Length") {
                length = Some(value.trim().parse::<usize>()?);
            }
        }

        let Some(length) = length else {
            bail!("missing Content-Length header");
        };
        let mut buf = vec![0; length];
        self.stream.read_exact(&mut buf)?;
        self.read_until_boundary()?;

        self.t_decode.time(|| Frame::decode_jpeg(&buf)).map(Some)
    }

    pub fn timer(&self) -> &Timer {
        &self.t_decode
    }

    fn read_until_boundary(&mut self) -> io::Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.stream.read_line(&mut line)? == 0 || line.trim() == self.boundary {
                return Ok(());
            }
        }
    }
}

fn parse_boundary(content_type: &str) -> anyhow::Result<String> {
    let Some((mime, params)) = content_type.trim().split_once(';') else {
        bail!("malformed Content-Type header");
    };
    if mime.trim() != "multipart/x-mixed-replace" {
        bail!("malformed Content-Type header: unexpected mime type {mime}");
    }
    let Some(bnd) = params.trim().strip_prefix("boundary=") else {
        bail!("malformed Content-Type header (missing boundary)");
    };
    // Some servers include the leading `--` in the boundary parameter.
    let bnd = bnd.trim_matches('"');
    Ok(if bnd.starts_with("--") {
        bnd.to_string()
    } else {
        format!("--{bnd}")
    })
}

impl<R: BufRead> FrameSource for HttpStream<R> {
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(jpeg: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            jpeg.len()
        )
        .into_bytes();
        out.extend_from_slice(jpeg);
        out.extend_from_slice(b"\r\n--frame\r\n");
        out
    }

    #[test]
    fn boundary() {
        assert_eq!(
            parse_boundary(" multipart/x-mixed-replace; boundary=frame").unwrap(),
            "--frame"
        );
        assert_eq!(
            parse_boundary("multipart/x-mixed-replace;boundary=--frame").unwrap(),
            "--frame"
        );
        assert!(parse_boundary("image/jpeg").is_err());
    }

    #[test]
    fn reads_frames_until_eof() {
        let jpeg = Frame::new(4, 2).encode_jpeg(90).unwrap();
        let mut data = b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n--frame\r\n".to_vec();
        data.extend(part(&jpeg));
        data.extend(part(&jpeg));

        let mut stream = HttpStream::from_reader(&data[..]).unwrap();
        for _ in 0..2 {
            let frame = stream.next_frame().unwrap().unwrap();
            assert_eq!((frame.width(), frame.height()), (4, 2));
        }
        assert!(stream.next_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_error_status() {
        assert!(HttpStream::from_reader(&b"HTTP/1.1 404 Not Found\r\n\r\n"[..]).is_err());
    }
}
