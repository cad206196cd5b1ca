use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;

#[derive(Debug)]
pub(crate) struct CapturedRequest {
    pub request_line: String,
    pub body: String,
}

/// Answers exactly one HTTP request with `status` and a JSON `body`, and hands
/// the request it saw back through the receiver.
pub(crate) fn serve_once(status: u16, body: &str) -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
    let addr = listener.local_addr().expect("test listener address");
    let body = body.to_string();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).is_err() {
            return;
        }

        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            let header = line.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut request_body = vec![0u8; content_length];
        if reader.read_exact(&mut request_body).is_err() {
            return;
        }
        let _ = tx.send(CapturedRequest {
            request_line: request_line.trim_end().to_string(),
            body: String::from_utf8_lossy(&request_body).to_string(),
        });

        let reason = if status < 400 { "OK" } else { "Error" };
        let response = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let mut writer = &stream;
        let _ = writer.write_all(response.as_bytes());
        let _ = writer.flush();
    });

    (format!("http://{addr}"), rx)
}

/// A base URL nothing is listening on.
pub(crate) fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    let addr = listener.local_addr().expect("probe listener address");
    drop(listener);
    format!("http://{addr}")
}
