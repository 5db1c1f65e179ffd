//! Archive builders and fetch doubles shared by the model tests.

use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    path::Path,
    sync::Mutex,
    thread,
};

use url::Url;
use zip::write::{FileOptions, ZipWriter};

use super::{CancelToken, FetchError, Fetcher};

pub struct ZipItem {
    name: String,
    contents: Option<Vec<u8>>,
}

impl ZipItem {
    pub fn file(name: &str, contents: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            contents: Some(contents),
        }
    }

    pub fn dir(name: &str) -> Self {
        Self {
            name: name.to_string(),
            contents: None,
        }
    }
}

pub fn write_zip(path: &Path, items: &[ZipItem]) {
    let file = File::create(path).unwrap();
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default();
    for item in items {
        match &item.contents {
            Some(contents) => {
                writer.start_file(item.name.as_str(), options).unwrap();
                writer.write_all(contents).unwrap();
            }
            None => writer.add_directory(item.name.as_str(), options).unwrap(),
        }
    }
    writer.finish().unwrap();
}

pub fn zip_bytes(items: &[ZipItem]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.zip");
    write_zip(&path, items);
    std::fs::read(path).unwrap()
}

/// Serves a fixed body for every url and remembers what was requested.
pub struct RecordingFetcher {
    body: Option<Vec<u8>>,
    pub requested: Mutex<Vec<String>>,
}

impl RecordingFetcher {
    pub fn serving(body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            body: None,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl Fetcher for RecordingFetcher {
    fn fetch(
        &self,
        url: &Url,
        dest: &mut dyn Write,
        _cancel: &CancelToken,
    ) -> Result<u64, FetchError> {
        self.requested.lock().unwrap().push(url.to_string());
        match &self.body {
            Some(body) => {
                dest.write_all(body)?;
                Ok(body.len() as u64)
            }
            None => Err(FetchError::Status(404)),
        }
    }
}

/// Accepts one connection on a loopback port and lets `handler` write the
/// response. Returns the url of `path` on that server.
pub fn serve_once<H>(path: &str, handler: H) -> String
where
    H: FnOnce(&mut TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            skip_request(&stream);
            handler(&mut stream);
        }
    });
    format!("http://{address}{path}")
}

fn skip_request(stream: &TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    while reader.read_line(&mut line).map(|read| read > 0).unwrap_or(false) {
        if line == "\r\n" {
            break;
        }
        line.clear();
    }
}

pub fn respond(stream: &mut TcpStream, status: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}

pub fn start_chunked(stream: &mut TcpStream) {
    let _ = stream.write_all(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
    );
}

pub fn write_chunk(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(format!("{:x}\r\n", data.len()).as_bytes());
    let _ = stream.write_all(data);
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

pub fn finish_chunked(stream: &mut TcpStream) {
    let _ = stream.write_all(b"0\r\n\r\n");
}
