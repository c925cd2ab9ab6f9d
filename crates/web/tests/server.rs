use std::net::SocketAddr;
use std::time::Duration;

use indoc::indoc;
use strand_http::connection::ConnectionConfig;
use strand_web::{Server, cgi};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

async fn spawn_server(config: ConnectionConfig) -> SocketAddr {
    let server = Server::builder().address("127.0.0.1:0").router(cgi::routes().unwrap()).config(config).build().unwrap();
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    addr
}

async fn read_all(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    timeout(IO_TIMEOUT, stream.read_to_end(&mut buf)).await.unwrap().unwrap();
    String::from_utf8(buf).unwrap()
}

async fn exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    read_all(&mut stream).await
}

/// Reads up to and including the blank line ending a response head.
async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let byte = timeout(IO_TIMEOUT, stream.read_u8()).await.unwrap().unwrap();
        head.push(byte);
    }
    String::from_utf8(head).unwrap()
}

fn split_response(response: &str) -> (&str, &str) {
    response.split_once("\r\n\r\n").unwrap()
}

/// Joins the chunks of a chunked body.
fn dechunk(mut body: &str) -> String {
    let mut out = String::new();
    loop {
        let (size, rest) = body.split_once("\r\n").unwrap();
        let size = usize::from_str_radix(size, 16).unwrap();
        if size == 0 {
            return out;
        }
        out.push_str(&rest[..size]);
        body = &rest[size + 2..];
    }
}

fn masked_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    const MASK: [u8; 4] = [0x12, 0x34, 0x56, 0x78];
    assert!(payload.len() < 126);
    let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&MASK);
    frame.extend(payload.iter().enumerate().map(|(i, byte)| byte ^ MASK[i % 4]));
    frame
}

async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    timeout(IO_TIMEOUT, stream.read_exact(&mut head)).await.unwrap().unwrap();
    assert_eq!(head[1] & 0x80, 0, "server frames are never masked");
    let mut payload = vec![0u8; usize::from(head[1] & 0x7f)];
    timeout(IO_TIMEOUT, stream.read_exact(&mut payload)).await.unwrap().unwrap();
    (head[0], payload)
}

async fn open_websocket(addr: SocketAddr, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let head = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 101 "), "{head}");
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"), "{head}");
    stream
}

#[tokio::test]
async fn simple_has_content_length() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let response = exchange(addr, b"GET /simple HTTP/1.1\r\nHost: localhost\r\n\r\n").await;

    let (head, body) = split_response(&response);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Length: 36"));
    assert!(head.contains("Connection: close"));
    assert_eq!(body, "This is a response from 'cgi_simple'");
}

#[tokio::test]
async fn wildcard_serves_simple() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let response = exchange(addr, b"GET /wildcard/any/thing HTTP/1.1\r\n\r\n").await;

    let (head, body) = split_response(&response);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, "This is a response from 'cgi_simple'");
}

#[tokio::test]
async fn stream_is_chunked() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let response = exchange(addr, b"GET /stream HTTP/1.1\r\n\r\n").await;

    let (head, body) = split_response(&response);
    assert!(head.contains("Transfer-Encoding: chunked"));
    assert!(!head.contains("Content-Length"));
    assert_eq!(body, "24\r\nThis is a response from 'cgi_stream'\r\n0\r\n\r\n");
}

#[tokio::test]
async fn query_lists_decoded_parameters() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let response = exchange(addr, b"GET /query?a=\"1+2%203%2B4%20%35b%3DX\"&flag&c=d HTTP/1.1\r\n\r\n").await;

    let (_, body) = split_response(&response);
    let expected = indoc! {"
        This is a response from 'cgi_query'\r
        The parameters were:\r
        a = \"1 2 3+4 5b=X\"\r
        flag\r
        c = d\r
    "};
    assert_eq!(dechunk(body), expected);
}

#[tokio::test]
async fn query_with_double_question_mark_lists_nothing() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let response = exchange(addr, b"GET /query??a=1 HTTP/1.1\r\n\r\n").await;

    let (head, body) = split_response(&response);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    let body = dechunk(body);
    assert!(body.contains("'cgi_query'"));
    assert!(!body.contains('='), "{body}");
}

#[tokio::test]
async fn post_echoes_chunked_body() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let response =
        exchange(addr, b"POST /post HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\n").await;

    let (head, body) = split_response(&response);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(dechunk(body), "This is a response from 'cgi_post'\r\nYou posted: \"hello world\"\r\n");
}

#[tokio::test]
async fn post_tolerates_malformed_chunk_delimiters() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let response = exchange(
        addr,
        b"POST /post HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n14X\rY\ntesttesttesttesttestZ\rW\nX\rY\nZ\rW\nS",
    )
    .await;

    let (_, body) = split_response(&response);
    assert_eq!(dechunk(body), "This is a response from 'cgi_post'\r\nYou posted: \"testtesttesttesttest\"\r\n");
}

#[tokio::test]
async fn post_with_content_length() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let response = exchange(addr, b"POST /post HTTP/1.1\r\nContent-Length: 4\r\n\r\ndata").await;

    let (_, body) = split_response(&response);
    assert_eq!(dechunk(body), "This is a response from 'cgi_post'\r\nYou posted: \"data\"\r\n");
}

#[tokio::test]
async fn stalled_body_times_out() {
    let addr = spawn_server(ConnectionConfig::default().with_body_read_timeout(Duration::from_millis(20))).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"POST /post HTTP/1.1\r\nContent-Length: 100\r\n\r\npartial").await.unwrap();

    let head = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    let body = read_all(&mut stream).await;
    assert_eq!(dechunk(&body), "This is a response from 'cgi_post'\r\nYou posted: \"partial\"\r\n");
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let response = exchange(addr, b"GET /missing HTTP/1.1\r\n\r\n").await;

    let (head, body) = split_response(&response);
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(body, "Not found\r\n");
}

#[tokio::test]
async fn wrong_method_is_not_allowed() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let response = exchange(addr, b"POST /simple HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let addr = spawn_server(ConnectionConfig::default()).await;

    for version in ["HTTP/1.0", "HTTP/1.10", "HTTP/1.1x", "HTTP/1.12"] {
        let request = format!("GET /simple {version}\r\n\r\n");
        let response = exchange(addr, request.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 505 "), "{version}: {response}");
    }

    let response = exchange(addr, b"GET /simple HTTP/1.1 \r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");

    let response = exchange(addr, b"POST /post HTTP/1.1\r\nContent-Length: 12a\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
}

#[tokio::test]
async fn long_uri_is_rejected() {
    let addr = spawn_server(ConnectionConfig::default()).await;

    let request = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(1100));
    let response = exchange(addr, request.as_bytes()).await;
    assert!(response.starts_with("HTTP/1.1 414 URI Too Long\r\n"), "{response}");

    let request = format!("GET /query?q={} HTTP/1.1\r\n\r\n", "b".repeat(1100));
    let response = exchange(addr, request.as_bytes()).await;
    assert!(response.starts_with("HTTP/1.1 414 URI Too Long\r\n"), "{response}");
}

#[tokio::test]
async fn early_close_does_not_affect_listener() {
    let addr = spawn_server(ConnectionConfig::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET /sim").await.unwrap();
    drop(stream);

    let response = exchange(addr, b"GET /simple HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[tokio::test]
async fn interleaved_partial_requests() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let mut first = TcpStream::connect(addr).await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();

    first.write_all(b"GET /sim").await.unwrap();
    second.write_all(b"GET /str").await.unwrap();
    first.write_all(b"ple HTTP/1.1\r\n").await.unwrap();
    second.write_all(b"eam HTTP/1.1\r\n").await.unwrap();
    second.write_all(b"\r\n").await.unwrap();
    first.write_all(b"\r\n").await.unwrap();

    let response = read_all(&mut first).await;
    assert_eq!(split_response(&response).1, "This is a response from 'cgi_simple'");
    let response = read_all(&mut second).await;
    assert_eq!(dechunk(split_response(&response).1), "This is a response from 'cgi_stream'");
}

#[tokio::test]
async fn websocket_required_for_ws_routes() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let response = exchange(addr, b"GET /ws-echo HTTP/1.1\r\n\r\n").await;

    let (head, body) = split_response(&response);
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert_eq!(body, "WebSocket upgrade required\r\n");
}

#[tokio::test]
async fn websocket_echo() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let mut stream = open_websocket(addr, "/ws-echo").await;

    stream.write_all(&masked_frame(0x1, b"hello")).await.unwrap();
    assert_eq!(read_frame(&mut stream).await, (0x81, b"hello".to_vec()));

    stream.write_all(&masked_frame(0x9, b"ping")).await.unwrap();
    assert_eq!(read_frame(&mut stream).await, (0x8A, b"ping".to_vec()));

    stream.write_all(&masked_frame(0x8, &1000u16.to_be_bytes())).await.unwrap();
    assert_eq!(read_frame(&mut stream).await, (0x88, vec![0x03, 0xE8]));

    let rest = read_all(&mut stream).await;
    assert!(rest.is_empty());
}

#[tokio::test]
async fn websocket_relay_forwards_in_to_out() {
    let addr = spawn_server(ConnectionConfig::default()).await;
    let mut outbound = open_websocket(addr, "/ws-out").await;
    let mut inbound = open_websocket(addr, "/ws-in").await;

    inbound.write_all(&masked_frame(0x1, b"relayed")).await.unwrap();
    assert_eq!(read_frame(&mut outbound).await, (0x81, b"relayed".to_vec()));

    inbound.write_all(&masked_frame(0x2, &[1, 2, 3])).await.unwrap();
    assert_eq!(read_frame(&mut outbound).await, (0x82, vec![1, 2, 3]));

    // the in side never gets its own frames back
    let mut byte = [0u8; 1];
    assert!(timeout(Duration::from_millis(100), inbound.read(&mut byte)).await.is_err());
}
