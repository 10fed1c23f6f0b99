//! Multipart encoding checked against an independent multipart parser.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use horizon_lattice_api::{
    HttpMethod, MultipartEncoder, MultipartParameter, StdFilePrimitives, TransportRequest,
};

struct ParsedPart {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

async fn parse(content_type: &str, body: Vec<u8>) -> Vec<ParsedPart> {
    let boundary = multer::parse_boundary(content_type).expect("no boundary in content type");
    let stream = futures_util::stream::once(async move { Ok::<_, Infallible>(Bytes::from(body)) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut parts = Vec::new();
    while let Some(field) = multipart.next_field().await.expect("invalid multipart body") {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await.expect("unreadable part");
        parts.push(ParsedPart {
            name,
            file_name,
            content_type,
            data,
        });
    }
    parts
}

fn base_request() -> TransportRequest {
    TransportRequest::new(
        HttpMethod::Post,
        Url::parse("https://api.example.com/files").unwrap(),
    )
}

#[tokio::test]
async fn test_round_trip_preserves_parts_in_order() {
    let inputs = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();

    let report = inputs.path().join("report.csv");
    std::fs::write(&report, b"a,b\r\n1,2\r\n").unwrap();

    // Payloads that look like multipart syntax must survive untouched.
    let tricky = Bytes::from_static(b"--not-a-boundary\r\n\r\nContent-Type: x/y\r\n");
    let binary: Vec<u8> = (0u8..=255).collect();

    let parts = vec![
        MultipartParameter::bytes("title", "Quarterly", "title.txt", "text/plain"),
        MultipartParameter::file("report", &report).with_mime_type("text/csv"),
        MultipartParameter::bytes("tricky", tricky.clone(), "tricky.txt", "text/plain"),
        MultipartParameter::bytes("blob", binary.clone(), "blob.bin", "application/octet-stream"),
        MultipartParameter::bytes("empty", Bytes::new(), "empty.dat", "application/x-empty"),
    ];

    let encoder = MultipartEncoder::new(scratch.path(), Arc::new(StdFilePrimitives));
    let artifact = encoder.encode(&parts, base_request()).unwrap();

    let content_type = artifact
        .request
        .header("content-type")
        .unwrap()
        .to_string();
    let body = std::fs::read(artifact.temp_file.path()).unwrap();
    let parsed = parse(&content_type, body).await;

    assert_eq!(parsed.len(), parts.len());
    let expected: Vec<(&str, &str, &str, Bytes)> = vec![
        ("title", "title.txt", "text/plain", Bytes::from_static(b"Quarterly")),
        ("report", "report.csv", "text/csv", Bytes::from_static(b"a,b\r\n1,2\r\n")),
        ("tricky", "tricky.txt", "text/plain", tricky),
        ("blob", "blob.bin", "application/octet-stream", Bytes::from(binary)),
        ("empty", "empty.dat", "application/x-empty", Bytes::new()),
    ];

    for (part, (name, file_name, mime, data)) in parsed.iter().zip(expected) {
        assert_eq!(part.name, name);
        assert_eq!(part.file_name.as_deref(), Some(file_name));
        assert_eq!(part.content_type.as_deref(), Some(mime));
        assert_eq!(part.data, data, "payload of '{name}'");
    }

    artifact.temp_file.cleanup();
    assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_each_encoding_uses_fresh_boundary_and_file() {
    let scratch = tempfile::tempdir().unwrap();
    let encoder = MultipartEncoder::new(scratch.path(), Arc::new(StdFilePrimitives));
    let parts = [MultipartParameter::bytes("a", "x", "a.txt", "text/plain")];

    let first = encoder.encode(&parts, base_request()).unwrap();
    let second = encoder.encode(&parts, base_request()).unwrap();

    assert_ne!(first.temp_file.path(), second.temp_file.path());
    assert_ne!(
        first.request.header("content-type"),
        second.request.header("content-type")
    );
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 2);
}

#[tokio::test]
async fn test_file_part_defaults() {
    let part = MultipartParameter::file("doc", "/srv/data/notes.md");
    assert_eq!(part.file_name, "notes.md");
    assert_eq!(part.mime_type, "application/octet-stream");

    let part = part.with_file_name("renamed.md");
    assert_eq!(part.file_name, "renamed.md");
}

#[tokio::test]
async fn test_encoding_keeps_base_request_fields() {
    let scratch = tempfile::tempdir().unwrap();
    let encoder = MultipartEncoder::new(scratch.path(), Arc::new(StdFilePrimitives));

    let mut request = base_request();
    request.headers.insert(
        http::header::AUTHORIZATION,
        http::HeaderValue::from_static("Bearer t"),
    );
    request.body = Some(Bytes::from_static(b"ignored"));

    let artifact = encoder
        .encode(
            &[MultipartParameter::bytes("a", "x", "a.txt", "text/plain")],
            request,
        )
        .unwrap();

    assert_eq!(artifact.request.header("authorization"), Some("Bearer t"));
    assert!(artifact.request.body.is_none());
    assert_eq!(artifact.request.method, HttpMethod::Post);
}
