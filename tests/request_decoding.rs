use form_gate::{
    limits::{FormLimits, MultipartConfig, RequestConfig},
    BodyState, ContentType, Error, ForwardedCustomizer, Method, Request, RequestBuilder,
};
use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::io::AsyncReadExt;

fn form(target: &str, body: &str) -> RequestBuilder {
    Request::builder()
        .method(Method::Post)
        .target(target)
        .header("Host", "localhost")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Content-Length", body.len().to_string())
        .body_bytes(body.to_string())
}

fn multipart(body: &str) -> RequestBuilder {
    Request::builder()
        .method(Method::Post)
        .target("/upload")
        .header("Content-Type", "multipart/form-data; boundary=AaB03x")
        .header("Content-Length", body.len().to_string())
        .body_bytes(body.to_string())
}

const UPLOAD: &str = concat!(
    "--AaB03x\r\n",
    "content-disposition: form-data; name=\"field1\"\r\n",
    "\r\n",
    "Joe Blow\r\n",
    "--AaB03x\r\n",
    "content-disposition: form-data; name=\"stuff\"; filename=\"foo.upload\"\r\n",
    "Content-Type: text/plain;charset=ISO-8859-1\r\n",
    "\r\n",
    "000000000000000000000000000000000000000000000000000\r\n",
    "--AaB03x--\r\n",
);

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[test]
fn reserved_cookie_names_dropped() {
    let mut request = Request::builder()
        .header("Cookie", "Path=value")
        .header("Cookie", "name=value")
        .build();

    let cookies = request.cookies();
    assert_eq!(cookies.len(), 1);
    assert_eq!((cookies[0].name(), cookies[0].value()), ("name", "value"));
}

#[test]
fn quoted_cookie_taken_literally() {
    let mut request = Request::builder()
        .header("Cookie", "other=\"quoted=;value\"")
        .build();

    let cookies = request.cookies();
    assert_eq!(cookies.len(), 1);
    assert_eq!((cookies[0].name(), cookies[0].value()), ("other", "quoted=;value"));
}

#[tokio::test]
async fn malformed_query_keeps_raw_query() {
    let mut request = Request::builder()
        .target("/?param=aaa%ZZbbb&other=value")
        .build();

    let err = request.parameters().await.unwrap_err();
    assert!(err.is_client_error());
    assert_eq!(err.code(), "MALFORMED_ENCODING");
    assert_eq!(request.query_string(), Some("param=aaa%ZZbbb&other=value"));
}

#[tokio::test]
async fn parameters_are_idempotent() {
    let mut request = form("/?a=1", "a=2&b=3").build();

    let first = request.parameters().await.unwrap().clone();
    let second = request.parameters().await.unwrap().clone();

    assert_eq!(first, second);
    assert_eq!(first.get_all("a"), ["1", "2"]);
    assert_eq!(request.body_state(), BodyState::Decoded);
}

#[tokio::test]
async fn stream_and_parameters_exclude_each_other() {
    // Stream first: only query parameters remain
    let mut request = form("/?a=1", "a=2&b=3").build();
    let mut body = String::new();
    request.body_reader().read_to_string(&mut body).await.unwrap();

    assert_eq!(body, "a=2&b=3");
    let params = request.parameters().await.unwrap();
    assert_eq!(params.get_all("a"), ["1"]);
    assert!(!params.contains("b"));

    // Parameters first: the stream is exhausted
    let mut request = form("/?a=1", "a=2&b=3").build();
    assert_eq!(request.parameters().await.unwrap().get("b"), Some("3"));
    assert!(request.read_body_to_end().await.unwrap().is_empty());
}

#[tokio::test]
async fn one_temp_file_until_completion() {
    let dir = tempfile::tempdir().unwrap();
    let mut request = multipart(UPLOAD).build();
    request.set_multipart_config(MultipartConfig {
        file_size_threshold: 16,
        ..MultipartConfig::new(dir.path())
    });

    assert_eq!(request.parameter("field1").await.unwrap(), Some("Joe Blow"));
    assert_eq!(files_in(dir.path()), 1);

    request.complete();
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn temp_files_released_after_failure() {
    let dir = tempfile::tempdir().unwrap();

    // Declared length covers the whole body, the stream stops mid-file
    let truncated = &UPLOAD[..UPLOAD.len() - 20];
    let mut request = Request::builder()
        .method(Method::Post)
        .header("Content-Type", "multipart/form-data; boundary=AaB03x")
        .header("Content-Length", UPLOAD.len().to_string())
        .body_bytes(truncated.to_string())
        .build();
    request.set_multipart_config(MultipartConfig {
        file_size_threshold: 16,
        ..MultipartConfig::new(dir.path())
    });

    let err = request.parts().await.unwrap_err();
    assert_eq!(err.code(), "REQUEST_ABORTED");
    assert_eq!(request.parts().await.unwrap_err(), err);
    assert_eq!(files_in(dir.path()), 1);

    request.complete();
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn key_quota_bounds_decode_time() {
    let body = (0..2000).map(|i| format!("key{i}=value")).collect::<Vec<_>>().join("&");
    let config = RequestConfig {
        form: FormLimits {
            max_form_keys: 1000,
            max_form_content_size: -1,
        },
        ..RequestConfig::default()
    };
    let mut request = form("/", &body).config(Arc::new(config)).build();

    let start = Instant::now();
    let err = request.parameters().await.unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(err.is_client_error());
    assert_eq!(err.code(), "QUOTA_EXCEEDED");
}

#[test]
fn content_type_charset() {
    let request = Request::builder()
        .header("Content-Type", "text/html; charset=\"utf8\"")
        .build();

    let content_type = request.content_type().unwrap();
    assert_eq!(content_type.raw(), "text/html; charset=\"utf8\"");
    assert_eq!(content_type.mime_type(), "text/html");
    assert_eq!(request.character_encoding(), Some("utf-8"));

    assert_eq!(ContentType::parse("text/html").charset(), None);
    assert_eq!(Request::builder().build().character_encoding(), None);
}

#[tokio::test]
async fn forwarded_request_end_to_end() {
    let mut config = RequestConfig::default();
    config.add_customizer(ForwardedCustomizer::default());

    let mut request = form("/submit?x=1", "y=2")
        .header("X-Forwarded-Proto", "https")
        .header("X-Forwarded-Host", "example.com")
        .header("X-Forwarded-For", "203.0.113.9")
        .config(Arc::new(config))
        .build();

    request.prepare().unwrap();
    request.prepare().unwrap();

    assert!(request.is_secure());
    assert_eq!(request.request_url(), "https://example.com/submit");
    assert_eq!(request.remote_addr().map(|r| r.host()), Some("203.0.113.9"));
    assert_eq!(request.parameters().await.unwrap().len(), 2);
}

#[tokio::test]
async fn multipart_without_config() {
    let mut request = multipart(UPLOAD).build();

    assert_eq!(request.parts().await.unwrap_err(), Error::MultipartNotConfigured);
    assert!(request.parameters().await.unwrap().is_empty());

    // The body was left alone
    assert_eq!(request.read_body_to_end().await.unwrap().len(), UPLOAD.len());
}
