//! Decodes one raw HTTP request read from stdin and prints what was found.
//!
//! ```text
//! printf 'POST /?a=1 HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 7\r\n\r\nb=2&c=3' \
//!     | cargo run --example form_inspector
//! ```
use form_gate::{
    limits::{MultipartConfig, RequestConfig},
    ForwardedCustomizer, Method, MultipartCompliance, Request,
};
use std::{io::Read, sync::Arc};

#[tokio::main]
async fn main() {
    let mut raw = Vec::new();
    std::io::stdin().read_to_end(&mut raw).unwrap();

    let split = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap_or(raw.len());
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let body = raw.get(split + 4..).unwrap_or(&[]).to_vec();

    let mut lines = head.split("\r\n");
    let mut line = lines.next().unwrap_or("GET / HTTP/1.1").split(' ');

    let mut config = RequestConfig {
        multipart_compliance: MultipartCompliance::Legacy,
        ..RequestConfig::default()
    };
    config.add_customizer(ForwardedCustomizer::default());

    let mut builder = Request::builder()
        .method(Method::from(line.next().unwrap_or("GET")))
        .target(line.next().unwrap_or("/"))
        .body_bytes(body)
        .config(Arc::new(config));

    for header in lines {
        if let Some((name, value)) = header.split_once(':') {
            builder = builder.header(name.trim(), value.trim());
        }
    }

    let mut request = builder.build();
    request.set_multipart_config(MultipartConfig::default());

    if let Err(err) = request.prepare() {
        println!("{}", err.to_json());
        return;
    }
    println!("url: {}", request.request_url());

    for cookie in request.cookies() {
        println!("cookie: {}={:?}", cookie.name(), cookie.value());
    }

    match request.parameters().await {
        Ok(params) => {
            for (name, values) in params.iter() {
                println!("param: {name} = {values:?}");
            }
        }
        Err(err) => println!("{}", err.to_json()),
    }

    if let Ok(parts) = request.parts().await {
        for part in parts {
            println!(
                "part: {} filename={:?} size={} spilled={}",
                part.name(),
                part.filename(),
                part.size(),
                part.path().is_some()
            );
        }
    }

    for violation in request.violations() {
        println!("violation: {violation}");
    }

    request.complete();
}
