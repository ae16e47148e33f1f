#![cfg(unix)]

use std::fs::{self, File};
use std::io::Write;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use apk_schleuder::http::HttpClient;
use apk_schleuder::source::build_source;
use apk_schleuder::{PackageSource, Settings, SourceError, Version};
use serde_json::json;
use tempfile::{TempDir, tempdir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const SHA256: &str =
    "29:F3:4E:5F:27:F2:11:B4:24:BC:5B:F9:D6:71:62:C0:EA:FB:A2:DA:35:AF:35:C1:64:16:FC:44:62:76:BA:26";
const SHA1: &str = "45:98:9D:C9:AD:87:28:C2:AA:9A:82:FA:55:50:3E:34:A8:87:93:74";

const PAGE: &str = r#"<html><body>
<h1>Demo for Android</h1>
<p>Latest release: <span class="version">v1.2.0</span></p>
<a href="app.apk">Download</a>
</body></html>"#;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn signed_apk() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    writer.start_file("classes.dex", options).expect("entry");
    writer.write_all(b"dex\n035").expect("write");
    writer.start_file("META-INF/DEMO.RSA", options).expect("entry");
    writer.write_all(b"pkcs7").expect("write");
    writer.finish().expect("finish").into_inner()
}

/// Answer every request with the download page or the package, then close.
async fn serve(apk: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let apk = Arc::new(apk);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(respond(stream, apk.clone()));
        }
    });
    addr
}

async fn respond(mut stream: TcpStream, apk: Arc<Vec<u8>>) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let request = String::from_utf8_lossy(&request);
    let path = request.split_whitespace().nth(1).unwrap_or("/");
    let (status, content_type, body) = match path {
        "/" => ("200 OK", "text/html", PAGE.as_bytes().to_vec()),
        "/app.apk" => ("200 OK", "application/vnd.android.package-archive", apk.to_vec()),
        _ => ("404 Not Found", "text/plain", b"not found".to_vec()),
    };
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(&body).await;
    let _ = stream.shutdown().await;
}

fn settings(dir: &TempDir, jarsigner: &str) -> Settings {
    let tools = dir.path().join("bin");
    fs::create_dir_all(&tools).expect("tools dir");
    let mut settings = Settings::new(dir.path().join("repo"));
    settings.keytool = script(
        &tools,
        "keytool",
        &format!(
            "[ \"$1\" = \"-printcert\" ] || exit 2\n\
             echo 'Certificate fingerprints:'\n\
             echo '\t SHA1: {SHA1}'\n\
             echo '\t SHA256: {SHA256}'"
        ),
    );
    settings.jarsigner = script(&tools, "jarsigner", jarsigner);
    settings.max_retries = 0;
    settings.create_dirs().expect("repo dir");
    settings
}

fn web_source(settings: &Settings, addr: SocketAddr) -> impl PackageSource {
    let raw = json!({
        "type": "web",
        "url": format!("http://{addr}/"),
        "version": { "css": ".version" },
        "fingerprints": [ { "algorithm": "sha256", "expected": SHA256 } ]
    });
    let http = HttpClient::new(settings).expect("client");
    build_source("demo", "demo.example", &raw, settings, &http).expect("valid source")
}

fn leftover_parts(settings: &Settings) -> Vec<String> {
    fs::read_dir(&settings.repo_dir)
        .expect("repo dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".apk.part"))
        .collect()
}

#[tokio::test]
async fn verified_download_lands_at_the_package_path() {
    let dir = tempdir().unwrap();
    let settings = settings(&dir, "echo 'jar verified.'");
    let apk = signed_apk();
    let addr = serve(apk.clone()).await;
    let source = web_source(&settings, addr);

    assert_eq!(source.resolve_version().await.unwrap(), Version::parse("1.2.0").unwrap());
    assert_eq!(
        source.resolve_download_url().await.unwrap(),
        format!("http://{addr}/app.apk")
    );

    let path = source.fetch().await.expect("fetch succeeds");

    assert_eq!(path, settings.package_path("demo"));
    assert_eq!(fs::read(&path).unwrap(), apk);
    assert!(leftover_parts(&settings).is_empty());
    source.verify(&path).await.expect("stored package re-verifies");
}

#[tokio::test]
async fn rejected_download_keeps_the_previous_package() {
    let dir = tempdir().unwrap();
    let settings = settings(&dir, "echo 'jarsigner: unable to verify' >&2\nexit 1");
    let previous = settings.package_path("demo");
    File::create(&previous)
        .and_then(|mut file| file.write_all(b"last known good"))
        .unwrap();
    let addr = serve(signed_apk()).await;
    let source = web_source(&settings, addr);

    let err = source.fetch().await.unwrap_err();

    assert!(matches!(err, SourceError::Verification(_)), "{err}");
    assert_eq!(fs::read(&previous).unwrap(), b"last known good");
    assert!(leftover_parts(&settings).is_empty());
}

#[tokio::test]
async fn missing_package_is_unavailable() {
    let dir = tempdir().unwrap();
    let settings = settings(&dir, "echo 'jar verified.'");
    let addr = serve(signed_apk()).await;
    let raw = json!({
        "type": "web",
        "url": format!("http://{addr}/"),
        "version": { "css": ".version" },
        "apk_url": "gone-{version}.apk"
    });
    let http = HttpClient::new(&settings).unwrap();
    let source = build_source("demo", "demo.example", &raw, &settings, &http).unwrap();

    let err = source.fetch().await.unwrap_err();

    assert!(matches!(err, SourceError::Unavailable(_)), "{err}");
    assert!(!settings.package_path("demo").exists());
    assert!(leftover_parts(&settings).is_empty());
}
