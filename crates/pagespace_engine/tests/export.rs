use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use pagespace_core::{ConfigError, ExportConfig};
use pagespace_engine::{
    export, ApiError, ClientSettings, ContentClient, ExportError, Exporter, FailureKind,
    FetchError, FetchedPage, PageDescriptor, ResourceFetch,
};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOME: &str = r#"<html><head><title>Home</title><link rel="stylesheet" href="/assets/shared.css"></head><body><a href="/about">About</a><img src="/img/logo.png"></body></html>"#;
const ABOUT: &str = r#"<html><head><link rel="stylesheet" href="/assets/shared.css"><link rel="stylesheet" href="/css/site.css"></head><body><a href="/">Home</a></body></html>"#;
const POST: &str = r#"<html><head><link rel="stylesheet" href="/css/site.css"></head><body><div style="background:url(/img/bg.png)"></div></body></html>"#;

async fn mount_html(server: &MockServer, page: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(page))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html; charset=utf-8"))
        .mount(server)
        .await;
}

async fn mount_resource(server: &MockServer, resource: &str, body: &[u8], expected: u64) {
    Mock::given(method("GET"))
        .and(path(resource))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_pages(server: &MockServer, pages: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/_api/pages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pages))
        .mount(server)
        .await;
}

/// A site with three pages sharing one stylesheet; each resource must be
/// fetched `resource_fetches` times.
async fn site(resource_fetches: u64) -> MockServer {
    let server = MockServer::start().await;
    mount_pages(
        &server,
        json!([
            { "url": "/", "name": "Home" },
            { "url": "/about", "name": "About" },
            { "url": "/blog/post", "name": "Post" }
        ]),
    )
    .await;
    mount_html(&server, "/", HOME).await;
    mount_html(&server, "/about", ABOUT).await;
    mount_html(&server, "/blog/post", POST).await;
    mount_resource(&server, "/assets/shared.css", b"shared", resource_fetches).await;
    mount_resource(&server, "/css/site.css", b"site", resource_fetches).await;
    mount_resource(&server, "/img/logo.png", b"\x89PNG", resource_fetches).await;
    mount_resource(&server, "/img/bg.png", b"bg", resource_fetches).await;
    server
}

fn config_for(server: &MockServer, source: &Path, output: Option<&str>) -> ExportConfig {
    let mut config = ExportConfig::new(source.to_path_buf());
    config.host = Some(server.uri());
    config.credentials = Some("admin:secret".to_string());
    config.output_dir = output.map(PathBuf::from);
    config
}

fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(relative, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

#[tokio::test]
async fn exports_pages_and_resources_into_mirrored_tree() {
    pagespace_logging::initialize_for_tests();
    let server = site(1).await;
    let temp = TempDir::new().unwrap();
    let config = config_for(&server, temp.path(), Some("out"));

    let summary = export(&config, ClientSettings::default(), CancellationToken::new())
        .await
        .unwrap();
    let out = temp.path().join("out");

    let index = fs::read_to_string(out.join("index.html")).unwrap();
    assert!(index.contains(r#"<a href="about.html">"#), "{index}");
    assert!(index.contains(r#"<img src="img/logo.png">"#), "{index}");
    assert!(index.contains(r#"name="generator""#), "{index}");

    let about = fs::read_to_string(out.join("about.html")).unwrap();
    assert!(about.contains(r#"href="css/site.css""#), "{about}");
    assert!(about.contains(r#"<a href="index.html">"#), "{about}");

    let post = fs::read_to_string(out.join("blog").join("post.html")).unwrap();
    assert!(post.contains(r#"href="../css/site.css""#), "{post}");
    assert!(post.contains("url(../img/bg.png)"), "{post}");

    assert_eq!(fs::read(out.join("img").join("logo.png")).unwrap(), b"\x89PNG");
    assert_eq!(fs::read(out.join("css").join("site.css")).unwrap(), b"site");
    assert_eq!(fs::read(out.join("assets").join("shared.css")).unwrap(), b"shared");
    assert_eq!(fs::read(out.join("img").join("bg.png")).unwrap(), b"bg");

    assert!(!summary.dry_run);
    assert_eq!(summary.pages_listed, 3);
    assert_eq!(summary.pages_exported, 3);
    assert_eq!(summary.resources_discovered, 4);
    assert_eq!(summary.resources_fetched, 4);
    assert!(summary.is_complete());
}

#[tokio::test]
async fn dry_run_discovers_resources_without_writing_or_fetching() {
    let server = site(0).await;
    let temp = TempDir::new().unwrap();
    let config = config_for(&server, temp.path(), None);

    let summary = export(&config, ClientSettings::default(), CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.pages_exported, 3);
    assert_eq!(summary.resources_discovered, 4);
    assert_eq!(summary.resources_fetched, 0);
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn failed_items_are_skipped_without_stopping_the_run() {
    let server = MockServer::start().await;
    mount_pages(
        &server,
        json!([
            { "url": "/", "name": "Home" },
            { "url": "/broken", "name": "Broken" }
        ]),
    )
    .await;
    mount_html(
        &server,
        "/",
        r#"<html><head></head><body><img src="/img/ok.png"><img src="/img/missing.png"></body></html>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_resource(&server, "/img/ok.png", b"ok", 1).await;
    Mock::given(method("GET"))
        .and(path("/img/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let config = config_for(&server, temp.path(), Some("out"));
    let summary = export(&config, ClientSettings::default(), CancellationToken::new())
        .await
        .unwrap();
    let out = temp.path().join("out");

    assert!(out.join("index.html").exists());
    assert!(!out.join("broken.html").exists());
    assert_eq!(fs::read(out.join("img").join("ok.png")).unwrap(), b"ok");
    assert!(!out.join("img").join("missing.png").exists());

    assert_eq!(summary.pages_exported, 1);
    assert_eq!(summary.pages_skipped, 1);
    assert_eq!(summary.resources_fetched, 1);
    assert_eq!(summary.resources_skipped, 1);
    assert!(!summary.is_complete());
}

#[tokio::test]
async fn page_list_failure_aborts_before_rendering() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_api/pages"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let config = config_for(&server, temp.path(), Some("out"));
    let err = export(&config, ClientSettings::default(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(err, ExportError::Api(ApiError::Status { status: 500 })),
        "{err:?}"
    );
    assert!(!temp.path().join("out").exists());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_credentials_abort_without_network_calls() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let mut config = config_for(&server, temp.path(), Some("out"));
    config.credentials = None;

    let err = export(&config, ClientSettings::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExportError::Config(ConfigError::MissingCredentials)
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_page_list_is_a_valid_run() {
    let server = MockServer::start().await;
    mount_pages(&server, json!([])).await;

    let temp = TempDir::new().unwrap();
    let config = config_for(&server, temp.path(), Some("out"));
    let summary = export(&config, ClientSettings::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.pages_listed, 0);
    assert_eq!(summary.resources_discovered, 0);
    assert!(summary.is_complete());
}

#[tokio::test]
async fn clean_reexport_is_byte_identical() {
    let server = site(2).await;
    let temp = TempDir::new().unwrap();
    let mut config = config_for(&server, temp.path(), Some("out"));
    config.clean = true;
    let out = temp.path().join("out");

    export(&config, ClientSettings::default(), CancellationToken::new())
        .await
        .unwrap();
    let first = snapshot(&out);
    fs::write(out.join("stale.html"), "left over").unwrap();

    export(&config, ClientSettings::default(), CancellationToken::new())
        .await
        .unwrap();
    let second = snapshot(&out);

    assert!(!out.join("stale.html").exists());
    assert_eq!(first, second);
}

/// In-memory content host that counts every fetch and tracks how many run at
/// once.
#[derive(Default)]
struct FakeHost {
    pages: Vec<(String, String)>,
    resources: HashMap<String, Vec<u8>>,
    /// Resources whose body fails after the first chunk.
    broken: HashSet<String>,
    /// Time each fetch takes before answering.
    latency: Duration,
    fetches: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeHost {
    fn fetch_count(&self, reference: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|fetched| fetched.as_str() == reference)
            .count()
    }

    async fn begin_fetch(&self, reference: &str) {
        self.fetches.lock().unwrap().push(reference.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn end_fetch(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ContentClient for FakeHost {
    async fn list_pages(&self) -> Result<Vec<PageDescriptor>, ApiError> {
        Ok(self
            .pages
            .iter()
            .map(|(url, _)| PageDescriptor {
                url: url.clone(),
                name: url.clone(),
            })
            .collect())
    }

    async fn fetch_page(&self, page_url: &str) -> Result<FetchedPage, FetchError> {
        self.begin_fetch(page_url).await;
        let html = self
            .pages
            .iter()
            .find(|(url, _)| url == page_url)
            .map(|(_, html)| html.clone());
        self.end_fetch();
        let html = html.ok_or(FetchError {
            kind: FailureKind::HttpStatus(404),
            message: "not found".to_string(),
        })?;
        Ok(FetchedPage {
            url: page_url.to_string(),
            html: html.into_bytes(),
            content_type: None,
        })
    }

    async fn fetch_resource(&self, reference: &str) -> Result<ResourceFetch, FetchError> {
        self.begin_fetch(reference).await;
        self.end_fetch();
        if self.broken.contains(reference) {
            let failure = stream::once(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(FetchError {
                    kind: FailureKind::Network,
                    message: "connection reset".to_string(),
                })
            });
            return Ok(ResourceFetch::Available(
                stream::iter(vec![Ok(Bytes::from_static(b"partial"))])
                    .chain(failure)
                    .boxed(),
            ));
        }
        Ok(match self.resources.get(reference) {
            Some(body) => ResourceFetch::Available(
                stream::iter(vec![Ok(Bytes::from(body.clone()))]).boxed(),
            ),
            None => ResourceFetch::Unavailable { status: 404 },
        })
    }
}

fn fake_run(temp: &TempDir, output: Option<&str>) -> pagespace_core::ExportRun {
    let mut config = ExportConfig::new(temp.path().to_path_buf());
    config.host = Some("http://pagespace.test".to_string());
    config.credentials = Some("admin:secret".to_string());
    config.output_dir = output.map(PathBuf::from);
    config.concurrency = 2;
    config.validate().unwrap()
}

#[tokio::test]
async fn shared_resource_is_fetched_exactly_once() {
    let host = Arc::new(FakeHost {
        pages: (0..6)
            .map(|i| {
                (
                    format!("/section/page-{i}"),
                    r#"<html><head><link href="/assets/shared.css"></head><body><img src="/assets/shared.css"></body></html>"#
                        .to_string(),
                )
            })
            .collect(),
        resources: HashMap::from([("/assets/shared.css".to_string(), b"css".to_vec())]),
        ..FakeHost::default()
    });
    let temp = TempDir::new().unwrap();

    let summary = Exporter::new(fake_run(&temp, Some("out")), host.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_exported, 6);
    assert_eq!(summary.resources_discovered, 1);
    assert_eq!(host.fetch_count("/assets/shared.css"), 1);
    let page = fs::read_to_string(temp.path().join("out/section/page-3.html")).unwrap();
    assert!(page.contains(r#"href="../assets/shared.css""#), "{page}");
}

#[tokio::test]
async fn cancelled_run_skips_every_item() {
    let host = Arc::new(FakeHost {
        pages: vec![
            ("/".to_string(), "<p>home</p>".to_string()),
            ("/about".to_string(), "<p>about</p>".to_string()),
        ],
        ..FakeHost::default()
    });
    let temp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = Exporter::new(fake_run(&temp, Some("out")), host.clone())
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_listed, 2);
    assert_eq!(summary.pages_exported, 0);
    assert_eq!(summary.pages_skipped, 2);
    assert!(host.fetches.lock().unwrap().is_empty());
    assert!(!temp.path().join("out").join("index.html").exists());
}

#[tokio::test]
async fn references_sharing_an_output_file_get_one_writer() {
    let host = Arc::new(FakeHost {
        pages: vec![(
            "/".to_string(),
            r#"<html><head><link href="/a.css?v=1"><link href="/a.css?v=2"></head></html>"#
                .to_string(),
        )],
        resources: HashMap::from([("/a.css?v=1".to_string(), b"good".to_vec())]),
        broken: HashSet::from(["/a.css?v=2".to_string()]),
        ..FakeHost::default()
    });
    let temp = TempDir::new().unwrap();

    let summary = Exporter::new(fake_run(&temp, Some("out")), host.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.resources_discovered, 2);
    assert_eq!(summary.resources_fetched, 1);
    assert_eq!(summary.resources_skipped, 1);
    assert_eq!(host.fetch_count("/a.css?v=1"), 1);
    assert_eq!(host.fetch_count("/a.css?v=2"), 0);
    assert_eq!(fs::read(temp.path().join("out").join("a.css")).unwrap(), b"good");
}

#[tokio::test]
async fn pages_sharing_an_output_file_get_one_writer() {
    let host = Arc::new(FakeHost {
        pages: vec![
            ("/about".to_string(), "<p>first</p>".to_string()),
            ("/about.html".to_string(), "<p>second</p>".to_string()),
            ("/blog/".to_string(), "<p>blog</p>".to_string()),
            ("/blog".to_string(), "<p>blog again</p>".to_string()),
        ],
        ..FakeHost::default()
    });
    let temp = TempDir::new().unwrap();

    let summary = Exporter::new(fake_run(&temp, Some("out")), host.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_listed, 4);
    assert_eq!(summary.pages_exported, 2);
    assert_eq!(summary.pages_skipped, 2);
    assert_eq!(host.fetch_count("/about.html"), 0);
    assert_eq!(host.fetch_count("/blog"), 0);
    let about = fs::read_to_string(temp.path().join("out").join("about.html")).unwrap();
    assert!(about.contains("first"), "{about}");
}

#[tokio::test]
async fn failed_resource_stream_is_skipped_and_leaves_no_file() {
    let host = Arc::new(FakeHost {
        pages: vec![(
            "/".to_string(),
            r#"<html><head></head><body><img src="/img/big.png"></body></html>"#.to_string(),
        )],
        broken: HashSet::from(["/img/big.png".to_string()]),
        ..FakeHost::default()
    });
    let temp = TempDir::new().unwrap();

    let summary = Exporter::new(fake_run(&temp, Some("out")), host)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.resources_fetched, 0);
    assert_eq!(summary.resources_skipped, 1);
    let img_dir = temp.path().join("out").join("img");
    assert!(!img_dir.join("big.png").exists());
    assert_eq!(fs::read_dir(&img_dir).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetches_never_exceed_the_concurrency_limit() {
    let host = Arc::new(FakeHost {
        pages: (0..10)
            .map(|i| {
                (
                    format!("/p/{i}"),
                    format!(r#"<html><head></head><body><img src="/img/{i}.png"></body></html>"#),
                )
            })
            .collect(),
        resources: (0..10)
            .map(|i| (format!("/img/{i}.png"), b"png".to_vec()))
            .collect(),
        latency: Duration::from_millis(20),
        ..FakeHost::default()
    });
    let temp = TempDir::new().unwrap();
    let run = fake_run(&temp, Some("out"));
    let limit = run.concurrency;

    let summary = Exporter::new(run, host.clone()).run().await.unwrap();

    assert_eq!(summary.pages_exported, 10);
    assert_eq!(summary.resources_fetched, 10);
    let peak = host.peak_in_flight.load(Ordering::SeqCst);
    assert!(peak <= limit, "peak {peak} exceeds limit {limit}");
    assert_eq!(peak, limit);
}
