mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use common::{endpoint, fixture, fixture_path, json_then_xml, spawn_server, CATALOGUE};
use metadata_harness::config::{CatalogueConfig, EndpointKind};
use metadata_harness::datafiles::{DataFileFetcher, DataFileLimits};
use metadata_harness::error::{DataFileError, FetchError};
use metadata_harness::factory::ExtractorFactory;
use metadata_harness::fetcher::{DocumentFetcher, FetchRequest, MetadataFetcher};
use metadata_harness::local;
use metadata_harness::models::{checksum, AccessType, DocumentFormat, Metadata};
use metadata_harness::validation::ValidationMode;

/// Router whose every route answers with `status` and counts hits.
fn failing_router(status: StatusCode, hits: Arc<AtomicUsize>) -> Router {
    let json_hits = Arc::clone(&hits);
    let xml_hits = hits;
    Router::new()
        .route(
            "/json/{id}",
            get(move || {
                let hits = Arc::clone(&json_hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    status
                }
            }),
        )
        .route(
            "/xml/{id}",
            get(move || {
                let hits = Arc::clone(&xml_hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    status
                }
            }),
        )
}

#[tokio::test]
async fn json_404_falls_back_to_xml() {
    let xml = fixture("land_cover.xml");
    let router = Router::new()
        .route("/json/{id}", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/xml/{id}",
            get(move || {
                let xml = xml.clone();
                async move { ([(header::CONTENT_TYPE, "application/xml")], xml) }
            }),
        );
    let base = spawn_server(router).await;
    let fetcher = common::fetcher(json_then_xml(&base), 3);

    let doc = fetcher
        .fetch(&FetchRequest::new("abc123", CATALOGUE))
        .await
        .unwrap();

    assert_eq!(doc.format(), DocumentFormat::Xml);
    assert_eq!(doc.url(), format!("{}/xml/abc123", base));
    assert_eq!(doc.path().extension().unwrap(), "xml");
    assert_eq!(std::fs::read_to_string(doc.path()).unwrap(), fixture("land_cover.xml"));
}

#[tokio::test]
async fn preferred_format_is_tried_first() {
    let json_hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&json_hits);
    let router = Router::new()
        .route(
            "/json/{id}",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    fixture("land_cover.json")
                }
            }),
        )
        .route("/xml/{id}", get(|| async { fixture("land_cover.xml") }));
    let base = spawn_server(router).await;
    let fetcher = common::fetcher(json_then_xml(&base), 1);

    let doc = fetcher
        .fetch(&FetchRequest::new("abc123", CATALOGUE).with_format(Some(DocumentFormat::Xml)))
        .await
        .unwrap();
    assert_eq!(doc.format(), DocumentFormat::Xml);
    assert_eq!(json_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_errors_use_exactly_max_retries_per_candidate() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = spawn_server(failing_router(StatusCode::SERVICE_UNAVAILABLE, Arc::clone(&hits))).await;
    let fetcher = common::fetcher(json_then_xml(&base), 3);

    let err = fetcher
        .fetch(&FetchRequest::new("abc123", CATALOGUE))
        .await
        .unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 6);
    match err {
        FetchError::Exhausted {
            identifier,
            attempts,
            reason,
        } => {
            assert_eq!(identifier, "abc123");
            assert_eq!(attempts, 6);
            assert!(reason.contains("503"), "{}", reason);
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn timeouts_are_retried_then_next_candidate() {
    let slow_hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&slow_hits);
    let router = Router::new()
        .route(
            "/json/{id}",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    "{}"
                }
            }),
        )
        .route("/xml/{id}", get(|| async { fixture("land_cover.xml") }));
    let base = spawn_server(router).await;
    let fetcher = common::fetcher(json_then_xml(&base), 2);

    let doc = fetcher
        .fetch(
            &FetchRequest::new("abc123", CATALOGUE)
                .with_timeout(Some(Duration::from_millis(200))),
        )
        .await
        .unwrap();

    assert_eq!(slow_hits.load(Ordering::SeqCst), 2);
    assert_eq!(doc.format(), DocumentFormat::Xml);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = spawn_server(failing_router(StatusCode::BAD_REQUEST, Arc::clone(&hits))).await;
    let fetcher = common::fetcher(json_then_xml(&base), 5);

    let err = fetcher
        .fetch(&FetchRequest::new("abc123", CATALOGUE))
        .await
        .unwrap_err();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(matches!(err, FetchError::Exhausted { attempts: 2, .. }));
}

#[tokio::test]
async fn malformed_body_moves_to_next_candidate() {
    let router = Router::new()
        .route("/json/{id}", get(|| async { "<html>maintenance</html>" }))
        .route("/xml/{id}", get(|| async { fixture("land_cover.xml") }));
    let base = spawn_server(router).await;
    let fetcher = common::fetcher(json_then_xml(&base), 3);

    let doc = fetcher
        .fetch(&FetchRequest::new("abc123", CATALOGUE))
        .await
        .unwrap();
    assert_eq!(doc.format(), DocumentFormat::Xml);
}

#[tokio::test]
async fn json_with_context_is_detected_as_jsonld() {
    let router = Router::new().route("/json/{id}", get(|| async { fixture("land_cover.jsonld") }));
    let base = spawn_server(router).await;
    let fetcher = common::fetcher(json_then_xml(&base), 1);

    let doc = fetcher
        .fetch(&FetchRequest::new("abc123", CATALOGUE))
        .await
        .unwrap();
    assert_eq!(doc.format(), DocumentFormat::JsonLd);
    assert_eq!(doc.path().extension().unwrap(), "jsonld");
}

#[tokio::test]
async fn negotiated_endpoint_sends_accept_header() {
    let router = Router::new().route(
        "/id/{id}",
        get(|headers: HeaderMap| async move {
            let accept = headers
                .get(header::ACCEPT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            if accept.contains("xml") {
                fixture("land_cover.xml").into_response()
            } else {
                StatusCode::NOT_ACCEPTABLE.into_response()
            }
        }),
    );
    let base = spawn_server(router).await;
    let mut xml = endpoint(format!("{}/id/{{identifier}}", base), DocumentFormat::Xml);
    xml.kind = EndpointKind::Negotiated;
    let profile = CatalogueConfig {
        description: String::new(),
        endpoints: vec![xml],
    };
    let fetcher = common::fetcher(profile, 1);

    let doc = fetcher
        .fetch(&FetchRequest::new("abc123", CATALOGUE))
        .await
        .unwrap();
    assert_eq!(doc.format(), DocumentFormat::Xml);
}

#[tokio::test]
async fn fetching_twice_gives_the_same_checksum() {
    let router = Router::new().route("/json/{id}", get(|| async { fixture("land_cover.json") }));
    let base = spawn_server(router).await;
    let fetcher = common::fetcher(json_then_xml(&base), 1);
    let request = FetchRequest::new("abc123", CATALOGUE);

    let first = fetcher.fetch(&request).await.unwrap();
    let second = fetcher.fetch(&request).await.unwrap();

    assert_eq!(first.checksum(), second.checksum());
    assert_eq!(first.checksum(), checksum(fixture("land_cover.json").as_bytes()));
    assert_ne!(first.path(), second.path());
}

#[tokio::test]
async fn temp_files_are_removed_when_dropped() {
    let router = Router::new().route("/json/{id}", get(|| async { fixture("land_cover.json") }));
    let base = spawn_server(router).await;
    let fetcher = common::fetcher(json_then_xml(&base), 1);

    let doc = fetcher
        .fetch(&FetchRequest::new("abc123", CATALOGUE))
        .await
        .unwrap();
    let path = doc.path().to_path_buf();
    assert!(path.exists());
    drop(doc);
    assert!(!path.exists());
}

#[tokio::test]
async fn unknown_catalogue_is_a_fetch_error() {
    let fetcher = MetadataFetcher::from_config(&metadata_harness::config::Config::minimal()).unwrap();
    let err = fetcher
        .fetch(&FetchRequest::new("abc123", "nowhere"))
        .await
        .unwrap_err();
    match err {
        FetchError::UnknownCatalogue { name, known } => {
            assert_eq!(name, "nowhere");
            assert!(known.contains("ceh"));
        }
        other => panic!("expected UnknownCatalogue, got {:?}", other),
    }
}

#[tokio::test]
async fn connection_refused_is_exhausted() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let fetcher = common::fetcher(json_then_xml(&base), 2);

    let err = fetcher
        .fetch(&FetchRequest::new("abc123", CATALOGUE))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Exhausted { attempts: 4, .. }));
}

#[tokio::test]
async fn oversized_body_is_not_retried() {
    let json_hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&json_hits);
    let xml = fixture("land_cover.xml");
    let router = Router::new()
        .route(
            "/json/{id}",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    format!(r#"{{"title": "{}"}}"#, "x".repeat(20_000))
                }
            }),
        )
        .route("/xml/{id}", get(move || async move { xml }));
    let base = spawn_server(router).await;

    let mut catalogues = std::collections::BTreeMap::new();
    catalogues.insert(CATALOGUE.to_string(), json_then_xml(&base));
    let mut settings = common::settings(3, Duration::from_secs(5));
    settings.max_body_bytes = 10_000;
    let fetcher = MetadataFetcher::new(catalogues, settings).unwrap();

    let doc = fetcher
        .fetch(&FetchRequest::new("abc123", CATALOGUE))
        .await
        .unwrap();
    assert_eq!(doc.format(), DocumentFormat::Xml);
    assert_eq!(json_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn top_level_json_array_falls_back_to_xml() {
    let xml = fixture("land_cover.xml");
    let router = Router::new()
        .route("/json/{id}", get(|| async { r#"[{"title": "A list"}]"# }))
        .route("/xml/{id}", get(move || async move { xml }));
    let base = spawn_server(router).await;
    let fetcher = common::fetcher(json_then_xml(&base), 1);

    let doc = fetcher
        .fetch(&FetchRequest::new("abc123", CATALOGUE))
        .await
        .unwrap();
    assert_eq!(doc.format(), DocumentFormat::Xml);
}

// ═══════════════════════════════════════════════════════════════════════
// Data files
// ═══════════════════════════════════════════════════════════════════════

fn index(links: &[&str]) -> axum::response::Html<String> {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{href}">{href}</a>"#))
        .collect();
    axum::response::Html(format!("<html><body>{anchors}</body></html>"))
}

/// `/data/` lists two files, an ignored set of links and `sub/`, which
/// holds one file and `deeper/`.
fn folder_router(deeper_hits: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(
            "/data/",
            get(|| async {
                index(&[
                    "a.csv",
                    "b.nc",
                    "sub/",
                    "../",
                    "?C=N;O=D",
                    "#top",
                    "index.html",
                    "/elsewhere/x.csv",
                    "http://other.example/data/y.csv",
                ])
            }),
        )
        .route("/data/sub/", get(|| async { index(&["c.txt", "deeper/", "a.csv"]) }))
        .route(
            "/data/sub/deeper/",
            get(move || {
                let hits = Arc::clone(&deeper_hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    index(&["d.txt"])
                }
            }),
        )
}

fn data_fetcher(limits: DataFileLimits, dir: &std::path::Path) -> DataFileFetcher {
    DataFileFetcher::new(limits, dir, Duration::from_secs(5), "metadata-harness-tests").unwrap()
}

fn ingested_metadata() -> Metadata {
    let factory = ExtractorFactory::new(ValidationMode::Lenient);
    local::extract_file(&factory, &fixture_path("land_cover.json"))
        .unwrap()
        .metadata
}

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[tokio::test]
async fn folder_listing_follows_one_level_of_subfolders() {
    let deeper_hits = Arc::new(AtomicUsize::new(0));
    let base = spawn_server(folder_router(Arc::clone(&deeper_hits))).await;
    let dir = tempfile::TempDir::new().unwrap();
    let dataset = uuid::Uuid::new_v4();

    let files = data_fetcher(DataFileLimits::default(), dir.path())
        .list_folder(dataset, &format!("{}/data/", base))
        .await
        .unwrap();

    let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["a.csv", "b.nc", "sub/c.txt", "sub/a.csv"]);
    assert_eq!(files[0].file_path, format!("{}/data/a.csv", base));
    assert_eq!(files[1].file_format, "nc");
    assert!(files.iter().all(|f| !f.is_downloaded() && f.dataset_id == dataset));
    assert_eq!(deeper_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn folder_listing_honours_depth_and_file_limits() {
    let deeper_hits = Arc::new(AtomicUsize::new(0));
    let base = spawn_server(folder_router(Arc::clone(&deeper_hits))).await;
    let dir = tempfile::TempDir::new().unwrap();
    let root = format!("{}/data/", base);

    let deep = DataFileLimits {
        max_depth: 2,
        ..DataFileLimits::default()
    };
    let files = data_fetcher(deep, dir.path())
        .list_folder(uuid::Uuid::new_v4(), &root)
        .await
        .unwrap();
    assert_eq!(files.last().unwrap().filename, "sub/deeper/d.txt");
    assert_eq!(deeper_hits.load(Ordering::SeqCst), 1);

    let capped = DataFileLimits {
        max_files: 3,
        ..DataFileLimits::default()
    };
    let files = data_fetcher(capped, dir.path())
        .list_folder(uuid::Uuid::new_v4(), &root)
        .await
        .unwrap();
    assert_eq!(files.len(), 3);
}

#[tokio::test]
async fn broken_subfolder_is_skipped_but_broken_root_fails() {
    let router = Router::new().route("/data/", get(|| async { index(&["a.csv", "gone/"]) }));
    let base = spawn_server(router).await;
    let dir = tempfile::TempDir::new().unwrap();
    let fetcher = data_fetcher(DataFileLimits::default(), dir.path());

    let files = fetcher
        .list_folder(uuid::Uuid::new_v4(), &format!("{}/data/", base))
        .await
        .unwrap();
    assert_eq!(files.len(), 1);

    let err = fetcher
        .list_folder(uuid::Uuid::new_v4(), &format!("{}/missing/", base))
        .await
        .unwrap_err();
    assert!(matches!(err, DataFileError::Request { .. }), "got {err}");
}

#[tokio::test]
async fn file_access_dataset_lists_its_download_folder() {
    let base = spawn_server(folder_router(Arc::new(AtomicUsize::new(0)))).await;
    let dir = tempfile::TempDir::new().unwrap();
    let mut metadata = ingested_metadata();
    metadata.access_type = AccessType::FileAccess;
    metadata.download_url = Some(format!("{}/data/", base));
    metadata.landing_page_url = Some(format!("{}/about", base));

    let files = data_fetcher(DataFileLimits::default(), dir.path())
        .discover(uuid::Uuid::new_v4(), &metadata)
        .await
        .unwrap();
    assert_eq!(files.len(), 4);
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn download_dataset_unpacks_its_zip_archive() {
    let archive = zip_of(&[("readme.txt", b"hello"), ("data/flows.csv", b"day,flow\n1,2.5\n")]);
    let router = Router::new().route(
        "/files/all.zip",
        get(move || async move { ([(header::CONTENT_TYPE, "application/zip")], archive) }),
    );
    let base = spawn_server(router).await;
    let dir = tempfile::TempDir::new().unwrap();
    let dataset = uuid::Uuid::new_v4();
    let mut metadata = ingested_metadata();
    metadata.access_type = AccessType::Download;
    metadata.landing_page_url = Some(format!("{}/files/all.zip", base));
    metadata.download_url = Some(format!("{}/not-used", base));

    let files = data_fetcher(DataFileLimits::default(), dir.path())
        .discover(dataset, &metadata)
        .await
        .unwrap();

    assert_eq!(files.len(), 2);
    assert_eq!(files[1].filename, "data/flows.csv");
    assert_eq!(files[1].file_format, "csv");
    assert_eq!(files[0].checksum.as_deref(), Some(checksum(b"hello").as_str()));
    let unpacked = dir.path().join(dataset.to_string()).join("data").join("flows.csv");
    assert_eq!(std::fs::read(unpacked).unwrap(), b"day,flow\n1,2.5\n");
}

#[tokio::test]
async fn oversized_archive_is_rejected() {
    let archive = zip_of(&[("big.bin", &[7u8; 4096])]);
    let router = Router::new().route("/all.zip", get(move || async move { archive }));
    let base = spawn_server(router).await;
    let dir = tempfile::TempDir::new().unwrap();
    let limits = DataFileLimits {
        max_size_bytes: 64,
        ..DataFileLimits::default()
    };

    let err = data_fetcher(limits, dir.path())
        .unpack_archive(uuid::Uuid::new_v4(), &format!("{}/all.zip", base))
        .await
        .unwrap_err();
    assert!(matches!(err, DataFileError::TooLarge { limit: 64, .. }), "got {err}");
}

#[tokio::test]
async fn dataset_without_urls_has_no_data_files() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut metadata = ingested_metadata();
    metadata.download_url = None;
    metadata.landing_page_url = None;

    let files = data_fetcher(DataFileLimits::default(), dir.path())
        .discover(uuid::Uuid::new_v4(), &metadata)
        .await
        .unwrap();
    assert!(files.is_empty());
}
