//! Fake catalogue server shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;
use metadata_harness::config::{CatalogueConfig, EndpointConfig, EndpointKind};
use metadata_harness::fetcher::{FetchSettings, MetadataFetcher};
use metadata_harness::models::DocumentFormat;

pub const CATALOGUE: &str = "test";

/// Serve `router` on an ephemeral port; returns the base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn endpoint(url: String, format: DocumentFormat) -> EndpointConfig {
    EndpointConfig {
        url,
        format,
        kind: EndpointKind::Primary,
        accept: None,
    }
}

/// JSON at `/json/{identifier}`, then XML at `/xml/{identifier}`.
pub fn json_then_xml(base: &str) -> CatalogueConfig {
    CatalogueConfig {
        description: "fake catalogue".to_string(),
        endpoints: vec![
            endpoint(format!("{}/json/{{identifier}}", base), DocumentFormat::Json),
            endpoint(format!("{}/xml/{{identifier}}", base), DocumentFormat::Xml),
        ],
    }
}

pub fn settings(max_retries: u32, timeout: Duration) -> FetchSettings {
    FetchSettings {
        timeout,
        max_retries,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        temp_dir: None,
        user_agent: "metadata-harness-tests".to_string(),
        max_body_bytes: 1024 * 1024,
    }
}

pub fn fetcher(profile: CatalogueConfig, max_retries: u32) -> MetadataFetcher {
    let mut catalogues = BTreeMap::new();
    catalogues.insert(CATALOGUE.to_string(), profile);
    MetadataFetcher::new(catalogues, settings(max_retries, Duration::from_secs(5))).unwrap()
}

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).unwrap()
}
