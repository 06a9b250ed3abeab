//! End-to-end tests for the search pipeline, driven through `SearchService`
//! with a fixed-output feature model.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::RgbImage;

use crate::audit::{AuditError, MemoryQueryLog, QueryLog, QueryRecord};
use crate::catalog::{CatalogStore, ItemCreate, MemoryCatalog};
use crate::config::{EmbeddingConfig, SearchConfig};
use crate::embedding::{
    decode, features, EmbeddingExtractor, ExtractionError, FeatureModel, ModelError,
    STATISTICAL_DIMENSIONS,
};
use crate::search::{ImageSource, SearchError, SearchRequest, SearchService, ValidationError};

struct FixedModel {
    output: Vec<f32>,
    calls: AtomicUsize,
}

impl FixedModel {
    fn new(output: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            output,
            calls: AtomicUsize::new(0),
        })
    }
}

impl FeatureModel for FixedModel {
    fn name(&self) -> &str {
        "fixed"
    }
    fn dimensions(&self) -> usize {
        self.output.len()
    }
    fn embed(&self, _image: &RgbImage) -> Result<Vec<f32>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

struct FailingLog;

impl QueryLog for FailingLog {
    fn append(&self, _record: QueryRecord) -> Result<(), AuditError> {
        Err(AuditError::Backend("disk full".into()))
    }
}

struct Fixture {
    service: SearchService,
    catalog: Arc<MemoryCatalog>,
    log: Arc<MemoryQueryLog>,
    model: Arc<FixedModel>,
}

fn embedding_config(dimensions: usize) -> EmbeddingConfig {
    EmbeddingConfig {
        dimensions,
        max_image_bytes: 64 * 1024,
        fetch_timeout_secs: 2,
        ..Default::default()
    }
}

fn item(name: &str, category: &str, embedding: Option<Vec<f32>>) -> ItemCreate {
    ItemCreate {
        name: name.to_string(),
        category: category.to_string(),
        price: 10.0,
        image_url: format!("https://img.test/{name}.png"),
        embedding,
        ..Default::default()
    }
}

/// Catalog with A=[1,0,0] and B=[0,1,0]; every query embeds to [1,0,0].
fn fixture() -> Fixture {
    let catalog = Arc::new(MemoryCatalog::new());
    catalog
        .create(item("A", "Fashion", Some(vec![1.0, 0.0, 0.0])))
        .unwrap();
    catalog
        .create(item("B", "Fashion", Some(vec![0.0, 1.0, 0.0])))
        .unwrap();

    let log = Arc::new(MemoryQueryLog::new());
    let model = FixedModel::new(vec![1.0, 0.0, 0.0]);
    let config = embedding_config(3);
    let extractor = Arc::new(EmbeddingExtractor::with_model(&config, model.clone()).unwrap());

    let service = SearchService::new(
        extractor,
        catalog.clone(),
        log.clone(),
        SearchConfig::default(),
        &config,
    );

    Fixture {
        service,
        catalog,
        log,
        model,
    }
}

fn png(rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_fn(32, 32, |x, y| {
        image::Rgb([
            rgb[0].saturating_add(x as u8),
            rgb[1],
            rgb[2].saturating_add(y as u8),
        ])
    });
    decode::encode_png(&img).unwrap()
}

fn upload(min_similarity: Option<f32>) -> SearchRequest {
    SearchRequest {
        source: ImageSource::Bytes(png([10, 20, 30])),
        category: None,
        min_similarity,
        limit: None,
    }
}

fn names(response: &crate::search::SearchResponse) -> Vec<&str> {
    response
        .results
        .iter()
        .map(|r| r.item.name.as_str())
        .collect()
}

#[test]
fn test_threshold_filters_orthogonal_item() {
    let f = fixture();

    let response = f.service.search(upload(Some(0.5))).unwrap();

    assert_eq!(names(&response), vec!["A"]);
    assert!((response.results[0].similarity - 1.0).abs() < 1e-6);
    assert_eq!(response.total, 1);
}

#[test]
fn test_zero_threshold_keeps_orthogonal_item_last() {
    let f = fixture();

    let response = f.service.search(upload(Some(0.0))).unwrap();

    assert_eq!(names(&response), vec!["A", "B"]);
    assert!(response.results[1].similarity.abs() < 1e-6);
    assert_eq!(response.total, 2);
}

#[test]
fn test_empty_catalog_is_empty_result_not_error() {
    let config = embedding_config(3);
    let log = Arc::new(MemoryQueryLog::new());
    let extractor = Arc::new(
        EmbeddingExtractor::with_model(&config, FixedModel::new(vec![1.0, 0.0, 0.0])).unwrap(),
    );
    let service = SearchService::new(
        extractor,
        Arc::new(MemoryCatalog::new()),
        log.clone(),
        SearchConfig::default(),
        &config,
    );

    let response = service.search(upload(Some(0.0))).unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.total, 0);
    assert_eq!(log.len(), 1);
}

#[test]
fn test_unembedded_and_mismatched_items_are_skipped() {
    let f = fixture();
    f.catalog.create(item("no-embedding", "Fashion", None)).unwrap();
    f.catalog
        .create(item("wrong-dim", "Fashion", Some(vec![1.0, 0.0])))
        .unwrap();

    let response = f.service.search(upload(Some(0.0))).unwrap();
    assert_eq!(names(&response), vec!["A", "B"]);
}

#[test]
fn test_category_filter_is_case_insensitive() {
    let f = fixture();
    f.catalog
        .create(item("C", "Electronics", Some(vec![1.0, 0.0, 0.0])))
        .unwrap();

    let mut request = upload(Some(0.0));
    request.category = Some("electronics".to_string());
    let response = f.service.search(request).unwrap();

    assert_eq!(names(&response), vec!["C"]);
    assert_eq!(response.query.category, "electronics");

    let listed = f.service.list_by_category("FASHION").unwrap();
    assert_eq!(listed.len(), 2);
    assert!(f.service.list_by_category("toys").unwrap().is_empty());
}

#[test]
fn test_effective_query_echo() {
    let f = fixture();

    let response = f.service.search(upload(None)).unwrap();
    assert_eq!(response.query.category, "all");
    assert!((response.query.min_similarity - 0.7).abs() < 1e-6);
    assert_eq!(response.query.limit, 20);
    assert_eq!(response.query.image_url, None);

    let mut request = upload(Some(7.5));
    request.limit = Some(500);
    request.category = Some("  ".to_string());
    let response = f.service.search(request).unwrap();
    assert_eq!(response.query.category, "all");
    assert_eq!(response.query.min_similarity, 1.0);
    assert_eq!(response.query.limit, 50);

    let mut request = upload(Some(-1.0));
    request.limit = Some(0);
    let response = f.service.search(request).unwrap();
    assert_eq!(response.query.min_similarity, 0.0);
    assert_eq!(response.query.limit, 1);
    assert_eq!(names(&response), vec!["A"]);
}

#[test]
fn test_validation_runs_before_extraction() {
    let f = fixture();

    let bad = [
        SearchRequest {
            source: ImageSource::Url("ftp://img.test/a.png".into()),
            category: None,
            min_similarity: None,
            limit: None,
        },
        SearchRequest {
            source: ImageSource::Bytes(Vec::new()),
            category: None,
            min_similarity: None,
            limit: None,
        },
        SearchRequest {
            source: ImageSource::Bytes(vec![0; 64 * 1024 + 1]),
            category: None,
            min_similarity: None,
            limit: None,
        },
        upload(Some(f32::NAN)),
    ];

    for request in bad {
        let result = f.service.search(request);
        assert!(
            matches!(result, Err(SearchError::Validation(_))),
            "{result:?}"
        );
    }

    assert_eq!(f.model.calls.load(Ordering::SeqCst), 0);
    assert!(f.log.is_empty());
}

#[test]
fn test_oversized_payload_reports_sizes() {
    let f = fixture();
    let request = SearchRequest {
        source: ImageSource::Bytes(vec![1; 64 * 1024 + 10]),
        category: None,
        min_similarity: None,
        limit: None,
    };

    match f.service.search(request) {
        Err(SearchError::Validation(ValidationError::PayloadTooLarge { size, limit })) => {
            assert_eq!(size, 64 * 1024 + 10);
            assert_eq!(limit, 64 * 1024);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_undecodable_image_is_an_error() {
    let f = fixture();
    let request = SearchRequest {
        source: ImageSource::Bytes(b"GIF89a but not really".to_vec()),
        category: None,
        min_similarity: Some(0.0),
        limit: None,
    };

    let result = f.service.search(request);
    assert!(
        matches!(
            result,
            Err(SearchError::Extraction(ExtractionError::DecodeFailed(_)))
        ),
        "{result:?}"
    );
    assert!(f.log.is_empty());
}

#[test]
fn test_unreachable_url_is_fetch_failure() {
    let f = fixture();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let request = SearchRequest {
        source: ImageSource::Url(format!("http://127.0.0.1:{port}/shoe.jpg")),
        category: None,
        min_similarity: None,
        limit: None,
    };

    let result = f.service.search(request);
    match result {
        Err(SearchError::Extraction(err @ ExtractionError::FetchFailed { .. })) => {
            assert!(err.is_retryable());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_one_audit_record_per_search() {
    let f = fixture();

    f.service.search(upload(Some(0.0))).unwrap();
    let response = f.service.search(upload(Some(1.0))).unwrap();
    assert_eq!(names(&response), vec!["A"]);

    let mut request = upload(Some(0.0));
    request.category = Some("nothing-here".into());
    let response = f.service.search(request).unwrap();
    assert_eq!(response.total, 0);

    let records = f.log.records();
    assert_eq!(records.len(), 3);
    for record in &records {
        assert_eq!(record.embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(record.image_url, None);
    }
}

#[test]
fn test_failing_audit_does_not_fail_search() {
    let config = embedding_config(3);
    let catalog = Arc::new(MemoryCatalog::new());
    catalog
        .create(item("A", "Fashion", Some(vec![1.0, 0.0, 0.0])))
        .unwrap();
    let extractor = Arc::new(
        EmbeddingExtractor::with_model(&config, FixedModel::new(vec![1.0, 0.0, 0.0])).unwrap(),
    );
    let service = SearchService::new(
        extractor,
        catalog,
        Arc::new(FailingLog),
        SearchConfig::default(),
        &config,
    );

    let response = service.search(upload(Some(0.5))).unwrap();
    assert_eq!(names(&response), vec!["A"]);
}

#[test]
fn test_statistical_features_find_identical_image() {
    let config = embedding_config(STATISTICAL_DIMENSIONS);
    let extractor = Arc::new(EmbeddingExtractor::new(&config, std::env::temp_dir()).unwrap());

    let red = png([220, 10, 10]);
    let blue = png([10, 10, 220]);
    let embed = |data: &[u8]| {
        features::statistical_features(&decode::decode_canonical(data).unwrap())
    };

    let catalog = Arc::new(MemoryCatalog::new());
    catalog
        .create(item("red", "Fashion", Some(embed(&red))))
        .unwrap();
    catalog
        .create(item("blue", "Fashion", Some(embed(&blue))))
        .unwrap();

    let service = SearchService::new(
        extractor,
        catalog,
        Arc::new(MemoryQueryLog::new()),
        SearchConfig::default(),
        &config,
    );

    let response = service
        .search(SearchRequest {
            source: ImageSource::Bytes(red),
            category: None,
            min_similarity: Some(0.0),
            limit: Some(1),
        })
        .unwrap();

    assert_eq!(names(&response), vec!["red"]);
    assert!((response.results[0].similarity - 1.0).abs() < 1e-4);
}

#[test]
fn test_concurrent_searches_and_creates() {
    let f = fixture();

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..10 {
                    let response = f.service.search(upload(Some(0.0))).unwrap();
                    // A is always present and always first
                    assert_eq!(response.results[0].item.name, "A");
                }
            });
        }
        s.spawn(|| {
            for i in 0..20 {
                f.catalog
                    .create(item(&format!("extra-{i}"), "Home", Some(vec![0.0, 0.0, 1.0])))
                    .unwrap();
            }
        });
    });

    assert_eq!(f.log.len(), 40);
    assert_eq!(f.catalog.len().unwrap(), 22);
}

/// Serve `body` as image/png to a single request, returning the base URL.
fn serve_once(body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
            line.clear();
        }
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
    });

    format!("http://{addr}")
}

#[test]
fn test_url_search_echoes_trimmed_url() {
    let f = fixture();
    let base = serve_once(png([50, 60, 70]));
    let url = format!("{base}/shoe.png");

    let response = f
        .service
        .search(SearchRequest {
            source: ImageSource::Url(format!("  {url}\n")),
            category: None,
            min_similarity: Some(0.5),
            limit: None,
        })
        .unwrap();

    assert_eq!(names(&response), vec!["A"]);
    assert_eq!(response.query.image_url.as_deref(), Some(url.as_str()));

    let records = f.log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].image_url.as_deref(), Some(url.as_str()));
}

#[test]
fn test_negative_limit_is_clamped() {
    let f = fixture();
    let mut request = upload(Some(0.0));
    request.limit = Some(-3);

    let response = f.service.search(request).unwrap();
    assert_eq!(response.query.limit, 1);
    assert_eq!(names(&response), vec!["A"]);
}
