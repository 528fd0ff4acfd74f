use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use csw_client::{EndpointOptions, ServiceEndpoint};
use csw_core::{
    AppError, CompatOption, CompatOptionSet, ElementSetName, HarvestConfig, HarvestStatus,
    Harvester, HttpConfig, RecordStatus, Schema, SearchOptions,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const XML: &str = "application/xml; charset=utf-8";

fn dc_record(id: &str, title: &str) -> String {
    format!(
        "<csw:Record><dc:identifier>{}</dc:identifier><dc:title>{}</dc:title></csw:Record>",
        id, title
    )
}

fn brief_record(id: &str) -> String {
    format!(
        "<csw:BriefRecord><dc:identifier>{}</dc:identifier></csw:BriefRecord>",
        id
    )
}

fn get_records_response(matched: u64, records: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<csw:GetRecordsResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <csw:SearchResults numberOfRecordsMatched="{}" numberOfRecordsReturned="{}">{}</csw:SearchResults>
</csw:GetRecordsResponse>"#,
        matched,
        records.len(),
        records.concat()
    )
}

fn get_record_by_id_response(records: &[String]) -> String {
    format!(
        r#"<csw:GetRecordByIdResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2" xmlns:dc="http://purl.org/dc/elements/1.1/">{}</csw:GetRecordByIdResponse>"#,
        records.concat()
    )
}

fn exception_report(code: &str, locator: &str, text: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows" version="1.2.0">
  <ows:Exception exceptionCode="{}" locator="{}"><ows:ExceptionText>{}</ows:ExceptionText></ows:Exception>
</ows:ExceptionReport>"#,
        code, locator, text
    )
}

const CAPABILITIES: &str = r#"<csw:Capabilities xmlns:csw="http://www.opengis.net/cat/csw/2.0.2" xmlns:ows="http://www.opengis.net/ows" version="2.0.2">
  <ows:ServiceIdentification><ows:Title>Test catalog</ows:Title></ows:ServiceIdentification>
</csw:Capabilities>"#;

fn xml(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into(), XML)
}

fn endpoint(server: &MockServer) -> ServiceEndpoint {
    ServiceEndpoint::new(&format!("{}/csw", server.uri())).expect("valid url")
}

fn endpoint_with(server: &MockServer, compat: &[&str]) -> ServiceEndpoint {
    let options = EndpointOptions {
        compat_options: CompatOptionSet::from_names(compat).expect("known options"),
        ..EndpointOptions::default()
    };
    ServiceEndpoint::with_options(&format!("{}/csw", server.uri()), options).expect("valid url")
}

#[tokio::test]
async fn test_capabilities_sends_fixed_identifiers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/csw"))
        .and(query_param("service", "CSW"))
        .and(query_param("version", "2.0.2"))
        .and(query_param("request", "GetCapabilities"))
        .respond_with(xml(CAPABILITIES))
        .expect(1)
        .mount(&server)
        .await;

    let capabilities = endpoint(&server).capabilities().await.unwrap();
    assert_eq!(
        capabilities["ServiceIdentification"]["Title"],
        serde_json::json!("Test catalog")
    );
}

#[tokio::test]
async fn test_extra_params_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetCapabilities"))
        .and(query_param("apikey", "secret"))
        .respond_with(xml(CAPABILITIES))
        .expect(1)
        .mount(&server)
        .await;

    let options = EndpointOptions {
        extra_params: vec![("apikey".to_string(), "secret".to_string())],
        ..EndpointOptions::default()
    };
    let endpoint =
        ServiceEndpoint::with_options(&format!("{}/csw", server.uri()), options).unwrap();
    endpoint.capabilities().await.unwrap();
}

#[tokio::test]
async fn test_error_status_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let result = endpoint(&server).capabilities().await;
    assert!(matches!(result, Err(AppError::HttpStatus { status: 400, .. })));
}

#[tokio::test]
async fn test_non_xml_response_fails_before_parsing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>maintenance</html>", "text/html"),
        )
        .mount(&server)
        .await;

    let result = endpoint(&server).capabilities().await;
    assert!(matches!(result, Err(AppError::ResponseFormat(_))));
}

#[tokio::test]
async fn test_unexpected_result_type_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(xml(CAPABILITIES))
        .mount(&server)
        .await;

    let result = endpoint(&server)
        .records(&SearchOptions::default())
        .await;
    assert!(matches!(
        result,
        Err(AppError::UnexpectedResponse {
            expected: "GetRecordsResponse",
            ..
        })
    ));
}

#[tokio::test]
async fn test_records_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecords"))
        .and(query_param("typeNames", "gmd:MD_Metadata"))
        .and(query_param("outputSchema", "http://www.isotc211.org/2005/gmd"))
        .and(query_param("startPosition", "21"))
        .and(query_param("maxRecords", "20"))
        .and(query_param("resultType", "results"))
        .and(query_param("elementSetName", "full"))
        .respond_with(xml(get_records_response(
            2,
            &[dc_record("a", "A"), dc_record("b", "B")],
        )))
        .expect(1)
        .mount(&server)
        .await;

    let results = endpoint(&server)
        .records(&SearchOptions::page(Schema::Iso, 20, 20))
        .await
        .unwrap();

    assert_eq!(results.matched, Some(2));
    assert_eq!(results.returned, Some(2));
    assert_eq!(results.records.len(), 2);
    assert_eq!(results.records[1].body["identifier"], "b");
}

#[tokio::test]
async fn test_count_uses_hits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecords"))
        .and(query_param("resultType", "hits"))
        .respond_with(xml(get_records_response(42, &[])))
        .expect(1)
        .mount(&server)
        .await;

    let matched = endpoint(&server)
        .count(&SearchOptions::for_schema(Schema::Dc))
        .await
        .unwrap();
    assert_eq!(matched, 42);
}

#[tokio::test]
async fn test_count_without_matched_value_fails() {
    let server = MockServer::start().await;
    let body = r#"<csw:GetRecordsResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2"><csw:SearchResults/></csw:GetRecordsResponse>"#;
    Mock::given(method("GET"))
        .respond_with(xml(body))
        .mount(&server)
        .await;

    let result = endpoint(&server).count(&SearchOptions::default()).await;
    assert!(matches!(result, Err(AppError::CountError(_))));
}

#[tokio::test]
async fn test_missing_namespace_enables_flag_and_retries_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecords"))
        .and(query_param_is_missing("namespace"))
        .respond_with(xml(exception_report(
            "InvalidParameterValue",
            "typeNames",
            "Qualified names need a namespace declared for prefix gmd",
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecords"))
        .and(query_param(
            "namespace",
            "xmlns(csw=http://www.opengis.net/cat/csw/2.0.2),xmlns(gmd=http://www.isotc211.org/2005/gmd)",
        ))
        .respond_with(xml(get_records_response(1, &[dc_record("a", "A")])))
        .expect(2)
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let results = endpoint
        .records(&SearchOptions::for_schema(Schema::Iso))
        .await
        .unwrap();
    assert_eq!(results.records.len(), 1);
    assert!(endpoint.has_compat_option(CompatOption::DefineNamespace));

    // The flag sticks for later calls.
    endpoint
        .records(&SearchOptions::for_schema(Schema::Iso))
        .await
        .unwrap();
    assert_eq!(
        endpoint.diagnostics().compat_options,
        vec!["define-namespace".to_string()]
    );
}

#[tokio::test]
async fn test_known_flag_exception_is_propagated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(xml(exception_report(
            "MissingParameterValue",
            "constraintLanguage",
            "constraintLanguage is required",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = endpoint_with(&server, &["define-constraint-language"]);
    let result = endpoint.records(&SearchOptions::default()).await;

    match result {
        Err(AppError::ProtocolException(exception)) => {
            assert_eq!(exception.exception_code, "MissingParameterValue");
        }
        other => panic!("expected a protocol exception, got {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_happens_only_once() {
    let server = MockServer::start().await;
    // Every answer asks for a new flag; only one retry is allowed.
    Mock::given(method("GET"))
        .and(query_param_is_missing("constraintLanguage"))
        .respond_with(xml(exception_report(
            "MissingParameterValue",
            "constraintLanguage",
            "required",
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("constraintLanguage", "CQL_TEXT"))
        .respond_with(xml(exception_report(
            "InvalidParameterValue",
            "outputSchema",
            "unsupported",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let result = endpoint.records(&SearchOptions::default()).await;

    assert!(matches!(result, Err(AppError::ProtocolException(_))));
    assert!(endpoint.has_compat_option(CompatOption::DefineConstraintLanguage));
    assert!(!endpoint.has_compat_option(CompatOption::NoEncodeQs));
}

#[tokio::test]
async fn test_no_encode_qs_sends_raw_values() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(xml(get_records_response(0, &[])))
        .mount(&server)
        .await;

    endpoint_with(&server, &["no-encode-qs"])
        .records(&SearchOptions::for_schema(Schema::Iso))
        .await
        .unwrap();
    endpoint(&server)
        .records(&SearchOptions::for_schema(Schema::Iso))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let raw = requests[0].url.query().unwrap_or_default().to_string();
    let encoded = requests[1].url.query().unwrap_or_default().to_string();
    assert!(raw.contains("typeNames=gmd:MD_Metadata"));
    assert!(raw.contains("outputSchema=http://www.isotc211.org/2005/gmd"));
    assert!(encoded.contains("typeNames=gmd%3AMD_Metadata"));
}

#[tokio::test]
async fn test_redirect_updates_service_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/csw"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/geonetwork/srv/csw"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/geonetwork/srv/csw"))
        .and(query_param("request", "GetCapabilities"))
        .respond_with(xml(CAPABILITIES))
        .expect(2)
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    endpoint.capabilities().await.unwrap();
    endpoint.capabilities().await.unwrap();

    let diagnostics = endpoint.diagnostics();
    assert_eq!(diagnostics.original_url, format!("{}/csw", server.uri()));
    assert_eq!(
        diagnostics.current_url,
        format!("{}/geonetwork/srv/csw", server.uri())
    );
    assert_eq!(diagnostics.redirections.len(), 1);
}

#[tokio::test]
async fn test_redirect_loop_fails_after_five_hops() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/csw"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/csw"))
        .expect(6)
        .mount(&server)
        .await;

    let result = endpoint(&server).capabilities().await;
    assert!(matches!(result, Err(AppError::RedirectLoop { hops: 5, .. })));
}

#[tokio::test]
async fn test_record_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecordById"))
        .and(query_param("id", "a"))
        .and(query_param("elementSetName", "brief"))
        .respond_with(xml(get_record_by_id_response(&[brief_record("a")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecordById"))
        .and(query_param("id", "gone"))
        .respond_with(xml(get_record_by_id_response(&[])))
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let brief = SearchOptions {
        element_set_name: Some(ElementSetName::Brief),
        ..SearchOptions::default()
    };

    let record = endpoint.record("a", &brief).await.unwrap();
    assert_eq!(record.element_type, "BriefRecord");

    let missing = endpoint.record("gone", &brief).await;
    assert!(matches!(missing, Err(AppError::RecordNotFound(id)) if id == "gone"));
}

#[tokio::test]
async fn test_progressive_mode_fetches_full_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecords"))
        .and(query_param("elementSetName", "brief"))
        .respond_with(xml(get_records_response(
            2,
            &[brief_record("a"), brief_record("b")],
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecordById"))
        .and(query_param("id", "a"))
        .and(query_param("elementSetName", "full"))
        .respond_with(xml(get_record_by_id_response(&[dc_record("a", "Full A")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecordById"))
        .and(query_param("id", "b"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let results = endpoint_with(&server, &["progressive-element-set-name"])
        .records(&SearchOptions::page(Schema::Dc, 0, 10))
        .await
        .unwrap();

    assert_eq!(results.records.len(), 2);
    assert_eq!(results.records[0].element_type, "Record");
    assert_eq!(results.records[0].body["title"], "Full A");
    assert_eq!(results.records[1].element_type, "BriefRecord");
}

#[tokio::test]
async fn test_harvest_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("resultType", "hits"))
        .respond_with(xml(get_records_response(3, &[])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("resultType", "results"))
        .and(query_param("startPosition", "1"))
        .respond_with(xml(get_records_response(
            3,
            &[dc_record("a", "A"), dc_record("b", "B")],
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("resultType", "results"))
        .and(query_param("startPosition", "3"))
        .respond_with(xml(get_records_response(3, &[dc_record("c", "C")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecordById"))
        .respond_with(xml(get_record_by_id_response(&[])))
        .mount(&server)
        .await;

    let config = HarvestConfig {
        step: 2,
        ..HarvestConfig::default()
    };
    let cache = [("old".to_string(), "hash-old".to_string())]
        .into_iter()
        .collect();
    let mut harvester = Harvester::new(Arc::new(endpoint(&server)), config)
        .unwrap()
        .with_cache(cache);

    let mut records = Vec::new();
    while let Some(item) = harvester.next().await {
        records.push(item.unwrap());
    }
    let report = harvester.report();

    assert_eq!(report.status, HarvestStatus::Successful);
    assert_eq!(report.counters.returned, 3);
    assert!(report.exhaustive);
    assert_eq!(records.len(), 4);
    assert_eq!(
        records
            .iter()
            .filter(|record| record.status == RecordStatus::Removed)
            .count(),
        1
    );
    assert_eq!(report.endpoint.current_url, format!("{}/csw", server.uri()));
}

#[tokio::test]
async fn test_concurrent_pages_retry_with_flag_enabled_by_another_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("resultType", "hits"))
        .respond_with(xml(get_records_response(4, &[])))
        .mount(&server)
        .await;
    // Both pages are in flight when the first exception comes back.
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecords"))
        .and(query_param("resultType", "results"))
        .and(query_param("elementSetName", "full"))
        .respond_with(
            xml(exception_report(
                "NoApplicableCode",
                "",
                "java.lang.IllegalArgumentException: elementName has invalid XPath : full",
            ))
            .set_delay(Duration::from_millis(200)),
        )
        .expect(2)
        .mount(&server)
        .await;
    for (start, ids) in [("1", ["a", "b"]), ("3", ["c", "d"])] {
        Mock::given(method("GET"))
            .and(query_param("request", "GetRecords"))
            .and(query_param("elementSetName", "brief"))
            .and(query_param("startPosition", start))
            .respond_with(xml(get_records_response(
                4,
                &[brief_record(ids[0]), brief_record(ids[1])],
            )))
            .mount(&server)
            .await;
    }
    for id in ["a", "b", "c", "d"] {
        Mock::given(method("GET"))
            .and(query_param("request", "GetRecordById"))
            .and(query_param("id", id))
            .respond_with(xml(get_record_by_id_response(&[dc_record(
                id,
                &format!("Full {}", id),
            )])))
            .mount(&server)
            .await;
    }

    let endpoint = Arc::new(endpoint(&server));
    let config = HarvestConfig {
        step: 2,
        concurrency: 2,
        ..HarvestConfig::default()
    };
    let report = Harvester::new(endpoint.clone(), config)
        .unwrap()
        .run()
        .await;

    assert_eq!(report.status, HarvestStatus::Successful);
    assert_eq!(report.counters.returned, 4);
    assert_eq!(report.counters.missed, 0);
    assert_eq!(report.counters.errored_pages, 0);
    assert_eq!(report.counters.types.get("Record"), Some(&4));
    assert!(report.exhaustive);
    assert!(endpoint.has_compat_option(CompatOption::ProgressiveElementSetName));
}

fn gzip(body: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.as_bytes()).expect("write gzip");
    encoder.finish().expect("finish gzip")
}

#[tokio::test]
async fn test_gzip_body_is_decompressed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("request", "GetRecords"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "gzip")
                .set_body_raw(gzip(&get_records_response(1, &[dc_record("a", "A")])), XML),
        )
        .expect(1)
        .mount(&server)
        .await;

    let results = endpoint(&server)
        .records(&SearchOptions::for_schema(Schema::Dc))
        .await
        .unwrap();
    assert_eq!(results.records.len(), 1);
    assert_eq!(results.records[0].body["title"], "A");

    let requests = server.received_requests().await.unwrap();
    let accept = requests[0]
        .headers
        .get("accept-encoding")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(accept.contains("gzip"));
}

#[tokio::test]
async fn test_gzip_disabled_does_not_ask_for_compression() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(xml(get_records_response(0, &[])))
        .expect(1)
        .mount(&server)
        .await;

    let options = EndpointOptions {
        http: HttpConfig {
            gzip: false,
            ..HttpConfig::default()
        },
        ..EndpointOptions::default()
    };
    ServiceEndpoint::with_options(&format!("{}/csw", server.uri()), options)
        .unwrap()
        .records(&SearchOptions::default())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let accept = requests[0]
        .headers
        .get("accept-encoding")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(!accept.contains("gzip"));
}
