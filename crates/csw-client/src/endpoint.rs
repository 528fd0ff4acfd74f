use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use csw_core::records::record_identifier;
use csw_core::{
    AppError, CatalogClient, CompatOption, CompatOptionSet, ElementSetName, EndpointDiagnostics,
    HttpConfig, ProtocolException, ProtocolResult, RawRecord, ResultType, SearchOptions,
    SearchResults,
};
use futures::stream::{self, StreamExt};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};

use crate::compat::{detect_option, CompatibilityManager};
use crate::parser::{ProtocolParser, XmlProtocolParser};
use crate::service_url::{Query, ServiceUrl};

/// Fixed protocol identifiers sent with every request.
const SERVICE: &str = "CSW";
const VERSION: &str = "2.0.2";

/// Defaults applied to GetRecords queries.
const DEFAULT_TYPE_NAMES: &str = "csw:Record";
const DEFAULT_MAX_RECORDS: u64 = 10;

/// Individual GetRecordById requests in flight in progressive mode.
const PROGRESSIVE_CONCURRENCY: usize = 4;

/// Options of a [`ServiceEndpoint`].
#[derive(Debug, Clone, Default)]
pub struct EndpointOptions {
    pub http: HttpConfig,
    /// Parameters appended to every request, after `service` and `version`.
    pub extra_params: Vec<(String, String)>,
    /// Compatibility flags known in advance.
    pub compat_options: CompatOptionSet,
    /// Log every request URL at info level instead of debug.
    pub log_requests: bool,
}

/// Mutable state shared by every call on one endpoint.
#[derive(Debug)]
struct EndpointState {
    service_url: ServiceUrl,
    compat: CompatibilityManager,
}

/// HTTP client for one CSW 2.0.2 service.
///
/// The endpoint learns as it goes: redirects update its base URL and
/// declared protocol exceptions may enable compatibility flags. Both persist
/// for the lifetime of the endpoint and are shared by every caller.
///
/// # Examples
///
/// ```no_run
/// use csw_client::ServiceEndpoint;
/// use csw_core::{Schema, SearchOptions};
///
/// # async fn example() -> Result<(), csw_core::AppError> {
/// let endpoint = ServiceEndpoint::new("https://www.geopicardie.fr/geonetwork/srv/fre/csw")?;
/// let matched = endpoint.count(&SearchOptions::for_schema(Schema::Iso)).await?;
/// println!("{} records", matched);
/// # Ok(())
/// # }
/// ```
pub struct ServiceEndpoint {
    client: Client,
    parser: Box<dyn ProtocolParser>,
    extra_params: Query,
    log_requests: bool,
    timeout: Duration,
    state: Mutex<EndpointState>,
}

impl ServiceEndpoint {
    /// Creates an endpoint with default options.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the URL is invalid.
    pub fn new(url: &str) -> Result<Self, AppError> {
        Self::with_options(url, EndpointOptions::default())
    }

    /// Creates an endpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the URL is invalid.
    /// Returns `AppError::NetworkError` if the HTTP client cannot be built.
    pub fn with_options(url: &str, options: EndpointOptions) -> Result<Self, AppError> {
        let service_url = ServiceUrl::parse(url)?;

        // Redirects are followed by hand to keep track of the service URL.
        let client = Client::builder()
            .user_agent(options.http.user_agent.as_str())
            .timeout(options.http.timeout)
            .gzip(options.http.gzip)
            .redirect(Policy::none())
            .build()
            .map_err(|e| AppError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            parser: Box::new(XmlProtocolParser),
            extra_params: options.extra_params.into_iter().collect(),
            log_requests: options.log_requests,
            timeout: options.http.timeout,
            state: Mutex::new(EndpointState {
                service_url,
                compat: CompatibilityManager::new(options.compat_options),
            }),
        })
    }

    /// Replaces the response parser.
    pub fn with_parser(mut self, parser: impl ProtocolParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    fn state(&self) -> MutexGuard<'_, EndpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_compat_option(&self, option: CompatOption) -> bool {
        self.state().compat.has(option)
    }

    /// Current base URL, redirections and compatibility flags.
    pub fn diagnostics(&self) -> EndpointDiagnostics {
        let state = self.state();
        EndpointDiagnostics {
            original_url: state.service_url.original().to_string(),
            current_url: state.service_url.current().to_string(),
            redirections: state.service_url.redirections().to_vec(),
            compat_options: state.compat.options().names(),
        }
    }

    // =========================================================================
    // Raw protocol operations
    // =========================================================================

    /// Issues one logical request, following redirects.
    ///
    /// The full query is rebuilt for every attempt from the fixed
    /// identifiers, the extra parameters, `query` and the compatibility flags
    /// enabled at that time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RedirectLoop` past the hop limit,
    /// `AppError::HttpStatus` for 4xx/5xx responses and
    /// `AppError::ResponseFormat` when the response is not XML.
    pub async fn request(&self, query: &Query) -> Result<Response, AppError> {
        loop {
            let url = {
                let state = self.state();
                let mut full: Query = [("service", SERVICE), ("version", VERSION)]
                    .into_iter()
                    .collect();
                full.merge(&self.extra_params);
                full.merge(query);
                state.compat.apply(&mut full);
                state
                    .service_url
                    .with_query(&full, state.compat.encode_query())
            };

            if self.log_requests {
                tracing::info!(url = %url, "CSW request");
            } else {
                tracing::debug!(url = %url, "CSW request");
            }

            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| self.map_reqwest_error(e))?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| AppError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    })?;
                let mut state = self.state();
                let target = state.service_url.follow(location)?;
                tracing::info!(
                    status = status.as_u16(),
                    target = %target,
                    "Following redirection"
                );
                continue;
            }

            if status.as_u16() >= 400 {
                return Err(AppError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();
            if !content_type.contains("xml") {
                return Err(AppError::ResponseFormat(if content_type.is_empty() {
                    "missing content type".to_string()
                } else {
                    format!("content type is {}", content_type)
                }));
            }

            return Ok(response);
        }
    }

    pub async fn get_capabilities(&self) -> Result<Response, AppError> {
        self.request(&capabilities_query()).await
    }

    pub async fn get_records(&self, options: &SearchOptions) -> Result<Response, AppError> {
        self.request(&get_records_query(options)).await
    }

    pub async fn get_record_by_id(
        &self,
        id: &str,
        options: &SearchOptions,
    ) -> Result<Response, AppError> {
        self.request(&get_record_by_id_query(id, options)).await
    }

    // =========================================================================
    // Parsed operations
    // =========================================================================

    /// Capabilities document of the service.
    pub async fn capabilities(&self) -> Result<serde_json::Value, AppError> {
        self.retry_on_new_compat(move || async move {
            match self.fetch(&capabilities_query()).await? {
                ProtocolResult::Capabilities(body) => Ok(body),
                other => Err(unexpected("Capabilities", &other)),
            }
        })
        .await
    }

    /// One page of records.
    ///
    /// With `progressive-element-set-name` enabled, records are listed in
    /// `brief` mode and then fetched one by one in `full` mode. A record whose
    /// full version cannot be fetched is kept in its brief form.
    pub async fn records(&self, options: &SearchOptions) -> Result<SearchResults, AppError> {
        self.retry_on_new_compat(move || async move {
            let progressive = options.result_type != Some(ResultType::Hits)
                && self.has_compat_option(CompatOption::ProgressiveElementSetName);
            if progressive {
                self.progressive_records(options).await
            } else {
                self.search(options).await
            }
        })
        .await
    }

    /// A single record by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RecordNotFound` when the response holds no record.
    pub async fn record(&self, id: &str, options: &SearchOptions) -> Result<RawRecord, AppError> {
        self.retry_on_new_compat(move || async move {
            match self.fetch(&get_record_by_id_query(id, options)).await? {
                ProtocolResult::GetRecordByIdResponse(records) => records
                    .into_iter()
                    .next()
                    .ok_or_else(|| AppError::RecordNotFound(id.to_string())),
                other => Err(unexpected("GetRecordByIdResponse", &other)),
            }
        })
        .await
    }

    /// Number of records matching `options`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CountError` if the server reports no usable count.
    pub async fn count(&self, options: &SearchOptions) -> Result<u64, AppError> {
        let hits = SearchOptions {
            result_type: Some(ResultType::Hits),
            ..options.clone()
        };
        let results = self.records(&hits).await?;

        match results.matched {
            Some(matched) if matched >= 0 => Ok(matched as u64),
            Some(matched) => Err(AppError::CountError(format!(
                "numberOfRecordsMatched is negative ({})",
                matched
            ))),
            None => Err(AppError::CountError(
                "numberOfRecordsMatched is missing".to_string(),
            )),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Runs `operation`, and runs it once more if the protocol exception it
    /// failed with calls for a flag the attempt was made without.
    ///
    /// The flag may have been enabled by a concurrent call in the meantime,
    /// which still warrants the retry.
    async fn retry_on_new_compat<T, F, Fut>(&self, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        let attempted_with = self.state().compat.options().clone();
        match operation().await {
            Err(AppError::ProtocolException(exception)) => {
                if self.learn(&exception, &attempted_with) {
                    operation().await
                } else {
                    Err(AppError::ProtocolException(exception))
                }
            }
            other => other,
        }
    }

    /// True when `exception` calls for a flag that is enabled now but was
    /// absent from `attempted_with`.
    fn learn(&self, exception: &ProtocolException, attempted_with: &CompatOptionSet) -> bool {
        let mut state = self.state();
        state.compat.detect(exception).is_some()
            || detect_option(attempted_with, exception).is_some()
    }

    /// Requests and parses. Exception reports become errors.
    async fn fetch(&self, query: &Query) -> Result<ProtocolResult, AppError> {
        let response = self.request(query).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        match self.parser.parse(&body)? {
            ProtocolResult::ExceptionReport(exception) => {
                tracing::debug!(exception = %exception, "Server declared an exception");
                Err(AppError::ProtocolException(exception))
            }
            result => Ok(result),
        }
    }

    async fn search(&self, options: &SearchOptions) -> Result<SearchResults, AppError> {
        match self.fetch(&get_records_query(options)).await? {
            ProtocolResult::GetRecordsResponse(results) => Ok(results),
            other => Err(unexpected("GetRecordsResponse", &other)),
        }
    }

    async fn progressive_records(
        &self,
        options: &SearchOptions,
    ) -> Result<SearchResults, AppError> {
        let brief = SearchOptions {
            element_set_name: Some(ElementSetName::Brief),
            ..options.clone()
        };
        let listing = self.search(&brief).await?;

        let full = SearchOptions {
            schema: options.schema,
            element_set_name: Some(ElementSetName::Full),
            ..SearchOptions::default()
        };
        let records: Vec<RawRecord> = stream::iter(listing.records)
            .map(|raw| {
                let full = &full;
                async move {
                    let Some(id) = record_identifier(&raw) else {
                        return raw;
                    };
                    match self.record(&id, full).await {
                        Ok(record) => record,
                        Err(e) => {
                            tracing::debug!(id = id.as_str(), error = %e, "Keeping brief record");
                            raw
                        }
                    }
                }
            })
            .buffered(PROGRESSIVE_CONCURRENCY)
            .collect()
            .await;

        Ok(SearchResults {
            records,
            matched: listing.matched,
            returned: listing.returned,
        })
    }

    fn map_reqwest_error(&self, error: reqwest::Error) -> AppError {
        if error.is_timeout() {
            AppError::Timeout(self.timeout.as_secs())
        } else if error.is_connect() {
            AppError::NetworkError(format!("Connection failed: {}", error))
        } else {
            AppError::NetworkError(error.to_string())
        }
    }
}

#[async_trait]
impl CatalogClient for ServiceEndpoint {
    async fn count(&self, options: &SearchOptions) -> Result<u64, AppError> {
        ServiceEndpoint::count(self, options).await
    }

    async fn records(&self, options: &SearchOptions) -> Result<SearchResults, AppError> {
        ServiceEndpoint::records(self, options).await
    }

    async fn record(&self, id: &str, options: &SearchOptions) -> Result<RawRecord, AppError> {
        ServiceEndpoint::record(self, id, options).await
    }

    fn diagnostics(&self) -> EndpointDiagnostics {
        ServiceEndpoint::diagnostics(self)
    }
}

fn unexpected(expected: &'static str, actual: &ProtocolResult) -> AppError {
    AppError::UnexpectedResponse {
        expected,
        actual: actual.kind().to_string(),
    }
}

fn capabilities_query() -> Query {
    [("request", "GetCapabilities")].into_iter().collect()
}

fn apply_schema(query: &mut Query, options: &SearchOptions) {
    if let Some(schema) = options.schema {
        query.set("typeNames", schema.type_names());
        query.set("outputSchema", schema.output_schema());
    }
}

/// GetRecords parameters, with protocol defaults for unset options.
pub fn get_records_query(options: &SearchOptions) -> Query {
    let mut query: Query = [("request", "GetRecords")].into_iter().collect();
    query.set("typeNames", DEFAULT_TYPE_NAMES);
    apply_schema(&mut query, options);
    query.set(
        "resultType",
        options.result_type.unwrap_or_default().as_str(),
    );
    query.set(
        "elementSetName",
        options.element_set_name.unwrap_or_default().as_str(),
    );
    query.set(
        "maxRecords",
        options.max_records.unwrap_or(DEFAULT_MAX_RECORDS).to_string(),
    );
    if let Some(start_position) = options.start_position {
        query.set("startPosition", start_position.to_string());
    }
    query
}

/// GetRecordById parameters, with protocol defaults for unset options.
pub fn get_record_by_id_query(id: &str, options: &SearchOptions) -> Query {
    let mut query: Query = [("request", "GetRecordById")].into_iter().collect();
    query.set("id", id);
    query.set("typeNames", DEFAULT_TYPE_NAMES);
    apply_schema(&mut query, options);
    query.set(
        "elementSetName",
        options.element_set_name.unwrap_or_default().as_str(),
    );
    query
}
