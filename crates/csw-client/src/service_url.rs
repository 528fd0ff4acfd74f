//! Service URL, redirect state and query strings.

use csw_core::AppError;
use url::form_urlencoded;
use url::Url;

/// Redirections followed over the lifetime of an endpoint.
pub const MAX_HOPS: usize = 5;

/// The base URL of a CSW service, updated as redirects are followed.
#[derive(Debug, Clone)]
pub struct ServiceUrl {
    original: Url,
    current: Url,
    redirections: Vec<String>,
}

impl ServiceUrl {
    /// Parses a service URL. Query string and fragment are discarded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the input is not an absolute
    /// http(s) URL.
    pub fn parse(input: &str) -> Result<Self, AppError> {
        let mut url = Url::parse(input.trim())
            .map_err(|e| AppError::InvalidUrl(format!("{}: {}", input, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::InvalidUrl(format!(
                "{}: unsupported scheme '{}'",
                input,
                url.scheme()
            )));
        }
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self {
            original: url.clone(),
            current: url,
            redirections: Vec::new(),
        })
    }

    pub fn original(&self) -> &Url {
        &self.original
    }

    pub fn current(&self) -> &Url {
        &self.current
    }

    /// Redirection targets, in the order they were followed.
    pub fn redirections(&self) -> &[String] {
        &self.redirections
    }

    pub fn hops(&self) -> usize {
        self.redirections.len()
    }

    /// Follows a redirect `location`, absolute or relative to the current URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RedirectLoop` once [`MAX_HOPS`] redirections were
    /// already followed, and `AppError::InvalidUrl` for unusable targets.
    pub fn follow(&mut self, location: &str) -> Result<&Url, AppError> {
        if self.hops() >= MAX_HOPS {
            return Err(AppError::RedirectLoop {
                hops: self.hops(),
                location: location.to_string(),
            });
        }

        let mut target = self
            .current
            .join(location)
            .map_err(|e| AppError::InvalidUrl(format!("{}: {}", location, e)))?;
        target.set_query(None);
        target.set_fragment(None);

        self.redirections.push(target.to_string());
        self.current = target;
        Ok(&self.current)
    }

    /// The current URL with `query` attached.
    pub fn with_query(&self, query: &Query, encode: bool) -> Url {
        let mut url = self.current.clone();
        let serialized = query.to_query_string(encode);
        url.set_query(Some(&serialized));
        url
    }
}

/// Ordered protocol parameters of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing any previous value in place.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.params.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Value of the `request` parameter (`GetRecords`, ...).
    pub fn request_name(&self) -> Option<&str> {
        self.get("request")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Extends with the parameters of `other`, which take precedence.
    pub fn merge(&mut self, other: &Query) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    /// Serializes the parameters. Without `encode`, values are written as is.
    pub fn to_query_string(&self, encode: bool) -> String {
        if encode {
            form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.iter())
                .finish()
        } else {
            self.iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect::<Vec<_>>()
                .join("&")
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Query::new();
        for (key, value) in iter {
            let key = key.into();
            query.set(&key, value);
        }
        query
    }
}
