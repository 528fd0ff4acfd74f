//! Workarounds for non-conformant CSW servers.
//!
//! Servers declare what they dislike through `ExceptionReport` documents. A
//! fixed, ordered rule table maps those exceptions to compatibility flags.
//! Once enabled, a flag changes how every later request of the endpoint is
//! built, and is never disabled.

use csw_core::{CompatOption, CompatOptionSet, ProtocolException};

use crate::service_url::Query;

/// Value of `constraintLanguage` when `define-constraint-language` is enabled.
pub const CONSTRAINT_LANGUAGE: &str = "CQL_TEXT";

/// Value of `namespace` when `define-namespace` is enabled.
pub const NAMESPACE_DECLARATION: &str =
    "xmlns(csw=http://www.opengis.net/cat/csw/2.0.2),xmlns(gmd=http://www.isotc211.org/2005/gmd)";

struct Rule {
    option: CompatOption,
    matches: fn(&ProtocolException) -> bool,
}

fn missing_namespace_prefix(ex: &ProtocolException) -> bool {
    ex.exception_code == "InvalidParameterValue"
        && ex.locator_lowercase() == "typenames"
        && ex.message.contains("namespace")
        && ex.message.contains("prefix")
}

fn badly_encoded_parameter(ex: &ProtocolException) -> bool {
    ex.exception_code == "InvalidParameterValue"
        && matches!(ex.locator_lowercase().as_str(), "typenames" | "outputschema")
}

fn missing_constraint_language(ex: &ProtocolException) -> bool {
    ex.exception_code == "MissingParameterValue" && ex.locator_lowercase() == "constraintlanguage"
}

fn invalid_element_name_xpath(ex: &ProtocolException) -> bool {
    ex.exception_code == "NoApplicableCode" && ex.message.contains("elementName has invalid XPath")
}

/// Evaluated in order; the first rule whose flag is not yet enabled wins.
const RULES: [Rule; 4] = [
    Rule {
        option: CompatOption::DefineNamespace,
        matches: missing_namespace_prefix,
    },
    Rule {
        option: CompatOption::NoEncodeQs,
        matches: badly_encoded_parameter,
    },
    Rule {
        option: CompatOption::DefineConstraintLanguage,
        matches: missing_constraint_language,
    },
    Rule {
        option: CompatOption::ProgressiveElementSetName,
        matches: invalid_element_name_xpath,
    },
];

/// Adds the parameters required by the enabled flags to `query`.
pub fn apply_compat(options: &CompatOptionSet, query: &mut Query) {
    if options.contains(CompatOption::DefineConstraintLanguage)
        && query.request_name() == Some("GetRecords")
    {
        query.set("constraintLanguage", CONSTRAINT_LANGUAGE);
    }
    if options.contains(CompatOption::DefineNamespace) {
        query.set("namespace", NAMESPACE_DECLARATION);
    }
}

/// Returns the flag a protocol exception calls for, if it is not enabled yet.
pub fn detect_option(options: &CompatOptionSet, exception: &ProtocolException) -> Option<CompatOption> {
    RULES
        .iter()
        .filter(|rule| !options.contains(rule.option))
        .find(|rule| (rule.matches)(exception))
        .map(|rule| rule.option)
}

/// Compatibility flags of one endpoint.
#[derive(Debug, Clone, Default)]
pub struct CompatibilityManager {
    options: CompatOptionSet,
}

impl CompatibilityManager {
    pub fn new(preset: CompatOptionSet) -> Self {
        Self { options: preset }
    }

    pub fn options(&self) -> &CompatOptionSet {
        &self.options
    }

    pub fn has(&self, option: CompatOption) -> bool {
        self.options.contains(option)
    }

    /// False once `no-encode-qs` is enabled.
    pub fn encode_query(&self) -> bool {
        !self.has(CompatOption::NoEncodeQs)
    }

    pub fn apply(&self, query: &mut Query) {
        apply_compat(&self.options, query);
    }

    /// Enables the flag `exception` calls for. Returns it when newly enabled,
    /// meaning the failed call is worth retrying.
    pub fn detect(&mut self, exception: &ProtocolException) -> Option<CompatOption> {
        let option = detect_option(&self.options, exception)?;
        self.options.insert(option);
        tracing::info!(
            option = option.as_str(),
            exception = %exception,
            "Enabled compatibility option"
        );
        Some(option)
    }
}
