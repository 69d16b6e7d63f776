//! Channel endpoint naming and URL resolution.

use std::fmt;

use super::transport::TransportError;

/// What a channel carries. Each concern gets its own socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Concern {
    /// Presenter control: commands out, presenter status in.
    Presenter,
    /// Analytics stream: refresh signals and live counters.
    Analytics,
    /// Live display stream: what the audience screen shows.
    Display,
}

impl Concern {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Presenter => "presenter",
            Self::Analytics => "analytics",
            Self::Display => "display",
        }
    }
}

impl fmt::Display for Concern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical channel address: one survey, one concern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub survey_id: String,
    pub concern: Concern,
}

impl Endpoint {
    #[must_use]
    pub fn new(survey_id: impl Into<String>, concern: Concern) -> Self {
        Self { survey_id: survey_id.into(), concern }
    }

    /// Relative path, e.g. `/ws/surveys/42/presenter`.
    #[must_use]
    pub fn path(&self) -> String {
        format!("/ws/surveys/{}/{}", self.survey_id, self.concern)
    }

    /// Absolute websocket URL against an HTTP(S) base URL.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] for an unusable survey id or
    /// base URL scheme.
    pub fn resolve(&self, base_url: &str) -> Result<String, TransportError> {
        let id = self.survey_id.as_str();
        if id.is_empty() || id.contains(['/', '?', '#', ' ']) {
            return Err(TransportError::InvalidUrl(format!("bad survey id `{id}`")));
        }
        resolve_ws_url(base_url, &self.path())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.survey_id, self.concern)
    }
}

/// Upgrade a path to a websocket URL using the base URL's scheme.
///
/// Already-absolute `ws://`/`wss://` paths pass through unchanged.
///
/// # Errors
///
/// Returns [`TransportError::InvalidUrl`] when the base URL is not http(s).
pub fn resolve_ws_url(base_url: &str, path: &str) -> Result<String, TransportError> {
    if path.starts_with("ws://") || path.starts_with("wss://") {
        return Ok(path.to_owned());
    }
    let base = base_url.trim_end_matches('/');
    let path = if path.starts_with('/') { path.to_owned() } else { format!("/{path}") };

    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}{path}"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}{path}"));
    }

    Err(TransportError::InvalidUrl(base_url.to_owned()))
}

#[cfg(test)]
#[path = "endpoint_test.rs"]
mod tests;
