//! Locale-aware HTTP status message resolution.
//!
//! Status errors carry a human-readable message resolved here: a per-call
//! locale override wins over the client default locale, configured
//! overrides win over the built-in English table, and unknown statuses
//! fall back to a generic line carrying the numeric status.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Locale used when none is configured
pub const DEFAULT_LOCALE: &str = "en";

static DEFAULT_MESSAGES: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (400, "Invalid request."),
        (401, "Authentication required."),
        (403, "You do not have permission to perform this action."),
        (404, "Resource not found."),
        (408, "The request timed out."),
        (409, "Conflict with the current state of the resource."),
        (422, "The submitted data is invalid."),
        (429, "Too many requests. Please try again later."),
        (500, "An unexpected server error occurred."),
        (502, "Bad gateway."),
        (503, "Service temporarily unavailable."),
        (504, "Gateway timeout."),
    ])
});

/// Per-locale status message tables with English defaults
#[derive(Debug, Clone, Default)]
pub struct ErrorMessages {
    overrides: HashMap<String, HashMap<u16, String>>,
}

impl ErrorMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register messages for a locale, merging over any already present
    pub fn with_locale<I, S>(mut self, locale: &str, messages: I) -> Self
    where
        I: IntoIterator<Item = (u16, S)>,
        S: Into<String>,
    {
        let table = self.overrides.entry(locale.to_string()).or_default();
        for (status, message) in messages {
            table.insert(status, message.into());
        }
        self
    }

    /// Resolve the message for `status` in `locale`
    ///
    /// Falls back to the built-in English table, then to a generic message
    /// naming the status.
    pub fn resolve(&self, status: u16, locale: &str) -> String {
        if let Some(message) = self.overrides.get(locale).and_then(|table| table.get(&status)) {
            return message.clone();
        }

        DEFAULT_MESSAGES
            .get(&status)
            .map(|message| (*message).to_string())
            .unwrap_or_else(|| format!("Request failed with status {status}."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates `ErrorMessages::resolve` behavior for the built-in
    /// defaults scenario.
    ///
    /// Assertions:
    /// - Confirms known statuses resolve to their English defaults.
    /// - Confirms unknown statuses fall back to the generic message.
    #[test]
    fn test_default_messages() {
        let messages = ErrorMessages::new();

        assert_eq!(messages.resolve(404, DEFAULT_LOCALE), "Resource not found.");
        assert_eq!(
            messages.resolve(429, DEFAULT_LOCALE),
            "Too many requests. Please try again later."
        );
        assert_eq!(messages.resolve(418, DEFAULT_LOCALE), "Request failed with status 418.");
    }

    /// Validates `ErrorMessages::with_locale` behavior for the override
    /// precedence scenario.
    ///
    /// Assertions:
    /// - Confirms a configured locale override wins over the default.
    /// - Confirms other statuses in that locale still fall back.
    #[test]
    fn test_locale_overrides() {
        let messages =
            ErrorMessages::new().with_locale("fr", [(404, "Ressource introuvable.")]);

        assert_eq!(messages.resolve(404, "fr"), "Ressource introuvable.");
        assert_eq!(messages.resolve(500, "fr"), "An unexpected server error occurred.");
        assert_eq!(messages.resolve(404, DEFAULT_LOCALE), "Resource not found.");
    }

    /// Validates `ErrorMessages::with_locale` behavior for the merge
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms repeated registration merges rather than replaces.
    #[test]
    fn test_repeated_registration_merges() {
        let messages = ErrorMessages::new()
            .with_locale("fr", [(404, "Ressource introuvable.")])
            .with_locale("fr", [(500, "Erreur interne du serveur.")]);

        assert_eq!(messages.resolve(404, "fr"), "Ressource introuvable.");
        assert_eq!(messages.resolve(500, "fr"), "Erreur interne du serveur.");
    }
}
