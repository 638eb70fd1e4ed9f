//! Report document links served by an external renderer.

use intake_core::DocumentRenderer;

/// `{base}/reports/{id}` when a renderer base URL is configured.
#[derive(Debug, Clone, Default)]
pub struct ReportLinks {
    base: Option<String>,
}

impl ReportLinks {
    pub fn new(base: Option<String>) -> Self {
        let base = base
            .map(|b| b.trim().trim_end_matches('/').to_string())
            .filter(|b| !b.is_empty());
        Self { base }
    }

    pub fn is_configured(&self) -> bool {
        self.base.is_some()
    }
}

impl DocumentRenderer for ReportLinks {
    fn document_url_for(&self, record_id: &str) -> Option<String> {
        self.base
            .as_ref()
            .map(|base| format!("{}/reports/{}", base, record_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_links_only_when_configured() {
        let links = ReportLinks::new(Some("https://reports.example.org/".into()));
        assert_eq!(
            links.document_url_for("P1042").as_deref(),
            Some("https://reports.example.org/reports/P1042")
        );
        assert!(ReportLinks::new(Some("  ".into())).document_url_for("P1").is_none());
        assert!(!ReportLinks::new(None).is_configured());
    }
}
