//! Strict link extraction for the live path
//!
//! Only URLs that match a provider's share-URL grammar are accepted. Text
//! is scanned first, then hyperlink entities, then inline buttons; a later
//! source overrides an earlier one for the same provider. Buttons that point
//! at an unrecognised URL may be resolved through a redirect.

use std::sync::Arc;

use super::redirect::RedirectResolver;
use crate::models::LinkMap;
use crate::providers::ProviderCatalog;

/// Rich-text annotations attached to a post
#[derive(Debug, Clone, Default)]
pub struct RichAnnotations {
    /// Targets of embedded hyperlinks
    pub entity_urls: Vec<String>,
    /// Targets of inline URL buttons
    pub button_urls: Vec<String>,
}

impl RichAnnotations {
    pub fn is_empty(&self) -> bool {
        self.entity_urls.is_empty() && self.button_urls.is_empty()
    }
}

pub struct StrictExtractor {
    catalog: Arc<ProviderCatalog>,
}

impl StrictExtractor {
    pub fn new(catalog: Arc<ProviderCatalog>) -> Self {
        Self { catalog }
    }

    /// Strict links found in plain text; the last hit per provider wins.
    pub fn from_text(&self, text: &str) -> LinkMap {
        let mut links = LinkMap::new();
        for hit in self.catalog.find_strict(text) {
            links.insert(hit.provider, hit.url);
        }
        links
    }

    /// Merge entity and button targets into `links`. Returns the button URLs
    /// that matched no grammar.
    pub fn merge_annotations(&self, annotations: &RichAnnotations, links: &mut LinkMap) -> Vec<String> {
        for url in &annotations.entity_urls {
            if let Some((provider, link)) = self.catalog.match_strict(url) {
                links.insert(provider, link);
            }
        }

        let mut unresolved = Vec::new();
        for url in &annotations.button_urls {
            match self.catalog.match_strict(url) {
                Some((provider, link)) => {
                    links.insert(provider, link);
                }
                None => unresolved.push(url.clone()),
            }
        }
        unresolved
    }

    /// Full strict pass including redirect resolution of unmatched buttons
    pub async fn extract(
        &self,
        text: &str,
        annotations: &RichAnnotations,
        resolver: Option<&dyn RedirectResolver>,
    ) -> LinkMap {
        let mut links = self.from_text(text);
        let unresolved = self.merge_annotations(annotations, &mut links);

        if let Some(resolver) = resolver {
            for url in unresolved {
                if let Some((provider, link)) = resolver.resolve(&url).await {
                    log::debug!("[strict] Button {} resolved to {} link", url, provider);
                    links.insert(provider, link);
                }
            }
        }
        links
    }
}
