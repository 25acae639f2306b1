//! Event enrichment
//!
//! Turns one raw MISP event into graph changes: every recognized attribute
//! becomes (or reuses) a node, gets tagged with its category and the
//! event's generic tags, and receives a context record pointing back at
//! the event.

use std::sync::Arc;
use tracing::{debug, error};
use vigil_core::{ContextRecord, GraphStore, NodeKind};
use vigil_misp::{RawAttribute, RawEvent};

use crate::{EnrichError, FeedInstance};

const EXTERNAL_ANALYSIS: &str = "External analysis";
const GALAXY_MARKER: &str = "misp-galaxy";
const CONTEXT_SEPARATOR: &str = "\r\n";

/// MISP attribute types imported as observables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Domain,
    Hostname,
    IpSrc,
    IpDst,
    Url,
    Md5,
    Sha1,
    Sha256,
    Btc,
    EmailSrc,
    EmailDst,
}

impl AttributeType {
    /// Recognize a MISP type name. Anything else is not imported.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "domain" => AttributeType::Domain,
            "hostname" => AttributeType::Hostname,
            "ip-src" => AttributeType::IpSrc,
            "ip-dst" => AttributeType::IpDst,
            "url" => AttributeType::Url,
            "md5" => AttributeType::Md5,
            "sha1" => AttributeType::Sha1,
            "sha256" => AttributeType::Sha256,
            "btc" => AttributeType::Btc,
            "email-src" => AttributeType::EmailSrc,
            "email-dst" => AttributeType::EmailDst,
            _ => return None,
        })
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            AttributeType::Domain | AttributeType::Hostname => NodeKind::Hostname,
            AttributeType::IpSrc | AttributeType::IpDst => NodeKind::Ip,
            AttributeType::Url => NodeKind::Url,
            AttributeType::Md5 | AttributeType::Sha1 | AttributeType::Sha256 => NodeKind::Hash,
            AttributeType::Btc => NodeKind::Bitcoin,
            AttributeType::EmailSrc | AttributeType::EmailDst => NodeKind::Email,
        }
    }
}

/// Event tags split by the instance's galaxy filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSplit {
    /// Applied to every node created from the event
    pub generic: Vec<String>,
    /// Surfaced in context as `galaxies`
    pub galaxies: Vec<String>,
}

impl TagSplit {
    /// Without a filter every tag is generic. With one, galaxy tags are
    /// recorded as galaxies and any tag matching a filter pattern is kept
    /// out of the generic set.
    pub fn classify<'a>(tags: impl IntoIterator<Item = &'a str>, filter: &[String]) -> Self {
        let mut split = TagSplit::default();

        for tag in tags {
            if filter.is_empty() {
                split.generic.push(tag.to_string());
                continue;
            }

            if tag.contains(GALAXY_MARKER) {
                split.galaxies.push(tag.to_string());
            }
            if !filter.iter().any(|pattern| tag.contains(pattern.as_str())) {
                split.generic.push(tag.to_string());
            }
        }

        split
    }
}

/// What one event did to the graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    /// Attributes that created a new node
    pub created: usize,
    /// Attributes that landed on an existing node
    pub updated: usize,
    /// Attributes not imported (unrecognized type or external analysis)
    pub skipped: usize,
    /// Attributes that failed and were dropped
    pub failed: usize,
}

impl EnrichmentReport {
    pub fn merge(&mut self, other: EnrichmentReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Folds raw events into the graph
#[derive(Clone)]
pub struct EventEnricher {
    store: Arc<GraphStore>,
}

impl EventEnricher {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Enrich the graph from one event. Attribute failures are logged and
    /// counted, never propagated.
    pub fn enrich(&self, instance: &FeedInstance, event: &RawEvent) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();
        let draft = self.context_draft(instance, event);
        let tags = TagSplit::classify(event.tag_names(), &instance.galaxy_filter);

        for attribute in &event.attributes {
            if attribute.category == EXTERNAL_ANALYSIS {
                report.skipped += 1;
                continue;
            }
            let Some(attr_type) = AttributeType::parse(&attribute.attr_type) else {
                report.skipped += 1;
                continue;
            };

            match self.import_attribute(instance, event, attribute, attr_type, &draft, &tags) {
                Ok(true) => report.created += 1,
                Ok(false) => report.updated += 1,
                Err(e) => {
                    let label = if attribute.value.is_empty() {
                        attribute.id.as_deref().unwrap_or("<unknown>")
                    } else {
                        attribute.value.as_str()
                    };
                    error!("{}: error adding {}: {}", instance.display_name, label, e);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Event {} from {}: {} created, {} updated, {} skipped, {} failed",
            event.id.as_deref().unwrap_or("?"),
            instance.display_name,
            report.created,
            report.updated,
            report.skipped,
            report.failed
        );

        report
    }

    /// Event-level context shared by every attribute of the event
    fn context_draft(&self, instance: &FeedInstance, event: &RawEvent) -> ContextRecord {
        let mut draft = ContextRecord::new(instance.display_name.as_str());

        let external: Vec<&str> = event
            .attributes
            .iter()
            .filter(|a| a.category == EXTERNAL_ANALYSIS && a.attr_type == "url")
            .map(|a| a.value.as_str())
            .collect();
        if !external.is_empty() {
            draft = draft.with_attribute("external sources", external.join(CONTEXT_SEPARATOR));
        }

        if let Some(org) = event
            .orgc_id
            .as_deref()
            .and_then(|id| instance.organisations.get(id))
        {
            draft = draft.with_attribute("organisation", org.as_str());
        }

        draft
    }

    /// Returns whether the node was newly created
    fn import_attribute(
        &self,
        instance: &FeedInstance,
        event: &RawEvent,
        attribute: &RawAttribute,
        attr_type: AttributeType,
        draft: &ContextRecord,
        tags: &TagSplit,
    ) -> Result<bool, EnrichError> {
        let event_id = attribute
            .event_id_or(event)
            .ok_or(EnrichError::MissingEventId)?;

        let node = self.store.get_or_create(attr_type.kind(), &attribute.value)?;

        let category = attribute.category.replace(' ', "_");
        self.store.tag_node(
            node.id,
            std::iter::once(category).chain(tags.generic.iter().cloned()),
        )?;

        let mut context = draft
            .clone()
            .with_external_id(event_id)
            .with_external_url(instance.endpoint.event_url(event_id));
        if let Some(comment) = &attribute.comment {
            context = context.with_attribute("comment", comment.as_str());
        }
        if !tags.galaxies.is_empty() {
            context = context.with_attribute("galaxies", tags.galaxies.join(CONTEXT_SEPARATOR));
        }
        self.store.add_context(node.id, context)?;

        Ok(node.created)
    }
}
