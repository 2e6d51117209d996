//! Core data types for scans, structural summaries and runtime sessions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Origin key used when a scanned page did not report its URL.
pub const UNKNOWN_ORIGIN: &str = "(unknown)";

/// Opaque identifier of a target surface (a tab or page in the host).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SurfaceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SurfaceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which extraction routine produced a raw-markup event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanKind {
    /// A single scan requested for one surface.
    OneTime,
    /// A scan triggered by the continuous runtime session.
    Runtime,
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneTime => write!(f, "one-time"),
            Self::Runtime => write!(f, "runtime"),
        }
    }
}

/// Raw markup posted back by an extraction routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkupEvent {
    pub kind: ScanKind,
    #[serde(default)]
    pub markup: String,
    #[serde(default)]
    pub surface_id: Option<SurfaceId>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Timestamp reported by the routine itself (ms epoch).
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Runtime session the routine was injected for.
    #[serde(default)]
    pub session: Option<u64>,
}

/// Provenance of one extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMeta {
    /// Assigned by the engine when the markup event was received (ms epoch).
    pub timestamp: i64,
    pub surface_id: Option<SurfaceId>,
    pub url: Option<String>,
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<i64>,
}

/// Structural snapshot of one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralSummary {
    pub head: HeadSection,
    pub body: BodySection,
    pub stats: DocumentStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadSection {
    pub title: String,
    pub meta: Vec<MetaEntry>,
    pub links: Vec<LinkRelation>,
    pub scripts: Vec<ScriptRef>,
}

/// A `<meta>` tag: `name` falls back to the `property` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub name: Option<String>,
    pub content: Option<String>,
}

/// A `<link>` inside `<head>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRelation {
    pub rel: Option<String>,
    pub href: Option<String>,
}

/// A `<script>` inside `<head>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRef {
    pub src: Option<String>,
    /// First 50 characters of the trimmed inline source.
    pub inline: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodySection {
    pub headings: Headings,
    pub links: Vec<Anchor>,
    pub forms: Vec<FormSummary>,
    pub images: Vec<ImageRef>,
    pub videos: Vec<MediaRef>,
    pub audios: Vec<MediaRef>,
    pub iframes: Vec<FrameRef>,
    pub lists: Vec<ListSummary>,
    pub tables: Vec<TableSummary>,
}

/// Heading text grouped by level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headings {
    pub h1: Vec<String>,
    pub h2: Vec<String>,
    pub h3: Vec<String>,
    pub h4: Vec<String>,
    pub h5: Vec<String>,
    pub h6: Vec<String>,
}

impl Headings {
    /// Headings of the given level (1-6). Other levels are empty.
    pub fn level(&self, level: u8) -> &[String] {
        match level {
            1 => &self.h1,
            2 => &self.h2,
            3 => &self.h3,
            4 => &self.h4,
            5 => &self.h5,
            6 => &self.h6,
            _ => &[],
        }
    }

    pub(crate) fn level_mut(&mut self, level: u8) -> Option<&mut Vec<String>> {
        match level {
            1 => Some(&mut self.h1),
            2 => Some(&mut self.h2),
            3 => Some(&mut self.h3),
            4 => Some(&mut self.h4),
            5 => Some(&mut self.h5),
            6 => Some(&mut self.h6),
            _ => None,
        }
    }
}

/// An `<a>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub href: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSummary {
    pub action: Option<String>,
    pub method: String,
    pub inputs: Vec<InputDescriptor>,
}

/// An `input`, `select`, `textarea` or `button` inside a form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescriptor {
    pub tag: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub input_type: String,
    pub value: Option<String>,
    pub placeholder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub src: Option<String>,
    pub alt: String,
}

/// A `<video>` or `<audio>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub src: Option<String>,
    pub controls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRef {
    pub src: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Ul,
    Ol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSummary {
    pub kind: ListKind,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    pub total_elements: usize,
    pub depth: usize,
    /// Lowercase tag name → occurrences. Absent tags have no entry.
    pub tag_count: BTreeMap<String, usize>,
}

/// The unit persisted and transmitted for every extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub meta: ScanMeta,
    pub summary: StructuralSummary,
}

/// Progress counters of the active runtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeTotals {
    pub total_scans: usize,
    pub pages_count: usize,
    pub started_at: i64,
}

/// A finalized runtime session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeRun {
    pub started_at: i64,
    pub stopped_at: i64,
    pub total_scans: usize,
    pub pages_count: usize,
    /// Origin key → records in arrival order.
    pub dataset: BTreeMap<String, Vec<ScanRecord>>,
}

/// A finalized run together with its durable key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRun {
    pub key: String,
    pub run: RuntimeRun,
}

/// A one-shot scan record together with its durable key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableEntry {
    pub key: String,
    pub record: ScanRecord,
}

/// Snapshot of the runtime state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub active: bool,
    pub total_scans: usize,
    pub pages_count: usize,
    pub started_at: Option<i64>,
}
