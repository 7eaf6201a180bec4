//! Target template: the desired color and priority of every targeted pixel.
//!
//! Built wholesale from a descriptor document of weighted structures. The
//! document is read leniently: a broken structure or pixel is skipped with a
//! warning instead of failing the whole refresh.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::board::Coord;
use crate::error::DecodeError;
use crate::palette::{ColorId, Palette};

/// `(structure weight, pixel weight)` pair attached to every target pixel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Priority {
    pub structure: f64,
    pub pixel: f64,
}

impl Priority {
    pub const fn new(structure: f64, pixel: f64) -> Self {
        Self { structure, pixel }
    }

    /// Lexicographic total order.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.structure
            .total_cmp(&other.structure)
            .then_with(|| self.pixel.total_cmp(&other.pixel))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetPixel {
    pub coord: Coord,
    pub color: ColorId,
    pub priority: Priority,
}

/// Summary of one named structure as ingested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureSummary {
    pub name: String,
    pub weight: f64,
    pub pixels: usize,
}

/// Counters from turning a document into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub skipped_structures: usize,
    pub skipped_pixels: usize,
    pub duplicate_pixels: usize,
}

/// Immutable set of target pixels plus the worker version registry.
#[derive(Debug, Clone, Default)]
pub struct TargetTemplate {
    pixels: Vec<TargetPixel>,
    structures: Vec<StructureSummary>,
    versions: BTreeMap<String, i64>,
    /// Canvas region indices to observe; `None` means all of them.
    enabled_regions: Option<Vec<usize>>,
    report: IngestReport,
    refreshed_at: Option<DateTime<Utc>>,
}

impl TargetTemplate {
    /// The template in effect before the first successful refresh.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build directly from target pixels. Later duplicates of a coordinate
    /// follow the same rule as document ingestion.
    pub fn from_pixels(pixels: impl IntoIterator<Item = TargetPixel>) -> Self {
        let mut template = Self::default();
        let mut seen = HashMap::new();
        for pixel in pixels {
            template.insert(pixel, &mut seen);
        }
        template
    }

    /// Parse a descriptor document for a board of `width` x `height`.
    pub fn parse(text: &str, width: u32, height: u32) -> Result<Self, DecodeError> {
        let document: Map<String, Value> = serde_json::from_str(text)?;
        Ok(Self::from_document(&document, width, height))
    }

    /// Flatten a parsed document.
    ///
    /// Every pixel of a structure with weight `Ws` and pixel weight `Wp`
    /// becomes a target pixel with priority `(Ws, Wp)`; absent weights are 0.
    /// When a coordinate is claimed more than once, the higher priority wins
    /// and ties keep the first claim.
    pub fn from_document(document: &Map<String, Value>, width: u32, height: u32) -> Self {
        let priorities = document.get("priorities").and_then(Value::as_object);
        let mut template = Self {
            versions: parse_versions(document.get("versions")),
            enabled_regions: parse_region_indices(document.get("canvases_enabled")),
            refreshed_at: Some(Utc::now()),
            ..Self::default()
        };
        let mut seen = HashMap::new();

        let structures: Vec<(String, &Value)> = match document.get("structures") {
            Some(Value::Array(list)) => list
                .iter()
                .enumerate()
                .map(|(i, s)| (format!("#{i}"), s))
                .collect(),
            Some(Value::Object(named)) => named.iter().map(|(k, v)| (k.clone(), v)).collect(),
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                tracing::warn!("template structures must be a list or map, got {other}");
                Vec::new()
            }
        };

        for (name, structure) in structures {
            let Some(structure) = structure.as_object() else {
                tracing::warn!(structure = %name, "skipping structure that is not an object");
                template.report.skipped_structures += 1;
                continue;
            };
            let weight = resolve_weight(structure, priorities);
            let mut accepted = 0;

            let pixels = structure
                .get("pixels")
                .and_then(Value::as_array)
                .map_or(&[][..], Vec::as_slice);
            for raw in pixels {
                let Some(pixel) = parse_pixel(raw, weight, priorities, width, height) else {
                    template.report.skipped_pixels += 1;
                    continue;
                };
                template.insert(pixel, &mut seen);
                accepted += 1;
            }

            template.structures.push(StructureSummary {
                name,
                weight,
                pixels: accepted,
            });
        }

        if template.report.skipped_pixels > 0 || template.report.skipped_structures > 0 {
            tracing::warn!(
                skipped_pixels = template.report.skipped_pixels,
                skipped_structures = template.report.skipped_structures,
                "template document had unusable entries"
            );
        }
        template
    }

    fn insert(&mut self, pixel: TargetPixel, seen: &mut HashMap<Coord, usize>) {
        match seen.get(&pixel.coord) {
            Some(&index) => {
                self.report.duplicate_pixels += 1;
                if pixel.priority.total_cmp(&self.pixels[index].priority) == Ordering::Greater {
                    self.pixels[index] = pixel;
                }
            }
            None => {
                seen.insert(pixel.coord, self.pixels.len());
                self.pixels.push(pixel);
            }
        }
    }

    /// Replace the version registry.
    #[must_use]
    pub fn with_versions(mut self, versions: impl IntoIterator<Item = (String, i64)>) -> Self {
        self.versions = versions.into_iter().collect();
        self
    }

    pub fn pixels(&self) -> &[TargetPixel] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn structures(&self) -> &[StructureSummary] {
        &self.structures
    }

    pub const fn versions(&self) -> &BTreeMap<String, i64> {
        &self.versions
    }

    /// Canvas regions the maintenance cycle should fetch.
    pub fn enabled_regions(&self) -> Option<&[usize]> {
        self.enabled_regions.as_deref()
    }

    /// Minimum supported version for a worker platform, if any.
    pub fn min_version(&self, platform: &str) -> Option<i64> {
        self.versions.get(platform).copied()
    }

    pub const fn report(&self) -> &IngestReport {
        &self.report
    }

    pub const fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

fn number(value: &Value) -> Option<f64> {
    let parsed: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Explicit `weight`, else `priority` looked up in the `priorities` table, else 0.
fn resolve_weight(entry: &Map<String, Value>, priorities: Option<&Map<String, Value>>) -> f64 {
    if let Some(weight) = entry.get("weight").and_then(number) {
        return weight;
    }
    let key = match entry.get("priority") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return 0.0,
    };
    priorities
        .and_then(|table| table.get(&key))
        .and_then(number)
        .unwrap_or(0.0)
}

fn parse_pixel(
    raw: &Value,
    structure_weight: f64,
    priorities: Option<&Map<String, Value>>,
    width: u32,
    height: u32,
) -> Option<TargetPixel> {
    let entry = raw.as_object()?;
    let x = u32::try_from(entry.get("x").and_then(integer)?).ok()?;
    let y = u32::try_from(entry.get("y").and_then(integer)?).ok()?;
    let color = ColorId::try_from(entry.get("color").and_then(integer)?).ok()?;

    if x >= width || y >= height || !Palette::global().contains(color) {
        tracing::debug!(x, y, color, "dropping target pixel outside board or palette");
        return None;
    }

    Some(TargetPixel {
        coord: Coord::new(x, y),
        color,
        priority: Priority::new(structure_weight, resolve_weight(entry, priorities)),
    })
}

fn parse_versions(raw: Option<&Value>) -> BTreeMap<String, i64> {
    let Some(table) = raw.and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    table
        .iter()
        .filter_map(|(platform, version)| match integer(version) {
            Some(v) => Some((platform.clone(), v)),
            None => {
                tracing::warn!(%platform, "ignoring non-numeric minimum version {version}");
                None
            }
        })
        .collect()
}

fn parse_region_indices(raw: Option<&Value>) -> Option<Vec<usize>> {
    match raw? {
        Value::Null => None,
        Value::Array(list) => Some(
            list.iter()
                .filter_map(|entry| {
                    let index = integer(entry).and_then(|i| usize::try_from(i).ok());
                    if index.is_none() {
                        tracing::warn!("ignoring canvases_enabled entry {entry}");
                    }
                    index
                })
                .collect(),
        ),
        other => {
            tracing::warn!("canvases_enabled must be a list, got {other}; observing all regions");
            None
        }
    }
}

/// Decides when a template refresh is attempted.
#[derive(Debug, Clone)]
pub struct RefreshGate {
    interval: Duration,
    last_success: Option<Instant>,
}

impl RefreshGate {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_success: None,
        }
    }

    /// Due when forced, never refreshed, or the interval has elapsed.
    pub fn is_due(&self, now: Instant, forced: bool) -> bool {
        forced
            || self
                .last_success
                .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    pub const fn mark_success(&mut self, now: Instant) {
        self.last_success = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> TargetTemplate {
        TargetTemplate::parse(text, 100, 100).unwrap()
    }

    #[test]
    fn list_of_structures_is_flattened_with_weights() {
        let template = parse(
            r#"{
                "structures": [
                    {"weight": 10, "pixels": [
                        {"x": 5, "y": 5, "color": 2, "weight": 1},
                        {"x": 6, "y": 5, "color": 3}
                    ]},
                    {"pixels": [{"x": 0, "y": 0, "color": 27, "weight": 4}]}
                ],
                "versions": {"bot-v2": 3}
            }"#,
        );

        assert_eq!(template.len(), 3);
        let p = template.pixels();
        assert_eq!(p[0].coord, Coord::new(5, 5));
        assert_eq!(p[0].color, 2);
        assert_eq!(p[0].priority, Priority::new(10.0, 1.0));
        assert_eq!(p[1].priority, Priority::new(10.0, 0.0));
        assert_eq!(p[2].priority, Priority::new(0.0, 4.0));
        assert_eq!(template.min_version("bot-v2"), Some(3));
        assert_eq!(template.min_version("python"), None);
        assert_eq!(template.structures().len(), 2);
        assert!(template.refreshed_at().is_some());
    }

    #[test]
    fn named_structures_resolve_priority_table() {
        let template = parse(
            r#"{
                "priorities": {"1": 50, "2": 7},
                "structures": {
                    "flag": {"priority": 1, "pixels": [{"x": 1, "y": 1, "color": 31, "priority": "2"}]}
                }
            }"#,
        );

        assert_eq!(template.structures()[0].name, "flag");
        assert_eq!(template.pixels()[0].priority, Priority::new(50.0, 7.0));
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let template = parse(
            r#"{
                "structures": [
                    "not a structure",
                    {"weight": "heavy", "pixels": [
                        {"x": 1, "y": 1, "color": 2},
                        {"x": -1, "y": 1, "color": 2},
                        {"x": 1, "y": 500, "color": 2},
                        {"x": 2, "y": 2, "color": 99},
                        {"x": 3},
                        42
                    ]}
                ],
                "versions": {"bot": "new", "js": "4"}
            }"#,
        );

        assert_eq!(template.len(), 1);
        assert_eq!(template.pixels()[0].priority, Priority::new(0.0, 0.0));
        assert_eq!(template.report().skipped_structures, 1);
        assert_eq!(template.report().skipped_pixels, 5);
        assert_eq!(template.min_version("bot"), None);
        assert_eq!(template.min_version("js"), Some(4));
    }

    #[test]
    fn missing_sections_give_an_empty_template() {
        let template = parse("{}");
        assert!(template.is_empty());
        assert!(template.versions().is_empty());
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        assert!(TargetTemplate::parse("not json", 10, 10).is_err());
        assert!(TargetTemplate::parse("[1, 2]", 10, 10).is_err());
    }

    #[test]
    fn duplicate_coordinates_keep_the_higher_priority() {
        let template = parse(
            r#"{"structures": [
                {"weight": 1, "pixels": [{"x": 4, "y": 4, "color": 2}]},
                {"weight": 9, "pixels": [{"x": 4, "y": 4, "color": 13}]},
                {"weight": 9, "pixels": [{"x": 4, "y": 4, "color": 27}]}
            ]}"#,
        );

        assert_eq!(template.len(), 1);
        assert_eq!(template.pixels()[0].color, 13);
        assert_eq!(template.report().duplicate_pixels, 2);
    }

    #[test]
    fn canvases_enabled_selects_regions() {
        assert_eq!(parse(r#"{"structures": []}"#).enabled_regions(), None);
        assert_eq!(
            parse(r#"{"canvases_enabled": [0, "2", -1, "x"]}"#).enabled_regions(),
            Some(&[0, 2][..])
        );
        assert_eq!(parse(r#"{"canvases_enabled": []}"#).enabled_regions(), Some(&[][..]));
        assert_eq!(parse(r#"{"canvases_enabled": "all"}"#).enabled_regions(), None);
    }

    #[test]
    fn refresh_gate_honours_interval_and_force() {
        let mut gate = RefreshGate::new(Duration::from_secs(60));
        let start = Instant::now();
        assert!(gate.is_due(start, false));

        gate.mark_success(start);
        assert!(!gate.is_due(start + Duration::from_secs(30), false));
        assert!(gate.is_due(start + Duration::from_secs(30), true));
        assert!(gate.is_due(start + Duration::from_secs(60), false));
    }
}
