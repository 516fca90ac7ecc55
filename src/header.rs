//! NEDF header parsing.
//!
//! The first bytes of a NEDF file hold an XML document describing the
//! recording. The document is located by its outermost element, parsed into
//! a generic element tree, and converted into a [`HeaderNode`] tree using
//! the sibling-repetition rule:
//!
//! - an element whose first two children share a tag becomes a list keyed
//!   by that tag;
//! - any other element with children becomes an object, one member per
//!   distinct child tag (later duplicates replace earlier ones);
//! - a leaf with attributes becomes its attribute map;
//! - a bare leaf becomes its text.
//!
//! Only the first two children are inspected, so a heterogeneous element
//! that happens to start with two identical tags is read as a list.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::{NedfError, Result};
use crate::types::NedfWarning;

/// Upper bound on the header size; the payload starts right after it.
pub const HEADER_LEN: usize = 10240;

/// Montage keys are `Channel<N>`; the index starts after this many bytes.
const MONTAGE_KEY_PREFIX_LEN: usize = "Channel".len();

/// A node of the converted header tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderNode {
    Scalar(String),
    Object(NodeMap),
    List(Vec<HeaderNode>),
}

impl HeaderNode {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&NodeMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[HeaderNode]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Member lookup on object nodes.
    pub fn get(&self, key: &str) -> Option<&HeaderNode> {
        self.as_object().and_then(|map| map.get(key))
    }
}

impl Serialize for HeaderNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(text) => serializer.serialize_str(text),
            Self::Object(map) => map.serialize(serializer),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// Insertion-ordered name to node mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMap {
    entries: Vec<(String, HeaderNode)>,
}

impl NodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a member. An existing member keeps its position and takes the new value.
    pub fn insert(&mut self, key: impl Into<String>, node: HeaderNode) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = node,
            None => self.entries.push((key, node)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&HeaderNode> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, node)| node)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Follows a chain of object members from this map.
    pub fn get_path(&self, path: &[&str]) -> Option<&HeaderNode> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.get(first)?, |node, key| node.get(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderNode)> {
        self.entries.iter().map(|(k, node)| (k.as_str(), node))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for NodeMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, node) in &self.entries {
            map.serialize_entry(key, node)?;
        }
        map.end()
    }
}

/// Converted header document: the root element's name and its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderTree {
    pub root: String,
    pub content: NodeMap,
}

/// Element as read from the markup, before conversion.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn is_list(&self) -> bool {
        self.children.len() >= 2 && self.children[0].name == self.children[1].name
    }

    fn attribute_map(&self) -> NodeMap {
        let mut map = NodeMap::new();
        for (key, value) in &self.attributes {
            map.insert(key.clone(), HeaderNode::Scalar(value.clone()));
        }
        map
    }

    /// Object conversion: attributes first, then one member per child tag.
    fn to_object(&self) -> NodeMap {
        let mut map = self.attribute_map();
        for child in &self.children {
            let node = if !child.children.is_empty() {
                if child.is_list() {
                    let mut wrapper = NodeMap::new();
                    wrapper.insert(
                        child.children[0].name.clone(),
                        HeaderNode::List(child.to_list()),
                    );
                    for (key, value) in &child.attributes {
                        wrapper.insert(key.clone(), HeaderNode::Scalar(value.clone()));
                    }
                    HeaderNode::Object(wrapper)
                } else {
                    HeaderNode::Object(child.to_object())
                }
            } else if !child.attributes.is_empty() {
                HeaderNode::Object(child.attribute_map())
            } else {
                HeaderNode::Scalar(child.text.clone())
            };
            map.insert(child.name.clone(), node);
        }
        map
    }

    /// List conversion: every child contributes one item, bare empty leaves excepted.
    fn to_list(&self) -> Vec<HeaderNode> {
        let mut items = Vec::with_capacity(self.children.len());
        for child in &self.children {
            if !child.children.is_empty() {
                if child.is_list() {
                    items.push(HeaderNode::List(child.to_list()));
                } else {
                    items.push(HeaderNode::Object(child.to_object()));
                }
            } else {
                let text = child.text.trim();
                if !text.is_empty() {
                    items.push(HeaderNode::Scalar(text.to_string()));
                } else if !child.attributes.is_empty() {
                    items.push(HeaderNode::Object(child.attribute_map()));
                }
            }
        }
        items
    }
}

/// Returns the prefix of `bytes` that ends with the closing tag of the first element.
fn locate_root(bytes: &[u8]) -> Result<(&[u8], String)> {
    let mut pos = 0;
    let (start, name) = loop {
        let open = bytes[pos..]
            .iter()
            .position(|&b| b == b'<')
            .map(|i| pos + i)
            .ok_or_else(|| NedfError::header_parse("no root element found"))?;
        match bytes.get(open + 1) {
            // Declarations, comments and doctypes precede the root element
            Some(b'?') | Some(b'!') => {
                let close = bytes[open..]
                    .iter()
                    .position(|&b| b == b'>')
                    .ok_or_else(|| NedfError::header_parse("unterminated markup declaration"))?;
                pos = open + close + 1;
            }
            Some(_) => {
                let name_len = bytes[open + 1..]
                    .iter()
                    .position(|&b| b == b'>' || b == b'/' || b.is_ascii_whitespace())
                    .unwrap_or(bytes.len() - open - 1);
                if name_len == 0 {
                    return Err(NedfError::header_parse("root element has no name"));
                }
                let name = std::str::from_utf8(&bytes[open + 1..open + 1 + name_len])
                    .map_err(|e| NedfError::header_parse(format!("root element name: {e}")))?;
                break (open, name.to_string());
            }
            None => return Err(NedfError::header_parse("no root element found")),
        }
    };

    let closing = format!("</{name}>");
    let end = bytes[start..]
        .windows(closing.len())
        .position(|w| w == closing.as_bytes())
        .map(|i| start + i + closing.len())
        .ok_or_else(|| {
            NedfError::header_parse(format!("unterminated root element <{name}>"))
        })?;
    Ok((&bytes[..end], name))
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

fn open_element(start: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Element> {
    let decoder = reader.decoder();
    let qname = start.name();
    let name = decoder
        .decode(qname.as_ref())
        .map_err(|e| NedfError::header_parse(e.to_string()))?
        .into_owned();

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| NedfError::header_parse(format!("in <{name}>: {e}")))?;
        let key = decoder
            .decode(attr.key.as_ref())
            .map_err(|e| NedfError::header_parse(e.to_string()))?
            .into_owned();
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| NedfError::header_parse(format!("in <{name}>: {e}")))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

/// Parses the markup slice into an element tree.
fn parse_elements(text: &str) -> Result<Element> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    let mut attach = |element: Element, stack: &mut Vec<Element>| -> Result<()> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if root.is_none() => root = Some(element),
            None => return Err(NedfError::header_parse("multiple root elements")),
        }
        Ok(())
    };

    loop {
        let event = reader.read_event().map_err(|e| {
            NedfError::header_parse(format!("{e} at byte {}", reader.error_position()))
        })?;
        match event {
            Event::Start(start) => stack.push(open_element(&start, &reader)?),
            Event::Empty(start) => {
                let element = open_element(&start, &reader)?;
                attach(element, &mut stack)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| NedfError::header_parse("unexpected closing tag"))?;
                attach(element, &mut stack)?;
            }
            Event::Text(content) => {
                if let Some(top) = stack.last_mut() {
                    let decoded = reader
                        .decoder()
                        .decode(&content)
                        .map_err(|e| NedfError::header_parse(e.to_string()))?;
                    top.text.push_str(&decoded);
                }
            }
            Event::CData(content) => {
                if let Some(top) = stack.last_mut() {
                    let decoded = reader
                        .decoder()
                        .decode(&content)
                        .map_err(|e| NedfError::header_parse(e.to_string()))?;
                    top.text.push_str(&decoded);
                }
            }
            Event::GeneralRef(reference) => {
                let name = reader
                    .decoder()
                    .decode(&reference)
                    .map_err(|e| NedfError::header_parse(e.to_string()))?;
                let ch = resolve_entity(&name).ok_or_else(|| {
                    NedfError::header_parse(format!("unknown entity &{name};"))
                })?;
                if let Some(top) = stack.last_mut() {
                    top.text.push(ch);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(NedfError::header_parse(format!(
            "unterminated element <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| NedfError::header_parse("no root element found"))
}

/// Locates and parses the header markup at the start of `bytes`.
///
/// `bytes` should be the bounded header slice; anything past the closing
/// tag of the first element is ignored.
pub fn parse_markup(bytes: &[u8]) -> Result<HeaderTree> {
    let (slice, root_name) = locate_root(bytes)?;
    let text = std::str::from_utf8(slice)
        .map_err(|e| NedfError::header_parse(format!("header is not UTF-8: {e}")))?;
    let root = parse_elements(text)?;
    if root.name != root_name {
        return Err(NedfError::header_parse(format!(
            "root element <{}> does not match <{root_name}>",
            root.name
        )));
    }
    Ok(HeaderTree {
        content: root.to_object(),
        root: root.name,
    })
}

/// Typed view of the header fields needed to decode the payload.
#[derive(Debug, Clone, Serialize)]
pub struct NedfHeader {
    /// Converted header document
    pub tree: HeaderTree,
    /// Number of EEG channels declared by the device (`TotalNumberOfChannels`)
    pub num_channels: usize,
    /// EEG sampling rate (Hz)
    pub sampling_rate: u32,
    /// Electrode names ordered by channel index, one per EEG column
    pub electrodes: Vec<String>,
    /// Number of entries found in the electrode montage
    pub montage_channels: usize,
    /// Whether accelerometer samples are interleaved in the payload
    pub accelerometer_enabled: bool,
    /// Whether stimulation samples are interleaved in the payload
    pub stimulation_enabled: bool,
    /// Unix time of the first EEG sample (ms)
    pub start_unix_ms: i64,
    /// Declared EEG recording duration (s)
    pub recording_duration_s: u64,
    /// Total stimulation protocol duration (s), when stimulation is on
    pub stimulation_duration_s: Option<u64>,
    /// Number of EEG frames the payload should contain
    pub total_samples: usize,
}

fn required<'a>(tree: &'a NodeMap, path: &[&str]) -> Result<&'a HeaderNode> {
    tree.get_path(path)
        .ok_or_else(|| NedfError::field_missing(path.join("/")))
}

fn required_text<'a>(tree: &'a NodeMap, path: &[&str]) -> Result<&'a str> {
    required(tree, path)?
        .as_str()
        .ok_or_else(|| NedfError::field_invalid(path.join("/"), "<structured element>"))
}

fn required_int<T: std::str::FromStr>(tree: &NodeMap, path: &[&str]) -> Result<T> {
    let text = required_text(tree, path)?;
    text.trim()
        .parse()
        .map_err(|_| NedfError::field_invalid(path.join("/"), text))
}

fn required_positive<T>(tree: &NodeMap, path: &[&str]) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default + std::fmt::Display,
{
    let value: T = required_int(tree, path)?;
    if value <= T::default() {
        return Err(NedfError::field_invalid(path.join("/"), value.to_string()));
    }
    Ok(value)
}

/// Reads `EEGSettings/EEGMontage` into names ordered by channel index.
fn read_montage(tree: &NodeMap) -> Result<Vec<String>> {
    const PATH: [&str; 2] = ["EEGSettings", "EEGMontage"];
    let montage = required(tree, &PATH)?
        .as_object()
        .ok_or_else(|| NedfError::field_invalid(PATH.join("/"), "<not a channel map>"))?;

    let mut by_index = BTreeMap::new();
    for (key, node) in montage.iter() {
        let field = || format!("{}/{key}", PATH.join("/"));
        let index: usize = key
            .get(MONTAGE_KEY_PREFIX_LEN..)
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| NedfError::field_invalid(field(), key))?;
        let name = node
            .as_str()
            .ok_or_else(|| NedfError::field_invalid(field(), "<structured element>"))?;
        if by_index.insert(index, name.to_string()).is_some() {
            return Err(NedfError::field_invalid(field(), "<duplicate channel index>"));
        }
    }
    Ok(by_index.into_values().collect())
}

impl NedfHeader {
    /// Extracts and validates the required fields from a converted header.
    pub fn from_tree(tree: HeaderTree) -> Result<Self> {
        let content = &tree.content;

        let accelerometer_enabled =
            required_text(content, &["AccelerometerData"])?.trim() == "ON";
        let stimulation_enabled = content.contains_key("STIMSettings");
        let num_channels: usize =
            required_positive(content, &["EEGSettings", "TotalNumberOfChannels"])?;
        let start_unix_ms: i64 =
            required_int(content, &["StepDetails", "StartDate_firstEEGTimestamp"])?;
        let electrodes = read_montage(content)?;
        let recording_duration_s: u64 =
            required_int(content, &["EEGSettings", "EEGRecordingDuration"])?;
        let sampling_rate: u32 =
            required_positive(content, &["EEGSettings", "EEGSamplingRate"])?;

        let stimulation_duration_s = if stimulation_enabled {
            let mut total = 0u64;
            for phase in [
                "StimulationDuration",
                "RampDownDuration",
                "RampUpDuration",
                "ShamRampDuration",
            ] {
                let seconds: u64 = required_int(content, &["STIMSettings", phase])?;
                total += seconds;
            }
            Some(total)
        } else {
            None
        };

        let duration_s = stimulation_duration_s.unwrap_or(recording_duration_s);
        let total_samples = duration_s
            .checked_mul(u64::from(sampling_rate))
            .and_then(|samples| usize::try_from(samples).ok())
            .ok_or_else(|| {
                NedfError::field_invalid("EEGSettings/EEGRecordingDuration", duration_s.to_string())
            })?;

        let montage_channels = electrodes.len();
        let electrodes = reconcile_electrodes(electrodes, num_channels);

        Ok(Self {
            tree,
            num_channels,
            sampling_rate,
            electrodes,
            montage_channels,
            accelerometer_enabled,
            stimulation_enabled,
            start_unix_ms,
            recording_duration_s,
            stimulation_duration_s,
            total_samples,
        })
    }

    /// Advisory raised when the montage disagrees with the declared channel count.
    pub fn channel_count_mismatch(&self) -> Option<NedfWarning> {
        (self.montage_channels != self.num_channels).then_some(NedfWarning::ChannelCountMismatch {
            declared: self.num_channels,
            montage: self.montage_channels,
        })
    }

    /// Start of the recording, or `None` if the timestamp is out of range.
    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.start_unix_ms)
    }

    /// Start of the recording as `YYYY-MM-DD HH:MM:SS` in local time.
    pub fn start_date_string(&self) -> Option<String> {
        self.start_date().map(|date| {
            date.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
    }

    /// Header tree as compact JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.tree.content)
    }

    /// Header tree as indented JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.tree.content)
    }
}

/// Fits the montage to the declared channel count.
///
/// Extra names are dropped; missing columns are named `Channel<N>` (1-based).
fn reconcile_electrodes(mut electrodes: Vec<String>, num_channels: usize) -> Vec<String> {
    electrodes.truncate(num_channels);
    let named = electrodes.len();
    electrodes.extend((named..num_channels).map(|i| format!("Channel{}", i + 1)));
    electrodes
}

/// Parses a bounded header slice into a validated [`NedfHeader`].
pub fn parse_header(bytes: &[u8]) -> Result<NedfHeader> {
    let limit = bytes.len().min(HEADER_LEN);
    let tree = parse_markup(&bytes[..limit])?;
    NedfHeader::from_tree(tree)
}
