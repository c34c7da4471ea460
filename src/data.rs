//! Domain objects stored in the registry.
//!
//! Every kind of data MotifLab knows about is one variant of [`DataObject`].
//! Per-kind behaviour (merging, prompting, formatting) is expressed as
//! exhaustive matches over that enum rather than runtime type checks.

use motiflab_protocol::plugin_requirement;
use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::HashSet, fmt};

/// Names starting with this prefix belong to temporary objects. They are never
/// written to saved sessions.
pub const TEMPORARY_PREFIX: &str = "_temp_";

/// Kinds whose names are exclusive across types: once a name is held by one of
/// these, no object of a different kind may take it over.
pub const IDENTITY_BEARING_KINDS: [DataKind; 4] = [
    DataKind::Sequence,
    DataKind::Motif,
    DataKind::Module,
    DataKind::Output,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataKind {
    Sequence,
    Motif,
    Module,
    Output,
    SequenceCollection,
    MotifCollection,
    ModuleCollection,
    NumericVariable,
    TextVariable,
}

impl DataKind {
    pub const ALL: [DataKind; 9] = [
        DataKind::Sequence,
        DataKind::Motif,
        DataKind::Module,
        DataKind::Output,
        DataKind::SequenceCollection,
        DataKind::MotifCollection,
        DataKind::ModuleCollection,
        DataKind::NumericVariable,
        DataKind::TextVariable,
    ];

    pub fn is_identity_bearing(self) -> bool {
        IDENTITY_BEARING_KINDS.contains(&self)
    }

    /// Kind of the members listed by a collection kind.
    pub fn member_kind(self) -> Option<DataKind> {
        match self {
            Self::SequenceCollection => Some(Self::Sequence),
            Self::MotifCollection => Some(Self::Motif),
            Self::ModuleCollection => Some(Self::Module),
            _ => None,
        }
    }

    /// Collection kind that can list objects of this kind.
    pub fn collection_kind(self) -> Option<DataKind> {
        match self {
            Self::Sequence => Some(Self::SequenceCollection),
            Self::Motif => Some(Self::MotifCollection),
            Self::Module => Some(Self::ModuleCollection),
            _ => None,
        }
    }

    /// Whether an object of this kind may be replaced in place by one of `target`.
    pub fn can_convert_to(self, target: DataKind) -> bool {
        self == target || (!self.is_identity_bearing() && !target.is_identity_bearing())
    }

    pub fn parse(text: &str) -> Option<DataKind> {
        let key: String = text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| format!("{k:?}").to_ascii_lowercase() == key)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Sequence => "Sequence",
            Self::Motif => "Motif",
            Self::Module => "Module",
            Self::Output => "Output",
            Self::SequenceCollection => "Sequence Collection",
            Self::MotifCollection => "Motif Collection",
            Self::ModuleCollection => "Module Collection",
            Self::NumericVariable => "Numeric Variable",
            Self::TextVariable => "Text Variable",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("A {source_kind} can not be converted into a {target}")]
    Incompatible {
        target: DataKind,
        source_kind: DataKind,
    },
    #[error("'{value}' is not a valid value for a {kind}: {reason}")]
    InvalidValue {
        kind: DataKind,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strand {
    #[default]
    Direct,
    Reverse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    name: String,
    #[serde(default)]
    pub genome_build: Option<String>,
    pub chromosome: String,
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub strand: Strand,
    #[serde(default)]
    pub gene_name: Option<String>,
    #[serde(default)]
    pub tss: Option<i64>,
}

impl Sequence {
    pub fn new(name: &str, chromosome: &str, start: i64, end: i64) -> Self {
        Self {
            name: name.to_string(),
            genome_build: None,
            chromosome: chromosome.to_string(),
            start,
            end,
            strand: Strand::Direct,
            gene_name: None,
            tss: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inclusive length; zero when `end < start`.
    pub fn len(&self) -> u64 {
        let span = i128::from(self.end) - i128::from(self.start) + 1;
        u64::try_from(span.max(0)).unwrap_or(u64::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn region_text(&self) -> String {
        format!("{}:{}-{}", self.chromosome, self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Motif {
    name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    pub consensus: String,
    pub matrix: Vec<[f64; 4]>,
    #[serde(default)]
    pub classification: Option<String>,
}

fn iupac_counts(letter: char) -> [f64; 4] {
    match letter.to_ascii_uppercase() {
        'A' => [1.0, 0.0, 0.0, 0.0],
        'C' => [0.0, 1.0, 0.0, 0.0],
        'G' => [0.0, 0.0, 1.0, 0.0],
        'T' | 'U' => [0.0, 0.0, 0.0, 1.0],
        'M' => [1.0, 1.0, 0.0, 0.0],
        'R' => [1.0, 0.0, 1.0, 0.0],
        'W' => [1.0, 0.0, 0.0, 1.0],
        'S' => [0.0, 1.0, 1.0, 0.0],
        'Y' => [0.0, 1.0, 0.0, 1.0],
        'K' => [0.0, 0.0, 1.0, 1.0],
        'V' => [1.0, 1.0, 1.0, 0.0],
        'H' => [1.0, 1.0, 0.0, 1.0],
        'D' => [1.0, 0.0, 1.0, 1.0],
        'B' => [0.0, 1.0, 1.0, 1.0],
        _ => [1.0, 1.0, 1.0, 1.0],
    }
}

fn is_iupac_base(c: char) -> bool {
    matches!(
        c.to_ascii_uppercase(),
        'A' | 'C' | 'G' | 'T' | 'U' | 'W' | 'S' | 'M' | 'K' | 'R' | 'Y' | 'B' | 'D' | 'H' | 'V'
            | 'N'
    )
}

impl Motif {
    pub fn from_consensus(name: &str, consensus: &str) -> Self {
        let consensus = consensus.trim().to_ascii_uppercase();
        Self {
            name: name.to_string(),
            short_name: None,
            matrix: consensus.chars().map(iupac_counts).collect(),
            consensus,
            classification: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    name: String,
    pub motifs: Vec<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub ordered: bool,
}

impl Module {
    pub fn new(name: &str, motifs: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            motifs,
            max_length: None,
            ordered: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    name: String,
    pub format: String,
    #[serde(default)]
    pub text: String,
    /// Plugin that produced this output, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

impl Output {
    pub fn new(name: &str, format: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            format: format.to_string(),
            text: text.to_string(),
            plugin: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered, duplicate-free list of member names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    name: String,
    #[serde(default, deserialize_with = "unique_members")]
    members: Vec<String>,
}

fn unique_members<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let mut seen = HashSet::new();
    Ok(Vec::<String>::deserialize(deserializer)?
        .into_iter()
        .filter(|m| seen.insert(m.clone()))
        .collect())
}

impl Collection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Vec::new(),
        }
    }

    pub fn with_members<I, S>(name: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ret = Self::new(name);
        for member in members {
            ret.add(member);
        }
        ret
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.iter().any(|m| m == member)
    }

    /// Returns `false` if the member was already present.
    pub fn add(&mut self, member: impl Into<String>) -> bool {
        let member = member.into();
        if self.contains(&member) {
            return false;
        }
        self.members.push(member);
        true
    }

    pub fn remove(&mut self, member: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != member);
        before != self.members.len()
    }

    /// If `new` is already listed, `old` is dropped instead so no name appears twice.
    pub fn rename_member(&mut self, old: &str, new: &str) -> bool {
        if old != new && self.contains(new) {
            return self.remove(old);
        }
        match self.members.iter_mut().find(|m| *m == old) {
            Some(m) => {
                *m = new.to_string();
                true
            }
            None => false,
        }
    }

    /// True when `order` lists exactly the current members.
    pub fn is_permutation(&self, order: &[String]) -> bool {
        if order.len() != self.members.len() {
            return false;
        }
        let mut a: Vec<&String> = self.members.iter().collect();
        let mut b: Vec<&String> = order.iter().collect();
        a.sort();
        b.sort();
        a == b
    }

    pub(crate) fn set_members(&mut self, members: Vec<String>) {
        self.members = members;
    }

    pub(crate) fn retain_members<F: FnMut(&str) -> bool>(&mut self, mut keep: F) -> Vec<String> {
        let mut dropped = Vec::new();
        self.members.retain(|m| {
            let ok = keep(m);
            if !ok {
                dropped.push(m.clone());
            }
            ok
        });
        dropped
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericVariable {
    name: String,
    pub value: f64,
}

impl NumericVariable {
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextVariable {
    name: String,
    #[serde(default)]
    pub lines: Vec<String>,
}

impl TextVariable {
    pub fn new(name: &str, lines: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            lines,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DataObject {
    Sequence(Sequence),
    Motif(Motif),
    Module(Module),
    Output(Output),
    SequenceCollection(Collection),
    MotifCollection(Collection),
    ModuleCollection(Collection),
    NumericVariable(NumericVariable),
    TextVariable(TextVariable),
}

impl DataObject {
    pub fn name(&self) -> &str {
        match self {
            Self::Sequence(d) => &d.name,
            Self::Motif(d) => &d.name,
            Self::Module(d) => &d.name,
            Self::Output(d) => &d.name,
            Self::SequenceCollection(d) | Self::MotifCollection(d) | Self::ModuleCollection(d) => {
                &d.name
            }
            Self::NumericVariable(d) => &d.name,
            Self::TextVariable(d) => &d.name,
        }
    }

    /// Only the registry renames objects, keeping its key in step.
    pub(crate) fn set_name(&mut self, name: &str) {
        let slot = match self {
            Self::Sequence(d) => &mut d.name,
            Self::Motif(d) => &mut d.name,
            Self::Module(d) => &mut d.name,
            Self::Output(d) => &mut d.name,
            Self::SequenceCollection(d) | Self::MotifCollection(d) | Self::ModuleCollection(d) => {
                &mut d.name
            }
            Self::NumericVariable(d) => &mut d.name,
            Self::TextVariable(d) => &mut d.name,
        };
        *slot = name.to_string();
    }

    /// Copy of this object under a different name.
    pub fn renamed_copy(&self, name: &str) -> DataObject {
        let mut ret = self.clone();
        ret.set_name(name);
        ret
    }

    pub fn kind(&self) -> DataKind {
        match self {
            Self::Sequence(_) => DataKind::Sequence,
            Self::Motif(_) => DataKind::Motif,
            Self::Module(_) => DataKind::Module,
            Self::Output(_) => DataKind::Output,
            Self::SequenceCollection(_) => DataKind::SequenceCollection,
            Self::MotifCollection(_) => DataKind::MotifCollection,
            Self::ModuleCollection(_) => DataKind::ModuleCollection,
            Self::NumericVariable(_) => DataKind::NumericVariable,
            Self::TextVariable(_) => DataKind::TextVariable,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.name().starts_with(TEMPORARY_PREFIX)
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Self::SequenceCollection(c) | Self::MotifCollection(c) | Self::ModuleCollection(c) => {
                Some(c)
            }
            _ => None,
        }
    }

    pub fn as_collection_mut(&mut self) -> Option<&mut Collection> {
        match self {
            Self::SequenceCollection(c) | Self::MotifCollection(c) | Self::ModuleCollection(c) => {
                Some(c)
            }
            _ => None,
        }
    }

    /// Copies the values of `other` into this object, keeping this object's name.
    pub fn merge(&mut self, other: DataObject) -> Result<(), MergeError> {
        if self.kind() != other.kind() {
            return Err(MergeError::Incompatible {
                target: self.kind(),
                source_kind: other.kind(),
            });
        }
        let name = self.name().to_string();
        *self = other;
        self.set_name(&name);
        Ok(())
    }

    /// Optional components needed to recreate this object.
    pub fn requirements(&self) -> Vec<String> {
        match self {
            Self::Output(Output {
                plugin: Some(plugin),
                ..
            }) => vec![plugin_requirement(plugin)],
            _ => Vec::new(),
        }
    }
}

/// Objects whose value can be entered interactively by a client.
pub trait Promptable {
    fn prompt_text(&self) -> String;
    fn current_value_text(&self) -> String;
    fn apply_prompt_value(&mut self, value: &str) -> Result<(), MergeError>;
}

/// Objects that can describe themselves as plain text.
pub trait Formattable {
    fn summary(&self) -> String;
    fn format_plain(&self) -> String;
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_region(value: &str) -> Option<(String, i64, i64)> {
    let (chromosome, range) = value.trim().rsplit_once(':')?;
    let (start, end) = range.split_once('-')?;
    let start = start.trim().replace(',', "").parse::<i64>().ok()?;
    let end = end.trim().replace(',', "").parse::<i64>().ok()?;
    if chromosome.trim().is_empty() || end < start {
        return None;
    }
    Some((chromosome.trim().to_string(), start, end))
}

impl Promptable for DataObject {
    fn prompt_text(&self) -> String {
        let hint = match self {
            Self::Sequence(_) => "genomic region as CHR:START-END",
            Self::Motif(_) => "IUPAC consensus",
            Self::Module(_) => "comma-separated motif names",
            Self::Output(_) => "text",
            Self::SequenceCollection(_) | Self::MotifCollection(_) | Self::ModuleCollection(_) => {
                "comma-separated member names"
            }
            Self::NumericVariable(_) => "number",
            Self::TextVariable(_) => "text, one entry per line",
        };
        format!("Enter a value for {} '{}' ({hint})", self.kind(), self.name())
    }

    fn current_value_text(&self) -> String {
        match self {
            Self::Sequence(s) => s.region_text(),
            Self::Motif(m) => m.consensus.clone(),
            Self::Module(m) => m.motifs.join(","),
            Self::Output(o) => o.text.clone(),
            Self::SequenceCollection(c) | Self::MotifCollection(c) | Self::ModuleCollection(c) => {
                c.members.join(",")
            }
            Self::NumericVariable(v) => v.value.to_string(),
            Self::TextVariable(t) => t.lines.join("\n"),
        }
    }

    fn apply_prompt_value(&mut self, value: &str) -> Result<(), MergeError> {
        let kind = self.kind();
        let invalid = |reason: &str| MergeError::InvalidValue {
            kind,
            value: value.to_string(),
            reason: reason.to_string(),
        };
        match self {
            Self::Sequence(s) => {
                let (chromosome, start, end) =
                    parse_region(value).ok_or_else(|| invalid("expected CHR:START-END"))?;
                s.chromosome = chromosome;
                s.start = start;
                s.end = end;
            }
            Self::Motif(m) => {
                let consensus = value.trim();
                if consensus.is_empty() || !consensus.chars().all(is_iupac_base) {
                    return Err(invalid("expected IUPAC letters"));
                }
                let rebuilt = Motif::from_consensus(&m.name, consensus);
                m.consensus = rebuilt.consensus;
                m.matrix = rebuilt.matrix;
            }
            Self::Module(m) => {
                let motifs = split_list(value);
                if motifs.is_empty() {
                    return Err(invalid("a module needs at least one motif"));
                }
                m.motifs = motifs;
            }
            Self::Output(o) => o.text = value.to_string(),
            Self::SequenceCollection(c) | Self::MotifCollection(c) | Self::ModuleCollection(c) => {
                let name = c.name.clone();
                *c = Collection::with_members(&name, split_list(value));
            }
            Self::NumericVariable(v) => {
                v.value = value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|x| x.is_finite())
                    .ok_or_else(|| invalid("expected a finite number"))?;
            }
            Self::TextVariable(t) => {
                t.lines = value.lines().map(|l| l.to_string()).collect();
            }
        }
        Ok(())
    }
}

impl Formattable for DataObject {
    fn summary(&self) -> String {
        let detail = match self {
            Self::Sequence(s) => format!("{} ({} bp)", s.region_text(), s.len()),
            Self::Motif(m) => format!("{} ({} positions)", m.consensus, m.len()),
            Self::Module(m) => format!("{} motif(s)", m.motifs.len()),
            Self::Output(o) => format!("{} output, {} bytes", o.format, o.text.len()),
            Self::SequenceCollection(c) | Self::MotifCollection(c) | Self::ModuleCollection(c) => {
                format!("{} member(s)", c.len())
            }
            Self::NumericVariable(v) => v.value.to_string(),
            Self::TextVariable(t) => format!("{} line(s)", t.lines.len()),
        };
        format!("{} [{}] {detail}", self.name(), self.kind())
    }

    fn format_plain(&self) -> String {
        match self {
            Self::Sequence(s) => {
                let strand = match s.strand {
                    Strand::Direct => "+",
                    Strand::Reverse => "-",
                };
                let mut line = format!("{}\t{}\t{}", s.name, s.region_text(), strand);
                if let Some(gene) = &s.gene_name {
                    line.push('\t');
                    line.push_str(gene);
                }
                line
            }
            Self::Motif(m) => {
                let mut out = format!(">{}\t{}\n", m.name, m.consensus);
                for row in &m.matrix {
                    out.push_str(&format!("{}\t{}\t{}\t{}\n", row[0], row[1], row[2], row[3]));
                }
                out
            }
            Self::Module(m) => format!("{}\t{}", m.name, m.motifs.join(",")),
            Self::Output(o) => o.text.clone(),
            Self::SequenceCollection(c) | Self::MotifCollection(c) | Self::ModuleCollection(c) => {
                c.members.join("\n")
            }
            Self::NumericVariable(v) => v.value.to_string(),
            Self::TextVariable(t) => t.lines.join("\n"),
        }
    }
}
